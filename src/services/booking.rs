//! Жизненный цикл заказа: создание, ввод данных покупателя, оплата, отмена.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::collaborators::{EventContext, ListedPrices, PriceLookup, PromoCatalog, PromoValidator};
use crate::config::BookingConfig;
use crate::error::{BookingError, BookingResult};
use crate::inventory::{SeatInventory, ZoneRequest};
use crate::models::{
    Customer, ExpiryGuard, Hold, LineItem, Order, OrderId, OrderMode, OrderPatch, OrderStatus,
    SessionId, Totals,
};
use crate::notify::{EventDispatcher, InventoryEvent};
use crate::store::{OrderStore, SeatStore};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub session_id: SessionId,
    #[validate(nested)]
    pub customer: Option<Customer>,
    /// Места или зоны (зона = одно место в ней)
    #[serde(default)]
    pub selected_seat_ids: Vec<Uuid>,
    #[serde(default)]
    #[validate(nested)]
    pub group_capacity_requests: Vec<ZoneRequest>,
    #[validate(length(max = 64))]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub mode: OrderMode,
}

impl CreateOrderRequest {
    pub fn hold(session_id: SessionId, seat_ids: &[Uuid]) -> Self {
        Self {
            session_id,
            customer: None,
            selected_seat_ids: seat_ids.to_vec(),
            group_capacity_requests: Vec::new(),
            promo_code: None,
            mode: OrderMode::Hold,
        }
    }
}

pub struct BookingService {
    seats: Arc<dyn SeatStore>,
    orders: Arc<dyn OrderStore>,
    prices: Arc<dyn PriceLookup>,
    promos: Arc<dyn PromoValidator>,
    clock: Arc<dyn Clock>,
    events: EventDispatcher,
    config: BookingConfig,
}

impl BookingService {
    pub fn new(
        seats: Arc<dyn SeatStore>,
        orders: Arc<dyn OrderStore>,
        clock: Arc<dyn Clock>,
        config: BookingConfig,
    ) -> Self {
        Self {
            seats,
            orders,
            prices: Arc::new(ListedPrices),
            promos: Arc::new(PromoCatalog::default()),
            clock,
            events: EventDispatcher::noop(),
            config,
        }
    }

    pub fn with_prices(mut self, prices: Arc<dyn PriceLookup>) -> Self {
        self.prices = prices;
        self
    }

    pub fn with_promos(mut self, promos: Arc<dyn PromoValidator>) -> Self {
        self.promos = promos;
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn inventory(&self, session_id: SessionId) -> SeatInventory {
        SeatInventory::new(self.seats.clone(), self.clock.clone(), self.events.clone(), session_id)
    }

    pub async fn get_order(&self, order_id: OrderId) -> BookingResult<Order> {
        self.orders.load_order(order_id).await
    }

    /// Создаёт заказ и резервирует его места. Если резерв не прошёл, заказ
    /// удаляется и наружу уходит исходная ошибка.
    pub async fn create_order(&self, request: CreateOrderRequest) -> BookingResult<Order> {
        request.validate()?;
        if request.selected_seat_ids.is_empty() && request.group_capacity_requests.is_empty() {
            return Err(BookingError::Validation("no seats requested".into()));
        }
        if request.mode != OrderMode::Hold && request.customer.is_none() {
            return Err(BookingError::Validation("customer details are required for checkout".into()));
        }

        let session = self.seats.load_session(request.session_id).await?;
        if !session.active || session.archived {
            return Err(BookingError::Validation(format!("session {} is not on sale", session.id)));
        }

        let inventory = self.inventory(session.id);
        let now = self.clock.now();

        let picked = inventory
            .resolve(&request.selected_seat_ids, &request.group_capacity_requests)
            .await?;

        let mut line_items = Vec::with_capacity(picked.len());
        for seat in &picked {
            let price = self.prices.price(&session, seat).await?;
            line_items.push(LineItem {
                seat_id: seat.id,
                zone_id: seat.zone_id,
                label: seat.label(),
                price_snapshot: price.value,
                currency: price.currency,
            });
        }

        // Промокод проверяется до резерва: отказ не оставляет занятых мест
        let promo_code = request
            .promo_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());
        let subtotal: Decimal = line_items.iter().map(|item| item.price_snapshot).sum();
        let discount = match promo_code {
            Some(code) => {
                self.promos
                    .validate(code, subtotal, &EventContext::new(&session, now))
                    .await?
            }
            None => Decimal::ZERO,
        };
        let totals = Totals::compute(&line_items, discount);

        let (status, window) = match request.mode {
            OrderMode::Hold => (OrderStatus::Temporary, self.config.hold_ttl()),
            OrderMode::Checkout | OrderMode::OfflinePaid => (OrderStatus::Pending, self.config.payment_window()),
        };

        let order = Order {
            id: OrderId::new(),
            session_id: session.id,
            order_number: self.orders.next_order_number().await?,
            customer: request.customer.clone(),
            line_items,
            subtotal: totals.subtotal,
            discount: totals.discount,
            total: totals.total,
            promo_code: promo_code.map(str::to_string),
            status,
            expires_at: Some(now + window),
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        self.orders.insert_order(&order).await?;

        let hold = Hold {
            order_id: order.id,
            customer: order.customer.as_ref().map(Customer::snapshot).unwrap_or_default(),
            reserved_until: now + window,
        };
        if let Err(err) = inventory.reserve_hold(&order.seat_ids(), &hold).await {
            if let Err(cleanup) = self.orders.delete_order(order.id).await {
                error!(order_id = %order.id, error = %cleanup, "failed to delete order after rejected reservation");
            }
            info!(session_id = %session.id, code = err.code(), "order rejected");
            return Err(err);
        }

        info!(
            order_id = %order.id,
            order_number = order.order_number,
            session_id = %session.id,
            seats = order.line_items.len(),
            status = %order.status,
            total = %order.total,
            "order created"
        );

        if request.mode == OrderMode::OfflinePaid {
            return self.settle(&order, now).await;
        }
        Ok(order)
    }

    /// temporary -> pending: данные покупателя и новое окно оплаты.
    pub async fn upgrade_to_pending(&self, order_id: OrderId, customer: Customer) -> BookingResult<Order> {
        customer.validate()?;
        let now = self.clock.now();
        let expires_at = now + self.config.payment_window();

        let patch = OrderPatch {
            customer: Some(customer.clone()),
            expires_at: Some(expires_at),
            ..OrderPatch::default()
        };
        let order = match self
            .orders
            .transition_order(
                order_id,
                &[OrderStatus::Temporary],
                OrderStatus::Pending,
                ExpiryGuard::Before(now),
                &patch,
                now,
            )
            .await?
        {
            Some(order) => order,
            None => return Err(self.explain_rejected(order_id, OrderStatus::Pending, now).await),
        };

        // Статус мест не меняется, двигается только срок резерва
        let seat_ids = order.seat_ids();
        let extended = self
            .inventory(order.session_id)
            .extend_hold(&seat_ids, order.id, expires_at, Some(&customer.snapshot()))
            .await?;
        if extended != seat_ids.len() as u64 {
            warn!(order_id = %order.id, extended, seats = seat_ids.len(), "not every seat of the order is still held");
        }

        info!(order_id = %order.id, expires_at = %expires_at, "order moved to pending");
        Ok(order)
    }

    pub async fn pay_order(&self, order_id: OrderId) -> BookingResult<Order> {
        let order = self.orders.load_order(order_id).await?;
        let now = self.clock.now();
        if order.status != OrderStatus::Pending {
            return Err(BookingError::InvalidStatusTransition {
                from: order.status,
                to: OrderStatus::Paid,
            });
        }
        if order.is_expired_at(now) {
            return Err(BookingError::ReservationExpired(order.id));
        }
        self.settle(&order, now).await
    }

    /// Ручная смена статуса. Повтор текущего статуса ничего не делает.
    pub async fn update_order_status(&self, order_id: OrderId, target: OrderStatus) -> BookingResult<Order> {
        let order = self.orders.load_order(order_id).await?;
        if order.status == target {
            return Ok(order);
        }

        match target {
            OrderStatus::Paid => self.pay_order(order_id).await,
            OrderStatus::Cancelled | OrderStatus::Expired if order.status.can_transition_to(target) => {
                self.close_order(order, target).await
            }
            _ => Err(BookingError::InvalidStatusTransition { from: order.status, to: target }),
        }
    }

    pub async fn cancel_order(&self, order_id: OrderId) -> BookingResult<Order> {
        self.update_order_status(order_id, OrderStatus::Cancelled).await
    }

    async fn close_order(&self, order: Order, target: OrderStatus) -> BookingResult<Order> {
        let now = self.clock.now();
        let closed = self
            .orders
            .transition_order(order.id, &[order.status], target, ExpiryGuard::Any, &OrderPatch::default(), now)
            .await?;

        let closed = match closed {
            Some(closed) => closed,
            None => {
                // Статус успел смениться (оплата или зачистка)
                let current = self.orders.load_order(order.id).await?;
                if current.status == target {
                    return Ok(current);
                }
                return Err(BookingError::InvalidStatusTransition { from: current.status, to: target });
            }
        };

        let released = self
            .inventory(closed.session_id)
            .release_for_order(&closed.seat_ids(), closed.id)
            .await?;
        info!(order_id = %closed.id, status = %closed.status, released, "order closed");
        Ok(closed)
    }

    /// pending -> paid, затем продажа мест. Условие на срок проверяется в той
    /// же записи, что и смена статуса, поэтому зачистка и оплата не могут
    /// выиграть обе.
    async fn settle(&self, order: &Order, now: DateTime<Utc>) -> BookingResult<Order> {
        let patch = OrderPatch {
            paid_at: Some(now),
            clear_expiry: true,
            ..OrderPatch::default()
        };
        let paid = match self
            .orders
            .transition_order(order.id, &[OrderStatus::Pending], OrderStatus::Paid, ExpiryGuard::Before(now), &patch, now)
            .await?
        {
            Some(paid) => paid,
            None => return Err(self.explain_rejected(order.id, OrderStatus::Paid, now).await),
        };

        if let Err(err) = self.inventory(paid.session_id).sell_at(&paid.seat_ids(), paid.id, now).await {
            // Компенсация: места не проданы, заказ возвращается в pending
            let revert = OrderPatch {
                expires_at: order.expires_at,
                clear_paid_at: true,
                ..OrderPatch::default()
            };
            if let Err(e) = self
                .orders
                .transition_order(paid.id, &[OrderStatus::Paid], OrderStatus::Pending, ExpiryGuard::Any, &revert, now)
                .await
            {
                error!(order_id = %paid.id, error = %e, "failed to revert order after rejected sale");
            }
            warn!(order_id = %paid.id, code = err.code(), "payment rejected by inventory");
            return Err(err);
        }

        info!(order_id = %paid.id, order_number = paid.order_number, total = %paid.total, "order paid");
        self.events.dispatch(InventoryEvent::OrderPaid {
            order_id: paid.id,
            session_id: paid.session_id,
            order_number: paid.order_number,
            total: paid.total,
            seat_ids: paid.seat_ids(),
        });
        Ok(paid)
    }

    /// Условная запись не прошла: либо статус уже другой, либо истёк срок.
    async fn explain_rejected(&self, order_id: OrderId, target: OrderStatus, now: DateTime<Utc>) -> BookingError {
        match self.orders.load_order(order_id).await {
            Ok(order) if order.status.can_transition_to(target) => {
                if !order.is_expired_at(now) {
                    warn!(order_id = %order_id, "conditional order update lost without visible cause");
                }
                BookingError::ReservationExpired(order_id)
            }
            Ok(order) => BookingError::InvalidStatusTransition { from: order.status, to: target },
            Err(err) => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{HallId, SeatId, SeatStatus, SeatTicket, Session};
    use crate::store::MemoryStore;
    use chrono::{Duration, NaiveDate};

    async fn service() -> (BookingService, Arc<MemoryStore>, Arc<ManualClock>, SessionId, Vec<SeatId>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let session = Session {
            id: SessionId::new(),
            hall_id: HallId::new(),
            price_scheme_id: None,
            title: "Play".into(),
            start_time: NaiveDate::from_ymd_opt(2030, 5, 1)
                .and_then(|d| d.and_hms_opt(18, 0, 0))
                .unwrap(),
            active: true,
            archived: false,
            locked_at: None,
        };
        let seats = vec![
            SeatTicket::new(session.id, "A1", Decimal::from(120), "KZT"),
            SeatTicket::new(session.id, "A2", Decimal::from(80), "KZT"),
        ];
        let ids = seats.iter().map(|s| s.id).collect();
        store.create_session(&session, &seats, &[]).await.unwrap();

        let service = BookingService::new(store.clone(), store.clone(), clock.clone(), BookingConfig::default());
        (service, store, clock, session.id, ids)
    }

    #[tokio::test]
    async fn hold_creates_temporary_order_with_totals() {
        let (service, _, clock, session_id, ids) = service().await;
        let request = CreateOrderRequest::hold(session_id, &[ids[0].as_uuid(), ids[1].as_uuid()]);

        let order = service.create_order(request).await.unwrap();

        assert_eq!(order.status, OrderStatus::Temporary);
        assert_eq!(order.subtotal, Decimal::from(200));
        assert_eq!(order.total, Decimal::from(200));
        assert_eq!(order.expires_at, Some(clock.now() + Duration::minutes(15)));
    }

    #[tokio::test]
    async fn checkout_without_customer_is_rejected() {
        let (service, store, _, session_id, ids) = service().await;
        let mut request = CreateOrderRequest::hold(session_id, &[ids[0].as_uuid()]);
        request.mode = OrderMode::Checkout;

        let err = service.create_order(request).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));

        let seats = store.load_seats(session_id).await.unwrap();
        assert!(seats.iter().all(|s| s.status == SeatStatus::Available));
    }

    #[tokio::test]
    async fn temporary_order_cannot_be_cancelled_directly() {
        let (service, _, _, session_id, ids) = service().await;
        let order = service
            .create_order(CreateOrderRequest::hold(session_id, &[ids[0].as_uuid()]))
            .await
            .unwrap();

        let err = service.cancel_order(order.id).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::InvalidStatusTransition { from: OrderStatus::Temporary, to: OrderStatus::Cancelled }
        ));
    }

    #[tokio::test]
    async fn paid_order_rejects_going_back_to_pending() {
        let (service, _, _, session_id, ids) = service().await;
        let mut request = CreateOrderRequest::hold(session_id, &[ids[0].as_uuid()]);
        request.mode = OrderMode::OfflinePaid;
        request.customer = Some(Customer {
            name: "Dana".into(),
            phone: "+77770001122".into(),
            email: "dana@example.com".into(),
        });
        let order = service.create_order(request).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        let same = service.update_order_status(order.id, OrderStatus::Paid).await.unwrap();
        assert_eq!(same.status, OrderStatus::Paid);

        let err = service
            .update_order_status(order.id, OrderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidStatusTransition { .. }));
    }
}
