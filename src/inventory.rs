//! Схема мест одного сеанса. Все изменения статусов мест идут через этот
//! тип: он вызывает условные записи хранилища, затем пересчитывает счётчики
//! и сообщает об изменении.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    CustomerSnapshot, Hold, InventoryAggregates, InventorySnapshot, OrderId, SeatId, SeatStatus,
    SeatTicket, SessionId, ZoneId,
};
use crate::notify::{EventDispatcher, InventoryEvent};
use crate::store::SeatStore;

/// "N мест в зоне Z".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Validate)]
pub struct ZoneRequest {
    pub zone_id: ZoneId,
    #[validate(range(min = 1, max = 100))]
    pub quantity: u32,
}

#[derive(Clone)]
pub struct SeatInventory {
    store: Arc<dyn SeatStore>,
    clock: Arc<dyn Clock>,
    events: EventDispatcher,
    session_id: SessionId,
}

impl SeatInventory {
    pub fn new(
        store: Arc<dyn SeatStore>,
        clock: Arc<dyn Clock>,
        events: EventDispatcher,
        session_id: SessionId,
    ) -> Self {
        Self { store, clock, events, session_id }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Резерв на `ttl` от текущего момента. Возвращает `reserved_until`.
    pub async fn reserve(
        &self,
        seat_ids: &[SeatId],
        order_id: OrderId,
        customer: CustomerSnapshot,
        ttl: Duration,
    ) -> BookingResult<DateTime<Utc>> {
        if ttl <= Duration::zero() {
            return Err(BookingError::Validation("hold ttl must be positive".into()));
        }
        let hold = Hold {
            order_id,
            customer,
            reserved_until: self.clock.now() + ttl,
        };
        self.reserve_hold(seat_ids, &hold).await?;
        Ok(hold.reserved_until)
    }

    /// Резерв с заранее известным сроком (совпадает с `expires_at` заказа).
    pub async fn reserve_hold(&self, seat_ids: &[SeatId], hold: &Hold) -> BookingResult<()> {
        ensure_batch(seat_ids)?;
        if hold.reserved_until <= self.clock.now() {
            return Err(BookingError::Validation("hold must end in the future".into()));
        }
        self.store.reserve_seats(self.session_id, seat_ids, hold).await?;
        debug!(
            session_id = %self.session_id,
            order_id = %hold.order_id,
            seats = seat_ids.len(),
            reserved_until = %hold.reserved_until,
            "seats reserved"
        );
        self.after_mutation(seat_ids.len() as u64).await;
        Ok(())
    }

    pub async fn sell(&self, seat_ids: &[SeatId], order_id: OrderId) -> BookingResult<()> {
        self.sell_at(seat_ids, order_id, self.clock.now()).await
    }

    /// Продажа с моментом `now`, уже использованным при оплате заказа.
    pub async fn sell_at(&self, seat_ids: &[SeatId], order_id: OrderId, now: DateTime<Utc>) -> BookingResult<()> {
        ensure_batch(seat_ids)?;
        self.store.sell_seats(self.session_id, seat_ids, order_id, now).await?;
        debug!(session_id = %self.session_id, order_id = %order_id, seats = seat_ids.len(), "seats sold");
        self.after_mutation(seat_ids.len() as u64).await;
        Ok(())
    }

    /// Освобождает резервы. Уже свободные места пропускаются без ошибки.
    pub async fn release(&self, seat_ids: &[SeatId]) -> BookingResult<u64> {
        let released = self.store.release_seats(self.session_id, seat_ids, None).await?;
        self.after_mutation(released).await;
        Ok(released)
    }

    /// Как `release`, но только места, которые в момент записи всё ещё
    /// принадлежат `order_id`.
    pub async fn release_for_order(&self, seat_ids: &[SeatId], order_id: OrderId) -> BookingResult<u64> {
        let released = self
            .store
            .release_seats(self.session_id, seat_ids, Some(order_id))
            .await?;
        if released > 0 {
            debug!(session_id = %self.session_id, order_id = %order_id, released, "seats released");
        }
        self.after_mutation(released).await;
        Ok(released)
    }

    pub async fn extend_hold(
        &self,
        seat_ids: &[SeatId],
        order_id: OrderId,
        reserved_until: DateTime<Utc>,
        customer: Option<&CustomerSnapshot>,
    ) -> BookingResult<u64> {
        self.store
            .extend_hold(self.session_id, seat_ids, order_id, reserved_until, customer)
            .await
    }

    pub async fn lock(&self, seat_ids: &[SeatId]) -> BookingResult<u64> {
        let locked = self.store.lock_seats(self.session_id, Some(seat_ids)).await?;
        self.after_mutation(locked).await;
        Ok(locked)
    }

    /// Закрывает продажу: все свободные и зарезервированные места сеанса.
    pub async fn lock_all(&self) -> BookingResult<u64> {
        let locked = self.store.lock_seats(self.session_id, None).await?;
        self.after_mutation(locked).await;
        Ok(locked)
    }

    pub async fn recompute_aggregates(&self) -> BookingResult<InventoryAggregates> {
        let aggregates = self.store.recompute_aggregates(self.session_id).await?;
        if !aggregates.is_consistent() {
            warn!(session_id = %self.session_id, ?aggregates, "inventory counters do not add up");
        }
        Ok(aggregates)
    }

    pub async fn snapshot(&self) -> BookingResult<InventorySnapshot> {
        let session = self.store.load_session(self.session_id).await?;
        let seats = self.store.load_seats(self.session_id).await?;
        let zones = self.store.load_zones(self.session_id).await?;
        let aggregates = InventoryAggregates::from_seats(&seats);
        Ok(InventorySnapshot { session, seats, zones, aggregates })
    }

    /// Превращает запрос покупателя в конкретные места.
    ///
    /// Идентификатор из `selected` может быть местом или зоной; зона в этом
    /// списке означает одно место в ней. Для зон выбираются свободные слоты
    /// по порядку схемы. Выбор делается по снимку: занятость окончательно
    /// проверяет условная запись при резерве.
    pub async fn resolve(&self, selected: &[Uuid], zones: &[ZoneRequest]) -> BookingResult<Vec<SeatTicket>> {
        let seats = self.store.load_seats(self.session_id).await?;
        let zone_ids: HashSet<ZoneId> = self
            .store
            .load_zones(self.session_id)
            .await?
            .into_iter()
            .map(|zone| zone.id)
            .collect();

        let mut picked: Vec<SeatTicket> = Vec::new();
        let mut taken: HashSet<SeatId> = HashSet::new();
        let mut wanted: BTreeMap<ZoneId, u32> = BTreeMap::new();

        for &raw in selected {
            let seat_id = SeatId::from(raw);
            if let Some(seat) = seats.iter().find(|seat| seat.id == seat_id) {
                if !taken.insert(seat.id) {
                    return Err(BookingError::Validation(format!("seat {seat_id} requested twice")));
                }
                picked.push(seat.clone());
                continue;
            }
            let zone_id = ZoneId::from(raw);
            if zone_ids.contains(&zone_id) {
                *wanted.entry(zone_id).or_default() += 1;
                continue;
            }
            return Err(BookingError::SeatNotFound(seat_id));
        }

        for request in zones {
            request.validate()?;
            if !zone_ids.contains(&request.zone_id) {
                return Err(BookingError::ZoneNotFound(request.zone_id));
            }
            *wanted.entry(request.zone_id).or_default() += request.quantity;
        }

        for (zone_id, requested) in wanted {
            let free: Vec<&SeatTicket> = seats
                .iter()
                .filter(|seat| {
                    seat.zone_id == Some(zone_id)
                        && seat.status == SeatStatus::Available
                        && !taken.contains(&seat.id)
                })
                .take(requested as usize)
                .collect();
            if (free.len() as u32) < requested {
                return Err(BookingError::ZoneSoldOut {
                    zone_id,
                    requested,
                    available: free.len() as u32,
                });
            }
            for seat in free {
                taken.insert(seat.id);
                picked.push(seat.clone());
            }
        }

        Ok(picked)
    }

    /// После каждой мутации: пересчёт счётчиков и событие для подписчиков.
    /// Ошибка пересчёта не отменяет уже сделанную запись.
    async fn after_mutation(&self, changed: u64) {
        if changed == 0 {
            return;
        }
        if let Err(e) = self.recompute_aggregates().await {
            warn!(session_id = %self.session_id, error = %e, "failed to recompute inventory counters");
        }
        self.events.dispatch(InventoryEvent::SeatsChanged { session_id: self.session_id });
    }
}

fn ensure_batch(seat_ids: &[SeatId]) -> BookingResult<()> {
    if seat_ids.is_empty() {
        return Err(BookingError::Validation("no seats requested".into()));
    }
    let distinct: HashSet<&SeatId> = seat_ids.iter().collect();
    if distinct.len() != seat_ids.len() {
        return Err(BookingError::Validation("seat listed twice in one batch".into()));
    }
    Ok(())
}
