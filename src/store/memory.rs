//! Хранилище в памяти: для тестов и локального запуска без Postgres.
//!
//! Места одного сеанса лежат под одним мьютексом; проверка и запись пакета
//! происходят под ним целиком, поэтому условная запись атомарна.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{OrderStore, SeatStore};
use crate::collaborators::VenueDirectory;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    CustomerSnapshot, ExpiryGuard, HallId, Hold, InventoryAggregates, Order, OrderId, OrderPatch,
    OrderStatus, SeatId, SeatStatus, SeatTicket, Session, SessionId, Zone,
};

struct SessionInventory {
    session: Session,
    seats: Vec<SeatTicket>,
    index: HashMap<SeatId, usize>,
    zones: Vec<Zone>,
    aggregates: InventoryAggregates,
}

impl SessionInventory {
    fn position(&self, seat_id: SeatId) -> BookingResult<usize> {
        self.index
            .get(&seat_id)
            .copied()
            .ok_or(BookingError::SeatNotFound(seat_id))
    }

    fn positions(&self, seat_ids: &[SeatId]) -> BookingResult<Vec<usize>> {
        seat_ids.iter().map(|id| self.position(*id)).collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<SessionId, Arc<Mutex<SessionInventory>>>,
    orders: DashMap<OrderId, Order>,
    halls: DashMap<HallId, Tz>,
    order_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hall_timezone(&self, hall_id: HallId, tz: Tz) {
        self.halls.insert(hall_id, tz);
    }

    fn inventory(&self, session_id: SessionId) -> BookingResult<Arc<Mutex<SessionInventory>>> {
        // Arc достаём из DashMap и отпускаем шард сразу, до захвата мьютекса
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or(BookingError::SessionNotFound(session_id))
    }
}

#[async_trait]
impl SeatStore for MemoryStore {
    async fn create_session(&self, session: &Session, seats: &[SeatTicket], zones: &[Zone]) -> BookingResult<()> {
        let index = seats.iter().enumerate().map(|(i, seat)| (seat.id, i)).collect();
        let inventory = SessionInventory {
            session: session.clone(),
            seats: seats.to_vec(),
            index,
            zones: zones.to_vec(),
            aggregates: InventoryAggregates::from_seats(seats),
        };
        self.sessions.insert(session.id, Arc::new(Mutex::new(inventory)));
        Ok(())
    }

    async fn load_session(&self, session_id: SessionId) -> BookingResult<Session> {
        Ok(self.inventory(session_id)?.lock().session.clone())
    }

    async fn list_lock_candidates(&self) -> BookingResult<Vec<Session>> {
        let handles: Vec<_> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
        let mut sessions: Vec<Session> = handles
            .iter()
            .map(|handle| handle.lock().session.clone())
            .filter(Session::is_lock_candidate)
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }

    async fn mark_session_locked(&self, session_id: SessionId, at: DateTime<Utc>) -> BookingResult<bool> {
        let handle = self.inventory(session_id)?;
        let mut inventory = handle.lock();
        if inventory.session.locked_at.is_some() {
            return Ok(false);
        }
        inventory.session.locked_at = Some(at);
        Ok(true)
    }

    async fn load_seats(&self, session_id: SessionId) -> BookingResult<Vec<SeatTicket>> {
        Ok(self.inventory(session_id)?.lock().seats.clone())
    }

    async fn load_zones(&self, session_id: SessionId) -> BookingResult<Vec<Zone>> {
        Ok(self.inventory(session_id)?.lock().zones.clone())
    }

    async fn reserve_seats(&self, session_id: SessionId, seat_ids: &[SeatId], hold: &Hold) -> BookingResult<()> {
        let handle = self.inventory(session_id)?;
        let mut inventory = handle.lock();

        // Сначала проверяем весь пакет, потом пишем
        let positions = inventory.positions(seat_ids)?;
        for &pos in &positions {
            inventory.seats[pos].check_reservable()?;
        }
        for pos in positions {
            inventory.seats[pos].reserve(hold);
        }
        Ok(())
    }

    async fn extend_hold(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        order_id: OrderId,
        reserved_until: DateTime<Utc>,
        customer: Option<&CustomerSnapshot>,
    ) -> BookingResult<u64> {
        let handle = self.inventory(session_id)?;
        let mut inventory = handle.lock();
        let positions = inventory.positions(seat_ids)?;

        let mut touched = 0;
        for pos in positions {
            let seat = &mut inventory.seats[pos];
            if seat.status == SeatStatus::Reserved && seat.is_held_by(order_id) {
                seat.reserved_until = Some(reserved_until);
                if let Some(customer) = customer {
                    seat.customer = Some(customer.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn sell_seats(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> BookingResult<()> {
        let handle = self.inventory(session_id)?;
        let mut inventory = handle.lock();

        let positions = inventory.positions(seat_ids)?;
        for &pos in &positions {
            inventory.seats[pos].check_sellable(order_id, now)?;
        }
        for pos in positions {
            inventory.seats[pos].sell();
        }
        Ok(())
    }

    async fn release_seats(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        owner: Option<OrderId>,
    ) -> BookingResult<u64> {
        let handle = self.inventory(session_id)?;
        let mut inventory = handle.lock();

        let positions = inventory.positions(seat_ids)?;
        let mut released = 0;
        for pos in positions {
            let seat = &mut inventory.seats[pos];
            if owner.is_some_and(|order_id| !seat.is_held_by(order_id)) {
                continue;
            }
            if seat.release() {
                released += 1;
            }
        }
        Ok(released)
    }

    async fn lock_seats(&self, session_id: SessionId, seat_ids: Option<&[SeatId]>) -> BookingResult<u64> {
        let handle = self.inventory(session_id)?;
        let mut inventory = handle.lock();

        let positions: Vec<usize> = match seat_ids {
            Some(ids) => inventory.positions(ids)?,
            None => (0..inventory.seats.len()).collect(),
        };
        let mut locked = 0;
        for pos in positions {
            if inventory.seats[pos].lock() {
                locked += 1;
            }
        }
        Ok(locked)
    }

    async fn release_abandoned(&self, now: DateTime<Utc>) -> BookingResult<Vec<(SessionId, u64)>> {
        let closed: HashSet<OrderId> = self
            .orders
            .iter()
            .filter(|entry| matches!(entry.status, OrderStatus::Cancelled | OrderStatus::Expired))
            .map(|entry| *entry.key())
            .collect();
        if closed.is_empty() {
            return Ok(Vec::new());
        }

        let handles: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut changed = Vec::new();
        for (session_id, handle) in handles {
            let mut inventory = handle.lock();
            let mut released = 0;
            for seat in inventory.seats.iter_mut() {
                let abandoned = seat.reserved_until.is_some_and(|until| until < now)
                    && seat.order_id.is_some_and(|id| closed.contains(&id));
                if abandoned && seat.release() {
                    released += 1;
                }
            }
            if released > 0 {
                changed.push((session_id, released));
            }
        }
        Ok(changed)
    }

    async fn recompute_aggregates(&self, session_id: SessionId) -> BookingResult<InventoryAggregates> {
        let handle = self.inventory(session_id)?;
        let mut inventory = handle.lock();
        let aggregates = InventoryAggregates::from_seats(&inventory.seats);
        inventory.aggregates = aggregates;
        Ok(aggregates)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn next_order_number(&self) -> BookingResult<i64> {
        Ok(self.order_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_order(&self, order: &Order) -> BookingResult<()> {
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn delete_order(&self, order_id: OrderId) -> BookingResult<()> {
        self.orders.remove(&order_id);
        Ok(())
    }

    async fn load_order(&self, order_id: OrderId) -> BookingResult<Order> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or(BookingError::OrderNotFound(order_id))
    }

    async fn transition_order(
        &self,
        order_id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
        guard: ExpiryGuard,
        patch: &OrderPatch,
        now: DateTime<Utc>,
    ) -> BookingResult<Option<Order>> {
        // get_mut держит шард на запись: проверка и запись атомарны
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or(BookingError::OrderNotFound(order_id))?;
        let order = entry.value_mut();

        if !from.contains(&order.status) || !guard.holds(order.expires_at) {
            return Ok(None);
        }

        order.status = to;
        if let Some(customer) = &patch.customer {
            order.customer = Some(customer.clone());
        }
        if patch.clear_expiry {
            order.expires_at = None;
        } else if let Some(expires_at) = patch.expires_at {
            order.expires_at = Some(expires_at);
        }
        if patch.clear_paid_at {
            order.paid_at = None;
        } else if let Some(paid_at) = patch.paid_at {
            order.paid_at = Some(paid_at);
        }
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn list_expired_orders(&self, now: DateTime<Utc>, limit: i64) -> BookingResult<Vec<OrderId>> {
        let mut expired: Vec<(DateTime<Utc>, OrderId)> = self
            .orders
            .iter()
            .filter(|entry| entry.status.is_open())
            .filter_map(|entry| entry.expires_at.filter(|at| *at < now).map(|at| (at, entry.id)))
            .collect();
        expired.sort_by_key(|(at, _)| *at);
        expired.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(expired.into_iter().map(|(_, id)| id).collect())
    }
}

#[async_trait]
impl VenueDirectory for MemoryStore {
    async fn timezone(&self, hall_id: HallId) -> BookingResult<Option<Tz>> {
        Ok(self.halls.get(&hall_id).map(|entry| *entry.value()))
    }
}
