//! Хранилища мест и заказов.
//!
//! Каждая мутация места - условная запись: "поставить reserved, только если
//! сейчас available". Пакетные операции (`reserve_seats`, `sell_seats`)
//! применяются целиком или не применяются вовсе.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BookingResult;
use crate::models::{
    CustomerSnapshot, ExpiryGuard, Hold, InventoryAggregates, Order, OrderId, OrderPatch,
    OrderStatus, SeatId, SeatTicket, Session, SessionId, Zone,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait SeatStore: Send + Sync {
    /// Создаёт сеанс вместе со всеми местами и зонами.
    async fn create_session(&self, session: &Session, seats: &[SeatTicket], zones: &[Zone]) -> BookingResult<()>;

    /// `SessionNotFound`, если сеанса нет.
    async fn load_session(&self, session_id: SessionId) -> BookingResult<Session>;

    /// Активные, не архивные и ещё не закрытые сеансы.
    async fn list_lock_candidates(&self) -> BookingResult<Vec<Session>>;

    /// Помечает сеанс закрытым; false, если он уже был закрыт.
    async fn mark_session_locked(&self, session_id: SessionId, at: DateTime<Utc>) -> BookingResult<bool>;

    async fn load_seats(&self, session_id: SessionId) -> BookingResult<Vec<SeatTicket>>;

    async fn load_zones(&self, session_id: SessionId) -> BookingResult<Vec<Zone>>;

    /// available -> reserved для всех мест пакета или ни для одного.
    async fn reserve_seats(&self, session_id: SessionId, seat_ids: &[SeatId], hold: &Hold) -> BookingResult<()>;

    /// Продлевает резерв мест, которые всё ещё принадлежат заказу.
    async fn extend_hold(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        order_id: OrderId,
        reserved_until: DateTime<Utc>,
        customer: Option<&CustomerSnapshot>,
    ) -> BookingResult<u64>;

    /// reserved -> sold; место должно принадлежать заказу и резерв не истёк.
    async fn sell_seats(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> BookingResult<()>;

    /// reserved -> available. С `owner` трогает только места этого заказа,
    /// владелец проверяется в момент записи.
    async fn release_seats(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        owner: Option<OrderId>,
    ) -> BookingResult<u64>;

    /// {available, reserved} -> locked. `None` - все места сеанса.
    async fn lock_seats(&self, session_id: SessionId, seat_ids: Option<&[SeatId]>) -> BookingResult<u64>;

    /// Освобождает просроченные резервы, чей заказ уже отменён или истёк.
    /// Возвращает сеансы, в которых что-то изменилось.
    async fn release_abandoned(&self, now: DateTime<Utc>) -> BookingResult<Vec<(SessionId, u64)>>;

    async fn recompute_aggregates(&self, session_id: SessionId) -> BookingResult<InventoryAggregates>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn next_order_number(&self) -> BookingResult<i64>;

    async fn insert_order(&self, order: &Order) -> BookingResult<()>;

    /// Откат создания заказа, если резерв не удался.
    async fn delete_order(&self, order_id: OrderId) -> BookingResult<()>;

    /// `OrderNotFound`, если заказа нет.
    async fn load_order(&self, order_id: OrderId) -> BookingResult<Order>;

    /// Условная смена статуса: применяется, только если текущий статус из `from`
    /// и срок удовлетворяет `guard`. `None` - условие не выполнено.
    async fn transition_order(
        &self,
        order_id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
        guard: ExpiryGuard,
        patch: &OrderPatch,
        now: DateTime<Utc>,
    ) -> BookingResult<Option<Order>>;

    /// Идентификаторы открытых заказов с `expires_at < now`, самые старые первыми.
    /// Сами заказы читаются по одному, в `transition_order`.
    async fn list_expired_orders(&self, now: DateTime<Utc>, limit: i64) -> BookingResult<Vec<OrderId>>;
}
