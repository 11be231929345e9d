//! Postgres-хранилище. Каждое место - отдельная строка в `seats`, все
//! переходы мест сделаны как `UPDATE ... WHERE status = ...`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{OrderStore, SeatStore};
use crate::collaborators::{
    parse_timezone, DiscountKind, EventContext, PromoRule, PromoValidator, VenueDirectory,
};
use crate::database::Database;
use crate::error::{BookingError, BookingResult};
use crate::models::ids::uuids;
use crate::models::{
    Customer, CustomerSnapshot, ExpiryGuard, Geometry, HallId, Hold, InventoryAggregates, LineItem,
    Order, OrderId, OrderPatch, OrderStatus, SeatId, SeatStatus, SeatTicket, Session, SessionId,
    Zone,
};

const SESSION_COLUMNS: &str =
    "id, hall_id, price_scheme_id, title, start_time, active, archived, locked_at";

const SEAT_COLUMNS: &str = "id, session_id, seat_label, row_label, place, section, x, y, w, h, \
     price, currency, status, reserved_until, order_id, customer, zone_id";

const ORDER_COLUMNS: &str = "id, session_id, order_number, customer, line_items, subtotal, \
     discount, total, promo_code, status, expires_at, created_at, updated_at, paid_at";

fn decode_error(message: String) -> BookingError {
    BookingError::Database(sqlx::Error::Decode(message.into()))
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    hall_id: Uuid,
    price_scheme_id: Option<String>,
    title: String,
    start_time: NaiveDateTime,
    active: bool,
    archived: bool,
    locked_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id.into(),
            hall_id: row.hall_id.into(),
            price_scheme_id: row.price_scheme_id,
            title: row.title,
            start_time: row.start_time,
            active: row.active,
            archived: row.archived,
            locked_at: row.locked_at,
        }
    }
}

#[derive(FromRow)]
struct SeatRow {
    id: Uuid,
    session_id: Uuid,
    seat_label: String,
    row_label: Option<String>,
    place: Option<String>,
    section: Option<String>,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    price: Decimal,
    currency: String,
    status: String,
    reserved_until: Option<DateTime<Utc>>,
    order_id: Option<Uuid>,
    customer: Option<Json<CustomerSnapshot>>,
    zone_id: Option<Uuid>,
}

impl TryFrom<SeatRow> for SeatTicket {
    type Error = BookingError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(SeatTicket {
            id: row.id.into(),
            session_id: row.session_id.into(),
            seat_id: row.seat_label,
            row: row.row_label,
            place: row.place,
            section: row.section,
            geometry: Geometry { x: row.x, y: row.y, w: row.w, h: row.h },
            price: row.price,
            currency: row.currency,
            status: row.status.parse().map_err(decode_error)?,
            reserved_until: row.reserved_until,
            order_id: row.order_id.map(OrderId::from),
            customer: row.customer.map(|json| json.0),
            zone_id: row.zone_id.map(Into::into),
        })
    }
}

#[derive(FromRow)]
struct ZoneRow {
    id: Uuid,
    session_id: Uuid,
    label: String,
    capacity: i32,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    price: Decimal,
    currency: String,
}

impl From<ZoneRow> for Zone {
    fn from(row: ZoneRow) -> Self {
        Zone {
            id: row.id.into(),
            session_id: row.session_id.into(),
            label: row.label,
            capacity: u32::try_from(row.capacity).unwrap_or_default(),
            geometry: Geometry { x: row.x, y: row.y, w: row.w, h: row.h },
            price: row.price,
            currency: row.currency,
        }
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    session_id: Uuid,
    order_number: i64,
    customer: Option<Json<Customer>>,
    line_items: Json<Vec<LineItem>>,
    subtotal: Decimal,
    discount: Decimal,
    total: Decimal,
    promo_code: Option<String>,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = BookingError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id.into(),
            session_id: row.session_id.into(),
            order_number: row.order_number,
            customer: row.customer.map(|json| json.0),
            line_items: row.line_items.0,
            subtotal: row.subtotal,
            discount: row.discount,
            total: row.total,
            promo_code: row.promo_code,
            status: row.status.parse().map_err(decode_error)?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
        })
    }
}

#[derive(FromRow)]
struct AggregatesRow {
    available: i64,
    reserved: i64,
    sold: i64,
    locked: i64,
    total: i64,
    revenue: Decimal,
}

impl From<AggregatesRow> for InventoryAggregates {
    fn from(row: AggregatesRow) -> Self {
        let count = |n: i64| u64::try_from(n).unwrap_or_default();
        InventoryAggregates {
            available: count(row.available),
            reserved: count(row.reserved),
            sold: count(row.sold),
            locked: count(row.locked),
            total: count(row.total),
            revenue: row.revenue,
        }
    }
}

#[derive(FromRow)]
struct SeatStateRow {
    id: Uuid,
    status: String,
    order_id: Option<Uuid>,
    reserved_until: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct PromoRow {
    code: String,
    percent_off: Option<Decimal>,
    amount_off: Option<Decimal>,
    min_subtotal: Option<Decimal>,
    valid_until: Option<DateTime<Utc>>,
    session_id: Option<Uuid>,
    active: bool,
}

impl PromoRow {
    fn into_rule(self) -> Option<PromoRule> {
        let discount = match (self.percent_off, self.amount_off) {
            (Some(percent), None) => DiscountKind::Percent(percent),
            (None, Some(amount)) => DiscountKind::Amount(amount),
            _ => return None,
        };
        Some(PromoRule {
            code: self.code,
            discount,
            min_subtotal: self.min_subtotal,
            valid_until: self.valid_until,
            session_id: self.session_id.map(Into::into),
            active: self.active,
        })
    }
}

#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn upsert_hall(&self, hall_id: HallId, name: &str, timezone: Option<&str>) -> BookingResult<()> {
        sqlx::query(
            "INSERT INTO halls (id, name, timezone) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, timezone = EXCLUDED.timezone",
        )
        .bind(hall_id.as_uuid())
        .bind(name)
        .bind(timezone)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    /// Берём строки мест под FOR UPDATE в одном порядке, чтобы пересекающиеся
    /// пакеты не ловили дедлок.
    async fn lock_rows(
        tx: &mut Transaction<'_, Postgres>,
        session_id: SessionId,
        ids: &[Uuid],
    ) -> BookingResult<Vec<Uuid>> {
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM seats WHERE session_id = $1 AND id = ANY($2) ORDER BY id FOR UPDATE",
        )
        .bind(session_id.as_uuid())
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;
        Ok(locked)
    }

    async fn seat_states(&self, session_id: SessionId, ids: &[Uuid]) -> BookingResult<Vec<SeatStateRow>> {
        let rows = sqlx::query_as::<_, SeatStateRow>(
            "SELECT id, status, order_id, reserved_until FROM seats WHERE session_id = $1 AND id = ANY($2)",
        )
        .bind(session_id.as_uuid())
        .bind(ids)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn ensure_seats_exist(&self, session_id: SessionId, seat_ids: &[SeatId]) -> BookingResult<()> {
        let ids = uuids(seat_ids);
        let found: HashSet<Uuid> = self
            .seat_states(session_id, &ids)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        match seat_ids.iter().find(|id| !found.contains(&id.as_uuid())) {
            Some(missing) => Err(BookingError::SeatNotFound(*missing)),
            None => Ok(()),
        }
    }

    /// Почему пакет не прошёл: первое отсутствующее место, иначе первое занятое.
    async fn explain_rejection(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        applied: &[Uuid],
        selling_for: Option<(OrderId, DateTime<Utc>)>,
    ) -> BookingError {
        let states = match self.seat_states(session_id, &uuids(seat_ids)).await {
            Ok(states) => states,
            Err(err) => return err,
        };
        let states: BTreeMap<Uuid, SeatStateRow> = states.into_iter().map(|row| (row.id, row)).collect();

        if let Some(missing) = seat_ids.iter().find(|id| !states.contains_key(&id.as_uuid())) {
            return BookingError::SeatNotFound(*missing);
        }
        if let Some((order_id, now)) = selling_for {
            let expired = states.values().any(|row| {
                row.status == SeatStatus::Reserved.as_str()
                    && row.order_id == Some(order_id.as_uuid())
                    && row.reserved_until.map_or(true, |until| until <= now)
            });
            if expired {
                return BookingError::ReservationExpired(order_id);
            }
        }
        let rejected = seat_ids
            .iter()
            .find(|id| !applied.contains(&id.as_uuid()))
            .or_else(|| seat_ids.first());
        match rejected {
            Some(seat_id) => BookingError::SeatUnavailable(*seat_id),
            None => BookingError::Validation("empty seat batch".into()),
        }
    }

    fn distinct(ids: &[Uuid]) -> usize {
        ids.iter().collect::<HashSet<_>>().len()
    }
}

#[async_trait]
impl SeatStore for PgStore {
    async fn create_session(&self, session: &Session, seats: &[SeatTicket], zones: &[Zone]) -> BookingResult<()> {
        let mut tx = self.db.pool.begin().await?;

        sqlx::query("INSERT INTO halls (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(session.hall_id.as_uuid())
            .bind(session.hall_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO sessions (id, hall_id, price_scheme_id, title, start_time, active, archived, locked_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id.as_uuid())
        .bind(session.hall_id.as_uuid())
        .bind(&session.price_scheme_id)
        .bind(&session.title)
        .bind(session.start_time)
        .bind(session.active)
        .bind(session.archived)
        .bind(session.locked_at)
        .execute(&mut *tx)
        .await?;

        for zone in zones {
            sqlx::query(
                "INSERT INTO zones (id, session_id, label, capacity, x, y, w, h, price, currency)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(zone.id.as_uuid())
            .bind(session.id.as_uuid())
            .bind(&zone.label)
            .bind(i32::try_from(zone.capacity).unwrap_or(i32::MAX))
            .bind(zone.geometry.x)
            .bind(zone.geometry.y)
            .bind(zone.geometry.w)
            .bind(zone.geometry.h)
            .bind(zone.price)
            .bind(&zone.currency)
            .execute(&mut *tx)
            .await?;
        }

        for (position, seat) in seats.iter().enumerate() {
            sqlx::query(
                "INSERT INTO seats (id, session_id, seat_label, row_label, place, section, x, y, w, h,
                                    price, currency, status, zone_id, position)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            )
            .bind(seat.id.as_uuid())
            .bind(session.id.as_uuid())
            .bind(&seat.seat_id)
            .bind(&seat.row)
            .bind(&seat.place)
            .bind(&seat.section)
            .bind(seat.geometry.x)
            .bind(seat.geometry.y)
            .bind(seat.geometry.w)
            .bind(seat.geometry.h)
            .bind(seat.price)
            .bind(&seat.currency)
            .bind(SeatStatus::Available.as_str())
            .bind(seat.zone_id.map(|id| id.as_uuid()))
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(session_id = %session.id, seats = seats.len(), zones = zones.len(), "session inventory created");
        Ok(())
    }

    async fn load_session(&self, session_id: SessionId) -> BookingResult<Session> {
        sqlx::query_as::<_, SessionRow>(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
            .bind(session_id.as_uuid())
            .fetch_optional(&self.db.pool)
            .await?
            .map(Session::from)
            .ok_or(BookingError::SessionNotFound(session_id))
    }

    async fn list_lock_candidates(&self) -> BookingResult<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE active AND NOT archived AND locked_at IS NULL
             ORDER BY start_time"
        ))
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn mark_session_locked(&self, session_id: SessionId, at: DateTime<Utc>) -> BookingResult<bool> {
        let result = sqlx::query("UPDATE sessions SET locked_at = $2 WHERE id = $1 AND locked_at IS NULL")
            .bind(session_id.as_uuid())
            .bind(at)
            .execute(&self.db.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_seats(&self, session_id: SessionId) -> BookingResult<Vec<SeatTicket>> {
        let rows = sqlx::query_as::<_, SeatRow>(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE session_id = $1 ORDER BY position"
        ))
        .bind(session_id.as_uuid())
        .fetch_all(&self.db.pool)
        .await?;
        rows.into_iter().map(SeatTicket::try_from).collect()
    }

    async fn load_zones(&self, session_id: SessionId) -> BookingResult<Vec<Zone>> {
        let rows = sqlx::query_as::<_, ZoneRow>(
            "SELECT id, session_id, label, capacity, x, y, w, h, price, currency
             FROM zones WHERE session_id = $1 ORDER BY label",
        )
        .bind(session_id.as_uuid())
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows.into_iter().map(Zone::from).collect())
    }

    async fn reserve_seats(&self, session_id: SessionId, seat_ids: &[SeatId], hold: &Hold) -> BookingResult<()> {
        let ids = uuids(seat_ids);
        let mut tx = self.db.pool.begin().await?;
        Self::lock_rows(&mut tx, session_id, &ids).await?;

        let reserved = sqlx::query_scalar::<_, Uuid>(
            "UPDATE seats
             SET status = 'reserved', reserved_until = $3, order_id = $4, customer = $5, updated_at = NOW()
             WHERE session_id = $1 AND id = ANY($2) AND status = 'available'
             RETURNING id",
        )
        .bind(session_id.as_uuid())
        .bind(&ids)
        .bind(hold.reserved_until)
        .bind(hold.order_id.as_uuid())
        .bind(Json(hold.customer.clone()))
        .fetch_all(&mut *tx)
        .await?;

        if reserved.len() == Self::distinct(&ids) {
            tx.commit().await?;
            return Ok(());
        }

        // Пакет целиком или ничего
        tx.rollback().await?;
        Err(self.explain_rejection(session_id, seat_ids, &reserved, None).await)
    }

    async fn extend_hold(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        order_id: OrderId,
        reserved_until: DateTime<Utc>,
        customer: Option<&CustomerSnapshot>,
    ) -> BookingResult<u64> {
        let result = sqlx::query(
            "UPDATE seats
             SET reserved_until = $4, customer = COALESCE($5, customer), updated_at = NOW()
             WHERE session_id = $1 AND id = ANY($2) AND status = 'reserved' AND order_id = $3",
        )
        .bind(session_id.as_uuid())
        .bind(uuids(seat_ids))
        .bind(order_id.as_uuid())
        .bind(reserved_until)
        .bind(customer.cloned().map(Json))
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn sell_seats(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> BookingResult<()> {
        let ids = uuids(seat_ids);
        let mut tx = self.db.pool.begin().await?;
        Self::lock_rows(&mut tx, session_id, &ids).await?;

        let sold = sqlx::query_scalar::<_, Uuid>(
            "UPDATE seats
             SET status = 'sold', reserved_until = NULL, updated_at = NOW()
             WHERE session_id = $1 AND id = ANY($2) AND status = 'reserved'
               AND order_id = $3 AND reserved_until > $4
             RETURNING id",
        )
        .bind(session_id.as_uuid())
        .bind(&ids)
        .bind(order_id.as_uuid())
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        if sold.len() == Self::distinct(&ids) {
            tx.commit().await?;
            return Ok(());
        }

        tx.rollback().await?;
        Err(self
            .explain_rejection(session_id, seat_ids, &sold, Some((order_id, now)))
            .await)
    }

    async fn release_seats(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
        owner: Option<OrderId>,
    ) -> BookingResult<u64> {
        self.ensure_seats_exist(session_id, seat_ids).await?;

        // Владелец сверяется в самом UPDATE, а не при чтении
        let result = sqlx::query(
            "UPDATE seats
             SET status = 'available', reserved_until = NULL, order_id = NULL, customer = NULL, updated_at = NOW()
             WHERE session_id = $1 AND id = ANY($2) AND status = 'reserved'
               AND ($3::uuid IS NULL OR order_id = $3)",
        )
        .bind(session_id.as_uuid())
        .bind(uuids(seat_ids))
        .bind(owner.map(|id| id.as_uuid()))
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn lock_seats(&self, session_id: SessionId, seat_ids: Option<&[SeatId]>) -> BookingResult<u64> {
        if let Some(ids) = seat_ids {
            self.ensure_seats_exist(session_id, ids).await?;
        }

        // Строки блокируются в порядке id, как в reserve_seats и sell_seats
        let result = sqlx::query(
            "UPDATE seats
             SET status = 'locked', reserved_until = NULL, updated_at = NOW()
             WHERE status IN ('available', 'reserved') AND id IN (
                 SELECT id FROM seats
                 WHERE session_id = $1 AND status IN ('available', 'reserved')
                   AND ($2::uuid[] IS NULL OR id = ANY($2))
                 ORDER BY id
                 FOR UPDATE
             )",
        )
        .bind(session_id.as_uuid())
        .bind(seat_ids.map(uuids))
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_abandoned(&self, now: DateTime<Utc>) -> BookingResult<Vec<(SessionId, u64)>> {
        let sessions = sqlx::query_scalar::<_, Uuid>(
            "UPDATE seats s
             SET status = 'available', reserved_until = NULL, order_id = NULL, customer = NULL, updated_at = NOW()
             FROM orders o
             WHERE s.order_id = o.id AND s.status = 'reserved' AND s.reserved_until < $1
               AND o.status IN ('cancelled', 'expired')
             RETURNING s.session_id",
        )
        .bind(now)
        .fetch_all(&self.db.pool)
        .await?;

        let mut counts: BTreeMap<Uuid, u64> = BTreeMap::new();
        for session_id in sessions {
            *counts.entry(session_id).or_default() += 1;
        }
        Ok(counts.into_iter().map(|(id, n)| (id.into(), n)).collect())
    }

    async fn recompute_aggregates(&self, session_id: SessionId) -> BookingResult<InventoryAggregates> {
        let mut tx = self.db.pool.begin().await?;

        // Пересчёты одного сеанса идут по очереди, иначе старый снимок может
        // перезаписать более новый
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(session_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, AggregatesRow>(
            "INSERT INTO session_stats (session_id, available, reserved, sold, locked, total, revenue, updated_at)
             SELECT $1,
                    COUNT(*) FILTER (WHERE status = 'available'),
                    COUNT(*) FILTER (WHERE status = 'reserved'),
                    COUNT(*) FILTER (WHERE status = 'sold'),
                    COUNT(*) FILTER (WHERE status = 'locked'),
                    COUNT(*),
                    COALESCE(SUM(price) FILTER (WHERE status = 'sold'), 0),
                    NOW()
             FROM seats WHERE session_id = $1
             ON CONFLICT (session_id) DO UPDATE SET
                available = EXCLUDED.available,
                reserved = EXCLUDED.reserved,
                sold = EXCLUDED.sold,
                locked = EXCLUDED.locked,
                total = EXCLUDED.total,
                revenue = EXCLUDED.revenue,
                updated_at = EXCLUDED.updated_at
             RETURNING available, reserved, sold, locked, total, revenue",
        )
        .bind(session_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn next_order_number(&self) -> BookingResult<i64> {
        let number = sqlx::query_scalar::<_, i64>("SELECT nextval('order_number_seq')")
            .fetch_one(&self.db.pool)
            .await?;
        Ok(number)
    }

    async fn insert_order(&self, order: &Order) -> BookingResult<()> {
        sqlx::query(
            "INSERT INTO orders (id, session_id, order_number, customer, line_items, subtotal, discount,
                                 total, promo_code, status, expires_at, created_at, updated_at, paid_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(order.id.as_uuid())
        .bind(order.session_id.as_uuid())
        .bind(order.order_number)
        .bind(order.customer.clone().map(Json))
        .bind(Json(order.line_items.clone()))
        .bind(order.subtotal)
        .bind(order.discount)
        .bind(order.total)
        .bind(&order.promo_code)
        .bind(order.status.as_str())
        .bind(order.expires_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn delete_order(&self, order_id: OrderId) -> BookingResult<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn load_order(&self, order_id: OrderId) -> BookingResult<Order> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.db.pool)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))
            .and_then(Order::try_from)
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
        let (not_before, not_after) = match guard {
            ExpiryGuard::Any => (None, None),
            ExpiryGuard::Before(at) => (Some(at), None),
            ExpiryGuard::After(at) => (None, Some(at)),
        };
        let from: Vec<&str> = from.iter().map(OrderStatus::as_str).collect();

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET
                status = $2,
                customer = COALESCE($3, customer),
                expires_at = CASE WHEN $4 THEN NULL ELSE COALESCE($5, expires_at) END,
                paid_at = CASE WHEN $11 THEN NULL ELSE COALESCE($6, paid_at) END,
                updated_at = $7
             WHERE id = $1 AND status = ANY($8)
               AND ($9::timestamptz IS NULL OR expires_at > $9)
               AND ($10::timestamptz IS NULL OR expires_at < $10)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id.as_uuid())
        .bind(to.as_str())
        .bind(patch.customer.clone().map(Json))
        .bind(patch.clear_expiry)
        .bind(patch.expires_at)
        .bind(patch.paid_at)
        .bind(now)
        .bind(&from)
        .bind(not_before)
        .bind(not_after)
        .bind(patch.clear_paid_at)
        .fetch_optional(&self.db.pool)
        .await?;

        match row {
            Some(row) => Order::try_from(row).map(Some),
            None => {
                // Нет такого заказа - ошибка, есть, но не подошло условие - None
                self.load_order(order_id).await?;
                Ok(None)
            }
        }
    }

    async fn list_expired_orders(&self, now: DateTime<Utc>, limit: i64) -> BookingResult<Vec<OrderId>> {
        // Только id: битая строка заказа не должна срывать выборку целиком
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM orders
             WHERE status IN ('temporary', 'pending') AND expires_at < $1
             ORDER BY expires_at
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(ids.into_iter().map(OrderId::from).collect())
    }
}

#[async_trait]
impl PromoValidator for PgStore {
    async fn validate(&self, code: &str, subtotal: Decimal, context: &EventContext) -> BookingResult<Decimal> {
        let invalid = |reason: &str| BookingError::PromoCodeInvalid {
            code: code.to_string(),
            reason: reason.to_string(),
        };

        let row = sqlx::query_as::<_, PromoRow>(
            "SELECT code, percent_off, amount_off, min_subtotal, valid_until, session_id, active
             FROM promo_codes WHERE UPPER(code) = UPPER($1)",
        )
        .bind(code.trim())
        .fetch_optional(&self.db.pool)
        .await?
        .ok_or_else(|| invalid("unknown code"))?;

        let rule = row.into_rule().ok_or_else(|| invalid("malformed code"))?;
        rule.discount_for(subtotal, context)
            .map_err(|reason| invalid(&reason))
    }
}

#[async_trait]
impl VenueDirectory for PgStore {
    async fn timezone(&self, hall_id: HallId) -> BookingResult<Option<Tz>> {
        let name = sqlx::query_scalar::<_, Option<String>>("SELECT timezone FROM halls WHERE id = $1")
            .bind(hall_id.as_uuid())
            .fetch_optional(&self.db.pool)
            .await?
            .flatten();

        Ok(name.and_then(|name| {
            let tz = parse_timezone(&name);
            if tz.is_none() {
                warn!(hall_id = %hall_id, timezone = %name, "unknown timezone for hall");
            }
            tz
        }))
    }
}
