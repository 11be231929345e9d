use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{HallId, SeatStatus, SeatTicket, SessionId, Zone};

/// Сеанс мероприятия. Время начала хранится в локальном времени площадки.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub hall_id: HallId,
    pub price_scheme_id: Option<String>,
    pub title: String,
    pub start_time: NaiveDateTime,
    pub active: bool,
    pub archived: bool,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Начало сеанса в UTC по таймзоне площадки.
    /// При переводе часов назад берётся более раннее из двух значений.
    /// Время внутри перевода вперёд считается по смещению до перехода,
    /// то есть 02:30 в Берлине в ночь перевода становится 03:30 летнего.
    pub fn start_utc(&self, tz: Tz) -> DateTime<Utc> {
        match tz.from_local_datetime(&self.start_time) {
            LocalResult::Single(local) | LocalResult::Ambiguous(local, _) => local.with_timezone(&Utc),
            LocalResult::None => {
                let before = tz
                    .offset_from_utc_datetime(&(self.start_time - Duration::days(1)))
                    .fix()
                    .local_minus_utc();
                Utc.from_utc_datetime(&(self.start_time - Duration::seconds(i64::from(before))))
            }
        }
    }

    pub fn is_lock_candidate(&self) -> bool {
        self.active && !self.archived && self.locked_at.is_none()
    }
}

/// Счётчики по статусам мест. Всегда пересчитываются, а не инкрементируются.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAggregates {
    pub available: u64,
    pub reserved: u64,
    pub sold: u64,
    pub locked: u64,
    pub total: u64,
    pub revenue: Decimal,
}

impl InventoryAggregates {
    pub fn from_seats<'a>(seats: impl IntoIterator<Item = &'a SeatTicket>) -> Self {
        let mut agg = InventoryAggregates::default();
        for seat in seats {
            agg.total += 1;
            match seat.status {
                SeatStatus::Available => agg.available += 1,
                SeatStatus::Reserved => agg.reserved += 1,
                SeatStatus::Sold => {
                    agg.sold += 1;
                    agg.revenue += seat.price;
                }
                SeatStatus::Locked => agg.locked += 1,
            }
        }
        agg
    }

    pub fn is_consistent(&self) -> bool {
        self.available + self.reserved + self.sold + self.locked == self.total
    }
}

/// Снимок схемы зала для витрины.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub session: Session,
    pub seats: Vec<SeatTicket>,
    pub zones: Vec<Zone>,
    pub aggregates: InventoryAggregates,
}
