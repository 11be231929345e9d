use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{OrderId, SeatId, SessionId, ZoneId};
use crate::error::{BookingError, BookingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Reserved,
    Sold,
    Locked,
}

/// Переходы места. Всё, чего нет в таблице `SeatStatus::apply`, запрещено.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatTransition {
    Reserve,
    Release,
    Sell,
    Lock,
}

impl SeatStatus {
    pub const ALL: [SeatStatus; 4] = [
        SeatStatus::Available,
        SeatStatus::Reserved,
        SeatStatus::Sold,
        SeatStatus::Locked,
    ];

    pub fn apply(self, transition: SeatTransition) -> Option<SeatStatus> {
        use SeatStatus::*;
        use SeatTransition::*;

        match (self, transition) {
            (Available, Reserve) => Some(Reserved),
            (Reserved, Release) => Some(Available),
            (Reserved, Sell) => Some(Sold),
            (Available | Reserved, Lock) => Some(Locked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Reserved => "reserved",
            SeatStatus::Sold => "sold",
            SeatStatus::Locked => "locked",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SeatStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown seat status '{s}'"))
    }
}

/// Прямоугольник места на схеме зала.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Данные покупателя, сохранённые на месте в момент резерва.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Удержание места за заказом до `reserved_until`.
#[derive(Debug, Clone)]
pub struct Hold {
    pub order_id: OrderId,
    pub customer: CustomerSnapshot,
    pub reserved_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatTicket {
    pub id: SeatId,
    pub session_id: SessionId,
    /// Метка места на схеме зала
    pub seat_id: String,
    pub row: Option<String>,
    pub place: Option<String>,
    pub section: Option<String>,
    pub geometry: Geometry,
    pub price: Decimal,
    pub currency: String,
    pub status: SeatStatus,
    pub reserved_until: Option<DateTime<Utc>>,
    pub order_id: Option<OrderId>,
    pub customer: Option<CustomerSnapshot>,
    /// Слот групповой зоны ссылается на свою зону
    pub zone_id: Option<ZoneId>,
}

impl SeatTicket {
    pub fn new(session_id: SessionId, seat_id: impl Into<String>, price: Decimal, currency: &str) -> Self {
        Self {
            id: SeatId::new(),
            session_id,
            seat_id: seat_id.into(),
            row: None,
            place: None,
            section: None,
            geometry: Geometry::default(),
            price,
            currency: currency.to_string(),
            status: SeatStatus::Available,
            reserved_until: None,
            order_id: None,
            customer: None,
            zone_id: None,
        }
    }

    pub fn with_position(mut self, section: &str, row: &str, place: &str) -> Self {
        self.section = Some(section.to_string());
        self.row = Some(row.to_string());
        self.place = Some(place.to_string());
        self
    }

    pub fn label(&self) -> String {
        match (&self.section, &self.row, &self.place) {
            (Some(section), Some(row), Some(place)) => format!("{section} / row {row} / place {place}"),
            _ => self.seat_id.clone(),
        }
    }

    pub fn is_held_by(&self, order_id: OrderId) -> bool {
        self.order_id == Some(order_id)
    }

    /// Проверка для `reserve`: место должно быть свободно.
    pub fn check_reservable(&self) -> BookingResult<()> {
        match self.status.apply(SeatTransition::Reserve) {
            Some(_) => Ok(()),
            None => Err(BookingError::SeatUnavailable(self.id)),
        }
    }

    /// Проверка для `sell`: резерв этого заказа, срок не истёк.
    pub fn check_sellable(&self, order_id: OrderId, now: DateTime<Utc>) -> BookingResult<()> {
        if self.status.apply(SeatTransition::Sell).is_none() || !self.is_held_by(order_id) {
            return Err(BookingError::SeatUnavailable(self.id));
        }
        match self.reserved_until {
            Some(until) if until > now => Ok(()),
            _ => Err(BookingError::ReservationExpired(order_id)),
        }
    }

    pub fn reserve(&mut self, hold: &Hold) {
        self.status = SeatStatus::Reserved;
        self.reserved_until = Some(hold.reserved_until);
        self.order_id = Some(hold.order_id);
        self.customer = Some(hold.customer.clone());
    }

    pub fn sell(&mut self) {
        self.status = SeatStatus::Sold;
        self.reserved_until = None;
    }

    /// Возвращает true, если место действительно освобождено.
    pub fn release(&mut self) -> bool {
        match self.status.apply(SeatTransition::Release) {
            Some(next) => {
                self.status = next;
                self.reserved_until = None;
                self.order_id = None;
                self.customer = None;
                true
            }
            None => false,
        }
    }

    pub fn lock(&mut self) -> bool {
        match self.status.apply(SeatTransition::Lock) {
            Some(next) => {
                self.status = next;
                self.reserved_until = None;
                true
            }
            None => false,
        }
    }
}

/// Групповая зона: запись для отображения на схеме плюс `capacity` слотов.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub session_id: SessionId,
    pub label: String,
    pub capacity: u32,
    pub geometry: Geometry,
    pub price: Decimal,
    pub currency: String,
}

impl Zone {
    /// Строит зону и её слоты. Слоты ссылаются на зону по `zone_id`.
    pub fn with_slots(
        session_id: SessionId,
        label: &str,
        capacity: u32,
        price: Decimal,
        currency: &str,
    ) -> (Zone, Vec<SeatTicket>) {
        let zone = Zone {
            id: ZoneId::new(),
            session_id,
            label: label.to_string(),
            capacity,
            geometry: Geometry::default(),
            price,
            currency: currency.to_string(),
        };
        let slots = (1..=capacity)
            .map(|n| {
                let mut slot = SeatTicket::new(session_id, format!("{label}#{n}"), price, currency);
                slot.section = Some(label.to_string());
                slot.place = Some(n.to_string());
                slot.geometry = zone.geometry;
                slot.zone_id = Some(zone.id);
                slot
            })
            .collect();
        (zone, slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_exhaustive() {
        use SeatStatus::*;
        use SeatTransition::*;

        assert_eq!(Available.apply(Reserve), Some(Reserved));
        assert_eq!(Reserved.apply(Release), Some(Available));
        assert_eq!(Reserved.apply(Sell), Some(Sold));
        assert_eq!(Available.apply(Lock), Some(Locked));
        assert_eq!(Reserved.apply(Lock), Some(Locked));

        for status in [Sold, Locked] {
            for transition in [Reserve, Release, Sell, Lock] {
                assert_eq!(status.apply(transition), None, "{status} must be terminal");
            }
        }
        assert_eq!(Available.apply(Sell), None);
        assert_eq!(Available.apply(Release), None);
        assert_eq!(Reserved.apply(Reserve), None);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in SeatStatus::ALL {
            assert_eq!(status.as_str().parse::<SeatStatus>(), Ok(status));
        }
        assert!("selected".parse::<SeatStatus>().is_err());
    }

    #[test]
    fn sell_checks_owner_and_deadline() {
        let now = Utc::now();
        let order = OrderId::new();
        let mut seat = SeatTicket::new(SessionId::new(), "A1", Decimal::from(10), "KZT");
        seat.reserve(&Hold {
            order_id: order,
            customer: CustomerSnapshot::default(),
            reserved_until: now + chrono::Duration::minutes(5),
        });

        assert!(seat.check_sellable(order, now).is_ok());
        assert!(matches!(
            seat.check_sellable(OrderId::new(), now),
            Err(BookingError::SeatUnavailable(_))
        ));
        assert!(matches!(
            seat.check_sellable(order, now + chrono::Duration::minutes(5)),
            Err(BookingError::ReservationExpired(id)) if id == order
        ));
    }

    #[test]
    fn release_is_noop_on_available_seat() {
        let mut seat = SeatTicket::new(SessionId::new(), "A1", Decimal::from(10), "KZT");
        assert!(!seat.release());
        assert_eq!(seat.status, SeatStatus::Available);
    }

    #[test]
    fn zone_owns_its_slots() {
        let (zone, slots) = Zone::with_slots(SessionId::new(), "Fan", 3, Decimal::from(5), "KZT");
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|slot| slot.zone_id == Some(zone.id)));
    }
}
