use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use super::{CustomerSnapshot, OrderId, SeatId, SessionId, ZoneId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Temporary,
    Pending,
    Paid,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Temporary,
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Cancelled,
        OrderStatus::Expired,
    ];

    /// Единственная таблица переходов заказа.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (Temporary, Pending)
                | (Pending, Paid)
                | (Pending, Cancelled)
                | (Temporary, Expired)
                | (Pending, Expired)
        )
    }

    /// Заказ ещё держит места и может истечь.
    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Temporary | OrderStatus::Pending)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Temporary => "temporary",
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown order status '{s}'"))
    }
}

/// Как создаётся заказ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderMode {
    /// Анонимная бронь -> temporary
    #[default]
    Hold,
    /// Покупатель ввёл данные -> pending
    Checkout,
    /// Оплачено на кассе -> paid
    OfflinePaid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Customer {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 5, max = 32))]
    pub phone: String,
    #[validate(email)]
    pub email: String,
}

impl Customer {
    pub fn snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            name: Some(self.name.clone()),
            phone: Some(self.phone.clone()),
            email: Some(self.email.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub seat_id: SeatId,
    pub zone_id: Option<ZoneId>,
    pub label: String,
    pub price_snapshot: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub session_id: SessionId,
    pub order_number: i64,
    pub customer: Option<Customer>,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub promo_code: Option<String>,
    pub status: OrderStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn seat_ids(&self) -> Vec<SeatId> {
        self.line_items.iter().map(|item| item.seat_id).collect()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Итоги заказа: total = subtotal - discount, не меньше нуля.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn compute(items: &[LineItem], discount: Decimal) -> Self {
        let subtotal: Decimal = items.iter().map(|item| item.price_snapshot).sum();
        let discount = discount.max(Decimal::ZERO).min(subtotal);
        Self {
            subtotal,
            discount,
            total: (subtotal - discount).max(Decimal::ZERO),
        }
    }
}

/// Изменения, которые применяются вместе со сменой статуса.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub customer: Option<Customer>,
    pub expires_at: Option<DateTime<Utc>>,
    pub clear_expiry: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub clear_paid_at: bool,
}

/// Условие для смены статуса: проверяется в момент записи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryGuard {
    Any,
    /// expires_at > now (оплата, продление)
    Before(DateTime<Utc>),
    /// expires_at < now (зачистка)
    After(DateTime<Utc>),
}

impl ExpiryGuard {
    pub fn holds(&self, expires_at: Option<DateTime<Utc>>) -> bool {
        match (self, expires_at) {
            (ExpiryGuard::Any, _) => true,
            (ExpiryGuard::Before(now), Some(at)) => at > *now,
            (ExpiryGuard::After(now), Some(at)) => at < *now,
            (_, None) => false,
        }
    }
}
