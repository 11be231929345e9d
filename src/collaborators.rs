//! Внешние зависимости бронирования: цена места, промокоды, площадка.
//!
//! Бизнес-правила цен и акций живут снаружи; здесь только контракты и
//! простые реализации, которых хватает для расчёта скидки.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, BookingResult};
use crate::models::{HallId, SeatTicket, Session, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Price {
    pub value: Decimal,
    pub currency: String,
}

#[async_trait]
pub trait PriceLookup: Send + Sync {
    async fn price(&self, session: &Session, seat: &SeatTicket) -> BookingResult<Price>;
}

/// Цена из записи места (её проставляет ценовая схема при создании сеанса).
#[derive(Debug, Clone, Copy, Default)]
pub struct ListedPrices;

#[async_trait]
impl PriceLookup for ListedPrices {
    async fn price(&self, _session: &Session, seat: &SeatTicket) -> BookingResult<Price> {
        Ok(Price {
            value: seat.price,
            currency: seat.currency.clone(),
        })
    }
}

/// Контекст мероприятия для проверки промокода.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub session_id: SessionId,
    pub hall_id: HallId,
    pub price_scheme_id: Option<String>,
    pub starts_at: NaiveDateTime,
    pub now: DateTime<Utc>,
}

impl EventContext {
    pub fn new(session: &Session, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id,
            hall_id: session.hall_id,
            price_scheme_id: session.price_scheme_id.clone(),
            starts_at: session.start_time,
            now,
        }
    }
}

#[async_trait]
pub trait PromoValidator: Send + Sync {
    /// Размер скидки или `PromoCodeInvalid`.
    async fn validate(&self, code: &str, subtotal: Decimal, context: &EventContext) -> BookingResult<Decimal>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DiscountKind {
    Percent(Decimal),
    Amount(Decimal),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoRule {
    pub code: String,
    pub discount: DiscountKind,
    pub min_subtotal: Option<Decimal>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Ограничение одним сеансом
    pub session_id: Option<SessionId>,
    pub active: bool,
}

impl PromoRule {
    pub fn percent(code: &str, percent: Decimal) -> Self {
        Self::new(code, DiscountKind::Percent(percent))
    }

    pub fn amount(code: &str, amount: Decimal) -> Self {
        Self::new(code, DiscountKind::Amount(amount))
    }

    fn new(code: &str, discount: DiscountKind) -> Self {
        Self {
            code: code.to_string(),
            discount,
            min_subtotal: None,
            valid_until: None,
            session_id: None,
            active: true,
        }
    }

    /// Скидка не больше суммы заказа.
    pub fn discount_for(&self, subtotal: Decimal, context: &EventContext) -> Result<Decimal, String> {
        if !self.active {
            return Err("code is disabled".into());
        }
        if self.valid_until.is_some_and(|until| until <= context.now) {
            return Err("code has expired".into());
        }
        if self.session_id.is_some_and(|id| id != context.session_id) {
            return Err("code is not valid for this session".into());
        }
        if let Some(min) = self.min_subtotal {
            if subtotal < min {
                return Err(format!("order total must be at least {min}"));
            }
        }
        let discount = match self.discount {
            DiscountKind::Percent(percent) => (subtotal * percent / Decimal::ONE_HUNDRED).round_dp(2),
            DiscountKind::Amount(amount) => amount,
        };
        Ok(discount.max(Decimal::ZERO).min(subtotal))
    }
}

/// Промокоды в памяти.
#[derive(Debug, Default)]
pub struct PromoCatalog {
    rules: DashMap<String, PromoRule>,
}

impl PromoCatalog {
    pub fn new(rules: impl IntoIterator<Item = PromoRule>) -> Self {
        let catalog = Self::default();
        for rule in rules {
            catalog.insert(rule);
        }
        catalog
    }

    pub fn insert(&self, rule: PromoRule) {
        self.rules.insert(rule.code.to_uppercase(), rule);
    }
}

#[async_trait]
impl PromoValidator for PromoCatalog {
    async fn validate(&self, code: &str, subtotal: Decimal, context: &EventContext) -> BookingResult<Decimal> {
        let rule = self
            .rules
            .get(&code.trim().to_uppercase())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BookingError::PromoCodeInvalid {
                code: code.to_string(),
                reason: "unknown code".into(),
            })?;
        rule.discount_for(subtotal, context)
            .map_err(|reason| BookingError::PromoCodeInvalid {
                code: code.to_string(),
                reason,
            })
    }
}

#[async_trait]
pub trait VenueDirectory: Send + Sync {
    /// Таймзона площадки из базы IANA; `None`, если площадка не указала её.
    async fn timezone(&self, hall_id: HallId) -> BookingResult<Option<Tz>>;

    /// Смещение площадки от UTC в минутах на момент `at`.
    async fn timezone_offset(&self, hall_id: HallId, at: DateTime<Utc>) -> BookingResult<Option<i32>> {
        Ok(self
            .timezone(hall_id)
            .await?
            .map(|tz| offset_minutes(tz, at)))
    }
}

pub fn offset_minutes(tz: Tz, at: DateTime<Utc>) -> i32 {
    tz.offset_from_utc_datetime(&at.naive_utc()).fix().local_minus_utc() / 60
}

pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn context() -> EventContext {
        EventContext {
            session_id: SessionId::new(),
            hall_id: HallId::new(),
            price_scheme_id: None,
            starts_at: NaiveDate::from_ymd_opt(2026, 12, 31)
                .and_then(|d| d.and_hms_opt(20, 0, 0))
                .unwrap(),
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn percent_code_is_case_insensitive() {
        let catalog = PromoCatalog::new([PromoRule::percent("winter10", Decimal::from(10))]);
        let discount = catalog
            .validate("WINTER10", Decimal::from(250), &context())
            .await
            .unwrap();
        assert_eq!(discount, Decimal::from(25));
    }

    #[tokio::test]
    async fn unknown_or_expired_code_is_rejected() {
        let ctx = context();
        let mut expired = PromoRule::amount("OLD", Decimal::from(5));
        expired.valid_until = Some(ctx.now - chrono::Duration::days(1));
        let catalog = PromoCatalog::new([expired]);

        for code in ["OLD", "NOPE"] {
            let err = catalog.validate(code, Decimal::from(100), &ctx).await.unwrap_err();
            assert!(matches!(err, BookingError::PromoCodeInvalid { .. }), "{code}");
        }
    }

    #[test]
    fn amount_discount_never_exceeds_subtotal() {
        let rule = PromoRule::amount("BIG", Decimal::from(1000));
        assert_eq!(rule.discount_for(Decimal::from(40), &context()), Ok(Decimal::from(40)));
    }

    #[test]
    fn offset_comes_from_tz_database() {
        let at = Utc::now();
        assert_eq!(offset_minutes(chrono_tz::Asia::Kolkata, at), 330);
        assert_eq!(offset_minutes(chrono_tz::UTC, at), 0);
        assert!(parse_timezone("Mars/Olympus").is_none());
    }
}
