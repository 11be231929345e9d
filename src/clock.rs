//! Источник времени для сервиса и фоновых задач.
//!
//! Всё, что сравнивает сроки брони, берёт `now()` отсюда, а не из `Utc::now()`,
//! чтобы тесты могли двигать время вручную вместо `sleep`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Часы, которые двигаются только вручную.
#[derive(Debug)]
pub struct ManualClock {
    time: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self { time: RwLock::new(time) }
    }

    pub fn advance(&self, by: Duration) {
        *self.time.write() += by;
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.write() = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read()
    }
}
