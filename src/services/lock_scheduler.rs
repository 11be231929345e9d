//! Закрытие продаж перед началом сеанса: все непроданные места переходят
//! в locked за `lock_window` до старта по часам площадки.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::collaborators::VenueDirectory;
use crate::error::BookingResult;
use crate::inventory::SeatInventory;
use crate::models::{Session, SessionId};
use crate::notify::EventDispatcher;
use crate::store::SeatStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockReport {
    pub sessions_locked: usize,
    pub seats_locked: u64,
    pub failed: usize,
}

/// Результат для одного сеанса.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LockOutcome {
    Locked { seats: u64 },
    /// Время закрытия ещё не наступило
    NotYet { lock_at: DateTime<Utc> },
    AlreadyLocked,
}

pub struct LockScheduler {
    seats: Arc<dyn SeatStore>,
    venues: Arc<dyn VenueDirectory>,
    clock: Arc<dyn Clock>,
    events: EventDispatcher,
    lock_window: Duration,
    default_tz: Tz,
}

impl LockScheduler {
    pub fn new(
        seats: Arc<dyn SeatStore>,
        venues: Arc<dyn VenueDirectory>,
        clock: Arc<dyn Clock>,
        events: EventDispatcher,
        lock_window: Duration,
        default_tz: Tz,
    ) -> Self {
        Self { seats, venues, clock, events, lock_window, default_tz }
    }

    /// Момент закрытия продаж сеанса в UTC.
    pub async fn lock_at(&self, session: &Session) -> BookingResult<DateTime<Utc>> {
        let tz = match self.venues.timezone(session.hall_id).await? {
            Some(tz) => tz,
            None => {
                debug!(hall_id = %session.hall_id, tz = %self.default_tz, "hall has no timezone, using default");
                self.default_tz
            }
        };
        Ok(session.start_utc(tz) - self.lock_window)
    }

    pub async fn run_once(&self) -> LockReport {
        let mut report = LockReport::default();

        let sessions = match self.seats.list_lock_candidates().await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "failed to list sessions for locking");
                report.failed += 1;
                return report;
            }
        };

        for session in sessions {
            match self.lock_if_due(&session, false).await {
                Ok(LockOutcome::Locked { seats }) => {
                    report.sessions_locked += 1;
                    report.seats_locked += seats;
                }
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(session_id = %session.id, error = %e, "failed to lock session");
                }
            }
        }

        if report.sessions_locked > 0 || report.failed > 0 {
            info!(
                sessions_locked = report.sessions_locked,
                seats_locked = report.seats_locked,
                failed = report.failed,
                "lock run finished"
            );
        }
        report
    }

    /// Ручной запуск для одного сеанса. С `force` закрывает сразу.
    pub async fn lock_session(&self, session_id: SessionId, force: bool) -> BookingResult<LockOutcome> {
        let session = self.seats.load_session(session_id).await?;
        self.lock_if_due(&session, force).await
    }

    async fn lock_if_due(&self, session: &Session, force: bool) -> BookingResult<LockOutcome> {
        if session.locked_at.is_some() {
            return Ok(LockOutcome::AlreadyLocked);
        }

        let now = self.clock.now();
        if !force {
            let lock_at = self.lock_at(session).await?;
            if now < lock_at {
                return Ok(LockOutcome::NotYet { lock_at });
            }
        }

        let inventory = SeatInventory::new(self.seats.clone(), self.clock.clone(), self.events.clone(), session.id);
        let seats = inventory.lock_all().await?;
        if !self.seats.mark_session_locked(session.id, now).await? {
            return Ok(LockOutcome::AlreadyLocked);
        }

        info!(session_id = %session.id, seats, "session sales closed");
        Ok(LockOutcome::Locked { seats })
    }

    pub async fn run(self: Arc<Self>, every: std::time::Duration, cancel: CancellationToken) {
        info!(
            interval_secs = every.as_secs(),
            window_secs = self.lock_window.num_seconds(),
            "Lock scheduler started"
        );
        let mut interval = tokio::time::interval(every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Lock scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.run_once().await;
                }
            }
        }
    }
}
