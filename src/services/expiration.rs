//! Зачистка неоплаченных броней по истечении срока.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::BookingResult;
use crate::inventory::SeatInventory;
use crate::models::{ExpiryGuard, OrderId, OrderPatch, OrderStatus, SessionId};
use crate::notify::{EventDispatcher, InventoryEvent};
use crate::store::{OrderStore, SeatStore};

const SWEEP_BATCH: i64 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Заказы, переведённые в expired в этом проходе
    pub expired: usize,
    pub released_seats: u64,
    /// Просроченные резервы уже закрытых заказов
    pub abandoned_seats: u64,
    pub failed: usize,
}

pub struct ExpirationSweeper {
    seats: Arc<dyn SeatStore>,
    orders: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    events: EventDispatcher,
    concurrency: usize,
}

enum Outcome {
    Expired { released: u64 },
    /// Заказ успели оплатить или закрыть между выборкой и записью
    Skipped,
}

impl ExpirationSweeper {
    pub fn new(
        seats: Arc<dyn SeatStore>,
        orders: Arc<dyn OrderStore>,
        clock: Arc<dyn Clock>,
        events: EventDispatcher,
        concurrency: usize,
    ) -> Self {
        Self {
            seats,
            orders,
            clock,
            events,
            concurrency: concurrency.max(1),
        }
    }

    /// Один проход. Ошибка по отдельному заказу пишется в лог, проход идёт дальше.
    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let expired = match self.orders.list_expired_orders(now, SWEEP_BATCH).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "failed to list expired orders");
                report.failed += 1;
                return report;
            }
        };

        if !expired.is_empty() {
            debug!(candidates = expired.len(), "expiring orders");
        }

        let outcomes: Vec<(OrderId, BookingResult<Outcome>)> = stream::iter(expired)
            .map(|order_id| async move { (order_id, self.expire(order_id, now).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (order_id, outcome) in outcomes {
            match outcome {
                Ok(Outcome::Expired { released }) => {
                    report.expired += 1;
                    report.released_seats += released;
                }
                Ok(Outcome::Skipped) => {
                    debug!(order_id = %order_id, "order changed before expiry, skipped");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(order_id = %order_id, error = %e, "failed to expire order");
                }
            }
        }

        match self.seats.release_abandoned(now).await {
            Ok(changed) => {
                for (session_id, released) in changed {
                    report.abandoned_seats += released;
                    let inventory = self.inventory(session_id);
                    if let Err(e) = inventory.recompute_aggregates().await {
                        warn!(session_id = %session_id, error = %e, "failed to recompute inventory counters");
                    }
                    self.events.dispatch(InventoryEvent::SeatsChanged { session_id });
                }
            }
            Err(e) => {
                report.failed += 1;
                error!(error = %e, "failed to release abandoned holds");
            }
        }

        if report.expired > 0 || report.abandoned_seats > 0 || report.failed > 0 {
            info!(
                expired = report.expired,
                released_seats = report.released_seats,
                abandoned_seats = report.abandoned_seats,
                failed = report.failed,
                "expiration sweep finished"
            );
        }
        report
    }

    async fn expire(&self, order_id: OrderId, now: DateTime<Utc>) -> BookingResult<Outcome> {
        // Статус и срок проверяются в самой записи, не по выборке
        let expired = self
            .orders
            .transition_order(
                order_id,
                &[OrderStatus::Temporary, OrderStatus::Pending],
                OrderStatus::Expired,
                ExpiryGuard::After(now),
                &OrderPatch::default(),
                now,
            )
            .await?;

        let Some(expired) = expired else {
            return Ok(Outcome::Skipped);
        };

        let released = self
            .inventory(expired.session_id)
            .release_for_order(&expired.seat_ids(), expired.id)
            .await?;
        Ok(Outcome::Expired { released })
    }

    fn inventory(&self, session_id: SessionId) -> SeatInventory {
        SeatInventory::new(self.seats.clone(), self.clock.clone(), self.events.clone(), session_id)
    }

    pub async fn run(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        info!(interval_secs = every.as_secs(), "Expiration sweeper started");
        let mut interval = tokio::time::interval(every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Expiration sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}
