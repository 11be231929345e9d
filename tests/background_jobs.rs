mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::Harness;
use seat_booking::error::{BookingError, BookingResult};
use seat_booking::models::{ExpiryGuard, Order, OrderId, OrderPatch, OrderStatus, SeatStatus};
use seat_booking::notify::EventDispatcher;
use seat_booking::services::{ExpirationSweeper, LockOutcome};
use seat_booking::store::{MemoryStore, OrderStore, SeatStore};

/// Хранилище заказов, у которого переход одного заказа всегда падает.
struct FailingOrder {
    inner: Arc<MemoryStore>,
    broken: OrderId,
}

#[async_trait]
impl OrderStore for FailingOrder {
    async fn next_order_number(&self) -> BookingResult<i64> {
        self.inner.next_order_number().await
    }

    async fn insert_order(&self, order: &Order) -> BookingResult<()> {
        self.inner.insert_order(order).await
    }

    async fn delete_order(&self, order_id: OrderId) -> BookingResult<()> {
        self.inner.delete_order(order_id).await
    }

    async fn load_order(&self, order_id: OrderId) -> BookingResult<Order> {
        self.inner.load_order(order_id).await
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
        if order_id == self.broken {
            return Err(BookingError::Database(sqlx::Error::Decode("order row is unreadable".into())));
        }
        self.inner.transition_order(order_id, from, to, guard, patch, now).await
    }

    async fn list_expired_orders(&self, now: DateTime<Utc>, limit: i64) -> BookingResult<Vec<OrderId>> {
        self.inner.list_expired_orders(now, limit).await
    }
}

#[tokio::test]
async fn expired_hold_is_released_by_sweep() {
    let h = Harness::new().await;
    let order = h.hold_order(&[h.a]).await;

    h.clock.advance(Duration::minutes(14));
    assert_eq!(h.sweeper.sweep_once().await.expired, 0);
    assert_eq!(h.status(h.a).await, SeatStatus::Reserved);

    h.clock.advance(Duration::minutes(2));
    let report = h.sweeper.sweep_once().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.released_seats, 1);
    assert_eq!(h.status(h.a).await, SeatStatus::Available);
    assert_eq!(h.booking.get_order(order.id).await.unwrap().status, OrderStatus::Expired);

    // Повторный проход ничего не меняет
    let again = h.sweeper.sweep_once().await;
    assert_eq!(again.expired, 0);
    assert_eq!(again.failed, 0);
}

#[tokio::test]
async fn broken_order_does_not_stop_the_sweep() {
    let h = Harness::new().await;
    let broken = h.hold_order(&[h.a]).await;
    let healthy = h.hold_order(&[h.b]).await;
    h.clock.advance(Duration::minutes(20));

    let orders = Arc::new(FailingOrder { inner: h.store.clone(), broken: broken.id });
    let sweeper = ExpirationSweeper::new(h.store.clone(), orders, h.clock.clone(), EventDispatcher::noop(), 4);

    let report = sweeper.sweep_once().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.booking.get_order(healthy.id).await.unwrap().status, OrderStatus::Expired);
    assert_eq!(h.status(h.b).await, SeatStatus::Available);

    // Сломанный заказ остаётся как был и попадёт в следующий проход
    assert_eq!(h.booking.get_order(broken.id).await.unwrap().status, OrderStatus::Temporary);
    assert_eq!(h.status(h.a).await, SeatStatus::Reserved);
    assert_eq!(sweeper.sweep_once().await.failed, 1);
}

#[tokio::test]
async fn sweep_leaves_paid_orders_alone() {
    let h = Harness::new().await;
    let order = h.pending_order(&[h.a]).await;
    h.booking.pay_order(order.id).await.unwrap();

    h.clock.advance(Duration::hours(1));
    assert_eq!(h.sweeper.sweep_once().await.expired, 0);
    assert_eq!(h.status(h.a).await, SeatStatus::Sold);
}

#[tokio::test]
async fn sweep_picks_up_holds_left_by_closed_orders() {
    let h = Harness::new().await;
    let order = h.hold_order(&[h.a, h.b]).await;
    h.clock.advance(Duration::minutes(20));

    // Заказ закрыт, а места так и остались в резерве
    h.store
        .transition_order(
            order.id,
            &[OrderStatus::Temporary],
            OrderStatus::Expired,
            ExpiryGuard::Any,
            &OrderPatch::default(),
            h.now(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.status(h.a).await, SeatStatus::Reserved);

    let report = h.sweeper.sweep_once().await;
    assert_eq!(report.expired, 0);
    assert_eq!(report.abandoned_seats, 2);
    assert_eq!(h.status(h.a).await, SeatStatus::Available);
    assert_eq!(h.status(h.b).await, SeatStatus::Available);
}

#[tokio::test]
async fn lock_happens_exactly_at_window_start() {
    let start = NaiveDate::from_ymd_opt(2030, 3, 1).and_then(|d| d.and_hms_opt(20, 0, 0)).unwrap();
    let h = Harness::with_start(start).await;
    let sold = h.pending_order(&[h.b]).await;
    h.booking.pay_order(sold.id).await.unwrap();
    h.hold_order(&[h.a]).await;

    let lock_at = Utc.from_utc_datetime(&start) - Duration::minutes(10);

    h.clock.set(lock_at - Duration::seconds(1));
    let report = h.locker.run_once().await;
    assert_eq!(report.sessions_locked, 0);
    assert_eq!(h.status(h.a).await, SeatStatus::Reserved);

    h.clock.set(lock_at);
    let report = h.locker.run_once().await;
    assert_eq!(report.sessions_locked, 1);
    assert_eq!(report.seats_locked, 5);
    assert_eq!(h.status(h.a).await, SeatStatus::Locked);
    assert_eq!(h.status(h.b).await, SeatStatus::Sold);

    let aggregates = h.store.recompute_aggregates(h.session.id).await.unwrap();
    assert_eq!(aggregates.locked, 5);
    assert_eq!(aggregates.sold, 1);
    assert!(aggregates.is_consistent());

    // Повторный запуск не трогает уже закрытый сеанс
    let report = h.locker.run_once().await;
    assert_eq!(report.sessions_locked, 0);
    assert!(h.store.load_session(h.session.id).await.unwrap().locked_at.is_some());
}

#[tokio::test]
async fn lock_time_follows_venue_timezone() {
    // 20:00 в Токио (UTC+9) = 11:00 UTC
    let start = NaiveDate::from_ymd_opt(2030, 3, 1).and_then(|d| d.and_hms_opt(20, 0, 0)).unwrap();
    let h = Harness::with_start(start).await;
    h.store.set_hall_timezone(h.session.hall_id, chrono_tz::Asia::Tokyo);

    let lock_at = h.locker.lock_at(&h.session).await.unwrap();
    assert_eq!(lock_at, Utc.with_ymd_and_hms(2030, 3, 1, 10, 50, 0).unwrap());

    h.clock.set(lock_at);
    assert_eq!(h.locker.run_once().await.sessions_locked, 1);
}

#[tokio::test]
async fn start_in_spring_gap_is_still_locked() {
    // В Берлине 31 марта 2030 часы переводятся с 02:00 на 03:00
    let start = NaiveDate::from_ymd_opt(2030, 3, 31).and_then(|d| d.and_hms_opt(2, 30, 0)).unwrap();
    let h = Harness::with_start(start).await;
    h.store.set_hall_timezone(h.session.hall_id, chrono_tz::Europe::Berlin);
    h.hold_order(&[h.a]).await;

    // 02:30 считается как 03:30 летнего времени, то есть 01:30 UTC
    let lock_at = h.locker.lock_at(&h.session).await.unwrap();
    assert_eq!(lock_at, Utc.with_ymd_and_hms(2030, 3, 31, 1, 20, 0).unwrap());

    h.clock.set(lock_at - Duration::seconds(1));
    assert_eq!(h.locker.run_once().await.sessions_locked, 0);

    h.clock.set(Utc.with_ymd_and_hms(2030, 3, 31, 3, 0, 0).unwrap());
    let report = h.locker.run_once().await;
    assert_eq!(report.sessions_locked, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.status(h.a).await, SeatStatus::Locked);
    assert!(h.booking.create_order(h.hold(&[h.b])).await.is_err());
}

#[tokio::test]
async fn manual_lock_waits_unless_forced() {
    let h = Harness::new().await;

    let outcome = h.locker.lock_session(h.session.id, false).await.unwrap();
    assert!(matches!(outcome, LockOutcome::NotYet { .. }));
    assert_eq!(h.status(h.a).await, SeatStatus::Available);

    let outcome = h.locker.lock_session(h.session.id, true).await.unwrap();
    assert_eq!(outcome, LockOutcome::Locked { seats: 6 });

    let outcome = h.locker.lock_session(h.session.id, true).await.unwrap();
    assert_eq!(outcome, LockOutcome::AlreadyLocked);

    // Места закрытого сеанса не продаются
    assert!(h.booking.create_order(h.hold(&[h.a])).await.is_err());
}

#[tokio::test]
async fn sweeper_loop_stops_on_cancel() {
    let h = Arc::new(Harness::new().await);
    let order = h.hold_order(&[h.a]).await;
    h.clock.advance(Duration::minutes(30));

    let cancel = CancellationToken::new();
    let sweeper = Arc::new(seat_booking::services::ExpirationSweeper::new(
        h.store.clone(),
        h.store.clone(),
        h.clock.clone(),
        seat_booking::notify::EventDispatcher::noop(),
        2,
    ));
    let job = tokio::spawn(sweeper.run(std::time::Duration::from_millis(10), cancel.clone()));

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        if h.booking.get_order(order.id).await.unwrap().status == OrderStatus::Expired {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "sweeper did not run");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    cancel.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(1), job)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
