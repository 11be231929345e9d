mod common;

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use common::Harness;
use seat_booking::error::BookingError;
use seat_booking::models::{OrderStatus, SeatId, SeatStatus};
use seat_booking::store::{OrderStore, SeatStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_buyers_one_seat_exactly_one_wins() {
    let h = Arc::new(Harness::new().await);

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.booking.create_order(h.hold(&[h.a])).await })
        })
        .collect();

    let mut won = Vec::new();
    let mut lost = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(order) => won.push(order),
            Err(BookingError::SeatUnavailable(id)) => {
                assert_eq!(id, h.a);
                lost += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(won.len(), 1);
    assert_eq!(lost, 1);
    let seat = h.seat(h.a).await;
    assert_eq!(seat.status, SeatStatus::Reserved);
    assert_eq!(seat.order_id, Some(won[0].id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_batches_never_share_a_seat() {
    let h = Arc::new(Harness::new().await);
    let seats: Vec<SeatId> = h.seats().await.iter().map(|s| s.id).collect();

    // Каждый покупатель берёт пару соседних мест
    let tasks: Vec<_> = (0..seats.len())
        .map(|i| {
            let h = h.clone();
            let pair = [seats[i], seats[(i + 1) % seats.len()]];
            tokio::spawn(async move { h.booking.create_order(h.hold(&pair)).await })
        })
        .collect();

    let mut owners: HashMap<SeatId, _> = HashMap::new();
    for task in tasks {
        if let Ok(order) = task.await.unwrap() {
            for seat_id in order.seat_ids() {
                assert!(owners.insert(seat_id, order.id).is_none(), "seat {seat_id} sold twice");
            }
        }
    }

    for seat in h.seats().await {
        match owners.get(&seat.id) {
            Some(order_id) => {
                assert_eq!(seat.status, SeatStatus::Reserved);
                assert_eq!(seat.order_id, Some(*order_id));
            }
            // Проигравшие пакеты не оставили за собой резервов
            None => assert_eq!(seat.status, SeatStatus::Available),
        }
    }

    let aggregates = h.store.recompute_aggregates(h.session.id).await.unwrap();
    assert!(aggregates.is_consistent());
    assert_eq!(aggregates.reserved as usize, owners.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn payment_and_sweep_racing_have_one_winner() {
    let h = Arc::new(Harness::new().await);
    let order = h.pending_order(&[h.a]).await;

    // Ровно в момент истечения: оплата уже не проходит, зачистка ещё не берёт
    h.clock.set(order.expires_at.unwrap());
    let pay = {
        let h = h.clone();
        tokio::spawn(async move { h.booking.pay_order(order.id).await })
    };
    let sweep = {
        let h = h.clone();
        tokio::spawn(async move { h.sweeper.sweep_once().await })
    };
    let (paid, report) = (pay.await.unwrap(), sweep.await.unwrap());
    assert!(paid.is_err());
    assert_eq!(report.expired, 0);
    assert_eq!(h.status(h.a).await, SeatStatus::Reserved);

    // Минутой раньше оплата проходит, и зачистка ничего не трогает
    let h2 = Arc::new(Harness::new().await);
    let order = h2.pending_order(&[h2.a]).await;
    h2.clock.advance(Duration::minutes(14));
    let pay = {
        let h = h2.clone();
        tokio::spawn(async move { h.booking.pay_order(order.id).await })
    };
    let sweep = {
        let h = h2.clone();
        tokio::spawn(async move { h.sweeper.sweep_once().await })
    };
    assert_eq!(pay.await.unwrap().unwrap().status, OrderStatus::Paid);
    assert_eq!(sweep.await.unwrap().expired, 0);
    assert_eq!(h2.status(h2.a).await, SeatStatus::Sold);
}

#[tokio::test]
async fn scoped_release_ignores_seat_resold_to_another_order() {
    let h = Harness::new().await;
    let stale = h.pending_order(&[h.a]).await;
    h.booking.cancel_order(stale.id).await.unwrap();

    let fresh = h.hold_order(&[h.a]).await;

    // Запоздавшая зачистка старого заказа не должна снять новый резерв
    let released = h
        .booking
        .inventory(h.session.id)
        .release_for_order(&[h.a], stale.id)
        .await
        .unwrap();
    assert_eq!(released, 0);

    let seat = h.seat(h.a).await;
    assert_eq!(seat.status, SeatStatus::Reserved);
    assert_eq!(seat.order_id, Some(fresh.id));
    assert_eq!(h.store.load_order(fresh.id).await.unwrap().status, OrderStatus::Temporary);
}
