mod common;

use chrono::Duration;
use rust_decimal::Decimal;

use common::{customer, Harness};
use seat_booking::error::BookingError;
use seat_booking::inventory::ZoneRequest;
use seat_booking::models::{OrderId, OrderMode, OrderStatus, SeatStatus};
use seat_booking::notify::InventoryEvent;
use seat_booking::store::SeatStore;

#[tokio::test]
async fn batch_with_taken_seat_leaves_other_seats_untouched() {
    let h = Harness::new().await;

    let first = h.hold_order(&[h.a]).await;
    assert_eq!(h.status(h.a).await, SeatStatus::Reserved);
    assert_eq!(first.expires_at, Some(h.now() + Duration::minutes(15)));

    let err = h.booking.create_order(h.hold(&[h.a, h.b])).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable(id) if id == h.a));

    assert_eq!(h.status(h.b).await, SeatStatus::Available);
    let a = h.seat(h.a).await;
    assert_eq!(a.order_id, Some(first.id));
}

#[tokio::test]
async fn hold_checkout_and_pay() {
    let mut h = Harness::new().await;
    let order = h.hold_order(&[h.a, h.b]).await;
    assert_eq!(order.status, OrderStatus::Temporary);
    assert_eq!(order.subtotal, Decimal::from(8000));

    h.clock.advance(Duration::minutes(10));
    let buyer = customer();
    let pending = h.booking.upgrade_to_pending(order.id, buyer.clone()).await.unwrap();
    assert_eq!(pending.status, OrderStatus::Pending);
    assert_eq!(pending.expires_at, Some(h.now() + Duration::minutes(15)));

    // Резерв мест продлён вместе с заказом
    let a = h.seat(h.a).await;
    assert_eq!(a.status, SeatStatus::Reserved);
    assert_eq!(a.reserved_until, pending.expires_at);
    assert_eq!(a.customer.and_then(|c| c.email), Some(buyer.email));

    let paid = h.booking.pay_order(order.id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.expires_at, None);
    assert_eq!(paid.paid_at, Some(h.now()));
    assert_eq!(h.status(h.a).await, SeatStatus::Sold);
    assert_eq!(h.status(h.b).await, SeatStatus::Sold);

    let aggregates = h.store.recompute_aggregates(h.session.id).await.unwrap();
    assert_eq!(aggregates.sold, 2);
    assert_eq!(aggregates.revenue, Decimal::from(8000));
    assert!(aggregates.is_consistent());

    let mut paid_event = None;
    while let Some(event) = h.events.recv().await {
        if let InventoryEvent::OrderPaid { order_id, .. } = event {
            paid_event = Some(order_id);
            break;
        }
    }
    assert_eq!(paid_event, Some(order.id));
}

#[tokio::test]
async fn pay_after_expiry_keeps_seats_reserved() {
    let h = Harness::new().await;
    let order = h.pending_order(&[h.a]).await;

    h.clock.advance(Duration::minutes(16));
    let err = h.booking.pay_order(order.id).await.unwrap_err();
    assert!(matches!(err, BookingError::ReservationExpired(id) if id == order.id));

    assert_eq!(h.status(h.a).await, SeatStatus::Reserved);
    let order = h.booking.get_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn sell_after_hold_deadline_fails_without_sweep() {
    let h = Harness::new().await;
    let order = h.hold_order(&[h.a]).await;

    h.clock.advance(Duration::minutes(15));
    let err = h
        .booking
        .inventory(h.session.id)
        .sell(&[h.a], order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::ReservationExpired(_)));
    assert_eq!(h.status(h.a).await, SeatStatus::Reserved);
}

#[tokio::test]
async fn temporary_order_cannot_be_paid() {
    let h = Harness::new().await;
    let order = h.hold_order(&[h.a]).await;

    let err = h.booking.pay_order(order.id).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::InvalidStatusTransition { from: OrderStatus::Temporary, to: OrderStatus::Paid }
    ));
}

#[tokio::test]
async fn upgrade_after_hold_expired_is_rejected() {
    let h = Harness::new().await;
    let order = h.hold_order(&[h.a]).await;

    h.clock.advance(Duration::minutes(20));
    let err = h.booking.upgrade_to_pending(order.id, customer()).await.unwrap_err();
    assert!(matches!(err, BookingError::ReservationExpired(_)));
}

#[tokio::test]
async fn promo_code_discounts_total() {
    let h = Harness::new().await;
    let mut request = h.hold(&[h.a]);
    request.promo_code = Some("spring20".into());

    let order = h.booking.create_order(request).await.unwrap();
    assert_eq!(order.subtotal, Decimal::from(5000));
    assert_eq!(order.discount, Decimal::from(1000));
    assert_eq!(order.total, Decimal::from(4000));
    assert_eq!(order.promo_code.as_deref(), Some("spring20"));
}

#[tokio::test]
async fn invalid_promo_code_reserves_nothing() {
    let h = Harness::new().await;
    let mut request = h.hold(&[h.a, h.b]);
    request.promo_code = Some("FREEBIE".into());

    let err = h.booking.create_order(request).await.unwrap_err();
    assert!(matches!(err, BookingError::PromoCodeInvalid { .. }));
    assert!(h.seats().await.iter().all(|s| s.status == SeatStatus::Available));
}

#[tokio::test]
async fn cancel_releases_seats_and_repeating_is_noop() {
    let h = Harness::new().await;
    let order = h.pending_order(&[h.a, h.b]).await;

    let cancelled = h.booking.update_order_status(order.id, OrderStatus::Cancelled).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    let a = h.seat(h.a).await;
    assert_eq!(a.status, SeatStatus::Available);
    assert_eq!(a.order_id, None);
    assert!(a.customer.is_none());

    let again = h.booking.update_order_status(order.id, OrderStatus::Cancelled).await.unwrap();
    assert_eq!(again.status, OrderStatus::Cancelled);

    let err = h.booking.update_order_status(order.id, OrderStatus::Pending).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidStatusTransition { .. }));
}

#[tokio::test]
async fn double_release_is_noop() {
    let h = Harness::new().await;
    h.hold_order(&[h.a]).await;
    let inventory = h.booking.inventory(h.session.id);

    assert_eq!(inventory.release(&[h.a]).await.unwrap(), 1);
    assert_eq!(inventory.release(&[h.a]).await.unwrap(), 0);
    assert_eq!(h.status(h.a).await, SeatStatus::Available);
}

#[tokio::test]
async fn zone_request_reserves_free_slots() {
    let h = Harness::new().await;
    let mut request = h.hold(&[h.a]);
    request.group_capacity_requests = vec![ZoneRequest { zone_id: h.zone.id, quantity: 3 }];

    let order = h.booking.create_order(request).await.unwrap();
    assert_eq!(order.line_items.len(), 4);
    let zone_items = order.line_items.iter().filter(|i| i.zone_id == Some(h.zone.id)).count();
    assert_eq!(zone_items, 3);
    assert_eq!(order.subtotal, Decimal::from(5000 + 3 * 1500));

    // Осталось одно место в зоне
    let mut request = h.hold(&[]);
    request.group_capacity_requests = vec![ZoneRequest { zone_id: h.zone.id, quantity: 2 }];
    let err = h.booking.create_order(request).await.unwrap_err();
    assert!(matches!(err, BookingError::ZoneSoldOut { requested: 2, available: 1, .. }));

    let aggregates = h.store.recompute_aggregates(h.session.id).await.unwrap();
    assert_eq!(aggregates.reserved, 4);
    assert_eq!(aggregates.total, 6);
}

#[tokio::test]
async fn offline_paid_order_sells_immediately() {
    let h = Harness::new().await;
    let mut request = h.hold(&[h.b]);
    request.mode = OrderMode::OfflinePaid;
    request.customer = Some(customer());

    let order = h.booking.create_order(request).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(h.status(h.b).await, SeatStatus::Sold);
}

#[tokio::test]
async fn unknown_ids_surface_not_found() {
    let h = Harness::new().await;

    let err = h.booking.get_order(OrderId::new()).await.unwrap_err();
    assert!(matches!(err, BookingError::OrderNotFound(_)));

    let mut request = h.hold(&[h.a]);
    request.selected_seat_ids.push(uuid::Uuid::new_v4());
    let err = h.booking.create_order(request).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatNotFound(_)));
    assert_eq!(h.status(h.a).await, SeatStatus::Available);
}
