#![allow(dead_code)]

use chrono::{Duration, NaiveDate, Utc};
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;

use seat_booking::clock::{Clock, ManualClock};
use seat_booking::collaborators::{PromoCatalog, PromoRule};
use seat_booking::config::BookingConfig;
use seat_booking::models::{
    Customer, HallId, Order, SeatId, SeatStatus, SeatTicket, Session, SessionId, Zone,
};
use seat_booking::notify::{ChannelSink, EventDispatcher, InventoryEvent};
use seat_booking::services::{BookingService, CreateOrderRequest, ExpirationSweeper, LockScheduler};
use seat_booking::store::{MemoryStore, SeatStore};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub booking: BookingService,
    pub sweeper: ExpirationSweeper,
    pub locker: LockScheduler,
    pub events: mpsc::UnboundedReceiver<InventoryEvent>,
    pub session: Session,
    /// Места A и B
    pub a: SeatId,
    pub b: SeatId,
    pub zone: Zone,
}

pub fn customer() -> Customer {
    Customer {
        name: Name().fake(),
        phone: "+77011234567".to_string(),
        email: SafeEmail().fake(),
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_start(NaiveDate::from_ymd_opt(2030, 6, 15).and_then(|d| d.and_hms_opt(19, 0, 0)).unwrap())
            .await
    }

    pub async fn with_start(start_time: chrono::NaiveDateTime) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (sink, events) = ChannelSink::new();
        let dispatcher = EventDispatcher::new(Arc::new(sink));

        let session = Session {
            id: SessionId::new(),
            hall_id: HallId::new(),
            price_scheme_id: Some("standard".into()),
            title: "Symphony night".into(),
            start_time,
            active: true,
            archived: false,
            locked_at: None,
        };
        let a = SeatTicket::new(session.id, "A", Decimal::from(5000), "KZT").with_position("Parterre", "1", "1");
        let b = SeatTicket::new(session.id, "B", Decimal::from(3000), "KZT").with_position("Parterre", "1", "2");
        let (zone, slots) = Zone::with_slots(session.id, "Standing", 4, Decimal::from(1500), "KZT");
        let (a_id, b_id) = (a.id, b.id);

        let mut seats = vec![a, b];
        seats.extend(slots);
        store.create_session(&session, &seats, &[zone.clone()]).await.unwrap();

        let promos = PromoCatalog::new([PromoRule::percent("SPRING20", Decimal::from(20))]);
        let booking = BookingService::new(store.clone(), store.clone(), clock.clone(), BookingConfig::default())
            .with_promos(Arc::new(promos))
            .with_events(dispatcher.clone());
        let sweeper = ExpirationSweeper::new(store.clone(), store.clone(), clock.clone(), dispatcher.clone(), 4);
        let locker = LockScheduler::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            dispatcher,
            Duration::minutes(10),
            chrono_tz::UTC,
        );

        Self {
            store,
            clock,
            booking,
            sweeper,
            locker,
            events,
            session,
            a: a_id,
            b: b_id,
            zone,
        }
    }

    pub fn hold(&self, seats: &[SeatId]) -> CreateOrderRequest {
        let ids: Vec<_> = seats.iter().map(|id| id.as_uuid()).collect();
        CreateOrderRequest::hold(self.session.id, &ids)
    }

    pub async fn hold_order(&self, seats: &[SeatId]) -> Order {
        self.booking.create_order(self.hold(seats)).await.unwrap()
    }

    /// Заказ в pending: бронь + данные покупателя.
    pub async fn pending_order(&self, seats: &[SeatId]) -> Order {
        let order = self.hold_order(seats).await;
        self.booking.upgrade_to_pending(order.id, customer()).await.unwrap()
    }

    pub async fn seat(&self, id: SeatId) -> SeatTicket {
        self.store
            .load_seats(self.session.id)
            .await
            .unwrap()
            .into_iter()
            .find(|seat| seat.id == id)
            .unwrap()
    }

    pub async fn status(&self, id: SeatId) -> SeatStatus {
        self.seat(id).await.status
    }

    pub async fn seats(&self) -> Vec<SeatTicket> {
        self.store.load_seats(self.session.id).await.unwrap()
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }
}
