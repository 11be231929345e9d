pub mod cache;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod inventory;
pub mod models;
pub mod notify;
pub mod redis_client;
pub mod services;
pub mod store;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::cache::SeatMapCache;
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{parse_timezone, PromoCatalog, PromoValidator, VenueDirectory};
use crate::config::{Config, StoreKind};
use crate::database::Database;
use crate::notify::{EventDispatcher, RedisEventSink};
use crate::redis_client::RedisClient;
use crate::services::{BookingService, ExpirationSweeper, LockScheduler};
use crate::store::{MemoryStore, OrderStore, PgStore, SeatStore};

// Shared state для всего приложения
pub struct AppState {
    pub config: Config,
    pub booking: BookingService,
    pub sweeper: Arc<ExpirationSweeper>,
    pub locker: Arc<LockScheduler>,
    pub cache: SeatMapCache,
    pub db: Option<Database>,
    pub redis: Option<RedisClient>,
}

// Реализации хранилища и справочников для выбранного бэкенда
struct Backend {
    seats: Arc<dyn SeatStore>,
    orders: Arc<dyn OrderStore>,
    promos: Arc<dyn PromoValidator>,
    venues: Arc<dyn VenueDirectory>,
    db: Option<Database>,
}

impl Backend {
    async fn connect(config: &Config) -> anyhow::Result<Self> {
        match config.app.store {
            StoreKind::Postgres => {
                let db = Database::new(&config.database.url, config.database.pool_size)
                    .await
                    .context("failed to connect to database")?;
                info!("Database connected");
                db.run_migrations().await.context("failed to run migrations")?;

                let store = Arc::new(PgStore::new(db.clone()));
                Ok(Self {
                    seats: store.clone(),
                    orders: store.clone(),
                    promos: store.clone(),
                    venues: store,
                    db: Some(db),
                })
            }
            StoreKind::Memory => {
                info!("Using in-memory store, data is lost on restart");
                let store = Arc::new(MemoryStore::new());
                Ok(Self {
                    seats: store.clone(),
                    orders: store.clone(),
                    promos: Arc::new(PromoCatalog::default()),
                    venues: store,
                    db: None,
                })
            }
        }
    }
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let default_tz = parse_timezone(&config.booking.default_timezone)
            .with_context(|| format!("unknown DEFAULT_TIMEZONE '{}'", config.booking.default_timezone))?;

        let redis = match &config.redis.url {
            Some(url) => {
                let redis = RedisClient::new(url).await.context("failed to connect to Redis")?;
                info!("Redis connected");
                Some(redis)
            }
            None => None,
        };
        let events = match &redis {
            Some(redis) => EventDispatcher::new(Arc::new(RedisEventSink::new(
                redis.clone(),
                config.redis.events_channel.clone(),
            ))),
            None => EventDispatcher::noop(),
        };
        let cache = SeatMapCache::new(redis.clone(), config.redis.seat_map_ttl_seconds);

        let backend = Backend::connect(&config).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let booking = BookingService::new(
            backend.seats.clone(),
            backend.orders.clone(),
            clock.clone(),
            config.booking.clone(),
        )
        .with_promos(backend.promos.clone())
        .with_events(events.clone());

        let sweeper = Arc::new(ExpirationSweeper::new(
            backend.seats.clone(),
            backend.orders.clone(),
            clock.clone(),
            events.clone(),
            config.scheduler.sweep_concurrency,
        ));

        let locker = Arc::new(LockScheduler::new(
            backend.seats.clone(),
            backend.venues.clone(),
            clock,
            events,
            config.scheduler.lock_window(),
            default_tz,
        ));

        Ok(Arc::new(Self {
            config,
            booking,
            sweeper,
            locker,
            cache,
            db: backend.db,
            redis,
        }))
    }
}
