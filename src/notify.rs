//! Уведомления после коммита. Сбой доставки пишется в лог и не откатывает
//! уже записанное состояние.

use async_trait::async_trait;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::drop_seat_map;
use crate::models::{OrderId, SeatId, SessionId};
use crate::redis_client::RedisClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    OrderPaid {
        order_id: OrderId,
        session_id: SessionId,
        order_number: i64,
        total: Decimal,
        seat_ids: Vec<SeatId>,
    },
    SeatsChanged {
        session_id: SessionId,
    },
}

impl InventoryEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            InventoryEvent::OrderPaid { session_id, .. } | InventoryEvent::SeatsChanged { session_id } => *session_id,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &InventoryEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn publish(&self, _event: &InventoryEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// PUBLISH в канал Redis; на изменение мест ещё и сбрасывает кеш схемы.
#[derive(Clone)]
pub struct RedisEventSink {
    redis: RedisClient,
    channel: String,
}

impl RedisEventSink {
    pub fn new(redis: RedisClient, channel: impl Into<String>) -> Self {
        Self { redis, channel: channel.into() }
    }
}

#[async_trait]
impl EventSink for RedisEventSink {
    async fn publish(&self, event: &InventoryEvent) -> anyhow::Result<()> {
        let mut conn = self.redis.conn.clone();
        if let InventoryEvent::SeatsChanged { session_id } = event {
            drop_seat_map(&mut conn, *session_id).await?;
        }
        let payload = serde_json::to_string(event)?;
        let _: () = conn.publish(&self.channel, payload).await?;
        Ok(())
    }
}

/// Складывает события в канал; нужен тестам.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<InventoryEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InventoryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: &InventoryEvent) -> anyhow::Result<()> {
        self.tx.send(event.clone())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct EventDispatcher {
    sink: Arc<dyn EventSink>,
}

impl EventDispatcher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Отправляет событие в фоне, вызывающий не ждёт доставки.
    pub fn dispatch(&self, event: InventoryEvent) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            match sink.publish(&event).await {
                Ok(()) => debug!(session_id = %event.session_id(), "event published"),
                Err(e) => warn!(session_id = %event.session_id(), error = %e, "failed to publish event"),
            }
        });
    }
}
