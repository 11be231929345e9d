use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// Все идентификаторы - UUID в обёртке, чтобы не перепутать место с заказом
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Сеанс (одна SeatInventory на сеанс)
    SessionId
);
id_type!(SeatId);
id_type!(
    /// Зона с групповой вместимостью; владеет слотами-местами
    ZoneId
);
id_type!(OrderId);
id_type!(HallId);

/// Переводит срез идентификаторов в `uuid[]` для биндинга в sqlx.
pub fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

macro_rules! into_uuid {
    ($($name:ident),*) => {
        $(impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        })*
    };
}

into_uuid!(SessionId, SeatId, ZoneId, OrderId, HallId);
