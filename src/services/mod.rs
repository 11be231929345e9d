pub mod booking;
pub mod expiration;
pub mod lock_scheduler;

pub use booking::{BookingService, CreateOrderRequest};
pub use expiration::{ExpirationSweeper, SweepReport};
pub use lock_scheduler::{LockOutcome, LockReport, LockScheduler};
