pub mod ids;
pub mod order;
pub mod seat;
pub mod session;

pub use ids::{HallId, OrderId, SeatId, SessionId, ZoneId};
pub use order::{Customer, ExpiryGuard, LineItem, Order, OrderMode, OrderPatch, OrderStatus, Totals};
pub use seat::{CustomerSnapshot, Geometry, Hold, SeatStatus, SeatTicket, SeatTransition, Zone};
pub use session::{InventoryAggregates, InventorySnapshot, Session};
