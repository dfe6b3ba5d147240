//! Accounting for the fills coming out of the matching service: positions with their cost
//! basis, the account that owns them and the log of closed round trips.
pub mod account;
pub mod position;
pub mod record;

pub use account::{Account, AccountListener, AccountSnapshot, PositionSnapshot, ValueType};
pub use position::{ClosedPosition, Position, Side};
pub use record::TransactionLog;
