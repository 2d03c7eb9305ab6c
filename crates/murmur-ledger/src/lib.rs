//! Ledger plane: the point-read/write ledger interface and the read
//! gateway that batches, dedupes, and caches lookups against it.

pub mod flight;
pub mod gateway;
pub mod ledger;
pub mod testing;

pub use gateway::{GatewayConfig, ReadGateway};
pub use ledger::{Ledger, NewProfile, ProfileUpdate};
pub use testing::FakeLedger;
