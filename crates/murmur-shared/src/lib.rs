//! Shared types for the Murmur timeline client.
//!
//! Everything that crosses a crate boundary lives here: ledger record
//! schemas, content-store wire payloads, identifiers, and the error
//! taxonomy used by the read and write paths.

pub mod constants;
pub mod error;
pub mod records;
pub mod types;

pub use error::{ClientError, ContentError, LedgerError, MutationError, TxError};
pub use records::{ContentBlob, PostPayload, PostRecord, ProfilePayload, ProfileRecord};
pub use types::{Address, ContentId, Fetched, Freshness, PostId, NO_PARENT};
