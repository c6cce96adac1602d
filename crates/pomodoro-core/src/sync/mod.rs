//! Remote session mirroring.
//!
//! Session boundaries (start, stop, completion) are pushed to a hosted
//! table as they happen. Local state is always authoritative: nothing is
//! read back and failed pushes are dropped.

pub mod device_id;
pub mod session_sync;

pub use device_id::{device_id, device_id_at};
pub use session_sync::{Connectivity, OnlineFlag, SessionKind, SessionRow, SessionSync};
