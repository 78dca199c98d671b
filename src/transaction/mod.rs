//! Transaction coordinator (§4.7): a per-request `Session` carrying the
//! stash (read-your-writes state) and the pending cache-store mutations
//! accumulated during the request, flushed to the cache store only once the
//! backing database transaction (if any) has committed.

mod session;
mod stash;

pub use session::Session;
pub use stash::{PendingAction, Stash};
