//! Shared identity and access types for Rally.

mod access;
mod role;
mod session;
mod user;

pub use access::{AccessPhase, AccessState};
pub use role::Role;
pub use session::{Session, SessionEvent, now_secs};
pub use user::{BackendUserRecord, CheckUserResponse};
