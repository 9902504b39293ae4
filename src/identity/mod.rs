//! Identity, authorization and the session store.
//! Keep the public surface thin and split implementation across sub-modules.

pub(crate) mod principal;
mod authorizer;
mod events;
mod provider;
mod session;
pub mod guard;

#[cfg(test)]
pub(crate) mod fake;

pub use principal::Identity;
pub use authorizer::{can, can_all, can_any};
pub use events::{SessionEvent, SessionEvents};
pub use guard::{decide, decide_edge, RouteDecision};
pub use provider::{Ack, AuthApi, AuthGrant, ChangePassword, Credentials, HttpAuthApi, RegisterOutcome, Registration, ResetPassword};
pub use session::{SessionState, SessionStore};
