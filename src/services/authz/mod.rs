//! Relationship-based authorization: queries, the backend capability, and the
//! fail-closed decision service used by the authorization middleware and the
//! collection handlers.
pub mod checker;
mod query;
mod service;

pub use checker::{OpenFgaChecker, OpenFgaSettings, RelationChecker};
pub use query::{AuthorizationQuery, GLOBAL_OBJECT, Relation};
pub use service::{AuthorizationService, AuthzError};
