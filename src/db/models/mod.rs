//! Database models split into domain-specific modules.

pub mod resource;
pub mod session;
pub mod user;

pub use resource::*;
pub use session::*;
pub use user::*;
