//! Request handlers.

pub mod admin;
pub mod credits;
pub mod generation;
pub mod health;
pub mod library;
pub mod user;

pub use admin::*;
pub use credits::*;
pub use generation::*;
pub use health::*;
pub use library::*;
pub use user::*;
