//! HTTP handlers that are not endpoints.

pub mod health;
pub mod not_found;

pub use health::health_check;
pub use not_found::not_found;
