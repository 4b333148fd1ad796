//! Transport middleware: request logging, tick rate limiting, bearer auth.

pub mod auth;
pub mod logging;
pub mod rate_limit;

pub use auth::require_bearer;
pub use logging::request_logging;
pub use rate_limit::{RateLimitError, RateLimiter};
