//! Kernel module - infrastructure shared across domains.

pub mod rate_limit;
pub mod resilient_http;

pub use rate_limit::{InMemoryWindowStore, RateLimitDecision, RateLimiter, WindowStore};
pub use resilient_http::{FetchError, FetchedResponse, RequestOptions, ResilientClient};
