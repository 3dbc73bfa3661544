//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod bypass;
mod distributed;
mod engine;
mod identity;
mod local;

pub use backend::RateLimiterBackend;
pub use bucket::{RateLimitDecision, TokenBucket};
pub use bypass::{BypassEntry, BypassStore};
pub use distributed::{RedisLimiterOptions, RedisRateLimiter};
pub use engine::{AdmissionController, RateLimitedBody};
pub use identity::ClientIdentity;
pub use local::InMemoryRateLimiter;
