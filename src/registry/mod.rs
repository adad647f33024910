pub mod circuit_breaker;
pub mod manager;
pub mod rate_limiter;

#[cfg(test)]
pub mod tests;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState, CircuitTransition,
};
pub use manager::{CallOutcome, ProviderRegistry, ProviderSnapshot, ProviderStatus};
pub use rate_limiter::{RateLimitRejection, RateLimiter};
