//! Failure isolation for upstream providers: bounded retries and a circuit
//! breaker per provider.

mod circuit;
mod health;
mod retry;

pub use circuit::{
    CircuitBreaker, CircuitConfig, CircuitOpen, CircuitPermit, CircuitState, HealthSnapshot,
};
pub use health::HealthRegistry;
pub use retry::{RetryPolicy, RetryPolicyError};
