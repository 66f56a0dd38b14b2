pub mod breaker;
pub mod policy;
pub mod retry;

pub use breaker::{Admission, BreakerConfig, BreakerRegistry, BreakerStatus, CircuitBreaker, CircuitState};
pub use policy::RetryPolicy;
pub use retry::RetryExecutor;
