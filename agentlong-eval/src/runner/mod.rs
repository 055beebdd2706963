//! Prediction run orchestration

pub mod executor;
pub mod rate_limiter;

pub use executor::{
    ConsoleProgress, NoOpProgress, PredictionRunner, ProgressCallback, RunSummary, RunnerConfig,
};
pub use rate_limiter::RateLimiter;
