pub mod error;
pub mod format;
pub mod logger;
pub mod metrics;

pub use error::ApiError;
pub use metrics::Metrics;
