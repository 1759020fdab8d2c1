//! Configuration types and re-exports

pub use super::{
    AppConfig, BackendConfig, ChartConfig, LoggingConfig, SelectionConfig, StreamConfig,
};
