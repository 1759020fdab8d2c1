//! StratView Library
//!
//! Instrument view synchronization for a strategy monitoring dashboard:
//! snapshot loading, pane/series allocation, indicator binding, risk and
//! trade annotations, and live reconciliation of the push stream.

pub mod backend;
pub mod chart;
pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod render;
pub mod session;
pub mod snapshot;
pub mod stream;
pub mod types;
pub mod watchlist;
