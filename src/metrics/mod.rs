//! Prometheus metrics for jobs, attempts, races and knowledge stores.
//!
//! # Example
//!
//! ```ignore
//! use circuit_weaver::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_attempt("repair", "failure");
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics, write_metrics_file};

pub use self::prometheus::{metrics, Metrics};
