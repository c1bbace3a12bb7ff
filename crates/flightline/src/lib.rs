//! `flightline` - Flight segmentation and analytics over vehicle telemetry
//!
//! This library ingests time-ordered telemetry batches from remote vehicles,
//! detects flight sessions from raw throttle activity, and computes derived
//! statistics over each session once it closes.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod segmenter;
pub mod session;
pub mod storage;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use metrics::MetricsSet;
pub use pipeline::{IngestPipeline, IngestReceipt};
pub use segmenter::FlightSegmenter;
pub use session::{FlightPhase, Session, SessionState};
pub use storage::{Storage, StorageStats};
pub use telemetry::TelemetrySample;
