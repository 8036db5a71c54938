//! Predictive free-memory trend analysis for proactive reclaim, compaction,
//! and watermark tuning.
//!
//! An external collector samples per-allocation-order free-page counts for
//! each NUMA node once per monitoring cycle and feeds them here; the engine
//! fits a trend line per order over a fixed lookback window and recommends
//! actions before exhaustion or fragmentation actually occurs. It performs
//! no collection and no remediation itself.

// config module
pub mod config;
pub use config::{ConfigError, EngineConfig};

// error module
pub mod error;
pub use error::{EngineError, EngineResult};

// trend fitting
pub mod fitter;
pub use fitter::{FitOutcome, FitResult, TrendFitter, SLOPE_SCALE};

// prediction engine
pub mod engine;
pub use engine::{Actions, CycleContext, FragSample, PredictionEngine};
