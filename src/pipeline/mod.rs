//! # Appointment Analytics Pipeline
//!
//! Continuously consumes appointment lifecycle events, groups the
//! `appointment_created` ones into fixed one-minute processing-time windows
//! and publishes one summary per window:
//!
//! ```text
//! input topic → decoder → filter → WindowEngine → SealScheduler → publisher → output topic
//! ```
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (AppointmentEvent, AggregateResult)
//! - `decoder` - Tolerant JSON decoding and the event-kind filter
//! - `accumulator` - Mergeable per-window counting state
//! - `windows` - Tumbling window assignment and per-partition window sets
//! - `engine` - Owner of live window state and the processing-time clock
//! - `scheduler` - Seal/emit lifecycle and the shutdown policy
//! - `sink` - Result serialization and publication with retry
//! - `ingestion` - The unified consume/tick/shutdown loop
//! - `backoff` - Bounded exponential backoff with jitter
//! - `stats` - Shared pipeline counters
//! - `config` - Environment-driven configuration

pub mod accumulator;
pub mod backoff;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod ingestion;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use accumulator::Accumulator;
pub use config::{ConfigError, PipelineConfig};
pub use decoder::{decode, DecodeError};
pub use engine::{EngineSettings, WindowEngine};
pub use ingestion::{start_pipeline_ingestion, IngestionSettings};
pub use scheduler::{ResultEmitter, SealScheduler, ShutdownMode};
pub use sink::{start_result_publisher, EchoingSink, Emission, ResultSink, TopicSink};
pub use stats::PipelineStats;
pub use types::{AggregateResult, AppointmentEvent};
pub use windows::{Window, WindowAssigner};
