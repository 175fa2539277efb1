//! Topic log transport
//!
//! The pipeline only needs two capabilities from its transport:
//! - produce a message to a topic
//! - consume a topic from a resumable, committed position
//!
//! `SqliteEventLog` provides durable, ordered-per-topic storage in a single
//! SQLite file; `InMemoryEventLog` offers the same traits for tests.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryEventLog;
pub use sqlite::SqliteEventLog;

use async_trait::async_trait;
use std::str::FromStr;

#[derive(Debug)]
pub enum TransportError {
    Database(String),
    /// The log (or one of its handles) has been shut down
    Closed,
    /// Unknown start position name
    InvalidPosition(String),
}

impl From<rusqlite::Error> for TransportError {
    fn from(err: rusqlite::Error) -> Self {
        TransportError::Database(err.to_string())
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Database(e) => write!(f, "Database error: {}", e),
            TransportError::Closed => write!(f, "Transport closed"),
            TransportError::InvalidPosition(e) => write!(f, "Invalid start position: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// Where a consumer group starts when it has no committed position yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Earliest,
    Latest,
}

impl StartPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartPosition::Earliest => "earliest",
            StartPosition::Latest => "latest",
        }
    }
}

impl FromStr for StartPosition {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(StartPosition::Earliest),
            "latest" => Ok(StartPosition::Latest),
            _ => Err(TransportError::InvalidPosition(format!(
                "'{}' (expected 'latest' or 'earliest')",
                s
            ))),
        }
    }
}

/// One message read back from a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    /// Position within the topic, dense and increasing from 0
    pub seq: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Append a message to `topic`; returns its sequence number
    async fn produce(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<u64, TransportError>;
}

#[async_trait]
pub trait LogConsumer: Send {
    /// Read up to `max` records at or after the current position
    ///
    /// Returns an empty batch when the consumer has caught up.
    async fn poll(&mut self, max: usize) -> Result<Vec<LogRecord>, TransportError>;

    /// Persist the position just past the last polled record
    async fn commit(&mut self) -> Result<(), TransportError>;

    /// Next sequence number this consumer will read
    fn position(&self) -> u64;
}
