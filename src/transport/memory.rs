//! In-process topic log with the same semantics as the SQLite log
//!
//! Nothing survives the process; used by tests and local experiments.

use super::{LogConsumer, LogProducer, LogRecord, StartPosition, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct LogState {
    topics: HashMap<String, Vec<LogRecord>>,
    positions: HashMap<(String, String), u64>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    state: Arc<Mutex<LogState>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LogState) -> T) -> Result<T, TransportError> {
        let mut guard = self.state.lock().map_err(|_| TransportError::Closed)?;
        Ok(f(&mut *guard))
    }

    /// Snapshot of every record currently on `topic`
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        self.with_state(|state| state.topics.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn consumer(
        &self,
        group_id: &str,
        topic: &str,
        start: StartPosition,
    ) -> Result<InMemoryLogConsumer, TransportError> {
        let position = self.with_state(|state| {
            let key = (group_id.to_string(), topic.to_string());
            let end = state.topics.get(topic).map_or(0, |records| records.len() as u64);
            *state.positions.entry(key).or_insert(match start {
                StartPosition::Earliest => 0,
                StartPosition::Latest => end,
            })
        })?;

        Ok(InMemoryLogConsumer {
            log: self.clone(),
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            position,
        })
    }
}

#[async_trait]
impl LogProducer for InMemoryEventLog {
    async fn produce(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<u64, TransportError> {
        self.with_state(|state| {
            let records = state.topics.entry(topic.to_string()).or_default();
            let seq = records.len() as u64;
            records.push(LogRecord {
                topic: topic.to_string(),
                seq,
                key: key.map(str::to_string),
                payload: payload.to_vec(),
            });
            seq
        })
    }
}

pub struct InMemoryLogConsumer {
    log: InMemoryEventLog,
    group_id: String,
    topic: String,
    position: u64,
}

#[async_trait]
impl LogConsumer for InMemoryLogConsumer {
    async fn poll(&mut self, max: usize) -> Result<Vec<LogRecord>, TransportError> {
        let from = self.position as usize;
        let records = self.log.with_state(|state| {
            state
                .topics
                .get(&self.topic)
                .map(|records| records.iter().skip(from).take(max).cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        })?;

        if let Some(last) = records.last() {
            self.position = last.seq + 1;
        }
        Ok(records)
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        let key = (self.group_id.clone(), self.topic.clone());
        let position = self.position;
        self.log.with_state(|state| {
            state.positions.insert(key, position);
        })
    }

    fn position(&self) -> u64 {
        self.position
    }
}
