//! # Dead Letter Queue
//!
//! Parking lot for workflows whose failure exhausted every recovery avenue.
//! Entries stay here for inspection and later batch retry instead of being
//! retried forever or dropped.
//!
//! The queue is bounded; once full, the oldest entry is evicted to make room.

use crate::resilience::ErrorRecord;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{info, warn};

pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub workflow_id: String,
    pub error_record: ErrorRecord,
    pub added_at: DateTime<Utc>,
    /// Cleared once the workflow has been handed back for retry
    pub retry_eligible: bool,
    pub retried_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_size.min(1024))),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Park a failure; returns the entry evicted to make room, if any
    pub fn add(
        &self,
        workflow_id: impl Into<String>,
        error_record: ErrorRecord,
    ) -> Option<DeadLetterEntry> {
        let entry = DeadLetterEntry {
            workflow_id: workflow_id.into(),
            error_record,
            added_at: Utc::now(),
            retry_eligible: true,
            retried_at: None,
        };

        info!(
            workflow_id = %entry.workflow_id,
            error_id = %entry.error_record.error_id,
            error_type = %entry.error_record.error_type,
            "☠️ Workflow error moved to dead letter queue"
        );

        let mut entries = self.entries.lock();
        let evicted = if entries.len() >= self.max_size {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(entry);

        if let Some(evicted) = &evicted {
            warn!(
                evicted_workflow_id = %evicted.workflow_id,
                max_size = self.max_size,
                "Dead letter queue full, evicted oldest entry"
            );
        }
        evicted
    }

    /// Entries not yet handed back for retry, oldest first
    pub fn get_retry_eligible(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.retry_eligible)
            .cloned()
            .collect()
    }

    /// Mark every entry of a workflow as retried. Repeated calls change
    /// nothing further. Returns whether the workflow has any entry.
    pub fn mark_retried(&self, workflow_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let mut found = false;
        let now = Utc::now();
        for entry in entries.iter_mut().filter(|e| e.workflow_id == workflow_id) {
            found = true;
            if entry.retry_eligible {
                entry.retry_eligible = false;
                entry.retried_at = Some(now);
            }
        }
        found
    }

    pub fn entries_for(&self, workflow_id: &str) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop everything; returns how many entries were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}
