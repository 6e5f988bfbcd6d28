//! Streamed event records
//!
//! The only user-visible contract of the engine. `metadata` appears only on
//! the completed event and `error` only on the error event.

use crate::session::{Session, SessionMetrics};
use crate::types::ChunkInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Reasoning,
    Searching,
    Extracting,
    Completed,
    Error,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Reasoning => "reasoning",
            EventStatus::Searching => "searching",
            EventStatus::Extracting => "extracting",
            EventStatus::Completed => "completed",
            EventStatus::Error => "error",
        }
    }
}

/// Summary attached to the completed event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub reasoning_steps: usize,
    pub total_queries: usize,
    pub metrics: SessionMetrics,
}

impl SessionSummary {
    pub fn of(session: &Session) -> Self {
        Self {
            reasoning_steps: session.reasoning_history.len(),
            total_queries: session.metrics.total_queries,
            metrics: session.metrics.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchEvent {
    /// Running narrative including the think block
    pub answer: String,

    /// Snapshot of the session accumulator
    pub reference: ChunkInfo,

    pub audio_binary: Option<String>,

    pub status: EventStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchEvent {
    pub fn progress(status: EventStatus, answer: String, reference: &ChunkInfo) -> Self {
        Self {
            answer,
            reference: reference.clone(),
            audio_binary: None,
            status,
            metadata: None,
            error: None,
        }
    }

    pub fn completed(answer: String, session: &Session) -> Self {
        Self {
            answer,
            reference: session.chunk_info.clone(),
            audio_binary: None,
            status: EventStatus::Completed,
            metadata: Some(SessionSummary::of(session)),
            error: None,
        }
    }

    pub fn error(answer: String, reference: &ChunkInfo, error: impl Into<String>) -> Self {
        Self {
            answer,
            reference: reference.clone(),
            audio_binary: None,
            status: EventStatus::Error,
            metadata: None,
            error: Some(error.into()),
        }
    }
}
