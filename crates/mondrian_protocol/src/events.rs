//! SSE event model for the per-job streaming bus.
//!
//! Events are framed as standard `event:` + `data:` pairs; the data payload
//! is the JSON serialization of [`StreamEvent`], which always carries `type`,
//! `job_id`, and `timestamp`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobSnapshot;
use crate::types::JobId;

/// Events emitted on a job's streaming bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Sent once on subscribe
    Connected {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// Periodic liveness signal
    Heartbeat {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// Any mutation of status/phase/progress/thinking
    StatusUpdate {
        job_id: JobId,
        timestamp: DateTime<Utc>,
        job_data: JobSnapshot,
    },
    /// Final rendered output, sent before `done`
    AnalysisComplete {
        job_id: JobId,
        timestamp: DateTime<Utc>,
        output: String,
    },
    /// Terminal event; the stream closes after this
    Done {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    /// The SSE `event:` field value.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Heartbeat { .. } => "heartbeat",
            StreamEvent::StatusUpdate { .. } => "status_update",
            StreamEvent::AnalysisComplete { .. } => "analysis_complete",
            StreamEvent::Done { .. } => "done",
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            StreamEvent::Connected { job_id, .. }
            | StreamEvent::Heartbeat { job_id, .. }
            | StreamEvent::StatusUpdate { job_id, .. }
            | StreamEvent::AnalysisComplete { job_id, .. }
            | StreamEvent::Done { job_id, .. } => *job_id,
        }
    }

    pub fn connected(job_id: JobId) -> Self {
        StreamEvent::Connected {
            job_id,
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat(job_id: JobId) -> Self {
        StreamEvent::Heartbeat {
            job_id,
            timestamp: Utc::now(),
        }
    }

    pub fn status_update(job_data: JobSnapshot) -> Self {
        StreamEvent::StatusUpdate {
            job_id: job_data.job_id,
            timestamp: Utc::now(),
            job_data,
        }
    }

    pub fn analysis_complete(job_id: JobId, output: String) -> Self {
        StreamEvent::AnalysisComplete {
            job_id,
            timestamp: Utc::now(),
            output,
        }
    }

    pub fn done(job_id: JobId) -> Self {
        StreamEvent::Done {
            job_id,
            timestamp: Utc::now(),
        }
    }
}

/// A wire-ready SSE frame: `event:` name plus serialized `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: String,
}

impl SseFrame {
    /// Serialize an event to its wire frame.
    pub fn from_event(event: &StreamEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: event.name(),
            data: serde_json::to_string(event)?,
        })
    }

    /// Render as raw SSE text (`event:` + `data:` + blank line).
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_contract() {
        let id = JobId::new();
        assert_eq!(StreamEvent::connected(id).name(), "connected");
        assert_eq!(StreamEvent::heartbeat(id).name(), "heartbeat");
        assert_eq!(StreamEvent::done(id).name(), "done");
        assert_eq!(
            StreamEvent::analysis_complete(id, String::new()).name(),
            "analysis_complete"
        );
    }

    #[test]
    fn payload_carries_type_job_id_timestamp() {
        let id = JobId::new();
        let frame = SseFrame::from_event(&StreamEvent::heartbeat(id)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["job_id"], id.to_string());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn wire_framing_is_blank_line_terminated() {
        let id = JobId::new();
        let frame = SseFrame::from_event(&StreamEvent::done(id)).unwrap();
        let wire = frame.to_wire();
        assert!(wire.starts_with("event: done\ndata: "));
        assert!(wire.ends_with("\n\n"));
    }
}
