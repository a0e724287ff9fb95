//! JSONL trace of generation activity: one typed record per line, stamped
//! with the session that produced it.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use crate::results::now_utc_iso;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    ValidationFailed {
        provider: String,
        errors: Vec<String>,
    },
    RateLimited {
        provider: String,
        retry_after_secs: f64,
    },
    /// `attempt` counts from 1.
    AttemptStarted { provider: String, attempt: u32 },
    AttemptFailed {
        provider: String,
        attempt: u32,
        error: String,
        error_type: String,
        retry_in_secs: f64,
    },
    GenerationFailed {
        provider: String,
        error: String,
        error_type: String,
    },
    GenerationSucceeded { provider: String, images: usize },
}

impl GenerationEvent {
    pub fn provider(&self) -> &str {
        match self {
            Self::ValidationFailed { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::AttemptStarted { provider, .. }
            | Self::AttemptFailed { provider, .. }
            | Self::GenerationFailed { provider, .. }
            | Self::GenerationSucceeded { provider, .. } => provider,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("event log lock poisoned")]
    Poisoned,
}

#[derive(Serialize)]
struct Record<'a> {
    #[serde(flatten)]
    event: &'a GenerationEvent,
    session_id: &'a str,
    ts: String,
}

/// Append-only event file, opened once. Clones share the handle.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    session_id: Arc<str>,
    file: Arc<Mutex<File>>,
}

impl EventLog {
    /// Creates missing parent directories and opens `path` for appending.
    pub fn open(
        path: impl Into<PathBuf>,
        session_id: impl Into<String>,
    ) -> Result<Self, EventLogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            session_id: Arc::from(session_id.into()),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Each record goes out in a single write so concurrent clones never interleave lines.
    pub fn record(&self, event: &GenerationEvent) -> Result<(), EventLogError> {
        let mut line = serde_json::to_vec(&Record {
            event,
            session_id: &self.session_id,
            ts: now_utc_iso(),
        })?;
        line.push(b'\n');
        let mut file = self.file.lock().map_err(|_| EventLogError::Poisoned)?;
        file.write_all(&line)?;
        Ok(())
    }
}
