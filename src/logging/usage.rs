//! Usage and audit logging
//!
//! Logs session and action events in JSONL format. Key material and action
//! payloads are never logged; only codes, ids and timings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Usage event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// WebSocket session opened
    ConnectionOpened,
    /// WebSocket session closed
    ConnectionClosed,
    /// Action answered with data
    ActionCompleted,
    /// Action answered with an error
    ActionFailed,
    /// Provider login attempt
    ProviderLogin,
}

/// Usage event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event type
    pub event_type: EventType,
    /// Server instance that handled the session
    pub server_id: String,
    /// Session identifier
    pub session_id: Option<String>,
    /// Client origin
    pub origin: Option<String>,
    /// Action code (wire name)
    pub action: Option<String>,
    /// Target provider
    pub provider_id: Option<String>,
    /// Wire error code for failed actions
    pub error_code: Option<String>,
    /// Duration in milliseconds (actions and closed sessions)
    pub duration_ms: Option<u64>,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl UsageEvent {
    /// Create a new usage event
    pub fn new(event_type: EventType, server_id: String) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            server_id,
            session_id: None,
            origin: None,
            action: None,
            provider_id: None,
            error_code: None,
            duration_ms: None,
            metadata: None,
        }
    }

    pub fn with_session(mut self, session_id: String, origin: String) -> Self {
        self.session_id = Some(session_id);
        self.origin = Some(origin);
        self
    }

    pub fn with_action(mut self, action: String) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_provider(mut self, provider_id: Option<String>) -> Self {
        self.provider_id = provider_id;
        self
    }

    pub fn with_error(mut self, error_code: String) -> Self {
        self.error_code = Some(error_code);
        self
    }

    /// Set the duration
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Usage logger that writes events to a JSONL file. Without a file it drops
/// every event.
#[derive(Clone)]
pub struct UsageLogger {
    inner: Arc<Mutex<UsageLoggerInner>>,
    server_id: String,
}

struct UsageLoggerInner {
    writer: Option<BufWriter<File>>,
}

impl UsageLogger {
    /// Create a new (disabled) usage logger
    pub fn new(server_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(UsageLoggerInner { writer: None })),
            server_id,
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));

        info!("Usage logging initialized to {}", path.display());
        Ok(())
    }

    /// Log a usage event
    pub async fn log(&self, event: UsageEvent) {
        let mut inner = self.inner.lock().await;
        let Some(ref mut writer) = inner.writer else {
            return;
        };

        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize usage event: {}", e);
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{}", jsonl) {
            error!("Failed to write usage event: {}", e);
        }
        if let Err(e) = writer.flush() {
            error!("Failed to flush usage log: {}", e);
        }
    }

    pub async fn log_connection_opened(&self, session_id: &str, origin: &str) {
        let event = UsageEvent::new(EventType::ConnectionOpened, self.server_id.clone())
            .with_session(session_id.to_string(), origin.to_string());
        self.log(event).await;
    }

    pub async fn log_connection_closed(&self, session_id: &str, origin: &str, duration_ms: u64) {
        let event = UsageEvent::new(EventType::ConnectionClosed, self.server_id.clone())
            .with_session(session_id.to_string(), origin.to_string())
            .with_duration(duration_ms);
        self.log(event).await;
    }

    /// Log the outcome of one action. `error_code` is `None` on success.
    pub async fn log_action(
        &self,
        session_id: &str,
        origin: &str,
        action: &str,
        provider_id: Option<&str>,
        error_code: Option<&str>,
        duration_ms: u64,
    ) {
        let event_type = if error_code.is_some() {
            EventType::ActionFailed
        } else {
            EventType::ActionCompleted
        };
        let mut event = UsageEvent::new(event_type, self.server_id.clone())
            .with_session(session_id.to_string(), origin.to_string())
            .with_action(action.to_string())
            .with_provider(provider_id.map(str::to_string))
            .with_duration(duration_ms);
        if let Some(code) = error_code {
            event = event.with_error(code.to_string());
        }
        self.log(event).await;
    }

    pub async fn log_provider_login(
        &self,
        session_id: &str,
        origin: &str,
        provider_id: &str,
        success: bool,
    ) {
        let mut event = UsageEvent::new(EventType::ProviderLogin, self.server_id.clone())
            .with_session(session_id.to_string(), origin.to_string())
            .with_provider(Some(provider_id.to_string()));

        event.metadata = Some(serde_json::json!({
            "success": success
        }));

        self.log(event).await;
    }

    /// Get the server ID
    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = UsageEvent::new(EventType::ActionFailed, "server-1".to_string())
            .with_session("s-1".to_string(), "https://app.example".to_string())
            .with_action("crypto/subtle/sign".to_string())
            .with_error("HandleNotFound".to_string());

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("action_failed"));
        assert!(jsonl.contains("crypto/subtle/sign"));
        assert!(jsonl.contains("HandleNotFound"));
    }

    #[tokio::test]
    async fn test_file_logging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");

        let logger = UsageLogger::new("server-1".to_string());
        logger.init_file(path.clone()).await.unwrap();
        logger.log_connection_opened("s-1", "unknown").await;
        logger
            .log_action("s-1", "unknown", "server/ping", None, None, 0)
            .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("connection_opened"));
        assert!(lines[1].contains("action_completed"));
    }

    #[tokio::test]
    async fn test_disabled_logger_is_silent() {
        let logger = UsageLogger::new("server-1".to_string());
        logger.log_connection_opened("s-1", "unknown").await;
    }
}
