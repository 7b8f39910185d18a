//! Append-only JSON-lines audit log.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use foreman_core::{layout, AuditEvent};

/// Writes one `AuditEvent` per line to `<task-id>-audit.log`.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Audit log for `task_id` in `workspace`.
    pub fn new(workspace: &Path, task_id: &str) -> Self {
        Self {
            path: workspace.join(layout::audit_log_name(task_id)),
        }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event. Failures are logged, never raised: the audit trail is
    /// a debugging aid and must not stop the loop.
    pub async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.append(&event).await {
            warn!(error = %e, path = %self.path.display(), "Failed to write audit event");
        }
    }

    async fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}
