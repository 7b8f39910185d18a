//! The worker loop.
//!
//! One iteration asks the model for a command, validates it, dispatches it to
//! the toolbox and appends the result to the session. Malformed replies are
//! reported back to the model as tool errors. The loop ends successfully only
//! through `task_complete`.

use std::sync::Arc;

use serde_json::json;
use tokio::fs;
use tracing::{debug, error, info, warn};

use foreman_core::{
    layout, AuditEvent, CompletionMarker, Session, ToolCommand, Turn, TurnRole,
};
use foreman_model::{ChatMessage, ModelClient, ModelRequest};

use crate::audit::AuditLog;
use crate::error::WorkerError;
use crate::prompt::Prompt;
use crate::store::SessionStore;
use crate::toolbox::Toolbox;
use crate::validate::validate;

/// Default number of consecutive malformed replies tolerated.
pub const DEFAULT_MAX_VALIDATION_FAILURES: u32 = 5;

/// Entries shown in the per-turn workspace summary.
const SUMMARY_ENTRIES: usize = 50;

/// Instructions prepended to every request.
const TOOL_PROTOCOL: &str = "You operate inside an isolated workspace. \
Reply with exactly one JSON object per turn and nothing else. \
The \"tool\" field selects the operation:\n\
{\"tool\":\"execute_shell\",\"command\":\"...\"}\n\
{\"tool\":\"create_file\",\"path\":\"...\",\"content\":\"...\"}\n\
{\"tool\":\"read_file\",\"path\":\"...\"}\n\
{\"tool\":\"edit_file\",\"path\":\"...\",\"content\":\"...\",\"start_line\":1,\"end_line\":2}\n\
{\"tool\":\"list_files\",\"path\":\".\",\"recursive\":false}\n\
{\"tool\":\"task_complete\",\"message\":\"...\"}\n\
Paths are relative to the workspace. Call task_complete when the task is done.";

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Start,
    AwaitingModel,
    Validating,
    Dispatching,
    Terminal,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// `task_complete` wrote the marker during this run.
    Completed(CompletionMarker),
    /// The marker was already present when the worker started.
    AlreadyComplete,
}

/// Result of dispatching one command.
struct Dispatched {
    content: String,
    is_error: bool,
    marker: Option<CompletionMarker>,
}

/// Drives one task to completion inside the workspace.
pub struct WorkerLoop {
    task_id: String,
    model: Arc<dyn ModelClient>,
    toolbox: Toolbox,
    store: SessionStore,
    audit: AuditLog,
    max_validation_failures: u32,
    phase: LoopPhase,
}

impl WorkerLoop {
    /// Create a loop over an existing workspace.
    pub fn new(toolbox: Toolbox, model: Arc<dyn ModelClient>) -> Self {
        let task_id = toolbox.task_id().to_string();
        let store = SessionStore::new(toolbox.root());
        let audit = AuditLog::new(toolbox.root(), &task_id);
        Self {
            task_id,
            model,
            toolbox,
            store,
            audit,
            max_validation_failures: DEFAULT_MAX_VALIDATION_FAILURES,
            phase: LoopPhase::Start,
        }
    }

    /// Set the consecutive validation-failure limit (minimum 1).
    pub fn with_max_validation_failures(mut self, limit: u32) -> Self {
        self.max_validation_failures = limit.max(1);
        self
    }

    /// Current phase.
    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Run until `task_complete` or a fatal error.
    pub async fn run(&mut self) -> Result<LoopOutcome, WorkerError> {
        let result = self.run_inner().await;
        self.phase = LoopPhase::Terminal;
        if let Err(e) = &result {
            error!(task_id = %self.task_id, error = %e, "Worker loop failed");
            self.audit
                .record(AuditEvent::fatal(&self.task_id, &e.to_string()))
                .await;
        }
        result
    }

    async fn run_inner(&mut self) -> Result<LoopOutcome, WorkerError> {
        if fs::try_exists(self.toolbox.root().join(layout::MARKER_FILE)).await? {
            info!(task_id = %self.task_id, "Completion marker present, nothing to do");
            return Ok(LoopOutcome::AlreadyComplete);
        }

        let mut session = self.start_session().await?;

        loop {
            self.phase = LoopPhase::AwaitingModel;
            let request = self.build_request(&session).await;
            let reply = self.model.complete(&request).await?;
            let raw = reply.raw();
            self.audit
                .record(AuditEvent::model_responded(&self.task_id, &raw))
                .await;

            self.phase = LoopPhase::Validating;
            let command = match validate(&reply) {
                Ok(command) => command,
                Err(e) => {
                    session.consecutive_failures += 1;
                    let failures = session.consecutive_failures;
                    warn!(
                        task_id = %self.task_id,
                        consecutive = failures,
                        error = %e,
                        "Rejected model reply"
                    );
                    self.audit
                        .record(AuditEvent::validation_failed(
                            &self.task_id,
                            &e.to_string(),
                            failures,
                        ))
                        .await;

                    self.append(&mut session, Turn::assistant(raw, None)).await?;
                    self.append(&mut session, Turn::tool_result(error_result(&e), true))
                        .await?;

                    if failures >= self.max_validation_failures {
                        return Err(WorkerError::TooManyValidationFailures {
                            limit: self.max_validation_failures,
                        });
                    }
                    continue;
                }
            };

            session.consecutive_failures = 0;
            self.append(&mut session, Turn::assistant(raw, Some(command.clone())))
                .await?;

            self.phase = LoopPhase::Dispatching;
            self.audit
                .record(AuditEvent::tool_requested(&self.task_id, command.name()))
                .await;
            let dispatched = self.dispatch(&command).await?;
            self.audit
                .record(AuditEvent::tool_completed(
                    &self.task_id,
                    command.name(),
                    dispatched.is_error,
                ))
                .await;

            self.append(
                &mut session,
                Turn::tool_result(dispatched.content, dispatched.is_error),
            )
            .await?;

            if let Some(marker) = dispatched.marker {
                info!(task_id = %self.task_id, message = %marker.message, "Task complete");
                self.audit
                    .record(AuditEvent::task_completed(&self.task_id, &marker.message))
                    .await;
                return Ok(LoopOutcome::Completed(marker));
            }
        }
    }

    /// Resume the persisted session or start a new one from the prompt.
    async fn start_session(&mut self) -> Result<Session, WorkerError> {
        if let Some(session) = self.store.load().await? {
            if !session.is_empty() {
                info!(
                    task_id = %self.task_id,
                    turns = session.len(),
                    "Resuming session"
                );
                self.audit
                    .record(AuditEvent::session_started(
                        &self.task_id,
                        true,
                        session.len(),
                    ))
                    .await;
                return Ok(session);
            }
        }

        let prompt = Prompt::load(&self.toolbox.root().join(layout::PROMPT_FILE)).await?;
        let mut session = Session::new(self.task_id.clone());
        if let Some(system) = prompt.system() {
            session.push(Turn::system(system));
        }
        session.push(Turn::user(prompt.body));
        self.store.save(&session).await?;

        info!(task_id = %self.task_id, "Starting new session");
        self.audit
            .record(AuditEvent::session_started(
                &self.task_id,
                false,
                session.len(),
            ))
            .await;
        Ok(session)
    }

    async fn append(&self, session: &mut Session, turn: Turn) -> Result<(), WorkerError> {
        session.push(turn);
        self.store.save(session).await
    }

    async fn build_request(&self, session: &Session) -> ModelRequest {
        let mut messages = Vec::with_capacity(session.len() + 2);
        messages.push(ChatMessage::system(TOOL_PROTOCOL));
        messages.extend(session.turns.iter().map(to_message));

        match self.toolbox.summary(SUMMARY_ENTRIES).await {
            Ok(summary) => messages.push(ChatMessage::system(summary)),
            Err(e) => debug!(error = %e, "Workspace summary unavailable"),
        }

        ModelRequest::new(messages)
    }

    async fn dispatch(&self, command: &ToolCommand) -> Result<Dispatched, WorkerError> {
        let tb = &self.toolbox;
        let result = match command {
            ToolCommand::ExecuteShell {
                command,
                timeout_secs,
            } => tb.execute_shell(command, *timeout_secs).await.map(|out| {
                let failed = out.exit_code != Some(0);
                (json!({"status": "ok", "result": out}), failed)
            }),
            ToolCommand::CreateFile { path, content } => tb
                .create_file(path, content)
                .await
                .map(|p| (json!({"status": "ok", "created": tb.relative(&p)}), false)),
            ToolCommand::ReadFile { path } => tb
                .read_file(path)
                .await
                .map(|content| (json!({"status": "ok", "content": content}), false)),
            ToolCommand::EditFile {
                path,
                content,
                start_line,
                end_line,
            } => tb
                .edit_file(path, content, *start_line, *end_line)
                .await
                .map(|p| (json!({"status": "ok", "edited": tb.relative(&p)}), false)),
            ToolCommand::ListFiles { path, recursive } => tb
                .list_files(path, *recursive)
                .await
                .map(|files| (json!({"status": "ok", "files": files}), false)),
            ToolCommand::TaskComplete { message } => {
                let marker = tb
                    .task_complete(message)
                    .await
                    .map_err(WorkerError::Completion)?;
                return Ok(Dispatched {
                    content: json!({"status": "ok", "complete": true}).to_string(),
                    is_error: false,
                    marker: Some(marker),
                });
            }
        };

        Ok(match result {
            Ok((value, is_error)) => Dispatched {
                content: value.to_string(),
                is_error,
                marker: None,
            },
            Err(e) => {
                debug!(tool = command.name(), error = %e, "Tool failed");
                Dispatched {
                    content: error_result(&e),
                    is_error: true,
                    marker: None,
                }
            }
        })
    }
}

fn error_result(err: &dyn std::error::Error) -> String {
    json!({"status": "error", "error": err.to_string()}).to_string()
}

fn to_message(turn: &Turn) -> ChatMessage {
    match turn.role {
        TurnRole::System => ChatMessage::system(turn.content.clone()),
        TurnRole::User => ChatMessage::user(turn.content.clone()),
        TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
        TurnRole::Tool if turn.is_error => {
            ChatMessage::user(format!("Tool error:\n{}", turn.content))
        }
        TurnRole::Tool => ChatMessage::user(format!("Tool result:\n{}", turn.content)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_model::{ModelReply, ScriptedModel};
    use serde_json::json;
    use std::path::Path;

    fn workspace(prompt: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.md"), prompt).unwrap();
        dir
    }

    fn worker(root: &Path, model: Arc<ScriptedModel>) -> WorkerLoop {
        let toolbox = Toolbox::new(root, "t1").unwrap();
        WorkerLoop::new(toolbox, model)
    }

    #[tokio::test]
    async fn test_create_file_then_complete() {
        let dir = workspace("Create out.txt containing hi");
        let model = Arc::new(ScriptedModel::from_payloads([
            json!({"tool": "create_file", "path": "out.txt", "content": "hi"}),
            json!({"tool": "task_complete", "message": "done"}),
        ]));
        let mut worker = worker(dir.path(), model.clone());

        let outcome = worker.run().await.unwrap();
        match outcome {
            LoopOutcome::Completed(marker) => assert_eq!(marker.message, "done"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(worker.phase(), LoopPhase::Terminal);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "hi"
        );
        let marker: CompletionMarker = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("complete.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(marker.message, "done");

        let session = SessionStore::new(dir.path()).load().await.unwrap().unwrap();
        let roles: Vec<TurnRole> = session.turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![
                TurnRole::User,
                TurnRole::Assistant,
                TurnRole::Tool,
                TurnRole::Assistant,
                TurnRole::Tool,
            ]
        );

        let audit = std::fs::read_to_string(dir.path().join("t1-audit.log")).unwrap();
        assert!(audit.lines().count() >= 6);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_reported_and_loop_continues() {
        let dir = workspace("Finish");
        let model = Arc::new(ScriptedModel::new([
            ModelReply::Payload(json!({"tool": "summon_dragon"})),
            ModelReply::Payload(json!({"tool": "task_complete", "message": "ok"})),
        ]));
        let mut worker = worker(dir.path(), model.clone());

        assert!(matches!(
            worker.run().await.unwrap(),
            LoopOutcome::Completed(_)
        ));

        let session = SessionStore::new(dir.path()).load().await.unwrap().unwrap();
        let error_turn = &session.turns[2];
        assert_eq!(error_turn.role, TurnRole::Tool);
        assert!(error_turn.is_error);
        assert!(error_turn.content.contains("malformed command"));
        assert_eq!(session.consecutive_failures, 0);

        // The second request carries the error back to the model.
        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1]
            .messages
            .iter()
            .any(|m| m.content.contains("malformed command")));
    }

    #[tokio::test]
    async fn test_tool_errors_do_not_end_the_loop() {
        let dir = workspace("Read a missing file");
        let model = Arc::new(ScriptedModel::from_payloads([
            json!({"tool": "read_file", "path": "../../etc/passwd"}),
            json!({"tool": "read_file", "path": "missing.txt"}),
            json!({"tool": "task_complete", "message": "gave up politely"}),
        ]));
        let mut worker = worker(dir.path(), model);

        assert!(worker.run().await.is_ok());
        let session = SessionStore::new(dir.path()).load().await.unwrap().unwrap();
        assert!(session.turns[2].content.contains("escapes the workspace"));
        assert!(session.turns[4].is_error);
    }

    #[tokio::test]
    async fn test_validation_failure_limit() {
        let dir = workspace("Go");
        let model = Arc::new(ScriptedModel::new([
            ModelReply::Text("hello".to_string()),
            ModelReply::Text("hello again".to_string()),
            ModelReply::Payload(json!({"tool": "task_complete", "message": "late"})),
        ]));
        let mut worker = worker(dir.path(), model).with_max_validation_failures(2);

        let err = worker.run().await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::TooManyValidationFailures { limit: 2 }
        ));
        assert!(!dir.path().join("complete.json").exists());
    }

    #[tokio::test]
    async fn test_model_failure_is_fatal_and_leaves_session() {
        let dir = workspace("Go");
        let model = Arc::new(ScriptedModel::from_payloads([
            json!({"tool": "create_file", "path": "partial.txt", "content": "x"}),
        ]));
        let mut worker = worker(dir.path(), model);

        assert!(matches!(worker.run().await, Err(WorkerError::Model(_))));
        assert!(dir.path().join("partial.txt").exists());
        assert!(!dir.path().join("complete.json").exists());

        let session = SessionStore::new(dir.path()).load().await.unwrap().unwrap();
        assert_eq!(session.len(), 3);

        let audit = std::fs::read_to_string(dir.path().join("t1-audit.log")).unwrap();
        assert!(audit.contains("\"fatal\""));
    }

    #[tokio::test]
    async fn test_resume_continues_from_persisted_history() {
        let dir = workspace("Go");

        // First run dies after one tool call.
        let first = Arc::new(ScriptedModel::from_payloads([
            json!({"tool": "create_file", "path": "a.txt", "content": "1"}),
        ]));
        assert!(worker(dir.path(), first).run().await.is_err());

        let second = Arc::new(ScriptedModel::from_payloads([
            json!({"tool": "task_complete", "message": "resumed"}),
        ]));
        let mut resumed = worker(dir.path(), second.clone());
        assert!(matches!(
            resumed.run().await.unwrap(),
            LoopOutcome::Completed(_)
        ));

        // The resumed request replays the earlier tool call.
        let request = &second.requests()[0];
        assert!(request.messages.iter().any(|m| m.content.contains("a.txt")));

        let session = SessionStore::new(dir.path()).load().await.unwrap().unwrap();
        assert_eq!(session.len(), 5);
    }

    #[tokio::test]
    async fn test_existing_marker_short_circuits() {
        let dir = workspace("Go");
        std::fs::write(
            dir.path().join("complete.json"),
            r#"{"message":"earlier","completed_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let model = Arc::new(ScriptedModel::new(Vec::<ModelReply>::new()));
        let mut worker = worker(dir.path(), model.clone());

        assert_eq!(worker.run().await.unwrap(), LoopOutcome::AlreadyComplete);
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_front_matter_becomes_system_turn() {
        let dir = workspace("---\nsystem: be brief\n---\nDo it");
        let model = Arc::new(ScriptedModel::from_payloads([
            json!({"tool": "task_complete", "message": "ok"}),
        ]));
        worker(dir.path(), model.clone()).run().await.unwrap();

        let session = SessionStore::new(dir.path()).load().await.unwrap().unwrap();
        assert_eq!(session.turns[0].role, TurnRole::System);
        assert_eq!(session.turns[0].content, "be brief");
        assert_eq!(session.turns[1].content, "Do it");
    }
}
