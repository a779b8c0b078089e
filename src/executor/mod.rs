mod runner;

pub use runner::{PosixShellRunner, PowerShellRunner, ScriptRunner, native_runner};

use crate::chain::{Command, CommandKind};
use crate::error::ExecutorError;
use alloy::primitives::U256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Fetch timeout for URL-kind payloads. Fixed, independent of the
/// per-attempt execution timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one full attempt-loop execution of a command.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub command_id: U256,
    pub succeeded: bool,
    /// Captured stdout, with stderr appended under a `STDERR:` label.
    pub output: String,
    /// Set iff `succeeded` is false; the last attempt's error.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Turns a command payload into an [`ExecutionOutcome`].
///
/// `execute` never fails; every failure mode is folded into the returned
/// outcome. The executor owns a dedicated temp directory for staged scripts
/// and removes it on drop.
pub struct ScriptExecutor {
    execution_timeout: Duration,
    max_retries: u32,
    temp_dir: PathBuf,
    runner: Box<dyn ScriptRunner>,
    http: reqwest::Client,
}

impl ScriptExecutor {
    pub fn new(execution_timeout: Duration, max_retries: u32) -> std::io::Result<Self> {
        Self::with_runner(execution_timeout, max_retries, native_runner())
    }

    pub fn with_runner(
        execution_timeout: Duration,
        max_retries: u32,
        runner: Box<dyn ScriptRunner>,
    ) -> std::io::Result<Self> {
        let temp_dir = std::env::temp_dir().join(format!("chainwatch-agent-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&temp_dir)?;

        Ok(Self {
            execution_timeout,
            max_retries: max_retries.max(1),
            temp_dir,
            runner,
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .map_err(|e| std::io::Error::other(e.to_string()))?,
        })
    }

    /// Run the command's attempt loop: up to `max_retries` attempts, each
    /// re-resolving the payload, with an `attempt`-seconds sleep between
    /// failures. The first success wins; otherwise the last error is
    /// reported.
    pub async fn execute(&self, command: &Command) -> ExecutionOutcome {
        let started_at = Utc::now();
        let started = Instant::now();

        tracing::info!(
            command_id = %command.id,
            kind = ?command.kind,
            "executing command"
        );

        let mut last_error: Option<ExecutorError> = None;
        let mut last_output = String::new();

        for attempt in 1..=self.max_retries {
            match self.attempt(command).await {
                Ok(output) => {
                    tracing::info!(command_id = %command.id, attempt, "command executed successfully");
                    return ExecutionOutcome {
                        command_id: command.id,
                        succeeded: true,
                        output,
                        error: None,
                        started_at,
                        duration: started.elapsed(),
                    };
                }
                Err((err, output)) => {
                    tracing::warn!(
                        command_id = %command.id,
                        attempt,
                        error = %err,
                        "execution attempt failed"
                    );
                    last_error = Some(err);
                    last_output = output;

                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                    }
                }
            }
        }

        tracing::error!(command_id = %command.id, "command execution failed after all retries");

        ExecutionOutcome {
            command_id: command.id,
            succeeded: false,
            output: last_output,
            error: last_error.map(|e| e.to_string()),
            started_at,
            duration: started.elapsed(),
        }
    }

    /// One attempt: resolve the payload to script source, stage it, run it
    /// under the execution timeout. Returns captured output either way so a
    /// failing script's diagnostics reach the outcome.
    async fn attempt(&self, command: &Command) -> Result<String, (ExecutorError, String)> {
        let source = match command.kind {
            CommandKind::Script => {
                decode_script_payload(&command.payload).map_err(|e| (e, String::new()))?
            }
            CommandKind::Url => self
                .fetch_script(&command.payload)
                .await
                .map_err(|e| (e, String::new()))?,
        };

        self.run_script(&source).await
    }

    async fn fetch_script(&self, url: &str) -> Result<String, ExecutorError> {
        tracing::debug!(url, "fetching script payload");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ExecutorError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutorError::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| ExecutorError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(body.trim().to_string())
    }

    async fn run_script(&self, source: &str) -> Result<String, (ExecutorError, String)> {
        let prepared = self.runner.prepare(&normalize_escapes(source));
        let staged = self
            .stage_script(&prepared)
            .map_err(|e| (ExecutorError::Stage(e), String::new()))?;

        let mut cmd = self.runner.command(&staged.path);
        cmd.kill_on_drop(true);
        let result = timeout(self.execution_timeout, cmd.output()).await;

        match result {
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).to_string();
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !stderr.is_empty() {
                    output.push_str("\nSTDERR:\n");
                    output.push_str(&stderr);
                }

                if out.status.success() {
                    Ok(output)
                } else {
                    Err((ExecutorError::NonZeroExit { status: out.status }, output))
                }
            }
            Ok(Err(e)) => Err((ExecutorError::Spawn(e), String::new())),
            Err(_) => Err((
                ExecutorError::Timeout {
                    timeout_secs: self.execution_timeout.as_secs(),
                },
                String::new(),
            )),
        }
    }

    /// Write the script to a fresh file in the executor temp dir. The guard
    /// removes it again when the attempt finishes, success or not.
    fn stage_script(&self, content: &str) -> std::io::Result<StagedScript> {
        let path = self.temp_dir.join(format!(
            "script-{}{}",
            uuid::Uuid::new_v4(),
            self.runner.file_extension()
        ));
        std::fs::write(&path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }

        Ok(StagedScript { path })
    }

    /// Directory staged scripts are written to. Exposed for tests.
    pub fn temp_dir(&self) -> &std::path::Path {
        &self.temp_dir
    }
}

impl Drop for ScriptExecutor {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.temp_dir);
    }
}

struct StagedScript {
    path: PathBuf,
}

impl Drop for StagedScript {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Decode a Script-kind payload: strip whitespace and surrounding quotes,
/// then base64-decode.
pub fn decode_script_payload(payload: &str) -> Result<String, ExecutorError> {
    let trimmed = payload.trim().trim_matches('"');
    let raw = BASE64.decode(trimmed)?;
    String::from_utf8(raw).map_err(|_| ExecutorError::InvalidUtf8)
}

/// Convert literal `\n`/`\t`/`\r` escape sequences into real control
/// characters (chains and URL hosts commonly deliver the body pre-escaped).
/// Applied to every resolved script, whatever its payload kind, just before
/// it is written to disk.
fn normalize_escapes(script: &str) -> String {
    script
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r")
}
