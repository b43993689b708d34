// Agent engine selection and execution

pub mod decode;
pub mod exec;

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use decode::{DecodeError, EngineOutput};
use exec::{exec_command, exec_command_with_env, CommandOutput};

/// Normalized result of one engine execution.
/// A failed result always carries a non-empty error string; token counts
/// are zero when the engine does not report usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIResult {
    pub success: bool,
    pub response: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AIResult {
    /// Build a failure result; an empty diagnostic is replaced so the
    /// error is never blank
    pub fn failure(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "Unknown error".to_string();
        }
        Self {
            success: false,
            response: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            error: Some(error),
        }
    }
}

/// Supported coding agent CLIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentEngine {
    Claude,
    Opencode,
    Cursor,
    Codex,
    Qwen,
    Droid,
}

impl AgentEngine {
    /// Display name of the engine
    pub fn name(&self) -> &'static str {
        match self {
            AgentEngine::Claude => "Claude Code",
            AgentEngine::Opencode => "OpenCode",
            AgentEngine::Cursor => "Cursor Agent",
            AgentEngine::Codex => "Codex",
            AgentEngine::Qwen => "Qwen-Code",
            AgentEngine::Droid => "Factory Droid",
        }
    }

    /// CLI command the engine is invoked through
    pub fn cli_command(&self) -> &'static str {
        match self {
            AgentEngine::Claude => "claude",
            AgentEngine::Opencode => "opencode",
            AgentEngine::Cursor => "agent",
            AgentEngine::Codex => "codex",
            AgentEngine::Qwen => "qwen",
            AgentEngine::Droid => "droid",
        }
    }

    /// Check if the engine CLI is on PATH
    pub fn is_available(&self) -> bool {
        which::which(self.cli_command()).is_ok()
    }

    /// Execute a prompt in `work_dir` and normalize the outcome.
    /// Safe to invoke concurrently from different working directories;
    /// each call is one subprocess with no shared state.
    pub async fn execute(&self, prompt: &str, work_dir: &Path) -> Result<AIResult> {
        match self {
            AgentEngine::Claude => {
                let output = exec_command(
                    self.cli_command(),
                    &[
                        "--dangerously-skip-permissions",
                        "--verbose",
                        "--output-format",
                        "stream-json",
                        "-p",
                        prompt,
                    ],
                    work_dir,
                )
                .await?;
                let decoded = decode::decode_stream_json(&output.stdout);
                Ok(normalize(*self, &output, decoded))
            }
            AgentEngine::Qwen => {
                let output = exec_command(
                    self.cli_command(),
                    &[
                        "--output-format",
                        "stream-json",
                        "--approval-mode",
                        "yolo",
                        "-p",
                        prompt,
                    ],
                    work_dir,
                )
                .await?;
                let decoded = decode::decode_stream_json(&output.stdout);
                Ok(normalize(*self, &output, decoded))
            }
            AgentEngine::Opencode => {
                let output = exec_command_with_env(
                    self.cli_command(),
                    &["run", "--format", "json", prompt],
                    work_dir,
                    &[("OPENCODE_PERMISSION", r#"{"*":"allow"}"#)],
                )
                .await?;
                let decoded = decode::decode_opencode(&output.stdout);
                Ok(normalize(*self, &output, decoded))
            }
            AgentEngine::Cursor => {
                let output = exec_command(
                    self.cli_command(),
                    &[
                        "--print",
                        "--force",
                        "--output-format",
                        "stream-json",
                        prompt,
                    ],
                    work_dir,
                )
                .await?;
                let decoded = decode::decode_cursor(&output.stdout);
                Ok(normalize(*self, &output, decoded))
            }
            AgentEngine::Droid => {
                let output = exec_command(
                    self.cli_command(),
                    &[
                        "exec",
                        "--output-format",
                        "stream-json",
                        "--auto",
                        "medium",
                        prompt,
                    ],
                    work_dir,
                )
                .await?;
                let decoded = decode::decode_droid(&output.stdout);
                Ok(normalize(*self, &output, decoded))
            }
            AgentEngine::Codex => self.execute_codex(prompt, work_dir).await,
        }
    }

    /// Codex writes its final message to a file instead of the event
    /// stream, so it gets its own path
    async fn execute_codex(&self, prompt: &str, work_dir: &Path) -> Result<AIResult> {
        let last_message_file = work_dir.join(format!(
            ".codex-last-message-{}-{}.txt",
            chrono::Utc::now().timestamp_millis(),
            std::process::id()
        ));
        let file_arg = last_message_file.to_string_lossy().into_owned();

        let output = exec_command(
            self.cli_command(),
            &[
                "exec",
                "--full-auto",
                "--json",
                "--output-last-message",
                &file_arg,
                prompt,
            ],
            work_dir,
        )
        .await?;

        let response = std::fs::read_to_string(&last_message_file)
            .ok()
            .map(|text| strip_completion_prefix(&text))
            .filter(|text| !text.is_empty());
        let _ = std::fs::remove_file(&last_message_file);

        match decode::decode_codex(&output.stdout) {
            Err(DecodeError::Engine(message)) => Ok(AIResult::failure(message)),
            Err(error) if output.exit_code == 0 => Ok(AIResult::failure(format!(
                "{} output could not be decoded: {}",
                self.name(),
                error
            ))),
            _ if output.exit_code != 0 => Ok(AIResult::failure(exit_failure(*self, &output))),
            _ => Ok(AIResult {
                success: true,
                response: response.unwrap_or_else(|| "Task completed".to_string()),
                input_tokens: 0,
                output_tokens: 0,
                error: None,
            }),
        }
    }
}

/// Fold exit status and decoded output into the normalized result
fn normalize(
    engine: AgentEngine,
    output: &CommandOutput,
    decoded: Result<EngineOutput, DecodeError>,
) -> AIResult {
    match decoded {
        Ok(decoded) if output.exit_code == 0 => AIResult {
            success: true,
            response: decoded.response,
            input_tokens: decoded.input_tokens,
            output_tokens: decoded.output_tokens,
            error: None,
        },
        Ok(_) => AIResult::failure(exit_failure(engine, output)),
        Err(DecodeError::Engine(message)) => AIResult::failure(message),
        Err(error) => {
            if output.exit_code != 0 {
                AIResult::failure(exit_failure(engine, output))
            } else {
                AIResult::failure(format!(
                    "{} output could not be decoded: {}",
                    engine.name(),
                    error
                ))
            }
        }
    }
}

fn exit_failure(engine: AgentEngine, output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("{} exited with code {}", engine.name(), output.exit_code)
    } else {
        let excerpt: Vec<&str> = stderr.lines().take(3).collect();
        format!(
            "{} exited with code {}: {}",
            engine.name(),
            output.exit_code,
            excerpt.join(" ")
        )
    }
}

/// Codex prefixes its last message with a boilerplate line; drop it
fn strip_completion_prefix(text: &str) -> String {
    const PREFIX: &str = "task completed successfully.";
    let trimmed = text.trim();
    if trimmed.to_lowercase().starts_with(PREFIX) {
        trimmed[PREFIX.len()..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    #[test]
    fn test_engine_names_and_commands() {
        assert_eq!(AgentEngine::Claude.name(), "Claude Code");
        assert_eq!(AgentEngine::Claude.cli_command(), "claude");
        assert_eq!(AgentEngine::Cursor.cli_command(), "agent");
        assert_eq!(AgentEngine::Droid.name(), "Factory Droid");
        assert_eq!(AgentEngine::Qwen.cli_command(), "qwen");
    }

    #[test]
    fn test_failure_never_has_empty_error() {
        let result = AIResult::failure("");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown error"));
    }

    #[test]
    fn test_normalize_success() {
        let out = output(r#"{"type":"result","result":"Done"}"#, "", 0);
        let decoded = decode::decode_stream_json(&out.stdout);
        let result = normalize(AgentEngine::Claude, &out, decoded);
        assert!(result.success);
        assert_eq!(result.response, "Done");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_normalize_engine_error_event() {
        let out = output(r#"{"type":"error","error":{"message":"overloaded"}}"#, "", 1);
        let decoded = decode::decode_stream_json(&out.stdout);
        let result = normalize(AgentEngine::Claude, &out, decoded);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("overloaded"));
    }

    #[test]
    fn test_normalize_nonzero_exit_prefers_stderr() {
        let out = output("", "Error: 429 Too Many Requests", 1);
        let decoded = decode::decode_stream_json(&out.stdout);
        let result = normalize(AgentEngine::Claude, &out, decoded);
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("429"));
    }

    #[test]
    fn test_normalize_decode_failure_on_clean_exit_is_not_success() {
        let out = output("plainly not json", "", 0);
        let decoded = decode::decode_stream_json(&out.stdout);
        let result = normalize(AgentEngine::Claude, &out, decoded);
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("could not be decoded"));
    }

    #[test]
    fn test_strip_completion_prefix() {
        assert_eq!(
            strip_completion_prefix("Task completed successfully. Added the endpoint."),
            "Added the endpoint."
        );
        assert_eq!(strip_completion_prefix("Just a message"), "Just a message");
    }
}
