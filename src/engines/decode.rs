// Strict decoders for agent CLI output formats
//
// Each engine prints line-delimited JSON; each format gets its own typed
// decoder. A line that does not decode is an error, not something to skip:
// a decode failure must never masquerade as a completed task.

use serde::Deserialize;
use thiserror::Error;

/// Decoded terminal payload of an engine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    pub response: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Failure to decode an engine's output stream
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The engine emitted a structured error event
    #[error("{0}")]
    Engine(String),
    /// No terminal result event was found in the output
    #[error("no result event in engine output")]
    MissingResult,
    /// A line that should be JSON was not
    #[error("malformed output line: {0}")]
    MalformedLine(String),
}

fn excerpt(line: &str) -> String {
    line.chars().take(120).collect()
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Claude Code / Qwen-Code `--output-format stream-json` events
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        usage: Option<Usage>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorBody>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Decode Claude/Qwen stream-json output into the terminal result
pub fn decode_stream_json(stdout: &str) -> Result<EngineOutput, DecodeError> {
    let mut output: Option<EngineOutput> = None;

    for line in non_empty_lines(stdout) {
        let event: StreamEvent =
            serde_json::from_str(line).map_err(|_| DecodeError::MalformedLine(excerpt(line)))?;

        match event {
            StreamEvent::Result { result, usage } => {
                let usage = usage.unwrap_or_default();
                output = Some(EngineOutput {
                    response: result.unwrap_or_else(|| "Task completed".to_string()),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                });
            }
            StreamEvent::Error { error, message } => {
                let message = error
                    .and_then(|e| e.message)
                    .or(message)
                    .unwrap_or_else(|| "Unknown error".to_string());
                return Err(DecodeError::Engine(message));
            }
            StreamEvent::Other => {}
        }
    }

    output.ok_or(DecodeError::MissingResult)
}

/// OpenCode `run --format json` events
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum OpencodeEvent {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        part: Option<OpencodePart>,
    },
    #[serde(rename = "step_finish")]
    StepFinish {
        #[serde(default)]
        part: Option<OpencodePart>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorBody>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct OpencodePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tokens: Option<OpencodeTokens>,
}

#[derive(Debug, Default, Deserialize)]
struct OpencodeTokens {
    #[serde(default)]
    input: u64,
    #[serde(default)]
    output: u64,
}

/// Decode OpenCode output: text parts form the response, the last
/// step_finish carries the token counts
pub fn decode_opencode(stdout: &str) -> Result<EngineOutput, DecodeError> {
    let mut saw_event = false;
    let mut response = String::new();
    let mut input_tokens = 0;
    let mut output_tokens = 0;

    for line in non_empty_lines(stdout) {
        let event: OpencodeEvent =
            serde_json::from_str(line).map_err(|_| DecodeError::MalformedLine(excerpt(line)))?;
        saw_event = true;

        match event {
            OpencodeEvent::Text { part } => {
                if let Some(text) = part.and_then(|p| p.text) {
                    response.push_str(&text);
                }
            }
            OpencodeEvent::StepFinish { part } => {
                if let Some(tokens) = part.and_then(|p| p.tokens) {
                    input_tokens = tokens.input;
                    output_tokens = tokens.output;
                }
            }
            OpencodeEvent::Error { error, message } => {
                let message = error
                    .and_then(|e| e.message)
                    .or(message)
                    .unwrap_or_else(|| "Unknown error".to_string());
                return Err(DecodeError::Engine(message));
            }
            OpencodeEvent::Other => {}
        }
    }

    if !saw_event {
        return Err(DecodeError::MissingResult);
    }

    if response.is_empty() {
        response = "Task completed".to_string();
    }

    Ok(EngineOutput {
        response,
        input_tokens,
        output_tokens,
    })
}

/// Cursor Agent `--output-format stream-json` events
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CursorEvent {
    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
    },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(default)]
        message: Option<CursorMessage>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorBody>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct CursorMessage {
    #[serde(default)]
    content: serde_json::Value,
}

/// Decode Cursor output; assistant messages are the fallback when no
/// result event is present. Cursor does not report token usage.
pub fn decode_cursor(stdout: &str) -> Result<EngineOutput, DecodeError> {
    let mut response: Option<String> = None;
    let mut fallback: Option<String> = None;

    for line in non_empty_lines(stdout) {
        let event: CursorEvent =
            serde_json::from_str(line).map_err(|_| DecodeError::MalformedLine(excerpt(line)))?;

        match event {
            CursorEvent::Result { result } => {
                response = Some(result.unwrap_or_else(|| "Task completed".to_string()));
            }
            CursorEvent::Assistant { message } => {
                if fallback.is_none() {
                    fallback = message.and_then(|m| cursor_message_text(&m.content));
                }
            }
            CursorEvent::Error { error, message } => {
                let message = error
                    .and_then(|e| e.message)
                    .or(message)
                    .unwrap_or_else(|| "Unknown error".to_string());
                return Err(DecodeError::Engine(message));
            }
            CursorEvent::Other => {}
        }
    }

    response
        .or(fallback)
        .map(|response| EngineOutput {
            response,
            input_tokens: 0,
            output_tokens: 0,
        })
        .ok_or(DecodeError::MissingResult)
}

fn cursor_message_text(content: &serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Array(parts) => parts
            .first()
            .and_then(|part| part.get("text"))
            .and_then(|text| text.as_str())
            .map(str::to_string),
        _ => None,
    }
}

/// Factory Droid `exec --output-format stream-json` events
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DroidEvent {
    #[serde(rename = "completion")]
    Completion {
        #[serde(rename = "finalText", default)]
        final_text: Option<String>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Decode Droid output; the completion event carries the final text.
/// Droid does not report token usage in exec mode.
pub fn decode_droid(stdout: &str) -> Result<EngineOutput, DecodeError> {
    let mut response: Option<String> = None;

    for line in non_empty_lines(stdout) {
        let event: DroidEvent =
            serde_json::from_str(line).map_err(|_| DecodeError::MalformedLine(excerpt(line)))?;

        match event {
            DroidEvent::Completion { final_text } => {
                response = Some(final_text.unwrap_or_else(|| "Task completed".to_string()));
            }
            DroidEvent::Error { message } => {
                return Err(DecodeError::Engine(
                    message.unwrap_or_else(|| "Unknown error".to_string()),
                ));
            }
            DroidEvent::Other => {}
        }
    }

    response
        .map(|response| EngineOutput {
            response,
            input_tokens: 0,
            output_tokens: 0,
        })
        .ok_or(DecodeError::MissingResult)
}

/// Codex `exec --json` events; the response itself arrives through the
/// last-message file, so decoding only surfaces structured errors
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CodexEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Scan Codex event output for structured errors
pub fn decode_codex(stdout: &str) -> Result<(), DecodeError> {
    for line in non_empty_lines(stdout) {
        let event: CodexEvent =
            serde_json::from_str(line).map_err(|_| DecodeError::MalformedLine(excerpt(line)))?;

        if let CodexEvent::Error { message } = event {
            return Err(DecodeError::Engine(
                message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
    }
    Ok(())
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|line| !line.is_empty())
}
