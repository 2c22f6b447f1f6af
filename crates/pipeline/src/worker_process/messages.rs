//! Worker process wire messages.
//!
//! Both directions use one JSON object per line, shaped
//! `{"type": "<kind>", "data": {...}}`. Kinds without a payload omit
//! `data`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::AnimationOutput;

/// Messages written by the worker process on stdout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The model is loaded and the worker accepts commands.
    Ready(ReadyData),

    /// A frame was produced.
    Frame(FrameData),

    /// The run finished; the payload is the animation object.
    Finished(AnimationOutput),

    /// The current command failed.
    Error(ErrorData),

    /// The generator was reset in place.
    ResetDone,
}

/// Payload for `ready` messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadyData {
    /// Operations the loaded generator supports.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Payload for `frame` messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameData {
    pub frame_idx: u32,
    /// Image file holding the frame, when the worker wrote one.
    #[serde(default)]
    pub preview_path: Option<PathBuf>,
}

/// Payload for `error` messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

/// Commands written to the worker process on stdin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Run one generation.
    Run(RunData),

    /// Reset the generator without reloading the model.
    Reset,
}

/// Payload for `run` commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunData {
    pub settings: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
    pub optimize: bool,
}

/// Parse one stdout line into a typed message.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
pub fn parse_message(line: &str) -> Result<WorkerMessage, serde_json::Error> {
    serde_json::from_str(line)
}

/// Encode a command as one newline-terminated line.
pub fn encode_command(command: &WorkerCommand) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_ready() {
        let msg = parse_message(r#"{"type":"ready","data":{"capabilities":["render_animation","optimize"]}}"#).unwrap();
        assert_matches!(msg, WorkerMessage::Ready(ReadyData { capabilities }) if capabilities.len() == 2);
    }

    #[test]
    fn parses_frame_without_preview() {
        let msg = parse_message(r#"{"type":"frame","data":{"frame_idx":7}}"#).unwrap();
        assert_eq!(
            msg,
            WorkerMessage::Frame(FrameData {
                frame_idx: 7,
                preview_path: None
            })
        );
    }

    #[test]
    fn parses_finished_with_partial_fields() {
        let msg = parse_message(
            r#"{"type":"finished","data":{"status":"done","video_path":"/out/20240101120000.mp4"}}"#,
        )
        .unwrap();
        assert_matches!(msg, WorkerMessage::Finished(out) => {
            assert_eq!(out.status.as_deref(), Some("done"));
            assert_eq!(out.video_path, Some(PathBuf::from("/out/20240101120000.mp4")));
            assert!(out.outdir.is_none());
        });
    }

    #[test]
    fn parses_reset_done_without_data() {
        assert_eq!(
            parse_message(r#"{"type":"reset_done"}"#).unwrap(),
            WorkerMessage::ResetDone
        );
    }

    #[test]
    fn unknown_type_is_error() {
        assert!(parse_message(r#"{"type":"telemetry","data":{}}"#).is_err());
        assert!(parse_message("not json").is_err());
    }

    #[test]
    fn encodes_run_command() {
        let mut settings = serde_json::Map::new();
        settings.insert("max_frames".into(), json!(10));
        let line = encode_command(&WorkerCommand::Run(RunData {
            settings,
            settings_file: Some(PathBuf::from("/tmp/settings-1.json")),
            optimize: false,
        }))
        .unwrap();

        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "run",
                "data": {
                    "settings": { "max_frames": 10 },
                    "settings_file": "/tmp/settings-1.json",
                    "optimize": false
                }
            })
        );
    }

    #[test]
    fn encodes_reset_command() {
        let line = encode_command(&WorkerCommand::Reset).unwrap();
        assert_eq!(line, "{\"type\":\"reset\"}\n");
    }
}
