use serde_json::Value;

/// One decoded record from restic's `--json` output stream.
///
/// Restic emits loosely-typed records distinguished by a `message_type`
/// field; byte counters show up as integers or floats depending on the code
/// path inside restic. Everything is normalized here, at the decode boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Cumulative bytes transferred so far.
    Progress { bytes_done: f64 },
    /// A reported error. Surfaced immediately; the stream keeps going until
    /// restic closes it.
    Error { message: String },
    /// Any other record carrying a human-readable message.
    Info { message: String },
    /// Recognized noise (summary records without a message, etc.).
    Ignored,
}

impl EngineEvent {
    pub fn from_value(value: &Value) -> EngineEvent {
        let kind = value
            .get("message_type")
            .and_then(Value::as_str)
            .unwrap_or("");

        match kind {
            "status" | "progress" | "snapshot" => EngineEvent::Progress {
                bytes_done: value
                    .get("bytes_done")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
            },
            "error" => EngineEvent::Error {
                message: error_message(value),
            },
            _ => match value.get("message").and_then(Value::as_str) {
                Some(m) if !m.is_empty() => EngineEvent::Info {
                    message: m.to_string(),
                },
                _ => EngineEvent::Ignored,
            },
        }
    }
}

/// Restic error records carry either a flat `error` string or a nested
/// `{"error": {"message": ...}}` object, depending on the restic version.
fn error_message(value: &Value) -> String {
    let nested = value.get("error").and_then(|e| {
        e.as_str()
            .map(str::to_string)
            .or_else(|| e.get("message").and_then(Value::as_str).map(str::to_string))
    });
    nested
        .or_else(|| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown error".to_string())
}
