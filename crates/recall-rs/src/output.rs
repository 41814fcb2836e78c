//! JSON payloads written to stdout.

use recall_rs_memory::{ErrorKind, MemoryError};
use serde_json::{Map, Value, json};

/// Mark `payload` as successful. Objects gain `"status": "ok"`; anything
/// else is wrapped under `result`.
pub fn success(payload: Value) -> Value {
    let mut object = match payload {
        Value::Object(object) => object,
        other => {
            let mut object = Map::new();
            object.insert("result".to_string(), other);
            object
        }
    };
    object.insert("status".to_string(), Value::from("ok"));
    Value::Object(object)
}

/// Error payload carrying a stable code, the message and, when one helps,
/// a remediation hint.
pub fn failure(err: &MemoryError) -> Value {
    let kind = err.kind();
    let mut payload = json!({
        "status": "error",
        "error": kind.code(),
        "message": err.to_string(),
    });
    if let Some(hint) = hint(kind) {
        payload["hint"] = Value::from(hint);
    }
    payload
}

/// Failure outside the engine's error model (argument parsing, runtime).
pub fn internal_failure(err: &anyhow::Error) -> Value {
    json!({
        "status": "error",
        "error": "internal_error",
        "message": format!("{err:#}"),
    })
}

fn hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::ProviderUnavailable => {
            Some("start Ollama (`ollama serve`) or set OPENAI_API_KEY, then retry")
        }
        ErrorKind::ModelNotFound => {
            Some("pull the model (`ollama pull <model>`) or pick another with `recall init --model`")
        }
        ErrorKind::ConfigMismatch => Some(
            "the store belongs to another provider, model or dimension; reopen it or run `recall init --force` (deletes all memories)",
        ),
        ErrorKind::StoreCorrupt => {
            Some("run `recall init --force` to rebuild the store (deletes all memories)")
        }
        ErrorKind::NotFound => Some("run `recall list` to see stored ids"),
        ErrorKind::Storage => Some("another process may be writing to the store; retry"),
        ErrorKind::Validation | ErrorKind::Io => None,
    }
}
