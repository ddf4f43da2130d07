//! Server-sent-events framing.
//!
//! One event per `data: <json>` line, terminated by a blank line. Frames
//! are independently JSON-parsable, but producers may concatenate several
//! JSON objects on one `data:` line, so the decoder uses brace-balanced
//! extraction rather than a plain `serde_json::from_str`.

use crate::analyzer::extract_all_balanced;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes a payload as one SSE frame: `data: <json>\n\n`.
///
/// # Errors
///
/// Returns the serialization error unchanged.
pub fn encode_frame<T: Serialize>(payload: &T) -> serde_json::Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(payload)?))
}

/// Decodes every JSON payload carried by an SSE event text.
///
/// Handles multiple `data:` lines per event and multiple concatenated
/// JSON objects per line. Non-JSON residue is ignored.
#[must_use]
pub fn decode_frames<T: DeserializeOwned>(event: &str) -> Vec<T> {
    let mut out = Vec::new();
    for line in event.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        for payload in extract_all_balanced(data.trim()) {
            if let Ok(value) = serde_json::from_str(payload) {
                out.push(value);
            }
        }
    }
    out
}
