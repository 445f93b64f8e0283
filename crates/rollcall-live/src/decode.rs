//! Frame payload decoding.
//!
//! Each SSE `data` field carries `{"type": "<kind>", "data": {...}}`. A
//! missing or `null` `data` is treated as an empty payload; anything that is
//! not an object is rejected.

use rollcall_core::{FrameError, LiveEvent};
use serde_json::{Map, Value};

pub fn decode_frame(raw: &str) -> Result<LiveEvent, FrameError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FrameError::Empty);
    }

    let Value::Object(mut frame) = serde_json::from_str::<Value>(raw)? else {
        return Err(FrameError::MissingType);
    };

    let event_type = match frame.remove("type") {
        Some(Value::String(t)) if !t.trim().is_empty() => t,
        _ => return Err(FrameError::MissingType),
    };

    let data = match frame.remove("data") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(obj @ Value::Object(_)) => obj,
        Some(_) => return Err(FrameError::PayloadNotObject),
    };

    Ok(LiveEvent::new(event_type, data))
}

/// First few characters of a frame, for diagnostics.
pub(crate) fn preview(raw: &str) -> String {
    const MAX: usize = 120;
    match raw.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &raw[..idx]),
        None => raw.to_string(),
    }
}
