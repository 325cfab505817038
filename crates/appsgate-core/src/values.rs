/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Lenient lookups over free-form JSON (`values`, `state`, `data`).
//!
//! Form submissions carry either a bare scalar or a select option object
//! (`{"label": .., "value": ..}`); both read the same through these helpers.

use serde_json::{Map, Value};

fn unwrap_option(v: &Value) -> &Value {
    match v {
        Value::Object(map) => map.get("value").unwrap_or(v),
        _ => v,
    }
}

/// String form of a scalar, or of a select option's `value`.
#[must_use]
pub fn as_string(v: &Value) -> Option<String> {
    match unwrap_option(v) {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Boolean form of a scalar. Accepts `"true"`/`"false"` strings.
#[must_use]
pub fn as_bool(v: &Value) -> Option<bool> {
    match unwrap_option(v) {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[must_use]
pub fn string_value(values: Option<&Map<String, Value>>, name: &str) -> Option<String> {
    values.and_then(|m| m.get(name)).and_then(as_string)
}

#[must_use]
pub fn bool_value(values: Option<&Map<String, Value>>, name: &str) -> bool {
    values
        .and_then(|m| m.get(name))
        .and_then(as_bool)
        .unwrap_or(false)
}
