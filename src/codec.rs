/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The script payload wire codec (spec §4.1). Two generations of shape
//! exist on the wire; v2 is preferred for reads, v1 is used for all writes
//! for cross-client compatibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{ParsedScript, ScriptConfig, ScriptRecord};
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PropsV2 {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "lastUpdated")]
    last_updated: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PayloadV2 {
    version: u32,
    #[serde(default)]
    custom: Option<Value>,
    #[serde(default)]
    config: ScriptConfig,
    #[serde(default)]
    props: PropsV2,
    code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MoreV1 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    update: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "lastUpdated")]
    last_updated: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PayloadV1 {
    version: u32,
    more: MoreV1,
    code: String,
}

/// Serializes a local script as a v2 payload. Used for reference/testing —
/// the core only ever *writes* v1 for compatibility (see
/// [`to_v1_bytes`]), but v2 is what a well-behaved peer emits and what we
/// prefer to read.
pub fn to_v2_bytes(script: &ScriptRecord) -> Vec<u8> {
    let payload = PayloadV2 {
        version: 2,
        custom: Some(script.custom.clone()),
        config: script.config.clone(),
        props: PropsV2 {
            last_updated: script.last_modified,
        },
        code: script.code.clone(),
    };
    serde_json::to_vec(&payload).expect("payload serialization cannot fail")
}

/// Serializes a local script as the legacy v1 shape (spec §4.1). All
/// uploads use this shape.
pub fn to_v1_bytes(script: &ScriptRecord) -> Vec<u8> {
    let payload = PayloadV1 {
        version: 1,
        more: MoreV1 {
            custom: Some(script.custom.clone()),
            enabled: script.config.enabled,
            update: script.config.should_update,
            last_updated: script.last_modified,
        },
        code: script.code.clone(),
    };
    serde_json::to_vec(&payload).expect("payload serialization cannot fail")
}

/// Parses a remote script blob. If the JSON doesn't parse at all, the
/// entire blob is treated as `code` (spec §4.1 — "lets the reconciler
/// still import foreign content").
pub fn parse_script_data(bytes: &[u8]) -> ParsedScript {
    let text = String::from_utf8_lossy(bytes).into_owned();
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => parse_value(value, &text),
        Err(_) => ParsedScript {
            code: text,
            ..Default::default()
        },
    }
}

fn parse_value(value: Value, fallback_code: &str) -> ParsedScript {
    let version = value.get("version").and_then(Value::as_u64);
    match version {
        Some(2) => match serde_json::from_value::<PayloadV2>(value) {
            Ok(v2) => ParsedScript {
                custom: v2.custom,
                config: v2.config,
                last_modified: v2.props.last_updated,
                position: None,
                code: v2.code,
            },
            Err(_) => ParsedScript {
                code: fallback_code.to_string(),
                ..Default::default()
            },
        },
        Some(1) | None => match serde_json::from_value::<PayloadV1>(value) {
            Ok(v1) => ParsedScript {
                custom: v1.more.custom,
                config: ScriptConfig {
                    enabled: v1.more.enabled,
                    should_update: v1.more.update,
                    extra: Default::default(),
                },
                last_modified: v1.more.last_updated,
                position: None,
                code: v1.code,
            },
            Err(_) => ParsedScript {
                code: fallback_code.to_string(),
                ..Default::default()
            },
        },
        Some(_) => ParsedScript {
            code: fallback_code.to_string(),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptConfig;

    fn sample() -> ScriptRecord {
        ScriptRecord {
            id: 1,
            uri: "https://example.com/a.user.js".into(),
            last_modified: Some(Timestamp(1_000)),
            position: 3,
            custom: serde_json::json!({"origin": "store"}),
            config: ScriptConfig {
                enabled: Some(true),
                should_update: Some(false),
                extra: Default::default(),
            },
            code: "// hello".into(),
        }
    }

    #[test]
    fn v1_roundtrip_restores_named_fields() {
        let script = sample();
        let bytes = to_v1_bytes(&script);
        let parsed = parse_script_data(&bytes);
        assert_eq!(parsed.custom, Some(script.custom));
        assert_eq!(parsed.config.enabled, Some(true));
        assert_eq!(parsed.config.should_update, Some(false));
        assert_eq!(parsed.last_modified, script.last_modified);
        assert_eq!(parsed.code, script.code);
    }

    #[test]
    fn v2_roundtrip_restores_named_fields() {
        let script = sample();
        let bytes = to_v2_bytes(&script);
        let parsed = parse_script_data(&bytes);
        assert_eq!(parsed.custom, Some(script.custom));
        assert_eq!(parsed.config.enabled, Some(true));
        assert_eq!(parsed.config.should_update, Some(false));
        assert_eq!(parsed.last_modified, script.last_modified);
        assert_eq!(parsed.code, script.code);
    }

    #[test]
    fn unparseable_json_falls_back_to_code_only() {
        let bytes = b"not json at all {{{";
        let parsed = parse_script_data(bytes);
        assert_eq!(parsed.code, "not json at all {{{");
        assert!(parsed.custom.is_none());
    }

    #[test]
    fn nullish_more_keys_are_dropped_not_defaulted() {
        let bytes = br#"{"version":1,"more":{},"code":"x"}"#;
        let parsed = parse_script_data(bytes);
        assert!(parsed.config.enabled.is_none());
        assert!(parsed.config.should_update.is_none());
        assert!(parsed.custom.is_none());
        assert!(parsed.last_modified.is_none());
    }
}
