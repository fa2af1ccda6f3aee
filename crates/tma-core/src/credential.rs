use serde_json::{json, Map, Value};

use crate::{errors::Error, Result};

/// Canonical client identity fields.
///
/// Callers supply these under two historical naming schemes
/// (`app_id`/`api_id` and friends); [`normalize`] reconciles them before
/// any network work happens, and [`ApiCredential::to_api_json`] emits
/// both aliases again for downstream consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiCredential {
    pub api_id: i32,
    pub api_hash: String,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub lang_code: String,
    pub system_lang_code: String,
    pub lang_pack: String,
}

/// Normalize a loosely-keyed credential mapping. Pure function, no I/O.
pub fn normalize(raw: &Value) -> Result<ApiCredential> {
    let map = raw
        .as_object()
        .ok_or_else(|| Error::Validation("apiJson must be a JSON object".to_string()))?;

    let api_id = parse_api_id(&alias(map, "app_id", "api_id")?)?;
    let api_hash = string_field(&alias(map, "app_hash", "api_hash")?)?;
    let device_model = string_field(&alias(map, "device", "device_model")?)?;

    let system_version = match map.get("system_version") {
        Some(v) => string_field(v)?,
        None => String::new(),
    };

    let app_version = required_string(map, "app_version")?;
    let system_lang_code = required_string(map, "system_lang_code")?;
    let lang_pack = required_string(map, "lang_pack")?;

    let lang_code = match map.get("lang_code") {
        Some(v) => string_field(v)?,
        None => system_lang_code.clone(),
    };

    Ok(ApiCredential {
        api_id,
        api_hash,
        device_model,
        system_version,
        app_version,
        lang_code,
        system_lang_code,
        lang_pack,
    })
}

/// Parse the `apiJson` wire field: a JSON-encoded string, not a nested
/// object.
pub fn parse_api_json(s: &str) -> Result<ApiCredential> {
    let value: Value = serde_json::from_str(s)
        .map_err(|e| Error::Validation(format!("apiJson is not valid JSON: {e}")))?;
    normalize(&value)
}

impl ApiCredential {
    /// Re-serialize with both key aliases populated identically.
    pub fn to_api_json(&self) -> Value {
        json!({
            "api_id": self.api_id,
            "app_id": self.api_id,
            "api_hash": self.api_hash,
            "app_hash": self.api_hash,
            "device_model": self.device_model,
            "device": self.device_model,
            "system_version": self.system_version,
            "app_version": self.app_version,
            "lang_code": self.lang_code,
            "system_lang_code": self.system_lang_code,
            "lang_pack": self.lang_pack,
        })
    }
}

/// Exactly one of the two aliases must be present.
fn alias(map: &Map<String, Value>, a: &str, b: &str) -> Result<Value> {
    map.get(a)
        .or_else(|| map.get(b))
        .cloned()
        .ok_or_else(|| Error::Validation(format!("apiJson is missing {a}/{b}")))
}

fn required_string(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(v) => string_field(v),
        None => Err(Error::Validation(format!("apiJson is missing {key}"))),
    }
}

fn string_field(v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(Error::Validation(format!(
            "apiJson field has unsupported type: {other}"
        ))),
    }
}

fn parse_api_id(v: &Value) -> Result<i32> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| Error::Validation(format!("api_id out of range: {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<i32>()
            .map_err(|_| Error::Validation(format!("api_id is not an integer: {s}"))),
        other => Err(Error::Validation(format!(
            "api_id has unsupported type: {other}"
        ))),
    }
}
