use super::UpstreamError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Entity state as returned by `GET /api/states/<entity_id>`.
///
/// Only `state` and `last_changed` feed the normalized output. Every field is
/// optional and tolerates the wrong JSON type, so a degraded payload still
/// projects as long as `last_changed` is usable.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawEntityState {
    #[serde(default, deserialize_with = "lenient_string")]
    pub entity_id: Option<String>,

    /// State token, e.g. "on" / "off" for an input_boolean
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,

    #[serde(default)]
    pub attributes: Value,

    #[serde(default, deserialize_with = "lenient_string")]
    pub last_changed: Option<String>,

    /// Upstream's own update time; replaced by the local observation time
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_updated: Option<String>,

    #[serde(default)]
    pub context: Value,
}

/// Reduced entity state served to clients and held by the cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedState {
    pub state: String,
    pub last_changed_utc: String,
    pub last_updated_utc: String,
}

impl RawEntityState {
    /// Parse a response body.
    ///
    /// Fails only when the body is not a JSON object; field-level problems
    /// degrade to `None`.
    pub fn from_body(body: &[u8]) -> Result<Self, UpstreamError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;

        if !value.is_object() {
            return Err(UpstreamError::Malformed(format!(
                "expected object, got {}",
                json_type_name(&value)
            )));
        }

        serde_json::from_value(value).map_err(|e| UpstreamError::Malformed(e.to_string()))
    }

    /// Project onto the client-facing shape.
    ///
    /// `observed_at` becomes `last_updated_utc`.
    pub fn normalize(&self, observed_at: DateTime<Utc>) -> Result<NormalizedState, UpstreamError> {
        let raw_changed = self.last_changed.as_deref().unwrap_or_default();
        let last_changed = DateTime::parse_from_rfc3339(raw_changed)
            .map_err(|_| UpstreamError::TimestampInvalid(raw_changed.to_string()))?
            .with_timezone(&Utc);

        Ok(NormalizedState {
            state: self.state.clone().unwrap_or_default(),
            last_changed_utc: format_utc(last_changed),
            last_updated_utc: format_utc(observed_at),
        })
    }
}

/// RFC3339 in UTC with a `Z` suffix and whole seconds.
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accept any JSON value, keeping it only when it is a string.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
