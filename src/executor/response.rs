use serde_json::Value;

/// Response body as the scan reports it. A body that is not valid JSON is
/// kept verbatim as `Raw`; that is the "not JSON" marker, never an error.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedBody {
    Json(Value),
    Raw(String),
}

impl ParsedBody {
    pub fn parse(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => ParsedBody::Json(value),
            Err(_) => ParsedBody::Raw(text),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, ParsedBody::Json(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ParsedBody::Json(v) => Some(v),
            ParsedBody::Raw(_) => None,
        }
    }

    pub fn raw_text(&self) -> Option<&str> {
        match self {
            ParsedBody::Json(_) => None,
            ParsedBody::Raw(t) => Some(t.as_str()),
        }
    }
}

/// Parse a `Retry-After` value given in delta-seconds. HTTP-date values are
/// not interpreted and fall back to the caller's default.
pub fn parse_retry_after_secs(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
