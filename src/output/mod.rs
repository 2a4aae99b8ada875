use serde::Serialize;
use serde_json::Value;

use crate::aggregator::Finding;
use crate::config::ConfigError;
use crate::executor::ParsedBody;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidOutputFormat {
                format: value.to_string(),
            }),
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct OutputRecord {
    pub url: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    pub not_json: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_header: Option<String>,
}

pub fn build_records(findings: &[Finding]) -> Vec<OutputRecord> {
    findings
        .iter()
        .map(|f| {
            let (json, raw) = match &f.body {
                ParsedBody::Json(v) => (Some(v.clone()), None),
                ParsedBody::Raw(t) => (None, Some(t.clone())),
            };
            OutputRecord {
                url: f.url.clone(),
                status: f.status,
                not_json: json.is_none(),
                json,
                raw,
                bypass_header: f
                    .bypass_header
                    .as_ref()
                    .map(|h| format!("{}: {}", h.name, h.value)),
            }
        })
        .collect()
}

/// Plain text block for one record, as printed to the console.
pub fn format_record(r: &OutputRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n[+] Working endpoint: {}\n", r.url));
    out.push_str(&format!("    Status code: {}\n", r.status));
    match r.json.as_ref() {
        Some(v) => out.push_str(&format!("    Response data: {}\n", v)),
        None => out.push_str("    Response is not in JSON format.\n"),
    }
    if let Some(h) = r.bypass_header.as_deref() {
        out.push_str(&format!("    Bypass header: {}\n", h));
    }
    out
}

pub fn render_text(records: &[OutputRecord]) -> Vec<u8> {
    let mut out = String::new();
    for r in records {
        out.push_str(&format_record(r));
    }
    out.into_bytes()
}

pub fn render_json(records: &[OutputRecord]) -> Vec<u8> {
    serde_json::to_vec_pretty(records).unwrap_or_else(|_| b"[]\n".to_vec())
}

pub fn render(records: &[OutputRecord], format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Text => render_text(records),
        OutputFormat::Json => render_json(records),
    }
}
