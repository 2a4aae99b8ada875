use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

pub const TOOL_NAME: &str = "routehound";
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identity of a single scan run. Built once at startup and handed to every
/// component that logs or reports, so nothing depends on process globals.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub tool: &'static str,
    pub version: &'static str,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            tool: TOOL_NAME,
            version: TOOL_VERSION,
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    pub fn started_at_utc(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// The span every scan log line is emitted under.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "scan",
            tool = self.tool,
            version = self.version,
            session = %self.session_id,
        )
    }

    pub fn header_line(&self) -> String {
        format!(
            "{} v{} | Session: {} | UTC: {}",
            self.tool,
            self.version,
            self.session_id,
            self.started_at_utc()
        )
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
