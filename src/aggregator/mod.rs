use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::dispatch::ProbeReport;
use crate::executor::{AttemptResult, FailureKind, ParsedBody, SkipReason};
use crate::headers::MutationHeader;

/// Final classification of one candidate.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Working {
        status: u16,
        body: ParsedBody,
    },
    /// A single mutation header turned a negative baseline into access.
    Bypass {
        header: MutationHeader,
        baseline: AttemptResult,
        status: u16,
        body: ParsedBody,
    },
    Skipped(SkipReason),
    Failed(FailureKind),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub candidate: String,
    pub url: Option<String>,
    pub outcome: Outcome,
}

impl Resolved {
    /// The printable finding, if the candidate was Working or a Bypass.
    pub fn finding(&self) -> Option<Finding> {
        let url = self.url.clone()?;
        match &self.outcome {
            Outcome::Working { status, body } => Some(Finding {
                url,
                status: *status,
                body: body.clone(),
                bypass_header: None,
            }),
            Outcome::Bypass {
                header,
                status,
                body,
                ..
            } => Some(Finding {
                url,
                status: *status,
                body: body.clone(),
                bypass_header: Some(header.clone()),
            }),
            _ => None,
        }
    }
}

/// A Working or Bypass outcome in the shape consumers print and persist.
#[derive(Clone, Debug, PartialEq)]
pub struct Finding {
    pub url: String,
    pub status: u16,
    pub body: ParsedBody,
    pub bypass_header: Option<MutationHeader>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub checked: usize,
    pub working: usize,
    pub bypass: usize,
    pub not_found: usize,
    pub unsafe_entries: usize,
    pub failed: usize,
}

fn is_denied_status(status: u16) -> bool {
    status == 401 || status == 403
}

// does `variant` flip `baseline` from negative to positive
fn flips(baseline: &AttemptResult, variant: &AttemptResult) -> bool {
    match baseline {
        AttemptResult::Skipped(SkipReason::NotFound) | AttemptResult::Failed(_) => {
            variant.is_working()
        }
        AttemptResult::Working { status, .. } if is_denied_status(*status) => {
            matches!(variant.status(), Some(s) if (200..400).contains(&s))
        }
        _ => false,
    }
}

pub fn classify(report: &ProbeReport) -> Outcome {
    let bypass = report
        .variants
        .iter()
        .find(|v| flips(&report.baseline, &v.result));
    if let Some(variant) = bypass {
        if let AttemptResult::Working { status, body } = &variant.result {
            return Outcome::Bypass {
                header: variant.header.clone(),
                baseline: report.baseline.clone(),
                status: *status,
                body: body.clone(),
            };
        }
    }

    match &report.baseline {
        AttemptResult::Working { status, body } => Outcome::Working {
            status: *status,
            body: body.clone(),
        },
        AttemptResult::Skipped(reason) => Outcome::Skipped(*reason),
        AttemptResult::Failed(kind) => Outcome::Failed(kind.clone()),
    }
}

#[derive(Debug, Default)]
struct SessionState {
    resolved: Vec<Resolved>,
    seen: HashSet<String>,
    finalized: bool,
}

/// Append-only record of a run. Written only through an [`Aggregator`],
/// readable from anywhere at any time.
#[derive(Debug)]
pub struct ScanSession {
    context: RunContext,
    state: RwLock<SessionState>,
}

impl ScanSession {
    pub fn new(context: RunContext) -> Arc<Self> {
        Arc::new(Self {
            context,
            state: RwLock::new(SessionState::default()),
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    fn read<T>(&self, f: impl FnOnce(&SessionState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Candidates resolved so far.
    pub fn resolved(&self) -> usize {
        self.read(|s| s.resolved.len())
    }

    pub fn is_finalized(&self) -> bool {
        self.read(|s| s.finalized)
    }

    pub fn outcomes(&self) -> Vec<Resolved> {
        self.read(|s| s.resolved.clone())
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.read(|s| s.resolved.iter().filter_map(Resolved::finding).collect())
    }

    pub fn summary(&self) -> Summary {
        self.read(|s| {
            let mut out = Summary {
                checked: s.resolved.len(),
                ..Summary::default()
            };
            for r in s.resolved.iter() {
                match r.outcome {
                    Outcome::Working { .. } => out.working += 1,
                    Outcome::Bypass { .. } => {
                        out.working += 1;
                        out.bypass += 1;
                    }
                    Outcome::Skipped(SkipReason::NotFound) => out.not_found += 1,
                    Outcome::Skipped(SkipReason::UnsafeEntry) => out.unsafe_entries += 1,
                    Outcome::Failed(_) => out.failed += 1,
                }
            }
            out
        })
    }
}

/// The single writer of a [`ScanSession`].
pub struct Aggregator {
    session: Arc<ScanSession>,
    cancel: Option<CancellationToken>,
}

impl Aggregator {
    pub fn new(session: Arc<ScanSession>) -> Self {
        Self {
            session,
            cancel: None,
        }
    }

    /// Stop recording once `cancel` fires. Reports still queued at that
    /// point are dropped.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn session(&self) -> Arc<ScanSession> {
        self.session.clone()
    }

    /// Classify and store a report. Returns `None` for a repeated candidate
    /// or after cancellation; either way the report is dropped.
    pub fn record(&mut self, report: ProbeReport) -> Option<Resolved> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            debug!(candidate = %report.candidate, "dropping report after cancellation");
            return None;
        }
        let outcome = classify(&report);
        let resolved = Resolved {
            candidate: report.candidate,
            url: report.url.map(|u| u.to_string()),
            outcome,
        };

        let inserted = self.session.write(|s| {
            if s.finalized || !s.seen.insert(resolved.candidate.clone()) {
                return false;
            }
            s.resolved.push(resolved.clone());
            true
        });
        if !inserted {
            warn!(candidate = %resolved.candidate, "dropping duplicate result");
            return None;
        }

        let url = resolved.url.as_deref().unwrap_or(resolved.candidate.as_str());
        match &resolved.outcome {
            Outcome::Bypass { header, status, .. } => {
                warn!(url, header = %header.name, value = %header.value, status, "bypass candidate")
            }
            Outcome::Working { status, .. } => info!(url, status, "working endpoint"),
            Outcome::Skipped(reason) => debug!(url, %reason, "skipped"),
            Outcome::Failed(kind) => debug!(url, %kind, "failed after retries"),
        }
        Some(resolved)
    }

    pub fn finalize(self) -> Arc<ScanSession> {
        self.session.write(|s| s.finalized = true);
        self.session
    }

    /// Drain `reports`, calling `on_resolved` for every recorded candidate,
    /// then finalize the session.
    pub async fn consume<S, F>(mut self, reports: S, mut on_resolved: F) -> Arc<ScanSession>
    where
        S: Stream<Item = ProbeReport>,
        F: FnMut(&Resolved),
    {
        futures::pin_mut!(reports);
        while let Some(report) = reports.next().await {
            if let Some(resolved) = self.record(report) {
                on_resolved(&resolved);
            }
        }
        self.finalize()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dispatch::VariantResult;

    fn working(status: u16, body: &str) -> AttemptResult {
        AttemptResult::Working {
            status,
            body: ParsedBody::parse(body.to_string()),
        }
    }

    fn header(name: &str, value: &str) -> MutationHeader {
        MutationHeader {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn report(candidate: &str, baseline: AttemptResult, variants: Vec<VariantResult>) -> ProbeReport {
        ProbeReport {
            candidate: candidate.to_string(),
            url: Some(format!("http://t.test/{candidate}").parse().unwrap()),
            baseline,
            variants,
        }
    }

    #[test]
    fn forbidden_baseline_flipped_by_header_is_bypass() {
        let r = report(
            "admin",
            working(403, "forbidden"),
            vec![
                VariantResult {
                    header: header("X-Real-IP", "127.0.0.1"),
                    result: working(403, "forbidden"),
                },
                VariantResult {
                    header: header("X-Forwarded-For", "127.0.0.1"),
                    result: working(200, r#"{"admin":true}"#),
                },
            ],
        );
        match classify(&r) {
            Outcome::Bypass {
                header,
                baseline,
                status,
                body,
            } => {
                assert_eq!(header.name, "X-Forwarded-For");
                assert_eq!(baseline.status(), Some(403));
                assert_eq!(status, 200);
                assert_eq!(body, ParsedBody::Json(json!({"admin": true})));
            }
            other => panic!("expected bypass, got {other:?}"),
        }
    }

    #[test]
    fn not_found_baseline_flipped_by_any_working_variant() {
        let r = report(
            "internal",
            AttemptResult::Skipped(SkipReason::NotFound),
            vec![VariantResult {
                header: header("X-Original-URL", "/internal"),
                result: working(500, "boom"),
            }],
        );
        assert!(matches!(classify(&r), Outcome::Bypass { status: 500, .. }));
    }

    #[test]
    fn open_baseline_is_plain_working() {
        let r = report(
            "users",
            working(200, "[]"),
            vec![VariantResult {
                header: header("X-Forwarded-For", "127.0.0.1"),
                result: working(200, "[]"),
            }],
        );
        assert!(matches!(classify(&r), Outcome::Working { status: 200, .. }));
    }

    #[test]
    fn forbidden_variant_does_not_flip_forbidden_baseline() {
        let r = report(
            "admin",
            working(401, ""),
            vec![VariantResult {
                header: header("X-Client-IP", "127.0.0.1"),
                result: working(403, ""),
            }],
        );
        assert!(matches!(classify(&r), Outcome::Working { status: 401, .. }));
    }

    #[test]
    fn session_counts_and_filters() {
        let session = ScanSession::new(RunContext::new());
        let mut agg = Aggregator::new(session.clone());
        agg.record(report("a", working(200, "ok"), vec![]));
        agg.record(report("b", AttemptResult::Skipped(SkipReason::NotFound), vec![]));
        agg.record(report("c", AttemptResult::Failed(FailureKind::Timeout), vec![]));
        agg.record(ProbeReport {
            candidate: "../x".into(),
            url: None,
            baseline: AttemptResult::Skipped(SkipReason::UnsafeEntry),
            variants: vec![],
        });
        assert!(agg.record(report("a", working(200, "again"), vec![])).is_none());

        assert_eq!(session.resolved(), 4);
        let findings = session.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].url, "http://t.test/a");
        assert_eq!(findings[0].body, ParsedBody::Raw("ok".into()));
        assert_eq!(
            session.summary(),
            Summary {
                checked: 4,
                working: 1,
                bypass: 0,
                not_found: 1,
                unsafe_entries: 1,
                failed: 1,
            }
        );

        let session = agg.finalize();
        assert!(session.is_finalized());
    }

    #[tokio::test]
    async fn consume_ticks_once_per_report() {
        let reports = futures::stream::iter(vec![
            report("a", working(200, ""), vec![]),
            report("b", working(302, ""), vec![]),
        ]);
        let mut ticks = 0;
        let session = Aggregator::new(ScanSession::new(RunContext::new()))
            .consume(reports, |_| ticks += 1)
            .await;
        assert_eq!(ticks, 2);
        assert!(session.is_finalized());
        assert_eq!(session.summary().working, 2);
    }
}
