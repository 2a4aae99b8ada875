use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reqwest::Method;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, Outcome, ScanSession};
use crate::config::ConfigError;
use crate::context::RunContext;
use crate::dispatch::{Pool, ProbeReport, Target};
use crate::executor::{
    AttemptResult, Executor, ParsedBody, ProbeRequest, RawResponse, RetryPolicy, SkipReason,
    Transport, TransportError,
};
use crate::headers::{AuthContext, HeaderMutator};
use crate::limiter::RateLimiter;
use crate::runner::{Options, Runner, WordlistSource};

type Handler = dyn Fn(&ProbeRequest, usize) -> Result<RawResponse, TransportError> + Send + Sync;

/// Answers from a closure and records every request path it saw.
struct MockTransport {
    handler: Box<Handler>,
    delay: Duration,
    calls: AtomicUsize,
    paths: Mutex<Vec<String>>,
}

impl MockTransport {
    fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ProbeRequest, usize) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Self::delayed(Duration::ZERO, handler)
    }

    fn delayed<F>(delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&ProbeRequest, usize) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay,
            calls: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn send<'a>(
        &'a self,
        request: &'a ProbeRequest,
    ) -> BoxFuture<'a, Result<RawResponse, TransportError>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.paths.lock().unwrap().push(request.url.path().to_string());
        let out = (self.handler)(request, n);
        let delay = self.delay;
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            out
        }
        .boxed()
    }
}

fn respond(status: u16, body: &str) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
        status,
        retry_after: None,
        body: body.to_string(),
    })
}

fn pool(transport: Arc<MockTransport>, mutate: bool, cancel: CancellationToken) -> Pool {
    let target = Target::new("http://api.test/api", Method::GET, Duration::from_secs(3)).unwrap();
    let mutator = HeaderMutator::new(AuthContext::default(), Vec::new(), mutate, false, None);
    let executor = Executor::new(
        transport,
        Arc::new(RateLimiter::new(1000.0).unwrap()),
        RetryPolicy::default(),
        cancel.clone(),
    );
    Pool::new(target, mutator, executor, cancel)
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

async fn collect(pool: Pool, candidates: Vec<String>, concurrency: usize) -> Vec<ProbeReport> {
    let stream = pool.run(candidates, concurrency).unwrap();
    stream.collect().await
}

#[tokio::test(start_paused = true)]
async fn unsafe_candidates_never_reach_transport() {
    let transport = MockTransport::new(|_, _| respond(200, "{}"));
    let reports = collect(
        pool(transport.clone(), false, CancellationToken::new()),
        words(&["../etc/passwd", "/root", "a\\b", "users"]),
        2,
    )
    .await;

    assert_eq!(reports.len(), 4);
    assert_eq!(transport.paths(), vec!["/api/users"]);
    let skipped = reports
        .iter()
        .filter(|r| r.baseline == AttemptResult::Skipped(SkipReason::UnsafeEntry))
        .count();
    assert_eq!(skipped, 3);
}

#[tokio::test(start_paused = true)]
async fn one_report_per_candidate_with_every_variant() {
    let transport = MockTransport::new(|_, _| respond(404, ""));
    let candidates: Vec<String> = (0..25).map(|i| format!("route{i}")).collect();
    let reports = collect(
        pool(transport.clone(), true, CancellationToken::new()),
        candidates.clone(),
        4,
    )
    .await;

    assert_eq!(reports.len(), candidates.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    for r in reports.iter() {
        *seen.entry(r.candidate.clone()).or_default() += 1;
        assert_eq!(r.variants.len(), 10);
    }
    assert!(seen.values().all(|&n| n == 1));
    assert_eq!(transport.calls(), 25 * 11);
}

#[tokio::test(start_paused = true)]
async fn forwarded_for_header_bypasses_forbidden_admin() {
    let transport = MockTransport::new(|req, _| match req.url.path() {
        "/api/admin" if req.headers.get("X-Forwarded-For") == Some("127.0.0.1") => {
            respond(200, r#"{"admin":true}"#)
        }
        "/api/admin" => respond(403, "forbidden"),
        "/api/users" => respond(200, "[]"),
        _ => respond(404, ""),
    });
    let reports = pool(transport, true, CancellationToken::new())
        .run(words(&["admin", "users", "missing"]), 3)
        .unwrap();
    let session = Aggregator::new(ScanSession::new(RunContext::new()))
        .consume(reports, |_| {})
        .await;

    let admin = session
        .outcomes()
        .into_iter()
        .find(|r| r.candidate == "admin")
        .unwrap();
    match admin.outcome {
        Outcome::Bypass {
            header,
            baseline,
            status,
            body,
        } => {
            assert_eq!(header.name, "X-Forwarded-For");
            assert_eq!(header.value, "127.0.0.1");
            assert_eq!(baseline.status(), Some(403));
            assert_eq!(status, 200);
            assert_eq!(body, ParsedBody::Json(json!({"admin": true})));
        }
        other => panic!("expected bypass, got {other:?}"),
    }

    let summary = session.summary();
    assert_eq!(summary.checked, 3);
    assert_eq!(summary.working, 2);
    assert_eq!(summary.bypass, 1);
    assert_eq!(summary.not_found, 1);
    assert_eq!(session.findings().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_after_k_resolved_yields_k_reports() {
    const K: usize = 4;
    let cancel = CancellationToken::new();
    let transport = MockTransport::new({
        let cancel = cancel.clone();
        move |_, n| {
            if n > K {
                cancel.cancel();
                return Err(TransportError::Connection("reset".to_string()));
            }
            respond(200, "ok")
        }
    });
    let candidates: Vec<String> = (0..20).map(|i| format!("c{i}")).collect();

    let reports = tokio::time::timeout(
        Duration::from_secs(3),
        collect(pool(transport.clone(), false, cancel.clone()), candidates, 1),
    )
    .await
    .expect("run did not stop within one timeout interval");

    assert!(cancel.is_cancelled());
    assert_eq!(reports.len(), K);
    assert_eq!(transport.calls(), K + 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_with_busy_workers_drops_in_flight_results() {
    const K: usize = 4;
    let cancel = CancellationToken::new();
    let transport = MockTransport::delayed(Duration::from_millis(100), |_, _| respond(200, "ok"));
    let candidates: Vec<String> = (0..20).map(|i| format!("c{i}")).collect();

    let reports = pool(transport, false, cancel.clone())
        .run(candidates, 4)
        .unwrap();
    let mut seen = 0;
    let session = Aggregator::new(ScanSession::new(RunContext::new()))
        .with_cancel(cancel.clone())
        .consume(reports, |_| {
            seen += 1;
            if seen == K {
                cancel.cancel();
            }
        })
        .await;

    assert_eq!(seen, K);
    assert_eq!(session.resolved(), K);
    assert!(session.is_finalized());
}

#[tokio::test(start_paused = true)]
async fn runner_cancelled_from_callback_keeps_exactly_k_outcomes() {
    const K: usize = 3;
    let transport = MockTransport::delayed(Duration::from_millis(100), |_, _| respond(200, "{}"));
    let runner = Runner::new(Options {
        url: "http://api.test/".to_string(),
        wordlist: WordlistSource::Inline((0..30).map(|i| format!("r{i}")).collect()),
        concurrency: 5,
        rate: 100.0,
        ..Options::default()
    })
    .unwrap()
    .with_transport(transport);
    let cancel = runner.cancel_token();

    let mut seen = 0;
    let result = runner
        .run_candidates(runner.load_candidates().await.unwrap(), |_| {
            seen += 1;
            if seen == K {
                cancel.cancel();
            }
        })
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(seen, K);
    assert_eq!(result.summary.checked, K);
    assert_eq!(result.outcomes.len(), K);
}

#[tokio::test]
async fn pool_rejects_zero_workers() {
    let transport = MockTransport::new(|_, _| respond(200, ""));
    let err = pool(transport, false, CancellationToken::new())
        .run(words(&["users"]), 0)
        .err()
        .unwrap();
    assert_eq!(err, ConfigError::InvalidConcurrency { value: 0 });
}

#[tokio::test(start_paused = true)]
async fn runner_scans_inline_wordlist_through_custom_transport() {
    let transport = MockTransport::new(|req, _| match req.url.path() {
        "/v1/users" => respond(200, r#"{"users":[]}"#),
        "/v1/health" => respond(200, "OK"),
        _ => respond(404, ""),
    });
    let runner = Runner::new(Options {
        url: "http://api.test/v1".to_string(),
        wordlist: WordlistSource::Inline(words(&["users", "health", "nope", "users", "../x"])),
        token: Some("abc".to_string()),
        ..Options::default()
    })
    .unwrap()
    .with_transport(transport.clone());

    let result = runner.run().await.unwrap();

    assert!(!result.cancelled);
    assert_eq!(result.total_candidates, 4);
    assert_eq!(result.summary.checked, 4);
    assert_eq!(result.summary.working, 2);
    assert_eq!(result.summary.not_found, 1);
    assert_eq!(result.summary.unsafe_entries, 1);
    assert_eq!(transport.calls(), 3);

    let users = result
        .findings
        .iter()
        .find(|f| f.url == "http://api.test/v1/users")
        .unwrap();
    assert!(users.body.is_json());
    let health = result
        .findings
        .iter()
        .find(|f| f.url.ends_with("/health"))
        .unwrap();
    assert_eq!(health.body, ParsedBody::Raw("OK".to_string()));
}

#[tokio::test(start_paused = true)]
async fn runner_sends_auth_headers() {
    let transport = MockTransport::new(|req, _| {
        let authed = req.headers.get("Authorization") == Some("Token s3cret")
            && req.headers.get("X-API-Key") == Some("k1");
        if authed {
            respond(200, "{}")
        } else {
            respond(401, "")
        }
    });
    let runner = Runner::new(Options {
        url: "http://api.test/".to_string(),
        wordlist: WordlistSource::Inline(words(&["me"])),
        token: Some("s3cret".to_string()),
        token_type: Some("Token".to_string()),
        api_key: Some("k1".to_string()),
        ..Options::default()
    })
    .unwrap()
    .with_transport(transport);

    let result = runner.run().await.unwrap();
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].status, 200);
}
