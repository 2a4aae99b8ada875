pub mod target;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use reqwest::Url;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::config::ConfigError;
use crate::executor::{AttemptResult, Executor, SkipReason};
use crate::headers::{HeaderMutator, MutationHeader};

pub use target::{is_safe_candidate, parse_method, Target};

pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct VariantResult {
    pub header: MutationHeader,
    pub result: AttemptResult,
}

/// Everything a worker learned about one candidate. Sent exactly once per
/// candidate resolved before cancellation.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeReport {
    pub candidate: String,
    pub url: Option<Url>,
    pub baseline: AttemptResult,
    pub variants: Vec<VariantResult>,
}

struct Shared {
    target: Target,
    mutator: HeaderMutator,
    executor: Executor,
    cancel: CancellationToken,
}

/// Bounded worker pool over a candidate list.
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    pub fn new(
        target: Target,
        mutator: HeaderMutator,
        executor: Executor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                target,
                mutator,
                executor,
                cancel,
            }),
        }
    }

    /// Start probing `candidates` with at most `concurrency` workers.
    ///
    /// Candidates are pulled lazily from the iterator as workers free up.
    /// The returned stream yields one report per resolved candidate in
    /// completion order and ends when every candidate is resolved, or once
    /// in-flight work drains after cancellation. Must be called from within
    /// a tokio runtime.
    pub fn run<I>(self, candidates: I, concurrency: usize) -> Result<ReportStream, ConfigError>
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        if concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency { value: concurrency });
        }

        let (job_tx, job_rx) = mpsc::channel::<String>(concurrency);
        let (result_tx, result_rx) = mpsc::channel::<ProbeReport>(concurrency.max(16));
        let job_rx = Arc::new(Mutex::new(job_rx));

        let feeder = task::spawn(
            send_candidates(job_tx, candidates.into_iter(), self.shared.cancel.clone())
                .in_current_span(),
        );

        let mut workers = Vec::with_capacity(concurrency);
        for id in 0..concurrency {
            workers.push(task::spawn(
                run_worker(id, job_rx.clone(), result_tx.clone(), self.shared.clone())
                    .in_current_span(),
            ));
        }
        drop(result_tx);

        let handle = task::spawn(async move {
            let _ = feeder.await;
            for w in workers {
                let _ = w.await;
            }
        });

        Ok(ReportStream {
            rx: result_rx,
            handle: Some(handle),
        })
    }
}

/// Reports in completion order. Not restartable: once drained it stays empty.
pub struct ReportStream {
    rx: mpsc::Receiver<ProbeReport>,
    handle: Option<JoinHandle<()>>,
}

impl ReportStream {
    /// Wait for the feeder and all workers to exit.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Stream for ReportStream {
    type Item = ProbeReport;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// feeds candidates into the work queue; stops submitting once cancelled
async fn send_candidates<I>(tx: mpsc::Sender<String>, candidates: I, cancel: CancellationToken)
where
    I: Iterator<Item = String>,
{
    for candidate in candidates {
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(candidate) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    tx: mpsc::Sender<ProbeReport>,
    shared: Arc<Shared>,
) {
    loop {
        let next = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(candidate) = next else {
            break;
        };
        if shared.cancel.is_cancelled() {
            break;
        }

        debug!(worker = id, candidate = %candidate, "probing");
        let Some(report) = probe(&shared, candidate).await else {
            continue;
        };
        // in-flight attempts finish after cancellation but are not reported
        if shared.cancel.is_cancelled() {
            debug!(worker = id, candidate = %report.candidate, "dropping report after cancellation");
            break;
        }
        if tx.send(report).await.is_err() {
            break;
        }
    }
}

// None when cancellation left the candidate unresolved
async fn probe(shared: &Shared, candidate: String) -> Option<ProbeReport> {
    let url = match shared.target.resolve(&candidate) {
        Some(url) => url,
        None => {
            warn!(candidate = %candidate, "skipping potentially unsafe entry");
            return Some(ProbeReport {
                candidate,
                url: None,
                baseline: AttemptResult::Skipped(SkipReason::UnsafeEntry),
                variants: Vec::new(),
            });
        }
    };

    let headers = shared.mutator.baseline(&mut rand::thread_rng());
    let baseline = shared
        .executor
        .execute(&shared.target.request(url.clone(), headers))
        .await?;

    let mut variants = Vec::new();
    for mutation in shared.mutator.variants(&candidate) {
        let headers = shared.mutator.variant(&mutation, &mut rand::thread_rng());
        let result = shared
            .executor
            .execute(&shared.target.request(url.clone(), headers))
            .await?;
        variants.push(VariantResult {
            header: mutation,
            result,
        });
    }

    Some(ProbeReport {
        candidate,
        url: Some(url),
        baseline,
        variants,
    })
}
