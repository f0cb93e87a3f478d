//! The upstream fetch fabric: rate-limited, circuit-broken, priority-scheduled
//! access to the external chain indexer.

pub mod circuit_breaker;
pub mod client;
pub mod queue;
pub mod token_bucket;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;

use crate::error::AppError;
use crate::model::Address;

use client::{UpstreamAccount, UpstreamClient, UpstreamTransfer, UpstreamTransferPage};
use queue::{Priority, PriorityQueue};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(250);

fn is_retryable(err: &AppError) -> bool {
    matches!(
        err,
        AppError::UpstreamUnavailable { .. } | AppError::RateLimited { .. }
    )
}

enum Job {
    Account {
        address: Address,
        reply: oneshot::Sender<Result<Option<UpstreamAccount>, AppError>>,
    },
    Transfers {
        address: Address,
        page_token: Option<String>,
        reply: oneshot::Sender<Result<UpstreamTransferPage, AppError>>,
    },
    Relationships {
        address: Address,
        reply: oneshot::Sender<Result<Vec<UpstreamTransfer>, AppError>>,
    },
}

/// The priority-scheduled facade the rest of the service talks to. Internally
/// every call is enqueued at its declared priority and drained by a single
/// background worker, per §4.4 and the backpressure rules of §5.
pub struct UpstreamService {
    client: Arc<UpstreamClient>,
    queue: Arc<PriorityQueue<Job>>,
}

impl UpstreamService {
    pub fn new(client: UpstreamClient) -> Arc<Self> {
        let service = Arc::new(Self {
            client: Arc::new(client),
            queue: Arc::new(PriorityQueue::new()),
        });
        service.clone().spawn_worker();
        service
    }

    fn spawn_worker(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let Some(guard) = self.queue.try_start_draining() else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                };
                loop {
                    match self.queue.next() {
                        Some(job) => self.run_job(job).await,
                        None => break,
                    }
                }
                drop(guard);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
    }

    async fn run_job(&self, job: Job) {
        match job {
            Job::Account { address, reply } => {
                let result = self.retrying(Priority::High, |p| {
                    let client = self.client.clone();
                    let address = address.clone();
                    async move { client.get_account(&address, p).await }
                }).await;
                let _ = reply.send(result);
            },
            Job::Transfers { address, page_token, reply } => {
                let result = self.retrying(Priority::Medium, |p| {
                    let client = self.client.clone();
                    let address = address.clone();
                    let page_token = page_token.clone();
                    async move { client.get_transfers(&address, page_token.as_deref(), p).await }
                }).await;
                let _ = reply.send(result);
            },
            Job::Relationships { address, reply } => {
                let result = self.retrying(Priority::Medium, |p| {
                    let client = self.client.clone();
                    let address = address.clone();
                    async move { client.get_relationships(&address, p).await }
                }).await;
                let _ = reply.send(result);
            },
        }
    }

    /// Retries a call up to [`MAX_RETRY_ATTEMPTS`] times with full jitter backoff,
    /// as specified: `baseDelay * 2^attempt * (1 + U[0,0.3])`.
    async fn retrying<T, F, Fut>(&self, priority: Priority, f: F) -> Result<T, AppError>
    where
        F: Fn(Priority) -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 0;
        loop {
            match f(priority).await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < MAX_RETRY_ATTEMPTS && is_retryable(&e) => {
                    let jitter = rand::thread_rng().gen_range(0.0..0.3);
                    let delay = BASE_RETRY_DELAY.mul_f64(2f64.powi(attempt as i32) * (1.0 + jitter));
                    tracing::warn!(attempt, ?delay, error = ?e, "retrying upstream call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_account(&self, address: &Address) -> Result<Option<UpstreamAccount>, AppError> {
        let (tx, rx) = oneshot::channel();
        self.queue.add(
            Job::Account { address: address.clone(), reply: tx },
            Priority::High,
        );
        rx.await.map_err(|_| AppError::Internal)?
    }

    pub async fn get_transfers(
        &self,
        address: &Address,
        page_token: Option<&str>,
    ) -> Result<UpstreamTransferPage, AppError> {
        let (tx, rx) = oneshot::channel();
        self.queue.add(
            Job::Transfers {
                address: address.clone(),
                page_token: page_token.map(str::to_owned),
                reply: tx,
            },
            Priority::Medium,
        );
        rx.await.map_err(|_| AppError::Internal)?
    }

    /// Derives relationships from two bounded transfer scans (sent + received),
    /// aggregated by counterparty. Tolerates partial failure: if only one
    /// direction succeeds, returns what's available rather than failing outright.
    pub async fn get_relationships(&self, address: &Address) -> Result<Vec<UpstreamTransfer>, AppError> {
        let (tx, rx) = oneshot::channel();
        self.queue.add(
            Job::Relationships { address: address.clone(), reply: tx },
            Priority::Medium,
        );
        rx.await.map_err(|_| AppError::Internal)?
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Backpressure per §5: shed LOW first, then hold MEDIUM briefly, then drop it too.
    pub fn shed_if_overloaded(&self, bound: usize) {
        if self.queue.len() <= bound {
            return;
        }
        let dropped_low = self.queue.drop_class(Priority::Low);
        if dropped_low > 0 {
            tracing::warn!(dropped_low, "upstream queue over bound, shed LOW priority jobs");
        }
        if self.queue.len() > bound {
            let dropped_medium = self.queue.drop_class(Priority::Medium);
            tracing::warn!(dropped_medium, "upstream queue still over bound, shed MEDIUM priority jobs");
        }
    }
}
