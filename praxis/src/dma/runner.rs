//! Concurrent fan-out of the three DMA evaluations.
//!
//! The runner spawns one task per DMA, waits for *all three* to resolve,
//! and aggregates their results into a [`DmaTriple`]. A shared cancellation
//! watch propagates pipeline cancellation into the in-flight calls; partial
//! results are discarded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::config::RetryConfig;
use crate::llm::{LlmClient, LlmError, ResourceUsage};

use super::common_sense::CommonSenseDma;
use super::domain::DomainDma;
use super::ethical::EthicalDma;
use super::{DmaError, DmaFailure, DmaInput, DmaTriple};

/// Runs the DMA triple for one thought.
#[derive(Clone, Debug)]
pub struct DmaRunner {
    retry: RetryConfig,
    call_timeout: Duration,
    max_tokens: u32,
}

impl DmaRunner {
    /// Build a runner with the engine's retry policy and call deadline.
    #[must_use]
    pub fn new(retry: RetryConfig, call_timeout: Duration, max_tokens: u32) -> Self {
        Self {
            retry,
            call_timeout,
            max_tokens,
        }
    }

    /// Fan out the three evaluations and await them as a group.
    ///
    /// Ordering within the triple is immaterial; results are aggregated as
    /// a set. If any DMA fails after bounded retries the whole evaluation
    /// fails with the collected errors.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::Cancelled`] when the cancellation watch fired,
    /// or [`DmaError::Evaluation`] carrying every DMA failure.
    #[instrument(skip_all, fields(thought_id = %input.thought.thought_id))]
    pub async fn run_triple(
        &self,
        input: Arc<DmaInput>,
        domain: Arc<DomainDma>,
        llm: Arc<dyn LlmClient>,
        cancel: watch::Receiver<bool>,
    ) -> Result<(DmaTriple, ResourceUsage), DmaError> {
        let ethical = self.spawn_dma(EthicalDma::NAME, cancel.clone(), {
            let input = Arc::clone(&input);
            let llm = Arc::clone(&llm);
            let retry = self.retry.clone();
            let max_tokens = self.max_tokens;
            move || async move {
                EthicalDma
                    .evaluate(&input, llm.as_ref(), &retry, max_tokens)
                    .await
            }
        });
        let common_sense = self.spawn_dma(CommonSenseDma::NAME, cancel.clone(), {
            let input = Arc::clone(&input);
            let llm = Arc::clone(&llm);
            let retry = self.retry.clone();
            let max_tokens = self.max_tokens;
            move || async move {
                CommonSenseDma
                    .evaluate(&input, llm.as_ref(), &retry, max_tokens)
                    .await
            }
        });
        let domain_handle = self.spawn_dma(DomainDma::NAME, cancel, {
            let input = Arc::clone(&input);
            let llm = Arc::clone(&llm);
            let retry = self.retry.clone();
            let max_tokens = self.max_tokens;
            move || async move {
                domain
                    .evaluate(&input, llm.as_ref(), &retry, max_tokens)
                    .await
            }
        });

        let (ethical_result, common_result, domain_result) =
            tokio::join!(ethical, common_sense, domain_handle);

        let mut failures = Vec::new();
        let mut usage = ResourceUsage::default();

        let ethical = collect(EthicalDma::NAME, ethical_result, &mut failures, &mut usage);
        let common_sense = collect(CommonSenseDma::NAME, common_result, &mut failures, &mut usage);
        let domain = collect(DomainDma::NAME, domain_result, &mut failures, &mut usage);

        if !failures.is_empty() {
            if failures
                .iter()
                .all(|f| matches!(f.source, LlmError::Cancelled))
            {
                return Err(DmaError::Cancelled);
            }
            return Err(DmaError::Evaluation { failures });
        }

        // All three are present when no failure was recorded.
        match (ethical, common_sense, domain) {
            (Some(ethical), Some(common_sense), Some(domain)) => Ok((
                DmaTriple {
                    ethical,
                    common_sense,
                    domain,
                },
                usage,
            )),
            _ => Err(DmaError::Cancelled),
        }
    }

    /// Spawn one DMA evaluation guarded by the deadline and the
    /// cancellation watch.
    fn spawn_dma<T, F, Fut>(
        &self,
        name: &'static str,
        mut cancel: watch::Receiver<bool>,
        work: F,
    ) -> JoinHandle<Result<(T, ResourceUsage), LlmError>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(T, ResourceUsage), LlmError>> + Send + 'static,
    {
        let timeout = self.call_timeout;
        tokio::spawn(async move {
            let cancelled = async move {
                // A dropped sender means the pipeline owner is gone but not
                // cancelling; park forever and let the work finish.
                if cancel.wait_for(|flag| *flag).await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            tokio::select! {
                () = cancelled => {
                    tracing::debug!(dma = name, "evaluation cancelled");
                    Err(LlmError::Cancelled)
                }
                result = tokio::time::timeout(timeout, work()) => {
                    result.map_err(|_| LlmError::Timeout(timeout))?
                }
            }
        })
    }
}

/// Fold one join result into the failure list and usage accumulator.
fn collect<T>(
    name: &'static str,
    joined: Result<Result<(T, ResourceUsage), LlmError>, tokio::task::JoinError>,
    failures: &mut Vec<DmaFailure>,
    usage: &mut ResourceUsage,
) -> Option<T> {
    match joined {
        Ok(Ok((value, call_usage))) => {
            usage.absorb(call_usage);
            Some(value)
        }
        Ok(Err(source)) => {
            failures.push(DmaFailure { dma: name, source });
            None
        }
        Err(join_error) => {
            failures.push(DmaFailure {
                dma: name,
                source: LlmError::Provider {
                    message: format!("evaluation task panicked: {join_error}"),
                    retryable: false,
                },
            });
            None
        }
    }
}
