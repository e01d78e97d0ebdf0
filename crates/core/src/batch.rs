use crate::error::IngestError;
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs page-level work in sequential batches of at most `batch_size` items.
/// Pages inside a batch run concurrently; batch N+1 does not start until
/// every worker of batch N has finished, which bounds how many external
/// processes are alive at once.
#[derive(Debug, Clone, Copy)]
pub struct BatchProcessor {
    batch_size: usize,
}

impl BatchProcessor {
    pub fn new(batch_size: usize) -> Result<Self, IngestError> {
        if batch_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { batch_size })
    }

    /// Processes `items` and returns one string per item, indexed by the
    /// item's original position regardless of completion order. A worker
    /// failure leaves an empty string in that slot; cancellation is observed
    /// between batches, never mid-batch.
    pub async fn run<T, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        worker: F,
    ) -> Result<Vec<String>, IngestError>
    where
        T: Send + 'static,
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<String, IngestError>> + Send + 'static,
    {
        let total = items.len();
        let mut results = vec![String::new(); total];
        let mut remaining = items.into_iter().enumerate();

        loop {
            let batch: Vec<(usize, T)> = remaining.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let batch_start = batch[0].0;
            debug!(
                from = batch_start + 1,
                to = batch_start + batch.len(),
                total,
                "processing page batch"
            );

            let mut workers = JoinSet::new();
            for (index, item) in batch {
                let work = worker(index, item);
                workers.spawn(async move { (index, work.await) });
            }

            while let Some(joined) = workers.join_next().await {
                let (index, outcome) =
                    joined.map_err(|error| IngestError::Extraction(error.to_string()))?;
                match outcome {
                    Ok(text) => results[index] = text,
                    Err(error) => {
                        warn!(page = index + 1, %error, "page extraction failed, substituting empty text");
                    }
                }
            }
        }

        Ok(results)
    }
}
