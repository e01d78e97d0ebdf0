use crate::error::StoreError;
use crate::models::{DocumentMetadata, RunnerOptions};
use crate::pipeline::DocumentPipeline;
use crate::traits::{LockService, PendingStore, VectorStore};
use std::path::Path;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub processed: usize,
    pub skipped_locked: usize,
    pub failed: usize,
}

/// Background worker draining the pending-document queue. One document is
/// processed under a named lease keyed by its name; failures leave the
/// pending entry (and the lease, until its TTL expires) in place so the next
/// run retries.
pub struct IngestionRunner {
    pipeline: DocumentPipeline,
    pending: Arc<dyn PendingStore>,
    vectors: Arc<dyn VectorStore>,
    locks: Arc<dyn LockService>,
    options: RunnerOptions,
}

impl IngestionRunner {
    pub fn new(
        pipeline: DocumentPipeline,
        pending: Arc<dyn PendingStore>,
        vectors: Arc<dyn VectorStore>,
        locks: Arc<dyn LockService>,
        options: RunnerOptions,
    ) -> Self {
        Self {
            pipeline,
            pending,
            vectors,
            locks,
            options,
        }
    }

    /// Drives `run_once` on the configured interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("ingestion runner stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once(&cancel).await {
                        Ok(report) => {
                            if report != RunReport::default() {
                                info!(
                                    processed = report.processed,
                                    skipped_locked = report.skipped_locked,
                                    failed = report.failed,
                                    "ingestion run finished"
                                );
                            }
                        }
                        Err(run_error) => error!(%run_error, "ingestion run failed"),
                    }
                }
            }
        }
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunReport, StoreError> {
        let (pending, total) = self
            .pending
            .list_pending(0, self.options.fetch_limit)
            .await?;
        if pending.is_empty() {
            return Ok(RunReport::default());
        }
        info!(batch = pending.len(), total, "processing pending documents");

        let mut report = RunReport::default();

        for document in pending {
            if cancel.is_cancelled() {
                break;
            }

            let acquired = self
                .locks
                .try_lock(&document.document_name, self.options.lock_ttl)
                .await
                .unwrap_or(false);
            if !acquired {
                debug!(document = %document.document_name, "already locked, skipping");
                report.skipped_locked += 1;
                continue;
            }

            let chunks = match self
                .pipeline
                .process(Path::new(&document.document_path), document.tool, cancel)
                .await
            {
                Ok(chunks) => chunks,
                Err(pipeline_error) => {
                    // Lease is not released here: letting the TTL expire
                    // spaces out retries of a document that just failed.
                    warn!(
                        document = %document.document_name,
                        %pipeline_error,
                        "pipeline failed, keeping pending entry for retry"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let metadata = DocumentMetadata {
                title: document.document_name.clone(),
                tags: document.tags.clone(),
                file_path: document.document_path.clone(),
            };

            // Clear any prior copy before saving so a retried document ends
            // up indexed exactly once.
            if let Err(store_error) = self.vectors.remove_documents(&metadata).await {
                warn!(document = %metadata.title, %store_error, "failed to clear prior chunks");
                report.failed += 1;
                continue;
            }
            if let Err(store_error) = self.vectors.save_chunks(&metadata, &chunks).await {
                warn!(document = %metadata.title, %store_error, "failed to save chunks");
                report.failed += 1;
                continue;
            }
            if let Err(store_error) = self.pending.remove(&document.id).await {
                warn!(document = %metadata.title, %store_error, "failed to remove pending entry");
                report.failed += 1;
                continue;
            }
            if let Err(store_error) = self.locks.unlock(&document.document_name).await {
                warn!(document = %metadata.title, %store_error, "lease release failed, will expire on its own");
            }

            info!(document = %metadata.title, chunks = chunks.len(), "document ingested");
            report.processed += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchProcessor;
    use crate::extractor::PageExtractor;
    use crate::locks::LeaseLock;
    use crate::models::{
        DocumentChunk, ExtractionTool, PendingDocument, PipelineOptions,
    };
    use crate::traits::{OcrBackend, PageTextBackend, PdfInfoBackend, RasterizeBackend};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeInfo {
        broken_paths: Vec<String>,
    }

    #[async_trait]
    impl PdfInfoBackend for FakeInfo {
        async fn total_pages(&self, path: &Path) -> Result<u32, crate::IngestError> {
            let key = path.to_string_lossy().to_string();
            if self.broken_paths.contains(&key) {
                return Err(crate::IngestError::PageCount("unreadable".to_string()));
            }
            Ok(1)
        }
    }

    struct FakePages;

    #[async_trait]
    impl PageTextBackend for FakePages {
        async fn extract_page_text(
            &self,
            path: &Path,
            page: u32,
        ) -> Result<String, crate::IngestError> {
            Ok(format!("content of {} page {page}.", path.display()))
        }
    }

    struct NoRasterizer;

    #[async_trait]
    impl RasterizeBackend for NoRasterizer {
        async fn rasterize_pages(
            &self,
            _path: &Path,
            _output_dir: &Path,
            _from: u32,
            _to: u32,
        ) -> Result<Vec<PathBuf>, crate::IngestError> {
            Err(crate::IngestError::Rasterize("not under test".to_string()))
        }
    }

    struct NoOcr;

    #[async_trait]
    impl OcrBackend for NoOcr {
        async fn recognize_text(&self, _image: &Path) -> Result<String, crate::IngestError> {
            Err(crate::IngestError::Extraction("not under test".to_string()))
        }
    }

    #[derive(Default)]
    struct MemoryPending {
        documents: Mutex<Vec<PendingDocument>>,
    }

    #[async_trait]
    impl PendingStore for MemoryPending {
        async fn save(&self, document: &PendingDocument) -> Result<(), StoreError> {
            self.documents.lock().unwrap().push(document.clone());
            Ok(())
        }

        async fn list_pending(
            &self,
            offset: u64,
            limit: u64,
        ) -> Result<(Vec<PendingDocument>, u64), StoreError> {
            let documents = self.documents.lock().unwrap();
            let total = documents.len() as u64;
            let page = documents
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect();
            Ok((page, total))
        }

        async fn remove(&self, id: &str) -> Result<(), StoreError> {
            self.documents
                .lock()
                .unwrap()
                .retain(|document| document.id != id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryVectors {
        saved: Mutex<HashMap<String, Vec<DocumentChunk>>>,
        save_count: Mutex<usize>,
    }

    #[async_trait]
    impl VectorStore for MemoryVectors {
        async fn save_chunks(
            &self,
            metadata: &DocumentMetadata,
            chunks: &[DocumentChunk],
        ) -> Result<(), StoreError> {
            *self.save_count.lock().unwrap() += 1;
            self.saved
                .lock()
                .unwrap()
                .insert(metadata.title.clone(), chunks.to_vec());
            Ok(())
        }

        async fn remove_documents(&self, metadata: &DocumentMetadata) -> Result<(), StoreError> {
            self.saved.lock().unwrap().remove(&metadata.title);
            Ok(())
        }
    }

    fn pending_document(name: &str) -> PendingDocument {
        PendingDocument {
            id: format!("id-{name}"),
            document_path: format!("/docs/{name}"),
            document_name: name.to_string(),
            tags: Vec::new(),
            tool: ExtractionTool::DirectText,
            created_at: Utc::now(),
        }
    }

    fn runner(
        broken_paths: Vec<String>,
        pending: Arc<MemoryPending>,
        vectors: Arc<MemoryVectors>,
        locks: Arc<LeaseLock>,
    ) -> IngestionRunner {
        let info = Arc::new(FakeInfo { broken_paths });
        let options = PipelineOptions::default();
        let extractor = PageExtractor::new(
            info.clone(),
            Arc::new(FakePages),
            Arc::new(NoRasterizer),
            Arc::new(NoOcr),
            BatchProcessor::new(options.batch_size).unwrap(),
        );
        let pipeline = DocumentPipeline::new(info, extractor, &options).unwrap();
        IngestionRunner::new(
            pipeline,
            pending,
            vectors,
            locks,
            RunnerOptions {
                lock_ttl: Duration::from_secs(60),
                poll_interval: Duration::from_secs(1),
                fetch_limit: 100,
            },
        )
    }

    #[tokio::test]
    async fn successful_run_saves_chunks_and_clears_pending() {
        let pending = Arc::new(MemoryPending::default());
        let vectors = Arc::new(MemoryVectors::default());
        let locks = Arc::new(LeaseLock::new());
        pending.save(&pending_document("manual.pdf")).await.unwrap();

        let runner = runner(Vec::new(), pending.clone(), vectors.clone(), locks.clone());
        let report = runner.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);
        assert!(vectors.saved.lock().unwrap().contains_key("manual.pdf"));
        let (_, total) = pending.list_pending(0, 10).await.unwrap();
        assert_eq!(total, 0);
        // Lock was released on the success path.
        assert!(locks
            .try_lock("manual.pdf", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn locked_document_is_skipped_without_side_effects() {
        let pending = Arc::new(MemoryPending::default());
        let vectors = Arc::new(MemoryVectors::default());
        let locks = Arc::new(LeaseLock::new());
        pending.save(&pending_document("manual.pdf")).await.unwrap();

        // A previous, unexpired run still holds the lease.
        assert!(locks
            .try_lock("manual.pdf", Duration::from_secs(600))
            .await
            .unwrap());

        let runner = runner(Vec::new(), pending.clone(), vectors.clone(), locks.clone());
        let report = runner.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.skipped_locked, 1);
        assert_eq!(report.processed, 0);
        assert!(vectors.saved.lock().unwrap().is_empty());
        let (_, total) = pending.list_pending(0, 10).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn pipeline_failure_keeps_pending_entry_and_lease() {
        let pending = Arc::new(MemoryPending::default());
        let vectors = Arc::new(MemoryVectors::default());
        let locks = Arc::new(LeaseLock::new());
        pending.save(&pending_document("broken.pdf")).await.unwrap();

        let runner = runner(
            vec!["/docs/broken.pdf".to_string()],
            pending.clone(),
            vectors.clone(),
            locks.clone(),
        );
        let report = runner.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(vectors.saved.lock().unwrap().is_empty());
        let (_, total) = pending.list_pending(0, 10).await.unwrap();
        assert_eq!(total, 1);
        // The lease is deliberately left in place until it expires.
        assert!(!locks
            .try_lock("broken.pdf", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn failure_then_retry_processes_the_document_once_recovered() {
        let pending = Arc::new(MemoryPending::default());
        let vectors = Arc::new(MemoryVectors::default());
        pending.save(&pending_document("manual.pdf")).await.unwrap();

        let failing = runner(
            vec!["/docs/manual.pdf".to_string()],
            pending.clone(),
            vectors.clone(),
            Arc::new(LeaseLock::new()),
        );
        let report = failing.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed, 1);

        // Next run (fresh lease table, as after TTL expiry) succeeds and
        // drains the same entry.
        let recovering = runner(
            Vec::new(),
            pending.clone(),
            vectors.clone(),
            Arc::new(LeaseLock::new()),
        );
        let report = recovering.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.processed, 1);
        let (_, total) = pending.list_pending(0, 10).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn reingestion_replaces_rather_than_duplicates() {
        let pending = Arc::new(MemoryPending::default());
        let vectors = Arc::new(MemoryVectors::default());
        let locks = Arc::new(LeaseLock::new());
        pending.save(&pending_document("manual.pdf")).await.unwrap();

        let runner = runner(Vec::new(), pending.clone(), vectors.clone(), locks.clone());
        runner.run_once(&CancellationToken::new()).await.unwrap();

        // The same document gets enqueued again later.
        pending.save(&pending_document("manual.pdf")).await.unwrap();
        runner.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(*vectors.save_count.lock().unwrap(), 2);
        let saved = vectors.saved.lock().unwrap();
        // One copy of the chunks survives, not an accumulation.
        assert_eq!(saved.len(), 1);
        assert!(saved.contains_key("manual.pdf"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_drain_between_documents() {
        let pending = Arc::new(MemoryPending::default());
        let vectors = Arc::new(MemoryVectors::default());
        let locks = Arc::new(LeaseLock::new());
        for index in 0..3 {
            pending
                .save(&pending_document(&format!("doc-{index}.pdf")))
                .await
                .unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();

        let runner = runner(Vec::new(), pending.clone(), vectors, locks);
        let report = runner.run_once(&cancel).await.unwrap();

        assert_eq!(report, RunReport::default());
        let (_, total) = pending.list_pending(0, 10).await.unwrap();
        assert_eq!(total, 3);
    }
}
