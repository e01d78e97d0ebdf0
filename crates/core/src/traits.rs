use crate::error::{IngestError, StoreError};
use crate::models::{DocumentChunk, DocumentMetadata, PendingDocument};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[async_trait]
pub trait PdfInfoBackend: Send + Sync {
    async fn total_pages(&self, path: &Path) -> Result<u32, IngestError>;
}

#[async_trait]
pub trait PageTextBackend: Send + Sync {
    async fn extract_page_text(&self, path: &Path, page: u32) -> Result<String, IngestError>;
}

#[async_trait]
pub trait RasterizeBackend: Send + Sync {
    /// Renders pages `from..=to` into `output_dir` and returns the image
    /// paths sorted so that position maps 1:1 onto page order.
    async fn rasterize_pages(
        &self,
        path: &Path,
        output_dir: &Path,
        from: u32,
        to: u32,
    ) -> Result<Vec<PathBuf>, IngestError>;
}

#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn recognize_text(&self, image: &Path) -> Result<String, IngestError>;
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// Attempts to acquire the named lease. Returns false without blocking
    /// when another holder has an unexpired lease on the same key.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn unlock(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn save_chunks(
        &self,
        metadata: &DocumentMetadata,
        chunks: &[DocumentChunk],
    ) -> Result<(), StoreError>;

    async fn remove_documents(&self, metadata: &DocumentMetadata) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PendingStore: Send + Sync {
    async fn save(&self, document: &PendingDocument) -> Result<(), StoreError>;

    /// Lists pending documents oldest-first, returning the page plus the
    /// total count across the store.
    async fn list_pending(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<PendingDocument>, u64), StoreError>;

    async fn remove(&self, id: &str) -> Result<(), StoreError>;
}
