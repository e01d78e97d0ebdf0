use crate::chunking::ChunkSegmenter;
use crate::cleaning::clean_text;
use crate::error::IngestError;
use crate::extractor::PageExtractor;
use crate::models::{DocumentChunk, ExtractionRequest, ExtractionTool, PipelineOptions};
use crate::traits::PdfInfoBackend;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Turns a PDF into an ordered list of chunks: page-count discovery, batched
/// extraction, cleaning, then a sequential fold over pages that threads the
/// carry-over tail from one page into the next.
pub struct DocumentPipeline {
    info: Arc<dyn PdfInfoBackend>,
    extractor: PageExtractor,
    segmenter: ChunkSegmenter,
}

impl DocumentPipeline {
    pub fn new(
        info: Arc<dyn PdfInfoBackend>,
        extractor: PageExtractor,
        options: &PipelineOptions,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            info,
            extractor,
            segmenter: ChunkSegmenter::new(options)?,
        })
    }

    pub async fn total_pages(&self, path: &Path) -> Result<u32, IngestError> {
        self.info.total_pages(path).await
    }

    pub async fn extract_pages(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, IngestError> {
        self.extractor.extract_pages(request, cancel).await
    }

    pub async fn process(
        &self,
        path: &Path,
        tool: ExtractionTool,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentChunk>, IngestError> {
        let total = self.info.total_pages(path).await?;
        if total == 0 {
            return Ok(Vec::new());
        }
        info!(path = %path.display(), pages = total, %tool, "processing document");

        let texts = self
            .extractor
            .extract_pages(
                &ExtractionRequest {
                    tool,
                    file_path: path.to_path_buf(),
                    from_page: 1,
                    to_page: total,
                },
                cancel,
            )
            .await?;

        let mut chunks: Vec<DocumentChunk> = Vec::new();
        let mut carry = String::new();

        for (index, raw) in texts.iter().enumerate() {
            let page = index as u32 + 1;
            let cleaned = clean_text(raw);

            let text = if carry.is_empty() {
                cleaned
            } else if cleaned.is_empty() {
                carry.clone()
            } else {
                format!("{carry} {cleaned}")
            };

            if text.trim().is_empty() {
                carry.clear();
                continue;
            }

            let (page_chunks, new_carry) =
                self.segmenter.segment(&text, chunks.len() as u64, page);
            debug!(page, chunks = page_chunks.len(), "segmented page");

            if page_chunks.is_empty() {
                carry = new_carry;
                continue;
            }

            if new_carry.is_empty() {
                // Fully flushed (stall path): nothing left to extend.
                chunks.extend(page_chunks);
                carry.clear();
            } else {
                // The last chunk is provisional; the next page's text may
                // still extend it before it reaches a flush boundary.
                carry = new_carry;
                let keep = page_chunks.len() - 1;
                chunks.extend(page_chunks.into_iter().take(keep));
            }
        }

        // Flush the tail that never reached a boundary, so the end of the
        // document is not silently dropped.
        let tail = carry.trim();
        if !tail.is_empty() {
            chunks.push(DocumentChunk {
                content: tail.to_string(),
                page: total,
                chunk: chunks.len() as u64,
            });
        }

        Ok(chunks)
    }
}
