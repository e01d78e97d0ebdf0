use crate::batch::BatchProcessor;
use crate::error::IngestError;
use crate::models::{ExtractionRequest, ExtractionTool};
use crate::traits::{OcrBackend, PageTextBackend, PdfInfoBackend, RasterizeBackend};
use async_trait::async_trait;
use lopdf::Document;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Extracts per-page text for a page range, either directly or through the
/// rasterize-then-OCR sub-pipeline. Page-level work is fanned out through the
/// batch processor; results come back indexed by page order.
pub struct PageExtractor {
    info: Arc<dyn PdfInfoBackend>,
    text: Arc<dyn PageTextBackend>,
    rasterizer: Arc<dyn RasterizeBackend>,
    ocr: Arc<dyn OcrBackend>,
    batch: BatchProcessor,
}

impl PageExtractor {
    pub fn new(
        info: Arc<dyn PdfInfoBackend>,
        text: Arc<dyn PageTextBackend>,
        rasterizer: Arc<dyn RasterizeBackend>,
        ocr: Arc<dyn OcrBackend>,
        batch: BatchProcessor,
    ) -> Self {
        Self {
            info,
            text,
            rasterizer,
            ocr,
            batch,
        }
    }

    pub async fn extract_pages(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, IngestError> {
        let total = self.info.total_pages(&request.file_path).await?;
        if request.from_page < 1 || request.to_page > total || request.from_page > request.to_page {
            return Err(IngestError::InvalidPageRange {
                from: request.from_page,
                to: request.to_page,
                total,
            });
        }

        match request.tool {
            ExtractionTool::DirectText => self.extract_direct(request, cancel).await,
            ExtractionTool::Ocr => self.extract_via_ocr(request, cancel).await,
        }
    }

    async fn extract_direct(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, IngestError> {
        let pages: Vec<u32> = (request.from_page..=request.to_page).collect();
        let backend = self.text.clone();
        let path = request.file_path.clone();

        self.batch
            .run(pages, cancel, move |_, page| {
                let backend = backend.clone();
                let path = path.clone();
                async move { backend.extract_page_text(&path, page).await }
            })
            .await
    }

    async fn extract_via_ocr(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, IngestError> {
        // The working directory lives exactly as long as this call: the
        // TempDir guard removes it on every exit path.
        let workdir = tempfile::tempdir()?;
        let images = self
            .rasterizer
            .rasterize_pages(
                &request.file_path,
                workdir.path(),
                request.from_page,
                request.to_page,
            )
            .await?;
        debug!(images = images.len(), "rasterized pages for ocr");

        let ocr = self.ocr.clone();
        self.batch
            .run(images, cancel, move |_, image| {
                let ocr = ocr.clone();
                async move { ocr.recognize_text(&image).await }
            })
            .await
    }
}

/// Backends shelling out to poppler-utils (`pdfinfo`, `pdftotext`,
/// `pdftoppm`).
#[derive(Debug, Clone, Default)]
pub struct PopplerBackend;

#[async_trait]
impl PdfInfoBackend for PopplerBackend {
    async fn total_pages(&self, path: &Path) -> Result<u32, IngestError> {
        let output = Command::new("pdfinfo").arg(path).output().await?;
        if !output.status.success() {
            return Err(IngestError::PageCount(format!(
                "pdfinfo exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let pages_line = Regex::new(r"Pages:\s+(\d+)")?;
        pages_line
            .captures(&stdout)
            .and_then(|captures| captures.get(1))
            .and_then(|count| count.as_str().parse::<u32>().ok())
            .ok_or_else(|| {
                IngestError::PageCount(format!(
                    "unable to determine page count from pdfinfo for {}",
                    path.display()
                ))
            })
    }
}

#[async_trait]
impl PageTextBackend for PopplerBackend {
    async fn extract_page_text(&self, path: &Path, page: u32) -> Result<String, IngestError> {
        let page_arg = page.to_string();
        let output = Command::new("pdftotext")
            .args(["-f", &page_arg, "-l", &page_arg])
            .arg(path)
            .arg("-")
            .output()
            .await?;

        if !output.status.success() {
            return Err(IngestError::Extraction(format!(
                "pdftotext failed on page {page}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl RasterizeBackend for PopplerBackend {
    async fn rasterize_pages(
        &self,
        path: &Path,
        output_dir: &Path,
        from: u32,
        to: u32,
    ) -> Result<Vec<PathBuf>, IngestError> {
        let output = Command::new("pdftoppm")
            .args(["-png", "-r", "450"])
            .args(["-f", &from.to_string(), "-l", &to.to_string()])
            .arg("-hide-annotations")
            .arg(path)
            .arg(output_dir.join("page"))
            .output()
            .await?;

        if !output.status.success() {
            return Err(IngestError::Rasterize(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // pdftoppm names images page-<n>.png; sort on the numeric suffix so
        // position maps onto page order past page 9 as well.
        let mut images = Vec::new();
        let mut entries = tokio::fs::read_dir(output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let image = entry.path();
            if image.extension().and_then(|ext| ext.to_str()) != Some("png") {
                continue;
            }
            let page_number = image
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.rsplit('-').next())
                .and_then(|suffix| suffix.parse::<u32>().ok());
            if let Some(number) = page_number {
                images.push((number, image));
            }
        }

        if images.is_empty() {
            return Err(IngestError::Rasterize(format!(
                "pdftoppm produced no images for {}",
                path.display()
            )));
        }

        images.sort_by_key(|(number, _)| *number);
        Ok(images.into_iter().map(|(_, image)| image).collect())
    }
}

/// OCR backend shelling out to tesseract. Language set, engine mode, and
/// page-segmentation mode are fixed per instance.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    pub language: String,
    pub dpi: u32,
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            dpi: 450,
        }
    }
}

#[async_trait]
impl OcrBackend for TesseractBackend {
    async fn recognize_text(&self, image: &Path) -> Result<String, IngestError> {
        let output = Command::new("tesseract")
            .arg(image)
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--oem", "3", "--psm", "3"])
            .args(["--dpi", &self.dpi.to_string()])
            .output()
            .await?;

        if !output.status.success() {
            return Err(IngestError::Extraction(format!(
                "tesseract failed on {}: {}",
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// In-process page count and direct text extraction via lopdf, for hosts
/// without poppler-utils installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfBackend;

impl LopdfBackend {
    fn load(path: &Path) -> Result<Document, IngestError> {
        Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))
    }
}

#[async_trait]
impl PdfInfoBackend for LopdfBackend {
    async fn total_pages(&self, path: &Path) -> Result<u32, IngestError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let document = Self::load(&path)?;
            Ok(document.get_pages().len() as u32)
        })
        .await
        .map_err(|error| IngestError::PageCount(error.to_string()))?
    }
}

#[async_trait]
impl PageTextBackend for LopdfBackend {
    async fn extract_page_text(&self, path: &Path, page: u32) -> Result<String, IngestError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let document = Self::load(&path)?;
            let text = document
                .extract_text(&[page])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            Ok(text.trim().to_string())
        })
        .await
        .map_err(|error| IngestError::Extraction(error.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchProcessor;
    use std::sync::Mutex;

    struct FixedInfo {
        pages: u32,
    }

    #[async_trait]
    impl PdfInfoBackend for FixedInfo {
        async fn total_pages(&self, _path: &Path) -> Result<u32, IngestError> {
            Ok(self.pages)
        }
    }

    struct EchoText;

    #[async_trait]
    impl PageTextBackend for EchoText {
        async fn extract_page_text(&self, _path: &Path, page: u32) -> Result<String, IngestError> {
            Ok(format!("text of page {page}"))
        }
    }

    struct FailingRasterizer;

    #[async_trait]
    impl RasterizeBackend for FailingRasterizer {
        async fn rasterize_pages(
            &self,
            _path: &Path,
            _output_dir: &Path,
            _from: u32,
            _to: u32,
        ) -> Result<Vec<PathBuf>, IngestError> {
            Err(IngestError::Rasterize("renderer unavailable".to_string()))
        }
    }

    struct StubRasterizer;

    #[async_trait]
    impl RasterizeBackend for StubRasterizer {
        async fn rasterize_pages(
            &self,
            _path: &Path,
            output_dir: &Path,
            from: u32,
            to: u32,
        ) -> Result<Vec<PathBuf>, IngestError> {
            Ok((from..=to)
                .map(|page| output_dir.join(format!("page-{page}.png")))
                .collect())
        }
    }

    struct ScriptedOcr {
        failing_page: Option<u32>,
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl OcrBackend for ScriptedOcr {
        async fn recognize_text(&self, image: &Path) -> Result<String, IngestError> {
            self.seen.lock().unwrap().push(image.to_path_buf());
            let stem = image.file_stem().unwrap().to_str().unwrap();
            let page: u32 = stem.rsplit('-').next().unwrap().parse().unwrap();
            if self.failing_page == Some(page) {
                return Err(IngestError::Extraction("ocr refused".to_string()));
            }
            Ok(format!("ocr page {page}"))
        }
    }

    fn extractor(
        pages: u32,
        rasterizer: Arc<dyn RasterizeBackend>,
        ocr: Arc<dyn OcrBackend>,
    ) -> PageExtractor {
        PageExtractor::new(
            Arc::new(FixedInfo { pages }),
            Arc::new(EchoText),
            rasterizer,
            ocr,
            BatchProcessor::new(2).unwrap(),
        )
    }

    fn request(tool: ExtractionTool, from: u32, to: u32) -> ExtractionRequest {
        ExtractionRequest {
            tool,
            file_path: PathBuf::from("/tmp/sample.pdf"),
            from_page: from,
            to_page: to,
        }
    }

    #[tokio::test]
    async fn direct_extraction_returns_pages_in_order() {
        let extractor = extractor(
            4,
            Arc::new(StubRasterizer),
            Arc::new(ScriptedOcr {
                failing_page: None,
                seen: Mutex::new(Vec::new()),
            }),
        );

        let texts = extractor
            .extract_pages(
                &request(ExtractionTool::DirectText, 1, 4),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            texts,
            vec![
                "text of page 1",
                "text of page 2",
                "text of page 3",
                "text of page 4"
            ]
        );
    }

    #[tokio::test]
    async fn invalid_page_range_is_an_error_not_a_panic() {
        let extractor = extractor(
            3,
            Arc::new(StubRasterizer),
            Arc::new(ScriptedOcr {
                failing_page: None,
                seen: Mutex::new(Vec::new()),
            }),
        );

        for (from, to) in [(0, 2), (2, 5), (3, 1)] {
            let outcome = extractor
                .extract_pages(
                    &request(ExtractionTool::DirectText, from, to),
                    &CancellationToken::new(),
                )
                .await;
            assert!(matches!(
                outcome,
                Err(IngestError::InvalidPageRange { .. })
            ));
        }
    }

    #[tokio::test]
    async fn rasterization_failure_aborts_the_whole_request() {
        let extractor = extractor(
            5,
            Arc::new(FailingRasterizer),
            Arc::new(ScriptedOcr {
                failing_page: None,
                seen: Mutex::new(Vec::new()),
            }),
        );

        let outcome = extractor
            .extract_pages(
                &request(ExtractionTool::Ocr, 1, 5),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome, Err(IngestError::Rasterize(_))));
    }

    #[tokio::test]
    async fn single_ocr_failure_degrades_to_empty_page() {
        let extractor = extractor(
            5,
            Arc::new(StubRasterizer),
            Arc::new(ScriptedOcr {
                failing_page: Some(3),
                seen: Mutex::new(Vec::new()),
            }),
        );

        let texts = extractor
            .extract_pages(
                &request(ExtractionTool::Ocr, 1, 5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(texts.len(), 5);
        assert_eq!(texts[2], "");
        assert_eq!(texts[0], "ocr page 1");
        assert_eq!(texts[4], "ocr page 5");
    }
}
