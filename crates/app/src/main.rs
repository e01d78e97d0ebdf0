use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_ingest_core::{
    enqueue_folder, BatchProcessor, DocumentMetadata, DocumentPipeline, ExtractionRequest,
    ExtractionTool, FileSpool, IngestionRunner, LeaseLock, LopdfBackend, OcrBackend,
    PageExtractor, PageTextBackend, PdfInfoBackend, PipelineOptions, PopplerBackend, QdrantStore,
    RunnerOptions, TesseractBackend, VectorStore,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-ingest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "documents")]
    qdrant_collection: String,

    /// Directory holding pending-document entries
    #[arg(long, default_value = "spool")]
    spool_dir: String,

    /// Maximum chunk size in characters
    #[arg(long, default_value = "1024")]
    max_chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    #[arg(long, default_value = "128")]
    overlap_size: usize,

    /// Pages processed concurrently per batch
    #[arg(long, default_value = "3")]
    batch_size: usize,

    /// Tesseract language set for OCR
    #[arg(long, default_value = "eng")]
    ocr_language: String,

    /// Rasterization and OCR resolution in DPI
    #[arg(long, default_value = "450")]
    ocr_dpi: u32,

    /// Page-count and direct-text engine
    #[arg(long, default_value = "poppler")]
    engine: Engine,
}

#[derive(Clone, Copy)]
enum Engine {
    Poppler,
    Lopdf,
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "poppler" => Ok(Engine::Poppler),
            "lopdf" => Ok(Engine::Lopdf),
            other => Err(format!("unsupported engine: {other}")),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Register every PDF under a folder for background ingestion.
    Enqueue {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: String,
        /// Tags attached to every registered document.
        #[arg(long)]
        tags: Vec<String>,
        /// Extraction tool to use when the document is processed.
        #[arg(long, default_value = "direct-text")]
        tool: ExtractionTool,
    },
    /// Run the background ingestion worker.
    Worker {
        /// Seconds between runs.
        #[arg(long, default_value = "60")]
        poll_interval_secs: u64,
        /// Minutes before an abandoned lease expires.
        #[arg(long, default_value = "20")]
        lock_ttl_minutes: u64,
        /// Run a single drain instead of looping.
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Ingest a single PDF immediately.
    Ingest {
        /// Path to the PDF file.
        #[arg(long)]
        file: String,
        /// Document title; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
        /// Tags attached to the document.
        #[arg(long)]
        tags: Vec<String>,
        /// Extraction tool.
        #[arg(long, default_value = "direct-text")]
        tool: ExtractionTool,
        /// Print the chunks as JSON instead of saving them.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print extracted text for a page range.
    Pages {
        /// Path to the PDF file.
        #[arg(long)]
        file: String,
        /// Extraction tool.
        #[arg(long, default_value = "direct-text")]
        tool: ExtractionTool,
        #[arg(long, default_value = "1")]
        from_page: u32,
        /// Defaults to the last page.
        #[arg(long)]
        to_page: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let options = PipelineOptions {
        max_chunk_size: cli.max_chunk_size,
        overlap_size: cli.overlap_size,
        batch_size: cli.batch_size,
    };

    let info: Arc<dyn PdfInfoBackend> = match cli.engine {
        Engine::Poppler => Arc::new(PopplerBackend),
        Engine::Lopdf => Arc::new(LopdfBackend),
    };
    let text: Arc<dyn PageTextBackend> = match cli.engine {
        Engine::Poppler => Arc::new(PopplerBackend),
        Engine::Lopdf => Arc::new(LopdfBackend),
    };
    let ocr: Arc<dyn OcrBackend> = Arc::new(TesseractBackend {
        language: cli.ocr_language.clone(),
        dpi: cli.ocr_dpi,
    });

    let extractor = PageExtractor::new(
        info.clone(),
        text,
        Arc::new(PopplerBackend),
        ocr,
        BatchProcessor::new(options.batch_size).map_err(|error| anyhow::anyhow!(error.to_string()))?,
    );
    let pipeline = DocumentPipeline::new(info, extractor, &options)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let cancel = CancellationToken::new();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-ingest boot"
    );

    match cli.command {
        Command::Enqueue { folder, tags, tool } => {
            let spool = FileSpool::new(&cli.spool_dir)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let created = enqueue_folder(&spool, Path::new(&folder), &tags, tool)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if created.is_empty() {
                println!("no pdf files found under {folder}");
            }
            for document in &created {
                println!("enqueued {} ({})", document.document_name, document.id);
            }
            println!("{} document(s) pending in {}", created.len(), cli.spool_dir);
        }
        Command::Worker {
            poll_interval_secs,
            lock_ttl_minutes,
            once,
        } => {
            let spool = Arc::new(
                FileSpool::new(&cli.spool_dir)
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?,
            );
            let vectors = Arc::new(
                QdrantStore::new(&cli.qdrant_url, &cli.qdrant_collection)
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?,
            );
            vectors
                .ensure_collection()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let runner = IngestionRunner::new(
                pipeline,
                spool,
                vectors,
                Arc::new(LeaseLock::new()),
                RunnerOptions {
                    lock_ttl: Duration::from_secs(lock_ttl_minutes * 60),
                    poll_interval: Duration::from_secs(poll_interval_secs),
                    fetch_limit: 100,
                },
            );

            if once {
                let report = runner
                    .run_once(&cancel)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                println!(
                    "processed={} skipped_locked={} failed={}",
                    report.processed, report.skipped_locked, report.failed
                );
            } else {
                let stop = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received, finishing current batch");
                        stop.cancel();
                    }
                });
                runner.run(cancel).await;
            }
        }
        Command::Ingest {
            file,
            title,
            tags,
            tool,
            dry_run,
        } => {
            let path = Path::new(&file);
            let chunks = pipeline
                .process(path, tool, &cancel)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if dry_run {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
                return Ok(());
            }

            let title = title.unwrap_or_else(|| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or(&file)
                    .to_string()
            });
            let metadata = DocumentMetadata {
                title,
                tags,
                file_path: file.clone(),
            };

            let vectors = QdrantStore::new(&cli.qdrant_url, &cli.qdrant_collection)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            vectors
                .ensure_collection()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            vectors
                .remove_documents(&metadata)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            vectors
                .save_chunks(&metadata, &chunks)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!(
                "{} chunks ingested from {} at {}",
                chunks.len(),
                file,
                Utc::now().to_rfc3339()
            );
        }
        Command::Pages {
            file,
            tool,
            from_page,
            to_page,
        } => {
            let path = Path::new(&file);
            let total = pipeline
                .total_pages(path)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let request = ExtractionRequest {
                tool,
                file_path: path.to_path_buf(),
                from_page,
                to_page: to_page.unwrap_or(total),
            };
            let texts = pipeline
                .extract_pages(&request, &cancel)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            for (index, text) in texts.iter().enumerate() {
                println!("[page {}]", request.from_page + index as u32);
                if text.is_empty() {
                    println!("(no text extracted)");
                } else {
                    println!("{text}");
                }
            }
        }
    }

    Ok(())
}
