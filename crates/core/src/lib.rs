pub mod batch;
pub mod chunking;
pub mod cleaning;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod locks;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod stores;
pub mod traits;

pub use batch::BatchProcessor;
pub use chunking::ChunkSegmenter;
pub use cleaning::clean_text;
pub use embeddings::{Embedder, NgramHashEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, StoreError};
pub use extractor::{LopdfBackend, PageExtractor, PopplerBackend, TesseractBackend};
pub use locks::LeaseLock;
pub use models::{
    DocumentChunk, DocumentMetadata, ExtractionRequest, ExtractionTool, PendingDocument,
    PipelineOptions, RunnerOptions,
};
pub use pipeline::DocumentPipeline;
pub use runner::{IngestionRunner, RunReport};
pub use stores::{discover_pdf_files, enqueue_folder, FileSpool, QdrantStore};
pub use traits::{
    LockService, OcrBackend, PageTextBackend, PdfInfoBackend, PendingStore, RasterizeBackend,
    VectorStore,
};
