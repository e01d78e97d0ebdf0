mod qdrant;
mod spool;

pub use qdrant::QdrantStore;
pub use spool::{discover_pdf_files, enqueue_folder, FileSpool};
