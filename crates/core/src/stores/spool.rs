use crate::error::StoreError;
use crate::models::{ExtractionTool, PendingDocument};
use crate::traits::PendingStore;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

/// Pending-document store over a spool directory: one JSON file per entry,
/// named by id. Listing is deterministic oldest-first so repeated runs see
/// the same order.
pub struct FileSpool {
    root: PathBuf,
}

impl FileSpool {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read_all(&self) -> Result<Vec<PendingDocument>, StoreError> {
        let mut documents = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<PendingDocument>(&bytes) {
                Ok(document) => documents.push(document),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable spool entry");
                }
            }
        }

        documents.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(documents)
    }
}

#[async_trait]
impl PendingStore for FileSpool {
    async fn save(&self, document: &PendingDocument) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(self.entry_path(&document.id), payload).await?;
        Ok(())
    }

    async fn list_pending(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<PendingDocument>, u64), StoreError> {
        let documents = self.read_all().await?;
        let total = documents.len() as u64;
        let page = documents
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        tokio::fs::remove_file(self.entry_path(id)).await?;
        Ok(())
    }
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Registers every PDF under `folder` for deferred ingestion and returns the
/// created entries.
pub async fn enqueue_folder(
    spool: &FileSpool,
    folder: &Path,
    tags: &[String],
    tool: ExtractionTool,
) -> Result<Vec<PendingDocument>, StoreError> {
    let mut created = Vec::new();

    for path in discover_pdf_files(folder) {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let document = PendingDocument {
            id: Uuid::new_v4().to_string(),
            document_path: path.to_string_lossy().to_string(),
            document_name: name,
            tags: tags.to_vec(),
            tool,
            created_at: Utc::now(),
        };
        spool.save(&document).await?;
        created.push(document);
    }

    Ok(created)
}
