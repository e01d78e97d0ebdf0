use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub page: u32,
    pub chunk: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub tags: Vec<String>,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDocument {
    pub id: String,
    pub document_path: String,
    pub document_name: String,
    pub tags: Vec<String>,
    pub tool: ExtractionTool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionTool {
    DirectText,
    Ocr,
}

impl fmt::Display for ExtractionTool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionTool::DirectText => formatter.write_str("direct-text"),
            ExtractionTool::Ocr => formatter.write_str("ocr"),
        }
    }
}

impl FromStr for ExtractionTool {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "direct-text" => Ok(ExtractionTool::DirectText),
            "ocr" => Ok(ExtractionTool::Ocr),
            other => Err(IngestError::InvalidArgument(format!(
                "unsupported extraction tool: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub tool: ExtractionTool,
    pub file_path: PathBuf,
    pub from_page: u32,
    pub to_page: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub max_chunk_size: usize,
    pub overlap_size: usize,
    pub batch_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 1_024,
            overlap_size: 128,
            batch_size: 3,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "overlap_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_size {} must be smaller than max_chunk_size {}",
                self.overlap_size, self.max_chunk_size
            )));
        }
        if self.batch_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    pub lock_ttl: Duration,
    pub poll_interval: Duration,
    pub fetch_limit: u64,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(20 * 60),
            poll_interval: Duration::from_secs(60),
            fetch_limit: 100,
        }
    }
}
