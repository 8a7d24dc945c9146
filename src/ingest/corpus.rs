//! Corpus backends: where raw records come from
//!
//! A corpus is addressed by name plus split, optionally capped at a sample
//! count, and yields JSON objects with arbitrary field names.

use crate::config::DatasetSource;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// One raw corpus row
pub type Record = serde_json::Map<String, Value>;

/// Lazily produced rows of one corpus
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Record, DatasetError>> + 'a>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("Dataset {name} is gated: {message}")]
    Gated { name: String, message: String },

    #[error("Dataset {name} not found")]
    NotFound { name: String },

    #[error("Failed to load {name}: {message}")]
    LoadFailed { name: String, message: String },

    #[error("Malformed row {row} in {name}: {message}")]
    MalformedRow {
        name: String,
        row: usize,
        message: String,
    },
}

/// Coarse failure class of a source that could not be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Gated,
    NotFound,
    Other,
}

impl DatasetError {
    /// Classify an opaque backend message
    pub fn classify(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if ["gated", "authentication", "unauthorized", "forbidden"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Self::Gated {
                name: name.to_string(),
                message,
            }
        } else if lower.contains("not found") || lower.contains("doesn't exist") {
            Self::NotFound {
                name: name.to_string(),
            }
        } else {
            Self::LoadFailed {
                name: name.to_string(),
                message,
            }
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Gated { .. } => FailureKind::Gated,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::LoadFailed { .. } | Self::MalformedRow { .. } => FailureKind::Other,
        }
    }
}

/// Source of raw records for the ingestor
pub trait CorpusLoader {
    /// Open a corpus. Failing here marks the whole source as unavailable;
    /// errors yielded by the iterator only skip individual rows.
    fn load<'a>(&'a self, source: &DatasetSource) -> Result<RowIter<'a>, DatasetError>;
}

/// Corpora held in memory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    datasets: HashMap<String, Vec<Record>>,
    failures: HashMap<String, DatasetError>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register rows under `name`; non-object values are dropped
    pub fn with_rows(mut self, name: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.datasets.insert(name.into(), rows);
        self
    }

    /// Make loading `name` fail with `error`
    pub fn with_failure(mut self, name: impl Into<String>, error: DatasetError) -> Self {
        self.failures.insert(name.into(), error);
        self
    }
}

impl CorpusLoader for InMemoryCorpus {
    fn load<'a>(&'a self, source: &DatasetSource) -> Result<RowIter<'a>, DatasetError> {
        if let Some(error) = self.failures.get(&source.name) {
            return Err(error.clone());
        }

        let rows = self
            .datasets
            .get(&source.name)
            .ok_or_else(|| DatasetError::NotFound {
                name: source.name.clone(),
            })?;

        Ok(Box::new(rows.iter().cloned().map(Ok)))
    }
}

/// Local corpora stored as JSON lines: `<root>/<name>/<split>.jsonl`
#[derive(Debug, Clone)]
pub struct JsonlCorpus {
    root: PathBuf,
}

impl JsonlCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, source: &DatasetSource) -> PathBuf {
        self.root
            .join(&source.name)
            .join(format!("{}.jsonl", source.split))
    }
}

impl CorpusLoader for JsonlCorpus {
    fn load<'a>(&'a self, source: &DatasetSource) -> Result<RowIter<'a>, DatasetError> {
        let path = self.path_for(source);
        if !path.exists() {
            return Err(DatasetError::NotFound {
                name: source.name.clone(),
            });
        }

        let file = File::open(&path).map_err(|e| DatasetError::LoadFailed {
            name: source.name.clone(),
            message: format!("{}: {}", path.display(), e),
        })?;

        Ok(Box::new(JsonlRows {
            name: source.name.clone(),
            lines: BufReader::new(file).lines().enumerate(),
        }))
    }
}

struct JsonlRows {
    name: String,
    lines: std::iter::Enumerate<std::io::Lines<BufReader<File>>>,
}

impl Iterator for JsonlRows {
    type Item = Result<Record, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (row, line) = self.lines.next()?;
            let malformed = |message: String| DatasetError::MalformedRow {
                name: self.name.clone(),
                row,
                message,
            };

            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(malformed(e.to_string()))),
            };
            if line.trim().is_empty() {
                continue;
            }

            return Some(match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(malformed("row is not a JSON object".to_string())),
                Err(e) => Err(malformed(e.to_string())),
            });
        }
    }
}

const HUB_ROWS_URL: &str = "https://datasets-server.huggingface.co/rows";
const HUB_PAGE_SIZE: usize = 100;

/// Hugging Face datasets-server backend, paging through `/rows`
///
/// Gated corpora need a token (`HF_TOKEN`) whose account accepted the terms.
pub struct HubCorpus {
    client: reqwest::blocking::Client,
    base_url: String,
    config_name: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: Option<usize>,
}

#[derive(Deserialize)]
struct RowEntry {
    row: Record,
}

impl HubCorpus {
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        use anyhow::Context;

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("exemplar/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: HUB_ROWS_URL.to_string(),
            config_name: "default".to_string(),
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn fetch_page(
        &self,
        source: &DatasetSource,
        offset: usize,
        length: usize,
    ) -> Result<RowsPage, DatasetError> {
        let mut request = self.client.get(&self.base_url).query(&[
            ("dataset", source.name.as_str()),
            ("config", self.config_name.as_str()),
            ("split", source.split.as_str()),
            ("offset", &offset.to_string()),
            ("length", &length.to_string()),
        ]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| DatasetError::classify(&source.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => DatasetError::Gated {
                    name: source.name.clone(),
                    message: format!("HTTP {}: {}", status, body),
                },
                404 => DatasetError::NotFound {
                    name: source.name.clone(),
                },
                _ => DatasetError::classify(&source.name, format!("HTTP {}: {}", status, body)),
            });
        }

        response.json::<RowsPage>().map_err(|e| DatasetError::LoadFailed {
            name: source.name.clone(),
            message: format!("Invalid rows response: {}", e),
        })
    }
}

impl CorpusLoader for HubCorpus {
    fn load<'a>(&'a self, source: &DatasetSource) -> Result<RowIter<'a>, DatasetError> {
        let limit = source.max_samples;
        let first_len = limit.map_or(HUB_PAGE_SIZE, |l| l.min(HUB_PAGE_SIZE));
        let first = self.fetch_page(source, 0, first_len)?;

        tracing::info!(
            "Opened {} ({} rows available)",
            source.name,
            first
                .num_rows_total
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        let fetched = first.rows.len();
        Ok(Box::new(HubRows {
            corpus: self,
            source: source.clone(),
            offset: fetched,
            total: first.num_rows_total,
            limit,
            page: first.rows.into_iter().map(|entry| entry.row).collect(),
            exhausted: fetched < first_len,
        }))
    }
}

struct HubRows<'a> {
    corpus: &'a HubCorpus,
    source: DatasetSource,
    offset: usize,
    total: Option<usize>,
    limit: Option<usize>,
    page: VecDeque<Record>,
    exhausted: bool,
}

impl HubRows<'_> {
    fn remaining(&self) -> usize {
        let cap = match (self.total, self.limit) {
            (Some(total), Some(limit)) => total.min(limit),
            (Some(n), None) | (None, Some(n)) => n,
            (None, None) => usize::MAX,
        };
        cap.saturating_sub(self.offset)
    }
}

impl Iterator for HubRows<'_> {
    type Item = Result<Record, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.page.pop_front() {
            return Some(Ok(row));
        }
        if self.exhausted {
            return None;
        }

        let length = self.remaining().min(HUB_PAGE_SIZE);
        if length == 0 {
            self.exhausted = true;
            return None;
        }

        match self.corpus.fetch_page(&self.source, self.offset, length) {
            Ok(page) => {
                let fetched = page.rows.len();
                self.offset += fetched;
                self.exhausted = fetched < length;
                self.page = page.rows.into_iter().map(|entry| entry.row).collect();
                self.page.pop_front().map(Ok)
            }
            Err(e) => {
                // A failed page ends the corpus; rows already yielded stand.
                tracing::warn!(
                    dataset = %self.source.name,
                    offset = self.offset,
                    "Hub page fetch failed, corpus truncated: {}",
                    e
                );
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}
