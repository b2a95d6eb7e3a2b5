//! Batch outcome types.

use std::path::PathBuf;

/// One failed item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Local path, link or share URL the failure belongs to.
    pub subject: String,
    pub error: String,
}

impl Failure {
    pub fn new(subject: impl Into<String>, error: impl ToString) -> Self {
        Self {
            subject: subject.into(),
            error: error.to_string(),
        }
    }
}

/// One share created by an upload batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub share_url: String,
    /// Short download code, once the transfer was completed.
    pub download_code: Option<String>,
    /// Files uploaded into the share.
    pub files: Vec<PathBuf>,
}

/// Outcome of an upload batch.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub transfers: Vec<TransferSummary>,
    pub failures: Vec<Failure>,
    pub missing: Vec<PathBuf>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.missing.is_empty()
    }
}

/// Outcome of downloading one share link.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub name: String,
    pub saved: Vec<PathBuf>,
    pub failures: Vec<Failure>,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}
