//! Share-link download flow.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use cowshare_client::{RangeFetcher, ServiceClient, StorageClient};
use cowshare_protocol::DownloadFile;
use cowshare_transfer::{DownloadEngine, OutputFile, TransferConfig, TransferProgress};
use regex::Regex;
use tracing::{debug, error, info};

use crate::destination::resolve_destination;
use crate::error::ShareError;
use crate::report::{DownloadReport, Failure};
use crate::ticker::{DEFAULT_TICK, ProgressTicker};

/// Share id embedded in share URLs.
static SHARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9a-f]{14}").unwrap());

/// Returns the first run of 14 lowercase hex digits in `url`.
pub fn extract_share_id(url: &str) -> Option<&str> {
    SHARE_ID.find(url).map(|m| m.as_str())
}

/// Downloads the files behind share links.
pub struct Downloader {
    service: Arc<ServiceClient>,
    storage: Arc<StorageClient>,
    config: TransferConfig,
    passcode: String,
    show_progress: bool,
}

impl Downloader {
    pub fn new(
        service: Arc<ServiceClient>,
        storage: Arc<StorageClient>,
        config: TransferConfig,
    ) -> Result<Self, ShareError> {
        config.validate()?;
        Ok(Self {
            service,
            storage,
            config,
            passcode: String::new(),
            show_progress: false,
        })
    }

    pub fn with_passcode(mut self, passcode: impl Into<String>) -> Self {
        self.passcode = passcode.into();
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Downloads every file of the share at `link` below `prefix`.
    ///
    /// Link-level problems are errors; a failed file is recorded in the
    /// report and the remaining files are still fetched.
    pub async fn download(&self, link: &str, prefix: &Path) -> Result<DownloadReport, ShareError> {
        let share_id =
            extract_share_id(link).ok_or_else(|| ShareError::UnknownUrl(link.to_string()))?;
        info!(remote = link, "fetching share details");

        let details = self
            .service
            .transfer_details(share_id, &self.passcode)
            .await?;
        if details.guid.is_empty() {
            return Err(ShareError::LinkInvalid);
        }
        if details.deleted {
            return Err(ShareError::LinkDeleted);
        }
        if !details.uploaded {
            return Err(ShareError::LinkNotReady);
        }

        let mut report = DownloadReport {
            name: details.download_name.clone(),
            ..DownloadReport::default()
        };
        let single = details.files.len() == 1;
        for file in &details.files {
            match self.download_file(file, prefix, single).await {
                Ok(path) => report.saved.push(path),
                Err(e) => {
                    error!(file = %file.file_name, error = %e, "download failed");
                    report.failures.push(Failure::new(file.file_name.clone(), e));
                }
            }
        }
        Ok(report)
    }

    /// Downloads one file of a share and returns where it was saved.
    pub async fn download_file(
        &self,
        file: &DownloadFile,
        prefix: &Path,
        single: bool,
    ) -> Result<PathBuf, ShareError> {
        debug!(
            file = %file.file_name,
            guid = %file.guid,
            approx_size = ?file.approx_bytes(),
            "resolving download link"
        );
        let destination = resolve_destination(prefix, &file.file_name, single)?;
        let link = self.service.download_link(&file.guid).await?;
        let remote = self.storage.probe(&link).await?;
        info!(
            file = %destination.display(),
            size = remote.length,
            ranges = remote.accepts_ranges,
            "saving"
        );

        let out = OutputFile::create(&destination, remote.length)?;
        let progress = Arc::new(TransferProgress::new(remote.length));
        let engine = DownloadEngine::new(self.config.clone())?.with_progress(progress.sink());
        let fetcher = Arc::new(RangeFetcher::new(
            Arc::clone(&self.storage),
            link.clone(),
            out.clone(),
        ));
        let ticker = self.show_progress.then(|| {
            ProgressTicker::start(file.file_name.clone(), Arc::clone(&progress), DEFAULT_TICK)
        });

        let outcome = engine
            .download(&link, remote.length, remote.accepts_ranges, fetcher)
            .await;
        if let Some(ticker) = ticker {
            ticker.stop().await;
        }
        outcome?;
        out.sync().await?;
        Ok(destination)
    }
}
