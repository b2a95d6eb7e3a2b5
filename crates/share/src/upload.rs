//! Batch upload flow.
//!
//! Every file gets its own share by default. In single mode one share is
//! sized to the whole batch and every file is uploaded into it. A failed
//! file is logged and the batch moves on.

use std::path::PathBuf;
use std::sync::Arc;

use cowshare_client::{BlockUploader, MultipartCommitter, ServiceClient, StorageClient};
use cowshare_protocol::{PrepareSendResponse, UploadSession, encode_object_path};
use cowshare_transfer::{TransferConfig, TransferProgress, TransferResult, UploadEngine};
use tracing::{error, info};

use crate::error::ShareError;
use crate::report::{Failure, TransferSummary, UploadReport};
use crate::scanner::{LocalFile, scan_inputs};
use crate::ticker::{DEFAULT_TICK, ProgressTicker};

/// Upload behaviour beyond the engine settings.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Put the whole batch into one share.
    pub single_mode: bool,
    pub passcode: Option<String>,
    pub valid_days: Option<u32>,
    /// Log periodic progress lines.
    pub show_progress: bool,
}

/// Uploads local files into shares.
pub struct Uploader {
    service: Arc<ServiceClient>,
    storage: Arc<StorageClient>,
    config: TransferConfig,
    options: UploadOptions,
}

impl Uploader {
    pub fn new(
        service: Arc<ServiceClient>,
        storage: Arc<StorageClient>,
        config: TransferConfig,
        options: UploadOptions,
    ) -> Result<Self, ShareError> {
        config.validate()?;
        Ok(Self {
            service,
            storage,
            config,
            options,
        })
    }

    /// Uploads every file found under `inputs`.
    pub async fn upload(&self, inputs: &[PathBuf]) -> UploadReport {
        let scan = scan_inputs(inputs);
        let mut report = UploadReport {
            missing: scan.missing,
            ..UploadReport::default()
        };

        if self.options.single_mode {
            self.upload_together(&scan.files, scan.total_size, &mut report)
                .await;
        } else {
            for file in &scan.files {
                self.upload_alone(file, &mut report).await;
            }
        }

        report
    }

    async fn upload_alone(&self, file: &LocalFile, report: &mut UploadReport) {
        let prepared = match self.open_share(file.size).await {
            Ok(p) => p,
            Err(e) => {
                error!(file = %file.path.display(), error = %e, "cannot open share");
                report.failures.push(Failure::new(file.path.display().to_string(), e));
                return;
            }
        };
        let mut summary = TransferSummary {
            share_url: self.service.share_url(&prepared.unique_url),
            ..TransferSummary::default()
        };
        info!(destination = %summary.share_url, "share opened");

        self.upload_into(&prepared, file, &mut summary, report).await;
        self.close_share(&prepared, &mut summary, report).await;
        report.transfers.push(summary);
    }

    async fn upload_together(&self, files: &[LocalFile], total: u64, report: &mut UploadReport) {
        if files.is_empty() {
            return;
        }
        let prepared = match self.open_share(total).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "cannot open share");
                let message = e.to_string();
                report.failures.extend(
                    files
                        .iter()
                        .map(|f| Failure::new(f.path.display().to_string(), &message)),
                );
                return;
            }
        };
        let mut summary = TransferSummary {
            share_url: self.service.share_url(&prepared.unique_url),
            ..TransferSummary::default()
        };
        info!(destination = %summary.share_url, files = files.len(), "share opened");

        for file in files {
            self.upload_into(&prepared, file, &mut summary, report).await;
        }
        self.close_share(&prepared, &mut summary, report).await;
        report.transfers.push(summary);
    }

    async fn upload_into(
        &self,
        prepared: &PrepareSendResponse,
        file: &LocalFile,
        summary: &mut TransferSummary,
        report: &mut UploadReport,
    ) {
        match self.upload_file(prepared, file).await {
            Ok(result) => {
                info!(file = %file.path.display(), hash = %result.id, "file uploaded");
                summary.files.push(file.path.clone());
            }
            Err(e) => {
                error!(file = %file.path.display(), error = %e, "upload failed");
                report.failures.push(Failure::new(file.path.display().to_string(), e));
            }
        }
    }

    /// Creates a share and binds the passcode, if any.
    async fn open_share(&self, total_size: u64) -> Result<PrepareSendResponse, ShareError> {
        let prepared = self
            .service
            .prepare_send(total_size, self.options.valid_days)
            .await?;
        if let Some(passcode) = self.options.passcode.as_deref().filter(|p| !p.is_empty()) {
            self.service
                .bind_passcode(&prepared.transfer_guid, passcode)
                .await?;
        }
        Ok(prepared)
    }

    async fn close_share(
        &self,
        prepared: &PrepareSendResponse,
        summary: &mut TransferSummary,
        report: &mut UploadReport,
    ) {
        match self.service.complete(&prepared.transfer_guid).await {
            Ok(done) => {
                info!(code = %done.temp_download_code, "short download code");
                summary.download_code = Some(done.temp_download_code);
            }
            Err(e) => {
                error!(destination = %summary.share_url, error = %e, "complete failed");
                report.failures.push(Failure::new(summary.share_url.clone(), e));
            }
        }
    }

    /// Uploads one file into an open share and reports the merged object.
    pub async fn upload_file(
        &self,
        prepared: &PrepareSendResponse,
        file: &LocalFile,
    ) -> Result<TransferResult, ShareError> {
        info!(local = %file.path.display(), size = file.size, "uploading");

        let file_guid = self
            .service
            .before_upload(
                &prepared.transfer_guid,
                &prepared.prefix,
                &file.name,
                file.size,
            )
            .await?;
        let encoded = encode_object_path(&prepared.prefix, &prepared.transfer_guid, &file.name);
        let init = self
            .storage
            .init_multipart(
                &prepared.upload_token,
                &encoded,
                &prepared.transfer_guid,
                &prepared.prefix,
            )
            .await?;
        let session = Arc::new(UploadSession {
            upload_token: prepared.upload_token.clone(),
            transfer_guid: prepared.transfer_guid.clone(),
            file_guid,
            encoded_object_path: encoded,
            upload_id: init.upload_id,
        });

        let transport = Arc::new(
            BlockUploader::new(Arc::clone(&self.storage), Arc::clone(&session))
                .verify_checksum(self.config.verify_checksum),
        );
        let committer =
            MultipartCommitter::new(Arc::clone(&self.storage), Arc::clone(&session), &file.name);

        let progress = Arc::new(TransferProgress::new(file.size));
        let engine = UploadEngine::new(self.config.clone())?.with_progress(progress.sink());
        let ticker = self
            .options
            .show_progress
            .then(|| ProgressTicker::start(file.name.clone(), Arc::clone(&progress), DEFAULT_TICK));

        let outcome = engine.upload_file(&file.path, transport, &committer).await;
        if let Some(ticker) = ticker {
            ticker.stop().await;
        }
        let result = outcome?;

        self.service
            .uploaded(&session.transfer_guid, &session.file_guid, &result.id)
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowshare_client::ClientConfig;
    use cowshare_client::mock::{MockResponse, MockServer, RecordedRequest};
    use cowshare_transfer::{RetryPolicy, checksum_bytes};
    use std::time::Duration;

    /// Answers every share-service and object-store call of an upload.
    fn happy_service(req: &RecordedRequest) -> MockResponse {
        let path = req.path.as_str();
        if path.starts_with("/api/transfer/preparesend") {
            MockResponse::json(
                r#"{"uptoken":"tok","transferguid":"tg","uniqueurl":"0123456789abcd","prefix":"pfx"}"#,
            )
        } else if path.starts_with("/api/transfer/beforeupload") {
            MockResponse::json(r#"{"fileGuid":"fg"}"#)
        } else if path.starts_with("/api/transfer/v2/bindpasscode")
            || path.starts_with("/api/transfer/uploaded")
        {
            MockResponse::text("true")
        } else if path.starts_with("/api/transfer/complete") {
            MockResponse::json(r#"{"complete":true,"tempDownloadCode":"654321"}"#)
        } else if req.method == "PUT" {
            let md5 = checksum_bytes(&req.body);
            MockResponse::json(&format!(r#"{{"etag":"e","md5":"{md5}"}}"#))
        } else if path.ends_with("/uploads") {
            MockResponse::json(r#"{"uploadId":"up","expireAt":0}"#)
        } else {
            MockResponse::json(r#"{"hash":"merged","key":"k"}"#)
        }
    }

    fn uploader(url: &str, options: UploadOptions) -> Uploader {
        let client = ClientConfig::default();
        let service = Arc::new(ServiceClient::new(&client).unwrap().with_base_url(url));
        let storage = Arc::new(
            StorageClient::new(&client)
                .unwrap()
                .with_base_url(format!("{url}/store")),
        );
        let config = TransferConfig {
            block_size: 8,
            concurrency: 2,
            retry: RetryPolicy::unbounded().with_backoff(Duration::ZERO),
            verify_checksum: true,
            ..TransferConfig::default()
        };
        Uploader::new(service, storage, config, options).unwrap()
    }

    fn write_files(dir: &std::path::Path) -> Vec<PathBuf> {
        let a = dir.join("a.txt");
        let b = dir.join("b.txt");
        std::fs::write(&a, b"first file contents").unwrap();
        std::fs::write(&b, b"second").unwrap();
        vec![a, b]
    }

    #[tokio::test]
    async fn per_file_mode_opens_one_share_each() {
        let server = MockServer::start(happy_service).await;
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path());

        let report = uploader(server.url(), UploadOptions::default())
            .upload(&files)
            .await;

        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.transfers.len(), 2);
        assert_eq!(report.transfers[0].download_code.as_deref(), Some("654321"));
        assert!(report.transfers[0].share_url.ends_with("/s/0123456789abcd"));
        assert_eq!(server.requests_to("/api/transfer/preparesend").len(), 2);
        assert_eq!(server.requests_to("/api/transfer/complete").len(), 2);

        let uploaded = server.requests_to("/api/transfer/uploaded");
        assert_eq!(uploaded.len(), 2);
        assert!(uploaded[0].body_text().contains("merged"));
        // 19 bytes in 8-byte blocks plus 6 bytes in one block.
        assert_eq!(server.requests().iter().filter(|r| r.method == "PUT").count(), 4);
    }

    #[tokio::test]
    async fn single_mode_shares_one_transfer() {
        let server = MockServer::start(happy_service).await;
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path());
        let options = UploadOptions {
            single_mode: true,
            passcode: Some("1234".into()),
            ..UploadOptions::default()
        };

        let report = uploader(server.url(), options).upload(&files).await;

        assert!(report.is_success());
        assert_eq!(report.transfers.len(), 1);
        assert_eq!(report.transfers[0].files, files);

        let prepare = server.requests_to("/api/transfer/preparesend");
        assert_eq!(prepare.len(), 1);
        assert!(prepare[0].body_text().contains("25"));
        assert_eq!(server.requests_to("/api/transfer/v2/bindpasscode").len(), 1);
        assert_eq!(server.requests_to("/api/transfer/beforeupload").len(), 2);
        assert_eq!(server.requests_to("/api/transfer/complete").len(), 1);
    }

    #[tokio::test]
    async fn missing_input_is_reported_and_skipped() {
        let server = MockServer::start(happy_service).await;
        let dir = tempfile::tempdir().unwrap();
        let mut files = write_files(dir.path());
        files.insert(0, dir.path().join("ghost.bin"));

        let report = uploader(server.url(), UploadOptions::default())
            .upload(&files)
            .await;

        assert_eq!(report.missing, vec![dir.path().join("ghost.bin")]);
        assert_eq!(report.transfers.len(), 2);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn failed_notification_fails_file_but_batch_continues() {
        let server = MockServer::start(|req| {
            if req.path.starts_with("/api/transfer/uploaded") {
                MockResponse::text("false")
            } else {
                happy_service(req)
            }
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path());

        let report = uploader(server.url(), UploadOptions::default())
            .upload(&files)
            .await;

        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].error.contains("finish upload failed"));
        // Each share is still completed.
        assert_eq!(report.transfers.len(), 2);
        assert!(report.transfers.iter().all(|t| t.files.is_empty()));
    }

    #[tokio::test]
    async fn prepare_error_skips_file() {
        let server = MockServer::fixed(MockResponse::json(
            r#"{"error":true,"error_message":"too large"}"#,
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path());

        let report = uploader(server.url(), UploadOptions::default())
            .upload(&files)
            .await;

        assert!(report.transfers.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[1].error.contains("too large"));
    }
}
