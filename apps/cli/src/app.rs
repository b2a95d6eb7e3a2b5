//! Runs the downloads and uploads requested on the command line.

use std::sync::Arc;

use anyhow::Context;
use cowshare_client::{ServiceClient, StorageClient};
use cowshare_share::{Downloader, UploadReport, Uploader, classify_inputs};
use tracing::{error, info, warn};

use crate::config::Settings;

/// Processes every input. Returns `false` when anything failed.
pub async fn run(settings: Settings) -> anyhow::Result<bool> {
    let service = Arc::new(ServiceClient::new(&settings.client)?);
    let storage = Arc::new(StorageClient::new(&settings.client)?);

    let mut inputs = classify_inputs(settings.inputs.iter().cloned());
    if let Some(code) = &settings.short_code {
        let link = service
            .resolve_short_code(code)
            .await
            .context("unable to resolve short code")?;
        info!(code = %code, link = %link, "short code resolved");
        inputs.links.push(link);
    }

    if inputs.links.is_empty() && inputs.paths.is_empty() {
        anyhow::bail!("missing file(s) or url(s)");
    }

    let mut ok = true;

    if !inputs.links.is_empty() {
        let downloader = Downloader::new(
            Arc::clone(&service),
            Arc::clone(&storage),
            settings.transfer.clone(),
        )?
        .with_passcode(settings.passcode.clone())
        .with_progress(settings.upload.show_progress);

        for link in &inputs.links {
            match downloader.download(link, &settings.prefix).await {
                Ok(report) => {
                    for path in &report.saved {
                        println!("Saved: {}", path.display());
                    }
                    ok &= report.is_success();
                }
                Err(e) => {
                    error!(link = %link, error = %e, "download failed");
                    ok = false;
                }
            }
        }
    }

    if !inputs.paths.is_empty() {
        let uploader = Uploader::new(
            service,
            storage,
            settings.transfer.clone(),
            settings.upload.clone(),
        )?;
        let report = uploader.upload(&inputs.paths).await;
        print_upload_report(&report);
        ok &= report.is_success();
    }

    Ok(ok)
}

fn print_upload_report(report: &UploadReport) {
    for transfer in &report.transfers {
        println!("Destination: {}", transfer.share_url);
        if let Some(code) = &transfer.download_code {
            println!("Short Download Code: {code}");
        }
    }
    for path in &report.missing {
        warn!(path = %path.display(), "not found");
    }
    for failure in &report.failures {
        error!(subject = %failure.subject, error = %failure.error, "failed");
    }
}
