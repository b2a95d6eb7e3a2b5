//! Share flows on top of the transfer engine.
//!
//! Uploads local files into shares, downloads shares by link and turns
//! short download codes into links.

pub mod destination;
pub mod download;
pub mod error;
pub mod report;
pub mod scanner;
pub mod ticker;
pub mod upload;

use std::path::PathBuf;

pub use download::{Downloader, extract_share_id};
pub use error::ShareError;
pub use report::{DownloadReport, Failure, TransferSummary, UploadReport};
pub use upload::{UploadOptions, Uploader};

/// Command-line inputs split by direction.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Inputs {
    /// Share links to download.
    pub links: Vec<String>,
    /// Local paths to upload.
    pub paths: Vec<PathBuf>,
}

/// Splits inputs into share links (`https://...`) and local paths.
pub fn classify_inputs<I, S>(inputs: I) -> Inputs
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut split = Inputs::default();
    for input in inputs {
        let input = input.into();
        if input.starts_with("https://") {
            split.links.push(input);
        } else {
            split.paths.push(PathBuf::from(input));
        }
    }
    split
}
