//! Object-store client: multipart uploads and ranged downloads.

use std::time::Duration;

use bytes::Bytes;
use cowshare_protocol::{
    InitMultipartResponse, MergePart, MergeRequest, MergeResponse, PartUploadResponse,
    UploadSession,
};
use cowshare_transfer::{ByteRange, OutputFile};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, RANGE};
use tracing::debug;

use crate::{ClientConfig, Error, REFERER, build_http, check_status};

/// Bucket endpoint of the object store.
pub const DEFAULT_STORAGE_URL: &str =
    "https://upload-fog-cn-east-1.qiniup.com/buckets/cowtransfer-yz/objects";

/// What a `HEAD` request reveals about a download link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteObject {
    pub length: u64,
    pub accepts_ranges: bool,
}

/// Object-store client.
pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl StorageClient {
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        Ok(Self {
            http: build_http()?,
            base_url: DEFAULT_STORAGE_URL.to_string(),
            timeout: config.timeout,
        })
    }

    /// Points the client at another bucket endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn uploads_url(&self, encoded_path: &str) -> String {
        format!("{}/{}/uploads", self.base_url, encoded_path)
    }

    /// Sends an authenticated object-store request and returns the body.
    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        token: &str,
        body: Bytes,
    ) -> Result<Bytes, Error> {
        debug!(%method, url, size = body.len(), "object store request");
        let auth =
            HeaderValue::from_str(&format!("UpToken {token}")).map_err(|_| Error::InvalidToken)?;
        let resp = self
            .http
            .request(method, url)
            .timeout(self.timeout)
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::REFERER, REFERER)
            .body(body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?)
    }

    /// Opens a multipart upload for an object and returns its session id.
    pub async fn init_multipart(
        &self,
        token: &str,
        encoded_path: &str,
        transfer_guid: &str,
        prefix: &str,
    ) -> Result<InitMultipartResponse, Error> {
        let payload = serde_json::to_vec(&serde_json::json!({
            "transferGuid": transfer_guid,
            "storagePrefix": prefix,
        }))?;
        let body = self
            .send(
                reqwest::Method::POST,
                &self.uploads_url(encoded_path),
                token,
                payload.into(),
            )
            .await?;
        let init: InitMultipartResponse = serde_json::from_slice(&body)?;
        if init.upload_id.is_empty() {
            return Err(Error::Service("object store returned no upload id".into()));
        }
        Ok(init)
    }

    /// Stores one block of an open multipart upload.
    pub async fn put_block(
        &self,
        session: &UploadSession,
        index: u32,
        data: Bytes,
    ) -> Result<PartUploadResponse, Error> {
        let url = format!(
            "{}/{}/{}",
            self.uploads_url(&session.encoded_object_path),
            session.upload_id,
            index
        );
        let body = self
            .send(reqwest::Method::PUT, &url, &session.upload_token, data)
            .await?;
        let part: PartUploadResponse = serde_json::from_slice(&body)?;
        if part.etag.is_empty() {
            return Err(Error::Service(format!("block {index} acknowledged without etag")));
        }
        Ok(part)
    }

    /// Stitches the uploaded blocks into the final object.
    pub async fn merge(
        &self,
        session: &UploadSession,
        parts: Vec<MergePart>,
        file_name: &str,
    ) -> Result<MergeResponse, Error> {
        let url = format!(
            "{}/{}",
            self.uploads_url(&session.encoded_object_path),
            session.upload_id
        );
        let request = MergeRequest {
            parts,
            fname: file_name.to_string(),
            mime_type: String::new(),
        };
        let payload = serde_json::to_vec(&request)?;
        let body = self
            .send(reqwest::Method::POST, &url, &session.upload_token, payload.into())
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Reads the length and range support of a download link.
    pub async fn probe(&self, url: &str) -> Result<RemoteObject, Error> {
        let resp = self
            .http
            .head(url)
            .timeout(self.timeout)
            .header(reqwest::header::REFERER, REFERER)
            .send()
            .await?;
        let status = resp.status();
        if status.as_u16() > 400 {
            return Err(Error::Api {
                status: status.as_u16(),
                body: "link unavailable".into(),
            });
        }
        // reqwest reports a zero body length for HEAD, so read the header.
        let length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::Service("download link has no content length".into()))?;
        let accepts_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .is_some_and(|v| !v.is_empty() && v.as_bytes() != b"none");
        Ok(RemoteObject {
            length,
            accepts_ranges,
        })
    }

    /// Downloads one byte range of `url` into `out` at the range's offset.
    ///
    /// Returns the number of bytes written. A server that ignores the
    /// `Range` header is only accepted for ranges starting at zero.
    pub async fn fetch_range(
        &self,
        url: &str,
        range: &ByteRange,
        out: &OutputFile,
    ) -> Result<u64, Error> {
        let Some(header) = range.header_value() else {
            return Ok(0);
        };
        let resp = self
            .http
            .get(url)
            .header(RANGE, header)
            .header(reqwest::header::REFERER, REFERER)
            .send()
            .await?;
        let mut resp = check_status(resp).await?;
        if resp.status() != StatusCode::PARTIAL_CONTENT && range.start != 0 {
            return Err(Error::Api {
                status: resp.status().as_u16(),
                body: "range request not honoured".into(),
            });
        }

        let mut offset = range.start;
        while offset < range.end {
            let Some(chunk) = resp.chunk().await? else {
                break;
            };
            let room = (range.end - offset).min(chunk.len() as u64) as usize;
            let written = out
                .write_at(offset, chunk.slice(..room))
                .await
                .map_err(|e| Error::Service(format!("write failed: {e}")))?;
            offset += written as u64;
            if written < room {
                break;
            }
        }

        let written = offset - range.start;
        if written < range.len() {
            return Err(Error::Service(format!(
                "range {} ended after {written} of {} bytes",
                range.index,
                range.len()
            )));
        }
        Ok(written)
    }
}
