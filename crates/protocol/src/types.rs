use serde::{Deserialize, Serialize};

/// Response to the prepare-send call that opens a transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepareSendResponse {
    #[serde(default, rename = "uptoken")]
    pub upload_token: String,
    #[serde(default, rename = "transferguid")]
    pub transfer_guid: String,
    #[serde(default, rename = "fileguid")]
    pub file_guid: String,
    #[serde(default, rename = "uniqueurl")]
    pub unique_url: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, rename = "qrcode")]
    pub qr_code: String,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub error_message: String,
}

/// Response to the before-upload call that registers one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeUploadResponse {
    #[serde(default)]
    pub file_guid: String,
}

/// Response to the complete call that closes a transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    #[serde(default)]
    pub temp_download_code: String,
    #[serde(default)]
    pub complete: bool,
}

/// Everything the block engine needs to upload one file.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub upload_token: String,
    pub transfer_guid: String,
    pub file_guid: String,
    /// URL-safe base64 object path (see [`crate::encode_object_path`]).
    pub encoded_object_path: String,
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Download side
// ---------------------------------------------------------------------------

/// Transfer details for a share link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDetails {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub download_name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub uploaded: bool,
    #[serde(default, rename = "transferFileDtos")]
    pub files: Vec<DownloadFile>,
}

/// One file inside a transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFile {
    pub guid: String,
    pub file_name: String,
    /// Size in KiB as a decimal string.
    #[serde(default)]
    pub size: String,
}

impl DownloadFile {
    /// Advertised size in bytes, if the service sent a parsable value.
    pub fn approx_bytes(&self) -> Option<u64> {
        let kib: f64 = self.size.trim().parse().ok()?;
        if kib.is_finite() && kib >= 0.0 {
            Some((kib * 1024.0) as u64)
        } else {
            None
        }
    }
}

/// Response to the download-config call; `link` is the direct object URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfigResponse {
    #[serde(default)]
    pub link: String,
}

/// Response to a short-code lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShortCodeResponse {
    #[serde(default)]
    pub url: String,
}
