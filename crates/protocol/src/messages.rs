use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Multipart session
// ---------------------------------------------------------------------------

/// Response to `POST <base>/<object>/uploads`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMultipartResponse {
    pub upload_id: String,
    #[serde(default)]
    pub expire_at: i64,
}

/// Encodes `<prefix>/<transfer_guid>/<file_name>` as the object path segment.
///
/// The store expects standard base64 with `+` and `/` swapped for `-` and
/// `_`; padding is kept.
pub fn encode_object_path(prefix: &str, transfer_guid: &str, file_name: &str) -> String {
    URL_SAFE.encode(format!("{prefix}/{transfer_guid}/{file_name}"))
}

// ---------------------------------------------------------------------------
// Block upload
// ---------------------------------------------------------------------------

/// Response to a block PUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUploadResponse {
    pub etag: String,
    /// Hex MD5 of the stored bytes, as computed by the store.
    #[serde(default)]
    pub md5: String,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// One acknowledged block in a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePart {
    pub etag: String,
    pub part_number: u32,
}

/// Body of `POST <base>/<object>/uploads/<upload_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub parts: Vec<MergePart>,
    pub fname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
}

/// Response to a merge; `hash` identifies the committed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResponse {
    pub hash: String,
    #[serde(default)]
    pub key: String,
}
