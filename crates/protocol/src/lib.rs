//! Wire types exchanged with the share service and its object store.
//!
//! `messages` holds the object-store bodies used by the block engine
//! (block PUT, merge POST, multipart init); `types` holds the share-service
//! metadata bodies (prepare-send, download details, short codes).

pub mod messages;
pub mod types;

pub use messages::{
    InitMultipartResponse, MergePart, MergeRequest, MergeResponse, PartUploadResponse,
    encode_object_path,
};
pub use types::{
    BeforeUploadResponse, CompleteResponse, DownloadConfigResponse, DownloadDetails, DownloadFile,
    PrepareSendResponse, ShortCodeResponse, UploadSession,
};
