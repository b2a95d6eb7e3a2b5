//! Share-service metadata API.
//!
//! Session calls are multipart form POSTs. They are retried a few times on
//! transport failure and adopt the session cookies the service hands out.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use cowshare_protocol::{
    BeforeUploadResponse, CompleteResponse, DownloadConfigResponse, DownloadDetails,
    PrepareSendResponse, ShortCodeResponse,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, SET_COOKIE};
use reqwest::multipart::Form;
use tracing::{debug, warn};

use crate::{ClientConfig, Error, REFERER as SITE, build_http, check_status};

/// Base URL of the share service.
pub const DEFAULT_SERVICE_URL: &str = "https://cowtransfer.com";

/// Extra attempts for a form call after a transport failure.
const FORM_RETRIES: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Share-service API client.
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    auth_code: Option<String>,
    cookie: Mutex<String>,
}

impl ServiceClient {
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        Ok(Self {
            http: build_http()?,
            base_url: DEFAULT_SERVICE_URL.to_string(),
            timeout: config.timeout,
            auth_code: config.auth_code.clone().filter(|c| !c.is_empty()),
            cookie: Mutex::new(config.cookie.clone()),
        })
    }

    /// Points the client at another service host.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Public share page of a transfer.
    pub fn share_url(&self, unique_url: &str) -> String {
        format!("{}/s/{unique_url}", self.base_url)
    }

    /// Session cookie currently sent with form calls.
    pub fn cookie(&self) -> String {
        self.cookie
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Cookie header value: session cookie, auth token, then a fresh
    /// per-request nonce cookie.
    fn cookie_header(&self) -> String {
        let mut value = self.cookie();
        if let Some(code) = &self.auth_code {
            value = format!("{value}; cow-auth-token={code}");
        }
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        if !value.is_empty() && !value.ends_with(';') {
            value.push(';');
        }
        format!("{value}cf-cs-k-20181214={nonce};")
    }

    /// Keeps the name=value part of every `Set-Cookie` when no session
    /// cookie is configured yet.
    fn adopt_cookies(&self, headers: &reqwest::header::HeaderMap) {
        let Ok(mut cookie) = self.cookie.lock() else {
            return;
        };
        if !cookie.is_empty() {
            return;
        }
        for value in headers.get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            if let Some(pair) = value.split(';').next() {
                cookie.push_str(pair.trim());
                cookie.push(';');
            }
        }
        if !cookie.is_empty() {
            debug!(cookie = %cookie, "adopted session cookies");
        }
    }

    async fn post_form_once(&self, url: &str, fields: &[(&str, String)]) -> Result<Bytes, Error> {
        let mut form = Form::new();
        for (name, value) in fields {
            form = form.text(name.to_string(), value.clone());
        }
        let mut request = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header(REFERER, SITE)
            .header(ORIGIN, SITE)
            .header(COOKIE, self.cookie_header())
            .multipart(form);
        if let Some(code) = &self.auth_code {
            request = request.header(AUTHORIZATION, code.as_str());
        }

        let resp = request.send().await?;
        self.adopt_cookies(resp.headers());
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?)
    }

    /// Posts a multipart form, retrying transport failures.
    async fn post_form(&self, path: &str, fields: &[(&str, String)]) -> Result<Bytes, Error> {
        let url = self.endpoint(path);
        let mut attempt = 0;
        loop {
            debug!(url = %url, attempt, "form request");
            match self.post_form_once(&url, fields).await {
                Err(Error::Http(e)) if attempt < FORM_RETRIES => {
                    attempt += 1;
                    warn!(url = %url, attempt, error = %e, "form request failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    }

    /// Creates a transfer sized for `total_size` bytes.
    ///
    /// `valid_days` asks for a non-default link lifetime.
    pub async fn prepare_send(
        &self,
        total_size: u64,
        valid_days: Option<u32>,
    ) -> Result<PrepareSendResponse, Error> {
        let mut fields = vec![("totalSize", total_size.to_string())];
        if let Some(days) = valid_days {
            fields.push(("validDays", days.to_string()));
        }
        let body = self.post_form("/api/transfer/preparesend", &fields).await?;
        let prepared: PrepareSendResponse = serde_json::from_slice(&body)?;
        if prepared.error {
            return Err(Error::Service(prepared.error_message));
        }
        if prepared.upload_token.is_empty() || prepared.transfer_guid.is_empty() {
            return Err(Error::Service("prepare-send returned no session".into()));
        }
        Ok(prepared)
    }

    /// Protects a transfer with a passcode.
    pub async fn bind_passcode(&self, transfer_guid: &str, passcode: &str) -> Result<(), Error> {
        let body = self
            .post_form(
                "/api/transfer/v2/bindpasscode",
                &[
                    ("transferguid", transfer_guid.to_string()),
                    ("passcode", passcode.to_string()),
                ],
            )
            .await?;
        expect_true(&body, "set passcode unsuccessful")
    }

    /// Registers a file in a transfer and returns its file guid.
    pub async fn before_upload(
        &self,
        transfer_guid: &str,
        prefix: &str,
        file_name: &str,
        file_size: u64,
    ) -> Result<String, Error> {
        let body = self
            .post_form(
                "/api/transfer/beforeupload",
                &[
                    ("fileId", String::new()),
                    ("type", String::new()),
                    ("fileName", file_name.to_string()),
                    ("originalName", file_name.to_string()),
                    ("fileSize", file_size.to_string()),
                    ("transferGuid", transfer_guid.to_string()),
                    ("storagePrefix", prefix.to_string()),
                ],
            )
            .await?;
        let resp: BeforeUploadResponse = serde_json::from_slice(&body)?;
        if resp.file_guid.is_empty() {
            return Err(Error::Service("before-upload returned no file guid".into()));
        }
        Ok(resp.file_guid)
    }

    /// Reports a merged object to the service.
    pub async fn uploaded(
        &self,
        transfer_guid: &str,
        file_guid: &str,
        hash: &str,
    ) -> Result<(), Error> {
        let body = self
            .post_form(
                "/api/transfer/uploaded",
                &[
                    ("transferGuid", transfer_guid.to_string()),
                    ("fileGuid", file_guid.to_string()),
                    ("hash", hash.to_string()),
                ],
            )
            .await?;
        expect_true(&body, "finish upload failed")
    }

    /// Closes a transfer and returns its short download code.
    pub async fn complete(&self, transfer_guid: &str) -> Result<CompleteResponse, Error> {
        let body = self
            .post_form(
                "/api/transfer/complete",
                &[
                    ("transferGuid", transfer_guid.to_string()),
                    ("fileId", String::new()),
                ],
            )
            .await?;
        let resp: CompleteResponse = serde_json::from_slice(&body)?;
        if !resp.complete {
            return Err(Error::Service("complete upload failed".into()));
        }
        Ok(resp)
    }

    /// Fetches the file list behind a share id.
    pub async fn transfer_details(
        &self,
        file_id: &str,
        passcode: &str,
    ) -> Result<DownloadDetails, Error> {
        let resp = self
            .http
            .get(self.endpoint("/transfer/transferdetail"))
            .timeout(self.timeout)
            .query(&[
                ("url", file_id),
                ("treceive", "undefined"),
                ("passcode", passcode),
            ])
            .header(REFERER, self.share_url(file_id))
            .header(COOKIE, self.cookie_header())
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(serde_json::from_slice(&resp.bytes().await?)?)
    }

    /// Resolves the direct download link of one file.
    pub async fn download_link(&self, file_guid: &str) -> Result<String, Error> {
        let resp = self
            .http
            .post(self.endpoint("/transfer/download"))
            .timeout(self.timeout)
            .query(&[("guid", file_guid)])
            .header(REFERER, SITE)
            .header(ORIGIN, SITE)
            .header(COOKIE, self.cookie_header())
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let config: DownloadConfigResponse = serde_json::from_slice(&resp.bytes().await?)?;
        if config.link.is_empty() {
            return Err(Error::Service("no download link for file".into()));
        }
        Ok(config.link)
    }

    /// Turns a short download code into a share URL.
    pub async fn resolve_short_code(&self, code: &str) -> Result<String, Error> {
        let resp = self
            .http
            .get(self.endpoint("/api/transfer/verifydownloadcode"))
            .timeout(self.timeout)
            .query(&[("code", code)])
            .send()
            .await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Api {
                status: status.as_u16(),
                body: "abnormal status for short code".into(),
            });
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("json") {
            return Err(Error::Service(format!(
                "unrecognized content type: {content_type}"
            )));
        }
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Err(Error::Service("empty short code response".into()));
        }
        let lookup: ShortCodeResponse = serde_json::from_slice(&body)?;
        if lookup.url.is_empty() {
            return Err(Error::Service("short code not found or expired".into()));
        }
        Ok(self.share_url(&lookup.url))
    }
}

fn expect_true(body: &[u8], message: &str) -> Result<(), Error> {
    if body.trim_ascii() == b"true" {
        Ok(())
    } else {
        Err(Error::Service(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResponse, MockServer};

    fn client(url: &str) -> ServiceClient {
        ServiceClient::new(&ClientConfig::default())
            .unwrap()
            .with_base_url(url)
    }

    #[tokio::test]
    async fn prepare_send_parses_session() {
        let server = MockServer::fixed(MockResponse::json(
            r#"{"uptoken":"tok","transferguid":"tg","uniqueurl":"abcdef0123456789","prefix":"2024","error":false}"#,
        ))
        .await;
        let prepared = client(server.url()).prepare_send(4096, None).await.unwrap();
        assert_eq!(prepared.upload_token, "tok");
        assert_eq!(prepared.transfer_guid, "tg");

        let req = &server.requests()[0];
        assert_eq!(req.path, "/api/transfer/preparesend");
        assert!(req.header("content-type").unwrap().starts_with("multipart/form-data"));
        let body = req.body_text();
        assert!(body.contains("name=\"totalSize\""));
        assert!(body.contains("4096"));
        assert!(!body.contains("validDays"));
    }

    #[tokio::test]
    async fn prepare_send_service_error() {
        let server = MockServer::fixed(MockResponse::json(
            r#"{"error":true,"error_message":"quota exceeded"}"#,
        ))
        .await;
        let err = client(server.url()).prepare_send(1, Some(7)).await.unwrap_err();
        assert!(matches!(err, Error::Service(m) if m == "quota exceeded"));
        assert!(server.requests()[0].body_text().contains("name=\"validDays\""));
    }

    #[tokio::test]
    async fn adopts_cookies_once() {
        let server = MockServer::fixed(
            MockResponse::text("true")
                .with_header("Set-Cookie", "SESSION=abc; Path=/; HttpOnly")
                .with_header("Set-Cookie", "region=cn; Path=/"),
        )
        .await;
        let client = client(server.url());
        client.bind_passcode("tg", "1234").await.unwrap();
        assert_eq!(client.cookie(), "SESSION=abc;region=cn;");

        client.bind_passcode("tg", "1234").await.unwrap();
        let second = &server.requests()[1];
        let cookie = second.header("cookie").unwrap();
        assert!(cookie.starts_with("SESSION=abc;region=cn;cf-cs-k-20181214="));
    }

    #[tokio::test]
    async fn configured_cookie_is_kept() {
        let server = MockServer::fixed(
            MockResponse::text("true").with_header("Set-Cookie", "SESSION=new"),
        )
        .await;
        let config = ClientConfig {
            cookie: "remember-me=xyz".into(),
            auth_code: Some("ac".into()),
            ..ClientConfig::default()
        };
        let client = ServiceClient::new(&config)
            .unwrap()
            .with_base_url(server.url());
        client.uploaded("tg", "fg", "h").await.unwrap();
        assert_eq!(client.cookie(), "remember-me=xyz");

        let req = &server.requests()[0];
        assert_eq!(req.header("authorization"), Some("ac"));
        assert!(req
            .header("cookie")
            .unwrap()
            .starts_with("remember-me=xyz; cow-auth-token=ac;"));
    }

    #[tokio::test]
    async fn uploaded_requires_true() {
        let server = MockServer::fixed(MockResponse::text("false")).await;
        let err = client(server.url()).uploaded("tg", "fg", "h").await.unwrap_err();
        assert!(matches!(err, Error::Service(_)));
    }

    #[tokio::test]
    async fn before_upload_returns_file_guid() {
        let server = MockServer::fixed(MockResponse::json(r#"{"fileGuid":"fg-1"}"#)).await;
        let guid = client(server.url())
            .before_upload("tg", "pfx", "a.txt", 10)
            .await
            .unwrap();
        assert_eq!(guid, "fg-1");
        let body = server.requests()[0].body_text();
        assert!(body.contains("name=\"originalName\""));
        assert!(body.contains("a.txt"));
    }

    #[tokio::test]
    async fn complete_returns_code() {
        let server = MockServer::fixed(MockResponse::json(
            r#"{"complete":true,"tempDownloadCode":"123456"}"#,
        ))
        .await;
        let done = client(server.url()).complete("tg").await.unwrap();
        assert_eq!(done.temp_download_code, "123456");
    }

    #[tokio::test]
    async fn complete_not_true_is_error() {
        let server = MockServer::fixed(MockResponse::json(r#"{"complete":false}"#)).await;
        assert!(client(server.url()).complete("tg").await.is_err());
    }

    #[tokio::test]
    async fn form_call_does_not_retry_status_errors() {
        let server = MockServer::fixed(MockResponse::new(500, "boom")).await;
        let err = client(server.url()).complete("tg").await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, .. }));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn form_call_retries_transport_failures() {
        // Nothing listens on this port once the listener is dropped.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client(&url).complete("tg").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[tokio::test]
    async fn transfer_details_sends_query() {
        let server = MockServer::fixed(MockResponse::json(
            r#"{"guid":"g","uploaded":true,"transferFileDtos":[{"guid":"f1","fileName":"a.bin","size":"1.5"}]}"#,
        ))
        .await;
        let details = client(server.url())
            .transfer_details("0123456789abcd", "pw")
            .await
            .unwrap();
        assert_eq!(details.files[0].file_name, "a.bin");

        let req = &server.requests()[0];
        assert_eq!(
            req.path,
            "/transfer/transferdetail?url=0123456789abcd&treceive=undefined&passcode=pw"
        );
        assert!(req.header("referer").unwrap().ends_with("/s/0123456789abcd"));
    }

    #[tokio::test]
    async fn download_link_resolves() {
        let server =
            MockServer::fixed(MockResponse::json(r#"{"link":"https://cdn.example/f"}"#)).await;
        let link = client(server.url()).download_link("f1").await.unwrap();
        assert_eq!(link, "https://cdn.example/f");
        assert_eq!(server.requests()[0].path, "/transfer/download?guid=f1");
    }

    #[tokio::test]
    async fn short_code_resolves_to_share_url() {
        let server = MockServer::fixed(MockResponse::json(r#"{"url":"abcdef01234567"}"#)).await;
        let client = client(server.url());
        let url = client.resolve_short_code("123456").await.unwrap();
        assert_eq!(url, format!("{}/s/abcdef01234567", server.url()));
        assert_eq!(
            server.requests()[0].path,
            "/api/transfer/verifydownloadcode?code=123456"
        );
    }

    #[tokio::test]
    async fn short_code_requires_json() {
        let server = MockServer::fixed(MockResponse::text(r#"{"url":"x"}"#)).await;
        let err = client(server.url()).resolve_short_code("1").await.unwrap_err();
        assert!(err.to_string().contains("content type"));
    }

    #[tokio::test]
    async fn short_code_empty_url_is_error() {
        let server = MockServer::fixed(MockResponse::json(r#"{"url":""}"#)).await;
        let err = client(server.url()).resolve_short_code("1").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn share_url_uses_base() {
        let client = ServiceClient::new(&ClientConfig::default()).unwrap();
        assert_eq!(
            client.share_url("abc"),
            "https://cowtransfer.com/s/abc"
        );
    }
}
