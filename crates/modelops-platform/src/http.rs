//! HTTP client abstraction and native implementation.
//!
//! The external job service and webhook notifier talk HTTP through the
//! [`HttpClient`] trait so tests can point them at a mock server, and the
//! transport stays swappable. The native implementation uses [`reqwest`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Boxed transport error.
pub type HttpError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP response from a request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code (e.g., 200, 404, 500).
    pub status: u16,
    /// Response headers as key-value pairs.
    pub headers: HashMap<String, String>,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Parse body as UTF-8 text.
    pub fn text(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.clone())
    }

    /// Parse body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Check if status is success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 5xx: the server may recover, so the call is worth retrying.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Body as text, truncated for error messages.
    pub fn snippet(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let mut s: String = text.chars().take(200).collect();
        if text.chars().count() > 200 {
            s.push_str("...");
        }
        s
    }
}

/// Platform-agnostic HTTP client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send an HTTP request with the given method, URL, headers, and optional body.
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, HttpError>;

    /// Send an HTTP GET request.
    async fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, HttpError> {
        self.request("GET", url, headers, None).await
    }

    /// POST a JSON-serializable value with `content-type: application/json`.
    async fn post_json(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, HttpError> {
        let mut all = headers.clone();
        all.entry("content-type".into())
            .or_insert_with(|| "application/json".into());
        let bytes = serde_json::to_vec(body)?;
        self.request("POST", url, &all, Some(&bytes)).await
    }
}

/// Native HTTP client using [`reqwest`].
pub struct NativeHttpClient {
    client: reqwest::Client,
}

impl NativeHttpClient {
    /// Create a client with a 60-second request timeout.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(Duration::from_secs(60))
    }

    /// Create a client with a custom request timeout.
    ///
    /// Idle pooled connections are dropped after 30 seconds; poll requests
    /// are spaced further apart than that, so keeping them warm buys nothing.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for NativeHttpClient {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, HttpError> {
        let reqwest_method = method.parse::<reqwest::Method>()?;
        let mut builder = self.client.request(reqwest_method, url);

        for (key, value) in headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        if let Some(body_bytes) = body {
            builder = builder.body(body_bytes.to_vec());
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let mut resp_headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                resp_headers.insert(key.as_str().to_string(), v.to_string());
            }
        }
        let resp_body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers: resp_headers,
            body: resp_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &[u8]) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: body.to_vec(),
        }
    }

    #[test]
    fn response_text_and_json() {
        let r = response(200, br#"{"job_id": "j-1"}"#);
        assert!(r.text().unwrap().contains("j-1"));
        let parsed: HashMap<String, String> = r.json().unwrap();
        assert_eq!(parsed["job_id"], "j-1");
        assert!(response(200, b"not json").json::<HashMap<String, String>>().is_err());
    }

    #[test]
    fn status_classes() {
        for status in [200, 201, 204, 299] {
            assert!(response(status, b"").is_success(), "{status} should be success");
        }
        assert!(!response(404, b"").is_success());
        assert!(response(503, b"").is_server_error());
        assert!(!response(400, b"").is_server_error());
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let body = "x".repeat(500);
        let s = response(500, body.as_bytes()).snippet();
        assert_eq!(s.len(), 203);
        assert!(s.ends_with("..."));
        assert_eq!(response(500, b"boom").snippet(), "boom");
    }

    #[tokio::test]
    async fn native_client_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::JsonString(r#"{"ok":true}"#.into()))
            .with_status(202)
            .with_body("accepted")
            .create_async()
            .await;

        let client = NativeHttpClient::new().unwrap();
        let url = format!("{}/hook", server.url());
        let resp = client
            .post_json(&url, &HashMap::new(), &serde_json::json!({"ok": true}))
            .await
            .unwrap();

        assert_eq!(resp.status, 202);
        assert_eq!(resp.text().unwrap(), "accepted");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn native_client_sends_headers_on_get() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/jobs/j-1")
            .match_header("authorization", "Bearer t0k")
            .with_status(200)
            .with_body(r#"{"state": "queued"}"#)
            .create_async()
            .await;

        let client = NativeHttpClient::new().unwrap();
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer t0k".to_string());
        let resp = client
            .get(&format!("{}/jobs/j-1", server.url()), &headers)
            .await
            .unwrap();

        assert!(resp.is_success());
        mock.assert_async().await;
    }
}
