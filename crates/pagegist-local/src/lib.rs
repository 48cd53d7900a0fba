use pagegist_core::{Error, FetchBackend, FetchRequest, FetchResponse, Result};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod config;
pub mod extract;
pub mod inference;
pub mod pipeline;
pub mod render_playwright;
pub mod summarize;
pub mod textnorm;

pub use config::PipelineConfig;
pub use extract::ContentExtractor;
pub use pipeline::PipelineController;
pub use summarize::SummarizationOrchestrator;

#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
}

impl LocalFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            // Avoid “hang forever” on DNS/TLS/body stalls; FetchRequest.timeout_ms overrides.
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self { client })
    }

    fn apply_headers(
        &self,
        mut rb: reqwest::RequestBuilder,
        headers: &BTreeMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                rb = rb.header(name, value);
            }
        }
        rb
    }
}

/// Reads at most `cap` body bytes; the flag is set when the body was cut short.
async fn read_capped(resp: reqwest::Response, cap: usize) -> Result<(Vec<u8>, bool)> {
    use futures_util::StreamExt;

    let mut out = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
        let room = cap - out.len();
        if chunk.len() > room {
            out.extend_from_slice(&chunk[..room]);
            return Ok((out, true));
        }
        out.extend_from_slice(&chunk);
    }
    Ok((out, false))
}

#[async_trait::async_trait]
impl FetchBackend for LocalFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let url = url::Url::parse(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let mut rb = self.client.get(url);
        if let Some(to) = req.timeout() {
            rb = rb.timeout(to);
        }
        rb = self.apply_headers(rb, &req.headers);
        let resp = rb.send().await.map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let cap = req
            .max_bytes
            .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
        let (bytes, truncated) = read_capped(resp, cap).await?;

        Ok(FetchResponse {
            status,
            content_type,
            bytes,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn req(url: String, max_bytes: Option<u64>, headers: BTreeMap<String, String>) -> FetchRequest {
        FetchRequest {
            url,
            timeout_ms: Some(2_000),
            max_bytes,
            headers,
        }
    }

    #[tokio::test]
    async fn local_fetcher_forwards_request_headers() {
        let app = Router::new().route(
            "/",
            get(|headers: axum::http::HeaderMap| async move {
                let ua = headers
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let referer = headers
                    .get(header::REFERER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                (StatusCode::OK, format!("ua={ua} referer={referer}"))
            }),
        );
        let addr = serve(app).await;

        let fetcher = LocalFetcher::new("test-agent/1.0").unwrap();
        let mut hdrs = BTreeMap::new();
        hdrs.insert("Referer".to_string(), "https://www.google.com/".to_string());
        let resp = fetcher
            .fetch(&req(format!("http://{addr}/"), None, hdrs))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert!(resp.is_success());
        let body = resp.text();
        assert!(body.contains("ua=test-agent/1.0"), "body={body}");
        assert!(body.contains("referer=https://www.google.com/"), "body={body}");
    }

    #[tokio::test]
    async fn local_fetcher_caps_body_and_marks_truncated() {
        let app = Router::new().route("/", get(|| async { "x".repeat(10_000) }));
        let addr = serve(app).await;

        let fetcher = LocalFetcher::new("test-agent/1.0").unwrap();
        let resp = fetcher
            .fetch(&req(format!("http://{addr}/"), Some(1_000), BTreeMap::new()))
            .await
            .unwrap();
        assert_eq!(resp.bytes.len(), 1_000);
        assert!(resp.truncated);
    }

    #[tokio::test]
    async fn local_fetcher_keeps_content_type_for_charset_decoding() {
        let app = Router::new().route(
            "/",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/plain; charset=iso-8859-1")],
                    b"r\xe9sum\xe9".to_vec(),
                )
            }),
        );
        let addr = serve(app).await;

        let fetcher = LocalFetcher::new("test-agent/1.0").unwrap();
        let resp = fetcher
            .fetch(&req(format!("http://{addr}/"), None, BTreeMap::new()))
            .await
            .unwrap();
        assert_eq!(resp.charset(), Some("iso-8859-1"));
        assert_eq!(resp.text(), "résumé");
        assert!(!resp.truncated);
    }

    #[tokio::test]
    async fn local_fetcher_reports_non_success_status_without_erroring() {
        let app = Router::new().route("/", get(|| async { (StatusCode::NOT_FOUND, "nope") }));
        let addr = serve(app).await;

        let fetcher = LocalFetcher::new("test-agent/1.0").unwrap();
        let resp = fetcher
            .fetch(&req(format!("http://{addr}/"), None, BTreeMap::new()))
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn local_fetcher_rejects_unparseable_urls() {
        let fetcher = LocalFetcher::new("test-agent/1.0").unwrap();
        let err = fetcher
            .fetch(&req("not a url".to_string(), None, BTreeMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }
}
