use crate::config::ExtractConfig;
use crate::render_playwright::PlaywrightBackend;
use crate::LocalFetcher;
use pagegist_core::{
    first_success, Error, ExtractedContent, ExtractionRequest, ExtractionStrategy, FetchBackend,
    FetchRequest, RenderBackend, RenderSession, Result, SourceStrategy,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Subtrees whose text never counts as page content.
const REMOVED_TAGS: [&str; 5] = ["script", "style", "nav", "footer", "noscript"];

/// Selector whose presence means the rendered document is usable.
const BODY_SELECTOR: &str = "body";

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_any_text(s: &str) -> bool {
    s.chars().any(|c| !c.is_whitespace())
}

fn collect_text(el: html_scraper::ElementRef<'_>, out: &mut Vec<String>) {
    for child in el.children() {
        if let Some(child_el) = html_scraper::ElementRef::wrap(child) {
            let tag = child_el.value().name();
            if REMOVED_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                continue;
            }
            collect_text(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            let t = norm_ws(text);
            if !t.is_empty() {
                out.push(t);
            }
        }
    }
}

/// Plain text of an HTML document with script/style/nav/footer subtrees removed.
///
/// Text nodes are trimmed and joined with single spaces.
pub fn static_text_from_html(html: &str) -> String {
    let doc = html_scraper::Html::parse_document(html);
    let mut parts = Vec::new();
    collect_text(doc.root_element(), &mut parts);
    parts.join(" ")
}

/// Clip to `max_chars` characters. Returns the clipped text and whether anything was cut.
pub fn truncate_to_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => (s[..byte].to_string(), true),
        None => (s.to_string(), false),
    }
}

/// Single GET with browser-like headers, parsed without running scripts.
pub struct StaticStrategy {
    fetcher: Arc<dyn FetchBackend>,
    cfg: Arc<ExtractConfig>,
}

impl StaticStrategy {
    pub fn new(fetcher: Arc<dyn FetchBackend>, cfg: Arc<ExtractConfig>) -> Self {
        Self { fetcher, cfg }
    }

    fn browser_headers(&self) -> BTreeMap<String, String> {
        let mut h = BTreeMap::new();
        h.insert("User-Agent".to_string(), self.cfg.user_agent.clone());
        h.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8"
                .to_string(),
        );
        h.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
        h.insert("Referer".to_string(), "https://www.google.com/".to_string());
        h
    }
}

#[async_trait::async_trait]
impl ExtractionStrategy for StaticStrategy {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::Static
    }

    async fn extract(&self, req: &ExtractionRequest) -> Result<String> {
        let fetch = FetchRequest {
            url: req.as_str().to_string(),
            timeout_ms: Some(self.cfg.fetch_timeout.as_millis() as u64),
            max_bytes: Some(self.cfg.max_body_bytes),
            headers: self.browser_headers(),
        };
        let resp = self.fetcher.fetch(&fetch).await?;
        tracing::debug!(
            status = resp.status,
            bytes = resp.bytes.len(),
            truncated = resp.truncated,
            charset = resp.charset().unwrap_or("utf-8"),
            "static fetch done"
        );
        if !resp.is_success() {
            return Err(Error::Fetch(format!("HTTP {}", resp.status)));
        }
        let text = static_text_from_html(&resp.text());
        let n = text.chars().count();
        if n < self.cfg.min_static_chars {
            return Err(Error::Extract(format!(
                "static text too short ({n} chars < {})",
                self.cfg.min_static_chars
            )));
        }
        Ok(text)
    }
}

/// Headless-browser render, then the first matching content region.
pub struct RenderedStrategy {
    backend: Arc<dyn RenderBackend>,
    cfg: Arc<ExtractConfig>,
}

impl RenderedStrategy {
    pub fn new(backend: Arc<dyn RenderBackend>, cfg: Arc<ExtractConfig>) -> Self {
        Self { backend, cfg }
    }

    async fn drive(&self, session: &mut dyn RenderSession, url: &str) -> Result<String> {
        session.load(url, self.cfg.render_timeout).await?;
        session
            .wait_for(BODY_SELECTOR, self.cfg.render_timeout)
            .await?;

        let mut text = String::new();
        for selector in &self.cfg.content_selectors {
            match session.query_selector_text(selector).await {
                Ok(Some(t)) => {
                    tracing::debug!(selector = %selector, chars = t.chars().count(), "content region matched");
                    text = t;
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(selector = %selector, error = %e, "content selector failed");
                    continue;
                }
            }
        }
        if !has_any_text(&text) {
            text = session
                .query_selector_text(BODY_SELECTOR)
                .await?
                .unwrap_or_default();
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl ExtractionStrategy for RenderedStrategy {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::Rendered
    }

    async fn extract(&self, req: &ExtractionRequest) -> Result<String> {
        if self.cfg.render_disabled {
            return Err(Error::NotConfigured(
                "render backend disabled (PAGEGIST_RENDER_DISABLE)".to_string(),
            ));
        }
        let mut session = self.backend.open().await?;
        let out = self.drive(session.as_mut(), req.as_str()).await;
        // Released on every returned path; a dropped session kills its browser on its own.
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "render session close failed");
        }
        out
    }
}

/// Ordered extraction strategies, first success wins.
pub struct ContentExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    max_chars: usize,
}

impl ContentExtractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>, max_chars: usize) -> Self {
        Self {
            strategies,
            max_chars,
        }
    }

    /// Static fetch first, headless render second.
    pub fn with_backends(
        cfg: Arc<ExtractConfig>,
        fetcher: Arc<dyn FetchBackend>,
        render: Arc<dyn RenderBackend>,
    ) -> Self {
        let max_chars = cfg.max_chars;
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(StaticStrategy::new(fetcher, cfg.clone())),
            Box::new(RenderedStrategy::new(render, cfg)),
        ];
        Self::new(strategies, max_chars)
    }

    pub fn local(cfg: Arc<ExtractConfig>) -> Result<Self> {
        let fetcher = Arc::new(LocalFetcher::new(&cfg.user_agent)?);
        let render = Arc::new(PlaywrightBackend::new(cfg.clone()));
        Ok(Self::with_backends(cfg, fetcher, render))
    }

    pub async fn extract(&self, req: &ExtractionRequest) -> Result<ExtractedContent> {
        let max_chars = self.max_chars;
        let out = first_success(&self.strategies, move |s| async move {
            let kind = s.strategy();
            tracing::debug!(strategy = kind.as_str(), url = req.as_str(), "extraction attempt");
            let text = s.extract(req).await.inspect_err(|e| {
                tracing::info!(strategy = kind.as_str(), error = %e, "extraction strategy failed");
            })?;
            let (text, clipped) = truncate_to_chars(&text, max_chars);
            if !has_any_text(&text) {
                return Err(Error::Extract(format!("{} strategy produced no text", kind.as_str())));
            }
            tracing::info!(
                strategy = kind.as_str(),
                chars = text.chars().count(),
                clipped,
                "extraction succeeded"
            );
            Ok(ExtractedContent {
                text,
                source_strategy: kind,
            })
        })
        .await;

        out.map_err(|failures| {
            let reasons: Vec<String> = self
                .strategies
                .iter()
                .zip(failures.iter())
                .map(|(s, e)| format!("{}: {e}", s.strategy().as_str()))
                .collect();
            Error::Extract(format!("all strategies failed ({})", reasons.join("; ")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
        dropped: AtomicUsize,
    }

    #[derive(Clone, Copy, PartialEq)]
    enum FailAt {
        Nothing,
        Load,
        Wait,
        Query,
    }

    struct FakeRender {
        regions: BTreeMap<String, String>,
        fail_at: FailAt,
        counters: Arc<Counters>,
    }

    struct FakeSession {
        regions: BTreeMap<String, String>,
        fail_at: FailAt,
        counters: Arc<Counters>,
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl RenderBackend for FakeRender {
        async fn open(&self) -> Result<Box<dyn RenderSession>> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                regions: self.regions.clone(),
                fail_at: self.fail_at,
                counters: self.counters.clone(),
            }))
        }
    }

    #[async_trait::async_trait]
    impl RenderSession for FakeSession {
        async fn load(&mut self, _url: &str, _timeout: Duration) -> Result<()> {
            if self.fail_at == FailAt::Load {
                return Err(Error::Render("net::ERR_NAME_NOT_RESOLVED".to_string()));
            }
            Ok(())
        }

        async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
            if self.fail_at == FailAt::Wait {
                return Err(Error::Render(format!("Timeout waiting for {selector}")));
            }
            Ok(())
        }

        async fn query_selector_text(&mut self, selector: &str) -> Result<Option<String>> {
            if self.fail_at == FailAt::Query {
                return Err(Error::Render(format!("bad selector {selector}")));
            }
            Ok(self.regions.get(selector).cloned())
        }

        async fn close(self: Box<Self>) -> Result<()> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fake_render(regions: &[(&str, &str)], fail_at: FailAt) -> (Arc<FakeRender>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let render = FakeRender {
            regions: regions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fail_at,
            counters: counters.clone(),
        };
        (Arc::new(render), counters)
    }

    fn extractor(render: Arc<FakeRender>) -> ContentExtractor {
        let cfg = Arc::new(ExtractConfig {
            fetch_timeout: Duration::from_secs(2),
            ..ExtractConfig::default()
        });
        let fetcher = Arc::new(LocalFetcher::new(&cfg.user_agent).unwrap());
        ContentExtractor::with_backends(cfg, fetcher, render)
    }

    fn req(url: String) -> ExtractionRequest {
        ExtractionRequest::parse(&url).unwrap()
    }

    #[test]
    fn static_text_drops_script_style_nav_and_footer() {
        let html = r#"
        <html><head><title>T</title><style>.a{color:red}</style></head><body>
          <nav><a href="/">Home</a></nav>
          <script>var secret = 1;</script>
          <p>Hello   world.</p><p>Second <b>para</b>.</p>
          <footer>Privacy</footer>
        </body></html>"#;
        let out = static_text_from_html(html);
        assert_eq!(out, "T Hello world. Second para .");
        assert!(!out.contains("secret"));
        assert!(!out.contains("Home"));
        assert!(!out.contains("Privacy"));
    }

    #[test]
    fn truncate_to_chars_counts_characters_not_bytes() {
        let (s, clipped) = truncate_to_chars("héllo", 2);
        assert_eq!(s, "hé");
        assert!(clipped);
        let (s, clipped) = truncate_to_chars("abc", 10);
        assert_eq!(s, "abc");
        assert!(!clipped);
    }

    #[tokio::test]
    async fn static_success_never_opens_a_browser() {
        let body = format!("<html><body><article>{}</article></body></html>", "Article body text. ".repeat(10));
        let app = Router::new().route(
            "/",
            get(move || {
                let body = body.clone();
                async move { axum::response::Html(body) }
            }),
        );
        let addr = serve(app).await;

        let (render, counters) = fake_render(&[("body", "rendered")], FailAt::Nothing);
        let out = extractor(render).extract(&req(format!("http://{addr}/"))).await.unwrap();
        assert_eq!(out.source_strategy, SourceStrategy::Static);
        assert!(out.text.starts_with("Article body text."));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_static_text_falls_back_to_rendered_region() {
        let app = Router::new().route(
            "/",
            get(|| async { axum::response::Html("<html><body><div id=app></div></body></html>") }),
        );
        let addr = serve(app).await;

        let (render, counters) = fake_render(
            &[
                ("main", "Rendered main region text."),
                ("body", "Full body text including navigation."),
            ],
            FailAt::Nothing,
        );
        let out = extractor(render).extract(&req(format!("http://{addr}/"))).await.unwrap();
        assert_eq!(out.source_strategy, SourceStrategy::Rendered);
        assert_eq!(out.text, "Rendered main region text.");
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_error_falls_back_and_rendered_text_is_truncated() {
        let app = Router::new().route("/", get(|| async { (StatusCode::FORBIDDEN, "blocked") }));
        let addr = serve(app).await;

        let long = "word ".repeat(2_000);
        let (render, _counters) = fake_render(&[("article", long.as_str())], FailAt::Nothing);
        let out = extractor(render).extract(&req(format!("http://{addr}/"))).await.unwrap();
        assert_eq!(out.source_strategy, SourceStrategy::Rendered);
        assert_eq!(out.text.chars().count(), 4_000);
        assert_eq!(out.text, long.chars().take(4_000).collect::<String>());
    }

    #[tokio::test]
    async fn empty_region_falls_back_to_full_body_text() {
        let app = Router::new().route("/", get(|| async { (StatusCode::NOT_FOUND, "") }));
        let addr = serve(app).await;

        let (render, _counters) = fake_render(&[("article", "   "), ("body", "Body text.")], FailAt::Nothing);
        let out = extractor(render).extract(&req(format!("http://{addr}/"))).await.unwrap();
        assert_eq!(out.text, "Body text.");
    }

    #[tokio::test]
    async fn both_strategies_failing_is_terminal_and_session_is_released() {
        let app = Router::new().route("/", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "") }));
        let addr = serve(app).await;

        let (render, counters) = fake_render(&[], FailAt::Load);
        let err = extractor(render)
            .extract(&req(format!("http://{addr}/")))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Extract(_)));
        assert!(msg.contains("static: fetch failed: HTTP 500"), "msg={msg}");
        assert!(msg.contains("rendered: render failed"), "msg={msg}");
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_is_released_when_wait_or_selectors_fail() {
        for fail_at in [FailAt::Wait, FailAt::Query] {
            let (render, counters) = fake_render(&[("body", "Body text.")], fail_at);
            let cfg = Arc::new(ExtractConfig::default());
            let err = RenderedStrategy::new(render, cfg)
                .extract(&req("https://example.com/".to_string()))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Render(_)), "err={err}");
            assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
            assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
            assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn whitespace_only_render_is_a_failure() {
        let app = Router::new().route("/", get(|| async { (StatusCode::NOT_FOUND, "") }));
        let addr = serve(app).await;

        let (render, _counters) = fake_render(&[("body", " \n ")], FailAt::Nothing);
        let err = extractor(render)
            .extract(&req(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rendered strategy produced no text"));
    }

    #[tokio::test]
    async fn disabled_render_reports_not_configured_without_opening() {
        let (render, counters) = fake_render(&[("body", "text")], FailAt::Nothing);
        let cfg = Arc::new(ExtractConfig {
            render_disabled: true,
            ..ExtractConfig::default()
        });
        let strategy = RenderedStrategy::new(render, cfg);
        let err = strategy
            .extract(&req("https://example.com/".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }
}
