//! Content fetching: URL in, cleaned [`Article`] out.
//!
//! [`CachingFetcher`] checks the [`ContentCache`] first and only goes to the
//! network on a miss, a stale entry, or an explicit refetch. The network
//! path is a [`PageLoader`]: plain HTTP by default, a headless browser when
//! JavaScript rendering is requested and available.

#[cfg(feature = "browser")]
pub mod browser;
pub mod clean;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::{ConfigError, FetchError};
use crate::research::cache::ContentCache;
use crate::research::model::{Article, domain_of, normalize_url};

#[cfg(feature = "browser")]
pub use browser::BrowserPageLoader;

/// Raw page as returned by a loader.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// URL after redirects.
    pub final_url: String,
    /// Lowercased `Content-Type`, possibly empty.
    pub content_type: String,
    pub body: String,
}

/// Network access for the fetcher.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<RawPage, FetchError>;

    fn name(&self) -> &str;
}

/// Resolves a URL to cleaned content.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, reusing a fresh cached copy when one exists.
    async fn fetch_content(&self, url: &str, use_js: bool) -> Result<Article, FetchError>;

    /// Fetch `url` from the network even if a fresh copy is cached.
    async fn refetch(&self, url: &str, use_js: bool) -> Result<Article, FetchError> {
        self.fetch_content(url, use_js).await
    }
}

/// How a response body is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Text,
    Binary,
}

/// Classify a `Content-Type` value. Unknown types are sniffed as HTML.
pub fn classify_content_type(content_type: &str) -> ContentKind {
    let ct = content_type.to_ascii_lowercase();
    let mime = ct.split(';').next().unwrap_or("").trim();
    match mime {
        "" => ContentKind::Html,
        m if m.contains("html") => ContentKind::Html,
        m if m.starts_with("text/") => ContentKind::Text,
        "application/json" | "application/xml" | "application/rss+xml" | "application/atom+xml" => {
            ContentKind::Text
        }
        _ => ContentKind::Binary,
    }
}

fn check_scheme(url: &str) -> Result<url::Url, FetchError> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(parsed),
        _ => Err(FetchError::InvalidUrl { url: url.into() }),
    }
}

/// Plain HTTP loader.
pub struct HttpPageLoader {
    client: reqwest::Client,
}

impl HttpPageLoader {
    pub fn new(config: &FetchConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    async fn load(&self, url: &str) -> Result<RawPage, FetchError> {
        check_scheme(url)?;

        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,text/plain;q=0.9,*/*;q=0.5")
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.into(),
                message: e.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.into(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        // Don't download bodies we will refuse anyway.
        if classify_content_type(&content_type) == ContentKind::Binary {
            return Err(FetchError::UnsupportedContent {
                url: url.into(),
                content_type,
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.into(),
            message: format!("Failed to read response body: {}", e.without_url()),
        })?;

        Ok(RawPage {
            final_url,
            content_type,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Cache-first fetcher.
pub struct CachingFetcher {
    cache: Arc<dyn ContentCache>,
    http: Arc<dyn PageLoader>,
    renderer: Option<Arc<dyn PageLoader>>,
    freshness: chrono::Duration,
    max_content_chars: usize,
    min_line_chars: usize,
}

impl CachingFetcher {
    pub fn new(cache: Arc<dyn ContentCache>, http: Arc<dyn PageLoader>) -> Self {
        let defaults = FetchConfig::default();
        Self {
            cache,
            http,
            renderer: None,
            freshness: chrono::Duration::hours(defaults.freshness_hours as i64),
            max_content_chars: defaults.max_content_chars,
            min_line_chars: defaults.min_line_chars,
        }
    }

    /// Build from config with a plain HTTP loader.
    pub fn from_config(
        cache: Arc<dyn ContentCache>,
        config: &FetchConfig,
    ) -> Result<Self, ConfigError> {
        let http: Arc<dyn PageLoader> = Arc::new(HttpPageLoader::new(config)?);
        Ok(Self::new(cache, http)
            .with_freshness(chrono::Duration::hours(config.freshness_hours as i64))
            .with_limits(config.max_content_chars, config.min_line_chars))
    }

    /// Loader used when JavaScript rendering is requested.
    pub fn with_renderer(mut self, renderer: Arc<dyn PageLoader>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_freshness(mut self, freshness: chrono::Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_limits(mut self, max_content_chars: usize, min_line_chars: usize) -> Self {
        self.max_content_chars = max_content_chars;
        self.min_line_chars = min_line_chars;
        self
    }

    async fn fetch(&self, url: &str, use_js: bool, consult_cache: bool) -> Result<Article, FetchError> {
        check_scheme(url.trim())?;
        let key = normalize_url(url);

        if consult_cache {
            match self.cache.get_fresh(&key, self.freshness).await {
                Ok(Some(article)) => {
                    debug!(url = %key, "Content cache hit");
                    return Ok(article);
                }
                Ok(None) => {}
                Err(e) => warn!(url = %key, error = %e, "Content cache lookup failed"),
            }
        }

        let page = self.loader(use_js).load(url.trim()).await?;
        let article = self.build_article(&key, page)?;

        if let Err(e) = self.cache.upsert(&article).await {
            warn!(url = %key, error = %e, "Content cache write failed");
        }
        Ok(article)
    }

    fn loader(&self, use_js: bool) -> &Arc<dyn PageLoader> {
        match (&self.renderer, use_js) {
            (Some(renderer), true) => renderer,
            (None, true) => {
                warn!("JavaScript rendering requested but no renderer is available; using HTTP");
                &self.http
            }
            _ => &self.http,
        }
    }

    /// Clean a raw page into an article stored under `key`.
    pub fn build_article(&self, key: &str, page: RawPage) -> Result<Article, FetchError> {
        if page.final_url != key {
            debug!(url = %key, final_url = %page.final_url, "Followed redirect");
        }
        let kind = match classify_content_type(&page.content_type) {
            ContentKind::Html if page.content_type.is_empty() => {
                // No header: sniff.
                if page.body.trim_start().starts_with('<') {
                    ContentKind::Html
                } else {
                    ContentKind::Text
                }
            }
            kind => kind,
        };

        let (content, markup_title) = match kind {
            ContentKind::Html => (
                clean::clean_html(&page.body, self.min_line_chars),
                clean::extract_title(&page.body),
            ),
            ContentKind::Text => (clean::clean_plain_text(&page.body, self.min_line_chars), None),
            ContentKind::Binary => {
                return Err(FetchError::UnsupportedContent {
                    url: key.into(),
                    content_type: page.content_type,
                });
            }
        };

        let content = clean::truncate_chars(&content, self.max_content_chars);
        if content.trim().is_empty() {
            return Err(FetchError::Empty { url: key.into() });
        }

        let domain = domain_of(&page.final_url)
            .or_else(|| domain_of(key))
            .unwrap_or_default();
        let title = markup_title.unwrap_or_else(|| clean::backfill_title(&content, &domain));

        Ok(Article {
            url: key.to_string(),
            title,
            domain,
            content,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Fetcher for CachingFetcher {
    async fn fetch_content(&self, url: &str, use_js: bool) -> Result<Article, FetchError> {
        self.fetch(url, use_js, true).await
    }

    async fn refetch(&self, url: &str, use_js: bool) -> Result<Article, FetchError> {
        self.fetch(url, use_js, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::research::cache::MemoryContentCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BODY: &str = "<html><head><title>Cached Page</title></head><body>\
        <p>This paragraph is long enough to survive the boilerplate filter.</p></body></html>";

    struct CountingLoader {
        name: &'static str,
        calls: AtomicUsize,
        content_type: &'static str,
        body: &'static str,
    }

    impl CountingLoader {
        fn html(name: &'static str) -> Self {
            Self {
                name,
                calls: AtomicUsize::new(0),
                content_type: "text/html; charset=utf-8",
                body: BODY,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageLoader for CountingLoader {
        async fn load(&self, url: &str) -> Result<RawPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawPage {
                final_url: url.into(),
                content_type: self.content_type.into(),
                body: self.body.into(),
            })
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl ContentCache for BrokenCache {
        async fn get_fresh(
            &self,
            _url: &str,
            _max_age: chrono::Duration,
        ) -> Result<Option<Article>, CacheError> {
            Ok(None)
        }

        async fn upsert(&self, _article: &Article) -> Result<(), CacheError> {
            Err(CacheError::Storage {
                message: "disk full".into(),
            })
        }

        async fn prune_older_than(&self, _max_age: chrono::Duration) -> Result<usize, CacheError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_second_fetch_hits_cache() {
        let loader = Arc::new(CountingLoader::html("http"));
        let fetcher = CachingFetcher::new(Arc::new(MemoryContentCache::new()), loader.clone());

        let first = fetcher.fetch_content("https://example.com/page", false).await.unwrap();
        let second = fetcher.fetch_content("https://example.com/page/", false).await.unwrap();
        assert_eq!(loader.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.title, "Cached Page");
        assert_eq!(first.domain, "example.com");
    }

    #[tokio::test]
    async fn test_refetch_bypasses_lookup_but_writes() {
        let loader = Arc::new(CountingLoader::html("http"));
        let cache = Arc::new(MemoryContentCache::new());
        let fetcher = CachingFetcher::new(cache.clone(), loader.clone());

        fetcher.fetch_content("https://example.com/a", false).await.unwrap();
        fetcher.refetch("https://example.com/a", false).await.unwrap();
        assert_eq!(loader.calls(), 2);
        assert_eq!(cache.len().await, 1);

        fetcher.fetch_content("https://example.com/a", false).await.unwrap();
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let loader = Arc::new(CountingLoader::html("http"));
        let fetcher = CachingFetcher::new(Arc::new(MemoryContentCache::new()), loader.clone())
            .with_freshness(chrono::Duration::zero() - chrono::Duration::seconds(1));

        fetcher.fetch_content("https://example.com/a", false).await.unwrap();
        fetcher.fetch_content("https://example.com/a", false).await.unwrap();
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_write_failure_does_not_fail_fetch() {
        let loader = Arc::new(CountingLoader::html("http"));
        let fetcher = CachingFetcher::new(Arc::new(BrokenCache), loader);
        let article = fetcher.fetch_content("https://example.com/a", false).await;
        assert!(article.is_ok());
    }

    #[tokio::test]
    async fn test_js_uses_renderer_when_available() {
        let http = Arc::new(CountingLoader::html("http"));
        let renderer = Arc::new(CountingLoader::html("browser"));
        let fetcher = CachingFetcher::new(Arc::new(MemoryContentCache::new()), http.clone())
            .with_renderer(renderer.clone());

        fetcher.refetch("https://example.com/js", true).await.unwrap();
        assert_eq!(renderer.calls(), 1);
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_js_without_renderer_falls_back_to_http() {
        let http = Arc::new(CountingLoader::html("http"));
        let fetcher = CachingFetcher::new(Arc::new(MemoryContentCache::new()), http.clone());
        fetcher.fetch_content("https://example.com/js", true).await.unwrap();
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_and_empty() {
        let http = Arc::new(CountingLoader {
            body: "<html><body><nav>menu</nav></body></html>",
            ..CountingLoader::html("http")
        });
        let fetcher = CachingFetcher::new(Arc::new(MemoryContentCache::new()), http.clone());

        assert!(matches!(
            fetcher.fetch_content("ftp://example.com/file", false).await,
            Err(FetchError::InvalidUrl { .. })
        ));
        assert_eq!(http.calls(), 0);
        assert!(matches!(
            fetcher.fetch_content("https://example.com/empty", false).await,
            Err(FetchError::Empty { .. })
        ));
    }

    #[test]
    fn test_build_article_plain_text_and_binary() {
        let fetcher = CachingFetcher::new(
            Arc::new(MemoryContentCache::new()),
            Arc::new(CountingLoader::html("http")),
        );
        let text = fetcher
            .build_article(
                "https://example.com/notes.txt",
                RawPage {
                    final_url: "https://example.com/notes.txt".into(),
                    content_type: "text/plain".into(),
                    body: "Plain notes with a first line long enough to be a title.\nok".into(),
                },
            )
            .unwrap();
        assert_eq!(text.title, "Plain notes with a first line long enough to be a title.");

        let err = fetcher
            .build_article(
                "https://example.com/a.pdf",
                RawPage {
                    final_url: "https://example.com/a.pdf".into(),
                    content_type: "application/pdf".into(),
                    body: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedContent { .. }));
    }

    #[test]
    fn test_classify_content_type() {
        assert_eq!(classify_content_type("text/html; charset=utf-8"), ContentKind::Html);
        assert_eq!(classify_content_type("application/xhtml+xml"), ContentKind::Html);
        assert_eq!(classify_content_type("text/markdown"), ContentKind::Text);
        assert_eq!(classify_content_type("image/png"), ContentKind::Binary);
        assert_eq!(classify_content_type(""), ContentKind::Html);
    }
}
