use crate::config::Settings;
use crate::error::{Error, Result};
use crate::feed::charset::charset_from_content_type;
use crate::feed::parser::FeedParser;
use crate::feed::FeedDocument;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DRAIN_LIMIT: usize = 512;

/// Raw feed bytes plus the charset the server announced.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub url: Url,
    pub body: Vec<u8>,
    pub charset: Option<String>,
}

/// Something that can retrieve the bytes behind a feed URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedFeed>;
}

#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: Client,
    timeout_duration: Duration,
    user_agent: String,
    drain_limit: usize,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        Self::build(DEFAULT_TIMEOUT, crate::config::default_user_agent(), DEFAULT_DRAIN_LIMIT)
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::build(
            Duration::from_secs(settings.timeout),
            settings.user_agent.clone(),
            settings.drain_bytes,
        )
    }

    fn build(timeout_duration: Duration, user_agent: String, drain_limit: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout_duration)
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .build()
            .map_err(|e| Error::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout_duration,
            user_agent,
            drain_limit,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_duration = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Downloads the feed body. Non-2xx answers are errors.
    pub async fn fetch_bytes(&self, url: &Url) -> Result<FetchedFeed> {
        debug!("Fetching feed from: {}", url);

        FeedParser::new().validate_feed_url(url.as_str())?;

        let fetched = timeout(self.timeout_duration, self.download(url))
            .await
            .map_err(|_| Error::Timeout(format!("Request to {} timed out", url)))??;

        debug!("Downloaded {} bytes from {}", fetched.body.len(), url);
        Ok(fetched)
    }

    /// Downloads and parses the feed.
    pub async fn fetch_feed(&self, url: &Url) -> Result<FeedDocument> {
        let fetched = self.fetch_bytes(url).await?;
        FeedParser::new().parse(&fetched.body, fetched.charset.as_deref())
    }

    async fn download(&self, url: &Url) -> Result<FetchedFeed> {
        let response = self.fetch_response(url).await?;

        let status = response.status();
        if !status.is_success() {
            drain(response, self.drain_limit).await;
            return Err(Error::HttpError(format!(
                "HTTP {} for {}: {}",
                status.as_u16(),
                url,
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let charset = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type);

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::HttpError(format!("Failed to read response body: {}", e)))?;

        Ok(FetchedFeed {
            url: url.clone(),
            body: body.to_vec(),
            charset,
        })
    }

    async fn fetch_response(&self, url: &Url) -> Result<Response> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(
                ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml, text/xml, */*",
            )
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Request to {} timed out", url))
                } else {
                    Error::HttpError(format!("Request failed: {}", e))
                }
            })?;

        Ok(response)
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedFeed> {
        self.fetch_bytes(url).await
    }
}

/// Reads and discards a short prefix of an unwanted body so the
/// connection can go back to the pool.
async fn drain(mut response: Response, limit: usize) {
    let mut drained = 0;
    while drained < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => drained += chunk.len(),
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
    <channel>
        <title>Test Feed</title>
        <description>A test feed</description>
        <link>https://example.com/</link>
        <item>
            <title>Test Article</title>
            <link>https://example.com/article</link>
            <description>Test article description</description>
            <pubDate>Fri, 15 Mar 2024 10:00:00 GMT</pubDate>
        </item>
    </channel>
</rss>"#;

    fn feed_url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_valid_feed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS_RESPONSE)
                    .insert_header("content-type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let feed = fetcher.fetch_feed(&feed_url(&mock_server, "/feed.xml")).await.unwrap();

        assert_eq!(feed.title, "Test Feed");
        assert_eq!(feed.link, "https://example.com/");
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "Test Article");
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/notfound.xml"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let result = fetcher.fetch_bytes(&feed_url(&mock_server, "/notfound.xml")).await;

        match result {
            Err(Error::HttpError(msg)) => assert!(msg.contains("404")),
            other => panic!("Expected HttpError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_string(VALID_RSS_RESPONSE),
            )
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new()
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let result = fetcher.fetch_bytes(&feed_url(&mock_server, "/slow.xml")).await;

        match result {
            Err(Error::Timeout(msg)) => assert!(msg.contains("timed out")),
            other => panic!("Expected Timeout error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_user_agent_header_is_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .and(header("user-agent", "CustomBot/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS_RESPONSE))
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new()
            .unwrap()
            .with_user_agent("CustomBot/1.0".to_string());
        let result = fetcher.fetch_bytes(&feed_url(&mock_server, "/feed.xml")).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_content_type_charset_is_reported() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/latin.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS_RESPONSE.replace(r#" encoding="UTF-8""#, ""))
                    .insert_header("content-type", "application/rss+xml; charset=ISO-8859-1"),
            )
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let fetched = fetcher.fetch_bytes(&feed_url(&mock_server, "/latin.xml")).await.unwrap();
        assert_eq!(fetched.charset.as_deref(), Some("ISO-8859-1"));

        let doc = fetcher.fetch_feed(&feed_url(&mock_server, "/latin.xml")).await.unwrap();
        assert_eq!(doc.encoding.as_deref(), Some("ISO-8859-1"));
    }

    #[tokio::test]
    async fn test_fetch_with_redirects() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/redirect"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("{}/feed.xml", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS_RESPONSE))
            .mount(&mock_server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let feed = fetcher.fetch_feed(&feed_url(&mock_server, "/redirect")).await.unwrap();
        assert_eq!(feed.title, "Test Feed");
    }

    #[tokio::test]
    async fn test_invalid_url_schemes() {
        let fetcher = FeedFetcher::new().unwrap();

        for raw in ["ftp://example.com/feed.xml", "file:///local/feed.xml"] {
            let url = Url::parse(raw).unwrap();
            match fetcher.fetch_bytes(&url).await {
                Err(Error::InvalidUrl(_)) => {}
                other => panic!("Expected InvalidUrl error for {}, got {:?}", raw, other),
            }
        }
    }
}
