use std::time::Duration;

use async_trait::async_trait;

use crate::error::SourceError;

/// Pages shorter than this after cleaning carry no useful content
pub const MIN_PAGE_CHARS: usize = 50;
/// Longest page text kept
pub const MAX_PAGE_CHARS: usize = 1_000_000;

const RENDER_WIDTH: usize = 120;

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub title: String,
    /// Markdown-flavoured plain text, headings kept as `#` lines
    pub text: String,
}

/// Fetch a web page and return its title and cleaned text
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, SourceError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("korektor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, SourceError> {
        let fetch_err = |message: String| SourceError::Fetch {
            url: url.to_string(),
            message,
        };

        if !is_http_url(url) {
            return Err(fetch_err("only http:// and https:// URLs are supported".into()));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_err(e.to_string()))?;

        let html = response.text().await.map_err(|e| fetch_err(e.to_string()))?;

        parse_page(&html).map_err(|e| match e {
            SourceError::Empty(_) => SourceError::Empty(url.to_string()),
            other => other,
        })
    }
}

pub fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Turn raw HTML into a titled, size-capped text page
pub fn parse_page(html: &str) -> Result<FetchedPage, SourceError> {
    let title = extract_title(html);
    let text = html_to_text(html).map_err(|message| SourceError::Fetch {
        url: title.clone(),
        message,
    })?;

    let text = truncate_chars(text.trim(), MAX_PAGE_CHARS);
    if text.chars().count() < MIN_PAGE_CHARS {
        return Err(SourceError::Empty(title));
    }

    Ok(FetchedPage { title, text })
}

fn html_to_text(html: &str) -> Result<String, String> {
    html2text::config::plain()
        .string_from_read(html.as_bytes(), RENDER_WIDTH)
        .map_err(|e| e.to_string())
}

/// Extract title from HTML: `<title>` first, then the first `<h1>`
fn extract_title(html: &str) -> String {
    let lower = html.to_ascii_lowercase();

    let inner = |open: &str, close: &str| -> Option<String> {
        let start = lower.find(open)?;
        let content_start = start + lower[start..].find('>')? + 1;
        let end = content_start + lower[content_start..].find(close)?;
        let text = html_to_text(&html[content_start..end]).ok()?;
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    };

    inner("<title", "</title>")
        .or_else(|| inner("<h1", "</h1>"))
        .unwrap_or_else(|| "Untitled".to_string())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "<p>Pracodawca może otrzymać dofinansowanie do wynagrodzenia pracownika z niepełnosprawnością.</p>";

    #[test]
    fn test_extract_title_from_title_tag() {
        let html = "<html><head><title>Test Page</title></head><body></body></html>";
        assert_eq!(extract_title(html), "Test Page");
    }

    #[test]
    fn test_extract_title_from_h1() {
        let html = "<html><body><h1 class=\"main\">Main Heading</h1></body></html>";
        assert_eq!(extract_title(html), "Main Heading");
    }

    #[test]
    fn test_extract_title_fallback() {
        let html = "<html><body><p>No title</p></body></html>";
        assert_eq!(extract_title(html), "Untitled");
    }

    #[test]
    fn test_parse_page_keeps_text() {
        let html = format!(
            "<html><head><title>Dofinansowanie</title></head><body><h2>Warunki</h2>{}</body></html>",
            BODY
        );
        let page = parse_page(&html).unwrap();
        assert_eq!(page.title, "Dofinansowanie");
        assert!(page.text.contains("dofinansowanie do wynagrodzenia"));
        assert!(page.text.contains("Warunki"));
    }

    #[test]
    fn test_short_page_is_rejected() {
        let html = "<html><head><title>Pusto</title></head><body><p>Za mało.</p></body></html>";
        assert!(matches!(parse_page(html), Err(SourceError::Empty(_))));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("zażółć", 3), "zaż");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_url_scheme_check() {
        assert!(is_http_url("https://www.pfron.org.pl"));
        assert!(is_http_url("http://example.com/page"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("www.example.com"));
    }
}
