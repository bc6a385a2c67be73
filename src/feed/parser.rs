use crate::error::{Error, Result};
use crate::feed::charset;
use crate::feed::{parse_feed_date, FeedDocument, FeedItem};
use feed_rs::parser as feed_parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct FeedParser;

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    /// Decodes and parses raw feed bytes.
    ///
    /// `transport_charset` is the charset announced outside the document
    /// (usually the HTTP `Content-Type`); the XML prolog takes precedence.
    pub fn parse(&self, bytes: &[u8], transport_charset: Option<&str>) -> Result<FeedDocument> {
        let decoded = charset::decode(bytes, transport_charset)?;

        let mut doc = match root_element(&decoded.text)?.as_str() {
            "rss" => parse_rss(&decoded.text)?,
            "feed" | "RDF" => parse_with_feed_rs(without_prolog(&decoded.text).as_bytes())?,
            other => {
                return Err(Error::FeedParse(format!(
                    "expected element type <rss> but have <{}>",
                    other
                )))
            }
        };

        doc.encoding = decoded.declared;
        doc.select_link();

        debug!(
            "Parsed feed '{}' with {} items and {} link candidates",
            doc.title,
            doc.items.len(),
            doc.link_candidates.len()
        );
        Ok(doc)
    }

    pub fn validate_feed_url(&self, url: &str) -> Result<()> {
        let parsed_url = url::Url::parse(url)
            .map_err(|e| Error::InvalidUrl(format!("Invalid URL: {}", e)))?;

        match parsed_url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(Error::InvalidUrl(format!("Unsupported scheme: {}", scheme))),
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn malformed(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> Error {
    Error::FeedParse(format!(
        "Malformed XML at position {}: {}",
        reader.buffer_position(),
        err
    ))
}

/// The text is already UTF-8, so a prolog naming another charset must not
/// reach a parser that would honour it.
fn without_prolog(text: &str) -> &str {
    let trimmed = text.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return &trimmed[end + 2..];
        }
    }
    text
}

/// Local name of the document's root element.
fn root_element(text: &str) -> Result<String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(local_name(e.local_name().as_ref()));
            }
            Ok(Event::Eof) => {
                return Err(Error::FeedParse("document has no root element".to_string()));
            }
            Err(e) => return Err(malformed(&reader, e)),
            _ => {}
        }
    }
}

fn parse_rss(text: &str) -> Result<FeedDocument> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut doc = FeedDocument::default();
    let mut stack: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut item: Option<FeedItem> = None;
    let mut saw_channel = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.local_name().as_ref());
                match (stack.len(), name.as_str()) {
                    (1, "channel") => saw_channel = true,
                    (2, "item") => item = Some(FeedItem::default()),
                    _ => {}
                }
                stack.push(name);
                value.clear();
            }
            Ok(Event::Empty(e)) => {
                stack.push(local_name(e.local_name().as_ref()));
                assign(&mut doc, item.as_mut(), &stack, "");
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let unescaped = t.unescape().map_err(|e| malformed(&reader, e))?;
                value.push_str(&unescaped);
            }
            Ok(Event::CData(c)) => {
                value.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) => {
                let text = std::mem::take(&mut value);
                assign(&mut doc, item.as_mut(), &stack, text.trim());
                if stack.len() == 3 && stack[2] == "item" {
                    if let Some(finished) = item.take() {
                        doc.items.push(finished);
                    }
                }
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(&reader, e)),
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::FeedParse(format!(
            "unexpected end of document inside <{}>",
            open
        )));
    }
    if !saw_channel {
        return Err(Error::FeedParse("missing <channel> element".to_string()));
    }

    Ok(doc)
}

fn assign(doc: &mut FeedDocument, item: Option<&mut FeedItem>, stack: &[String], value: &str) {
    let path: Vec<&str> = stack.iter().map(String::as_str).collect();

    match path.as_slice() {
        ["rss", "channel", "link"] => doc.link_candidates.push(value.to_string()),
        ["rss", "channel", "title"] if doc.title.is_empty() => doc.title = value.to_string(),
        ["rss", "channel", "description"] if doc.description.is_empty() => {
            doc.description = value.to_string()
        }
        ["rss", "channel", "language"] if doc.language.is_empty() => {
            doc.language = value.to_string()
        }
        ["rss", "channel", "pubDate"] => doc.published = parse_feed_date(value),
        ["rss", "channel", "lastBuildDate"] => doc.last_build_date = parse_feed_date(value),
        ["rss", "channel", "item", field] => {
            let Some(item) = item else { return };
            let owned = || (!value.is_empty()).then(|| value.to_string());
            match *field {
                "title" => item.title = value.to_string(),
                "link" if item.link.is_empty() => item.link = value.to_string(),
                "pubDate" | "date" => item.published = parse_feed_date(value).or(item.published),
                "author" => item.author = owned().or(item.author.take()),
                "creator" if item.author.is_none() => item.author = owned(),
                "guid" => item.guid = owned(),
                "description" => item.description = owned(),
                _ => {}
            }
        }
        _ => {}
    }
}

/// Atom and RSS 1.0 documents go through feed-rs and are mapped onto the
/// same document shape.
fn parse_with_feed_rs(bytes: &[u8]) -> Result<FeedDocument> {
    let feed = feed_parser::parse(bytes)
        .map_err(|e| Error::FeedParse(format!("Failed to parse feed: {}", e)))?;

    // Alternate links name the site; `self` and `hub` links name the feed.
    let (alternate, other): (Vec<_>, Vec<_>) = feed
        .links
        .iter()
        .partition(|l| matches!(l.rel.as_deref(), None | Some("alternate")));
    let link_candidates = alternate
        .into_iter()
        .chain(other)
        .map(|l| l.href.clone())
        .collect();

    let items = feed
        .entries
        .into_iter()
        .map(|entry| FeedItem {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry.links.first().map(|l| l.href.clone()).unwrap_or_default(),
            published: entry.published.or(entry.updated),
            author: entry.authors.first().map(|a| a.name.clone()),
            guid: (!entry.id.is_empty()).then_some(entry.id),
            description: entry.summary.map(|s| s.content),
        })
        .collect();

    Ok(FeedDocument {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: String::new(),
        link_candidates,
        description: feed.description.map(|d| d.content).unwrap_or_default(),
        language: feed.language.unwrap_or_default(),
        published: feed.published,
        last_build_date: feed.updated,
        encoding: None,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
    <channel>
        <title>Test RSS Feed</title>
        <description>A test RSS feed for unit testing</description>
        <link>https://example.com/</link>
        <language>en</language>
        <lastBuildDate>Wed, 15 Mar 2024 10:00:00 GMT</lastBuildDate>
        <item>
            <title>First Article</title>
            <link>https://example.com/first</link>
            <description>This is the first test article</description>
            <author>test@example.com (Test Author)</author>
            <pubDate>Wed, 15 Mar 2024 09:00:00 GMT</pubDate>
            <guid>https://example.com/first</guid>
        </item>
        <item>
            <title>Second Article</title>
            <link>https://example.com/second</link>
            <dc:creator xmlns:dc="http://purl.org/dc/elements/1.1/">Second Author</dc:creator>
            <guid>unique-guid-123</guid>
        </item>
    </channel>
</rss>"#;

    const FEEDBURNER_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss xmlns:atom="http://www.w3.org/2005/Atom" version="2.0">
   <channel>
      <atom10:link xmlns:atom10="http://www.w3.org/2005/Atom" rel="self" type="application/rss+xml" href="http://feeds.feedburner.com/zscaler/research" />
      <title>Research Blog</title>
      <link></link>
      <link>https://www.zscaler.com/</link>
      <language>en</language>
      <pubDate>Wed, 04 Oct 2017 03:54:41 -0700</pubDate>
      <atom10:link xmlns:atom10="http://www.w3.org/2005/Atom" rel="hub" href="http://pubsubhubbub.appspot.com/" />
      <item>
         <title>Infostealer spreading through a compromised website</title>
         <link>https://www.zscaler.com/blogs/research/infostealer</link>
         <source url="https://www.zscaler.com/">Research Blog</source>
      </item>
   </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Test Atom Feed</title>
    <subtitle>A test Atom feed for unit testing</subtitle>
    <link rel="self" href="https://example.com/feed.xml"/>
    <link href="https://example.com/"/>
    <updated>2024-03-15T10:00:00Z</updated>
    <id>https://example.com/feed</id>
    <entry>
        <title>Atom Article One</title>
        <link href="https://example.com/atom1"/>
        <id>https://example.com/atom1</id>
        <updated>2024-03-15T09:00:00Z</updated>
        <summary>Summary of the first atom article</summary>
        <author><name>Atom Author</name></author>
    </entry>
</feed>"#;

    const MALFORMED_XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
    <channel>
        <title>Broken Feed</title>
        <item>
            <title>Unclosed tag
            <link>https://example.com/broken</link>
        </item>
    </channel>
    <!-- Missing closing rss tag -->"#;

    fn parse(input: &str) -> Result<FeedDocument> {
        FeedParser::new().parse(input.as_bytes(), None)
    }

    #[test]
    fn test_parse_rss_feed() {
        let doc = parse(RSS_SAMPLE).unwrap();

        assert_eq!(doc.title, "Test RSS Feed");
        assert_eq!(doc.description, "A test RSS feed for unit testing");
        assert_eq!(doc.link, "https://example.com/");
        assert_eq!(doc.language, "en");
        assert_eq!(doc.encoding.as_deref(), Some("UTF-8"));
        assert!(doc.last_build_date.is_some());
        assert_eq!(doc.items.len(), 2);

        let first = &doc.items[0];
        assert_eq!(first.title, "First Article");
        assert_eq!(first.link, "https://example.com/first");
        assert_eq!(first.author.as_deref(), Some("test@example.com (Test Author)"));
        assert_eq!(first.guid.as_deref(), Some("https://example.com/first"));
        assert!(first.published.is_some());

        assert_eq!(doc.items[1].author.as_deref(), Some("Second Author"));
    }

    #[test]
    fn test_first_non_empty_link_wins() {
        let doc = parse(FEEDBURNER_SAMPLE).unwrap();

        assert_eq!(doc.title, "Research Blog");
        assert_eq!(
            doc.link_candidates,
            vec!["", "", "https://www.zscaler.com/", ""]
        );
        assert_eq!(doc.link, "https://www.zscaler.com/");
        assert_eq!(doc.items.len(), 1);
    }

    #[test]
    fn test_feed_without_links_has_empty_primary_link() {
        let doc = parse(
            r#"<rss version="2.0"><channel><title>No Links</title><link/></channel></rss>"#,
        )
        .unwrap();
        assert!(doc.link.is_empty());
        assert_eq!(doc.encoding, None);
    }

    #[test]
    fn test_wrong_root_element() {
        let err = parse("<html></html>").unwrap_err();
        match err {
            Error::FeedParse(msg) => {
                assert_eq!(msg, "expected element type <rss> but have <html>")
            }
            other => panic!("Expected FeedParse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_xml() {
        let result = parse(MALFORMED_XML);
        assert!(matches!(result, Err(Error::FeedParse(_))));
    }

    #[test]
    fn test_rss_without_channel() {
        assert!(matches!(parse("<rss version=\"2.0\"></rss>"), Err(Error::FeedParse(_))));
    }

    #[test]
    fn test_parse_atom_feed() {
        let doc = parse(ATOM_SAMPLE).unwrap();

        assert_eq!(doc.title, "Test Atom Feed");
        assert_eq!(doc.description, "A test Atom feed for unit testing");
        assert_eq!(doc.link, "https://example.com/");
        assert_eq!(doc.items.len(), 1);
        assert_eq!(doc.items[0].title, "Atom Article One");
        assert_eq!(doc.items[0].author.as_deref(), Some("Atom Author"));
    }

    #[test]
    fn test_latin1_feed() {
        let mut bytes =
            br#"<?xml version="1.0" encoding="ISO-8859-1"?><rss version="2.0"><channel><title>Le Caf"#
                .to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"</title><link>https://cafe.example/</link></channel></rss>");

        let doc = FeedParser::new().parse(&bytes, None).unwrap();
        assert_eq!(doc.title, "Le Café");
        assert_eq!(doc.encoding.as_deref(), Some("ISO-8859-1"));
    }

    #[test]
    fn test_unsupported_declared_charset() {
        let input = r#"<?xml version="1.0" encoding="Shift_JIS"?><rss><channel/></rss>"#;
        assert!(matches!(parse(input), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_feed_with_html_entities_and_cdata() {
        let doc = parse(
            r#"<rss version="2.0"><channel>
                <title>Feed with &amp; HTML &lt;entities&gt;</title>
                <item>
                    <title><![CDATA[Article with <HTML> in CDATA]]></title>
                    <description><![CDATA[<p>This is <strong>HTML</strong></p>]]></description>
                </item>
            </channel></rss>"#,
        )
        .unwrap();

        assert_eq!(doc.title, "Feed with & HTML <entities>");
        assert_eq!(doc.items[0].title, "Article with <HTML> in CDATA");
        assert!(doc.items[0].description.as_deref().unwrap().contains("<strong>HTML</strong>"));
    }

    #[test]
    fn test_validate_feed_url() {
        let parser = FeedParser::new();

        assert!(parser.validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(parser.validate_feed_url("http://example.com/rss").is_ok());
        assert!(parser.validate_feed_url("ftp://example.com/feed").is_err());
        assert!(parser.validate_feed_url("not-a-url").is_err());
    }
}
