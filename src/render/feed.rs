//! News feeds in RSS 2.0, Atom 1.0 and JSON Feed 1.1
//!
//! All three formats are rendered from the same prepared item list: items
//! without content are dropped, the rest sorted newest first, truncated,
//! and their links resolved against the site base URL.

use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::FeedConfig;
use crate::render::{Document, RenderError};

const JSON_FEED_VERSION: &str = "https://jsonfeed.org/version/1.1";

/// A published news item as exported by the site
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    /// Absolute or site-relative
    pub link: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    pub published: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    /// Absolute or site-relative
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
    Json,
}

impl FeedFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Rss => "application/rss+xml; charset=utf-8",
            Self::Atom => "application/atom+xml; charset=utf-8",
            Self::Json => "application/json; charset=utf-8",
        }
    }

    /// Path of the feed below the base URL
    pub fn path(&self) -> &'static str {
        match self {
            Self::Rss => "feed.rss",
            Self::Atom => "feed.atom",
            Self::Json => "feed.json",
        }
    }
}

impl FromStr for FeedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(Self::Rss),
            "atom" => Ok(Self::Atom),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown feed format: {}", other)),
        }
    }
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rss => "rss",
            Self::Atom => "atom",
            Self::Json => "json",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMeta {
    pub title: String,
    pub description: String,
    pub base_url: Url,
    pub language: String,
    pub author: Option<String>,
    pub max_items: usize,
    /// Seconds clients may cache the feed
    pub max_age: u64,
}

impl FeedMeta {
    pub fn from_config(config: &FeedConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            title: config.title.clone(),
            description: config.description.clone(),
            base_url: Url::parse(&config.base_url)?,
            language: config.language.clone(),
            author: config.author.clone(),
            max_items: config.max_items,
            max_age: config.cache_max_age_secs,
        })
    }

    fn feed_url(&self, format: FeedFormat) -> String {
        absolutize(&self.base_url, format.path()).unwrap_or_else(|| self.base_url.to_string())
    }
}

/// An item ready for rendering: complete, with absolute URLs
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry<'a> {
    id: String,
    title: &'a str,
    link: String,
    summary: Option<&'a str>,
    content: Option<&'a str>,
    published: DateTime<Utc>,
    updated: DateTime<Utc>,
    image: Option<String>,
    author: Option<&'a str>,
}

pub fn generate_feed(
    meta: &FeedMeta,
    items: &[FeedItem],
    format: FeedFormat,
    now: DateTime<Utc>,
) -> Result<Document, RenderError> {
    let entries = prepare(meta, items);
    debug!(
        "Rendering {} feed with {} of {} items",
        format,
        entries.len(),
        items.len()
    );

    let body = match format {
        FeedFormat::Rss => render_rss(meta, &entries, now),
        FeedFormat::Atom => render_atom(meta, &entries, now),
        FeedFormat::Json => render_json(meta, &entries)?,
    };

    Ok(Document {
        content_type: format.content_type(),
        filename: None,
        max_age: meta.max_age,
        body,
    })
}

fn prepare<'a>(meta: &'a FeedMeta, items: &'a [FeedItem]) -> Vec<Entry<'a>> {
    let mut complete: Vec<&FeedItem> = items
        .iter()
        .filter(|item| {
            let has_text =
                non_empty(&item.content).is_some() || non_empty(&item.excerpt).is_some();
            if !has_text {
                debug!("Skipping feed item without content: {}", item.title);
            }
            has_text
        })
        .collect();
    complete.sort_by(|a, b| b.published.cmp(&a.published));
    complete.truncate(meta.max_items);

    complete
        .into_iter()
        .map(|item| {
            let link = absolutize(&meta.base_url, &item.link).unwrap_or_else(|| {
                warn!("Invalid link {:?} for feed item {}", item.link, item.title);
                meta.base_url.to_string()
            });
            let image = item.image.as_deref().and_then(|image| {
                let resolved = absolutize(&meta.base_url, image);
                if resolved.is_none() {
                    warn!("Dropping invalid image {:?} for feed item {}", image, item.title);
                }
                resolved
            });
            Entry {
                id: item.id.clone().unwrap_or_else(|| link.clone()),
                title: &item.title,
                link,
                summary: non_empty(&item.excerpt),
                content: non_empty(&item.content),
                published: item.published,
                updated: item.updated.unwrap_or(item.published),
                image,
                author: item.author.as_deref().or(meta.author.as_deref()),
            }
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve `href` against `base`; absolute URLs are returned unchanged
pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(String::from)
}

/// Escape text for XML element content and attribute values.
///
/// Characters outside the XML 1.0 `Char` production are dropped.
pub fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\t' | '\n' | '\r' => escaped.push(c),
            '\u{0}'..='\u{1f}' | '\u{fffe}' | '\u{ffff}' => {}
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "image/jpeg"
    }
}

// Writing into a String is infallible; `writeln!` results are discarded.

fn render_rss(meta: &FeedMeta, entries: &[Entry<'_>], now: DateTime<Utc>) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(concat!(
        "<rss version=\"2.0\"",
        " xmlns:atom=\"http://www.w3.org/2005/Atom\"",
        " xmlns:content=\"http://purl.org/rss/1.0/modules/content/\"",
        " xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n"
    ));
    xml.push_str("<channel>\n");
    let _ = writeln!(xml, "<title>{}</title>", escape_xml(&meta.title));
    let _ = writeln!(xml, "<link>{}</link>", escape_xml(meta.base_url.as_str()));
    let _ = writeln!(
        xml,
        "<description>{}</description>",
        escape_xml(&meta.description)
    );
    let _ = writeln!(xml, "<language>{}</language>", escape_xml(&meta.language));
    let _ = writeln!(xml, "<lastBuildDate>{}</lastBuildDate>", now.to_rfc2822());
    let _ = writeln!(
        xml,
        "<atom:link href=\"{}\" rel=\"self\" type=\"application/rss+xml\"/>",
        escape_xml(&meta.feed_url(FeedFormat::Rss))
    );

    for entry in entries {
        xml.push_str("<item>\n");
        let _ = writeln!(xml, "<title>{}</title>", escape_xml(entry.title));
        let _ = writeln!(xml, "<link>{}</link>", escape_xml(&entry.link));
        let _ = writeln!(
            xml,
            "<guid isPermaLink=\"{}\">{}</guid>",
            entry.id == entry.link,
            escape_xml(&entry.id)
        );
        let _ = writeln!(xml, "<pubDate>{}</pubDate>", entry.published.to_rfc2822());
        if let Some(author) = entry.author {
            let _ = writeln!(xml, "<dc:creator>{}</dc:creator>", escape_xml(author));
        }
        if let Some(summary) = entry.summary.or(entry.content) {
            let _ = writeln!(xml, "<description>{}</description>", escape_xml(summary));
        }
        if let Some(content) = entry.content {
            let _ = writeln!(
                xml,
                "<content:encoded>{}</content:encoded>",
                escape_xml(content)
            );
        }
        if let Some(image) = &entry.image {
            let _ = writeln!(
                xml,
                "<enclosure url=\"{}\" type=\"{}\" length=\"0\"/>",
                escape_xml(image),
                image_mime(image)
            );
        }
        xml.push_str("</item>\n");
    }

    xml.push_str("</channel>\n</rss>\n");
    xml
}

fn render_atom(meta: &FeedMeta, entries: &[Entry<'_>], now: DateTime<Utc>) -> String {
    let updated = entries
        .iter()
        .map(|e| e.updated)
        .max()
        .unwrap_or(now);

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<feed xmlns=\"http://www.w3.org/2005/Atom\" xml:lang=\"{}\">",
        escape_xml(&meta.language)
    );
    let _ = writeln!(xml, "<id>{}</id>", escape_xml(meta.base_url.as_str()));
    let _ = writeln!(xml, "<title>{}</title>", escape_xml(&meta.title));
    if !meta.description.is_empty() {
        let _ = writeln!(xml, "<subtitle>{}</subtitle>", escape_xml(&meta.description));
    }
    let _ = writeln!(xml, "<updated>{}</updated>", updated.to_rfc3339());
    let _ = writeln!(xml, "<link href=\"{}\"/>", escape_xml(meta.base_url.as_str()));
    let _ = writeln!(
        xml,
        "<link rel=\"self\" type=\"application/atom+xml\" href=\"{}\"/>",
        escape_xml(&meta.feed_url(FeedFormat::Atom))
    );
    if let Some(author) = &meta.author {
        let _ = writeln!(xml, "<author><name>{}</name></author>", escape_xml(author));
    }

    for entry in entries {
        xml.push_str("<entry>\n");
        let _ = writeln!(xml, "<id>{}</id>", escape_xml(&entry.id));
        let _ = writeln!(xml, "<title>{}</title>", escape_xml(entry.title));
        let _ = writeln!(xml, "<link href=\"{}\"/>", escape_xml(&entry.link));
        let _ = writeln!(xml, "<published>{}</published>", entry.published.to_rfc3339());
        let _ = writeln!(xml, "<updated>{}</updated>", entry.updated.to_rfc3339());
        if let Some(author) = entry.author {
            let _ = writeln!(xml, "<author><name>{}</name></author>", escape_xml(author));
        }
        if let Some(summary) = entry.summary {
            let _ = writeln!(xml, "<summary type=\"html\">{}</summary>", escape_xml(summary));
        }
        if let Some(content) = entry.content {
            let _ = writeln!(xml, "<content type=\"html\">{}</content>", escape_xml(content));
        }
        if let Some(image) = &entry.image {
            let _ = writeln!(
                xml,
                "<link rel=\"enclosure\" type=\"{}\" href=\"{}\"/>",
                image_mime(image),
                escape_xml(image)
            );
        }
        xml.push_str("</entry>\n");
    }

    xml.push_str("</feed>\n");
    xml
}

#[derive(Debug, Serialize)]
struct JsonFeed<'a> {
    version: &'static str,
    title: &'a str,
    home_page_url: &'a str,
    feed_url: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    authors: Vec<JsonAuthor<'a>>,
    items: Vec<JsonItem<'a>>,
}

#[derive(Debug, Serialize)]
struct JsonAuthor<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct JsonItem<'a> {
    id: &'a str,
    url: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
    date_published: String,
    date_modified: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    authors: Vec<JsonAuthor<'a>>,
}

fn render_json(meta: &FeedMeta, entries: &[Entry<'_>]) -> Result<String, serde_json::Error> {
    let feed = JsonFeed {
        version: JSON_FEED_VERSION,
        title: &meta.title,
        home_page_url: meta.base_url.as_str(),
        feed_url: meta.feed_url(FeedFormat::Json),
        description: &meta.description,
        language: &meta.language,
        authors: meta
            .author
            .as_deref()
            .map(|name| JsonAuthor { name })
            .into_iter()
            .collect(),
        items: entries
            .iter()
            .map(|entry| JsonItem {
                id: &entry.id,
                url: &entry.link,
                title: entry.title,
                // JSON Feed requires content_html or content_text
                content_html: entry.content.or(entry.summary),
                summary: entry.summary,
                image: entry.image.as_deref(),
                date_published: entry.published.to_rfc3339(),
                date_modified: entry.updated.to_rfc3339(),
                authors: entry
                    .author
                    .map(|name| JsonAuthor { name })
                    .into_iter()
                    .collect(),
            })
            .collect(),
    };

    serde_json::to_string_pretty(&feed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::Value;

    fn meta() -> FeedMeta {
        FeedMeta {
            title: "VC Test News".to_string(),
            description: "Neues vom Verein".to_string(),
            base_url: Url::parse("https://vc-test.example/").unwrap(),
            language: "de".to_string(),
            author: Some("Redaktion".to_string()),
            max_items: 10,
            max_age: 1800,
        }
    }

    fn item(title: &str, day: u32) -> FeedItem {
        FeedItem {
            id: None,
            title: title.to_string(),
            link: format!("/news/{}", title.to_lowercase()),
            content: Some(format!("<p>{}</p>", title)),
            excerpt: None,
            published: Utc.with_ymd_and_hms(2025, 3, day, 10, 0, 0).unwrap(),
            updated: None,
            image: None,
            author: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 31, 0, 0, 0).unwrap()
    }

    fn json_items(doc: &Document) -> Vec<Value> {
        let feed: Value = serde_json::from_str(&doc.body).unwrap();
        feed["items"].as_array().unwrap().clone()
    }

    #[test]
    fn items_without_content_or_excerpt_are_skipped() {
        let mut draft = item("Draft", 2);
        draft.content = None;
        draft.excerpt = Some("   ".to_string());
        let mut teaser = item("Teaser", 3);
        teaser.content = None;
        teaser.excerpt = Some("Nur ein Anriss".to_string());

        let items = [item("Full", 1), draft, teaser];
        let doc = generate_feed(&meta(), &items, FeedFormat::Json, now()).unwrap();

        let titles: Vec<_> = json_items(&doc)
            .iter()
            .map(|i| i["title"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["Teaser", "Full"]);
    }

    #[test]
    fn items_are_sorted_newest_first_and_truncated() {
        let mut meta = meta();
        meta.max_items = 2;

        let doc = generate_feed(
            &meta,
            &[item("A", 1), item("C", 20), item("B", 10)],
            FeedFormat::Json,
            now(),
        )
        .unwrap();

        let titles: Vec<_> = json_items(&doc)
            .iter()
            .map(|i| i["title"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["C", "B"]);
    }

    #[rstest]
    #[case("/media/team.jpg", "https://vc-test.example/media/team.jpg")]
    #[case("media/team.jpg", "https://vc-test.example/media/team.jpg")]
    #[case("https://cdn.example/team.jpg", "https://cdn.example/team.jpg")]
    fn images_are_absolutized_against_base_url(#[case] image: &str, #[case] expected: &str) {
        let mut news = item("Spieltag", 5);
        news.image = Some(image.to_string());

        let doc = generate_feed(&meta(), &[news], FeedFormat::Json, now()).unwrap();

        assert_eq!(json_items(&doc)[0]["image"], expected);
        assert_eq!(
            json_items(&doc)[0]["url"],
            "https://vc-test.example/news/spieltag"
        );
    }

    #[rstest]
    #[case("Sieg & <Niederlage>", "Sieg &amp; &lt;Niederlage&gt;")]
    #[case("Bericht\u{8}", "Bericht")]
    #[case("a\u{b}b\u{c}\u{0}", "ab")]
    #[case("Zeile 1\r\n\tZeile 2", "Zeile 1\r\n\tZeile 2")]
    #[case("\u{fffe}Spiel\u{ffff}", "Spiel")]
    #[case("Ümlaut \u{1F3D0}", "Ümlaut \u{1F3D0}")]
    fn escape_xml_drops_characters_xml_forbids(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_xml(input), expected);
    }

    #[rstest]
    #[case(FeedFormat::Rss)]
    #[case(FeedFormat::Atom)]
    fn feed_with_control_characters_is_well_formed(#[case] format: FeedFormat) {
        let mut news = item("Bericht\u{8}", 5);
        news.content = Some("a\u{b}b".to_string());

        let doc = generate_feed(&meta(), &[news], format, now()).unwrap();

        assert!(!doc.body.contains('\u{8}'));
        assert!(!doc.body.contains('\u{b}'));
        let mut reader = quick_xml::Reader::from_str(&doc.body);
        while !matches!(reader.read_event().unwrap(), quick_xml::events::Event::Eof) {}
    }

    #[test]
    fn rss_escapes_markup_and_adds_enclosure() {
        let mut news = item("Sieg & Niederlage", 5);
        news.image = Some("/img/spiel.png".to_string());

        let doc = generate_feed(&meta(), &[news], FeedFormat::Rss, now()).unwrap();

        assert_eq!(doc.content_type, "application/rss+xml; charset=utf-8");
        assert!(doc.body.contains("<title>Sieg &amp; Niederlage</title>"));
        assert!(doc.body.contains("&lt;p&gt;Sieg &amp; Niederlage&lt;/p&gt;"));
        assert!(doc.body.contains(
            "<enclosure url=\"https://vc-test.example/img/spiel.png\" type=\"image/png\" length=\"0\"/>"
        ));
        assert!(doc.body.contains(
            "<atom:link href=\"https://vc-test.example/feed.rss\" rel=\"self\" type=\"application/rss+xml\"/>"
        ));
        assert!(doc.body.contains("<dc:creator>Redaktion</dc:creator>"));
    }

    #[test]
    fn atom_uses_latest_update_as_feed_timestamp() {
        let mut edited = item("Alt", 1);
        edited.updated = Some(Utc.with_ymd_and_hms(2025, 3, 25, 8, 0, 0).unwrap());

        let items = [edited, item("Neu", 20)];
        let doc = generate_feed(&meta(), &items, FeedFormat::Atom, now()).unwrap();

        assert!(doc.body.contains("<updated>2025-03-25T08:00:00+00:00</updated>\n<link href="));
        assert_eq!(doc.body.matches("<entry>").count(), 2);
        assert!(doc.body.contains("<author><name>Redaktion</name></author>"));
    }

    #[test]
    fn empty_feed_is_still_well_formed() {
        for format in [FeedFormat::Rss, FeedFormat::Atom, FeedFormat::Json] {
            let doc = generate_feed(&meta(), &[], format, now()).unwrap();
            assert!(!doc.body.is_empty(), "{} feed is empty", format);
        }
        let doc = generate_feed(&meta(), &[], FeedFormat::Json, now()).unwrap();
        assert!(json_items(&doc).is_empty());
    }

    #[test]
    fn feed_items_deserialize_from_camel_case() {
        let items: Vec<FeedItem> = serde_json::from_str(
            r#"[{"title":"T","link":"/t","excerpt":"E","published":"2025-03-01T10:00:00Z","image":"/i.jpg"}]"#,
        )
        .unwrap();

        assert_eq!(items[0].excerpt.as_deref(), Some("E"));
        assert!(items[0].content.is_none());
    }

    #[rstest]
    #[case("rss", Ok(FeedFormat::Rss))]
    #[case("atom", Ok(FeedFormat::Atom))]
    #[case("json", Ok(FeedFormat::Json))]
    #[case("xml", Err("Unknown feed format: xml".to_string()))]
    fn feed_format_parses(#[case] raw: &str, #[case] expected: Result<FeedFormat, String>) {
        assert_eq!(raw.parse::<FeedFormat>(), expected);
    }
}
