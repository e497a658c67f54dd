//! Lenient RSS/Atom parsing with layered fallback.
//!
//! The structured pass walks the XML event stream and extracts entries from
//! `<item>` (RSS) or `<entry>` (Atom) containers. Feeds in the wild are messy,
//! so two recovery layers sit behind it:
//!
//! - a quirk path ([`ParseStrategy::CdataEmbedded`]) that repairs entries whose
//!   title/link the structured pass returned empty, by re-scanning the raw text
//!   per item block keyed on sequential index;
//! - a regex fallback that takes over whenever the structured pass yields zero
//!   entries (parse error or unrecognized dialect).
//!
//! Behavior choice, deliberately preserved from the observed system: the
//! structured pass keeps entries even when every field is empty, while the
//! fallback drops pairs missing a title or link.
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

// ============================================================================
// Types
// ============================================================================

/// One normalized feed item.
///
/// Every field is a plain string and may be empty. The publish date is kept
/// raw — no date normalization happens here, so an unparseable upstream date
/// still reaches the consumer verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    #[serde(rename = "pubDate")]
    pub pub_date: String,
    pub description: String,
}

/// Named parsing-strategy variant, selected per source at configuration time.
///
/// This replaces ad-hoc URL substring matching: a new quirky provider gets a
/// registry entry in its source config instead of a conditional in parse logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseStrategy {
    /// Standard RSS 2.0 / Atom extraction.
    #[default]
    Standard,
    /// Providers that embed titles/links in CDATA blocks a DOM-style parser
    /// can mis-handle. Entries with empty title or link after the structured
    /// pass are repaired from the raw text, and the fallback requires a CDATA
    /// title per item block.
    CdataEmbedded,
}

// ============================================================================
// Entry Point
// ============================================================================

/// Parse raw feed markup into an ordered list of entries.
///
/// Never fails: malformed XML is downgraded to the regex fallback, and total
/// failure returns an empty vec — the caller records the condition as a
/// per-source error, not this function.
pub fn parse_entries(raw: &str, strategy: ParseStrategy) -> Vec<FeedEntry> {
    let mut entries = match structured_pass(raw) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(error = %e, "Structured parse failed, using fallback");
            Vec::new()
        }
    };

    if strategy == ParseStrategy::CdataEmbedded {
        repair_from_raw(raw, &mut entries);
    }

    if entries.is_empty() {
        entries = match strategy {
            ParseStrategy::Standard => fallback_standard(raw),
            ParseStrategy::CdataEmbedded => fallback_cdata_items(raw),
        };
        if !entries.is_empty() {
            tracing::debug!(entries = entries.len(), "Recovered entries via fallback scan");
        }
    }

    entries
}

// ============================================================================
// Structured Pass
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Title,
    Link,
    PubDate,
    Published,
    Updated,
    Description,
    Summary,
    Content,
}

fn field_for(tag: &[u8]) -> Option<FieldKind> {
    match tag {
        b"title" => Some(FieldKind::Title),
        b"link" => Some(FieldKind::Link),
        b"pubDate" => Some(FieldKind::PubDate),
        b"published" => Some(FieldKind::Published),
        b"updated" => Some(FieldKind::Updated),
        b"description" => Some(FieldKind::Description),
        b"summary" => Some(FieldKind::Summary),
        b"content" => Some(FieldKind::Content),
        _ => None,
    }
}

/// Accumulated element content. CDATA payloads take precedence over plain
/// text when both are present.
#[derive(Default)]
struct Capture {
    text: String,
    cdata: Option<String>,
}

impl Capture {
    fn push_text(&mut self, s: &str) {
        self.text.push_str(s);
    }

    fn set_cdata(&mut self, s: String) {
        if self.cdata.is_none() {
            self.cdata = Some(s);
        }
    }

    fn value(&self) -> String {
        match &self.cdata {
            Some(cdata) => cdata.trim().to_string(),
            None => self.text.trim().to_string(),
        }
    }
}

#[derive(Default)]
struct RawItem {
    is_atom: bool,
    title: Capture,
    link: Capture,
    link_href: Option<String>,
    pub_date: Capture,
    published: Capture,
    updated: Capture,
    description: Capture,
    summary: Capture,
    content: Capture,
}

impl RawItem {
    fn capture_mut(&mut self, kind: FieldKind) -> &mut Capture {
        match kind {
            FieldKind::Title => &mut self.title,
            FieldKind::Link => &mut self.link,
            FieldKind::PubDate => &mut self.pub_date,
            FieldKind::Published => &mut self.published,
            FieldKind::Updated => &mut self.updated,
            FieldKind::Description => &mut self.description,
            FieldKind::Summary => &mut self.summary,
            FieldKind::Content => &mut self.content,
        }
    }

    fn finish(self) -> FeedEntry {
        // href attribute wins over element text for the link (Atom); RSS
        // links only ever have text content.
        let link = match &self.link_href {
            Some(href) if !href.is_empty() => href.clone(),
            _ => self.link.value(),
        };
        if self.is_atom {
            FeedEntry {
                title: self.title.value(),
                link,
                pub_date: first_non_empty(self.published.value(), self.updated.value()),
                description: first_non_empty(self.summary.value(), self.content.value()),
            }
        } else {
            FeedEntry {
                title: self.title.value(),
                link,
                pub_date: self.pub_date.value(),
                description: self.description.value(),
            }
        }
    }
}

fn first_non_empty(a: String, b: String) -> String {
    if a.is_empty() {
        b
    } else {
        a
    }
}

/// Event-walk the document and collect item/entry containers.
///
/// Any reader error aborts the whole pass — partial results are discarded so
/// the caller falls through to the raw-text fallback, mirroring how a DOM
/// parse exception discards the document.
fn structured_pass(raw: &str) -> anyhow::Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut item: Option<RawItem> = None;
    let mut current: Option<FieldKind> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"item" if item.is_none() => item = Some(RawItem::default()),
                b"entry" if item.is_none() => {
                    item = Some(RawItem {
                        is_atom: true,
                        ..Default::default()
                    })
                }
                tag => {
                    if let Some(it) = item.as_mut() {
                        if let Some(kind) = field_for(tag) {
                            current = Some(kind);
                            if kind == FieldKind::Link {
                                if let Some(href) = link_href(&e, &reader)? {
                                    it.link_href.get_or_insert(href);
                                }
                            }
                        }
                    }
                }
            },
            Event::Empty(e) => {
                // Atom link elements are typically self-closing: <link href="..."/>
                if e.name().as_ref() == b"link" {
                    if let Some(it) = item.as_mut() {
                        if let Some(href) = link_href(&e, &reader)? {
                            it.link_href.get_or_insert(href);
                        }
                    }
                }
            }
            Event::Text(e) => {
                if let (Some(it), Some(kind)) = (item.as_mut(), current) {
                    let text = e.unescape()?;
                    it.capture_mut(kind).push_text(&text);
                }
            }
            Event::CData(e) => {
                if let (Some(it), Some(kind)) = (item.as_mut(), current) {
                    let text = reader.decoder().decode(&e)?;
                    it.capture_mut(kind).set_cdata(text.into_owned());
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    if let Some(it) = item.take() {
                        entries.push(it.finish());
                    }
                    current = None;
                }
                tag => {
                    if current.is_some() && field_for(tag) == current {
                        current = None;
                    }
                }
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn link_href(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> anyhow::Result<Option<String>> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed link attribute");
                continue;
            }
        };
        if attr.key.as_ref() == b"href" {
            let href = attr.decode_and_unescape_value(reader.decoder())?;
            return Ok(Some(href.trim().to_string()));
        }
    }
    Ok(None)
}

// ============================================================================
// Raw-Text Recovery
// ============================================================================

static ITEM_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<item>.*?</item>").expect("valid pattern"));
static CDATA_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<title><!\[CDATA\[([^\]]+)\]\]></title>").expect("valid pattern"));
static PLAIN_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<title>([^<]+)</title>").expect("valid pattern"));
static PLAIN_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<link>([^<]+)</link>").expect("valid pattern"));
static HREF_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<link[^>]+href="([^"]+)""#).expect("valid pattern"));
static PUB_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<pubDate>([^<]+)</pubDate>").expect("valid pattern"));

fn captures_at_1(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Repair entries whose title or link came back empty, using the i-th raw
/// `<item>` block. Only fills gaps; fields the structured pass recovered are
/// left untouched.
fn repair_from_raw(raw: &str, entries: &mut [FeedEntry]) {
    let blocks: Vec<&str> = ITEM_BLOCK_RE.find_iter(raw).map(|m| m.as_str()).collect();
    for (entry, block) in entries.iter_mut().zip(blocks) {
        if entry.title.is_empty() {
            if let Some(c) = CDATA_TITLE_RE.captures(block) {
                entry.title = c[1].trim().to_string();
            }
        }
        if entry.link.is_empty() {
            if let Some(c) = PLAIN_LINK_RE.captures(block) {
                entry.link = c[1].trim().to_string();
            }
        }
    }
}

/// Positional pairing fallback for unrecognized dialects.
///
/// Collects title-like and link-like spans (plain form first, the CDATA/href
/// variant only when the plain form finds nothing), pairs them by position,
/// and skips the first pair — it is assumed to be the feed-level title/link
/// rather than an item. Pairs missing either field are dropped.
fn fallback_standard(raw: &str) -> Vec<FeedEntry> {
    let mut titles = captures_at_1(&PLAIN_TITLE_RE, raw);
    if titles.is_empty() {
        titles = captures_at_1(&CDATA_TITLE_RE, raw);
    }
    let mut links = captures_at_1(&PLAIN_LINK_RE, raw);
    if links.is_empty() {
        links = captures_at_1(&HREF_LINK_RE, raw);
    }

    let mut entries = Vec::new();
    for i in 1..titles.len().min(links.len()) {
        if titles[i].is_empty() || links[i].is_empty() {
            continue;
        }
        entries.push(FeedEntry {
            title: titles[i].clone(),
            link: links[i].clone(),
            pub_date: String::new(),
            description: String::new(),
        });
    }
    entries
}

/// Per-item-block fallback for CDATA-embedded providers: each `<item>` block
/// must yield a CDATA title and a plain link to be accepted.
fn fallback_cdata_items(raw: &str) -> Vec<FeedEntry> {
    let mut entries = Vec::new();
    for block in ITEM_BLOCK_RE.find_iter(raw) {
        let block = block.as_str();
        let title = CDATA_TITLE_RE
            .captures(block)
            .map(|c| c[1].trim().to_string());
        let link = PLAIN_LINK_RE
            .captures(block)
            .map(|c| c[1].trim().to_string());
        let pub_date = PUB_DATE_RE
            .captures(block)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();

        if let (Some(title), Some(link)) = (title, link) {
            if !title.is_empty() && !link.is_empty() {
                entries.push(FeedEntry {
                    title,
                    link,
                    pub_date,
                    description: String::new(),
                });
            }
        }
    }
    entries
}

// ============================================================================
// Tests
// ============================================================================
