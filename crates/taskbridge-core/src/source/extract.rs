//! Multi-strategy extractor for emailed design-comment notifications.
//!
//! Notification emails bury the actual comment inside provider-specific
//! HTML. The extractor tries a fixed list of strategies in order and takes
//! the first one that produces a non-empty comment text; file-key
//! extraction runs independently. Extraction only succeeds when both a
//! comment text and a file key were found.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

/// Structured result of a successful extraction.
#[derive(Debug, Clone)]
pub struct ExtractedComment {
    /// The comment text the author wrote.
    pub comment_text: String,
    /// Opaque design-file key.
    pub file_key: String,
    /// Source-side comment id, when a link carried one.
    pub comment_id: Option<String>,
    /// Design-file display name, when a link carried one.
    pub file_name: Option<String>,
    /// Sender address of the notification email.
    pub author_email: String,
    /// Author display name, when the body names one.
    pub author_name: Option<String>,
    /// Deep link to the commented file.
    pub source_url: Option<String>,
    /// Extraction details (winning strategy).
    pub metadata: BTreeMap<String, String>,
}

/// Extract a structured comment from a notification email.
///
/// `bot_name` is the tenant's bot handle; when present, a direct
/// `@BotName …` mention is the highest-priority strategy.
pub fn extract_comment(
    html: &str,
    sender: &str,
    bot_name: Option<&str>,
) -> Option<ExtractedComment> {
    let document = Html::parse_document(html);
    let text = normalize_whitespace(&strip_tags(html));

    let (comment_text, strategy) = bot_name
        .and_then(|bot| bot_mention_capture(&text, bot).map(|t| (t, "bot_mention")))
        .or_else(|| table_cell_mention(&document).map(|t| (t, "table_cell")))
        .or_else(|| mention_context(&text).map(|t| (t, "mention_context")))
        .or_else(|| known_selectors(&document).map(|t| (t, "selector")))
        .or_else(|| longest_paragraph(&document, &text).map(|t| (t, "longest_paragraph")))?;

    let links = collect_links(&document);
    let file_key = file_key_from_sender(sender)
        .or_else(|| file_key_from_redirects(&links))
        .or_else(|| file_key_from_direct_links(&links))?;

    let source_url = links
        .iter()
        .find(|href| direct_file_key(href).is_some())
        .cloned();

    let mut metadata = BTreeMap::new();
    metadata.insert("strategy".to_string(), strategy.to_string());

    Some(ExtractedComment {
        comment_text,
        file_key,
        comment_id: source_url.as_deref().and_then(comment_id_from_url),
        file_name: source_url.as_deref().and_then(file_name_from_url),
        author_email: sender.to_string(),
        author_name: author_name_from_text(&text),
        source_url,
        metadata,
    })
}

// ---------------------------------------------------------------------------
// Comment-text strategies, in priority order
// ---------------------------------------------------------------------------

/// Strategy 1: the longest `@BotName …` capture in the visible text.
fn bot_mention_capture(text: &str, bot_name: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r"@{}\b[^\n]*", regex::escape(bot_name))).ok()?;

    pattern
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|candidate| !candidate.is_empty())
        .max_by_key(String::len)
}

/// Strategy 2: a short `<td>` cell containing a real `@mention`.
fn table_cell_mention(document: &Html) -> Option<String> {
    let td = Selector::parse("td").ok()?;

    for cell in document.select(&td) {
        let content = normalize_whitespace(&cell.text().collect::<Vec<_>>().join(" "));
        if content.is_empty() || content.len() > 300 {
            continue;
        }
        if has_valid_mention(&content) && !is_boilerplate(&content) {
            return Some(content);
        }
    }
    None
}

/// Strategy 3: ±100 characters of context around any valid `@mention`.
fn mention_context(text: &str) -> Option<String> {
    let m = mention_regex()
        .find_iter(text)
        .find(|m| !is_css_pseudo_mention(m.as_str()))?;

    let start = floor_char_boundary(text, m.start().saturating_sub(100));
    let end = ceil_char_boundary(text, (m.end() + 100).min(text.len()));
    let window = normalize_whitespace(&text[start..end]);

    (!window.is_empty()).then_some(window)
}

/// Strategy 4: CSS selectors used by known notification senders.
fn known_selectors(document: &Html) -> Option<String> {
    const SELECTORS: &[&str] = &[
        ".comment-text",
        ".comment-body",
        ".message-body",
        "div.comment",
        "blockquote",
    ];

    for selector in SELECTORS {
        let Ok(parsed) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&parsed) {
            let content = normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if !content.is_empty() && !is_boilerplate(&content) {
                return Some(content);
            }
        }
    }
    None
}

/// Strategy 5: the longest non-boilerplate paragraph.
fn longest_paragraph(document: &Html, fallback_text: &str) -> Option<String> {
    let p = Selector::parse("p").ok()?;

    let best = document
        .select(&p)
        .map(|el| normalize_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty() && !is_boilerplate(t) && !is_css_pseudo_mention(t))
        .max_by_key(String::len);

    best.or_else(|| {
        fallback_text
            .split('\n')
            .map(str::trim)
            .filter(|t| !t.is_empty() && !is_boilerplate(t))
            .max_by_key(|t| t.len())
            .map(String::from)
    })
}

// ---------------------------------------------------------------------------
// File key extraction, independent of comment text
// ---------------------------------------------------------------------------

/// (a) A key embedded in the sender local part, e.g. `file-AbC123xYz@…`.
fn file_key_from_sender(sender: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?:file|comments)[-+]([A-Za-z0-9]{8,})").expect("sender key pattern")
    });

    let local = sender.split('@').next()?;
    pattern
        .captures(local)
        .map(|c| c.get(1).expect("capture").as_str().to_string())
}

/// (b) A key inside a percent-encoded redirect URL in any link.
fn file_key_from_redirects(links: &[String]) -> Option<String> {
    links.iter().find_map(|href| {
        let (_, query) = href.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (_, value) = pair.split_once('=')?;
            let decoded = percent_decode(value);
            direct_file_key(&decoded)
        })
    })
}

/// (c) A key in a direct file link.
fn file_key_from_direct_links(links: &[String]) -> Option<String> {
    links.iter().find_map(|href| direct_file_key(href))
}

fn direct_file_key(url: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"/(?:file|design)/([A-Za-z0-9]{8,})").expect("file key pattern")
    });

    pattern
        .captures(url)
        .map(|c| c.get(1).expect("capture").as_str().to_string())
}

fn comment_id_from_url(url: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"[?&#]comment[-_]?id=([A-Za-z0-9-]+)").expect("comment id pattern")
    });

    pattern
        .captures(url)
        .map(|c| c.get(1).expect("capture").as_str().to_string())
}

fn file_name_from_url(url: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"/(?:file|design)/[A-Za-z0-9]{8,}/([^/?#]+)").expect("file name pattern")
    });

    pattern.captures(url).map(|c| {
        percent_decode(c.get(1).expect("capture").as_str()).replace('-', " ")
    })
}

fn author_name_from_text(text: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"([A-Z][A-Za-z .'-]{1,60}?) (?:commented|replied|mentioned you)")
            .expect("author pattern")
    });

    pattern
        .captures(text)
        .map(|c| c.get(1).expect("capture").as_str().trim().to_string())
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Remove tags, dropping `<style>` and `<script>` content entirely.
fn strip_tags(html: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();

    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<(style|script)[^>]*>.*?</(style|script)>").expect("block pattern")
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("tag pattern"));

    let without_blocks = blocks.replace_all(html, "\n");
    let without_tags = tags.replace_all(&without_blocks, "\n");
    without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Collapse runs of spaces and tabs; keep single newlines as separators.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

/// Footer noise that must never win a strategy.
fn is_boilerplate(text: &str) -> bool {
    let lower = text.to_lowercase();
    const MARKERS: &[&str] = &[
        "unsubscribe",
        "view in app",
        "open in app",
        "manage notifications",
        "notification settings",
        "all rights reserved",
        "privacy policy",
        "terms of service",
    ];
    MARKERS.iter().any(|m| lower.contains(m)) || lower.contains('©') || lower.contains("copyright")
}

/// Stylesheet at-rules that look like mentions once tags are stripped.
fn is_css_pseudo_mention(text: &str) -> bool {
    const PSEUDO: &[&str] = &[
        "@media",
        "@font-face",
        "@import",
        "@charset",
        "@keyframes",
        "@page",
        "@supports",
    ];
    let lower = text.to_lowercase();
    PSEUDO.iter().any(|p| lower.starts_with(p) || lower.contains(p))
}

fn mention_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@[A-Za-z][A-Za-z0-9_.-]*").expect("mention pattern"))
}

fn has_valid_mention(text: &str) -> bool {
    mention_regex()
        .find_iter(text)
        .any(|m| !is_css_pseudo_mention(m.as_str()))
}

fn collect_links(document: &Html) -> Vec<String> {
    let Ok(a) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&a)
        .filter_map(|el| el.value().attr("href"))
        .map(String::from)
        .collect()
}

/// Decode `%XX` escapes and `+` (query-string form) in a URL component.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
