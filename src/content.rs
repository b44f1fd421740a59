//! Content extraction
//!
//! The readability collaborator hands back a loosely shaped [`RawArticle`];
//! [`ExtractionResult::from_raw`] turns it into either well-formed
//! [`ReaderContent`] or an explicit unreadable marker with a reason.

use crate::document::PageDocument;
use serde::{Deserialize, Serialize};

/// Sanitized article ready to mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderContent {
    pub title: String,
    /// Sanitized article markup.
    pub content: String,
    #[serde(default)]
    pub byline: Option<String>,
    /// Visible text length in characters.
    pub text_length: usize,
}

/// Collaborator output before validation. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawArticle {
    pub title: Option<String>,
    pub content: Option<String>,
    pub text_content: Option<String>,
    pub length: Option<usize>,
    pub byline: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    Readable(ReaderContent),
    Unreadable(String),
}

impl ExtractionResult {
    /// Validate collaborator output.
    ///
    /// Missing or blank content, or fewer than `min_chars` characters of
    /// text, is unreadable. A blank title falls back to `document_title`.
    pub fn from_raw(raw: Option<RawArticle>, document_title: &str, min_chars: usize) -> Self {
        let Some(raw) = raw else {
            return Self::Unreadable("no article found".into());
        };
        let content = match raw.content {
            Some(content) if !content.trim().is_empty() => content,
            _ => return Self::Unreadable("article has no content".into()),
        };

        let text_length = raw
            .length
            .or_else(|| raw.text_content.as_deref().map(|text| text.trim().chars().count()))
            .unwrap_or_else(|| visible_text_len(&content));
        if text_length < min_chars {
            return Self::Unreadable(format!(
                "article text too short ({text_length} < {min_chars} chars)"
            ));
        }

        let title = raw
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| document_title.trim().to_string());

        Self::Readable(ReaderContent {
            title,
            content,
            byline: raw.byline.filter(|byline| !byline.trim().is_empty()),
            text_length,
        })
    }

    pub fn is_readable(&self) -> bool {
        matches!(self, Self::Readable(_))
    }
}

/// Readability/sanitizer collaborator.
///
/// Must not mutate `document`. Failure is [`ExtractionResult::Unreadable`],
/// never a panic.
pub trait ContentExtractor<D: ?Sized> {
    fn extract(&self, document: &D) -> ExtractionResult;
}

impl<D: ?Sized, F> ContentExtractor<D> for F
where
    F: Fn(&D) -> ExtractionResult,
{
    fn extract(&self, document: &D) -> ExtractionResult {
        self(document)
    }
}

/// Characters outside of markup tags, trimmed, with whitespace runs counted once.
pub fn visible_text_len(markup: &str) -> usize {
    let mut in_tag = false;
    let mut last_was_space = true;
    let mut count = 0;
    for ch in markup.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c if c.is_whitespace() => {
                if !last_was_space {
                    count += 1;
                    last_was_space = true;
                }
            }
            _ => {
                count += 1;
                last_was_space = false;
            }
        }
    }
    if last_was_space && count > 0 {
        count -= 1;
    }
    count
}

fn strip_tags(markup: &str) -> String {
    let mut text = String::with_capacity(markup.len());
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Inner markup of the first `<tag ...>...</tag>` in `markup`.
fn first_element<'a>(markup: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut search = 0;
    while let Some(offset) = markup[search..].find(&open) {
        let start = search + offset;
        let after_name = start + open.len();
        // Skip longer tag names sharing the prefix, e.g. `<articles>`.
        match markup[after_name..].chars().next() {
            Some(c) if c == '>' || c.is_whitespace() || c == '/' => {
                let body_start = after_name + markup[after_name..].find('>')? + 1;
                let body_len = markup[body_start..].find(&close)?;
                return Some(&markup[body_start..body_start + body_len]);
            }
            _ => search = after_name,
        }
    }
    None
}

/// Extractor for markup documents: takes the first `<article>` element,
/// titled by its first `<h1>`.
#[derive(Debug, Clone, Copy)]
pub struct ArticleTagExtractor {
    min_chars: usize,
}

impl ArticleTagExtractor {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    fn raw_article(markup: &str) -> Option<RawArticle> {
        let article = first_element(markup, "article")?;
        let title = first_element(article, "h1").map(strip_tags);
        Some(RawArticle {
            title,
            content: Some(article.trim().to_string()),
            text_content: Some(strip_tags(article)),
            length: None,
            byline: None,
        })
    }
}

impl<D: PageDocument + ?Sized> ContentExtractor<D> for ArticleTagExtractor {
    fn extract(&self, document: &D) -> ExtractionResult {
        let markup = match document.serialize() {
            Ok(markup) => markup,
            Err(e) => return ExtractionResult::Unreadable(e.to_string()),
        };
        ExtractionResult::from_raw(Self::raw_article(&markup), &document.title(), self.min_chars)
    }
}
