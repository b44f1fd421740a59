//! View mounting collaborator.

use crate::content::ReaderContent;
use crate::document::MemoryContainer;
use crate::error::MountError;

/// Renders reader content into a container and tears it down again.
pub trait ViewMounter<C> {
    type Handle;

    fn mount(&self, container: &C, content: &ReaderContent) -> Result<Self::Handle, MountError>;

    fn unmount(&self, handle: Self::Handle);
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Renders the article as static markup into a [`MemoryContainer`].
///
/// The content is expected to be sanitized already; only the title and
/// byline are escaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupMounter;

impl MarkupMounter {
    pub fn render(content: &ReaderContent) -> String {
        let mut markup = String::from(r#"<article class="reader-view">"#);
        markup.push_str("<h1>");
        markup.push_str(&escape_text(&content.title));
        markup.push_str("</h1>");
        if let Some(byline) = &content.byline {
            markup.push_str(r#"<p class="byline">"#);
            markup.push_str(&escape_text(byline));
            markup.push_str("</p>");
        }
        markup.push_str(&content.content);
        markup.push_str("</article>");
        markup
    }
}

impl ViewMounter<MemoryContainer> for MarkupMounter {
    type Handle = MemoryContainer;

    fn mount(
        &self,
        container: &MemoryContainer,
        content: &ReaderContent,
    ) -> Result<MemoryContainer, MountError> {
        container.set_inner_html(Self::render(content));
        Ok(container.clone())
    }

    fn unmount(&self, handle: MemoryContainer) {
        handle.set_inner_html("");
    }
}
