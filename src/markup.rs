//! Markdown rendering.
//!
//! The content pipeline only depends on [`MarkupRenderer`]. The production
//! renderer is pulldown-cmark with the GitHub-flavoured extensions enabled.

use pulldown_cmark::{Options, Parser, html::push_html};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Markup rendering failed: {0}")]
pub struct MarkupError(pub String);

/// Turns a markup body into HTML.
pub trait MarkupRenderer: Send + Sync {
    fn render(&self, source: &str) -> Result<String, MarkupError>;
}

/// CommonMark plus tables, strikethrough, task lists and footnotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonMarkRenderer;

impl CommonMarkRenderer {
    fn options() -> Options {
        Options::ENABLE_TABLES
            | Options::ENABLE_STRIKETHROUGH
            | Options::ENABLE_TASKLISTS
            | Options::ENABLE_FOOTNOTES
    }
}

impl MarkupRenderer for CommonMarkRenderer {
    fn render(&self, source: &str) -> Result<String, MarkupError> {
        let parser = Parser::new_ext(source, Self::options());
        let mut html = String::with_capacity(source.len() * 2);
        push_html(&mut html, parser);
        Ok(html)
    }
}
