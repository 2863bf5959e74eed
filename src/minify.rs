//! Minifiers for distribution output.
//!
//! CSS goes through grass in compressed mode (plain CSS is valid SCSS). The
//! JavaScript and HTML minifiers are deliberately conservative: they only
//! remove comments and redundant whitespace, never rename or restructure.

use grass::{Options, OutputStyle};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{kind} minification failed: {message}")]
pub struct MinifyError {
    pub kind: &'static str,
    pub message: String,
}

pub trait Minifier: Send + Sync {
    fn minify(&self, source: &str) -> Result<String, MinifyError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GrassCssMinifier;

impl Minifier for GrassCssMinifier {
    fn minify(&self, source: &str) -> Result<String, MinifyError> {
        let options = Options::default().style(OutputStyle::Compressed);
        grass::from_string(source.to_owned(), &options).map_err(|e| MinifyError {
            kind: "css",
            message: e.to_string(),
        })
    }
}

/// Comment and whitespace stripper for JavaScript.
///
/// Strings, template literals and regex literals are copied untouched.
/// `/*! ... */` comments survive (license banners). Line breaks are kept
/// where whitespace contained one, so automatic semicolon insertion still
/// sees the same statement boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripJsMinifier;

#[derive(Clone, Copy, PartialEq)]
enum Gap {
    None,
    Space,
    Newline,
}

impl Minifier for StripJsMinifier {
    fn minify(&self, source: &str) -> Result<String, MinifyError> {
        let chars: Vec<char> = source.chars().collect();
        let mut out = String::with_capacity(source.len());
        let mut gap = Gap::None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if c.is_whitespace() {
                if c == '\n' || c == '\r' {
                    gap = Gap::Newline;
                } else if gap == Gap::None {
                    gap = Gap::Space;
                }
                i += 1;
                continue;
            }

            if c == '/' && next == Some('/') {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }

            if c == '/' && next == Some('*') {
                let end = find_block_end(&chars, i + 2).ok_or_else(|| unterminated("comment"))?;
                if chars.get(i + 2) == Some(&'!') {
                    flush_gap(&mut out, gap, '/');
                    gap = Gap::None;
                    out.extend(&chars[i..end]);
                } else if gap == Gap::None {
                    gap = Gap::Space;
                }
                i = end;
                continue;
            }

            flush_gap(&mut out, gap, c);
            gap = Gap::None;

            match c {
                '\'' | '"' | '`' => {
                    let end = find_quote_end(&chars, i + 1, c).ok_or_else(|| unterminated("string"))?;
                    out.extend(&chars[i..end]);
                    i = end;
                }
                '/' if regex_allowed(&out) => {
                    let end = find_regex_end(&chars, i + 1).ok_or_else(|| unterminated("regex"))?;
                    out.extend(&chars[i..end]);
                    i = end;
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        Ok(out)
    }
}

fn unterminated(what: &str) -> MinifyError {
    MinifyError {
        kind: "js",
        message: format!("unterminated {what}"),
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Emit the collapsed whitespace before `next`, if it is still needed.
fn flush_gap(out: &mut String, gap: Gap, next: char) {
    let Some(prev) = out.chars().last() else {
        return;
    };
    match gap {
        Gap::None => {}
        Gap::Newline => out.push('\n'),
        Gap::Space => {
            let joins = (is_word(prev) && is_word(next))
                || (prev == '+' && next == '+')
                || (prev == '-' && next == '-')
                || (prev == '/' && next == '/');
            if joins {
                out.push(' ');
            }
        }
    }
}

/// Index just past the closing `*/`.
fn find_block_end(chars: &[char], from: usize) -> Option<usize> {
    (from..chars.len().saturating_sub(1))
        .find(|&j| chars[j] == '*' && chars[j + 1] == '/')
        .map(|j| j + 2)
}

/// Index just past the closing quote, honouring backslash escapes.
fn find_quote_end(chars: &[char], mut i: usize, quote: char) -> Option<usize> {
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return Some(i + 1),
            '\n' if quote != '`' => return None,
            _ => i += 1,
        }
    }
    None
}

/// Index just past the closing `/` of a regex literal and its flags.
fn find_regex_end(chars: &[char], mut i: usize) -> Option<usize> {
    let mut in_class = false;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' => return None,
            '[' => {
                in_class = true;
                i += 1;
            }
            ']' => {
                in_class = false;
                i += 1;
            }
            '/' if !in_class => {
                i += 1;
                while i < chars.len() && chars[i].is_alphabetic() {
                    i += 1;
                }
                return Some(i);
            }
            _ => i += 1,
        }
    }
    None
}

/// A `/` starts a regex when the previous token cannot end an expression.
fn regex_allowed(out: &str) -> bool {
    let trimmed = out.trim_end();
    let Some(prev) = trimmed.chars().last() else {
        return true;
    };
    if "(,=:[!&|?{};+-*%<>~^\n".contains(prev) {
        return true;
    }
    if is_word(prev) {
        let word: String = trimmed
            .chars()
            .rev()
            .take_while(|&c| is_word(c))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return matches!(
            word.as_str(),
            "return" | "typeof" | "instanceof" | "in" | "of" | "new" | "delete" | "void" | "throw"
                | "case" | "do" | "else"
        );
    }
    false
}

static PRESERVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<pre\b.*?</pre\s*>|<textarea\b.*?</textarea\s*>|<script\b.*?</script\s*>")
        .expect("static regex")
});
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));

/// Strips HTML comments (except IE conditional comments) and indentation.
///
/// `<pre>`, `<textarea>` and `<script>` elements are copied verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlMinifier;

impl HtmlMinifier {
    fn squeeze(segment: &str) -> String {
        let without_comments = COMMENT.replace_all(segment, |caps: &regex::Captures| {
            let comment = &caps[0];
            if comment.starts_with("<!--[if") {
                comment.to_string()
            } else {
                String::new()
            }
        });
        without_comments
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Minifier for HtmlMinifier {
    fn minify(&self, source: &str) -> Result<String, MinifyError> {
        let mut out = String::with_capacity(source.len());
        let mut last = 0;
        for keep in PRESERVED.find_iter(source) {
            push_segment(&mut out, &Self::squeeze(&source[last..keep.start()]));
            push_segment(&mut out, keep.as_str());
            last = keep.end();
        }
        push_segment(&mut out, &Self::squeeze(&source[last..]));
        Ok(out)
    }
}

fn push_segment(out: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(segment);
}

/// The minifier set used by distribution builds, keyed by file extension.
pub struct Minifiers {
    pub css: Box<dyn Minifier>,
    pub js: Box<dyn Minifier>,
    pub html: Box<dyn Minifier>,
}

impl Default for Minifiers {
    fn default() -> Self {
        Self {
            css: Box::new(GrassCssMinifier),
            js: Box::new(StripJsMinifier),
            html: Box::new(HtmlMinifier),
        }
    }
}

impl Minifiers {
    pub fn for_extension(&self, ext: &str) -> Option<&dyn Minifier> {
        match ext {
            "css" => Some(self.css.as_ref()),
            "js" => Some(self.js.as_ref()),
            "html" | "htm" => Some(self.html.as_ref()),
            _ => None,
        }
    }
}
