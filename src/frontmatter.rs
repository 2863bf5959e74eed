//! Front matter: a YAML header delimited by `---` lines.
//!
//! ```text
//! ---
//! title: Hello
//! layout: post.html
//! ---
//! # Hi
//! ```
//!
//! A file without a header is valid and yields no metadata. A header that is
//! not valid YAML, or is not a mapping, is a recoverable problem: the header
//! is dropped, the record keeps empty metadata and gets a warning.

use crate::record::{FileRecord, Metadata, RenderStage};
use thiserror::Error;
use tracing::warn;

const DELIMITER: &str = "---";

#[derive(Error, Debug)]
pub enum FrontMatterError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("expected a mapping, found {0}")]
    NotAMapping(&'static str),
}

/// Split a leading front matter block from the body.
///
/// Returns `(yaml, body)`, or `None` if the text does not open with a `---`
/// line followed later by a closing `---` line.
pub fn split(text: &str) -> Option<(&str, &str)> {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    let rest = trimmed.strip_prefix(DELIMITER)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Parse front matter YAML into metadata. Blank YAML is an empty mapping.
pub fn parse(yaml: &str) -> Result<Metadata, FrontMatterError> {
    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }
    match serde_yaml::from_str::<serde_json::Value>(yaml)? {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(Metadata::new()),
        serde_json::Value::Array(_) => Err(FrontMatterError::NotAMapping("a sequence")),
        serde_json::Value::String(_) => Err(FrontMatterError::NotAMapping("a string")),
        serde_json::Value::Number(_) => Err(FrontMatterError::NotAMapping("a number")),
        serde_json::Value::Bool(_) => Err(FrontMatterError::NotAMapping("a boolean")),
    }
}

/// Strip the header from a record's body and hold it in `front_matter`.
///
/// Runs once per record: a record already past [`RenderStage::Raw`] is left
/// untouched, so passing it through again is a no-op.
pub fn extract(record: &mut FileRecord) {
    if record.stage >= RenderStage::FrontMatterStripped {
        return;
    }
    record.stage = RenderStage::FrontMatterStripped;

    let (parsed, body) = {
        let text = record.text();
        let Some((yaml, body)) = split(&text) else {
            return;
        };
        (parse(yaml), body.to_string())
    };

    match parsed {
        Ok(metadata) => record.front_matter = Some(metadata),
        Err(e) => {
            warn!(path = %record.path.display(), error = %e, "Ignoring malformed front matter");
            record.warn(format!("front matter ignored: {e}"));
        }
    }
    record.set_text(body);
}

/// Merge held front matter into the record's metadata; front matter keys win.
///
/// A record with nothing held is unchanged.
pub fn merge(record: &mut FileRecord) {
    if let Some(front_matter) = record.front_matter.take() {
        record.metadata.extend(front_matter);
    }
}
