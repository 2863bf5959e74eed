//! Asset manifest: logical asset names to emitted files.
//!
//! In distribution mode every fingerprinted asset is recorded here and the
//! manifest is saved as `asset-manifest.json` in the output root:
//!
//! ```json
//! {
//!   "styles/vendor.css": {
//!     "path": "styles/vendor-1a2b3c4d.css",
//!     "fingerprint": "1a2b3c4d",
//!     "sources": ["bower_components/normalize.css/normalize.css"]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

pub const MANIFEST_FILENAME: &str = "asset-manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Output-relative path of the emitted file.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Inputs the asset was built from, in reference order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl AssetManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, logical: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(logical.into(), entry);
    }

    pub fn get(&self, logical: &str) -> Option<&ManifestEntry> {
        self.entries.get(logical)
    }

    /// Emitted path for a logical name, if it was fingerprinted.
    pub fn resolve(&self, logical: &str) -> Option<&str> {
        self.entries.get(logical).map(|e| e.path.as_str())
    }

    pub fn logical_sources(&self, logical: &str) -> &[String] {
        self.entries
            .get(logical)
            .map(|e| e.sources.as_slice())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold another manifest in; its entries win.
    pub fn extend(&mut self, other: AssetManifest) {
        self.entries.extend(other.entries);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Read a saved manifest. A missing file is an empty manifest.
    pub fn load(output_dir: &Path) -> io::Result<Self> {
        let path = output_dir.join(MANIFEST_FILENAME);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }
}
