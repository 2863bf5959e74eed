//! Shared test utilities: a scaffolded sample project.
//!
//! ```text
//! <tmp>/app/
//! ├── content/
//! │   ├── index.md            title: Hello, default layout
//! │   ├── blog/first.md       layout: post
//! │   └── robots.txt          copied as-is
//! ├── templates/
//! │   ├── default.html        css + js build regions
//! │   └── post.html
//! ├── styles/
//! │   ├── main.scss
//! │   └── normalize.css       bundled from the app root
//! └── scripts/
//!     ├── main.js
//!     └── lib/util.js
//! ```

use crate::config::{BuildConfig, BuildMode, Overrides, SiteConfig};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const DEFAULT_LAYOUT: &str = r#"<!doctype html>
<html>
<head>
  <title>{{ title | default(value="Untitled") }}</title>
  <!-- build:css styles/vendor.css -->
  <link rel="stylesheet" href="styles/normalize.css">
  <link rel="stylesheet" href="styles/main.css">
  <!-- endbuild -->
</head>
<body>
  <!-- page body -->
  <main>{{ contents | safe }}</main>
  <!-- build:js scripts/app.js -->
  <script src="scripts/lib/util.js"></script>
  <script src="scripts/main.js"></script>
  <!-- endbuild -->
</body>
</html>
"#;

pub const POST_LAYOUT: &str =
    "<article><h1>{{ title }}</h1>\n{{ contents | safe }}</article>\n";

pub const MAIN_SCSS: &str = "$primary: #336699;\nbody {\n  color: $primary;\n}\n";

pub const MAIN_JS: &str =
    "// entry point\nfunction greet(name) {\n    return 'Hello, ' + name;\n}\n";

pub const UTIL_JS: &str =
    "/* helpers */\nvar util = {\n    twice: function (x) { return x * 2; }\n};\n";

pub struct SampleProject {
    tmp: TempDir,
}

impl SampleProject {
    pub fn new() -> Self {
        let project = Self {
            tmp: TempDir::new().unwrap(),
        };
        project.write("app/content/index.md", "---\ntitle: Hello\n---\n# Hi\n");
        project.write(
            "app/content/blog/first.md",
            "---\ntitle: First\nlayout: post\n---\nSome *text*.\n",
        );
        project.write("app/content/robots.txt", "User-agent: *\n");
        project.write("app/templates/default.html", DEFAULT_LAYOUT);
        project.write("app/templates/post.html", POST_LAYOUT);
        project.write("app/styles/main.scss", MAIN_SCSS);
        project.write("app/styles/normalize.css", "html { line-height: 1.15; }\n");
        project.write("app/scripts/main.js", MAIN_JS);
        project.write("app/scripts/lib/util.js", UTIL_JS);
        project
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    /// Write a project file, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.tmp.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn read_output(&self, config: &BuildConfig, relative: &str) -> String {
        std::fs::read_to_string(config.output.join(relative))
            .unwrap_or_else(|e| panic!("{relative}: {e}"))
    }
}

/// Stock configuration for a sample project in the given mode.
pub fn sample_config(project: &SampleProject, mode: BuildMode) -> Arc<BuildConfig> {
    let overrides = Overrides {
        dist: mode.is_dist(),
        ..Overrides::default()
    };
    BuildConfig::resolve(project.root(), SiteConfig::default(), overrides).unwrap()
}
