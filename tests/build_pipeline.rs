//! End-to-end builds of a small project through the public API, with the
//! real SCSS compiler and minifiers.

use sitesmith::config::{BuildConfig, Overrides, SiteConfig};
use sitesmith::manifest::AssetManifest;
use sitesmith::site::{SMITH, Site};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const LAYOUT: &str = r#"<!doctype html>
<html>
<head>
  <title>{{ title | default(value="Untitled") }}</title>
  <!-- build:css styles/site.css -->
  <link rel="stylesheet" href="styles/reset.css">
  <link rel="stylesheet" href="styles/main.css">
  <!-- endbuild -->
</head>
<body>
  {{ contents | safe }}
  <!-- build:js scripts/site.js -->
  <script src="scripts/main.js"></script>
  <!-- endbuild -->
</body>
</html>
"#;

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let files = [
        ("app/content/a.md", "---\ntitle: Page A\n---\n# Heading A\n"),
        ("app/content/notes/b.md", "No front matter here.\n"),
        ("app/content/favicon.ico", "ico"),
        ("app/templates/default.html", LAYOUT),
        ("app/styles/main.scss", "$fg: #222;\nbody {\n  color: $fg;\n}\n"),
        ("app/styles/reset.css", "* { margin: 0; }\n"),
        ("app/scripts/main.js", "// boot\nvar ready = true;\n"),
    ];
    for (path, contents) in files {
        write(tmp.path(), path, contents);
    }
    tmp
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn config(root: &Path, dist: bool) -> Arc<BuildConfig> {
    let overrides = Overrides {
        dist,
        ..Overrides::default()
    };
    BuildConfig::resolve(root, SiteConfig::default(), overrides).unwrap()
}

fn read(config: &BuildConfig, relative: &str) -> String {
    fs::read_to_string(config.output.join(relative)).unwrap_or_else(|e| panic!("{relative}: {e}"))
}

fn asset_path<'a>(manifest: &'a AssetManifest, logical: &str) -> &'a str {
    manifest.resolve(logical).unwrap_or_else(|| panic!("{logical} not in manifest"))
}

#[test]
fn development_build_renders_pages_and_maps_styles() {
    let tmp = project();
    let config = config(tmp.path(), false);
    let report = Site::new(config.clone()).unwrap().build().unwrap();

    let page = read(&config, "a.html");
    assert!(page.contains("<title>Page A</title>"));
    assert!(page.contains("<h1>Heading A</h1>"));
    assert!(page.contains(r#"href="styles/reset.css""#));
    assert!(!page.contains("build:css"));

    assert!(read(&config, "notes/b.html").contains("<p>No front matter here.</p>"));
    assert_eq!(read(&config, "favicon.ico"), "ico");

    let css = read(&config, "styles/main.css");
    assert!(css.contains("color: #222"));
    assert!(css.contains("/*# sourceMappingURL=main.css.map */"));
    assert!(config.output.join("styles/main.css.map").exists());
    assert_eq!(read(&config, "scripts/main.js"), "// boot\nvar ready = true;\n");

    assert!(!config.staged_templates.exists());
    assert!(report.manifest.is_empty());
    assert!(report.warnings.is_empty());
}

#[test]
fn distribution_build_fingerprints_bundles() {
    let tmp = project();
    let config = config(tmp.path(), true);
    let report = Site::new(config.clone()).unwrap().build().unwrap();

    let css_bundle = asset_path(&report.manifest, "styles/site.css");
    let js_bundle = asset_path(&report.manifest, "scripts/site.js");
    assert!(css_bundle.starts_with("styles/site-") && css_bundle.ends_with(".css"));

    let page = read(&config, "a.html");
    assert!(page.contains(css_bundle));
    assert!(page.contains(js_bundle));
    assert!(!page.contains("styles/reset.css"));

    let css = read(&config, css_bundle);
    assert!(!css.contains("sourceMappingURL"));
    assert!(css.contains("margin:0"));
    assert!(!config.output.join("styles/main.css.map").exists());
    assert!(!read(&config, js_bundle).contains("// boot"));

    assert_eq!(
        report.manifest.logical_sources("styles/site.css"),
        ["styles/reset.css", "styles/main.css"]
    );
    assert_eq!(AssetManifest::load(&config.output).unwrap(), report.manifest);
}

#[test]
fn fingerprints_follow_content() {
    let tmp = project();
    let config = config(tmp.path(), true);
    let site = Site::new(config.clone()).unwrap();

    let first = site.build().unwrap();
    let again = site.build().unwrap();
    assert_eq!(
        asset_path(&first.manifest, "styles/site.css"),
        asset_path(&again.manifest, "styles/site.css")
    );

    write(tmp.path(), "app/styles/main.scss", "body { color: red; }\n");
    let changed = site.build().unwrap();
    assert_ne!(
        asset_path(&first.manifest, "styles/site.css"),
        asset_path(&changed.manifest, "styles/site.css")
    );
    assert_eq!(
        asset_path(&first.manifest, "scripts/site.js"),
        asset_path(&changed.manifest, "scripts/site.js")
    );
}

#[test]
fn full_build_discards_stale_output() {
    let tmp = project();
    let config = config(tmp.path(), false);
    write(&config.output, "old/page.html", "stale");

    Site::new(config.clone()).unwrap().build().unwrap();
    assert!(!config.output.join("old").exists());
    assert!(config.output.join("a.html").exists());
}

#[test]
fn malformed_front_matter_is_a_warning() {
    let tmp = project();
    write(tmp.path(), "app/content/broken.md", "---\ntitle: [unclosed\n---\nBody\n");
    let config = config(tmp.path(), false);

    let report = Site::new(config.clone()).unwrap().build().unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert!(read(&config, "broken.html").contains("Body"));
    assert!(read(&config, "a.html").contains("Heading A"));
}

#[test]
fn smith_alone_updates_pages_in_place() {
    let tmp = project();
    let config = config(tmp.path(), false);
    let site = Site::new(config.clone()).unwrap();
    site.build().unwrap();

    write(tmp.path(), "app/content/a.md", "---\ntitle: Edited\n---\nNew body\n");
    site.run(&[SMITH]).unwrap();
    assert!(read(&config, "a.html").contains("<title>Edited</title>"));
    assert!(config.output.join("favicon.ico").exists());
}
