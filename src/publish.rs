//! Deployment of a finished distribution build.
//!
//! [`Publisher`] receives the output root after `build` succeeded. Two
//! implementations ship:
//!
//! - [`DirectoryPublisher`] mirrors the tree into another directory.
//! - [`GitPagesPublisher`] commits the tree as the single commit of a
//!   throwaway repository and force-pushes it to a branch (`gh-pages` by
//!   default) of the project's remote. Credentials are whatever the local
//!   `git` uses.

use crate::config::PublishConfig;
use crate::files::{FileSet, SelectError, Selector};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error("git {command} failed ({status}): {stderr}")]
    Git {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("Nothing to publish: {} is empty", .0.display())]
    Empty(PathBuf),
}

/// What a publisher did, for the build summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub files: usize,
    pub destination: String,
}

pub trait Publisher: Send + Sync {
    fn publish(&self, root: &Path) -> Result<PublishOutcome, PublishError>;
}

fn published_files(root: &Path) -> Result<Vec<PathBuf>, PublishError> {
    let files = FileSet::new(root, Selector::all()).resolve()?;
    if files.is_empty() {
        return Err(PublishError::Empty(root.to_path_buf()));
    }
    Ok(files)
}

/// Replaces the contents of `target` with the output tree.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    pub target: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Publisher for DirectoryPublisher {
    fn publish(&self, root: &Path) -> Result<PublishOutcome, PublishError> {
        let files = published_files(root)?;
        if self.target.exists() {
            fs::remove_dir_all(&self.target)?;
        }
        for rel in &files {
            let dest = self.target.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(root.join(rel), &dest)?;
        }
        info!(dir = %self.target.display(), files = files.len(), "Published to directory");
        Ok(PublishOutcome {
            files: files.len(),
            destination: self.target.display().to_string(),
        })
    }
}

/// Force-pushes the output tree to a branch with the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitPagesPublisher {
    /// Repository whose remote is resolved (the project root).
    pub repository: PathBuf,
    /// Remote name or URL.
    pub remote: String,
    pub branch: String,
    pub message: String,
    /// Commit identity; `None` uses the local git configuration.
    pub identity: Option<(String, String)>,
}

impl GitPagesPublisher {
    pub fn new(repository: impl Into<PathBuf>, config: &PublishConfig) -> Self {
        Self {
            repository: repository.into(),
            remote: config.remote.clone(),
            branch: config.branch.clone(),
            message: config.message.clone(),
            identity: None,
        }
    }

    /// Remote names are looked up in the project repository; anything that
    /// looks like a URL or a path is used as-is.
    fn remote_url(&self) -> Result<String, PublishError> {
        if looks_like_url(&self.remote) {
            return Ok(self.remote.clone());
        }
        let url = git(
            Command::new("git")
                .arg("-C")
                .arg(&self.repository)
                .args(["remote", "get-url", &self.remote]),
            "remote get-url",
        )?;
        Ok(url.trim().to_string())
    }
}

pub fn looks_like_url(remote: &str) -> bool {
    remote.contains("://") || remote.contains('/') || remote.contains('\\') || remote.contains('@')
}

fn git(command: &mut Command, label: &str) -> Result<String, PublishError> {
    debug!(command = label, "Running git");
    let output = command.output()?;
    if !output.status.success() {
        return Err(PublishError::Git {
            command: label.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl Publisher for GitPagesPublisher {
    fn publish(&self, root: &Path) -> Result<PublishOutcome, PublishError> {
        let files = published_files(root)?;
        let url = self.remote_url()?;
        let git_dir = root
            .parent()
            .unwrap_or(root)
            .join(format!(".sitesmith-publish-{}.git", std::process::id()));

        let result = (|| -> Result<(), PublishError> {
            let repo = |args: &[&str]| {
                let mut cmd = Command::new("git");
                cmd.current_dir(root)
                    .env("GIT_DIR", &git_dir)
                    .env("GIT_WORK_TREE", root);
                if let Some((name, email)) = &self.identity {
                    cmd.args(["-c", &format!("user.name={name}")])
                        .args(["-c", &format!("user.email={email}")]);
                }
                cmd.args(args);
                cmd
            };
            git(&mut repo(&["init", "--quiet"]), "init")?;
            let head = format!("refs/heads/{}", self.branch);
            git(&mut repo(&["symbolic-ref", "HEAD", &head]), "symbolic-ref")?;
            git(&mut repo(&["add", "--all", "."]), "add")?;
            git(&mut repo(&["commit", "--quiet", "-m", &self.message]), "commit")?;
            let refspec = format!("HEAD:{head}");
            git(&mut repo(&["push", "--force", "--quiet", &url, &refspec]), "push")?;
            Ok(())
        })();

        if git_dir.exists() {
            fs::remove_dir_all(&git_dir)?;
        }
        result?;

        info!(remote = %url, branch = %self.branch, files = files.len(), "Published to git");
        Ok(PublishOutcome {
            files: files.len(),
            destination: format!("{url} ({})", self.branch),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site(tmp: &TempDir) -> PathBuf {
        let root = tmp.path().join("out");
        fs::create_dir_all(root.join("styles")).unwrap();
        fs::write(root.join("index.html"), "<h1>Hi</h1>").unwrap();
        fs::write(root.join("styles/main-1a2b3c4d.css"), "body{}").unwrap();
        root
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn directory_publisher_mirrors_tree() {
        let tmp = TempDir::new().unwrap();
        let root = site(&tmp);
        let target = tmp.path().join("public");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.html"), "old").unwrap();

        let outcome = DirectoryPublisher::new(&target).publish(&root).unwrap();
        assert_eq!(outcome.files, 2);
        assert!(target.join("index.html").exists());
        assert!(target.join("styles/main-1a2b3c4d.css").exists());
        assert!(!target.join("stale.html").exists());
    }

    #[test]
    fn empty_output_is_not_published() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        fs::create_dir_all(&root).unwrap();
        assert!(matches!(
            DirectoryPublisher::new(tmp.path().join("public")).publish(&root),
            Err(PublishError::Empty(_))
        ));
    }

    #[test]
    fn remote_url_detection() {
        assert!(looks_like_url("git@github.com:user/site.git"));
        assert!(looks_like_url("https://example.com/site.git"));
        assert!(looks_like_url("/srv/git/site.git"));
        assert!(!looks_like_url("origin"));
    }

    #[test]
    fn git_publisher_pushes_single_commit_branch() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let root = site(&tmp);
        let remote = tmp.path().join("remote.git");
        git(
            Command::new("git").args(["init", "--bare", "--quiet"]).arg(&remote),
            "init --bare",
        )
        .unwrap();

        let publisher = GitPagesPublisher {
            repository: tmp.path().to_path_buf(),
            remote: remote.display().to_string(),
            branch: "gh-pages".into(),
            message: "Publish site".into(),
            identity: Some(("Test".into(), "test@example.com".into())),
        };
        let outcome = publisher.publish(&root).unwrap();
        assert_eq!(outcome.files, 2);

        let listing = git(
            Command::new("git")
                .arg("--git-dir")
                .arg(&remote)
                .args(["ls-tree", "-r", "--name-only", "gh-pages"]),
            "ls-tree",
        )
        .unwrap();
        assert_eq!(
            listing.lines().collect::<Vec<_>>(),
            vec!["index.html", "styles/main-1a2b3c4d.css"]
        );
        assert!(!tmp.path().read_dir().unwrap().any(|e| {
            e.unwrap().file_name().to_string_lossy().starts_with(".sitesmith-publish")
        }));
    }

    #[test]
    fn unknown_remote_name_fails() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let root = site(&tmp);
        git(Command::new("git").arg("-C").arg(tmp.path()).args(["init", "--quiet"]), "init").unwrap();
        let publisher = GitPagesPublisher::new(tmp.path(), &PublishConfig::default());
        assert!(matches!(
            publisher.publish(&root),
            Err(PublishError::Git { command, .. }) if command == "remote get-url"
        ));
    }
}
