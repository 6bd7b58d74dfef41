use crate::cancel::Cancellation;
use crate::config::InputOptions;
use crate::error::{ImportError, ImportResult};
use crate::redact::redact;
use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use indexmap::IndexSet;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[async_trait]
pub trait InputDiscovery: Send + Sync {
    /// Absolute paths, first-seen order, no duplicates.
    async fn discover(&self, cancel: &Cancellation) -> ImportResult<Vec<PathBuf>>;
}

pub struct FsDiscovery {
    options: InputOptions,
    matcher: Option<GlobMatcher>,
}

impl FsDiscovery {
    pub fn new(options: InputOptions) -> ImportResult<Self> {
        let matcher = file_matcher(&options.search_pattern)?;
        Ok(FsDiscovery { options, matcher })
    }

    fn matches(&self, path: &Path) -> bool {
        name_matches(self.matcher.as_ref(), path)
    }

    /// The walk itself is synchronous, so it runs on the blocking pool.
    async fn walk(&self, dir: PathBuf, cancel: &Cancellation) -> ImportResult<Vec<PathBuf>> {
        let matcher = self.matcher.clone();
        let recursive = self.options.recursive;
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || walk_dir(&dir, recursive, matcher.as_ref(), &cancel))
            .await
            .map_err(|e| ImportError::Discovery {
                message: format!("directory walk did not complete: {e}"),
            })?
    }

    async fn capture_stdin(&self) -> ImportResult<Option<PathBuf>> {
        if std::io::stdin().is_terminal() {
            warn!("reading from stdin was requested but stdin is a terminal, skipping");
            return Ok(None);
        }
        let mut content = String::new();
        tokio::io::stdin()
            .read_to_string(&mut content)
            .await
            .map_err(|e| discovery_error("failed to read stdin", e))?;
        if content.trim().is_empty() {
            warn!("stdin was empty, no inputs discovered");
            return Ok(None);
        }
        persist_report(&content).map(Some)
    }
}

#[async_trait]
impl InputDiscovery for FsDiscovery {
    async fn discover(&self, cancel: &Cancellation) -> ImportResult<Vec<PathBuf>> {
        let mut results = IndexSet::new();

        if !self.options.paths.is_empty() {
            for raw in &self.options.paths {
                cancel.check()?;
                if raw.trim().is_empty() {
                    continue;
                }
                let path = absolute(Path::new(raw))?;
                match tokio::fs::metadata(&path).await {
                    Ok(metadata) if metadata.is_file() => {
                        if self.matches(&path) {
                            results.insert(path);
                        } else {
                            debug!(
                                path = %path.display(),
                                pattern = %self.options.search_pattern,
                                "file ignored by search pattern"
                            );
                        }
                    }
                    Ok(metadata) if metadata.is_dir() => {
                        results.extend(self.walk(path, cancel).await?);
                    }
                    _ => warn!(path = %path.display(), "input path not found"),
                }
            }
        } else if self.options.read_from_stdin {
            if let Some(path) = self.capture_stdin().await? {
                info!(path = %path.display(), "captured stdin into temp file");
                results.insert(path);
            }
        }

        info!(
            count = results.len(),
            pattern = %self.options.search_pattern,
            recursive = self.options.recursive,
            "discovered input files"
        );
        let listing = results
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        debug!(files = %redact(&listing), "input files");

        Ok(results.into_iter().collect())
    }
}

fn walk_dir(
    dir: &Path,
    recursive: bool,
    matcher: Option<&GlobMatcher>,
    cancel: &Cancellation,
) -> ImportResult<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = vec![];
    for entry in WalkDir::new(dir).max_depth(max_depth).sort_by_file_name() {
        cancel.check()?;
        let entry = entry.map_err(|e| ImportError::Discovery {
            message: format!("failed to read {}: {e}", dir.display()),
        })?;
        if entry.file_type().is_file() && name_matches(matcher, entry.path()) {
            files.push(absolute(entry.path())?);
        }
    }
    Ok(files)
}

fn name_matches(matcher: Option<&GlobMatcher>, path: &Path) -> bool {
    match (matcher, path.file_name()) {
        (None, _) => true,
        (Some(matcher), Some(name)) => matcher.is_match(name),
        (Some(_), None) => false,
    }
}

/// `None` matches every file name.
fn file_matcher(pattern: &str) -> ImportResult<Option<GlobMatcher>> {
    let pattern = pattern.trim();
    if pattern.is_empty() || pattern == "*" {
        return Ok(None);
    }
    let glob = GlobBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ImportError::config(format!("invalid search pattern '{pattern}': {e}")))?;
    Ok(Some(glob.compile_matcher()))
}

fn absolute(path: &Path) -> ImportResult<PathBuf> {
    std::path::absolute(path)
        .map_err(|e| discovery_error(&format!("failed to resolve {}", path.display()), e))
}

fn persist_report(content: &str) -> ImportResult<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("junit-import-")
        .suffix(".xml")
        .tempfile()
        .map_err(|e| discovery_error("failed to create temp file", e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| discovery_error("failed to write temp file", e))?;
    let (_, path) = file
        .keep()
        .map_err(|e| discovery_error("failed to keep temp file", e.error))?;
    Ok(path)
}

fn discovery_error(context: &str, error: std::io::Error) -> ImportError {
    ImportError::Discovery {
        message: format!("{context}: {error}"),
    }
}
