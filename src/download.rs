//! Resolving model artifacts (config, weights) to local files.
//!
//! HuggingFace Hub files go through hf-hub's own cache; plain HTTP downloads
//! are cached in `~/.cache/detect-gender/`.

use anyhow::Result;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Where a model artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// `hf://owner/repo/path/to/file[@revision]`
    Hub {
        repo_id: String,
        filename: String,
        revision: Option<String>,
    },
    /// `http://...` or `https://...`
    Http(String),
    /// Anything else is a local path.
    Local(PathBuf),
}

impl ModelSource {
    /// Classify a path or URL.
    pub fn parse(path: &str) -> Result<Self> {
        if let Some(stripped) = path.strip_prefix("hf://") {
            let (repo_id, filename, revision) = parse_hf_path(stripped)?;
            return Ok(Self::Hub {
                repo_id,
                filename,
                revision,
            });
        }
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(Self::Http(path.to_string()));
        }
        Ok(Self::Local(PathBuf::from(path)))
    }

    /// Fetch the artifact if needed and return its local path.
    pub fn fetch(self) -> Result<PathBuf> {
        match self {
            Self::Hub {
                repo_id,
                filename,
                revision,
            } => {
                let api = Api::new()?;
                let repo = match revision {
                    Some(rev) => Repo::with_revision(repo_id.clone(), RepoType::Model, rev),
                    None => Repo::model(repo_id.clone()),
                };
                log::info!("Fetching {filename} from {repo_id}");
                let cached = api
                    .repo(repo)
                    .get(&filename)
                    .map_err(|e| anyhow::anyhow!("Failed to fetch {filename} from {repo_id}: {e}"))?;
                Ok(cached)
            }
            Self::Http(url) => download_http(&url),
            Self::Local(local) => {
                if !local.exists() {
                    anyhow::bail!("No such file or directory: {}", local.display());
                }
                Ok(local)
            }
        }
    }
}

/// Create the cache directory if it doesn't exist.
///
/// Returns the path to `~/.cache/detect-gender/`.
pub fn make_cache_directory() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
    let cache_dir = Path::new(&home).join(".cache").join("detect-gender");
    fs::create_dir_all(&cache_dir)?;
    Ok(cache_dir)
}

/// Download a file if it's a remote reference, or return the local path unchanged.
///
/// Supported formats:
/// - `hf://owner/repo/path/to/file.json` - HuggingFace Hub
/// - `hf://owner/repo/path/to/file.json@revision` - HuggingFace with specific revision
/// - `https://example.com/file.safetensors` - Direct HTTP download
/// - `/local/path/file.safetensors` - Local file (returned as-is)
pub fn download_if_necessary(path: &str) -> Result<PathBuf> {
    ModelSource::parse(path)?.fetch()
}

/// Download a file from an HTTP(S) URL to the cache directory.
fn download_http(url: &str) -> Result<PathBuf> {
    let cache_dir = make_cache_directory()?;
    let cache_path = cache_dir.join(url_to_cache_filename(url));
    if cache_path.exists() {
        log::debug!("Using cached {}", cache_path.display());
        return Ok(cache_path);
    }

    log::info!("Downloading {url}");
    let response = ureq::get(url)
        .call()
        .map_err(|e| anyhow::anyhow!("Failed to download {url}: {e}"))?;

    let mut data = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut data)
        .map_err(|e| anyhow::anyhow!("Failed to read response: {e}"))?;

    // Write next to the target, then rename so a partial download never looks cached.
    let temp_path = cache_path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, &cache_path)?;

    log::info!("Downloaded to {}", cache_path.display());
    Ok(cache_path)
}

/// Convert a URL to a safe cache filename.
fn url_to_cache_filename(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);

    stripped
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' => c,
            _ => '_',
        })
        .collect()
}

/// Parse `owner/repo/path@rev` into components for HuggingFace downloads.
fn parse_hf_path(path: &str) -> Result<(String, String, Option<String>)> {
    let mut parts = path.split('/').collect::<Vec<_>>();
    if parts.len() < 3 || parts.iter().any(|part| part.is_empty()) {
        anyhow::bail!("Invalid hf:// path: {path}");
    }
    let repo_id = format!("{}/{}", parts.remove(0), parts.remove(0));
    let filename = parts.join("/");

    if let Some((file, rev)) = filename.split_once('@') {
        if file.is_empty() || rev.is_empty() {
            anyhow::bail!("Invalid hf:// path: {path} (empty file or revision around '@')");
        }
        return Ok((repo_id, file.to_string(), Some(rev.to_string())));
    }

    Ok((repo_id, filename, None))
}
