use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

/// A file discovered under a directory upload, with its object key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub key: String,
    pub size: u64,
}

/// Detect Content-Type based on file extension
///
/// Falls back to "application/octet-stream" for unknown types.
pub fn detect_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        // Web assets
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("json") | Some("map") => "application/json",
        Some("wasm") => "application/wasm",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("md") => "text/markdown",

        // Images and fonts
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",

        // Build artifacts
        Some("jar") | Some("war") | Some("ear") => "application/java-archive",
        Some("pom") => "application/xml",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") | Some("tgz") => "application/gzip",
        Some("pdf") => "application/pdf",

        _ => "application/octet-stream",
    }
}

/// Base64 MD5 digest of a file, as sent in the Content-MD5 header
pub async fn content_md5(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(STANDARD.encode(hasher.finalize()))
}

/// Join a key prefix and a relative object name
pub fn build_object_key(prefix: Option<&str>, relative_path: &str) -> String {
    match prefix.map(|p| p.trim_end_matches('/')) {
        Some(p) if !p.is_empty() => format!("{}/{}", p, relative_path),
        _ => relative_path.to_string(),
    }
}

/// Collect the files a directory upload will write
///
/// Without `recursive` only the directory's immediate files are returned.
/// Keys use `/` separators regardless of platform. An entry that cannot be
/// read (permissions, dangling symlink, symlink loop) fails the whole
/// collection rather than being left out of the upload.
pub fn collect_directory_files(
    dir: &Path,
    prefix: Option<&str>,
    recursive: bool,
) -> Result<Vec<DirectoryEntry>> {
    let mut walker = WalkDir::new(dir).min_depth(1).follow_links(true).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry
            .with_context(|| format!("Cannot read an entry under {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .context("Failed to strip prefix")?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let size = entry
            .metadata()
            .with_context(|| format!("Failed to read metadata of {}", entry.path().display()))?
            .len();

        entries.push(DirectoryEntry {
            path: entry.path().to_path_buf(),
            key: build_object_key(prefix, &relative),
            size,
        });
    }

    Ok(entries)
}
