//! BLAKE3 hashing for desired state and deployment content.
//!
//! Every digest is rendered as `"blake3:{hex}"`.

use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

fn render(hasher: &blake3::Hasher) -> String {
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Stream a reader through BLAKE3.
fn hash_reader(mut reader: impl Read, label: &Path) -> Result<String, String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", label.display(), e))?;
        if n == 0 {
            return Ok(render(&hasher));
        }
        hasher.update(&buf[..n]);
    }
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    hash_reader(file, path)
}

pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Site files under `dir`, as (`/`-separated relative path, file hash).
/// Hidden entries (`.git`, `.DS_Store`, ...) and symlinks are not content.
fn collect_site_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, String)>,
) -> Result<(), String> {
    let listing =
        std::fs::read_dir(dir).map_err(|e| format!("cannot read dir {}: {}", dir.display(), e))?;
    for entry in listing {
        let entry = entry.map_err(|e| format!("cannot read dir {}: {}", dir.display(), e))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|e| format!("stat error {}: {}", entry.path().display(), e))?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_site_files(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| format!("path prefix error: {}", e))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((rel, hash_file(&path)?));
        }
    }
    Ok(())
}

/// Hash a directory tree: relative paths and file contents, in sorted path
/// order, so the digest is independent of listing order and platform.
pub fn hash_directory(path: &Path) -> Result<String, String> {
    let mut files = Vec::new();
    collect_site_files(path, path, &mut files)?;
    files.sort();

    let mut hasher = blake3::Hasher::new();
    for (rel, hash) in &files {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(render(&hasher))
}

/// Hash a deployment source: a single file or a whole directory tree.
pub fn hash_path(path: &Path) -> Result<String, String> {
    if path.is_dir() {
        hash_directory(path)
    } else {
        hash_file(path)
    }
}

/// Short hex prefix of a BLAKE3 digest, for synthetic identifiers.
pub fn short_digest(seed: &str, len: usize) -> String {
    let hex = blake3::hash(seed.as_bytes()).to_hex();
    hex[..len.min(hex.len())].to_string()
}

/// Order-sensitive hash over several components.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    render(&hasher)
}
