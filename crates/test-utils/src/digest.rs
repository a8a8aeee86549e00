//! Directory digests for before/after comparisons of store trees.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

/// Root attributes that change on every write.
const VOLATILE_ATTRIBUTES: [&str; 1] = ["generated_at"];

/// CRC32 over every file path and content below `path`.
///
/// A symlinked root is followed.
pub fn directory_digest(path: &Path) -> u32 {
    digest_files(path, |_| None)
}

/// Digest of a Zarr store's logical content.
///
/// Identical to [`directory_digest`] except that volatile root attributes
/// are ignored, so two writes of the same data compare equal.
pub fn store_content_digest(path: &Path) -> u32 {
    digest_files(path, |relative| {
        if relative != Path::new("zarr.json") {
            return None;
        }
        let content = fs::read_to_string(path.join(relative)).ok()?;
        let mut doc: serde_json::Value = serde_json::from_str(&content).ok()?;
        if let Some(attrs) = doc
            .get_mut("attributes")
            .and_then(serde_json::Value::as_object_mut)
        {
            for key in VOLATILE_ATTRIBUTES {
                attrs.remove(key);
            }
        }
        serde_json::to_vec(&doc).ok()
    })
}

fn digest_files(root: &Path, rewrite: impl Fn(&Path) -> Option<Vec<u8>>) -> u32 {
    let mut files: Vec<_> = WalkDir::new(root)
        .follow_root_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_path_buf())
        })
        .collect();
    files.sort();

    let mut hasher = crc32fast::Hasher::new();
    for relative in files {
        hasher.update(relative.to_string_lossy().as_bytes());
        let content = match rewrite(&relative) {
            Some(content) => content,
            None => fs::read(root.join(&relative)).unwrap_or_default(),
        };
        hasher.update(&content);
    }
    hasher.finalize()
}
