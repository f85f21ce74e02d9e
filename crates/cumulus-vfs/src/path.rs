//! Path normalization and file-name validation.
//!
//! Every facade call normalizes its input, so [`PathNormalizer`] keeps a
//! bounded LRU of results. The free functions are the uncached primitives.

use indexmap::IndexMap;
use parking_lot::Mutex;
use unicode_normalization::UnicodeNormalization;

use crate::config::VfsConfig;
use crate::error::{InvalidPathReason, VfsError, VfsResult};

/// Normalize a path.
///
/// Backslashes become slashes, repeated slashes collapse, `/./` segments are
/// dropped, a trailing `/.` is removed, and the result is NFC unless
/// `keep_unicode` is set. `..` segments are left alone: [`is_valid_path`]
/// rejects them rather than silently resolving them.
pub fn normalize_path(path: &str, strip_trailing_slash: bool, keep_unicode: bool) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut out = if keep_unicode {
        format!("/{}", path)
    } else {
        format!("/{}", path.nfc().collect::<String>())
    };

    loop {
        let next = out
            .replace('\\', "/")
            .replace("/./", "/")
            .replace("//", "/");
        if next == out {
            break;
        }
        out = next;
    }

    if out.ends_with("/.") {
        out.truncate(out.len() - 1);
    }

    if strip_trailing_slash && out.len() > 1 {
        let trimmed = out.trim_end_matches('/').len().max(1);
        out.truncate(trimmed);
    }

    out
}

/// True unless the path contains a `..` segment.
pub fn is_valid_path(path: &str) -> bool {
    let path = normalize_path(path, true, true);
    !(path.contains("/../") || path.ends_with("/.."))
}

/// Parent directory of a normalized absolute path (`/` for top-level entries).
pub fn dirname(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last segment of a path (`""` for the root).
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Join two path pieces with exactly one slash between them.
pub fn join(base: &str, rest: &str) -> String {
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{}{}", base, rest)
    } else {
        format!("{}/{}", base, rest)
    }
}

/// Join for storage-internal paths, where the root is `""`.
pub fn join_internal(base: &str, name: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        name.trim_matches('/').to_string()
    } else {
        format!("{}/{}", base, name.trim_matches('/'))
    }
}

/// Every ancestor of `path`, root first: `/a/b/c` gives `["/", "/a", "/a/b"]`.
pub fn parents(path: &str) -> Vec<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    let mut out = vec!["/".to_string()];
    let mut current = String::new();
    for segment in &segments[..segments.len() - 1] {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

/// In-progress upload artifact: `<name>.<ext>` or anything inside `*.<ext>/`.
pub fn is_partial_file(path: &str, extension: &str) -> bool {
    let suffix = format!(".{}", extension);
    basename(path).ends_with(&suffix) || path.contains(&format!("{}/", suffix))
}

// ============================================================================
// Normalization cache
// ============================================================================

/// Bounded LRU in front of [`normalize_path`].
#[derive(Debug)]
pub struct PathNormalizer {
    cache: Mutex<IndexMap<(String, bool, bool), String>>,
    capacity: usize,
}

impl PathNormalizer {
    pub const DEFAULT_CAPACITY: usize = 2048;

    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(IndexMap::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Normalize with trailing-slash stripping and NFC.
    pub fn normalize(&self, path: &str) -> String {
        self.normalize_with(path, true, false)
    }

    pub fn normalize_with(&self, path: &str, strip_trailing_slash: bool, keep_unicode: bool) -> String {
        let key = (path.to_string(), strip_trailing_slash, keep_unicode);
        let mut cache = self.cache.lock();
        if let Some(idx) = cache.get_index_of(&key) {
            let last = cache.len() - 1;
            cache.move_index(idx, last);
            return cache[last].clone();
        }
        let normalized = normalize_path(path, strip_trailing_slash, keep_unicode);
        if cache.len() >= self.capacity {
            cache.shift_remove_index(0);
        }
        cache.insert(key, normalized.clone());
        normalized
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

// ============================================================================
// File-name validation
// ============================================================================

/// Checks single path segments before anything reaches a storage.
#[derive(Debug, Clone)]
pub struct FilenameValidator {
    forbidden_names: Vec<String>,
    forbidden_chars: Vec<char>,
    max_length: usize,
}

impl FilenameValidator {
    pub fn new(config: &VfsConfig) -> Self {
        let mut forbidden_chars = vec!['/', '\\'];
        forbidden_chars.extend(config.forbidden_characters.iter().copied());
        Self {
            forbidden_names: config
                .forbidden_filenames
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
            forbidden_chars,
            max_length: config.max_filename_length,
        }
    }

    /// True when the name is on the forbidden list.
    pub fn is_forbidden(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.forbidden_names.iter().any(|n| *n == lower)
    }

    /// Validate a single file name.
    pub fn validate(&self, name: &str) -> VfsResult<()> {
        let reject = |reason| Err(VfsError::invalid_path(name, reason));

        if name.trim().is_empty() {
            return reject(InvalidPathReason::EmptyName);
        }
        if name == "." || name == ".." {
            return reject(InvalidPathReason::DotName);
        }
        if name.len() > self.max_length {
            return reject(InvalidPathReason::NameTooLong);
        }
        if let Some(c) = name
            .chars()
            .find(|c| (*c as u32) < 0x20 || self.forbidden_chars.contains(c))
        {
            return reject(InvalidPathReason::InvalidCharacter(c));
        }
        if self.is_forbidden(name.trim()) {
            return reject(InvalidPathReason::ReservedWord);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_examples() {
        assert_eq!(normalize_path("/a//b/./c/", true, false), "/a/b/c");
        assert_eq!(normalize_path("", true, false), "/");
        assert_eq!(normalize_path("a\\b", true, false), "/a/b");
        assert_eq!(normalize_path("/a/.", true, false), "/a");
        assert_eq!(normalize_path("/./././", true, false), "/");
        assert_eq!(normalize_path("/a/b/", false, false), "/a/b/");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = [
            "", "/", "//", "a", "/a//b/./c/", "./x/./", "/a/.", "\\\\srv\\share", "/../x",
            "/a/b/..", "/ä/b", "/a\u{0308}/b", "///././/a",
        ];
        for sample in samples {
            let once = normalize_path(sample, true, false);
            assert_eq!(normalize_path(&once, true, false), once, "input {:?}", sample);
        }
    }

    #[test]
    fn test_normalize_nfc() {
        // "a" + combining diaeresis composes to "ä"
        assert_eq!(normalize_path("/a\u{0308}", true, false), "/\u{00e4}");
        assert_eq!(normalize_path("/a\u{0308}", true, true), "/a\u{0308}");
    }

    #[test]
    fn test_is_valid_path() {
        assert!(!is_valid_path("/a/../b"));
        assert!(!is_valid_path("/a/.."));
        assert!(!is_valid_path(".."));
        assert!(is_valid_path("/a/b"));
        assert!(is_valid_path("/a/..b"));
    }

    #[test]
    fn test_dirname_basename() {
        assert_eq!(dirname("/a/b/c"), "/a/b");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(dirname("/"), "/");
        assert_eq!(basename("/a/b/c.txt"), "c.txt");
        assert_eq!(basename("/"), "");
        assert_eq!(basename("file"), "file");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/u/files", "/doc.txt"), "/u/files/doc.txt");
        assert_eq!(join("/", "doc.txt"), "/doc.txt");
        assert_eq!(join("/u", ""), "/u");
        assert_eq!(join_internal("", "a"), "a");
        assert_eq!(join_internal("a/b", "c"), "a/b/c");
    }

    #[test]
    fn test_parents_root_first() {
        assert_eq!(parents("/a/b/c"), vec!["/", "/a", "/a/b"]);
        assert_eq!(parents("/a"), vec!["/"]);
        assert!(parents("/").is_empty());
    }

    #[test]
    fn test_partial_file_detection() {
        assert!(is_partial_file("/u/files/up.bin.part", "part"));
        assert!(is_partial_file("/u/uploads/x.part/chunk1", "part"));
        assert!(!is_partial_file("/u/files/part", "part"));
        assert!(!is_partial_file("/u/files/x.partial", "part"));
    }

    #[test]
    fn test_normalizer_lru_eviction() {
        let normalizer = PathNormalizer::new(2);
        assert_eq!(normalizer.normalize("/a//b"), "/a/b");
        normalizer.normalize("/c//d");
        // touch the first entry so the second is evicted
        normalizer.normalize("/a//b");
        normalizer.normalize("/e");
        assert_eq!(normalizer.len(), 2);
        let cache = normalizer.cache.lock();
        assert!(cache.contains_key(&("/a//b".to_string(), true, false)));
        assert!(!cache.contains_key(&("/c//d".to_string(), true, false)));
    }

    #[test]
    fn test_validator_reasons() {
        let v = FilenameValidator::new(&VfsConfig::default());
        let reason = |name: &str| v.validate(name).unwrap_err().invalid_path_reason().unwrap();
        assert_eq!(reason(""), InvalidPathReason::EmptyName);
        assert_eq!(reason(".."), InvalidPathReason::DotName);
        assert_eq!(reason(".htaccess"), InvalidPathReason::ReservedWord);
        assert_eq!(reason(".HTACCESS"), InvalidPathReason::ReservedWord);
        assert_eq!(reason("a/b"), InvalidPathReason::InvalidCharacter('/'));
        assert_eq!(reason("tab\there"), InvalidPathReason::InvalidCharacter('\t'));
        assert_eq!(reason(&"x".repeat(251)), InvalidPathReason::NameTooLong);
        assert!(v.validate("report.pdf").is_ok());
    }
}
