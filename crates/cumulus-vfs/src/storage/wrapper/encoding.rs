//! Finds nodes stored under a different Unicode normalization form.
//!
//! Paths reach the core in NFC. Backends written by other clients (macOS in
//! particular) may hold the same name in NFD.

use unicode_normalization::{UnicodeNormalization, is_nfc};

use super::StorageLayer;
use crate::error::VfsResult;
use crate::storage::{Capability, Storage};

#[derive(Debug, Default, Clone, Copy)]
pub struct EncodingCompat;

impl EncodingCompat {
    pub fn new() -> Self {
        Self
    }

    fn find(&self, inner: &dyn Storage, path: &str) -> VfsResult<String> {
        if path.is_ascii() {
            return Ok(path.to_string());
        }
        if inner.stat(path)?.is_some() {
            return Ok(path.to_string());
        }

        let alternate: String = if is_nfc(path) {
            path.nfd().collect()
        } else {
            path.nfc().collect()
        };
        if alternate != path && inner.stat(&alternate)?.is_some() {
            tracing::debug!(path, "resolved through alternate normalization form");
            return Ok(alternate);
        }
        Ok(path.to_string())
    }
}

impl StorageLayer for EncodingCompat {
    fn name(&self) -> &'static str {
        "encoding"
    }

    fn capability(&self) -> Capability {
        Capability::Encoding
    }

    fn map_path(&self, inner: &dyn Storage, path: &str) -> VfsResult<String> {
        self.find(inner, path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::MemoryStorage;
    use crate::storage::wrapper::Wrapped;

    const NFC_NAME: &str = "caf\u{e9}.txt";
    const NFD_NAME: &str = "cafe\u{301}.txt";

    #[test]
    fn test_nfd_file_found_by_nfc_name() {
        let inner: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        inner.file_put_contents(NFD_NAME, b"latte").unwrap();
        let wrapped = Wrapped::new(inner.clone(), EncodingCompat::new());

        assert!(wrapped.file_exists(NFC_NAME).unwrap());
        assert_eq!(wrapped.file_get_contents(NFC_NAME).unwrap().unwrap(), b"latte");
        assert!(wrapped.unlink(NFC_NAME).unwrap());
        assert!(!inner.file_exists(NFD_NAME).unwrap());
    }

    #[test]
    fn test_new_files_keep_given_form() {
        let inner: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let wrapped = Wrapped::new(inner.clone(), EncodingCompat::new());
        wrapped.file_put_contents(NFC_NAME, b"x").unwrap();
        assert!(inner.file_exists(NFC_NAME).unwrap());
        assert!(!inner.file_exists(NFD_NAME).unwrap());
    }
}
