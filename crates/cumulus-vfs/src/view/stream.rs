//! Streamed access through the facade.
//!
//! A [`ViewFile`] keeps its path locked for as long as it is open:
//! exclusive for write modes, shared for reads. Closing it (or dropping it)
//! finishes the write: cache update, downgrade, post-hooks, unlock.

use std::io::{self, Read, Write};
use std::sync::Arc;

use cumulus_types::LockType;
use tracing::{debug, warn};

use super::View;
use crate::error::VfsResult;
use crate::hooks::FileSignal;
use crate::lock::PathLockGuard;
use crate::storage::{FileStream, OpenMode, Storage, check_name};

/// An open file handed out by [`View::fopen`].
pub struct ViewFile<'a> {
    view: &'a View,
    stream: Option<Box<dyn FileStream>>,
    storage: Arc<dyn Storage>,
    internal: String,
    path: String,
    hooks: Vec<FileSignal>,
    writes: bool,
    guard: Option<PathLockGuard>,
}

impl std::fmt::Debug for ViewFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewFile")
            .field("path", &self.path)
            .field("writes", &self.writes)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl View {
    /// Open `path` with a C-style mode string (`r`, `r+`, `w`, `a+`, `x`,
    /// `c`, ...). `Ok(None)` when vetoed or refused by the storage.
    #[tracing::instrument(skip(self), name = "view.fopen")]
    pub fn fopen(&self, path: &str, mode: &str) -> VfsResult<Option<ViewFile<'_>>> {
        let mode: OpenMode = mode.parse()?;
        let absolute = self.checked(path)?;
        let relative = self.relative_or_err(&absolute)?;

        let hooks: Vec<FileSignal> = match mode {
            OpenMode::Read => vec![FileSignal::Read],
            OpenMode::Write { .. } | OpenMode::CreateNew { .. } => Self::file_hooks(self.file_exists(path)?).to_vec(),
            OpenMode::ReadWrite | OpenMode::Append { .. } | OpenMode::Create { .. } => {
                vec![FileSignal::Write, FileSignal::Update]
            }
        };
        let writes = mode.is_write();

        let mut guard = self.lock_guard(&absolute, LockType::Shared, false)?;
        let (storage, internal) = self.resolve_absolute(&absolute)?;
        if hooks.contains(&FileSignal::Create) {
            check_name(storage.as_ref(), &internal, &self.state.validator)?;
        }
        if !self.run_pre_hooks(&hooks, &relative) {
            debug!(path, "fopen vetoed");
            return Ok(None);
        }
        if writes {
            guard.change(LockType::Exclusive)?;
        }

        let Some(stream) = storage.fopen(&internal, mode)? else {
            if mode == OpenMode::Read && storage.cache().in_cache(&internal) {
                // cached but gone from the backend
                self.remove_update(storage.as_ref(), &internal)?;
            }
            return Ok(None);
        };

        Ok(Some(ViewFile {
            view: self,
            stream: Some(stream),
            storage,
            internal,
            path: relative,
            hooks,
            writes,
            guard: Some(guard),
        }))
    }
}

impl ViewFile<'_> {
    /// View-relative path of the open file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Finish the stream: flush, update the cache, run post-hooks, unlock.
    pub fn close(mut self) -> VfsResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> VfsResult<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if self.writes {
            stream.flush()?;
        }
        drop(stream);

        if self.writes {
            self.view.write_update(self.storage.as_ref(), &self.internal, None)?;
            if let Some(guard) = self.guard.as_mut() {
                guard.change(LockType::Shared)?;
            }
        }
        self.view.run_post_hooks(&self.hooks, &self.path);
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
        Ok(())
    }

    fn stream(&mut self) -> io::Result<&mut Box<dyn FileStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stream already closed"))
    }
}

impl Read for ViewFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }
}

impl Write for ViewFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}

impl Drop for ViewFile<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(path = %self.path, error = %e, "closing stream failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VfsConfig;
    use crate::context::FileSystemContext;
    use crate::lock::MemoryLockingProvider;
    use crate::setup::MemoryUserManager;

    fn view() -> (FileSystemContext, Arc<View>, Arc<MemoryLockingProvider>) {
        let locking = Arc::new(MemoryLockingProvider::new());
        let ctx = FileSystemContext::builder(VfsConfig::default())
            .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
            .with_locking(locking.clone())
            .build();
        let view = ctx.init("alice", "/alice/files").unwrap();
        (ctx, view, locking)
    }

    #[test]
    fn test_write_stream_holds_exclusive_lock() {
        let (_ctx, view, locking) = view();
        let mut file = view.fopen("/w.txt", "w").unwrap().unwrap();
        file.write_all(b"abc").unwrap();
        assert!(view.lock_file("/w.txt", LockType::Shared, false).is_err());
        file.close().unwrap();

        assert_eq!(locking.held_locks(), 0);
        assert_eq!(view.file_get_contents("/w.txt").unwrap().unwrap(), b"abc");
        assert_eq!(view.filesize("/w.txt").unwrap(), Some(3));
    }

    #[test]
    fn test_read_stream_allows_other_readers() {
        let (_ctx, view, locking) = view();
        view.file_put_contents("/r.txt", b"xyz").unwrap();
        let mut file = view.fopen("/r.txt", "r").unwrap().unwrap();
        assert!(view.lock_file("/r.txt", LockType::Shared, false).unwrap());
        view.unlock_file("/r.txt", LockType::Shared, false).unwrap();

        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "xyz");
        drop(file);
        assert_eq!(locking.held_locks(), 0);
    }

    #[test]
    fn test_missing_file_opens_as_none() {
        let (_ctx, view, _locking) = view();
        assert!(view.fopen("/nope.txt", "r").unwrap().is_none());
    }

    #[test]
    fn test_bad_mode_is_an_error() {
        let (_ctx, view, _locking) = view();
        assert!(view.fopen("/x.txt", "q").is_err());
    }
}
