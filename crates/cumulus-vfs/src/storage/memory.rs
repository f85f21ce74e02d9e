//! In-memory storage.
//!
//! Used for tests and scratch space. All data is ephemeral.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use cumulus_types::{FileType, Permissions};
use parking_lot::RwLock;

use super::{Capability, FileStat, FileStream, FreeSpace, OpenMode, Storage};
use crate::cache::{MemoryCache, MetadataCache, Watcher, next_storage_numeric_id, unix_now};
use crate::error::VfsResult;

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mtime: i64 },
    Dir { mtime: i64 },
}

impl Node {
    fn stat(&self) -> FileStat {
        match self {
            Node::File { data, mtime } => FileStat {
                file_type: FileType::File,
                size: data.len() as i64,
                mtime: *mtime,
            },
            Node::Dir { mtime } => FileStat {
                file_type: FileType::Dir,
                size: 0,
                mtime: *mtime,
            },
        }
    }
}

type NodeMap = Arc<RwLock<HashMap<String, Node>>>;

fn clean(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parent_of(path: &str) -> &str {
    path.rfind('/').map(|idx| &path[..idx]).unwrap_or("")
}

fn is_under(path: &str, root: &str) -> bool {
    root.is_empty() && !path.is_empty() || path.starts_with(&format!("{}/", root))
}

/// Open file handle. Writes land in the node map on flush and on drop.
struct MemoryFile {
    cursor: Cursor<Vec<u8>>,
    sink: Option<(NodeMap, String)>,
    append: bool,
    dirty: bool,
}

impl MemoryFile {
    fn commit(&mut self) {
        if !self.dirty {
            return;
        }
        if let Some((nodes, path)) = &self.sink {
            nodes.write().insert(
                path.clone(),
                Node::File {
                    data: self.cursor.get_ref().clone(),
                    mtime: unix_now(),
                },
            );
        }
        self.dirty = false;
    }
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.sink.is_none() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "opened read-only"));
        }
        if self.append {
            self.cursor.seek(SeekFrom::End(0))?;
        }
        self.dirty = true;
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit();
        Ok(())
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        self.commit();
    }
}

/// In-memory storage backend.
pub struct MemoryStorage {
    id: String,
    nodes: NodeMap,
    cache: Arc<MemoryCache>,
    watcher: Watcher,
    owner: Option<String>,
    permissions: Permissions,
    free_space: FreeSpace,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("id", &self.id)
            .field("nodes", &self.nodes.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create an empty storage with a generated id.
    pub fn new() -> Self {
        Self::with_id(format!("memory::{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let mut nodes = HashMap::new();
        // Root directory always exists
        nodes.insert(String::new(), Node::Dir { mtime: unix_now() });
        Self {
            id: id.into(),
            nodes: Arc::new(RwLock::new(nodes)),
            cache: Arc::new(MemoryCache::new(next_storage_numeric_id())),
            watcher: Watcher::default(),
            owner: None,
            permissions: Permissions::ALL,
            free_space: FreeSpace::Unknown,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Cap the permissions every node reports.
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_free_space(mut self, free: FreeSpace) -> Self {
        self.free_space = free;
        self
    }

    pub fn with_watcher(mut self, watcher: Watcher) -> Self {
        self.watcher = watcher;
        self
    }

    /// Change a node's mtime behind the cache's back (simulates an
    /// out-of-band edit).
    pub fn set_mtime(&self, path: &str, mtime: i64) {
        if let Some(node) = self.nodes.write().get_mut(&clean(path)) {
            match node {
                Node::File { mtime: m, .. } | Node::Dir { mtime: m } => *m = mtime,
            }
        }
    }

    fn parent_is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.read().get(parent_of(path)), Some(Node::Dir { .. }))
    }
}

impl Storage for MemoryStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn cache(&self) -> Arc<dyn MetadataCache> {
        self.cache.clone()
    }

    fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    fn instance_of(&self, capability: Capability) -> bool {
        capability == Capability::Locking
    }

    fn stat(&self, path: &str) -> VfsResult<Option<FileStat>> {
        Ok(self.nodes.read().get(&clean(path)).map(Node::stat))
    }

    fn read_dir(&self, path: &str) -> VfsResult<Option<Vec<String>>> {
        let path = clean(path);
        let nodes = self.nodes.read();
        if !matches!(nodes.get(&path), Some(Node::Dir { .. })) {
            return Ok(None);
        }
        let mut names: Vec<String> = nodes
            .keys()
            .filter(|p| is_under(p, &path) && parent_of(p) == path)
            .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
            .collect();
        names.sort();
        Ok(Some(names))
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> VfsResult<Option<Box<dyn FileStream>>> {
        let path = clean(path);
        let existing = self.nodes.read().get(&path).cloned();

        let data = match (mode, existing) {
            (_, Some(Node::Dir { .. })) => return Ok(None),
            (OpenMode::Read | OpenMode::ReadWrite, Some(Node::File { data, .. })) => data,
            (OpenMode::Read | OpenMode::ReadWrite, None) => return Ok(None),
            (OpenMode::CreateNew { .. }, Some(_)) => return Ok(None),
            (OpenMode::Write { .. }, _) => Vec::new(),
            (_, Some(Node::File { data, .. })) => data,
            (_, None) => Vec::new(),
        };

        if mode.is_write() {
            if path.is_empty() || !self.parent_is_dir(&path) {
                return Ok(None);
            }
            // the node is visible as soon as it's opened for writing
            self.nodes.write().insert(
                path.clone(),
                Node::File {
                    data: data.clone(),
                    mtime: unix_now(),
                },
            );
        }

        Ok(Some(Box::new(MemoryFile {
            cursor: Cursor::new(data),
            sink: mode.is_write().then(|| (Arc::clone(&self.nodes), path)),
            append: matches!(mode, OpenMode::Append { .. }),
            dirty: false,
        })))
    }

    fn mkdir(&self, path: &str) -> VfsResult<bool> {
        let path = clean(path);
        if path.is_empty() || !self.parent_is_dir(&path) {
            return Ok(false);
        }
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return Ok(false);
        }
        nodes.insert(path, Node::Dir { mtime: unix_now() });
        Ok(true)
    }

    fn rmdir(&self, path: &str) -> VfsResult<bool> {
        let path = clean(path);
        let mut nodes = self.nodes.write();
        if path.is_empty() || !matches!(nodes.get(&path), Some(Node::Dir { .. })) {
            return Ok(false);
        }
        nodes.retain(|p, _| *p != path && !is_under(p, &path));
        Ok(true)
    }

    fn unlink(&self, path: &str) -> VfsResult<bool> {
        let path = clean(path);
        let is_dir = match self.nodes.read().get(&path) {
            None => return Ok(false),
            Some(node) => matches!(node, Node::Dir { .. }),
        };
        if is_dir {
            return self.rmdir(&path);
        }
        Ok(self.nodes.write().remove(&path).is_some())
    }

    fn rename(&self, source: &str, target: &str) -> VfsResult<bool> {
        let (source, target) = (clean(source), clean(target));
        if source == target {
            return Ok(true);
        }
        if source.is_empty() || target.is_empty() || is_under(&target, &source) || !self.parent_is_dir(&target) {
            return Ok(false);
        }
        let mut nodes = self.nodes.write();
        let Some(node) = nodes.get(&source).cloned() else {
            return Ok(false);
        };
        if matches!(node, Node::File { .. }) && matches!(nodes.get(&target), Some(Node::Dir { .. })) {
            return Ok(false);
        }
        nodes.retain(|p, _| *p != target && !is_under(p, &target));

        let moving: Vec<String> = nodes
            .keys()
            .filter(|p| **p == source || is_under(p, &source))
            .cloned()
            .collect();
        for old in moving {
            if let Some(node) = nodes.remove(&old) {
                let new_path = format!("{}{}", target, &old[source.len()..]);
                nodes.insert(new_path, node);
            }
        }
        Ok(true)
    }

    fn copy(&self, source: &str, target: &str) -> VfsResult<bool> {
        let (source, target) = (clean(source), clean(target));
        if target.is_empty() || is_under(&target, &source) || !self.parent_is_dir(&target) {
            return Ok(false);
        }
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&source) {
            return Ok(false);
        }
        let copies: Vec<(String, Node)> = nodes
            .iter()
            .filter(|(p, _)| **p == source || is_under(p, &source))
            .map(|(p, n)| (format!("{}{}", target, &p[source.len()..]), n.clone()))
            .collect();
        nodes.retain(|p, _| *p != target && !is_under(p, &target));
        nodes.extend(copies);
        Ok(true)
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> VfsResult<bool> {
        let path = clean(path);
        let mtime = mtime.unwrap_or_else(unix_now);
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&path) {
            Some(Node::File { mtime: m, .. }) | Some(Node::Dir { mtime: m }) => {
                *m = mtime;
                Ok(true)
            }
            None => {
                if path.is_empty() || !matches!(nodes.get(parent_of(&path)), Some(Node::Dir { .. })) {
                    return Ok(false);
                }
                nodes.insert(path, Node::File { data: Vec::new(), mtime });
                Ok(true)
            }
        }
    }

    fn permissions(&self, path: &str) -> VfsResult<Permissions> {
        Ok(match self.stat(path)? {
            Some(stat) if stat.is_dir() => self.permissions,
            Some(_) => self.permissions.for_file(),
            None => Permissions::empty(),
        })
    }

    fn free_space(&self, _path: &str) -> VfsResult<FreeSpace> {
        Ok(self.free_space)
    }

    fn get_owner(&self, _path: &str) -> VfsResult<Option<String>> {
        Ok(self.owner.clone())
    }
}
