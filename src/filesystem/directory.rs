//! Directory records and path resolution on top of the data path.
//!
//! A directory is an ordinary file holding fixed-size records. Removed
//! entries leave tombstoned slots behind that the next insert reuses;
//! the record area never shrinks.

use log::{debug, warn};

use super::Filesystem;
use crate::config::{InodeId, MAX_PATH_LENGTH, ROOT_UID};
use crate::config::{DEFAULT_DIR_PERMISSIONS, ROOT_INODE_ID};
use crate::structs::{DirEntry, Inode, DIR_ENTRY_SIZE};
use crate::Error;

/// Outcome of walking a path: the target when it exists, plus the directory
/// that does (or would) contain it and the final name.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub inode: Option<InodeId>,
    pub parent: InodeId,
    pub name: String,
}

impl Filesystem {
    /// Written once during format; the root is its own parent.
    pub(crate) fn create_root_directory(&mut self) -> Result<(), Error> {
        let now = self.now();
        let mut root = Inode::new_directory(ROOT_INODE_ID, ROOT_UID, DEFAULT_DIR_PERMISSIONS, now);
        self.write_inode(&root)?;
        self.add_entry(&mut root, ".", ROOT_INODE_ID)?;
        self.add_entry(&mut root, "..", ROOT_INODE_ID)?;
        Ok(())
    }

    fn load_entries(&mut self, dir: &mut Inode) -> Result<Vec<DirEntry>, Error> {
        if !dir.is_directory() {
            return Err(Error::NotADirectory);
        }
        let mut raw = vec![0u8; dir.size as usize];
        let read = self.read_file_data(dir, 0, &mut raw)?;
        if read != raw.len() {
            return Err(Error::Corrupt("short directory read"));
        }
        raw.chunks_exact(DIR_ENTRY_SIZE).map(DirEntry::decode).collect()
    }

    /// All live records, tombstones filtered out.
    pub fn list_entries(&mut self, dir: &mut Inode) -> Result<Vec<DirEntry>, Error> {
        Ok(self
            .load_entries(dir)?
            .into_iter()
            .filter(|entry| !entry.is_free())
            .collect())
    }

    pub fn find_entry(&mut self, dir: &mut Inode, name: &str) -> Result<Option<InodeId>, Error> {
        Ok(self
            .load_entries(dir)?
            .iter()
            .find(|entry| !entry.is_free() && entry.name == name)
            .map(|entry| entry.inode_id))
    }

    /// Insert a record, preferring the first tombstoned slot.
    pub fn add_entry(&mut self, dir: &mut Inode, name: &str, child: InodeId) -> Result<(), Error> {
        let entry = DirEntry::new(name, child)?;
        let entries = self.load_entries(dir)?;
        if entries.iter().any(|e| !e.is_free() && e.name == name) {
            return Err(Error::AlreadyExists);
        }
        let slot = entries
            .iter()
            .position(DirEntry::is_free)
            .unwrap_or(entries.len());
        debug!("directory {}: {name} -> inode {child} in slot {slot}", dir.id);
        self.write_slot(dir, slot, &entry)
    }

    /// Tombstone a record and hand back the inode it pointed at.
    pub fn remove_entry(&mut self, dir: &mut Inode, name: &str) -> Result<InodeId, Error> {
        if name == "." || name == ".." {
            return Err(Error::InvalidArgument);
        }
        let entries = self.load_entries(dir)?;
        let Some(slot) = entries
            .iter()
            .position(|e| !e.is_free() && e.name == name)
        else {
            return Err(Error::NotFound);
        };
        let child = entries[slot].inode_id;
        debug!("directory {}: remove {name} from slot {slot}", dir.id);
        self.write_slot(dir, slot, &DirEntry::tombstone())?;
        Ok(child)
    }

    fn write_slot(&mut self, dir: &mut Inode, slot: usize, entry: &DirEntry) -> Result<(), Error> {
        let offset = slot as i64 * DIR_ENTRY_SIZE as i64;
        let (written, _) = self.write_file_data(dir, offset, &entry.encode())?;
        if written != DIR_ENTRY_SIZE {
            return Err(Error::NoSpace);
        }
        Ok(())
    }

    /// Allocate and link a regular-file inode under `parent`.
    pub fn create_file(
        &mut self,
        parent: InodeId,
        name: &str,
        owner: i16,
        permissions: u16,
    ) -> Result<InodeId, Error> {
        let mut dir = self.read_inode(parent)?;
        let id = self.allocate_inode()?;
        let inode = Inode::new_regular(id, owner, permissions, self.now());
        let linked = self
            .write_inode(&inode)
            .and_then(|_| self.add_entry(&mut dir, name, id));
        if let Err(e) = linked {
            if let Err(release) = self.free_inode(id) {
                warn!("could not release inode {id} while unwinding: {release}");
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Allocate a directory inode under `parent`, wire up `.` and `..` and
    /// bump the parent's link count.
    pub fn create_directory(
        &mut self,
        parent: InodeId,
        name: &str,
        owner: i16,
        permissions: u16,
    ) -> Result<InodeId, Error> {
        let mut parent_inode = self.read_inode(parent)?;
        if !parent_inode.is_directory() {
            return Err(Error::NotADirectory);
        }
        let id = self.allocate_inode()?;
        let mut inode = Inode::new_directory(id, owner, permissions, self.now());
        let linked = self
            .write_inode(&inode)
            .and_then(|_| self.add_entry(&mut inode, ".", id))
            .and_then(|_| self.add_entry(&mut inode, "..", parent))
            .and_then(|_| self.add_entry(&mut parent_inode, name, id));
        if let Err(e) = linked {
            // Unwind the half-built directory before reporting.
            if let Err(release) = self
                .clear_blocks(&mut inode)
                .and_then(|_| self.free_inode(id))
            {
                warn!("could not release inode {id} while unwinding: {release}");
            }
            return Err(e);
        }
        parent_inode.link_count += 1;
        let now = self.now();
        parent_inode.mtime = now;
        parent_inode.atime = now;
        self.write_inode(&parent_inode)?;
        Ok(id)
    }

    /// Walk a `/`-separated path from `cwd` (or the root when absolute).
    /// A miss on the final segment is not an error; the caller decides
    /// whether to create there.
    pub fn resolve_path(&mut self, path: &str, cwd: InodeId) -> Result<ResolvedPath, Error> {
        if path.is_empty() || path.len() > MAX_PATH_LENGTH {
            return Err(Error::InvalidArgument);
        }
        let mut current = if path.starts_with('/') {
            self.superblock.root_inode
        } else {
            cwd
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Ok(ResolvedPath {
                inode: Some(current),
                parent: current,
                name: String::from("/"),
            });
        }
        let last = segments[segments.len() - 1].to_owned();
        let mut parent = current;
        for (position, segment) in segments.iter().enumerate() {
            let mut dir = self.read_inode(current)?;
            match self.find_entry(&mut dir, segment)? {
                Some(next) => {
                    parent = current;
                    current = next;
                }
                None if position == segments.len() - 1 => {
                    return Ok(ResolvedPath {
                        inode: None,
                        parent: current,
                        name: (*segment).to_owned(),
                    });
                }
                None => return Err(Error::NotFound),
            }
        }
        Ok(ResolvedPath {
            inode: Some(current),
            parent,
            name: last,
        })
    }
}
