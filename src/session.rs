//! One mounted filesystem plus the state a shell needs: the logged-in
//! user, the working directory and the two-level open-file tables.

use std::path::Path;

use log::{info, warn};

use crate::config::{
    InodeId, DEFAULT_DIR_PERMISSIONS, DEFAULT_FILE_PERMISSIONS, DEFAULT_TOTAL_INODES,
    MAX_OPEN_FILES, ROOT_UID,
};
use crate::device::VirtualDisk;
use crate::filesystem::Filesystem;
use crate::structs::{DirEntry, Inode};
use crate::users::{check_access, AccessKind, User, UserTable};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`: the file must exist, offset at the start.
    Read,
    /// `w`: truncate or create, offset at the start.
    Write,
    /// `rw`: the file must exist, offset at the start.
    ReadWrite,
    /// `a`: create if missing, every write goes to the end.
    Append,
}

#[derive(Debug)]
struct SystemFileEntry {
    /// Cached copy of the inode, flushed on final close.
    inode: Inode,
    open_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct ProcessFileEntry {
    system_index: usize,
    offset: i64,
    mode: OpenMode,
}

#[derive(Debug)]
pub struct Session {
    fs: Filesystem,
    users: UserTable,
    current_user: Option<User>,
    cwd: InodeId,
    process_table: Vec<Option<ProcessFileEntry>>,
    system_table: Vec<Option<SystemFileEntry>>,
}

impl Session {
    pub fn new(fs: Filesystem) -> Self {
        let cwd = fs.superblock().root_inode;
        Self {
            fs,
            users: UserTable::default(),
            current_user: None,
            cwd,
            process_table: Vec::new(),
            system_table: Vec::new(),
        }
    }

    /// Open the disk file, formatting it when it is brand new.
    pub fn mount(path: &Path, requested_size: i64) -> Result<Self, Error> {
        let fresh = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len() == 0,
            Err(_) => true,
        };
        let disk = VirtualDisk::open(path, requested_size)?;
        let fs = if fresh {
            info!("disk is empty, formatting");
            Filesystem::format(disk, DEFAULT_TOTAL_INODES)?
        } else {
            Filesystem::load(disk)?
        };
        Ok(Self::new(fs))
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), Error> {
        match self.users.authenticate(username, password) {
            Some(user) => {
                info!("user {} logged in", user.name);
                self.current_user = Some(user);
                self.cwd = self.fs.superblock().root_inode;
                Ok(())
            }
            None => Err(Error::PermissionDenied),
        }
    }

    pub fn logout(&mut self) {
        self.current_user = None;
        self.cwd = self.fs.superblock().root_inode;
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    fn require_user(&self) -> Result<&User, Error> {
        self.current_user.as_ref().ok_or(Error::NotLoggedIn)
    }

    /// Reinitialise the disk; root only. Drops every open descriptor.
    pub fn format_disk(&mut self) -> Result<(), Error> {
        if self.require_user()?.uid != ROOT_UID {
            return Err(Error::PermissionDenied);
        }
        self.fs.reformat(DEFAULT_TOTAL_INODES)?;
        self.cwd = self.fs.superblock().root_inode;
        self.process_table.clear();
        self.system_table.clear();
        Ok(())
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), Error> {
        let user = self.require_user()?.clone();
        let resolved = self.fs.resolve_path(path, self.cwd)?;
        if resolved.inode.is_some() {
            return Err(Error::AlreadyExists);
        }
        let parent = self.fs.read_inode(resolved.parent)?;
        if !check_access(&parent, AccessKind::Write, &user) {
            return Err(Error::PermissionDenied);
        }
        self.fs
            .create_directory(resolved.parent, &resolved.name, user.uid, DEFAULT_DIR_PERMISSIONS)?;
        Ok(())
    }

    pub fn chdir(&mut self, path: &str) -> Result<(), Error> {
        let user = self.require_user()?.clone();
        let resolved = self.fs.resolve_path(path, self.cwd)?;
        let target = resolved.inode.ok_or(Error::NotFound)?;
        let inode = self.fs.read_inode(target)?;
        if !inode.is_directory() {
            return Err(Error::NotADirectory);
        }
        if !check_access(&inode, AccessKind::Execute, &user) {
            return Err(Error::PermissionDenied);
        }
        self.cwd = target;
        Ok(())
    }

    /// Entries of a directory together with their inodes, for listings.
    pub fn list_dir(&mut self, path: &str) -> Result<Vec<(DirEntry, Inode)>, Error> {
        let user = self.require_user()?.clone();
        let resolved = self.fs.resolve_path(path, self.cwd)?;
        let target = resolved.inode.ok_or(Error::NotFound)?;
        let mut dir = self.fs.read_inode(target)?;
        if !dir.is_directory() {
            return Err(Error::NotADirectory);
        }
        if !check_access(&dir, AccessKind::Read, &user) {
            return Err(Error::PermissionDenied);
        }
        self.fs
            .list_entries(&mut dir)?
            .into_iter()
            .map(|entry| {
                let inode = self.fs.read_inode(entry.inode_id)?;
                Ok((entry, inode))
            })
            .collect()
    }

    pub fn create(&mut self, path: &str) -> Result<(), Error> {
        let user = self.require_user()?.clone();
        let resolved = self.fs.resolve_path(path, self.cwd)?;
        if resolved.inode.is_some() {
            return Err(Error::AlreadyExists);
        }
        let parent = self.fs.read_inode(resolved.parent)?;
        if !check_access(&parent, AccessKind::Write, &user) {
            return Err(Error::PermissionDenied);
        }
        self.fs
            .create_file(resolved.parent, &resolved.name, user.uid, DEFAULT_FILE_PERMISSIONS)?;
        Ok(())
    }

    /// Remove a file (dropping its last link reclaims it) or an empty
    /// directory.
    pub fn unlink(&mut self, path: &str) -> Result<(), Error> {
        let user = self.require_user()?.clone();
        let resolved = self.fs.resolve_path(path, self.cwd)?;
        let target_id = resolved.inode.ok_or(Error::NotFound)?;
        if target_id == self.fs.superblock().root_inode
            || resolved.name == "."
            || resolved.name == ".."
        {
            return Err(Error::InvalidArgument);
        }
        if self
            .system_table
            .iter()
            .flatten()
            .any(|entry| entry.inode.id == target_id)
        {
            return Err(Error::FileBusy);
        }
        let mut target = self.fs.read_inode(target_id)?;
        let mut parent = self.fs.read_inode(resolved.parent)?;
        if !check_access(&parent, AccessKind::Write, &user) {
            return Err(Error::PermissionDenied);
        }
        if target.is_directory() {
            let occupied = self
                .fs
                .list_entries(&mut target)?
                .iter()
                .any(|entry| entry.name != "." && entry.name != "..");
            if occupied {
                return Err(Error::DirectoryNotEmpty);
            }
            self.fs.remove_entry(&mut parent, &resolved.name)?;
            self.fs.clear_blocks(&mut target)?;
            self.fs.free_inode(target_id)?;
            parent.link_count -= 1;
            self.fs.write_inode(&parent)?;
            if self.cwd == target_id {
                self.cwd = resolved.parent;
            }
        } else {
            self.fs.remove_entry(&mut parent, &resolved.name)?;
            target.link_count -= 1;
            if target.link_count <= 0 {
                self.fs.clear_blocks(&mut target)?;
                self.fs.free_inode(target_id)?;
            } else {
                self.fs.write_inode(&target)?;
            }
        }
        Ok(())
    }

    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<i32, Error> {
        let user = self.require_user()?.clone();
        let resolved = self.fs.resolve_path(path, self.cwd)?;
        let inode_id = match resolved.inode {
            Some(id) => id,
            None => match mode {
                OpenMode::Read | OpenMode::ReadWrite => return Err(Error::NotFound),
                OpenMode::Write | OpenMode::Append => {
                    let parent = self.fs.read_inode(resolved.parent)?;
                    if !check_access(&parent, AccessKind::Write, &user) {
                        return Err(Error::PermissionDenied);
                    }
                    self.fs.create_file(
                        resolved.parent,
                        &resolved.name,
                        user.uid,
                        DEFAULT_FILE_PERMISSIONS,
                    )?
                }
            },
        };
        let mut inode = self.fs.read_inode(inode_id)?;
        if inode.is_directory() {
            return Err(Error::IsADirectory);
        }
        let allowed = match mode {
            OpenMode::Read => check_access(&inode, AccessKind::Read, &user),
            OpenMode::Write | OpenMode::Append => check_access(&inode, AccessKind::Write, &user),
            OpenMode::ReadWrite => {
                check_access(&inode, AccessKind::Read, &user)
                    && check_access(&inode, AccessKind::Write, &user)
            }
        };
        if !allowed {
            return Err(Error::PermissionDenied);
        }
        if mode == OpenMode::Write && inode.size > 0 {
            self.fs.clear_blocks(&mut inode)?;
        }
        let fd = self.claim_fd()?;
        let system_index = match self
            .system_table
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|e| e.inode.id == inode_id))
        {
            Some(index) => {
                if let Some(entry) = self.system_table[index].as_mut() {
                    entry.open_count += 1;
                    entry.inode = inode;
                }
                index
            }
            None => {
                let entry = SystemFileEntry {
                    inode,
                    open_count: 1,
                };
                match self.system_table.iter().position(Option::is_none) {
                    Some(index) => {
                        self.system_table[index] = Some(entry);
                        index
                    }
                    None => {
                        self.system_table.push(Some(entry));
                        self.system_table.len() - 1
                    }
                }
            }
        };
        let offset = if mode == OpenMode::Append {
            self.system_inode(system_index)?.size
        } else {
            0
        };
        self.process_table[fd] = Some(ProcessFileEntry {
            system_index,
            offset,
            mode,
        });
        Ok(fd as i32)
    }

    pub fn close(&mut self, fd: i32) -> Result<(), Error> {
        let (index, entry) = self.process_entry(fd)?;
        self.process_table[index] = None;
        let system = self.system_table[entry.system_index]
            .as_mut()
            .ok_or(Error::BadFileDescriptor)?;
        system.open_count -= 1;
        if system.open_count == 0 {
            let inode = system.inode;
            self.system_table[entry.system_index] = None;
            // Final close flushes the cached inode.
            if let Err(e) = self.fs.write_inode(&inode) {
                warn!("inode {} write-back on close failed: {e}", inode.id);
            }
        }
        Ok(())
    }

    pub fn read(&mut self, fd: i32, length: usize) -> Result<Vec<u8>, Error> {
        self.require_user()?;
        let (index, entry) = self.process_entry(fd)?;
        if !matches!(entry.mode, OpenMode::Read | OpenMode::ReadWrite) {
            return Err(Error::PermissionDenied);
        }
        let mut inode = self.system_inode(entry.system_index)?;
        let mut buffer = vec![0u8; length];
        let read = self.fs.read_file_data(&mut inode, entry.offset, &mut buffer)?;
        buffer.truncate(read);
        self.store_system_inode(entry.system_index, inode);
        if let Some(entry) = self.process_table[index].as_mut() {
            entry.offset += read as i64;
        }
        Ok(buffer)
    }

    pub fn write(&mut self, fd: i32, data: &[u8]) -> Result<usize, Error> {
        self.require_user()?;
        let (index, entry) = self.process_entry(fd)?;
        if !matches!(
            entry.mode,
            OpenMode::Write | OpenMode::ReadWrite | OpenMode::Append
        ) {
            return Err(Error::PermissionDenied);
        }
        let mut inode = self.system_inode(entry.system_index)?;
        let offset = if entry.mode == OpenMode::Append {
            inode.size
        } else {
            entry.offset
        };
        let (written, _) = self.fs.write_file_data(&mut inode, offset, data)?;
        self.store_system_inode(entry.system_index, inode);
        if let Some(entry) = self.process_table[index].as_mut() {
            entry.offset = offset + written as i64;
        }
        Ok(written)
    }

    /// Absolute path of the working directory, rebuilt by walking `..`.
    pub fn pwd(&mut self) -> Result<String, Error> {
        let root = self.fs.superblock().root_inode;
        let mut parts = Vec::new();
        let mut current = self.cwd;
        while current != root {
            let mut inode = self.fs.read_inode(current)?;
            let parent_id = self
                .fs
                .find_entry(&mut inode, "..")?
                .ok_or(Error::Corrupt("directory without a .. entry"))?;
            let mut parent = self.fs.read_inode(parent_id)?;
            let name = self
                .fs
                .list_entries(&mut parent)?
                .into_iter()
                .find(|e| e.inode_id == current && e.name != "." && e.name != "..")
                .map(|e| e.name)
                .ok_or(Error::Corrupt("directory missing from its parent"))?;
            parts.push(name);
            current = parent_id;
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    fn claim_fd(&mut self) -> Result<usize, Error> {
        if let Some(fd) = self.process_table.iter().position(Option::is_none) {
            return Ok(fd);
        }
        if self.process_table.len() >= MAX_OPEN_FILES {
            return Err(Error::TooManyOpenFiles);
        }
        self.process_table.push(None);
        Ok(self.process_table.len() - 1)
    }

    fn process_entry(&self, fd: i32) -> Result<(usize, ProcessFileEntry), Error> {
        let index = usize::try_from(fd).map_err(|_| Error::BadFileDescriptor)?;
        match self.process_table.get(index) {
            Some(Some(entry)) => Ok((index, *entry)),
            _ => Err(Error::BadFileDescriptor),
        }
    }

    fn system_inode(&self, index: usize) -> Result<Inode, Error> {
        self.system_table
            .get(index)
            .and_then(Option::as_ref)
            .map(|entry| entry.inode)
            .ok_or(Error::BadFileDescriptor)
    }

    fn store_system_inode(&mut self, index: usize, inode: Inode) {
        if let Some(Some(entry)) = self.system_table.get_mut(index) {
            entry.inode = inode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OpenMode, Session};
    use crate::device::testing::memory_disk;
    use crate::filesystem::Filesystem;
    use crate::Error;

    fn logged_in_session() -> Session {
        let mut fs = Filesystem::format(memory_disk(1024 * 1024, 1024), 64).unwrap();
        fs.clock = || 1_700_000_000;
        let mut session = Session::new(fs);
        session.login("root", "root").unwrap();
        session
    }

    #[test]
    fn operations_require_a_login() {
        let fs = Filesystem::format(memory_disk(1024 * 1024, 1024), 64).unwrap();
        let mut session = Session::new(fs);
        assert!(matches!(session.mkdir("/d"), Err(Error::NotLoggedIn)));
        assert!(matches!(
            session.login("root", "wrong"),
            Err(Error::PermissionDenied)
        ));
        session.login("user", "user").unwrap();
        session.mkdir("/d").unwrap();
    }

    #[test]
    fn write_close_reopen_read() {
        let mut session = logged_in_session();
        let fd = session.open("/notes", OpenMode::Write).unwrap();
        assert_eq!(session.write(fd, b"first line").unwrap(), 10);
        session.close(fd).unwrap();
        let fd = session.open("/notes", OpenMode::Read).unwrap();
        assert_eq!(session.read(fd, 64).unwrap(), b"first line");
        // The cursor advanced to the end.
        assert!(session.read(fd, 64).unwrap().is_empty());
        session.close(fd).unwrap();
    }

    #[test]
    fn fds_are_mode_checked_and_recycled() {
        let mut session = logged_in_session();
        let fd = session.open("/f", OpenMode::Write).unwrap();
        assert!(matches!(session.read(fd, 4), Err(Error::PermissionDenied)));
        session.close(fd).unwrap();
        assert!(matches!(session.read(fd, 4), Err(Error::BadFileDescriptor)));
        let reopened = session.open("/f", OpenMode::Read).unwrap();
        assert_eq!(reopened, fd);
        assert!(matches!(
            session.write(reopened, b"x"),
            Err(Error::PermissionDenied)
        ));
        session.close(reopened).unwrap();
    }

    #[test]
    fn write_mode_truncates_and_append_mode_extends() {
        let mut session = logged_in_session();
        let fd = session.open("/log", OpenMode::Write).unwrap();
        session.write(fd, b"0123456789").unwrap();
        session.close(fd).unwrap();

        let fd = session.open("/log", OpenMode::Append).unwrap();
        session.write(fd, b"ab").unwrap();
        session.close(fd).unwrap();
        let fd = session.open("/log", OpenMode::Read).unwrap();
        assert_eq!(session.read(fd, 64).unwrap(), b"0123456789ab");
        session.close(fd).unwrap();

        let fd = session.open("/log", OpenMode::Write).unwrap();
        session.write(fd, b"reset").unwrap();
        session.close(fd).unwrap();
        let fd = session.open("/log", OpenMode::Read).unwrap();
        assert_eq!(session.read(fd, 64).unwrap(), b"reset");
        session.close(fd).unwrap();
    }

    #[test]
    fn mkdir_chdir_pwd_round_trip() {
        let mut session = logged_in_session();
        session.mkdir("/projects").unwrap();
        session.mkdir("/projects/daofs").unwrap();
        assert_eq!(session.pwd().unwrap(), "/");
        session.chdir("projects/daofs").unwrap();
        assert_eq!(session.pwd().unwrap(), "/projects/daofs");
        session.chdir("..").unwrap();
        assert_eq!(session.pwd().unwrap(), "/projects");
        session.chdir("/").unwrap();
        assert_eq!(session.pwd().unwrap(), "/");
        assert!(matches!(
            session.chdir("/projects/absent"),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn listing_shows_created_entries() {
        let mut session = logged_in_session();
        session.mkdir("/dir").unwrap();
        session.create("/file").unwrap();
        let names: Vec<String> = session
            .list_dir("/")
            .unwrap()
            .into_iter()
            .map(|(entry, _)| entry.name)
            .collect();
        assert_eq!(names, vec![".", "..", "dir", "file"]);
    }

    #[test]
    fn unlink_reclaims_files_and_empty_directories() {
        let mut session = logged_in_session();
        session.mkdir("/d").unwrap();
        session.create("/d/f").unwrap();
        assert!(matches!(session.unlink("/d"), Err(Error::DirectoryNotEmpty)));
        session.unlink("/d/f").unwrap();
        session.unlink("/d").unwrap();
        assert!(matches!(session.chdir("/d"), Err(Error::NotFound)));
        assert!(matches!(session.unlink("/"), Err(Error::InvalidArgument)));
    }

    #[test]
    fn unlink_refuses_open_files() {
        let mut session = logged_in_session();
        let fd = session.open("/busy", OpenMode::Write).unwrap();
        assert!(matches!(session.unlink("/busy"), Err(Error::FileBusy)));
        session.close(fd).unwrap();
        session.unlink("/busy").unwrap();
    }

    #[test]
    fn permissions_guard_other_users() {
        let mut session = logged_in_session();
        // Root's home is 0o755: other users may enter but not write.
        session.mkdir("/secret").unwrap();
        session.create("/secret/data").unwrap();
        session.logout();
        session.login("user", "user").unwrap();
        session.chdir("/secret").unwrap();
        assert!(matches!(
            session.create("/secret/more"),
            Err(Error::PermissionDenied)
        ));
        // 0o644 file: readable, not writable.
        let fd = session.open("/secret/data", OpenMode::Read).unwrap();
        session.close(fd).unwrap();
        assert!(matches!(
            session.open("/secret/data", OpenMode::Write),
            Err(Error::PermissionDenied)
        ));
        assert!(matches!(
            session.format_disk(),
            Err(Error::PermissionDenied)
        ));
    }
}
