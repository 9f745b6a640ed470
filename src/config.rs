//! Compile-time filesystem parameters.
//!
//! The formatted values of these land in the superblock; a mounted disk is
//! read back with whatever it was formatted with.

pub type BlockId = i32;
pub type InodeId = i32;

pub const INVALID_BLOCK_ID: BlockId = -1;
pub const INVALID_INODE_ID: InodeId = -1;

pub const MAGIC_NUMBER: u32 = 0xDA05_F50A;

pub const DEFAULT_BLOCK_SIZE: u32 = 1024;
pub const INODE_SIZE: u32 = 128;
pub const DEFAULT_TOTAL_INODES: i32 = 1024;
pub const NUM_DIRECT_BLOCKS: usize = 10;

pub const ROOT_INODE_ID: InodeId = 0;

pub const MAX_FILENAME_LENGTH: usize = 255;
pub const MAX_PATH_LENGTH: usize = 1024;

/// Default capacity when invoked on a path that does not exist yet.
pub const DEFAULT_DISK_SIZE: i64 = 4 * 1024 * 1024;

pub const MAX_OPEN_FILES: usize = 16;

// Permission bits, POSIX octal layout. The group class is carried in the
// mode but there is no group membership table to check it against.
pub const PERM_USER_READ: u16 = 0o400;
pub const PERM_USER_WRITE: u16 = 0o200;
pub const PERM_USER_EXEC: u16 = 0o100;
pub const PERM_OTHER_READ: u16 = 0o004;
pub const PERM_OTHER_WRITE: u16 = 0o002;
pub const PERM_OTHER_EXEC: u16 = 0o001;

pub const DEFAULT_FILE_PERMISSIONS: u16 = 0o644;
pub const DEFAULT_DIR_PERMISSIONS: u16 = 0o755;

pub const ROOT_UID: i16 = 0;
