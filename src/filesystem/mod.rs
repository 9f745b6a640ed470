use log::warn;

use crate::config::{BlockId, InodeId, MAGIC_NUMBER};
use crate::device::VirtualDisk;
use crate::structs::{Inode, Superblock};
use crate::Error;

mod block_map;
mod data_io;
mod directory;
mod free_list;

pub use directory::ResolvedPath;

/// Timestamp source in seconds. Tests freeze time by assigning a constant
/// function to [`Filesystem::clock`].
pub type Clock = fn() -> i64;

pub fn wall_clock() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

/// The mounted filesystem: the block device, the canonical in-memory
/// superblock, and the allocators over both.
///
/// Every mutation of the superblock's counts or free-list head is written
/// through to block 0 before the operation reports success.
#[derive(Debug)]
pub struct Filesystem {
    pub(crate) disk: VirtualDisk,
    pub(crate) superblock: Superblock,
    pub(crate) clock: Clock,
}

impl Filesystem {
    /// Build a fresh filesystem on the disk: bitmap with the root inode
    /// marked, zeroed inode table, grouped free list over the data region,
    /// root directory with its `.` and `..` entries.
    pub fn format(disk: VirtualDisk, total_inodes: i32) -> Result<Self, Error> {
        let superblock =
            Superblock::layout(disk.total_blocks(), total_inodes, disk.block_size())?;
        let mut fs = Self {
            disk,
            superblock,
            clock: wall_clock,
        };
        fs.initialize()?;
        Ok(fs)
    }

    /// Reinitialise the disk in place, discarding all content.
    pub fn reformat(&mut self, total_inodes: i32) -> Result<(), Error> {
        self.superblock =
            Superblock::layout(self.disk.total_blocks(), total_inodes, self.disk.block_size())?;
        self.initialize()
    }

    fn initialize(&mut self) -> Result<(), Error> {
        let zero = vec![0u8; self.superblock.block_size as usize];
        for offset in 0..self.superblock.inode_bitmap_blocks {
            self.disk
                .write_block(self.superblock.inode_bitmap_start + offset, &zero)?;
        }
        self.set_bitmap_bit(self.superblock.root_inode, true)?;
        for block in self.superblock.inode_table_start..self.superblock.first_data_block {
            self.disk.write_block(block, &zero)?;
        }
        self.initialize_free_list()?;
        self.save_superblock()?;
        self.create_root_directory()?;
        Ok(())
    }

    /// Mount an already formatted disk.
    pub fn load(mut disk: VirtualDisk) -> Result<Self, Error> {
        let mut buffer = vec![0u8; disk.block_size() as usize];
        disk.read_block(0, &mut buffer)?;
        let superblock = Superblock::decode(&buffer);
        if superblock.magic != MAGIC_NUMBER {
            return Err(Error::BadMagic(superblock.magic));
        }
        if superblock.block_size != disk.block_size() {
            warn!(
                "superblock block size {} differs from device block size {}",
                superblock.block_size,
                disk.block_size()
            );
        }
        Ok(Self {
            disk,
            superblock,
            clock: wall_clock,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub(crate) fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Rewrite block 0 from the in-memory image.
    pub(crate) fn save_superblock(&mut self) -> Result<(), Error> {
        let encoded = self.superblock.encode();
        self.disk.write_block(0, &encoded)
    }

    /// Write-through for allocator mutations already applied in memory; a
    /// failure is surfaced as a warning, not an error.
    fn save_superblock_or_warn(&mut self) {
        if let Err(e) = self.save_superblock() {
            warn!("superblock write-through failed: {e}");
        }
    }

    /// Claim the first free inode id.
    pub fn allocate_inode(&mut self) -> Result<InodeId, Error> {
        if self.superblock.free_inodes <= 0 {
            return Err(Error::NoSpace);
        }
        for id in 0..self.superblock.total_inodes {
            if !self.bitmap_bit(id)? {
                self.set_bitmap_bit(id, true)?;
                self.superblock.free_inodes -= 1;
                self.save_superblock_or_warn();
                return Ok(id);
            }
        }
        Err(Error::Corrupt("inode bitmap disagrees with free count"))
    }

    /// Release an inode id. The caller must have reclaimed its data blocks
    /// first.
    pub fn free_inode(&mut self, id: InodeId) -> Result<(), Error> {
        if !self.bitmap_bit(id)? {
            warn!("releasing inode {id} that is not allocated");
            return Ok(());
        }
        self.set_bitmap_bit(id, false)?;
        self.superblock.free_inodes += 1;
        if self.superblock.free_inodes > self.superblock.total_inodes {
            warn!("free inode count exceeded total, clamping");
            self.superblock.free_inodes = self.superblock.total_inodes;
        }
        self.save_superblock_or_warn();
        Ok(())
    }

    pub fn inode_allocated(&mut self, id: InodeId) -> Result<bool, Error> {
        self.bitmap_bit(id)
    }

    fn bitmap_location(&self, id: InodeId) -> Result<(BlockId, usize, u8), Error> {
        if id < 0 || id >= self.superblock.total_inodes {
            return Err(Error::OutOfRange);
        }
        let bits_per_block = self.superblock.block_size as i32 * 8;
        let block = self.superblock.inode_bitmap_start + id / bits_per_block;
        let byte = (id % bits_per_block) as usize / 8;
        let bit = (id % 8) as u8;
        Ok((block, byte, bit))
    }

    fn bitmap_bit(&mut self, id: InodeId) -> Result<bool, Error> {
        let (block, byte, bit) = self.bitmap_location(id)?;
        let mut buffer = vec![0u8; self.superblock.block_size as usize];
        self.disk.read_block(block, &mut buffer)?;
        Ok(buffer[byte] >> bit & 1 == 1)
    }

    // Each flip round-trips its bitmap block through the device; there is
    // no bit-level write-back coalescing.
    fn set_bitmap_bit(&mut self, id: InodeId, value: bool) -> Result<(), Error> {
        let (block, byte, bit) = self.bitmap_location(id)?;
        let mut buffer = vec![0u8; self.superblock.block_size as usize];
        self.disk.read_block(block, &mut buffer)?;
        if value {
            buffer[byte] |= 1 << bit;
        } else {
            buffer[byte] &= !(1 << bit);
        }
        self.disk.write_block(block, &buffer)
    }

    /// Read an inode out of the inode table.
    pub fn read_inode(&mut self, id: InodeId) -> Result<Inode, Error> {
        let (block, offset) = self.superblock.inode_location(id)?;
        let mut buffer = vec![0u8; self.superblock.block_size as usize];
        self.disk.read_block(block, &mut buffer)?;
        Inode::decode(&buffer[offset..offset + self.superblock.inode_size as usize])
    }

    /// Write an inode into the inode table, read-modify-write at block
    /// granularity.
    pub fn write_inode(&mut self, inode: &Inode) -> Result<(), Error> {
        let (block, offset) = self.superblock.inode_location(inode.id)?;
        let mut buffer = vec![0u8; self.superblock.block_size as usize];
        self.disk.read_block(block, &mut buffer)?;
        buffer[offset..offset + self.superblock.inode_size as usize]
            .copy_from_slice(&inode.encode());
        self.disk.write_block(block, &buffer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::Filesystem;
    use crate::config::{DEFAULT_TOTAL_INODES, ROOT_INODE_ID};
    use crate::device::testing::memory_disk;
    use crate::structs::FileType;
    use crate::Error;

    pub(crate) fn frozen_clock() -> i64 {
        1_700_000_000
    }

    pub(crate) fn small_fs() -> Filesystem {
        let mut fs = Filesystem::format(memory_disk(1024 * 1024, 1024), 64).unwrap();
        fs.clock = frozen_clock;
        fs
    }

    #[test]
    fn format_and_reload() {
        let fs = Filesystem::format(memory_disk(1024 * 1024, 1024), DEFAULT_TOTAL_INODES).unwrap();
        let disk = fs.disk;
        let mut fs = Filesystem::load(disk).unwrap();
        assert_eq!(fs.superblock.free_inodes, 1023);
        assert_eq!(fs.superblock.total_blocks, 1024);
        let root = fs.read_inode(ROOT_INODE_ID).unwrap();
        assert_eq!(root.file_type, FileType::Directory);
        assert!(root.link_count >= 2);
        assert!(fs.inode_allocated(ROOT_INODE_ID).unwrap());
    }

    #[test]
    fn load_rejects_unformatted_disk() {
        let disk = memory_disk(1024 * 1024, 1024);
        assert!(matches!(Filesystem::load(disk), Err(Error::BadMagic(0))));
    }

    #[test]
    fn format_twice_yields_identical_superblock_bytes() {
        let fs = Filesystem::format(memory_disk(1024 * 1024, 1024), 256).unwrap();
        let mut disk = fs.disk;
        let mut first = vec![0u8; 1024];
        disk.read_block(0, &mut first).unwrap();
        let fs = Filesystem::load(disk).and_then(|mut fs| {
            fs.reformat(256)?;
            Ok(fs)
        })
        .unwrap();
        let mut disk = fs.disk;
        let mut second = vec![0u8; 1024];
        disk.read_block(0, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn allocate_and_free_inodes() {
        let mut fs = small_fs();
        // Inode 0 belongs to the root directory.
        assert_eq!(fs.allocate_inode().unwrap(), 1);
        assert_eq!(fs.allocate_inode().unwrap(), 2);
        assert_eq!(fs.allocate_inode().unwrap(), 3);
        let free_before = fs.superblock.free_inodes;
        fs.free_inode(2).unwrap();
        assert_eq!(fs.superblock.free_inodes, free_before + 1);
        assert!(!fs.inode_allocated(2).unwrap());
        // Double release is tolerated and does not inflate the count.
        fs.free_inode(2).unwrap();
        assert_eq!(fs.superblock.free_inodes, free_before + 1);
        assert_eq!(fs.allocate_inode().unwrap(), 2);
        assert_eq!(fs.allocate_inode().unwrap(), 4);
    }

    #[test]
    fn inode_exhaustion_reports_no_space() {
        let mut fs = small_fs();
        for _ in 0..fs.superblock.free_inodes {
            fs.allocate_inode().unwrap();
        }
        assert!(matches!(fs.allocate_inode(), Err(Error::NoSpace)));
    }

    #[test]
    fn bitmap_disagreement_reports_corruption() {
        let mut fs = small_fs();
        for id in 1..fs.superblock.total_inodes {
            fs.set_bitmap_bit(id, true).unwrap();
        }
        fs.superblock.free_inodes = 5;
        assert!(matches!(fs.allocate_inode(), Err(Error::Corrupt(_))));
    }

    #[test]
    fn inode_table_round_trip() {
        let mut fs = small_fs();
        let id = fs.allocate_inode().unwrap();
        let mut inode = crate::structs::Inode::new_regular(id, 1, 0o644, fs.now());
        inode.size = 4242;
        inode.direct[3] = 555;
        fs.write_inode(&inode).unwrap();
        assert_eq!(fs.read_inode(id).unwrap(), inode);
    }
}
