use super::*;
use crate::config::{
    BlockId, InodeId, INODE_SIZE, INVALID_BLOCK_ID, MAGIC_NUMBER, MAX_FILENAME_LENGTH,
    MAX_PATH_LENGTH, ROOT_INODE_ID,
};
use crate::Error;

impl Superblock {
    /// Derive the disk layout for a fresh filesystem. The free-list head is
    /// left INVALID; the block allocator plants it while formatting.
    pub fn layout(total_blocks: i64, total_inodes: i32, block_size: u32) -> Result<Self, Error> {
        if total_blocks < 1 || total_inodes < 1 || block_size < INODE_SIZE {
            return Err(Error::InvalidArgument);
        }
        let bits_per_block = block_size as i64 * 8;
        let bitmap_blocks = (total_inodes as i64 + bits_per_block - 1) / bits_per_block;
        let table_bytes = total_inodes as i64 * INODE_SIZE as i64;
        let table_blocks = (table_bytes + block_size as i64 - 1) / block_size as i64;
        let first_data_block = 1 + bitmap_blocks + table_blocks;
        if first_data_block >= total_blocks {
            return Err(Error::NoSpace);
        }
        Ok(Self {
            magic: MAGIC_NUMBER,
            block_size,
            inode_size: INODE_SIZE,
            total_blocks,
            free_blocks: total_blocks - first_data_block,
            total_inodes,
            free_inodes: total_inodes - 1,
            inode_bitmap_start: 1,
            inode_bitmap_blocks: bitmap_blocks as i32,
            inode_table_start: (1 + bitmap_blocks) as BlockId,
            first_data_block: first_data_block as BlockId,
            root_inode: ROOT_INODE_ID,
            free_list_head: INVALID_BLOCK_ID,
            max_filename_length: MAX_FILENAME_LENGTH as i32,
            max_path_length: MAX_PATH_LENGTH as i32,
        })
    }

    pub fn decode(buffer: &[u8]) -> Self {
        Self {
            magic: read_u32(buffer, 0),
            block_size: read_u32(buffer, 4),
            inode_size: read_u32(buffer, 8),
            total_blocks: read_i64(buffer, 12),
            free_blocks: read_i64(buffer, 20),
            total_inodes: read_i32(buffer, 28),
            free_inodes: read_i32(buffer, 32),
            inode_bitmap_start: read_i32(buffer, 36),
            inode_bitmap_blocks: read_i32(buffer, 40),
            inode_table_start: read_i32(buffer, 44),
            first_data_block: read_i32(buffer, 48),
            root_inode: read_i32(buffer, 52),
            free_list_head: read_i32(buffer, 56),
            max_filename_length: read_i32(buffer, 60),
            max_path_length: read_i32(buffer, 64),
        }
    }

    /// Serialise into a zeroed block-sized buffer; the tail past the last
    /// field stays zero.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; self.block_size as usize];
        write_u32(&mut buffer, 0, self.magic);
        write_u32(&mut buffer, 4, self.block_size);
        write_u32(&mut buffer, 8, self.inode_size);
        write_i64(&mut buffer, 12, self.total_blocks);
        write_i64(&mut buffer, 20, self.free_blocks);
        write_i32(&mut buffer, 28, self.total_inodes);
        write_i32(&mut buffer, 32, self.free_inodes);
        write_i32(&mut buffer, 36, self.inode_bitmap_start);
        write_i32(&mut buffer, 40, self.inode_bitmap_blocks);
        write_i32(&mut buffer, 44, self.inode_table_start);
        write_i32(&mut buffer, 48, self.first_data_block);
        write_i32(&mut buffer, 52, self.root_inode);
        write_i32(&mut buffer, 56, self.free_list_head);
        write_i32(&mut buffer, 60, self.max_filename_length);
        write_i32(&mut buffer, 64, self.max_path_length);
        buffer
    }

    pub fn inodes_per_block(&self) -> usize {
        (self.block_size / self.inode_size) as usize
    }

    /// Block-id pointers one indirect block can hold.
    pub fn pointers_per_block(&self) -> usize {
        self.block_size as usize / BLOCK_ID_SIZE
    }

    /// Number of blocks in the data region.
    pub fn data_region_blocks(&self) -> i64 {
        self.total_blocks - self.first_data_block as i64
    }

    /// Block and byte offset of an inode inside the inode table.
    pub fn inode_location(&self, id: InodeId) -> Result<(BlockId, usize), Error> {
        if id < 0 || id >= self.total_inodes {
            return Err(Error::OutOfRange);
        }
        let per_block = self.inodes_per_block();
        let block = self.inode_table_start + id / per_block as i32;
        if block >= self.first_data_block {
            return Err(Error::Corrupt("inode table overruns data region"));
        }
        let offset = (id as usize % per_block) * self.inode_size as usize;
        Ok((block, offset))
    }
}
