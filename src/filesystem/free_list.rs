//! Grouped free-list allocator over the data region.
//!
//! Free block ids are kept in a chain of group blocks. Slot 0 of every
//! group holds the link to the next group (INVALID at the chain end);
//! payload ids occupy slots `1..count`. A group emptied down to its link is
//! itself handed out as the allocated block, so every block in the data
//! region is accounted for exactly once.

use log::warn;

use super::Filesystem;
use crate::config::{BlockId, INVALID_BLOCK_ID};
use crate::structs::FreeGroup;
use crate::Error;

impl Filesystem {
    /// Chain the whole data region into group blocks, highest ids first.
    /// The first group built terminates the chain; the last one built
    /// becomes the list head.
    pub(crate) fn initialize_free_list(&mut self) -> Result<(), Error> {
        let block_size = self.superblock.block_size;
        let capacity = FreeGroup::capacity(block_size);
        let first_data = self.superblock.first_data_block as i64;
        let mut next_id = self.superblock.total_blocks - 1;
        let mut previous_top = INVALID_BLOCK_ID;
        while next_id >= first_data {
            let group_block = next_id as BlockId;
            next_id -= 1;
            let mut group = FreeGroup::header(previous_top, block_size);
            while (group.count as usize) < capacity && next_id >= first_data {
                group.ids[group.count as usize] = next_id as BlockId;
                group.count += 1;
                next_id -= 1;
            }
            self.disk.write_block(group_block, &group.encode(block_size))?;
            previous_top = group_block;
        }
        self.superblock.free_list_head = previous_top;
        self.superblock.free_blocks = self.superblock.data_region_blocks();
        Ok(())
    }

    /// Pop one block off the free list.
    pub fn allocate_block(&mut self) -> Result<BlockId, Error> {
        let head = self.superblock.free_list_head;
        if self.superblock.free_blocks <= 0 || head == INVALID_BLOCK_ID {
            return Err(Error::NoSpace);
        }
        let block_size = self.superblock.block_size;
        let mut buffer = vec![0u8; block_size as usize];
        self.disk.read_block(head, &mut buffer)?;
        let mut group = FreeGroup::decode(&buffer, block_size);
        if group.count < 1 || group.count as usize > group.ids.len() {
            return Err(Error::Corrupt("free group count out of range"));
        }
        let allocated = if group.count == 1 {
            // Only the link is left: the group block itself is the
            // allocation and the chain moves on.
            self.superblock.free_list_head = group.next_group();
            head
        } else {
            group.count -= 1;
            let id = group.ids[group.count as usize];
            self.disk.write_block(head, &group.encode(block_size))?;
            id
        };
        self.superblock.free_blocks -= 1;
        if let Err(e) = self.save_superblock() {
            warn!("superblock write-through after allocating block {allocated} failed: {e}");
        }
        Ok(allocated)
    }

    /// Push a block back onto the free list.
    pub fn free_block(&mut self, id: BlockId) -> Result<(), Error> {
        if id < self.superblock.first_data_block || id as i64 >= self.superblock.total_blocks {
            warn!("ignoring release of block {id} outside the data region");
            return Ok(());
        }
        let block_size = self.superblock.block_size;
        let head = self.superblock.free_list_head;
        if head != INVALID_BLOCK_ID {
            let mut buffer = vec![0u8; block_size as usize];
            self.disk.read_block(head, &mut buffer)?;
            let mut group = FreeGroup::decode(&buffer, block_size);
            if !group.is_full() {
                group.ids[group.count as usize] = id;
                group.count += 1;
                self.disk.write_block(head, &group.encode(block_size))?;
                self.superblock.free_blocks += 1;
                if let Err(e) = self.save_superblock() {
                    warn!("superblock write-through after freeing block {id} failed: {e}");
                }
                return Ok(());
            }
        }
        // No head or a full one: the freed block becomes the new head
        // group, linking back to the old top.
        let group = FreeGroup::header(head, block_size);
        self.disk.write_block(id, &group.encode(block_size))?;
        self.superblock.free_list_head = id;
        self.superblock.free_blocks += 1;
        if let Err(e) = self.save_superblock() {
            warn!("superblock write-through after freeing block {id} failed: {e}");
        }
        Ok(())
    }
}
