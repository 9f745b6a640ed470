//! Logical-to-physical block mapping for one inode: ten direct slots, one
//! single-indirect table, one double-indirect tree.
//!
//! The mapping functions operate on an inode value plus the allocator; the
//! caller owns flushing the inode afterwards.

use log::warn;

use super::Filesystem;
use crate::config::{BlockId, INVALID_BLOCK_ID, NUM_DIRECT_BLOCKS};
use crate::structs::{read_i32, write_i32, Inode, BLOCK_ID_SIZE};
use crate::Error;

fn valid(id: BlockId) -> Option<BlockId> {
    (id != INVALID_BLOCK_ID).then_some(id)
}

impl Filesystem {
    fn check_mapped_range(&self, offset: i64) -> Result<i64, Error> {
        if offset < 0 {
            return Err(Error::InvalidArgument);
        }
        let index = offset / self.superblock.block_size as i64;
        let pointers = self.superblock.pointers_per_block() as i64;
        if index >= NUM_DIRECT_BLOCKS as i64 + pointers + pointers * pointers {
            return Err(Error::OutOfRange);
        }
        Ok(index)
    }

    /// Resolve the block backing `offset` without allocating; a hole
    /// anywhere along the pointer chain reports `None`.
    pub fn lookup_block(&mut self, inode: &Inode, offset: i64) -> Result<Option<BlockId>, Error> {
        let mut index = self.check_mapped_range(offset)?;
        if index < NUM_DIRECT_BLOCKS as i64 {
            return Ok(valid(inode.direct[index as usize]));
        }
        index -= NUM_DIRECT_BLOCKS as i64;
        let pointers = self.superblock.pointers_per_block() as i64;
        if index < pointers {
            let Some(table) = valid(inode.single_indirect) else {
                return Ok(None);
            };
            return Ok(valid(self.read_pointer(table, index as usize)?));
        }
        index -= pointers;
        let Some(l1) = valid(inode.double_indirect) else {
            return Ok(None);
        };
        let Some(l2) = valid(self.read_pointer(l1, (index / pointers) as usize)?) else {
            return Ok(None);
        };
        Ok(valid(self.read_pointer(l2, (index % pointers) as usize)?))
    }

    /// Resolve the block backing `offset`, allocating the data block and
    /// any missing indirect tables on the way. On failure every block
    /// allocated by this call is freed again, newest first, and the inode's
    /// pointers are restored to their state on entry.
    pub fn map_block(&mut self, inode: &mut Inode, offset: i64) -> Result<BlockId, Error> {
        let index = self.check_mapped_range(offset)?;
        let saved = (inode.direct, inode.single_indirect, inode.double_indirect);
        let mut fresh = Vec::new();
        match self.map_or_allocate(inode, index, &mut fresh) {
            Ok(id) => Ok(id),
            Err(e) => {
                for id in fresh.iter().rev() {
                    if let Err(release) = self.free_block(*id) {
                        warn!("could not release block {id} while unwinding: {release}");
                    }
                }
                (inode.direct, inode.single_indirect, inode.double_indirect) = saved;
                Err(e)
            }
        }
    }

    fn map_or_allocate(
        &mut self,
        inode: &mut Inode,
        mut index: i64,
        fresh: &mut Vec<BlockId>,
    ) -> Result<BlockId, Error> {
        if index < NUM_DIRECT_BLOCKS as i64 {
            let slot = index as usize;
            if inode.direct[slot] == INVALID_BLOCK_ID {
                inode.direct[slot] = self.allocate_tracked(fresh)?;
            }
            return Ok(inode.direct[slot]);
        }
        index -= NUM_DIRECT_BLOCKS as i64;
        let pointers = self.superblock.pointers_per_block() as i64;
        if index < pointers {
            let slot = index as usize;
            if let Some(table) = valid(inode.single_indirect) {
                if let Some(existing) = valid(self.read_pointer(table, slot)?) {
                    return Ok(existing);
                }
                let data = self.allocate_tracked(fresh)?;
                self.write_pointer(table, slot, data)?;
                return Ok(data);
            }
            let data = self.allocate_tracked(fresh)?;
            let table = self.allocate_tracked(fresh)?;
            self.write_pointer_table(table, slot, data)?;
            inode.single_indirect = table;
            return Ok(data);
        }
        index -= pointers;
        let l1_slot = (index / pointers) as usize;
        let l2_slot = (index % pointers) as usize;
        let Some(l1) = valid(inode.double_indirect) else {
            let data = self.allocate_tracked(fresh)?;
            let l2 = self.allocate_tracked(fresh)?;
            let l1 = self.allocate_tracked(fresh)?;
            self.write_pointer_table(l2, l2_slot, data)?;
            self.write_pointer_table(l1, l1_slot, l2)?;
            inode.double_indirect = l1;
            return Ok(data);
        };
        let Some(l2) = valid(self.read_pointer(l1, l1_slot)?) else {
            let data = self.allocate_tracked(fresh)?;
            let l2 = self.allocate_tracked(fresh)?;
            self.write_pointer_table(l2, l2_slot, data)?;
            self.write_pointer(l1, l1_slot, l2)?;
            return Ok(data);
        };
        if let Some(existing) = valid(self.read_pointer(l2, l2_slot)?) {
            return Ok(existing);
        }
        let data = self.allocate_tracked(fresh)?;
        self.write_pointer(l2, l2_slot, data)?;
        Ok(data)
    }

    fn allocate_tracked(&mut self, fresh: &mut Vec<BlockId>) -> Result<BlockId, Error> {
        let id = self.allocate_block()?;
        fresh.push(id);
        Ok(id)
    }

    pub(crate) fn read_pointer(&mut self, table: BlockId, slot: usize) -> Result<BlockId, Error> {
        let mut buffer = vec![0u8; self.superblock.block_size as usize];
        self.disk.read_block(table, &mut buffer)?;
        Ok(read_i32(&buffer, slot * BLOCK_ID_SIZE))
    }

    fn write_pointer(&mut self, table: BlockId, slot: usize, value: BlockId) -> Result<(), Error> {
        let mut buffer = vec![0u8; self.superblock.block_size as usize];
        self.disk.read_block(table, &mut buffer)?;
        write_i32(&mut buffer, slot * BLOCK_ID_SIZE, value);
        self.disk.write_block(table, &buffer)
    }

    // A fresh table is fully INVALID-initialised before anything may
    // reference it, so readers never observe stale pointers.
    fn write_pointer_table(
        &mut self,
        table: BlockId,
        slot: usize,
        value: BlockId,
    ) -> Result<(), Error> {
        let pointers = self.superblock.pointers_per_block();
        let mut buffer = vec![0u8; self.superblock.block_size as usize];
        for position in 0..pointers {
            write_i32(&mut buffer, position * BLOCK_ID_SIZE, INVALID_BLOCK_ID);
        }
        write_i32(&mut buffer, slot * BLOCK_ID_SIZE, value);
        self.disk.write_block(table, &buffer)
    }
}
