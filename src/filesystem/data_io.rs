//! Byte-granular file I/O on top of the block map: partial-block reads and
//! writes, sparse growth on write, and full reclamation of an inode's
//! blocks. This layer owns the inode write-back.

use log::warn;

use super::Filesystem;
use crate::config::{BlockId, INVALID_BLOCK_ID, NUM_DIRECT_BLOCKS};
use crate::structs::{read_i32, Inode, BLOCK_ID_SIZE};
use crate::Error;

impl Filesystem {
    /// Read up to `buffer.len()` bytes at `offset`, clipped to the file
    /// size. Stops short at a sparse hole. Returns the bytes transferred.
    pub fn read_file_data(
        &mut self,
        inode: &mut Inode,
        offset: i64,
        buffer: &mut [u8],
    ) -> Result<usize, Error> {
        if offset < 0 {
            return Err(Error::InvalidArgument);
        }
        if buffer.is_empty() || offset >= inode.size {
            return Ok(0);
        }
        let block_size = self.superblock.block_size as usize;
        let limit = buffer.len().min((inode.size - offset) as usize);
        let mut block_buffer = vec![0u8; block_size];
        let mut transferred = 0usize;
        let mut position = offset;
        while transferred < limit {
            let Some(block) = self.lookup_block(inode, position)? else {
                break;
            };
            if let Err(e) = self.disk.read_block(block, &mut block_buffer) {
                if transferred == 0 {
                    return Err(e);
                }
                warn!("read of block {block} failed after {transferred} bytes: {e}");
                break;
            }
            let in_block = (position % block_size as i64) as usize;
            let chunk = (block_size - in_block).min(limit - transferred);
            buffer[transferred..transferred + chunk]
                .copy_from_slice(&block_buffer[in_block..in_block + chunk]);
            transferred += chunk;
            position += chunk as i64;
        }
        if transferred > 0 {
            inode.atime = self.now();
            if let Err(e) = self.write_inode(inode) {
                warn!("inode {} write-through after read failed: {e}", inode.id);
            }
        }
        Ok(transferred)
    }

    /// Write `data` at `offset`, allocating blocks as needed. Returns the
    /// bytes transferred and whether the file grew. A device failure after
    /// the first chunk keeps the bytes already written.
    pub fn write_file_data(
        &mut self,
        inode: &mut Inode,
        offset: i64,
        data: &[u8],
    ) -> Result<(usize, bool), Error> {
        if offset < 0 {
            return Err(Error::InvalidArgument);
        }
        if data.is_empty() {
            return Ok((0, false));
        }
        let block_size = self.superblock.block_size as usize;
        let saved = (inode.direct, inode.single_indirect, inode.double_indirect);
        let mut block_buffer = vec![0u8; block_size];
        let mut transferred = 0usize;
        let mut position = offset;
        let mut size_changed = false;
        while transferred < data.len() {
            let block = match self.map_block(inode, position) {
                Ok(block) => block,
                Err(e) if transferred == 0 => return Err(e),
                Err(e) => {
                    warn!("no block for offset {position} after {transferred} bytes: {e}");
                    break;
                }
            };
            let in_block = (position % block_size as i64) as usize;
            let chunk = (block_size - in_block).min(data.len() - transferred);
            let slice = &data[transferred..transferred + chunk];
            let written = if in_block == 0 && chunk == block_size {
                self.disk.write_block(block, slice)
            } else {
                // Read-modify-write to keep the rest of the block intact.
                self.disk.read_block(block, &mut block_buffer).and_then(|_| {
                    block_buffer[in_block..in_block + chunk].copy_from_slice(slice);
                    self.disk.write_block(block, &block_buffer)
                })
            };
            if let Err(e) = written {
                warn!("write to block {block} failed after {transferred} bytes: {e}");
                break;
            }
            transferred += chunk;
            position += chunk as i64;
            if position > inode.size {
                inode.size = position;
                size_changed = true;
            }
        }
        let pointers_changed =
            saved != (inode.direct, inode.single_indirect, inode.double_indirect);
        if transferred > 0 || size_changed || pointers_changed {
            let now = self.now();
            inode.mtime = now;
            inode.atime = now;
            if let Err(e) = self.write_inode(inode) {
                warn!("inode {} write-through after write failed: {e}", inode.id);
            }
        }
        Ok((transferred, size_changed))
    }

    /// Free every block reachable from the inode and reset it to an empty
    /// file. An unreadable indirect block loses its children but the
    /// top-level pointer is still cleared.
    pub fn clear_blocks(&mut self, inode: &mut Inode) -> Result<(), Error> {
        for slot in 0..NUM_DIRECT_BLOCKS {
            if inode.direct[slot] != INVALID_BLOCK_ID {
                self.release_or_warn(inode.direct[slot]);
                inode.direct[slot] = INVALID_BLOCK_ID;
            }
        }
        if inode.single_indirect != INVALID_BLOCK_ID {
            self.release_tree(inode.single_indirect, 1);
            inode.single_indirect = INVALID_BLOCK_ID;
        }
        if inode.double_indirect != INVALID_BLOCK_ID {
            self.release_tree(inode.double_indirect, 2);
            inode.double_indirect = INVALID_BLOCK_ID;
        }
        inode.size = 0;
        let now = self.now();
        inode.mtime = now;
        inode.atime = now;
        self.write_inode(inode)
    }

    // Free a pointer table and everything below it, children first.
    fn release_tree(&mut self, table: BlockId, depth: u32) {
        let mut buffer = vec![0u8; self.superblock.block_size as usize];
        match self.disk.read_block(table, &mut buffer) {
            Ok(()) => {
                for slot in 0..self.superblock.pointers_per_block() {
                    let child = read_i32(&buffer, slot * BLOCK_ID_SIZE);
                    if child == INVALID_BLOCK_ID {
                        continue;
                    }
                    if depth > 1 {
                        self.release_tree(child, depth - 1);
                    } else {
                        self.release_or_warn(child);
                    }
                }
            }
            Err(e) => {
                warn!("indirect block {table} unreadable, its children leak: {e}");
            }
        }
        self.release_or_warn(table);
    }

    fn release_or_warn(&mut self, id: BlockId) {
        if let Err(e) = self.free_block(id) {
            warn!("could not return block {id} to the free list: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{frozen_clock, small_fs};
    use super::super::Filesystem;
    use crate::config::{INVALID_BLOCK_ID, NUM_DIRECT_BLOCKS};
    use crate::device::testing::{memory_disk, SabotagedDevice};
    use crate::device::VirtualDisk;
    use crate::structs::Inode;
    use crate::Error;

    fn fresh_inode(fs: &mut Filesystem) -> Inode {
        let id = fs.allocate_inode().unwrap();
        let inode = Inode::new_regular(id, 0, 0o644, fs.now());
        fs.write_inode(&inode).unwrap();
        inode
    }

    #[test]
    fn small_write_then_read_round_trips() {
        let mut fs = small_fs();
        let mut inode = fresh_inode(&mut fs);
        let (written, size_changed) = fs.write_file_data(&mut inode, 0, b"hello").unwrap();
        assert_eq!(written, 5);
        assert!(size_changed);
        assert_eq!(inode.size, 5);
        assert_eq!(inode.mtime, frozen_clock());
        let mut buffer = [0u8; 5];
        assert_eq!(fs.read_file_data(&mut inode, 0, &mut buffer).unwrap(), 5);
        assert_eq!(&buffer, b"hello");
        // The flushed inode matches the in-memory copy.
        assert_eq!(fs.read_inode(inode.id).unwrap(), inode);
    }

    #[test]
    fn empty_and_out_of_file_reads_return_zero() {
        let mut fs = small_fs();
        let mut inode = fresh_inode(&mut fs);
        let mut buffer = [0u8; 8];
        assert_eq!(fs.read_file_data(&mut inode, 0, &mut buffer).unwrap(), 0);
        fs.write_file_data(&mut inode, 0, b"abc").unwrap();
        assert_eq!(fs.read_file_data(&mut inode, 3, &mut buffer).unwrap(), 0);
        assert_eq!(fs.read_file_data(&mut inode, 0, &mut []).unwrap(), 0);
        assert!(matches!(
            fs.read_file_data(&mut inode, -1, &mut buffer),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            fs.write_file_data(&mut inode, -1, b"x"),
            Err(Error::InvalidArgument)
        ));
        assert_eq!(fs.write_file_data(&mut inode, 0, b"").unwrap(), (0, false));
    }

    #[test]
    fn cross_block_write_lands_in_two_blocks() {
        let mut fs = small_fs();
        let mut inode = fresh_inode(&mut fs);
        let payload: Vec<u8> = (0u8..100).collect();
        let (written, _) = fs.write_file_data(&mut inode, 1000, &payload).unwrap();
        assert_eq!(written, 100);
        assert_eq!(inode.size, 1100);
        assert_ne!(inode.direct[0], INVALID_BLOCK_ID);
        assert_ne!(inode.direct[1], INVALID_BLOCK_ID);
        let mut readback = vec![0u8; 100];
        assert_eq!(
            fs.read_file_data(&mut inode, 1000, &mut readback).unwrap(),
            100
        );
        assert_eq!(readback, payload);
    }

    #[test]
    fn partial_overwrite_preserves_the_rest_of_the_block() {
        let mut fs = small_fs();
        let mut inode = fresh_inode(&mut fs);
        fs.write_file_data(&mut inode, 0, &[0xAA; 1024]).unwrap();
        fs.write_file_data(&mut inode, 100, b"patch").unwrap();
        let mut readback = vec![0u8; 1024];
        fs.read_file_data(&mut inode, 0, &mut readback).unwrap();
        assert_eq!(&readback[..100], &[0xAA; 100][..]);
        assert_eq!(&readback[100..105], b"patch");
        assert_eq!(&readback[105..], &[0xAA; 919][..]);
        assert_eq!(inode.size, 1024);
    }

    #[test]
    fn sparse_write_allocates_only_the_touched_chain() {
        let mut fs = small_fs();
        let mut inode = fresh_inode(&mut fs);
        let free_before = fs.superblock.free_blocks;
        let offset = NUM_DIRECT_BLOCKS as i64 * 1024 + 5;
        let (written, size_changed) = fs.write_file_data(&mut inode, offset, b"x").unwrap();
        assert_eq!(written, 1);
        assert!(size_changed);
        assert_eq!(inode.size, offset + 1);
        // One data block plus one single-indirect table; the hole below
        // stays unmapped.
        assert_eq!(fs.superblock.free_blocks, free_before - 2);
        assert!(inode.direct.iter().all(|&b| b == INVALID_BLOCK_ID));
        let mut buffer = vec![0u8; offset as usize];
        assert_eq!(fs.read_file_data(&mut inode, 0, &mut buffer).unwrap(), 0);
        let mut tail = [0u8; 1];
        assert_eq!(fs.read_file_data(&mut inode, offset, &mut tail).unwrap(), 1);
        assert_eq!(&tail, b"x");
    }

    #[test]
    fn large_file_clear_recovers_every_block() {
        // 1 MiB touches the direct, single-indirect and double-indirect
        // ranges with a 1024-byte block.
        let mut fs = Filesystem::format(memory_disk(2048 * 1024, 1024), 64).unwrap();
        let mut inode = fresh_inode(&mut fs);
        let free_before = fs.superblock.free_blocks;
        let payload: Vec<u8> = (0..1024 * 1024u32).map(|v| v as u8).collect();
        let (written, _) = fs.write_file_data(&mut inode, 0, &payload).unwrap();
        assert_eq!(written, payload.len());
        let mut readback = vec![0u8; payload.len()];
        assert_eq!(
            fs.read_file_data(&mut inode, 0, &mut readback).unwrap(),
            payload.len()
        );
        assert_eq!(readback, payload);
        assert!(fs.superblock.free_blocks < free_before - 1024);
        fs.clear_blocks(&mut inode).unwrap();
        assert_eq!(fs.superblock.free_blocks, free_before);
        assert_eq!(inode.size, 0);
        assert!(inode.direct.iter().all(|&b| b == INVALID_BLOCK_ID));
        assert_eq!(inode.single_indirect, INVALID_BLOCK_ID);
        assert_eq!(inode.double_indirect, INVALID_BLOCK_ID);
        assert_eq!(fs.read_inode(inode.id).unwrap().size, 0);
    }

    #[test]
    fn full_disk_surfaces_no_space() {
        let mut fs = small_fs();
        let mut inode = fresh_inode(&mut fs);
        while fs.allocate_block().is_ok() {}
        assert!(matches!(
            fs.write_file_data(&mut inode, 0, b"full"),
            Err(Error::NoSpace)
        ));
        assert_eq!(inode.size, 0);
        assert!(inode.direct.iter().all(|&b| b == INVALID_BLOCK_ID));
    }

    // Learn the allocator's upcoming ids from a pristine twin disk.
    fn predict_allocations(count: usize) -> Vec<i32> {
        let mut fs = Filesystem::format(memory_disk(1024 * 1024, 1024), 64).unwrap();
        (0..count).map(|_| fs.allocate_block().unwrap()).collect()
    }

    #[test]
    fn device_failure_mid_write_keeps_earlier_bytes() {
        // Chunk 0 lands in the first allocated block, chunk 1 in the
        // second; fail the second one's data write.
        let second_data_block = predict_allocations(2)[1];
        let device = SabotagedDevice::new(1024 * 1024, 1024, second_data_block);
        let disk = VirtualDisk::from_device(Box::new(device), 1024 * 1024, 1024);
        let mut fs = Filesystem::format(disk, 64).unwrap();
        fs.clock = frozen_clock;
        let mut inode = fresh_inode(&mut fs);
        let payload = vec![0x5A; 3 * 1024];
        let (written, size_changed) = fs.write_file_data(&mut inode, 0, &payload).unwrap();
        assert_eq!(written, 1024);
        assert!(size_changed);
        assert_eq!(inode.size, 1024);
        let mut readback = vec![0u8; 1024];
        assert_eq!(
            fs.read_file_data(&mut inode, 0, &mut readback).unwrap(),
            1024
        );
        assert_eq!(readback, vec![0x5A; 1024]);
    }
}
