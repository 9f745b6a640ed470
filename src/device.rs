use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{info, warn};

use crate::config::{BlockId, DEFAULT_BLOCK_SIZE};
use crate::Error;

pub trait BlockDevice: Read + Write + Seek + Debug {}

impl BlockDevice for std::fs::File {}

/// A host file treated as an array of fixed-size blocks.
///
/// No caching happens here; every call is a seek plus a syscall. Higher
/// layers own the write schedule.
#[derive(Debug)]
pub struct VirtualDisk {
    device: Box<dyn BlockDevice>,
    block_size: u32,
    total_blocks: i64,
}

impl VirtualDisk {
    /// Open the host file at `path`, creating and zero-filling it to
    /// `requested_size` bytes when absent or empty. An existing non-empty
    /// file keeps its actual size.
    pub fn open(path: &Path, requested_size: i64) -> Result<Self, Error> {
        let block_size = DEFAULT_BLOCK_SIZE;
        if requested_size < block_size as i64 {
            return Err(Error::InvalidArgument);
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let existing = file.seek(SeekFrom::End(0))? as i64;
        let size = if existing > 0 {
            if existing != requested_size {
                warn!(
                    "disk file {} is {existing} bytes, ignoring requested size {requested_size}",
                    path.display()
                );
            }
            existing
        } else {
            let zero_block = vec![0u8; block_size as usize];
            let mut remaining = requested_size;
            file.seek(SeekFrom::Start(0))?;
            while remaining > 0 {
                let chunk = remaining.min(block_size as i64) as usize;
                file.write_all(&zero_block[..chunk])?;
                remaining -= chunk as i64;
            }
            file.flush()?;
            info!(
                "created disk file {} with {requested_size} bytes",
                path.display()
            );
            requested_size
        };
        let total_blocks = size / block_size as i64;
        if total_blocks == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            device: Box::new(file),
            block_size,
            total_blocks,
        })
    }

    /// Wrap an already sized device. Used by tests and tooling that bring
    /// their own backing store.
    pub fn from_device(device: Box<dyn BlockDevice>, capacity: i64, block_size: u32) -> Self {
        Self {
            device,
            block_size,
            total_blocks: capacity / block_size as i64,
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn total_blocks(&self) -> i64 {
        self.total_blocks
    }

    /// Copy exactly one block into `buffer`.
    pub fn read_block(&mut self, id: BlockId, buffer: &mut [u8]) -> Result<(), Error> {
        self.check_block(id)?;
        if buffer.len() < self.block_size as usize {
            return Err(Error::InvalidArgument);
        }
        self.device
            .seek(SeekFrom::Start(id as u64 * self.block_size as u64))?;
        self.device
            .read_exact(&mut buffer[..self.block_size as usize])?;
        Ok(())
    }

    /// Write one block. A buffer shorter than a block is allowed and leaves
    /// the tail of the block untouched.
    pub fn write_block(&mut self, id: BlockId, buffer: &[u8]) -> Result<(), Error> {
        self.check_block(id)?;
        let length = buffer.len().min(self.block_size as usize);
        self.device
            .seek(SeekFrom::Start(id as u64 * self.block_size as u64))?;
        self.device.write_all(&buffer[..length])?;
        Ok(())
    }

    fn check_block(&self, id: BlockId) -> Result<(), Error> {
        if id < 0 || id as i64 >= self.total_blocks {
            return Err(Error::OutOfRange);
        }
        Ok(())
    }
}
