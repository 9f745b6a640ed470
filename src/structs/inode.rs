use super::*;
use crate::config::{InodeId, INODE_SIZE, INVALID_BLOCK_ID, NUM_DIRECT_BLOCKS};
use crate::Error;

impl Inode {
    pub fn new_regular(id: InodeId, owner: i16, permissions: u16, now: i64) -> Self {
        Self {
            id,
            file_type: FileType::Regular,
            permissions,
            owner,
            link_count: 1,
            size: 0,
            ctime: now,
            mtime: now,
            atime: now,
            direct: [INVALID_BLOCK_ID; NUM_DIRECT_BLOCKS],
            single_indirect: INVALID_BLOCK_ID,
            double_indirect: INVALID_BLOCK_ID,
        }
    }

    /// A directory starts at link count 2: its entry in the parent plus its
    /// own `.` entry.
    pub fn new_directory(id: InodeId, owner: i16, permissions: u16, now: i64) -> Self {
        Self {
            link_count: 2,
            file_type: FileType::Directory,
            ..Self::new_regular(id, owner, permissions, now)
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn decode(buffer: &[u8]) -> Result<Self, Error> {
        let mut direct = [INVALID_BLOCK_ID; NUM_DIRECT_BLOCKS];
        for (slot, id) in direct.iter_mut().enumerate() {
            *id = read_i32(buffer, 44 + slot * BLOCK_ID_SIZE);
        }
        Ok(Self {
            id: read_i32(buffer, 0),
            file_type: FileType::try_from(read_i16(buffer, 4))?,
            permissions: read_u16(buffer, 6),
            owner: read_i16(buffer, 8),
            link_count: read_i16(buffer, 10),
            size: read_i64(buffer, 12),
            ctime: read_i64(buffer, 20),
            mtime: read_i64(buffer, 28),
            atime: read_i64(buffer, 36),
            direct,
            single_indirect: read_i32(buffer, 84),
            double_indirect: read_i32(buffer, 88),
        })
    }

    /// Serialise to the fixed on-disk record; bytes past the last field are
    /// reserved and stay zero.
    pub fn encode(&self) -> [u8; INODE_SIZE as usize] {
        let mut buffer = [0u8; INODE_SIZE as usize];
        write_i32(&mut buffer, 0, self.id);
        write_i16(&mut buffer, 4, self.file_type as i16);
        write_u16(&mut buffer, 6, self.permissions);
        write_i16(&mut buffer, 8, self.owner);
        write_i16(&mut buffer, 10, self.link_count);
        write_i64(&mut buffer, 12, self.size);
        write_i64(&mut buffer, 20, self.ctime);
        write_i64(&mut buffer, 28, self.mtime);
        write_i64(&mut buffer, 36, self.atime);
        for (slot, id) in self.direct.iter().enumerate() {
            write_i32(&mut buffer, 44 + slot * BLOCK_ID_SIZE, *id);
        }
        write_i32(&mut buffer, 84, self.single_indirect);
        write_i32(&mut buffer, 88, self.double_indirect);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::{FileType, Inode};
    use crate::config::{INODE_SIZE, INVALID_BLOCK_ID};

    #[test]
    fn encode_decode_round_trip() {
        let mut inode = Inode::new_regular(42, 1, 0o644, 1_700_000_000);
        inode.size = 123_456;
        inode.direct[0] = 130;
        inode.direct[9] = 999;
        inode.single_indirect = 200;
        let encoded = inode.encode();
        assert_eq!(encoded.len(), INODE_SIZE as usize);
        let decoded = Inode::decode(&encoded).unwrap();
        assert_eq!(decoded, inode);
    }

    #[test]
    fn reserved_tail_is_zero() {
        let inode = Inode::new_directory(0, 0, 0o755, 1_700_000_000);
        let encoded = inode.encode();
        assert!(encoded[92..].iter().all(|&b| b == 0));
    }

    #[test]
    fn fresh_inodes_hold_no_blocks() {
        let inode = Inode::new_regular(7, 0, 0o644, 0);
        assert_eq!(inode.size, 0);
        assert_eq!(inode.link_count, 1);
        assert!(inode.direct.iter().all(|&b| b == INVALID_BLOCK_ID));
        assert_eq!(inode.single_indirect, INVALID_BLOCK_ID);
        assert_eq!(inode.double_indirect, INVALID_BLOCK_ID);
    }

    #[test]
    fn directory_constructor_sets_type_and_links() {
        let inode = Inode::new_directory(3, 2, 0o755, 5);
        assert_eq!(inode.file_type, FileType::Directory);
        assert_eq!(inode.link_count, 2);
        assert!(inode.is_directory());
    }
}
