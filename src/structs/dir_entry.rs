use super::*;
use crate::config::{InodeId, INVALID_INODE_ID, MAX_FILENAME_LENGTH};
use crate::Error;

impl DirEntry {
    pub fn new(name: &str, inode_id: InodeId) -> Result<Self, Error> {
        // Strictly shorter than the field so at least one NUL terminates it.
        if name.is_empty() || name.len() >= MAX_FILENAME_LENGTH || name.contains('/') {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            name: name.to_owned(),
            inode_id,
        })
    }

    /// A tombstoned slot, reusable by the next insert.
    pub fn tombstone() -> Self {
        Self {
            name: String::new(),
            inode_id: INVALID_INODE_ID,
        }
    }

    pub fn is_free(&self) -> bool {
        self.inode_id == INVALID_INODE_ID
    }

    pub fn decode(buffer: &[u8]) -> Result<Self, Error> {
        let name_field = &buffer[..MAX_FILENAME_LENGTH];
        let name_length = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_FILENAME_LENGTH);
        let name = std::str::from_utf8(&name_field[..name_length])?.to_owned();
        Ok(Self {
            name,
            inode_id: read_i32(buffer, MAX_FILENAME_LENGTH),
        })
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buffer = [0u8; DIR_ENTRY_SIZE];
        buffer[..self.name.len()].copy_from_slice(self.name.as_bytes());
        write_i32(&mut buffer, MAX_FILENAME_LENGTH, self.inode_id);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::DirEntry;
    use crate::structs::DIR_ENTRY_SIZE;

    #[test]
    fn byte_conversion() {
        let entry = DirEntry::new("notes.txt", 17).unwrap();
        let bytes = entry.encode();
        assert_eq!(bytes.len(), DIR_ENTRY_SIZE);
        let decoded = DirEntry::decode(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn tombstone_round_trips_as_free() {
        let bytes = DirEntry::tombstone().encode();
        let decoded = DirEntry::decode(&bytes).unwrap();
        assert!(decoded.is_free());
        assert!(decoded.name.is_empty());
    }

    #[test]
    fn rejects_unusable_names() {
        assert!(DirEntry::new("", 1).is_err());
        assert!(DirEntry::new("a/b", 1).is_err());
        assert!(DirEntry::new(&"x".repeat(255), 1).is_err());
        assert!(DirEntry::new(&"x".repeat(254), 1).is_ok());
    }
}
