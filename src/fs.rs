//! Read-only volume interface
//!
//! The filesystem proper is an external collaborator; the core only needs
//! the narrow read path: look a name up in the flat directory, list entries
//! by index, and read bytes out of an inode. `Volume` is that contract and
//! `MemoryVolume` the in-crate implementation used by boot and tests.

use std::collections::HashMap;

/// Maximum file name length in the flat directory.
pub const MAX_NAME: usize = 32;

/// Executable images start with this four-byte signature.
pub const EXEC_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
/// Byte offset of the little-endian entry-point word in an image.
pub const ENTRY_POINT_OFFSET: u32 = 24;

/// Type tag of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// RTC-style character device node.
    Rtc,
    /// The directory itself.
    Directory,
    /// Regular data file.
    Regular,
}

/// One flat-directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
    pub inode: u32,
}

/// Volume-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeError {
    /// Inode index does not exist.
    BadInode,
}

impl std::fmt::Display for VolumeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeError::BadInode => write!(f, "bad inode"),
        }
    }
}

/// The read-only block-indexed read path the core calls.
pub trait Volume {
    /// Find a directory entry by name.
    fn lookup(&self, name: &str) -> Option<DirEntry>;

    /// Directory entry at `index`, for directory-listing reads.
    fn entry_at(&self, index: usize) -> Option<DirEntry>;

    /// Copy up to `buf.len()` bytes from `offset` into `buf`; short reads
    /// at end of file, zero once past it.
    fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, VolumeError>;

    /// Total length of an inode's data.
    fn len(&self, inode: u32) -> Result<u32, VolumeError>;
}

/// In-memory volume with a flat directory, enough to boot shells from.
#[derive(Debug, Default)]
pub struct MemoryVolume {
    entries: Vec<DirEntry>,
    data: HashMap<u32, Vec<u8>>,
    next_inode: u32,
}

impl MemoryVolume {
    /// Empty volume containing only the directory node itself.
    pub fn new() -> Self {
        let mut vol = Self {
            entries: Vec::new(),
            data: HashMap::new(),
            next_inode: 0,
        };
        vol.entries.push(DirEntry {
            name: ".".into(),
            kind: FileKind::Directory,
            inode: 0,
        });
        vol.entries.push(DirEntry {
            name: "rtc".into(),
            kind: FileKind::Rtc,
            inode: 0,
        });
        vol
    }

    /// Add a regular file. Names longer than `MAX_NAME` are truncated the
    /// way the flat directory would store them.
    pub fn add_file(&mut self, name: &str, data: Vec<u8>) -> u32 {
        self.next_inode += 1;
        let inode = self.next_inode;
        let mut name = name.to_string();
        name.truncate(MAX_NAME);
        self.entries.push(DirEntry {
            name,
            kind: FileKind::Regular,
            inode,
        });
        self.data.insert(inode, data);
        inode
    }
}

impl Volume for MemoryVolume {
    fn lookup(&self, name: &str) -> Option<DirEntry> {
        self.entries.iter().find(|e| e.name == name).cloned()
    }

    fn entry_at(&self, index: usize) -> Option<DirEntry> {
        self.entries.get(index).cloned()
    }

    fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, VolumeError> {
        let data = self.data.get(&inode).ok_or(VolumeError::BadInode)?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn len(&self, inode: u32) -> Result<u32, VolumeError> {
        self.data
            .get(&inode)
            .map(|d| d.len() as u32)
            .ok_or(VolumeError::BadInode)
    }
}

/// Build a loadable image: the executable signature, padding up to the
/// entry-point word, the little-endian entry point, then the body.
pub fn executable_image(entry_point: u32, body: &[u8]) -> Vec<u8> {
    let mut image = Vec::with_capacity(ENTRY_POINT_OFFSET as usize + 4 + body.len());
    image.extend_from_slice(&EXEC_MAGIC);
    image.resize(ENTRY_POINT_OFFSET as usize, 0);
    image.extend_from_slice(&entry_point.to_le_bytes());
    image.extend_from_slice(body);
    image
}
