/// File format versions for StashDB
///
/// The map file starts with two meta pages so that an incompatible or
/// damaged file is rejected on open instead of being misread, and so that a
/// torn meta write always leaves the previous commit readable.
/// Map file format version
pub const MAP_FORMAT_VERSION: u16 = 1;

/// Size of one meta page in bytes
pub const META_PAGE_LEN: usize = 64;

/// Number of meta pages at the start of the file
pub const META_PAGES: usize = 2;

/// Offset of the commit log; everything before it is meta pages
pub const DATA_START: usize = META_PAGE_LEN * META_PAGES;

/// Magic numbers for file validation
pub mod magic {
    /// Map file magic: "SDBM" (StashDB Map)
    pub const MAP: u32 = 0x5344424D;
}

/// Version compatibility information
pub struct FormatVersion {
    /// Current version of this format
    pub current: u16,
    /// Minimum supported version for reading
    pub min_read: u16,
}

impl FormatVersion {
    /// Check if a version can be read
    pub fn can_read(&self, version: u16) -> bool {
        version >= self.min_read && version <= self.current
    }
}

/// Map file format version info
pub fn map_version() -> FormatVersion {
    FormatVersion {
        current: MAP_FORMAT_VERSION,
        min_read: 1,
    }
}
