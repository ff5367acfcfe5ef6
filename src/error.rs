//! Error handling for the FAT32 engine
//!
//! Every core operation returns a [`FatResult`]. All errors are recoverable at
//! the operation boundary; a `Storage` failure in the middle of a write may
//! leave FAT, FSInfo and directory entry out of step and calls for a remount.

use core::fmt;

/// FAT32 engine error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatError {
    /// Boot sector or FSInfo signatures do not describe a FAT32 volume
    InvalidVolume,
    /// The sector store failed to read or write a sector
    Storage {
        /// Absolute sector number that failed
        sector: u32,
    },
    /// Cluster number out of range, or a cluster chain that loops
    InvalidCluster(u32),
    /// Name lookup failed
    NotFound,
    /// No free cluster left on the volume
    DiskFull,
    /// Directory record fails structural validation
    MalformedEntry,
    /// File size and cluster chain length disagree
    TruncatedFile,
    /// Name is empty or contains characters that cannot be stored
    InvalidName,
    /// Name exceeds 255 UTF-16 code units
    NameTooLong,
    /// File operation attempted on a directory
    IsDirectory,
    /// Directory operation attempted on a file
    NotADirectory,
    /// No unique short name could be generated
    AlreadyExists,
    /// Write would grow the file past the 4 GiB FAT32 limit
    FileTooLarge,
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FatError::InvalidVolume => write!(f, "Not a valid FAT32 volume"),
            FatError::Storage { sector } => write!(f, "Storage error at sector {}", sector),
            FatError::InvalidCluster(cluster) => write!(f, "Invalid cluster {:#x}", cluster),
            FatError::NotFound => write!(f, "No such file or directory"),
            FatError::DiskFull => write!(f, "No space left on device"),
            FatError::MalformedEntry => write!(f, "Malformed directory entry"),
            FatError::TruncatedFile => write!(f, "File size exceeds its cluster chain"),
            FatError::InvalidName => write!(f, "Invalid file name"),
            FatError::NameTooLong => write!(f, "File name too long"),
            FatError::IsDirectory => write!(f, "Is a directory"),
            FatError::NotADirectory => write!(f, "Not a directory"),
            FatError::AlreadyExists => write!(f, "File exists"),
            FatError::FileTooLarge => write!(f, "File too large"),
        }
    }
}

/// FAT32 engine result type
pub type FatResult<T> = Result<T, FatError>;
