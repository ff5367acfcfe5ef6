//! PETdisk FAT32 engine
//!
//! A `no_std`, allocation-free FAT32 volume driver for SD-card backed
//! storage. The block device is supplied through [`SectorStore`]; everything
//! above raw sector I/O (boot sector parsing, FAT chains, free-space
//! accounting, directory entries with long names, sequential file streams)
//! lives here.
//!
//! ```ignore
//! let mut volume = Volume::mount(card, MountOptions::default())?;
//! let root = volume.root_cluster();
//!
//! let mut writer = volume.open_for_write("hello.txt", root)?;
//! volume.write(&mut writer, b"hello")?;
//! volume.close(writer)?;
//!
//! for entry in volume.list_directory(root) {
//!     let entry = entry?;
//!     log::info!("{} {}", entry.name(), entry.size());
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod fs;
pub mod storage;
pub mod sync;

pub use error::{FatError, FatResult};
pub use fs::{
    format_volume, Attributes, DirEntry, DosDateTime, FatEntry, FatEntryOp, FatMirroring,
    FileReader, FileWriter, FormatOptions, FsParams, MountOptions, Volume, VolumeStats,
};
pub use storage::{MemStore, SectorBuffer, SectorStore, DEFAULT_SECTOR_SIZE, MAX_SECTOR_SIZE};
pub use sync::SharedVolume;
