//! FAT32 volume engine
//!
//! This module ties the on-disk structures together into a mounted
//! [`Volume`]:
//! - Boot sector and FSInfo interpretation ([`boot`])
//! - FAT access and cluster-chain navigation ([`fat`])
//! - Free-cluster search and accounting ([`free_space`])
//! - Directory entry encoding ([`dir_entry`]) and iteration ([`dir`])
//! - Sequential file streams ([`file`])
//!
//! All mutable filesystem state (geometry, FAT sector cache, free-space
//! counters) lives in the `Volume` value; there is no global state. Every
//! operation takes `&mut Volume`, so a single volume is driven by one caller
//! at a time. Concurrent hosts wrap it in [`crate::sync::SharedVolume`].

pub mod boot;
pub mod dir;
pub mod dir_entry;
pub mod fat;
pub mod file;
pub mod format;
pub mod free_space;


use crate::error::{FatError, FatResult};
use crate::storage::{Disk, SectorBuffer, SectorStore, MAX_SECTOR_SIZE};

pub use boot::{FsInfo, FsParams};
pub use dir::{DirEntry, DirIter, SlotPos};
pub use dir_entry::{Attributes, DosDateTime, FileName, ShortName};
pub use fat::{ClusterChain, FatEntry, FatEntryOp, FatMirroring};
pub use file::{FileReader, FileWriter};
pub use format::{format_volume, FormatOptions};
pub use free_space::VolumeStats;

use boot::{parse_boot_sector, parse_fsinfo};
use fat::FatTable;
use free_space::FreeSpace;

/// Mount-time configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountOptions {
    /// Absolute sector where the volume starts (partition offset)
    pub first_sector: u32,
    /// Which FAT copies receive updates
    pub fat_mirroring: FatMirroring,
    /// Recount free clusters at mount even if FSInfo carries a count
    pub recount_free: bool,
    /// Stamp for created and modified fields
    pub timestamp: DosDateTime,
}

/// A mounted FAT32 volume
pub struct Volume<D: SectorStore> {
    disk: Disk<D>,
    params: FsParams,
    fat: FatTable,
    free: FreeSpace,
    /// Shared buffer for directory and FSInfo sectors
    scratch: SectorBuffer,
    timestamp: DosDateTime,
}

impl<D: SectorStore> Volume<D> {
    /// Mount the volume found at `options.first_sector` of `store`
    pub fn mount(store: D, options: MountOptions) -> FatResult<Self> {
        let sector_size = store.sector_size();
        if !(512..=MAX_SECTOR_SIZE).contains(&sector_size) {
            log::error!("unsupported sector size {}", sector_size);
            return Err(FatError::InvalidVolume);
        }

        let mut disk = Disk::new(store, options.first_sector);
        let mut scratch = SectorBuffer::new(sector_size);

        disk.read(0, &mut scratch)?;
        let params = parse_boot_sector(scratch.as_slice())?;
        if params.bytes_per_sector as usize != sector_size {
            log::error!(
                "volume uses {}-byte sectors, store provides {}",
                params.bytes_per_sector,
                sector_size
            );
            return Err(FatError::InvalidVolume);
        }

        disk.read(params.fsinfo_sector, &mut scratch)?;
        let info = parse_fsinfo(scratch.as_slice())?;
        let free = FreeSpace::from_fsinfo(&info, &params);

        let mut volume = Self {
            disk,
            fat: FatTable::new(&params, options.fat_mirroring),
            params,
            free,
            scratch,
            timestamp: options.timestamp,
        };
        if options.recount_free {
            volume.recount_free_clusters()?;
        }

        log::info!(
            "FAT32 volume mounted: {} clusters of {} bytes, root at {}, free {:?}",
            volume.params.total_clusters,
            volume.params.bytes_per_cluster(),
            volume.params.root_cluster,
            volume.free.free_count
        );
        Ok(volume)
    }

    /// Flush FSInfo and hand the store back
    pub fn unmount(mut self) -> FatResult<D> {
        self.flush()?;
        log::info!("FAT32 volume unmounted");
        Ok(self.disk.into_inner())
    }

    /// Geometry read from the boot sector
    pub fn params(&self) -> &FsParams {
        &self.params
    }

    pub fn root_cluster(&self) -> u32 {
        self.params.root_cluster
    }

    pub fn timestamp(&self) -> DosDateTime {
        self.timestamp
    }

    /// Stamp used for entries created or modified from now on
    pub fn set_timestamp(&mut self, timestamp: DosDateTime) {
        self.timestamp = timestamp;
    }

    /// Map a directory cluster of 0 (how `..` records the root) to the root
    fn resolve_dir(&self, dir: u32) -> u32 {
        if dir == 0 {
            self.params.root_cluster
        } else {
            dir
        }
    }

    /// Write zeros over every sector of `cluster`
    fn zero_cluster(&mut self, cluster: u32) -> FatResult<()> {
        let first = self.first_sector_of(cluster)?;
        self.scratch.clear();
        for sector in first..first + self.params.sectors_per_cluster {
            self.disk.write(sector, &self.scratch)?;
        }
        Ok(())
    }
}
