//! File Allocation Table access and cluster-chain navigation
//!
//! The last FAT sector touched is cached, so walking a chain whose links sit
//! in one sector costs a single read. Writes go through the cache straight to
//! the medium.

use super::boot::{read_u32, write_u32, FsParams};
use super::Volume;
use crate::error::{FatError, FatResult};
use crate::storage::{Disk, SectorBuffer, SectorStore};

/// Mask of the 28 significant bits of a FAT32 entry
pub const FAT32_ENTRY_MASK: u32 = 0x0FFFFFFF;
/// Free cluster marker
pub const FAT32_FREE_CLUSTER: u32 = 0x00000000;
/// Bad cluster marker
pub const FAT32_BAD_CLUSTER: u32 = 0x0FFFFFF7;
/// Lowest end-of-chain value
pub const FAT32_EOC_MIN: u32 = 0x0FFFFFF8;
/// End-of-chain value written by this driver
pub const FAT32_EOC: u32 = 0x0FFFFFFF;

/// Decoded FAT entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    /// Cluster is unallocated
    Free,
    /// Cluster links to the given cluster
    Next(u32),
    /// Cluster is marked bad
    Bad,
    /// Cluster is the last of its chain
    EndOfChain,
}

impl FatEntry {
    /// Decode a raw entry, ignoring the reserved top nibble
    pub fn from_raw(raw: u32) -> Self {
        match raw & FAT32_ENTRY_MASK {
            FAT32_FREE_CLUSTER => FatEntry::Free,
            FAT32_BAD_CLUSTER => FatEntry::Bad,
            value if value >= FAT32_EOC_MIN => FatEntry::EndOfChain,
            value => FatEntry::Next(value),
        }
    }

    /// 28-bit on-disk value
    pub fn to_raw(self) -> u32 {
        match self {
            FatEntry::Free => FAT32_FREE_CLUSTER,
            FatEntry::Next(cluster) => cluster & FAT32_ENTRY_MASK,
            FatEntry::Bad => FAT32_BAD_CLUSTER,
            FatEntry::EndOfChain => FAT32_EOC,
        }
    }
}

/// Operation on a single FAT entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntryOp {
    /// Read the entry
    Get,
    /// Replace the entry
    Set(FatEntry),
}

/// Which FAT copies receive entry updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatMirroring {
    /// Update every FAT copy
    AllCopies,
    /// Update only the first FAT
    PrimaryOnly,
}

impl Default for FatMirroring {
    fn default() -> Self {
        FatMirroring::AllCopies
    }
}

/// Cached FAT sector plus mirroring policy
pub(crate) struct FatTable {
    cache: SectorBuffer,
    /// Sector index within the FAT held in `cache`
    cached: Option<u32>,
    mirroring: FatMirroring,
}

impl FatTable {
    pub(crate) fn new(params: &FsParams, mirroring: FatMirroring) -> Self {
        Self {
            cache: SectorBuffer::new(params.bytes_per_sector as usize),
            cached: None,
            mirroring,
        }
    }

    /// FAT-relative sector index and byte offset of a cluster's entry
    fn locate(params: &FsParams, cluster: u32) -> (u32, usize) {
        let fat_offset = cluster * 4;
        (
            fat_offset / params.bytes_per_sector,
            (fat_offset % params.bytes_per_sector) as usize,
        )
    }

    fn load<D: SectorStore>(
        &mut self,
        disk: &mut Disk<D>,
        params: &FsParams,
        fat_sector: u32,
    ) -> FatResult<()> {
        if self.cached == Some(fat_sector) {
            return Ok(());
        }
        self.cached = None;
        disk.read(params.reserved_sectors + fat_sector, &mut self.cache)?;
        self.cached = Some(fat_sector);
        Ok(())
    }

    pub(crate) fn get<D: SectorStore>(
        &mut self,
        disk: &mut Disk<D>,
        params: &FsParams,
        cluster: u32,
    ) -> FatResult<FatEntry> {
        if !params.is_data_cluster(cluster) {
            return Err(FatError::InvalidCluster(cluster));
        }
        let (fat_sector, offset) = Self::locate(params, cluster);
        self.load(disk, params, fat_sector)?;
        Ok(FatEntry::from_raw(read_u32(self.cache.as_slice(), offset)))
    }

    /// Replace an entry, returning the previous value
    pub(crate) fn set<D: SectorStore>(
        &mut self,
        disk: &mut Disk<D>,
        params: &FsParams,
        cluster: u32,
        entry: FatEntry,
    ) -> FatResult<FatEntry> {
        if !params.is_data_cluster(cluster) {
            return Err(FatError::InvalidCluster(cluster));
        }
        let (fat_sector, offset) = Self::locate(params, cluster);
        self.load(disk, params, fat_sector)?;

        let old = read_u32(self.cache.as_slice(), offset);
        let new = (old & !FAT32_ENTRY_MASK) | entry.to_raw();
        write_u32(self.cache.as_mut_slice(), offset, new);

        let copies = match self.mirroring {
            FatMirroring::AllCopies => params.num_fats,
            FatMirroring::PrimaryOnly => 1,
        };
        for copy in 0..copies {
            let sector = params.reserved_sectors + copy * params.sectors_per_fat + fat_sector;
            if let Err(err) = disk.write(sector, &self.cache) {
                // The medium may now differ from the cache.
                self.cached = None;
                return Err(err);
            }
        }

        Ok(FatEntry::from_raw(old))
    }
}

impl<D: SectorStore> Volume<D> {
    /// First sector (volume-relative) of a data cluster
    pub fn first_sector_of(&self, cluster: u32) -> FatResult<u32> {
        if !self.params.is_data_cluster(cluster) {
            return Err(FatError::InvalidCluster(cluster));
        }
        Ok(self.params.first_data_sector + (cluster - 2) * self.params.sectors_per_cluster)
    }

    /// Get or set the FAT entry of `cluster`
    ///
    /// `Get` returns the current entry, `Set` the entry it replaced.
    pub fn access_fat(&mut self, cluster: u32, op: FatEntryOp) -> FatResult<FatEntry> {
        match op {
            FatEntryOp::Get => self.fat.get(&mut self.disk, &self.params, cluster),
            FatEntryOp::Set(entry) => self.fat.set(&mut self.disk, &self.params, cluster, entry),
        }
    }

    pub fn fat_entry(&mut self, cluster: u32) -> FatResult<FatEntry> {
        self.access_fat(cluster, FatEntryOp::Get)
    }

    pub fn set_fat_entry(&mut self, cluster: u32, entry: FatEntry) -> FatResult<()> {
        self.access_fat(cluster, FatEntryOp::Set(entry)).map(|_| ())
    }

    /// Follow one link of a chain
    ///
    /// `Ok(None)` at end of chain. A free or bad entry inside a chain, or a
    /// link outside the data area, is an `InvalidCluster`.
    pub fn next_cluster(&mut self, cluster: u32) -> FatResult<Option<u32>> {
        match self.fat_entry(cluster)? {
            FatEntry::EndOfChain => Ok(None),
            FatEntry::Next(next) if self.params.is_data_cluster(next) => Ok(Some(next)),
            FatEntry::Next(next) => Err(FatError::InvalidCluster(next)),
            FatEntry::Free | FatEntry::Bad => Err(FatError::InvalidCluster(cluster)),
        }
    }

    /// Lazily walk the chain starting at `start`
    ///
    /// A start cluster of 0 (empty file) yields nothing.
    pub fn cluster_chain(&mut self, start: u32) -> ClusterChain<'_, D> {
        let state = if start == 0 {
            ChainState::Done
        } else {
            ChainState::Next(start)
        };
        ClusterChain {
            volume: self,
            state,
            steps: 0,
        }
    }
}

enum ChainState {
    Next(u32),
    Failed(FatError),
    Done,
}

/// Iterator over the clusters of one chain
///
/// Stops with `InvalidCluster` after more than `total_clusters` steps, so a
/// cyclic chain can never loop forever.
pub struct ClusterChain<'a, D: SectorStore> {
    volume: &'a mut Volume<D>,
    state: ChainState,
    steps: u32,
}

impl<D: SectorStore> Iterator for ClusterChain<'_, D> {
    type Item = FatResult<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let cluster = match core::mem::replace(&mut self.state, ChainState::Done) {
            ChainState::Done => return None,
            ChainState::Failed(err) => return Some(Err(err)),
            ChainState::Next(cluster) => cluster,
        };

        if !self.volume.params.is_data_cluster(cluster) {
            return Some(Err(FatError::InvalidCluster(cluster)));
        }

        self.steps += 1;
        if self.steps > self.volume.params.total_clusters {
            log::error!("cluster chain loops at cluster {}", cluster);
            return Some(Err(FatError::InvalidCluster(cluster)));
        }

        self.state = match self.volume.next_cluster(cluster) {
            Ok(Some(next)) => ChainState::Next(next),
            Ok(None) => ChainState::Done,
            Err(err) => ChainState::Failed(err),
        };
        Some(Ok(cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_decoding() {
        assert_eq!(FatEntry::from_raw(0), FatEntry::Free);
        assert_eq!(FatEntry::from_raw(0xF000_0000), FatEntry::Free);
        assert_eq!(FatEntry::from_raw(0x0FFF_FFF7), FatEntry::Bad);
        assert_eq!(FatEntry::from_raw(0x0FFF_FFF8), FatEntry::EndOfChain);
        assert_eq!(FatEntry::from_raw(0xFFFF_FFFF), FatEntry::EndOfChain);
        assert_eq!(FatEntry::from_raw(0x1000_0005), FatEntry::Next(5));
    }

    #[test]
    fn test_entry_encoding() {
        assert_eq!(FatEntry::Free.to_raw(), 0);
        assert_eq!(FatEntry::EndOfChain.to_raw(), FAT32_EOC);
        assert_eq!(FatEntry::Bad.to_raw(), FAT32_BAD_CLUSTER);
        assert_eq!(FatEntry::Next(0xF000_0009).to_raw(), 9);
    }

    #[test]
    fn test_locate_entry() {
        let params = FsParams {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 32,
            num_fats: 2,
            sectors_per_fat: 16,
            root_cluster: 2,
            fsinfo_sector: 1,
            total_sectors: 4096,
            first_data_sector: 64,
            total_clusters: 2000,
        };
        assert_eq!(FatTable::locate(&params, 2), (0, 8));
        assert_eq!(FatTable::locate(&params, 127), (0, 508));
        assert_eq!(FatTable::locate(&params, 128), (1, 0));
        assert_eq!(FatTable::locate(&params, 300), (2, 176));
    }
}
