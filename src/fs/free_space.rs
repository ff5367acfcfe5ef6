//! Free-cluster search and accounting
//!
//! The free count and next-free hint live in memory and are written back to
//! the FSInfo sector only by [`Volume::flush`]. Callers flush at safe points.

use super::boot::{parse_fsinfo, write_fsinfo, FsInfo, FsParams};
use super::fat::{FatEntry, FatEntryOp};
use super::Volume;
use crate::error::{FatError, FatResult};
use crate::storage::SectorStore;

/// In-memory FSInfo state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeSpace {
    /// `None` until a full FAT scan establishes the count
    pub(crate) free_count: Option<u32>,
    /// Cluster where the next search starts
    pub(crate) next_free: u32,
    pub(crate) dirty: bool,
}

impl FreeSpace {
    pub(crate) fn from_fsinfo(info: &FsInfo, params: &FsParams) -> Self {
        let free_count = match info.free_count {
            Some(count) if count <= params.total_clusters => Some(count),
            Some(count) => {
                log::warn!(
                    "FSInfo free count {} exceeds {} clusters, ignoring",
                    count,
                    params.total_clusters
                );
                None
            }
            None => None,
        };
        let next_free = match info.next_free {
            Some(hint) if params.is_data_cluster(hint) => hint,
            Some(hint) => {
                log::warn!("FSInfo next-free hint {} out of range", hint);
                2
            }
            None => 2,
        };
        Self {
            free_count,
            next_free,
            dirty: false,
        }
    }
}

/// Space accounting snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub total_clusters: u32,
    pub free_clusters: u32,
    pub bytes_per_cluster: u32,
}

impl VolumeStats {
    pub fn total_bytes(&self) -> u64 {
        self.total_clusters as u64 * self.bytes_per_cluster as u64
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_clusters as u64 * self.bytes_per_cluster as u64
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes() - self.free_bytes()
    }
}

impl<D: SectorStore> Volume<D> {
    /// Reserve a free cluster
    ///
    /// The search starts at the next-free hint and wraps to cluster 2 once.
    /// The cluster is marked end-of-chain immediately; linking it into a
    /// chain is the caller's job.
    pub fn allocate_cluster(&mut self) -> FatResult<u32> {
        let max = self.params.max_cluster();
        let advance = |cluster: u32| if cluster >= max { 2 } else { cluster + 1 };

        let mut cluster = if self.params.is_data_cluster(self.free.next_free) {
            self.free.next_free
        } else {
            2
        };

        for _ in 0..self.params.total_clusters {
            if self.fat_entry(cluster)? == FatEntry::Free {
                self.set_fat_entry(cluster, FatEntry::EndOfChain)?;
                if let Some(count) = self.free.free_count.as_mut() {
                    *count = count.saturating_sub(1);
                }
                self.free.next_free = advance(cluster);
                self.free.dirty = true;
                log::debug!("allocated cluster {}", cluster);
                return Ok(cluster);
            }
            cluster = advance(cluster);
        }

        log::warn!("no free cluster among {}", self.params.total_clusters);
        Err(FatError::DiskFull)
    }

    /// Return a cluster to the free pool
    pub fn release_cluster(&mut self, cluster: u32) -> FatResult<()> {
        let previous = self.access_fat(cluster, FatEntryOp::Set(FatEntry::Free))?;
        if previous == FatEntry::Free {
            log::warn!("cluster {} released twice", cluster);
            return Ok(());
        }
        if let Some(count) = self.free.free_count.as_mut() {
            *count = (*count + 1).min(self.params.total_clusters);
        }
        self.free.dirty = true;
        log::debug!("released cluster {}", cluster);
        Ok(())
    }

    /// Release every cluster of the chain starting at `start`
    ///
    /// Returns the number of clusters released.
    pub fn release_chain(&mut self, start: u32) -> FatResult<u32> {
        let mut released = 0;
        let mut cluster = match start {
            0 => return Ok(0),
            start => start,
        };
        loop {
            if released >= self.params.total_clusters {
                log::error!("cluster chain from {} loops", start);
                return Err(FatError::InvalidCluster(cluster));
            }
            let next = self.next_cluster(cluster)?;
            self.release_cluster(cluster)?;
            released += 1;
            match next {
                Some(next) => cluster = next,
                None => return Ok(released),
            }
        }
    }

    /// Count free clusters by scanning the whole FAT
    pub fn recount_free_clusters(&mut self) -> FatResult<u32> {
        let mut free = 0;
        for cluster in 2..=self.params.max_cluster() {
            if self.fat_entry(cluster)? == FatEntry::Free {
                free += 1;
            }
        }
        if self.free.free_count != Some(free) {
            self.free.free_count = Some(free);
            self.free.dirty = true;
        }
        log::debug!("free cluster scan: {} of {}", free, self.params.total_clusters);
        Ok(free)
    }

    /// Free cluster count, scanning the FAT if FSInfo did not provide one
    pub fn free_clusters(&mut self) -> FatResult<u32> {
        match self.free.free_count {
            Some(count) => Ok(count),
            None => self.recount_free_clusters(),
        }
    }

    /// Total and free space of the volume
    pub fn stats(&mut self) -> FatResult<VolumeStats> {
        Ok(VolumeStats {
            total_clusters: self.params.total_clusters,
            free_clusters: self.free_clusters()?,
            bytes_per_cluster: self.params.bytes_per_cluster(),
        })
    }

    /// Write free count and hint back to FSInfo if they changed
    pub fn flush(&mut self) -> FatResult<()> {
        if !self.free.dirty {
            return Ok(());
        }
        let sector = self.params.fsinfo_sector;
        self.disk.read(sector, &mut self.scratch)?;
        // Refuse to scribble over a sector that is no longer FSInfo.
        parse_fsinfo(self.scratch.as_slice())?;
        write_fsinfo(
            self.scratch.as_mut_slice(),
            &FsInfo {
                free_count: self.free.free_count,
                next_free: Some(self.free.next_free),
            },
        );
        self.disk.write(sector, &self.scratch)?;
        self.free.dirty = false;
        log::debug!(
            "FSInfo flushed: free={:?} next={}",
            self.free.free_count,
            self.free.next_free
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FsParams {
        FsParams {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 32,
            num_fats: 2,
            sectors_per_fat: 16,
            root_cluster: 2,
            fsinfo_sector: 1,
            total_sectors: 2112,
            first_data_sector: 64,
            total_clusters: 2000,
        }
    }

    #[test]
    fn test_fsinfo_values_are_sanitized() {
        let info = FsInfo {
            free_count: Some(5000),
            next_free: Some(1),
        };
        let free = FreeSpace::from_fsinfo(&info, &params());
        assert_eq!(free.free_count, None);
        assert_eq!(free.next_free, 2);
        assert!(!free.dirty);

        let info = FsInfo {
            free_count: Some(1500),
            next_free: Some(700),
        };
        let free = FreeSpace::from_fsinfo(&info, &params());
        assert_eq!(free.free_count, Some(1500));
        assert_eq!(free.next_free, 700);
    }

    #[test]
    fn test_stats_bytes() {
        let stats = VolumeStats {
            total_clusters: 100,
            free_clusters: 40,
            bytes_per_cluster: 4096,
        };
        assert_eq!(stats.total_bytes(), 409_600);
        assert_eq!(stats.free_bytes(), 163_840);
        assert_eq!(stats.used_bytes(), 245_760);
    }
}
