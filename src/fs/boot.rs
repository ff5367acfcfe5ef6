//! Boot sector and FSInfo parsing
//!
//! Fields are pulled out of the raw sector by byte offset; nothing relies on
//! the memory layout of a Rust struct.

use crate::error::{FatError, FatResult};

/// Boot sector signature at offset 510
pub const BOOT_SIGNATURE: u16 = 0xAA55;
/// FSInfo lead signature (offset 0)
pub const FSINFO_LEAD_SIGNATURE: u32 = 0x41615252;
/// FSInfo structure signature (offset 484)
pub const FSINFO_STRUCT_SIGNATURE: u32 = 0x61417272;
/// FSInfo trail signature (offset 508)
pub const FSINFO_TRAIL_SIGNATURE: u32 = 0xAA550000;
/// "Unknown" sentinel for FSInfo counters
pub const FSINFO_UNKNOWN: u32 = 0xFFFFFFFF;

/// Boot sector field offsets
pub(crate) mod bpb {
    pub const BYTES_PER_SECTOR: usize = 11;
    pub const SECTORS_PER_CLUSTER: usize = 13;
    pub const RESERVED_SECTORS: usize = 14;
    pub const NUM_FATS: usize = 16;
    pub const ROOT_ENTRY_COUNT: usize = 17;
    pub const TOTAL_SECTORS_16: usize = 19;
    pub const MEDIA: usize = 21;
    pub const FAT_SIZE_16: usize = 22;
    pub const SECTORS_PER_TRACK: usize = 24;
    pub const NUM_HEADS: usize = 26;
    pub const TOTAL_SECTORS_32: usize = 32;
    pub const FAT_SIZE_32: usize = 36;
    pub const ROOT_CLUSTER: usize = 44;
    pub const FS_INFO: usize = 48;
    pub const BACKUP_BOOT_SECTOR: usize = 50;
    pub const DRIVE_NUMBER: usize = 64;
    pub const BOOT_SIGNATURE_EXT: usize = 66;
    pub const VOLUME_ID: usize = 67;
    pub const VOLUME_LABEL: usize = 71;
    pub const FS_TYPE: usize = 82;
    pub const SIGNATURE: usize = 510;
}

/// FSInfo field offsets
pub(crate) mod fsinfo {
    pub const LEAD_SIGNATURE: usize = 0;
    pub const STRUCT_SIGNATURE: usize = 484;
    pub const FREE_COUNT: usize = 488;
    pub const NEXT_FREE: usize = 492;
    pub const TRAIL_SIGNATURE: usize = 508;
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Geometry of a mounted FAT32 volume
///
/// Sector numbers are relative to the volume's first sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsParams {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub num_fats: u32,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    pub fsinfo_sector: u32,
    pub total_sectors: u32,
    /// First sector of cluster 2
    pub first_data_sector: u32,
    /// Number of data clusters (valid cluster numbers are `2..=total_clusters + 1`)
    pub total_clusters: u32,
}

impl FsParams {
    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Highest valid cluster number
    pub fn max_cluster(&self) -> u32 {
        self.total_clusters + 1
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster <= self.max_cluster()
    }

    /// 32-byte directory slots per cluster
    pub fn slots_per_cluster(&self) -> u32 {
        self.bytes_per_cluster() / 32
    }
}

/// Parse and validate a FAT32 boot sector
pub fn parse_boot_sector(sector: &[u8]) -> FatResult<FsParams> {
    if sector.len() < 512 || read_u16(sector, bpb::SIGNATURE) != BOOT_SIGNATURE {
        log::debug!("boot sector signature missing");
        return Err(FatError::InvalidVolume);
    }

    if &sector[bpb::FS_TYPE..bpb::FS_TYPE + 5] != b"FAT32" {
        log::debug!("boot sector does not carry the FAT32 marker");
        return Err(FatError::InvalidVolume);
    }

    let bytes_per_sector = read_u16(sector, bpb::BYTES_PER_SECTOR) as u32;
    let sectors_per_cluster = sector[bpb::SECTORS_PER_CLUSTER] as u32;
    let reserved_sectors = read_u16(sector, bpb::RESERVED_SECTORS) as u32;
    let num_fats = sector[bpb::NUM_FATS] as u32;
    let fat_size_16 = read_u16(sector, bpb::FAT_SIZE_16);
    let sectors_per_fat = read_u32(sector, bpb::FAT_SIZE_32);
    let root_cluster = read_u32(sector, bpb::ROOT_CLUSTER);
    let fsinfo_sector = read_u16(sector, bpb::FS_INFO) as u32;
    let total_sectors = match read_u16(sector, bpb::TOTAL_SECTORS_16) {
        0 => read_u32(sector, bpb::TOTAL_SECTORS_32),
        small => small as u32,
    };

    if !(512..=4096).contains(&bytes_per_sector) || !bytes_per_sector.is_power_of_two() {
        log::debug!("invalid bytes_per_sector: {}", bytes_per_sector);
        return Err(FatError::InvalidVolume);
    }
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        log::debug!("invalid sectors_per_cluster: {}", sectors_per_cluster);
        return Err(FatError::InvalidVolume);
    }
    if reserved_sectors == 0 || num_fats == 0 || fat_size_16 != 0 || sectors_per_fat == 0 {
        log::debug!(
            "inconsistent FAT32 layout: reserved={} fats={} fat16={} fat32={}",
            reserved_sectors,
            num_fats,
            fat_size_16,
            sectors_per_fat
        );
        return Err(FatError::InvalidVolume);
    }
    if fsinfo_sector == 0 || fsinfo_sector >= reserved_sectors {
        log::debug!("FSInfo sector {} outside the reserved area", fsinfo_sector);
        return Err(FatError::InvalidVolume);
    }

    let first_data_sector = reserved_sectors + num_fats * sectors_per_fat;
    if total_sectors <= first_data_sector {
        return Err(FatError::InvalidVolume);
    }

    // The FAT may describe fewer clusters than the data region holds.
    let data_clusters = (total_sectors - first_data_sector) / sectors_per_cluster;
    let fat_clusters = (sectors_per_fat * (bytes_per_sector / 4)).saturating_sub(2);
    let total_clusters = data_clusters.min(fat_clusters);

    if root_cluster < 2 || root_cluster > total_clusters + 1 {
        log::debug!("invalid root cluster: {}", root_cluster);
        return Err(FatError::InvalidVolume);
    }

    Ok(FsParams {
        bytes_per_sector,
        sectors_per_cluster,
        reserved_sectors,
        num_fats,
        sectors_per_fat,
        root_cluster,
        fsinfo_sector,
        total_sectors,
        first_data_sector,
        total_clusters,
    })
}

/// Counters read from the FSInfo sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    /// `None` when the sector holds the unknown sentinel
    pub free_count: Option<u32>,
    /// `None` when the sector holds the unknown sentinel
    pub next_free: Option<u32>,
}

/// Parse and validate an FSInfo sector
pub fn parse_fsinfo(sector: &[u8]) -> FatResult<FsInfo> {
    if sector.len() < 512
        || read_u32(sector, fsinfo::LEAD_SIGNATURE) != FSINFO_LEAD_SIGNATURE
        || read_u32(sector, fsinfo::STRUCT_SIGNATURE) != FSINFO_STRUCT_SIGNATURE
        || read_u32(sector, fsinfo::TRAIL_SIGNATURE) != FSINFO_TRAIL_SIGNATURE
    {
        log::debug!("FSInfo signatures do not match");
        return Err(FatError::InvalidVolume);
    }

    let known = |value: u32| (value != FSINFO_UNKNOWN).then_some(value);
    Ok(FsInfo {
        free_count: known(read_u32(sector, fsinfo::FREE_COUNT)),
        next_free: known(read_u32(sector, fsinfo::NEXT_FREE)),
    })
}

/// Store counters into an FSInfo sector, leaving other bytes untouched
pub fn write_fsinfo(sector: &mut [u8], info: &FsInfo) {
    write_u32(sector, fsinfo::FREE_COUNT, info.free_count.unwrap_or(FSINFO_UNKNOWN));
    write_u32(sector, fsinfo::NEXT_FREE, info.next_free.unwrap_or(FSINFO_UNKNOWN));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_sector() -> [u8; 512] {
        let mut s = [0u8; 512];
        s[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        write_u16(&mut s, bpb::BYTES_PER_SECTOR, 512);
        s[bpb::SECTORS_PER_CLUSTER] = 8;
        write_u16(&mut s, bpb::RESERVED_SECTORS, 32);
        s[bpb::NUM_FATS] = 2;
        write_u32(&mut s, bpb::TOTAL_SECTORS_32, 100_000);
        write_u32(&mut s, bpb::FAT_SIZE_32, 100);
        write_u32(&mut s, bpb::ROOT_CLUSTER, 2);
        write_u16(&mut s, bpb::FS_INFO, 1);
        s[bpb::FS_TYPE..bpb::FS_TYPE + 8].copy_from_slice(b"FAT32   ");
        write_u16(&mut s, bpb::SIGNATURE, BOOT_SIGNATURE);
        s
    }

    #[test]
    fn test_parse_geometry() {
        let params = parse_boot_sector(&boot_sector()).unwrap();
        assert_eq!(params.bytes_per_sector, 512);
        assert_eq!(params.sectors_per_cluster, 8);
        assert_eq!(params.first_data_sector, 32 + 2 * 100);
        assert_eq!(params.total_clusters, (100_000 - 232) / 8);
        assert_eq!(params.bytes_per_cluster(), 4096);
        assert!(params.is_data_cluster(2));
        assert!(!params.is_data_cluster(1));
        assert!(!params.is_data_cluster(params.max_cluster() + 1));
    }

    #[test]
    fn test_cluster_count_limited_by_fat_size() {
        let mut s = boot_sector();
        write_u32(&mut s, bpb::FAT_SIZE_32, 4);
        write_u32(&mut s, bpb::TOTAL_SECTORS_32, 100_000);
        let params = parse_boot_sector(&s).unwrap();
        assert_eq!(params.total_clusters, 4 * 128 - 2);
    }

    #[test]
    fn test_rejects_bad_signatures() {
        let mut s = boot_sector();
        s[511] = 0;
        assert_eq!(parse_boot_sector(&s), Err(FatError::InvalidVolume));

        let mut s = boot_sector();
        s[bpb::FS_TYPE..bpb::FS_TYPE + 8].copy_from_slice(b"FAT16   ");
        assert_eq!(parse_boot_sector(&s), Err(FatError::InvalidVolume));

        let mut s = boot_sector();
        s[bpb::SECTORS_PER_CLUSTER] = 3;
        assert_eq!(parse_boot_sector(&s), Err(FatError::InvalidVolume));

        let mut s = boot_sector();
        write_u32(&mut s, bpb::ROOT_CLUSTER, 1);
        assert_eq!(parse_boot_sector(&s), Err(FatError::InvalidVolume));
    }

    #[test]
    fn test_fsinfo_sentinel_is_unknown() {
        let mut s = [0u8; 512];
        write_u32(&mut s, fsinfo::LEAD_SIGNATURE, FSINFO_LEAD_SIGNATURE);
        write_u32(&mut s, fsinfo::STRUCT_SIGNATURE, FSINFO_STRUCT_SIGNATURE);
        write_u32(&mut s, fsinfo::TRAIL_SIGNATURE, FSINFO_TRAIL_SIGNATURE);
        write_u32(&mut s, fsinfo::FREE_COUNT, FSINFO_UNKNOWN);
        write_u32(&mut s, fsinfo::NEXT_FREE, 17);

        let info = parse_fsinfo(&s).unwrap();
        assert_eq!(info.free_count, None);
        assert_eq!(info.next_free, Some(17));

        write_fsinfo(&mut s, &FsInfo { free_count: Some(42), next_free: None });
        assert_eq!(read_u32(&s, fsinfo::FREE_COUNT), 42);
        assert_eq!(read_u32(&s, fsinfo::NEXT_FREE), FSINFO_UNKNOWN);
        assert!(parse_fsinfo(&s).is_ok());

        write_u32(&mut s, fsinfo::TRAIL_SIGNATURE, 0);
        assert_eq!(parse_fsinfo(&s), Err(FatError::InvalidVolume));
    }
}
