//! FAT32 formatter
//!
//! Lays out a fresh volume: boot sector with backup, FSInfo, zeroed FATs
//! and an empty root directory in cluster 2. Used by host tooling and the
//! test suite to build images.

use super::boot::{
    bpb, fsinfo, parse_boot_sector, write_fsinfo, write_u16, write_u32, FsInfo, FsParams,
    BOOT_SIGNATURE, FSINFO_LEAD_SIGNATURE, FSINFO_STRUCT_SIGNATURE, FSINFO_TRAIL_SIGNATURE,
};
use super::fat::FAT32_EOC;
use crate::error::{FatError, FatResult};
use crate::storage::{Disk, SectorBuffer, SectorStore, MAX_SECTOR_SIZE};

const FSINFO_SECTOR: u32 = 1;
const BACKUP_BOOT_SECTOR: u32 = 6;
const ROOT_CLUSTER: u32 = 2;
const MEDIA_FIXED: u8 = 0xF8;

/// Layout of a volume to format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Size of the volume in sectors
    pub total_sectors: u32,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub volume_id: u32,
    /// Space-padded volume label
    pub label: [u8; 11],
}

impl FormatOptions {
    pub fn new(total_sectors: u32) -> Self {
        Self {
            total_sectors,
            sectors_per_cluster: 1,
            reserved_sectors: 32,
            num_fats: 2,
            volume_id: 0x5045_5444,
            label: *b"NO NAME    ",
        }
    }

    pub fn sectors_per_cluster(mut self, sectors: u8) -> Self {
        self.sectors_per_cluster = sectors;
        self
    }

    pub fn num_fats(mut self, fats: u8) -> Self {
        self.num_fats = fats;
        self
    }

    /// Label, uppercased and truncated or padded to 11 bytes
    pub fn label(mut self, label: &str) -> Self {
        self.label = [b' '; 11];
        for (dst, src) in self.label.iter_mut().zip(label.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        self
    }
}

/// Smallest FAT size (in sectors) that covers every data cluster
fn fat_size(options: &FormatOptions, bytes_per_sector: u32) -> Option<u32> {
    let entries_per_sector = bytes_per_sector / 4;
    let overhead = options.reserved_sectors as u32;
    let fats = options.num_fats as u32;
    let spc = options.sectors_per_cluster as u32;

    let mut sectors_per_fat = 1;
    loop {
        let data = options
            .total_sectors
            .checked_sub(overhead + fats * sectors_per_fat)?;
        let clusters = data / spc;
        let needed = (clusters + 2 + entries_per_sector - 1) / entries_per_sector;
        if needed <= sectors_per_fat {
            return Some(sectors_per_fat);
        }
        sectors_per_fat = needed;
    }
}

/// Format `store` as an empty FAT32 volume starting at sector 0
pub fn format_volume<D: SectorStore>(store: D, options: &FormatOptions) -> FatResult<FsParams> {
    let sector_size = store.sector_size();
    let spc = options.sectors_per_cluster;
    if !(512..=MAX_SECTOR_SIZE).contains(&sector_size)
        || !sector_size.is_power_of_two()
        || spc == 0
        || !spc.is_power_of_two()
        || options.num_fats == 0
        || (options.reserved_sectors as u32) <= BACKUP_BOOT_SECTOR + 1
    {
        log::error!("unusable format options {:?}", options);
        return Err(FatError::InvalidVolume);
    }
    let bytes_per_sector = sector_size as u32;
    let sectors_per_fat = fat_size(options, bytes_per_sector).ok_or(FatError::InvalidVolume)?;
    let first_data_sector = options.reserved_sectors as u32 + options.num_fats as u32 * sectors_per_fat;
    if options.total_sectors < first_data_sector + spc as u32 {
        log::error!("{} sectors leave no room for the root directory", options.total_sectors);
        return Err(FatError::InvalidVolume);
    }

    let mut disk = Disk::new(store, 0);
    let mut sector = SectorBuffer::new(sector_size);

    for index in 0..options.reserved_sectors as u32 {
        disk.write(index, &sector)?;
    }

    let boot = sector.as_mut_slice();
    boot[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    boot[3..11].copy_from_slice(b"PETFAT  ");
    write_u16(boot, bpb::BYTES_PER_SECTOR, bytes_per_sector as u16);
    boot[bpb::SECTORS_PER_CLUSTER] = spc;
    write_u16(boot, bpb::RESERVED_SECTORS, options.reserved_sectors);
    boot[bpb::NUM_FATS] = options.num_fats;
    write_u16(boot, bpb::ROOT_ENTRY_COUNT, 0);
    write_u16(boot, bpb::TOTAL_SECTORS_16, 0);
    boot[bpb::MEDIA] = MEDIA_FIXED;
    write_u16(boot, bpb::FAT_SIZE_16, 0);
    write_u16(boot, bpb::SECTORS_PER_TRACK, 63);
    write_u16(boot, bpb::NUM_HEADS, 255);
    write_u32(boot, bpb::TOTAL_SECTORS_32, options.total_sectors);
    write_u32(boot, bpb::FAT_SIZE_32, sectors_per_fat);
    write_u32(boot, bpb::ROOT_CLUSTER, ROOT_CLUSTER);
    write_u16(boot, bpb::FS_INFO, FSINFO_SECTOR as u16);
    write_u16(boot, bpb::BACKUP_BOOT_SECTOR, BACKUP_BOOT_SECTOR as u16);
    boot[bpb::DRIVE_NUMBER] = 0x80;
    boot[bpb::BOOT_SIGNATURE_EXT] = 0x29;
    write_u32(boot, bpb::VOLUME_ID, options.volume_id);
    boot[bpb::VOLUME_LABEL..bpb::VOLUME_LABEL + 11].copy_from_slice(&options.label);
    boot[bpb::FS_TYPE..bpb::FS_TYPE + 8].copy_from_slice(b"FAT32   ");
    write_u16(boot, bpb::SIGNATURE, BOOT_SIGNATURE);

    let params = parse_boot_sector(sector.as_slice())?;
    disk.write(0, &sector)?;
    disk.write(BACKUP_BOOT_SECTOR, &sector)?;

    sector.clear();
    let info = sector.as_mut_slice();
    write_u32(info, fsinfo::LEAD_SIGNATURE, FSINFO_LEAD_SIGNATURE);
    write_u32(info, fsinfo::STRUCT_SIGNATURE, FSINFO_STRUCT_SIGNATURE);
    write_u32(info, fsinfo::TRAIL_SIGNATURE, FSINFO_TRAIL_SIGNATURE);
    write_fsinfo(
        info,
        &FsInfo {
            free_count: Some(params.total_clusters - 1),
            next_free: Some(ROOT_CLUSTER + 1),
        },
    );
    disk.write(FSINFO_SECTOR, &sector)?;
    disk.write(BACKUP_BOOT_SECTOR + FSINFO_SECTOR, &sector)?;

    for copy in 0..params.num_fats {
        let start = params.reserved_sectors + copy * sectors_per_fat;
        for index in 0..sectors_per_fat {
            sector.clear();
            if index == 0 {
                let fat = sector.as_mut_slice();
                write_u32(fat, 0, 0x0FFF_FF00 | MEDIA_FIXED as u32);
                write_u32(fat, 4, FAT32_EOC);
                write_u32(fat, ROOT_CLUSTER as usize * 4, FAT32_EOC);
            }
            disk.write(start + index, &sector)?;
        }
    }

    sector.clear();
    for index in 0..params.sectors_per_cluster {
        disk.write(params.first_data_sector + index, &sector)?;
    }

    log::info!(
        "formatted FAT32 volume: {} sectors, {} clusters of {} bytes",
        params.total_sectors,
        params.total_clusters,
        params.bytes_per_cluster()
    );
    Ok(params)
}
