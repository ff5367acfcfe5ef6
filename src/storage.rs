//! # Sector storage interface
//!
//! The FAT32 engine talks to the medium only through [`SectorStore`]: whole
//! sectors keyed by absolute sector number. SD/MMC drivers, SPI plumbing and
//! partition selection live behind this trait.

use crate::error::{FatError, FatResult};
use core::fmt;

/// Largest sector size the engine supports
pub const MAX_SECTOR_SIZE: usize = 4096;

/// Default sector size for SD media
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Block-device collaborator
pub trait SectorStore {
    /// Device-specific error
    type Error: fmt::Debug;

    /// Size in bytes of one sector on this medium
    fn sector_size(&self) -> usize {
        DEFAULT_SECTOR_SIZE
    }

    /// Read sector `index` into `buffer` (`buffer.len() == sector_size()`)
    fn read_sector(&mut self, index: u32, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `buffer` to sector `index` (`buffer.len() == sector_size()`)
    fn write_sector(&mut self, index: u32, buffer: &[u8]) -> Result<(), Self::Error>;
}

impl<S: SectorStore + ?Sized> SectorStore for &mut S {
    type Error = S::Error;

    fn sector_size(&self) -> usize {
        (**self).sector_size()
    }

    fn read_sector(&mut self, index: u32, buffer: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read_sector(index, buffer)
    }

    fn write_sector(&mut self, index: u32, buffer: &[u8]) -> Result<(), Self::Error> {
        (**self).write_sector(index, buffer)
    }
}

/// Fixed-capacity sector buffer
///
/// Capacity is always [`MAX_SECTOR_SIZE`]; only the first `len` bytes (the
/// volume's bytes-per-sector) are ever exposed.
#[derive(Clone)]
pub struct SectorBuffer {
    data: [u8; MAX_SECTOR_SIZE],
    len: usize,
}

impl SectorBuffer {
    /// Zeroed buffer holding one sector of `len` bytes
    pub const fn new(len: usize) -> Self {
        let len = if len > MAX_SECTOR_SIZE { MAX_SECTOR_SIZE } else { len };
        Self {
            data: [0; MAX_SECTOR_SIZE],
            len,
        }
    }

    /// Sector length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length buffer
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Active bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Active bytes, mutable
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Zero the active bytes
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl fmt::Debug for SectorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectorBuffer").field("len", &self.len).finish()
    }
}

/// Sector store backed by a byte slice
///
/// Used for RAM disks on the device and for disk images on the host.
pub struct MemStore<'a> {
    data: &'a mut [u8],
    sector_size: usize,
}

/// Access outside the backing slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds {
    /// Requested sector
    pub sector: u32,
}

impl<'a> MemStore<'a> {
    /// Wrap `data` as a store of `sector_size`-byte sectors
    pub fn new(data: &'a mut [u8], sector_size: usize) -> Self {
        Self { data, sector_size }
    }

    /// Number of whole sectors in the backing slice
    pub fn sector_count(&self) -> u32 {
        (self.data.len() / self.sector_size) as u32
    }

    fn range(&self, index: u32, len: usize) -> Result<core::ops::Range<usize>, OutOfBounds> {
        let start = index as usize * self.sector_size;
        let end = start + self.sector_size;
        if len != self.sector_size || end > self.data.len() {
            return Err(OutOfBounds { sector: index });
        }
        Ok(start..end)
    }
}

impl SectorStore for MemStore<'_> {
    type Error = OutOfBounds;

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sector(&mut self, index: u32, buffer: &mut [u8]) -> Result<(), OutOfBounds> {
        let range = self.range(index, buffer.len())?;
        buffer.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sector(&mut self, index: u32, buffer: &[u8]) -> Result<(), OutOfBounds> {
        let range = self.range(index, buffer.len())?;
        self.data[range].copy_from_slice(buffer);
        Ok(())
    }
}

/// Volume-relative view of a store
///
/// Adds the volume's first sector to every request and maps device errors to
/// [`FatError::Storage`].
pub(crate) struct Disk<D> {
    store: D,
    first_sector: u32,
}

impl<D: SectorStore> Disk<D> {
    pub(crate) fn new(store: D, first_sector: u32) -> Self {
        Self { store, first_sector }
    }

    pub(crate) fn into_inner(self) -> D {
        self.store
    }

    pub(crate) fn read(&mut self, sector: u32, buffer: &mut SectorBuffer) -> FatResult<()> {
        let absolute = self.first_sector.wrapping_add(sector);
        self.store
            .read_sector(absolute, buffer.as_mut_slice())
            .map_err(|err| {
                log::error!("read of sector {} failed: {:?}", absolute, err);
                FatError::Storage { sector: absolute }
            })
    }

    pub(crate) fn write(&mut self, sector: u32, buffer: &SectorBuffer) -> FatResult<()> {
        let absolute = self.first_sector.wrapping_add(sector);
        self.store
            .write_sector(absolute, buffer.as_slice())
            .map_err(|err| {
                log::error!("write of sector {} failed: {:?}", absolute, err);
                FatError::Storage { sector: absolute }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store_round_trip() {
        let mut image = vec![0u8; 4 * 512];
        let mut store = MemStore::new(&mut image, 512);
        assert_eq!(store.sector_count(), 4);

        let sector = [0xA5u8; 512];
        store.write_sector(2, &sector).unwrap();

        let mut back = [0u8; 512];
        store.read_sector(2, &mut back).unwrap();
        assert_eq!(back, sector);
        assert_eq!(image[2 * 512], 0xA5);
        assert_eq!(image[512], 0);
    }

    #[test]
    fn test_mem_store_rejects_out_of_range() {
        let mut image = vec![0u8; 2 * 512];
        let mut store = MemStore::new(&mut image, 512);
        let mut buf = [0u8; 512];
        assert_eq!(store.read_sector(2, &mut buf), Err(OutOfBounds { sector: 2 }));
        let mut short = [0u8; 100];
        assert!(store.read_sector(0, &mut short).is_err());
    }

    #[test]
    fn test_disk_offsets_and_maps_errors() {
        let mut image = vec![0u8; 4 * 512];
        let mut disk = Disk::new(MemStore::new(&mut image, 512), 2);
        let mut buf = SectorBuffer::new(512);
        buf.as_mut_slice()[0] = 7;
        disk.write(1, &buf).unwrap();
        assert_eq!(disk.read(2, &mut buf), Err(FatError::Storage { sector: 4 }));
        drop(disk);
        assert_eq!(image[3 * 512], 7);
    }

    #[test]
    fn test_sector_buffer_is_bounded() {
        let buf = SectorBuffer::new(MAX_SECTOR_SIZE * 2);
        assert_eq!(buf.len(), MAX_SECTOR_SIZE);
        let mut small = SectorBuffer::new(512);
        small.as_mut_slice().fill(1);
        small.clear();
        assert!(small.as_slice().iter().all(|&b| b == 0));
    }
}
