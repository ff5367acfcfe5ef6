//! Sequential file streams
//!
//! [`FileReader`] and [`FileWriter`] hold only cursor state and a sector
//! buffer; every advance goes through the [`Volume`] that opened them.
//!
//! Caller contract: at most one `FileWriter` per file at a time, and no
//! reader of a file while it is being written.

use super::dir::{DirEntry, SlotPos};
use super::dir_entry::{Attributes, ShortEntry};
use super::fat::FatEntry;
use super::Volume;
use crate::error::{FatError, FatResult};
use crate::storage::{SectorBuffer, SectorStore};

/// Read cursor over one file
pub struct FileReader {
    first_cluster: u32,
    size: u32,
    position: u32,
    /// Cluster holding `position`; 0 before the first load
    cluster: u32,
    /// Sector within `cluster`; equal to sectors-per-cluster when the next
    /// load must move to the following cluster
    sector_in_cluster: u32,
    buffer: SectorBuffer,
    loaded: bool,
}

impl FileReader {
    fn new(entry: &DirEntry, bytes_per_sector: u32) -> Self {
        Self {
            first_cluster: entry.first_cluster(),
            size: entry.size(),
            position: 0,
            cluster: 0,
            sector_in_cluster: 0,
            buffer: SectorBuffer::new(bytes_per_sector as usize),
            loaded: false,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn remaining(&self) -> u32 {
        self.size - self.position
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.size
    }
}

/// Write cursor over one file
///
/// Must be handed back to [`Volume::close`]; dropping it loses the buffered
/// sector and leaves the directory entry with its old size.
pub struct FileWriter {
    short_slot: SlotPos,
    short: ShortEntry,
    first_cluster: u32,
    /// Last cluster of the chain; 0 while the file has none
    cluster: u32,
    /// Sector within `cluster` being filled; equal to sectors-per-cluster
    /// when the next byte needs a new cluster
    sector_in_cluster: u32,
    size: u32,
    /// Bytes of the current sector held in `buffer`
    fill: usize,
    buffer: SectorBuffer,
}

impl FileWriter {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }
}

impl<D: SectorStore> Volume<D> {
    /// Look up a regular file
    fn find_file(&mut self, name: &str, dir: u32) -> FatResult<DirEntry> {
        let entry = self.find(name, dir)?;
        if entry.is_directory() {
            return Err(FatError::IsDirectory);
        }
        Ok(entry)
    }

    /// Open `name` in `dir` for sequential reading
    pub fn open_for_read(&mut self, name: &str, dir: u32) -> FatResult<FileReader> {
        let entry = self.find_file(name, dir)?;
        log::debug!("open {} for read ({} bytes)", entry.name(), entry.size());
        Ok(FileReader::new(&entry, self.params.bytes_per_sector))
    }

    /// Consume up to `max` bytes of the current sector
    ///
    /// Returns the range of `reader.buffer` holding them; empty at end of
    /// file.
    fn next_chunk(&mut self, reader: &mut FileReader, max: usize) -> FatResult<(usize, usize)> {
        if reader.is_eof() || max == 0 {
            return Ok((0, 0));
        }

        if !reader.loaded {
            if reader.cluster == 0 {
                if reader.first_cluster == 0 {
                    return Err(FatError::TruncatedFile);
                }
                reader.cluster = reader.first_cluster;
                reader.sector_in_cluster = 0;
            } else if reader.sector_in_cluster == self.params.sectors_per_cluster {
                reader.cluster = match self.next_cluster(reader.cluster)? {
                    Some(next) => next,
                    None => {
                        log::warn!(
                            "chain ends with {} of {} bytes unread",
                            reader.remaining(),
                            reader.size
                        );
                        return Err(FatError::TruncatedFile);
                    }
                };
                reader.sector_in_cluster = 0;
            }
            let sector = self.first_sector_of(reader.cluster)? + reader.sector_in_cluster;
            self.disk.read(sector, &mut reader.buffer)?;
            reader.loaded = true;
        }

        let bytes_per_sector = self.params.bytes_per_sector;
        let start = (reader.position % bytes_per_sector) as usize;
        let len = (bytes_per_sector as usize - start)
            .min(reader.remaining() as usize)
            .min(max);

        reader.position += len as u32;
        if reader.position % bytes_per_sector == 0 {
            reader.loaded = false;
            reader.sector_in_cluster += 1;
        }
        Ok((start, len))
    }

    /// Read up to `buf.len()` bytes; fewer only at end of file
    pub fn read(&mut self, reader: &mut FileReader, buf: &mut [u8]) -> FatResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let (start, len) = self.next_chunk(reader, buf.len() - filled)?;
            if len == 0 {
                break;
            }
            buf[filled..filled + len].copy_from_slice(&reader.buffer.as_slice()[start..start + len]);
            filled += len;
        }
        Ok(filled)
    }

    /// Next block of the file, up to the end of the current sector
    ///
    /// The slice borrows the reader's buffer; an empty slice means end of
    /// file.
    pub fn read_block<'r>(&mut self, reader: &'r mut FileReader) -> FatResult<&'r [u8]> {
        let (start, len) = self.next_chunk(reader, usize::MAX)?;
        Ok(&reader.buffer.as_slice()[start..start + len])
    }

    /// Create `name` in `dir` and open it for writing
    ///
    /// An existing file of that name is deleted first.
    pub fn open_for_write(&mut self, name: &str, dir: u32) -> FatResult<FileWriter> {
        let dir = self.resolve_dir(dir);
        match self.find(name, dir) {
            Ok(existing) if existing.is_directory() => return Err(FatError::IsDirectory),
            Ok(existing) => {
                log::debug!("replacing {}", existing.name());
                self.remove_entry(&existing)?;
            }
            Err(FatError::NotFound) => {}
            Err(err) => return Err(err),
        }

        let first_cluster = self.allocate_cluster()?;
        let entry = match self.create_entry(dir, name, first_cluster) {
            Ok(entry) => entry,
            Err(err) => {
                self.release_cluster(first_cluster)?;
                return Err(err);
            }
        };
        log::debug!("open {} for write at cluster {}", name, first_cluster);

        Ok(FileWriter {
            short_slot: entry.short_slot(),
            short: *entry.short_entry(),
            first_cluster,
            cluster: first_cluster,
            sector_in_cluster: 0,
            size: 0,
            fill: 0,
            buffer: SectorBuffer::new(self.params.bytes_per_sector as usize),
        })
    }

    /// Open `name` in `dir` for writing at its current end
    pub fn open_for_append(&mut self, name: &str, dir: u32) -> FatResult<FileWriter> {
        let entry = self.find_file(name, dir)?;
        let size = entry.size();
        let first_cluster = entry.first_cluster();
        let mut writer = FileWriter {
            short_slot: entry.short_slot(),
            short: *entry.short_entry(),
            first_cluster,
            cluster: first_cluster,
            sector_in_cluster: 0,
            size,
            fill: 0,
            buffer: SectorBuffer::new(self.params.bytes_per_sector as usize),
        };

        if first_cluster == 0 {
            if size > 0 {
                return Err(FatError::TruncatedFile);
            }
            log::debug!("open {} for append (empty)", entry.name());
            return Ok(writer);
        }

        let bytes_per_cluster = self.params.bytes_per_cluster();
        let needed = (size / bytes_per_cluster + u32::from(size % bytes_per_cluster != 0)).max(1);
        if needed > self.params.total_clusters {
            return Err(FatError::TruncatedFile);
        }
        for _ in 1..needed {
            writer.cluster = self
                .next_cluster(writer.cluster)?
                .ok_or(FatError::TruncatedFile)?;
        }

        if let Some(surplus) = self.next_cluster(writer.cluster)? {
            log::warn!(
                "{} holds clusters past its {} bytes, releasing from {}",
                entry.name(),
                size,
                surplus
            );
            self.set_fat_entry(writer.cluster, FatEntry::EndOfChain)?;
            self.release_chain(surplus)?;
        }

        let offset = size - (needed - 1) * bytes_per_cluster;
        let bytes_per_sector = self.params.bytes_per_sector;
        writer.sector_in_cluster = offset / bytes_per_sector;
        writer.fill = (offset % bytes_per_sector) as usize;
        if writer.fill > 0 {
            let sector = self.first_sector_of(writer.cluster)? + writer.sector_in_cluster;
            self.disk.read(sector, &mut writer.buffer)?;
        }

        log::debug!(
            "open {} for append at {} (cluster {})",
            entry.name(),
            size,
            writer.cluster
        );
        Ok(writer)
    }

    /// Append `data` to the file
    pub fn write(&mut self, writer: &mut FileWriter, data: &[u8]) -> FatResult<()> {
        let fits = u32::try_from(data.len())
            .ok()
            .and_then(|len| writer.size.checked_add(len))
            .is_some();
        if !fits {
            return Err(FatError::FileTooLarge);
        }

        let bytes_per_sector = self.params.bytes_per_sector as usize;
        let mut rest = data;
        while !rest.is_empty() {
            if writer.cluster == 0 {
                let cluster = self.allocate_cluster()?;
                writer.first_cluster = cluster;
                writer.cluster = cluster;
                writer.sector_in_cluster = 0;
            } else if writer.sector_in_cluster == self.params.sectors_per_cluster {
                let cluster = self.allocate_cluster()?;
                self.set_fat_entry(writer.cluster, FatEntry::Next(cluster))?;
                writer.cluster = cluster;
                writer.sector_in_cluster = 0;
            }

            let len = (bytes_per_sector - writer.fill).min(rest.len());
            writer.buffer.as_mut_slice()[writer.fill..writer.fill + len].copy_from_slice(&rest[..len]);
            writer.fill += len;
            writer.size += len as u32;
            rest = &rest[len..];

            if writer.fill == bytes_per_sector {
                let sector = self.first_sector_of(writer.cluster)? + writer.sector_in_cluster;
                self.disk.write(sector, &writer.buffer)?;
                writer.fill = 0;
                writer.sector_in_cluster += 1;
            }
        }
        Ok(())
    }

    /// Flush the writer and record the final size in its directory entry
    pub fn close(&mut self, mut writer: FileWriter) -> FatResult<()> {
        if writer.fill > 0 {
            writer.buffer.as_mut_slice()[writer.fill..].fill(0);
            let sector = self.first_sector_of(writer.cluster)? + writer.sector_in_cluster;
            self.disk.write(sector, &writer.buffer)?;
        }

        if writer.size == 0 && writer.first_cluster != 0 {
            self.release_chain(writer.first_cluster)?;
            writer.first_cluster = 0;
        }

        let stamp = self.timestamp;
        let short = &mut writer.short;
        short.file_size = writer.size;
        short.first_cluster = writer.first_cluster;
        short.modified = stamp;
        short.accessed_date = stamp.date;
        short.attributes |= Attributes::ARCHIVE;
        let bytes = short.encode();
        self.write_slot(writer.short_slot, &bytes)?;
        self.flush()?;

        log::debug!(
            "closed {} ({} bytes, first cluster {})",
            writer.short.display_name(),
            writer.size,
            writer.first_cluster
        );
        Ok(())
    }

    /// Release an entry's chain and mark its slots deleted
    fn remove_entry(&mut self, entry: &DirEntry) -> FatResult<()> {
        let released = self.release_chain(entry.first_cluster())?;
        self.mark_deleted(entry)?;
        log::debug!("removed {} ({} clusters)", entry.name(), released);
        Ok(())
    }

    /// Delete file `name` from `dir`
    pub fn delete_file(&mut self, name: &str, dir: u32) -> FatResult<()> {
        let entry = self.find_file(name, dir)?;
        self.remove_entry(&entry)?;
        self.flush()
    }
}
