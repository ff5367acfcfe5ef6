//! Directory iteration and slot management
//!
//! A directory is a cluster chain of 32-byte slots. [`DirIter`] walks the
//! slots lazily, skipping deleted ones, combining long-name runs with their
//! short entry and stopping at the first never-used slot.

use super::dir_entry::{
    checksum, is_long_name_attr, long_name_entries, names_equal, Attributes, DosDateTime,
    FileName, LongEntry, LongNameAssembler, ShortEntry, ShortName, ShortNameBasis, DIR_ENTRY_SIZE,
    MAX_LFN_ENTRIES, SLOT_DELETED, SLOT_END,
};
use super::fat::FatEntry;
use super::Volume;
use crate::error::{FatError, FatResult};
use crate::storage::SectorStore;

/// Highest numeric tail tried for a short name
const MAX_NUMERIC_TAIL: u32 = 999;

/// Position of one 32-byte slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPos {
    /// Directory cluster holding the slot
    pub cluster: u32,
    /// Slot index within the cluster
    pub index: u32,
}

/// A materialized directory entry
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Long name if a valid long-name run preceded the entry, else `NAME.EXT`
    name: FileName,
    has_long_name: bool,
    short: ShortEntry,
    /// First slot of the entry (the first long-name record, if any)
    first_slot: SlotPos,
    /// Slot of the short entry
    short_slot: SlotPos,
    /// Long-name records directly before the short entry, orphans included
    lfn_count: u32,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The 8.3 name as `NAME.EXT`
    pub fn short_name(&self) -> ShortName {
        self.short.display_name()
    }

    pub fn has_long_name(&self) -> bool {
        self.has_long_name
    }

    pub fn short_entry(&self) -> &ShortEntry {
        &self.short
    }

    pub fn attributes(&self) -> Attributes {
        self.short.attributes
    }

    pub fn is_directory(&self) -> bool {
        self.short.is_directory()
    }

    pub fn size(&self) -> u32 {
        self.short.file_size
    }

    pub fn first_cluster(&self) -> u32 {
        self.short.first_cluster
    }

    pub fn modified(&self) -> DosDateTime {
        self.short.modified
    }

    pub(crate) fn short_slot(&self) -> SlotPos {
        self.short_slot
    }

    /// True if `name` matches the long or the short name, ignoring case
    pub fn matches(&self, name: &str) -> bool {
        names_equal(&self.name, name) || names_equal(&self.short.display_name(), name)
    }
}

enum IterState {
    ReadingCluster,
    AdvancingCluster,
    Exhausted,
}

/// Lazy iterator over the entries of one directory
///
/// Yields `Err(MalformedEntry)` for a slot that fails validation and then
/// continues; storage and chain errors end the iteration.
pub struct DirIter<'a, D: SectorStore> {
    volume: &'a mut Volume<D>,
    state: IterState,
    pos: SlotPos,
    /// Volume sector currently held in the volume's scratch buffer
    loaded: Option<u32>,
    assembler: LongNameAssembler,
    /// First of the long-name slots seen since the last short entry
    run_start: Option<SlotPos>,
    run_len: u32,
    skip_dot_entries: bool,
    clusters_seen: u32,
}

impl<D: SectorStore> DirIter<'_, D> {
    fn fail(&mut self, err: FatError) -> Option<FatResult<DirEntry>> {
        self.state = IterState::Exhausted;
        Some(Err(err))
    }
}

impl<D: SectorStore> Iterator for DirIter<'_, D> {
    type Item = FatResult<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                IterState::Exhausted => return None,
                IterState::AdvancingCluster => {
                    self.clusters_seen += 1;
                    if self.clusters_seen > self.volume.params.total_clusters {
                        log::error!("directory chain loops at cluster {}", self.pos.cluster);
                        return self.fail(FatError::InvalidCluster(self.pos.cluster));
                    }
                    match self.volume.next_cluster(self.pos.cluster) {
                        Ok(Some(next)) => {
                            self.pos = SlotPos { cluster: next, index: 0 };
                            self.state = IterState::ReadingCluster;
                        }
                        Ok(None) => {
                            self.state = IterState::Exhausted;
                            return None;
                        }
                        Err(err) => return self.fail(err),
                    }
                }
                IterState::ReadingCluster => {
                    if self.pos.index >= self.volume.params.slots_per_cluster() {
                        self.state = IterState::AdvancingCluster;
                        continue;
                    }
                    let here = self.pos;
                    let slot = match self.volume.read_slot(here, &mut self.loaded) {
                        Ok(slot) => slot,
                        Err(err) => return self.fail(err),
                    };
                    self.pos.index += 1;

                    match slot[0] {
                        SLOT_END => {
                            self.state = IterState::Exhausted;
                            return None;
                        }
                        SLOT_DELETED => {
                            self.assembler.clear();
                            self.run_start = None;
                            continue;
                        }
                        _ => {}
                    }

                    if is_long_name_attr(slot[11]) {
                        if self.run_start.is_none() {
                            self.run_start = Some(here);
                            self.run_len = 0;
                        }
                        self.run_len += 1;
                        match LongEntry::decode(&slot) {
                            Ok(entry) => {
                                self.assembler.push(&entry);
                            }
                            Err(_) => {
                                log::warn!("malformed long-name record at {:?}", here);
                                self.assembler.clear();
                            }
                        }
                        continue;
                    }

                    let short = match ShortEntry::decode(&slot) {
                        Ok(short) => short,
                        Err(err) => {
                            self.assembler.clear();
                            self.run_start = None;
                            return Some(Err(err));
                        }
                    };
                    let long_name = self.assembler.finish(&short.name);
                    let run_start = self.run_start.take();

                    if short.is_volume_label() || (self.skip_dot_entries && short.is_dot_entry()) {
                        continue;
                    }

                    // Orphaned records still belong to this slot range for deletion.
                    let (first_slot, lfn_count) = match run_start {
                        Some(start) => (start, self.run_len),
                        None => (here, 0),
                    };
                    let has_long_name = long_name.is_some();
                    let name = match long_name {
                        Some(name) => name,
                        None => {
                            let mut name = FileName::new();
                            if name.push_str(&short.display_name()).is_err() {
                                return Some(Err(FatError::MalformedEntry));
                            }
                            name
                        }
                    };
                    return Some(Ok(DirEntry {
                        has_long_name,
                        name,
                        short,
                        first_slot,
                        short_slot: here,
                        lfn_count,
                    }));
                }
            }
        }
    }
}

impl<D: SectorStore> Volume<D> {
    fn entries(&mut self, dir: u32, skip_dot_entries: bool) -> DirIter<'_, D> {
        let cluster = self.resolve_dir(dir);
        DirIter {
            volume: self,
            state: IterState::ReadingCluster,
            pos: SlotPos { cluster, index: 0 },
            loaded: None,
            assembler: LongNameAssembler::new(),
            run_start: None,
            run_len: 0,
            skip_dot_entries,
            clusters_seen: 0,
        }
    }

    /// Lazily list the entries of the directory starting at `dir`
    ///
    /// Volume labels and the `.`/`..` entries are not listed.
    pub fn list_directory(&mut self, dir: u32) -> DirIter<'_, D> {
        self.entries(dir, true)
    }

    /// Find `name` in `dir`, matching long or short name case-insensitively
    pub fn find(&mut self, name: &str, dir: u32) -> FatResult<DirEntry> {
        for entry in self.entries(dir, false) {
            match entry {
                Ok(entry) if entry.matches(name) => return Ok(entry),
                Ok(_) => {}
                Err(FatError::MalformedEntry) => {
                    log::warn!("skipping malformed entry while looking up {}", name);
                }
                Err(err) => return Err(err),
            }
        }
        Err(FatError::NotFound)
    }

    /// True if `name` exists in `dir`
    pub fn exists(&mut self, name: &str, dir: u32) -> FatResult<bool> {
        match self.find(name, dir) {
            Ok(_) => Ok(true),
            Err(FatError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// First cluster of subdirectory `name` in `dir`
    pub fn open_directory(&mut self, name: &str, dir: u32) -> FatResult<u32> {
        let entry = self.find(name, dir)?;
        if !entry.is_directory() {
            return Err(FatError::NotADirectory);
        }
        Ok(self.resolve_dir(entry.first_cluster()))
    }

    /// Volume sector and byte offset of a slot
    fn slot_location(&self, pos: SlotPos) -> FatResult<(u32, usize)> {
        let byte = pos.index * DIR_ENTRY_SIZE as u32;
        let sector = self.first_sector_of(pos.cluster)? + byte / self.params.bytes_per_sector;
        Ok((sector, (byte % self.params.bytes_per_sector) as usize))
    }

    /// Read one slot through the scratch buffer, reusing it if `loaded`
    /// already names the right sector
    fn read_slot(&mut self, pos: SlotPos, loaded: &mut Option<u32>) -> FatResult<[u8; DIR_ENTRY_SIZE]> {
        let (sector, offset) = self.slot_location(pos)?;
        if *loaded != Some(sector) {
            *loaded = None;
            self.disk.read(sector, &mut self.scratch)?;
            *loaded = Some(sector);
        }
        let mut slot = [0u8; DIR_ENTRY_SIZE];
        slot.copy_from_slice(&self.scratch.as_slice()[offset..offset + DIR_ENTRY_SIZE]);
        Ok(slot)
    }

    /// Read-modify-write one slot
    fn update_slot<F>(&mut self, pos: SlotPos, update: F) -> FatResult<()>
    where
        F: FnOnce(&mut [u8]),
    {
        let (sector, offset) = self.slot_location(pos)?;
        self.disk.read(sector, &mut self.scratch)?;
        update(&mut self.scratch.as_mut_slice()[offset..offset + DIR_ENTRY_SIZE]);
        self.disk.write(sector, &self.scratch)
    }

    pub(crate) fn write_slot(&mut self, pos: SlotPos, bytes: &[u8; DIR_ENTRY_SIZE]) -> FatResult<()> {
        self.update_slot(pos, |slot| slot.copy_from_slice(bytes))
    }

    /// Slot after `pos`, following the directory chain
    fn next_slot(&mut self, pos: SlotPos) -> FatResult<Option<SlotPos>> {
        if pos.index + 1 < self.params.slots_per_cluster() {
            return Ok(Some(SlotPos {
                cluster: pos.cluster,
                index: pos.index + 1,
            }));
        }
        Ok(self
            .next_cluster(pos.cluster)?
            .map(|cluster| SlotPos { cluster, index: 0 }))
    }

    /// Append a zeroed cluster to the directory chain ending at `last`
    fn extend_directory(&mut self, last: u32) -> FatResult<u32> {
        let cluster = self.allocate_cluster()?;
        if let Err(err) = self.zero_cluster(cluster) {
            self.release_cluster(cluster)?;
            return Err(err);
        }
        self.set_fat_entry(last, FatEntry::Next(cluster))?;
        log::debug!("directory extended with cluster {}", cluster);
        Ok(cluster)
    }

    /// Find `count` consecutive free slots in `dir`, growing it if needed
    fn reserve_slots(&mut self, dir: u32, count: usize) -> FatResult<SlotPos> {
        let mut pos = SlotPos { cluster: dir, index: 0 };
        let mut loaded = None;
        let mut run_start = None;
        let mut run_len = 0;
        let mut past_end = false;
        let mut clusters_seen = 1;

        loop {
            let mut free = past_end;
            if !past_end {
                let first_byte = self.read_slot(pos, &mut loaded)?[0];
                past_end = first_byte == SLOT_END;
                free = past_end || first_byte == SLOT_DELETED;
            }
            if free {
                let start = *run_start.get_or_insert(pos);
                run_len += 1;
                if run_len == count {
                    return Ok(start);
                }
            } else {
                run_start = None;
                run_len = 0;
            }

            pos = match self.next_slot(pos)? {
                Some(next) => {
                    if next.cluster != pos.cluster {
                        clusters_seen += 1;
                        if clusters_seen > self.params.total_clusters {
                            log::error!("directory chain from {} loops", dir);
                            return Err(FatError::InvalidCluster(next.cluster));
                        }
                    }
                    next
                }
                None => {
                    let cluster = self.extend_directory(pos.cluster)?;
                    loaded = None;
                    past_end = true;
                    SlotPos { cluster, index: 0 }
                }
            };
        }
    }

    /// Pick a short name for `basis` that no entry in `dir` uses
    fn unique_short_name(&mut self, dir: u32, basis: &ShortNameBasis) -> FatResult<[u8; 11]> {
        let plain = basis.name();
        let mut plain_taken = false;
        let mut tails = [0u64; (MAX_NUMERIC_TAIL as usize + 64) / 64];

        for entry in self.entries(dir, false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(FatError::MalformedEntry) => continue,
                Err(err) => return Err(err),
            };
            let name = &entry.short_entry().name;
            if *name == plain {
                plain_taken = true;
            }
            if let Some(n) = numeric_tail(name) {
                if n <= MAX_NUMERIC_TAIL && basis.with_tail(n) == *name {
                    tails[n as usize / 64] |= 1 << (n % 64);
                }
            }
        }

        if !basis.lossy && !plain_taken {
            return Ok(plain);
        }
        (1..=MAX_NUMERIC_TAIL)
            .find(|&n| tails[n as usize / 64] & (1 << (n % 64)) == 0)
            .map(|n| basis.with_tail(n))
            .ok_or(FatError::AlreadyExists)
    }

    /// Create a directory entry (plus long-name records) for a new file
    pub(crate) fn create_entry(&mut self, dir: u32, name: &str, first_cluster: u32) -> FatResult<DirEntry> {
        let dir = self.resolve_dir(dir);
        let basis = ShortNameBasis::derive(name)?;
        let mut file_name = FileName::new();
        file_name.push_str(name).map_err(|_| FatError::NameTooLong)?;
        let short_name = self.unique_short_name(dir, &basis)?;

        let long_entries = if basis.needs_long_name() || short_name != basis.name() {
            long_name_entries(name, checksum(&short_name))?
        } else {
            heapless::Vec::<LongEntry, MAX_LFN_ENTRIES>::new()
        };

        let first_slot = self.reserve_slots(dir, long_entries.len() + 1)?;
        let mut pos = first_slot;
        for entry in long_entries.iter() {
            self.write_slot(pos, &entry.encode())?;
            pos = self
                .next_slot(pos)?
                .ok_or(FatError::InvalidCluster(pos.cluster))?;
        }
        let short = ShortEntry::new_file(short_name, first_cluster, self.timestamp);
        self.write_slot(pos, &short.encode())?;

        log::debug!("created entry {} ({} long-name records)", name, long_entries.len());
        Ok(DirEntry {
            name: file_name,
            has_long_name: !long_entries.is_empty(),
            short,
            first_slot,
            short_slot: pos,
            lfn_count: long_entries.len() as u32,
        })
    }

    /// Mark the entry's long-name records and short entry deleted
    pub(crate) fn mark_deleted(&mut self, entry: &DirEntry) -> FatResult<()> {
        let mut pos = entry.first_slot;
        for _ in 0..entry.lfn_count {
            self.update_slot(pos, |slot| slot[0] = SLOT_DELETED)?;
            pos = self
                .next_slot(pos)?
                .ok_or(FatError::InvalidCluster(pos.cluster))?;
        }
        self.update_slot(entry.short_slot, |slot| slot[0] = SLOT_DELETED)
    }
}

/// Numeric tail `n` of a short name of the form `BASE~n`
fn numeric_tail(name: &[u8; 11]) -> Option<u32> {
    let base = &name[..8];
    let tilde = base.iter().rposition(|&b| b == b'~')?;
    let digits = base[tilde + 1..]
        .iter()
        .take_while(|&&b| b != b' ')
        .try_fold(0u32, |value, &b| {
            b.is_ascii_digit()
                .then(|| value * 10 + (b - b'0') as u32)
        })?;
    (digits > 0).then_some(digits)
}
