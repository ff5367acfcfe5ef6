//! Directory entry codec
//!
//! Encodes and decodes the 32-byte short (8.3) and long-filename records,
//! computes the short-name checksum that links them, and derives 8.3 names
//! from arbitrary long names.
//!
//! All fields are extracted by explicit byte offset and little-endian
//! conversion.

use super::boot::{read_u16, read_u32, write_u16, write_u32};
use crate::error::{FatError, FatResult};

/// Size of one directory slot
pub const DIR_ENTRY_SIZE: usize = 32;
/// First name byte of a never-used slot; no entries follow it
pub const SLOT_END: u8 = 0x00;
/// First name byte of a deleted slot
pub const SLOT_DELETED: u8 = 0xE5;
/// Stand-in first byte for names that really start with 0xE5
const SLOT_KANJI_E5: u8 = 0x05;
/// Ordinal flag on the physically first (logically last) long-name record
pub const LFN_LAST_ENTRY: u8 = 0x40;
/// UTF-16 code units carried by one long-name record
pub const LFN_CHARS_PER_ENTRY: usize = 13;
/// Longest long filename in UTF-16 code units
pub const MAX_LONG_NAME: usize = 255;
/// Long-name records needed for the longest name
pub const MAX_LFN_ENTRIES: usize = (MAX_LONG_NAME + LFN_CHARS_PER_ENTRY - 1) / LFN_CHARS_PER_ENTRY;
/// UTF-8 capacity of a decoded long filename
pub const NAME_CAPACITY: usize = MAX_LONG_NAME * 3;

/// Decoded file name
pub type FileName = heapless::String<NAME_CAPACITY>;
/// UTF-8 capacity of a rendered 8.3 name; Latin-1 chars take at most 2 bytes
pub const SHORT_NAME_CAPACITY: usize = 24;
/// Rendered `NAME.EXT`
pub type ShortName = heapless::String<SHORT_NAME_CAPACITY>;

/// NT case flag: base name stored uppercase, shown lowercase
const NT_LOWER_BASE: u8 = 0x08;
/// NT case flag: extension stored uppercase, shown lowercase
const NT_LOWER_EXT: u8 = 0x10;

/// Byte offsets of the 13 UTF-16 units inside a long-name record
const LFN_UNIT_OFFSETS: [usize; LFN_CHARS_PER_ENTRY] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

/// Characters other than letters and digits allowed in 8.3 names
const SHORT_NAME_SPECIALS: &[u8] = b"$%'-_@~`!(){}^#&";
/// Characters never allowed in any file name
const FORBIDDEN_CHARS: &[char] = &['"', '*', '/', ':', '<', '>', '?', '\\', '|'];

bitflags::bitflags! {
    /// FAT32 file attributes
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const LONG_NAME = 0x0F; // READ_ONLY | HIDDEN | SYSTEM | VOLUME_ID
    }
}

/// True when a raw attribute byte frames a long-name record
pub fn is_long_name_attr(attr: u8) -> bool {
    attr & 0x3F == Attributes::LONG_NAME.bits()
}

/// Packed DOS date and time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00
    pub const EPOCH: Self = Self {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// Pack a calendar time; years outside 1980..=2107 are clamped
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        let year = year.clamp(1980, 2107) - 1980;
        Self {
            date: (year << 9) | ((month as u16 & 0x0F) << 5) | (day as u16 & 0x1F),
            time: ((hour as u16 & 0x1F) << 11)
                | ((minute as u16 & 0x3F) << 5)
                | ((second as u16 / 2) & 0x1F),
        }
    }

    pub fn year(&self) -> u16 {
        1980 + (self.date >> 9)
    }

    pub fn month(&self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    pub fn day(&self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub fn hour(&self) -> u8 {
        (self.time >> 11) as u8
    }

    pub fn minute(&self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    pub fn second(&self) -> u8 {
        ((self.time & 0x1F) * 2) as u8
    }
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::EPOCH
    }
}

/// Short (8.3) directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortEntry {
    /// Space-padded base (8) and extension (3)
    pub name: [u8; 11],
    pub attributes: Attributes,
    pub nt_reserved: u8,
    pub create_time_tenth: u8,
    pub created: DosDateTime,
    pub accessed_date: u16,
    pub modified: DosDateTime,
    /// 0 for an empty file
    pub first_cluster: u32,
    /// Always 0 for directories
    pub file_size: u32,
}

impl ShortEntry {
    /// Fresh archive entry for a new file
    pub fn new_file(name: [u8; 11], first_cluster: u32, stamp: DosDateTime) -> Self {
        Self {
            name,
            attributes: Attributes::ARCHIVE,
            nt_reserved: 0,
            create_time_tenth: 0,
            created: stamp,
            accessed_date: stamp.date,
            modified: stamp,
            first_cluster,
            file_size: 0,
        }
    }

    /// Decode a 32-byte short entry
    pub fn decode(bytes: &[u8]) -> FatResult<Self> {
        if bytes.len() < DIR_ENTRY_SIZE {
            return Err(FatError::MalformedEntry);
        }
        let attr = bytes[11];
        if is_long_name_attr(attr) {
            return Err(FatError::MalformedEntry);
        }
        let attributes = Attributes::from_bits_truncate(attr);
        if attributes.contains(Attributes::DIRECTORY | Attributes::VOLUME_ID) {
            return Err(FatError::MalformedEntry);
        }

        let mut name = [0u8; 11];
        name.copy_from_slice(&bytes[0..11]);
        Ok(Self {
            name,
            attributes,
            nt_reserved: bytes[12],
            create_time_tenth: bytes[13],
            created: DosDateTime {
                time: read_u16(bytes, 14),
                date: read_u16(bytes, 16),
            },
            accessed_date: read_u16(bytes, 18),
            modified: DosDateTime {
                time: read_u16(bytes, 22),
                date: read_u16(bytes, 24),
            },
            first_cluster: ((read_u16(bytes, 20) as u32) << 16) | read_u16(bytes, 26) as u32,
            file_size: read_u32(bytes, 28),
        })
    }

    /// Encode into a 32-byte slot
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut bytes = [0u8; DIR_ENTRY_SIZE];
        bytes[0..11].copy_from_slice(&self.name);
        bytes[11] = self.attributes.bits();
        bytes[12] = self.nt_reserved;
        bytes[13] = self.create_time_tenth;
        write_u16(&mut bytes, 14, self.created.time);
        write_u16(&mut bytes, 16, self.created.date);
        write_u16(&mut bytes, 18, self.accessed_date);
        write_u16(&mut bytes, 20, (self.first_cluster >> 16) as u16);
        write_u16(&mut bytes, 22, self.modified.time);
        write_u16(&mut bytes, 24, self.modified.date);
        write_u16(&mut bytes, 26, (self.first_cluster & 0xFFFF) as u16);
        write_u32(&mut bytes, 28, self.file_size);
        bytes
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes.contains(Attributes::VOLUME_ID)
    }

    /// `.` or `..`
    pub fn is_dot_entry(&self) -> bool {
        self.name[0] == b'.'
    }

    /// `NAME.EXT` rendering of the 8.3 name
    ///
    /// Bytes above 0x7F map to the Latin-1 char of the same value. The NT
    /// case flags in byte 12 lowercase the base and extension.
    pub fn display_name(&self) -> ShortName {
        let lower_base = self.nt_reserved & NT_LOWER_BASE != 0;
        let lower_ext = self.nt_reserved & NT_LOWER_EXT != 0;
        let mut out = ShortName::new();
        let mut push = |byte: u8, lower: bool| {
            let byte = if lower { byte.to_ascii_lowercase() } else { byte };
            // 11 name bytes and a dot never exceed SHORT_NAME_CAPACITY.
            let pushed = out.push(byte as char);
            debug_assert!(pushed.is_ok());
        };

        for (i, &byte) in self.name[..8].iter().enumerate() {
            if byte == b' ' {
                break;
            }
            push(if i == 0 && byte == SLOT_KANJI_E5 { SLOT_DELETED } else { byte }, lower_base);
        }
        if self.name[8] != b' ' {
            push(b'.', false);
            self.name[8..]
                .iter()
                .take_while(|&&byte| byte != b' ')
                .for_each(|&byte| push(byte, lower_ext));
        }
        out
    }
}

/// Long-filename directory record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongEntry {
    /// Sequence number (1-based) with [`LFN_LAST_ENTRY`] on the final fragment
    pub ordinal: u8,
    /// Checksum of the paired short name
    pub checksum: u8,
    /// Name fragment, 0x0000-terminated and 0xFFFF-padded
    pub units: [u16; LFN_CHARS_PER_ENTRY],
}

impl LongEntry {
    pub fn sequence(&self) -> u8 {
        self.ordinal & 0x1F
    }

    pub fn is_last(&self) -> bool {
        self.ordinal & LFN_LAST_ENTRY != 0
    }

    /// Decode a 32-byte long-name record
    pub fn decode(bytes: &[u8]) -> FatResult<Self> {
        if bytes.len() < DIR_ENTRY_SIZE || !is_long_name_attr(bytes[11]) {
            return Err(FatError::MalformedEntry);
        }
        let ordinal = bytes[0];
        let sequence = ordinal & 0x1F;
        if sequence == 0 || sequence as usize > MAX_LFN_ENTRIES {
            return Err(FatError::MalformedEntry);
        }
        if bytes[12] != 0 || read_u16(bytes, 26) != 0 {
            return Err(FatError::MalformedEntry);
        }

        let mut units = [0u16; LFN_CHARS_PER_ENTRY];
        for (unit, &offset) in units.iter_mut().zip(LFN_UNIT_OFFSETS.iter()) {
            *unit = read_u16(bytes, offset);
        }
        Ok(Self {
            ordinal,
            checksum: bytes[13],
            units,
        })
    }

    /// Encode into a 32-byte slot
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut bytes = [0u8; DIR_ENTRY_SIZE];
        bytes[0] = self.ordinal;
        bytes[11] = Attributes::LONG_NAME.bits();
        bytes[13] = self.checksum;
        for (&unit, &offset) in self.units.iter().zip(LFN_UNIT_OFFSETS.iter()) {
            write_u16(&mut bytes, offset, unit);
        }
        bytes
    }
}

/// Short-name checksum stored in every long-name record
pub fn checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &byte| sum.rotate_right(1).wrapping_add(byte))
}

/// Long-name records for `name`, in on-disk order (highest ordinal first)
pub fn long_name_entries(
    name: &str,
    checksum: u8,
) -> FatResult<heapless::Vec<LongEntry, MAX_LFN_ENTRIES>> {
    let mut units: heapless::Vec<u16, MAX_LONG_NAME> = heapless::Vec::new();
    for unit in name.encode_utf16() {
        units.push(unit).map_err(|_| FatError::NameTooLong)?;
    }
    if units.is_empty() {
        return Err(FatError::InvalidName);
    }

    let count = (units.len() + LFN_CHARS_PER_ENTRY - 1) / LFN_CHARS_PER_ENTRY;
    let mut entries = heapless::Vec::new();
    for sequence in (1..=count).rev() {
        let start = (sequence - 1) * LFN_CHARS_PER_ENTRY;
        let mut fragment = [0xFFFFu16; LFN_CHARS_PER_ENTRY];
        for (i, unit) in fragment.iter_mut().enumerate() {
            let index = start + i;
            if index < units.len() {
                *unit = units[index];
            } else if index == units.len() {
                *unit = 0x0000;
            }
        }
        let mut ordinal = sequence as u8;
        if sequence == count {
            ordinal |= LFN_LAST_ENTRY;
        }
        entries
            .push(LongEntry {
                ordinal,
                checksum,
                units: fragment,
            })
            .map_err(|_| FatError::NameTooLong)?;
    }
    Ok(entries)
}

/// Collects a run of long-name records until its short entry arrives
///
/// Records are expected in on-disk order: the one flagged
/// [`LFN_LAST_ENTRY`] first, ordinals descending to 1, all sharing one
/// checksum. Anything else discards the run.
pub struct LongNameAssembler {
    units: [u16; MAX_LFN_ENTRIES * LFN_CHARS_PER_ENTRY],
    total: u8,
    expected: u8,
    checksum: u8,
    active: bool,
}

impl LongNameAssembler {
    pub const fn new() -> Self {
        Self {
            units: [0; MAX_LFN_ENTRIES * LFN_CHARS_PER_ENTRY],
            total: 0,
            expected: 0,
            checksum: 0,
            active: false,
        }
    }

    pub fn clear(&mut self) {
        self.active = false;
        self.total = 0;
        self.expected = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Add the next record; returns false if it broke the run
    pub fn push(&mut self, entry: &LongEntry) -> bool {
        let sequence = entry.sequence();
        if entry.is_last() {
            if self.active {
                log::warn!("long-name run restarted before its short entry");
            }
            self.active = true;
            self.total = sequence;
            self.expected = sequence;
            self.checksum = entry.checksum;
        } else if !self.active || sequence != self.expected || entry.checksum != self.checksum {
            log::warn!("orphaned long-name fragment (ordinal {:#x})", entry.ordinal);
            self.clear();
            return false;
        }

        let start = (sequence as usize - 1) * LFN_CHARS_PER_ENTRY;
        self.units[start..start + LFN_CHARS_PER_ENTRY].copy_from_slice(&entry.units);
        self.expected = sequence - 1;
        true
    }

    /// Close the run against its short entry
    ///
    /// Returns the long name only if the run is complete and its checksum
    /// matches `short_name`.
    pub fn finish(&mut self, short_name: &[u8; 11]) -> Option<FileName> {
        if !self.active {
            return None;
        }
        let complete = self.expected == 0;
        let matches = self.checksum == checksum(short_name);
        let total = self.total as usize * LFN_CHARS_PER_ENTRY;
        self.clear();

        if !complete || !matches {
            log::warn!(
                "discarding long name (complete={}, checksum match={})",
                complete,
                matches
            );
            return None;
        }

        let units = &self.units[..total];
        let len = units.iter().position(|&unit| unit == 0).unwrap_or(total);
        let mut name = FileName::new();
        for ch in char::decode_utf16(units[..len].iter().copied()) {
            if name.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER)).is_err() {
                log::warn!("discarding long name longer than {} units", MAX_LONG_NAME);
                return None;
            }
        }
        Some(name)
    }
}

impl Default for LongNameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a long name for characters FAT cannot store
pub fn validate_long_name(name: &str) -> FatResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FatError::InvalidName);
    }
    if name.chars().any(|c| (c as u32) < 0x20 || FORBIDDEN_CHARS.contains(&c)) {
        return Err(FatError::InvalidName);
    }
    if name.encode_utf16().count() > MAX_LONG_NAME {
        return Err(FatError::NameTooLong);
    }
    Ok(())
}

/// Uppercase 8.3 candidate derived from a long name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortNameBasis {
    base: [u8; 8],
    base_len: usize,
    ext: [u8; 3],
    /// Information was lost (truncation, replacement or stripping)
    pub lossy: bool,
    /// Name contained lowercase letters
    pub mixed_case: bool,
}

impl ShortNameBasis {
    /// Derive the basis name for `long_name`
    pub fn derive(long_name: &str) -> FatResult<Self> {
        validate_long_name(long_name)?;

        let stripped = long_name.trim_start_matches(|c: char| c == '.' || c == ' ');
        let mut lossy = stripped.len() != long_name.len();
        let (base_part, ext_part) = match stripped.rfind('.') {
            Some(dot) => {
                if dot + 1 == stripped.len() {
                    lossy = true;
                }
                (&stripped[..dot], &stripped[dot + 1..])
            }
            None => (stripped, ""),
        };

        let mut basis = Self {
            base: [b' '; 8],
            base_len: 0,
            ext: [b' '; 3],
            lossy,
            mixed_case: long_name.chars().any(|c| c.is_lowercase()),
        };

        let mut ext_len = 0;
        lossy |= Self::fill(base_part, &mut basis.base, &mut basis.base_len);
        lossy |= Self::fill(ext_part, &mut basis.ext, &mut ext_len);
        if basis.base_len == 0 {
            basis.base[0] = b'_';
            basis.base_len = 1;
            lossy = true;
        }
        basis.lossy = lossy;
        Ok(basis)
    }

    /// Copy legal 8.3 characters of `part` into `out`; true if lossy
    fn fill(part: &str, out: &mut [u8], len: &mut usize) -> bool {
        let mut lossy = false;
        for c in part.chars() {
            if c == ' ' || c == '.' {
                lossy = true;
                continue;
            }
            if *len == out.len() {
                return true;
            }
            let upper = c.to_ascii_uppercase();
            let legal = upper.is_ascii()
                && (upper.is_ascii_alphanumeric() || SHORT_NAME_SPECIALS.contains(&(upper as u8)));
            out[*len] = if legal {
                upper as u8
            } else {
                lossy = true;
                b'_'
            };
            *len += 1;
        }
        lossy
    }

    /// The basis itself, without a numeric tail
    pub fn name(&self) -> [u8; 11] {
        let mut name = [b' '; 11];
        name[..8].copy_from_slice(&self.base);
        name[8..].copy_from_slice(&self.ext);
        name
    }

    /// Basis with `~n` tail, base truncated so the tail fits in 8 bytes
    pub fn with_tail(&self, n: u32) -> [u8; 11] {
        let mut digits = [0u8; 10];
        let mut count = 0;
        let mut value = n;
        loop {
            digits[count] = b'0' + (value % 10) as u8;
            count += 1;
            value /= 10;
            if value == 0 {
                break;
            }
        }

        let tail_len = count + 1;
        let keep = self.base_len.min(8usize.saturating_sub(tail_len));
        let mut name = [b' '; 11];
        name[..keep].copy_from_slice(&self.base[..keep]);
        name[keep] = b'~';
        for i in 0..count {
            name[keep + 1 + i] = digits[count - 1 - i];
        }
        name[8..].copy_from_slice(&self.ext);
        name
    }

    /// Whether a long-name group must accompany the short entry
    pub fn needs_long_name(&self) -> bool {
        self.lossy || self.mixed_case
    }
}

/// Case-insensitive file name comparison
pub fn names_equal(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_reference_value() {
        // Reference values of the FAT ChkSum() routine.
        assert_eq!(checksum(b"README  TXT"), 0x73);
        assert_eq!(checksum(b"           "), 0xF7);
        assert_eq!(checksum(&[0u8; 11]), 0);
    }

    #[test]
    fn test_short_entry_layout() {
        let entry = ShortEntry {
            name: *b"HELLO   TXT",
            attributes: Attributes::ARCHIVE | Attributes::READ_ONLY,
            nt_reserved: 0,
            create_time_tenth: 100,
            created: DosDateTime::new(2011, 5, 17, 13, 45, 30),
            accessed_date: 0x1234,
            modified: DosDateTime { date: 0x4321, time: 0x8765 },
            first_cluster: 0x0012_3456,
            file_size: 0xDEAD_BEEF,
        };
        let bytes = entry.encode();
        assert_eq!(&bytes[0..11], b"HELLO   TXT");
        assert_eq!(bytes[11], 0x21);
        assert_eq!(bytes[13], 100);
        assert_eq!(&bytes[18..20], &[0x34, 0x12]);
        assert_eq!(&bytes[20..22], &[0x12, 0x00]);
        assert_eq!(&bytes[22..24], &[0x65, 0x87]);
        assert_eq!(&bytes[24..26], &[0x21, 0x43]);
        assert_eq!(&bytes[26..28], &[0x56, 0x34]);
        assert_eq!(&bytes[28..32], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(ShortEntry::decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_short_decode_rejects_long_framing() {
        let mut bytes = [0u8; 32];
        bytes[11] = 0x0F;
        assert_eq!(ShortEntry::decode(&bytes), Err(FatError::MalformedEntry));
        bytes[11] = 0x18;
        assert_eq!(ShortEntry::decode(&bytes), Err(FatError::MalformedEntry));
        assert_eq!(ShortEntry::decode(&bytes[..31]), Err(FatError::MalformedEntry));
    }

    #[test]
    fn test_long_entry_layout() {
        let entries = long_name_entries("Hello world.txt", 0xAB).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ordinal, 0x42);
        assert_eq!(entries[1].ordinal, 0x01);

        let bytes = entries[1].encode();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[11], 0x0F);
        assert_eq!(bytes[12], 0);
        assert_eq!(bytes[13], 0xAB);
        assert_eq!(&bytes[1..3], &[b'H', 0]);
        assert_eq!(&bytes[14..16], &[b' ', 0]);
        assert_eq!(&bytes[28..30], &[b'.', 0]);
        assert_eq!(&bytes[30..32], &[b't', 0]);
        assert_eq!(&bytes[26..28], &[0, 0]);

        let tail = entries[0].encode();
        assert_eq!(&tail[1..3], &[b'x', 0]);
        assert_eq!(&tail[3..5], &[b't', 0]);
        assert_eq!(&tail[5..7], &[0, 0]);
        assert_eq!(&tail[7..9], &[0xFF, 0xFF]);
        assert_eq!(&tail[30..32], &[0xFF, 0xFF]);

        assert_eq!(LongEntry::decode(&bytes).unwrap(), entries[1]);
    }

    #[test]
    fn test_long_decode_validation() {
        let mut bytes = long_name_entries("a", 1).unwrap()[0].encode();
        bytes[0] = 0x40;
        assert_eq!(LongEntry::decode(&bytes), Err(FatError::MalformedEntry));
        bytes[0] = 0x41;
        bytes[26] = 1;
        assert_eq!(LongEntry::decode(&bytes), Err(FatError::MalformedEntry));
        bytes[26] = 0;
        bytes[11] = 0x20;
        assert_eq!(LongEntry::decode(&bytes), Err(FatError::MalformedEntry));
    }

    fn reassemble(name: &str) -> Option<FileName> {
        let short = ShortNameBasis::derive(name).unwrap().with_tail(1);
        let sum = checksum(&short);
        let mut assembler = LongNameAssembler::new();
        for entry in long_name_entries(name, sum).unwrap().iter() {
            assert!(assembler.push(entry));
        }
        assembler.finish(&short)
    }

    #[test]
    fn test_long_name_fragment_boundaries() {
        for name in ["a", "abcdefghijklm", "abcdefghijklmn", "abcdefghijklmnopqrstuvwxyz"] {
            let count = (name.len() + 12) / 13;
            assert_eq!(long_name_entries(name, 0).unwrap().len(), count);
            assert_eq!(reassemble(name).as_deref(), Some(name));
        }
        assert_eq!(reassemble("Grüße €.txt").as_deref(), Some("Grüße €.txt"));
    }

    #[test]
    fn test_assembler_rejects_checksum_mismatch() {
        let entries = long_name_entries("mismatched name", 0x11).unwrap();
        let mut assembler = LongNameAssembler::new();
        for entry in entries.iter() {
            assembler.push(entry);
        }
        assert_eq!(assembler.finish(b"MISMAT~1   "), None);
        assert!(!assembler.is_active());
    }

    #[test]
    fn test_assembler_rejects_gaps() {
        let entries = long_name_entries("abcdefghijklmnopqrstuvwxyz0", 0x22).unwrap();
        assert_eq!(entries.len(), 3);
        let mut assembler = LongNameAssembler::new();
        assert!(assembler.push(&entries[0]));
        assert!(!assembler.push(&entries[2]));
        assert_eq!(assembler.finish(b"ABCDEF~1   "), None);

        let mut assembler = LongNameAssembler::new();
        assert!(!assembler.push(&entries[1]));
    }

    #[test]
    fn test_short_name_derivation() {
        let basis = ShortNameBasis::derive("README.TXT").unwrap();
        assert_eq!(&basis.name(), b"README  TXT");
        assert!(!basis.needs_long_name());

        let basis = ShortNameBasis::derive("readme.txt").unwrap();
        assert_eq!(&basis.name(), b"README  TXT");
        assert!(!basis.lossy);
        assert!(basis.needs_long_name());

        let basis = ShortNameBasis::derive("My Long Document.text").unwrap();
        assert_eq!(&basis.name(), b"MYLONGDOTEX");
        assert!(basis.lossy);
        assert_eq!(&basis.with_tail(1), b"MYLONG~1TEX");
        assert_eq!(&basis.with_tail(12), b"MYLON~12TEX");

        let basis = ShortNameBasis::derive("a+b[1].c").unwrap();
        assert_eq!(&basis.name(), b"A_B_1_  C  ");
        assert!(basis.lossy);

        let basis = ShortNameBasis::derive(".profile").unwrap();
        assert_eq!(&basis.name(), b"PROFILE    ");
        assert!(basis.lossy);

        let basis = ShortNameBasis::derive("x.tar.gz").unwrap();
        assert_eq!(&basis.name(), b"XTAR    GZ ");
        assert_eq!(&basis.with_tail(3), b"XTAR~3  GZ ");
    }

    #[test]
    fn test_invalid_names() {
        assert_eq!(ShortNameBasis::derive(""), Err(FatError::InvalidName));
        assert_eq!(ShortNameBasis::derive(".."), Err(FatError::InvalidName));
        assert_eq!(ShortNameBasis::derive("a/b"), Err(FatError::InvalidName));
        assert_eq!(ShortNameBasis::derive("what?"), Err(FatError::InvalidName));
        assert_eq!(ShortNameBasis::derive(&"x".repeat(256)), Err(FatError::NameTooLong));
    }

    #[test]
    fn test_display_name() {
        let mut entry = ShortEntry::new_file(*b"README  TXT", 0, DosDateTime::EPOCH);
        assert_eq!(entry.display_name().as_str(), "README.TXT");
        entry.name = *b"MAKEFILE   ";
        assert_eq!(entry.display_name().as_str(), "MAKEFILE");
        entry.name = *b"\x05BC     DAT";
        assert_eq!(entry.display_name().as_bytes(), "\u{e5}BC.DAT".as_bytes());
    }

    #[test]
    fn test_display_name_keeps_high_bytes() {
        let entry = ShortEntry::new_file(*b"\x8E\x99\x9A\x8E\x99\x9A\x8E\x99TXT", 0, DosDateTime::EPOCH);
        let shown = entry.display_name();
        assert_eq!(shown.chars().count(), 12);
        assert_eq!(shown.as_str(), "\u{8e}\u{99}\u{9a}\u{8e}\u{99}\u{9a}\u{8e}\u{99}.TXT");

        let mut entry = ShortEntry::new_file(*b"\xC4\xD6\xDC\xC4\xD6\xDC\xC4\xD6\xC4\xD6\xDC", 0, DosDateTime::EPOCH);
        assert_eq!(entry.display_name().len(), 23);
        entry.nt_reserved = 0x18;
        assert_eq!(entry.display_name().chars().count(), 12);
    }

    #[test]
    fn test_display_name_case_flags() {
        let mut entry = ShortEntry::new_file(*b"README  TXT", 0, DosDateTime::EPOCH);
        entry.nt_reserved = 0x08;
        assert_eq!(entry.display_name().as_str(), "readme.TXT");
        entry.nt_reserved = 0x10;
        assert_eq!(entry.display_name().as_str(), "README.txt");
        entry.nt_reserved = 0x18;
        assert_eq!(entry.display_name().as_str(), "readme.txt");
        assert_eq!(entry.encode()[12], 0x18);
    }

    #[test]
    fn test_dos_date_time() {
        let stamp = DosDateTime::new(2011, 5, 17, 13, 45, 31);
        assert_eq!(stamp.year(), 2011);
        assert_eq!(stamp.month(), 5);
        assert_eq!(stamp.day(), 17);
        assert_eq!(stamp.hour(), 13);
        assert_eq!(stamp.minute(), 45);
        assert_eq!(stamp.second(), 30);
        assert_eq!(DosDateTime::default().year(), 1980);
        assert_eq!(DosDateTime::default().day(), 1);
    }

    #[test]
    fn test_names_equal() {
        assert!(names_equal("ReadMe.TXT", "readme.txt"));
        assert!(names_equal("GRÜSSE", "grüsse"));
        assert!(!names_equal("readme", "readme.txt"));
    }
}
