use std::sync::Mutex;

use plc_common::{PlcError, PlcResult};

/// One of the four memory sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Bit-addressable coils/discrete inputs.
    Bits,
    /// 16-bit holding/input registers.
    Words16,
    /// 32-bit wide words, addressed in 16-bit register units on the wire.
    Words32,
    /// 64-bit wide words, addressed in 16-bit register units on the wire.
    Words64,
}

impl Section {
    /// Parse a section name as used in configuration and request routing.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::UnknownSection`] for any other name.
    pub fn from_name(name: &str) -> PlcResult<Self> {
        match name {
            "bits" => Ok(Section::Bits),
            "words16" => Ok(Section::Words16),
            "words32" => Ok(Section::Words32),
            "words64" => Ok(Section::Words64),
            other => Err(PlcError::UnknownSection(other.to_string())),
        }
    }

    /// The canonical name of this section.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Section::Bits => "bits",
            Section::Words16 => "words16",
            Section::Words32 => "words32",
            Section::Words64 => "words64",
        }
    }

    /// Element width in bytes: 1 for `bits`, 2/4/8 for the word sections.
    #[must_use]
    pub fn word_len(self) -> usize {
        match self {
            Section::Bits => 1,
            Section::Words16 => 2,
            Section::Words32 => 4,
            Section::Words64 => 8,
        }
    }
}

struct Sections {
    bits: Vec<u8>,
    bits_len: usize,
    words16: Vec<u16>,
    words32: Vec<u32>,
    words64: Vec<u64>,
}

/// The PLC simulator's process memory.
///
/// `bits` is sized in whole bits (`blen`, rounded up to a whole-byte
/// backing buffer); the word sections are sized in element count, not
/// bytes.
pub struct MemoryImage {
    inner: Mutex<Sections>,
}

impl MemoryImage {
    /// Build a new, zeroed memory image.
    #[must_use]
    pub fn new(blen: usize, w16len: usize, w32len: usize, w64len: usize) -> Self {
        let nbytes = blen.div_ceil(8);
        Self {
            inner: Mutex::new(Sections {
                bits: vec![0u8; nbytes],
                bits_len: blen,
                words16: vec![0u16; w16len],
                words32: vec![0u32; w32len],
                words64: vec![0u64; w64len],
            }),
        }
    }

    /// Number of addressable bits in the `bits` section.
    #[must_use]
    pub fn bits_len(&self) -> usize {
        self.inner.lock().unwrap().bits_len
    }

    /// Element count of a word section.
    #[must_use]
    pub fn section_len(&self, section: Section) -> usize {
        let s = self.inner.lock().unwrap();
        match section {
            Section::Bits => s.bits_len,
            Section::Words16 => s.words16.len(),
            Section::Words32 => s.words32.len(),
            Section::Words64 => s.words64.len(),
        }
    }

    /// Element width in bytes of `section`. See [`Section::word_len`].
    #[must_use]
    pub fn word_len(&self, section: Section) -> usize {
        section.word_len()
    }

    /// Read `count` consecutive bits starting at `addr`.
    ///
    /// Bit addressing runs right-to-left over the backing byte buffer: bit
    /// index 0 is the least-significant bit of the *last* byte, bit 7 its
    /// most-significant bit, bit 8 the least-significant bit of the
    /// second-to-last byte, and so on. Bit `k` lives at byte `len-1 - k/8`,
    /// bit position `k % 8`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if `addr + count` exceeds `blen`.
    pub fn get_bits(&self, addr: usize, count: usize) -> PlcResult<Vec<bool>> {
        let s = self.inner.lock().unwrap();
        Self::check_bounds("bits", addr, count, s.bits_len)?;
        let len = s.bits.len();
        Ok((addr..addr + count)
            .map(|bit| {
                let byte_idx = len - 1 - bit / 8;
                let bit_idx = bit % 8;
                (s.bits[byte_idx] & (1 << bit_idx)) != 0
            })
            .collect())
    }

    /// Write consecutive bits starting at `addr`. See [`Self::get_bits`] for
    /// the addressing convention.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if `addr + values.len()` exceeds `blen`.
    pub fn set_bits(&self, addr: usize, values: &[bool]) -> PlcResult<()> {
        let mut s = self.inner.lock().unwrap();
        Self::check_bounds("bits", addr, values.len(), s.bits_len)?;
        let len = s.bits.len();
        for (i, value) in values.iter().enumerate() {
            let bit = addr + i;
            let byte_idx = len - 1 - bit / 8;
            let bit_idx = bit % 8;
            let mask = 1u8 << bit_idx;
            if *value {
                s.bits[byte_idx] |= mask;
            } else {
                s.bits[byte_idx] &= !mask;
            }
        }
        Ok(())
    }

    /// Read `count` consecutive 16-bit words starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if the range exceeds `w16len`.
    pub fn get_words16(&self, addr: usize, count: usize) -> PlcResult<Vec<u16>> {
        let s = self.inner.lock().unwrap();
        Self::check_bounds("words16", addr, count, s.words16.len())?;
        Ok(s.words16[addr..addr + count].to_vec())
    }

    /// Write consecutive 16-bit words starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if the range exceeds `w16len`.
    pub fn set_words16(&self, addr: usize, values: &[u16]) -> PlcResult<()> {
        let mut s = self.inner.lock().unwrap();
        Self::check_bounds("words16", addr, values.len(), s.words16.len())?;
        s.words16[addr..addr + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Read `count` consecutive 32-bit words starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if the range exceeds `w32len`.
    pub fn get_words32(&self, addr: usize, count: usize) -> PlcResult<Vec<u32>> {
        let s = self.inner.lock().unwrap();
        Self::check_bounds("words32", addr, count, s.words32.len())?;
        Ok(s.words32[addr..addr + count].to_vec())
    }

    /// Write consecutive 32-bit words starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if the range exceeds `w32len`.
    pub fn set_words32(&self, addr: usize, values: &[u32]) -> PlcResult<()> {
        let mut s = self.inner.lock().unwrap();
        Self::check_bounds("words32", addr, values.len(), s.words32.len())?;
        s.words32[addr..addr + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Read `count` consecutive 64-bit words starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if the range exceeds `w64len`.
    pub fn get_words64(&self, addr: usize, count: usize) -> PlcResult<Vec<u64>> {
        let s = self.inner.lock().unwrap();
        Self::check_bounds("words64", addr, count, s.words64.len())?;
        Ok(s.words64[addr..addr + count].to_vec())
    }

    /// Write consecutive 64-bit words starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if the range exceeds `w64len`.
    pub fn set_words64(&self, addr: usize, values: &[u64]) -> PlcResult<()> {
        let mut s = self.inner.lock().unwrap();
        Self::check_bounds("words64", addr, values.len(), s.words64.len())?;
        s.words64[addr..addr + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Read `count` values from `section` starting at `addr`, widened to
    /// `u64`. Used by signal producers that address a section generically
    /// by name (`copy`/`transform` sources).
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if the range exceeds the section's length.
    pub fn get_data(&self, section: Section, addr: usize, count: usize) -> PlcResult<Vec<u64>> {
        match section {
            Section::Bits => Ok(self
                .get_bits(addr, count)?
                .into_iter()
                .map(u64::from)
                .collect()),
            Section::Words16 => Ok(self
                .get_words16(addr, count)?
                .into_iter()
                .map(u64::from)
                .collect()),
            Section::Words32 => Ok(self
                .get_words32(addr, count)?
                .into_iter()
                .map(u64::from)
                .collect()),
            Section::Words64 => self.get_words64(addr, count),
        }
    }

    /// Write `values`, narrowed to the section's word width, into `section`
    /// starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::OutOfBounds`] if the range exceeds the section's length.
    pub fn set_data(&self, section: Section, addr: usize, values: &[u64]) -> PlcResult<()> {
        match section {
            Section::Bits => {
                let bits: Vec<bool> = values.iter().map(|v| *v != 0).collect();
                self.set_bits(addr, &bits)
            }
            Section::Words16 => {
                let words: Vec<u16> = values.iter().map(|v| *v as u16).collect();
                self.set_words16(addr, &words)
            }
            Section::Words32 => {
                let words: Vec<u32> = values.iter().map(|v| *v as u32).collect();
                self.set_words32(addr, &words)
            }
            Section::Words64 => self.set_words64(addr, values),
        }
    }

    fn check_bounds(section: &str, addr: usize, count: usize, len: usize) -> PlcResult<()> {
        if addr.checked_add(count).map_or(true, |end| end > len) {
            return Err(PlcError::OutOfBounds {
                section: section.to_string(),
                addr,
                count,
            });
        }
        Ok(())
    }
}
