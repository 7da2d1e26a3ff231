//! The register file and the 8-byte result buffer.
//!
//! Registers are 4 raw bytes. A wide value (long or double) spans a pair
//! `(r, r+1)`: the high 32 bits live in `r` and the low 32 bits in `r+1`,
//! and each half is stored with its 16-bit halves swapped. For a word with
//! little-endian bytes `[p0, p1, p2, p3]`, [`RegisterFile::store_wide`]
//! writes `[p2, p3, p0, p1]` and [`RegisterFile::load_wide`] undoes it:
//!
//! ```text
//! value 0x1122334455667788
//!   vR    22 11 44 33    high word 0x11223344
//!   vR+1  66 55 88 77    low word  0x55667788
//! ```

use crate::error::RuntimeError;

/// Number of registers in the file.
pub const NUM_REGISTERS: usize = 32;

/// Swap the two 16-bit halves of a word.
pub(crate) fn swap_halves(word: [u8; 4]) -> [u8; 4] {
    [word[2], word[3], word[0], word[1]]
}

fn split(value: i64) -> ([u8; 4], [u8; 4]) {
    let bytes = value.to_le_bytes();
    (
        [bytes[4], bytes[5], bytes[6], bytes[7]],
        [bytes[0], bytes[1], bytes[2], bytes[3]],
    )
}

fn join(high: [u8; 4], low: [u8; 4]) -> i64 {
    i64::from_le_bytes([
        low[0], low[1], low[2], low[3], high[0], high[1], high[2], high[3],
    ])
}

/// Fixed-capacity register storage for the running frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    slots: [[u8; 4]; NUM_REGISTERS],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            slots: [[0; 4]; NUM_REGISTERS],
        }
    }

    /// Zero every register.
    pub fn clear(&mut self) {
        self.slots = [[0; 4]; NUM_REGISTERS];
    }

    pub fn load(&self, id: usize) -> Option<[u8; 4]> {
        self.slots.get(id).copied()
    }

    pub fn store(&mut self, id: usize, word: [u8; 4]) -> Option<()> {
        let slot = self.slots.get_mut(id)?;
        *slot = word;
        Some(())
    }

    /// Read one half of a wide value, undoing the half-swap.
    pub fn load_wide(&self, id: usize) -> Option<[u8; 4]> {
        self.load(id).map(swap_halves)
    }

    /// Write one half of a wide value under the half-swap convention.
    pub fn store_wide(&mut self, id: usize, word: [u8; 4]) -> Option<()> {
        self.store(id, swap_halves(word))
    }

    pub fn get_int(&self, id: usize) -> Option<i32> {
        self.load(id).map(i32::from_le_bytes)
    }

    pub fn set_int(&mut self, id: usize, value: i32) -> Option<()> {
        self.store(id, value.to_le_bytes())
    }

    /// A reference is the register's raw contents read as an unsigned handle.
    pub fn get_ref(&self, id: usize) -> Option<u32> {
        self.load(id).map(u32::from_le_bytes)
    }

    pub fn set_ref(&mut self, id: usize, reference: u32) -> Option<()> {
        self.store(id, reference.to_le_bytes())
    }

    /// Read the 64-bit value held in the pair `(id, id+1)`.
    pub fn get_long(&self, id: usize) -> Option<i64> {
        let high = self.load_wide(id)?;
        let low = self.load_wide(id.checked_add(1)?)?;
        Some(join(high, low))
    }

    pub fn set_long(&mut self, id: usize, value: i64) -> Option<()> {
        let next = id.checked_add(1)?;
        if next >= NUM_REGISTERS {
            return None;
        }
        let (high, low) = split(value);
        self.store_wide(id, high)?;
        self.store_wide(next, low)
    }

    pub fn get_double(&self, id: usize) -> Option<f64> {
        self.get_long(id).map(|bits| f64::from_bits(bits as u64))
    }

    pub fn set_double(&mut self, id: usize, value: f64) -> Option<()> {
        self.set_long(id, value.to_bits() as i64)
    }
}

/// Attach the faulting pc to a failed register access.
pub(crate) trait OrRegister<T> {
    fn or_register(self, at: usize, register: usize) -> Result<T, RuntimeError>;
}

impl<T> OrRegister<T> for Option<T> {
    fn or_register(self, at: usize, register: usize) -> Result<T, RuntimeError> {
        self.ok_or(RuntimeError::RegisterOutOfRange { at, register })
    }
}

/// The 8-byte buffer through which return values and library results
/// reach `move-result`.
///
/// The narrow "bottom half" is bytes `4..8`. A wide result keeps the raw
/// contents of the high register in `4..8` and the low register in `0..4`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultBuffer {
    bytes: [u8; 8],
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bytes = [0; 8];
    }

    pub fn bytes(&self) -> [u8; 8] {
        self.bytes
    }

    /// The narrow result.
    pub fn word(&self) -> [u8; 4] {
        [self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]]
    }

    pub fn set_word(&mut self, word: [u8; 4]) {
        self.bytes[4..8].copy_from_slice(&word);
    }

    pub fn set_int(&mut self, value: i32) {
        self.set_word(value.to_le_bytes());
    }

    pub fn set_ref(&mut self, reference: u32) {
        self.set_word(reference.to_le_bytes());
    }

    /// Raw register contents `(high, low)` of a wide result.
    pub fn pair(&self) -> ([u8; 4], [u8; 4]) {
        (
            self.word(),
            [self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]],
        )
    }

    pub fn set_pair(&mut self, high: [u8; 4], low: [u8; 4]) {
        self.bytes[4..8].copy_from_slice(&high);
        self.bytes[0..4].copy_from_slice(&low);
    }

    pub fn long(&self) -> i64 {
        let (high, low) = self.pair();
        join(swap_halves(high), swap_halves(low))
    }

    pub fn set_long(&mut self, value: i64) {
        let (high, low) = split(value);
        self.set_pair(swap_halves(high), swap_halves(low));
    }

    pub fn double(&self) -> f64 {
        f64::from_bits(self.long() as u64)
    }

    pub fn set_double(&mut self, value: f64) {
        self.set_long(value.to_bits() as i64);
    }
}
