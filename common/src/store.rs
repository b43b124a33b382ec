use crate::error::StoreError;

pub const RELAY_STATE_OFFSET: usize = 0;
pub const BOOT_COUNT_OFFSET: usize = 1;
pub const STORE_LEN: usize = 2;

/// Value read back from a never-written cell.
pub const ERASED_BYTE: u8 = 0xFF;

/// Byte-addressable region that survives power loss.
///
/// Writes may be buffered until [`commit`](NonVolatileStore::commit); a
/// read-back after reboot only sees committed bytes.
pub trait NonVolatileStore {
    fn read(&self, offset: usize) -> Result<u8, StoreError>;

    fn write(&mut self, offset: usize, value: u8) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    /// Writes `value` only if it differs from the current byte.
    /// Returns whether a write happened. Does not commit.
    fn write_if_changed(&mut self, offset: usize, value: u8) -> Result<bool, StoreError> {
        if self.read(offset)? == value {
            return Ok(false);
        }
        self.write(offset, value)?;
        Ok(true)
    }
}

pub fn check_offset(offset: usize) -> Result<(), StoreError> {
    if offset < STORE_LEN {
        Ok(())
    } else {
        Err(StoreError::OutOfBounds {
            offset,
            len: STORE_LEN,
        })
    }
}

/// RAM-backed store with EEPROM-style commit semantics.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    cache: [u8; STORE_LEN],
    committed: [u8; STORE_LEN],
    writes: usize,
    commits: usize,
}

impl MemoryStore {
    /// A blank store: every cell reads [`ERASED_BYTE`].
    pub fn erased() -> Self {
        Self::from_bytes([ERASED_BYTE; STORE_LEN])
    }

    pub fn from_bytes(bytes: [u8; STORE_LEN]) -> Self {
        Self {
            cache: bytes,
            committed: bytes,
            writes: 0,
            commits: 0,
        }
    }

    pub fn committed(&self) -> [u8; STORE_LEN] {
        self.committed
    }

    /// Simulates a power cycle: uncommitted writes are lost.
    pub fn power_cycle(&self) -> Self {
        Self::from_bytes(self.committed)
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::erased()
    }
}

impl NonVolatileStore for MemoryStore {
    fn read(&self, offset: usize) -> Result<u8, StoreError> {
        check_offset(offset)?;
        Ok(self.cache[offset])
    }

    fn write(&mut self, offset: usize, value: u8) -> Result<(), StoreError> {
        check_offset(offset)?;
        self.cache[offset] = value;
        self.writes += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.committed = self.cache;
        self.commits += 1;
        Ok(())
    }
}
