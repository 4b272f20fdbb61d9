//! Page-locked entropy arena.
//!
//! Holds entropy that has been fetched but not yet dispensed. Live bytes sit
//! at the end of the arena, `[capacity - len, capacity)`; everything in front
//! of them is zero.
//!
//! # Security
//! - **Page aligned**: backed by an anonymous `memmap2` mapping.
//! - **Locked**: `mlock`ed for its whole lifetime so it is never swapped.
//! - **Zeroization**: consumed bytes are zeroed immediately, the whole arena
//!   is burned on `wipe` and on drop. With the `paranoid` feature the burn
//!   is a multi-pass overwrite.

use memmap2::MmapMut;
use zeroize::Zeroize;

use super::EntropyError;

/// Irreversibly overwrites `slice`.
#[inline(never)]
fn burn(slice: &mut [u8]) {
    #[cfg(feature = "paranoid")]
    {
        for byte in slice.iter_mut() {
            unsafe { core::ptr::write_volatile(byte, 0xFF) };
        }
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);

        for (i, byte) in slice.iter_mut().enumerate() {
            unsafe { core::ptr::write_volatile(byte, (i % 255) as u8) };
        }
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    slice.zeroize();
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

/// A fixed-capacity, memory-locked byte arena.
pub struct SecureBuffer {
    region: MmapMut,
    len: usize,
}

impl SecureBuffer {
    /// Maps and locks `capacity` zeroed bytes.
    ///
    /// # Errors
    /// `EntropyError::Allocation` if the mapping or `mlock` fails (for
    /// example when `RLIMIT_MEMLOCK` is exhausted).
    pub fn allocate(capacity: usize) -> Result<Self, EntropyError> {
        if capacity == 0 {
            return Err(EntropyError::Allocation);
        }

        let mut region = MmapMut::map_anon(capacity).map_err(|err| {
            log::error!("Could not map entropy buffer: {}", err);
            EntropyError::Allocation
        })?;

        // Safety: the pointer and length describe the mapping we own.
        let rc = unsafe { libc::mlock(region.as_ptr().cast(), region.len()) };
        if rc != 0 {
            log::error!("Could not mlock entropy buffer: {}", std::io::Error::last_os_error());
            return Err(EntropyError::Allocation);
        }

        burn(&mut region);

        Ok(Self { region, len: 0 })
    }

    /// Total size of the arena.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Number of live bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Moves up to `dest.len()` live bytes into `dest`, oldest first.
    ///
    /// The copied bytes are zeroed in the arena. Returns how many bytes were
    /// supplied; the caller makes up any shortfall elsewhere.
    pub fn take(&mut self, dest: &mut [u8]) -> usize {
        let count = dest.len().min(self.len);
        let start = self.capacity() - self.len;
        let end = start + count;

        dest[..count].copy_from_slice(&self.region[start..end]);
        burn(&mut self.region[start..end]);
        self.len -= count;

        count
    }

    /// Replaces the live bytes with `source`.
    ///
    /// Only called once the previous contents have been drained; anything
    /// still live is burned first.
    ///
    /// # Panics
    /// If `source` is larger than the arena.
    pub fn store(&mut self, source: &[u8]) {
        assert!(source.len() <= self.capacity(), "store exceeds buffer capacity");
        debug_assert!(self.is_empty(), "store over live entropy");

        if !self.is_empty() {
            self.wipe();
        }

        let start = self.capacity() - source.len();
        self.region[start..].copy_from_slice(source);
        self.len = source.len();
    }

    /// Zeroes the whole arena. Idempotent.
    pub fn wipe(&mut self) {
        burn(&mut self.region);
        self.len = 0;
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.wipe();

        // Safety: same mapping that was locked in `allocate`.
        let rc = unsafe { libc::munlock(self.region.as_ptr().cast(), self.region.len()) };
        if rc != 0 {
            log::warn!("Could not munlock entropy buffer: {}", std::io::Error::last_os_error());
        }
    }
}

impl core::fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
