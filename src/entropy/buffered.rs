//! Buffered entropy source.
//!
//! Serves requests of any size from a [`SecureBuffer`] first and fetches the
//! shortfall from an [`EntropyCollector`] in whole-KiB blocks, parking the
//! unused tail of the block for later requests.
//!
//! Concatenating every successful output gives a gap-free, order-preserving
//! prefix of the concatenated collector blocks; together with what is still
//! buffered it accounts for every fetched byte exactly once.
//!
//! Not internally synchronized: callers serialize access.

use zeroize::Zeroizing;

use super::{round_up_to_kb, EntropyCollector, EntropyError, SecureBuffer, KB};

pub struct BufferedEntropySource {
    buffer: SecureBuffer,
    collector: Box<dyn EntropyCollector>,
}

impl BufferedEntropySource {
    /// # Errors
    /// `BufferTooSmall` if `buffer` cannot hold the unused tail of a block,
    /// which may be up to `KB - 1` bytes.
    pub fn new(
        buffer: SecureBuffer,
        collector: Box<dyn EntropyCollector>,
    ) -> Result<Self, EntropyError> {
        if buffer.capacity() < KB - 1 {
            return Err(EntropyError::BufferTooSmall);
        }
        Ok(Self { buffer, collector })
    }

    /// Fills `dest` entirely with entropy that has never been dispensed.
    ///
    /// # Errors
    /// Propagates the collector's classified error. In that case `dest`
    /// holds only what the buffer supplied (at its front) and the buffer is
    /// left empty.
    pub fn get_random(&mut self, dest: &mut [u8]) -> Result<(), EntropyError> {
        let goal = dest.len();
        if goal == 0 {
            return Ok(());
        }

        let from_buffer = self.buffer.take(dest);
        log::debug!("Put {} bytes from buffer into output", from_buffer);

        if from_buffer == goal {
            return Ok(());
        }

        let remaining = goal - from_buffer;
        let rounded_up = round_up_to_kb(remaining);

        let mut block = Zeroizing::new(Vec::new());
        block
            .try_reserve_exact(rounded_up)
            .map_err(|_| EntropyError::HostMemory)?;
        block.resize(rounded_up, 0);

        self.collector.collect(&mut block)?;
        log::debug!("Pulled {} bytes from {}", rounded_up, self.collector.name());

        dest[from_buffer..].copy_from_slice(&block[..remaining]);
        log::debug!("Put {} fetched bytes into output", remaining);

        let leftover = &block[remaining..];
        self.buffer.store(leftover);
        log::debug!("Put {} fetched bytes into buffer", leftover.len());

        Ok(())
    }

    /// Number of fetched bytes waiting to be dispensed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards all buffered entropy.
    pub fn wipe(&mut self) {
        self.buffer.wipe();
    }
}

impl core::fmt::Debug for BufferedEntropySource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferedEntropySource")
            .field("buffer", &self.buffer)
            .field("collector", &self.collector.name())
            .finish()
    }
}
