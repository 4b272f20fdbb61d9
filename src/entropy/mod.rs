//! Entropy buffering and distribution.
//!
//! Random bytes come from a remote Entropy-as-a-Service endpoint in whole
//! kibibyte blocks. Whatever a request does not consume is parked in a small
//! page-locked buffer and handed out to the next request before the network
//! is touched again.
//!
//! # Components
//! - `secure_buffer`: the locked, zero-on-drop arena holding leftovers.
//! - `buffered`: the drain-then-fetch algorithm on top of it.
//!
//! # Security
//! - **No reuse**: every dispensed byte is zeroed in the arena and never
//!   handed out again.
//! - **Memory protection**: the arena is `mlock`ed (via `memmap2`) so it is
//!   never written to swap.

pub mod buffered;
pub mod secure_buffer;

pub use buffered::BufferedEntropySource;
pub use secure_buffer::SecureBuffer;

use core::fmt;

/// The entropy service hands out randomness in units of this many bytes.
pub const KB: usize = 1024;

/// Rounds `n` up to the next multiple of [`KB`].
pub const fn round_up_to_kb(n: usize) -> usize {
    n.div_ceil(KB) * KB
}

/// Error types for entropy collection and buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyError {
    /// The locked buffer could not be mapped or locked.
    Allocation,
    /// Not enough memory for a fetched block.
    HostMemory,
    /// A collection request was not a multiple of [`KB`].
    UnalignedRequest,
    /// The buffer cannot hold the leftover of a whole-KiB block.
    BufferTooSmall,
    /// The service rejected the access token (HTTP 401).
    InvalidToken,
    /// The service refused the access token for another reason (HTTP 403).
    TokenRejected,
    /// The service is rate limiting this client (HTTP 429).
    RateLimited,
    /// Any other non-success HTTP status.
    Status(u16),
    /// TLS certificate validation failed, or the CA bundle is unusable.
    CaCertificate,
    /// The request never produced an HTTP response.
    Transport,
    /// The response body was not the expected JSON document.
    MalformedResponse,
    /// The decoded entropy did not match the requested length.
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for EntropyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntropyError::Allocation => write!(f, "Could not map and lock the entropy buffer"),
            EntropyError::HostMemory => write!(f, "Out of memory for entropy block"),
            EntropyError::UnalignedRequest => write!(f, "Entropy request is not a whole number of KiB"),
            EntropyError::BufferTooSmall => write!(f, "Entropy buffer is smaller than one KiB block"),
            EntropyError::InvalidToken => write!(f, "Entropy service rejected the access token"),
            EntropyError::TokenRejected => write!(f, "Entropy service refused the access token"),
            EntropyError::RateLimited => write!(f, "Entropy service rate limit hit"),
            EntropyError::Status(code) => write!(f, "Entropy service responded with status {}", code),
            EntropyError::CaCertificate => write!(f, "Problem with the TLS CA certificate"),
            EntropyError::Transport => write!(f, "Could not reach the entropy service"),
            EntropyError::MalformedResponse => write!(f, "Malformed entropy service response"),
            EntropyError::LengthMismatch { expected, actual } => {
                write!(f, "Expected {} bytes of entropy, service returned {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for EntropyError {}

/// A supplier of fresh entropy in whole-KiB blocks.
pub trait EntropyCollector: Send {
    /// Returns an identifier for the collector, used in log messages.
    fn name(&self) -> &'static str;

    /// Fills `dest` with fresh entropy.
    ///
    /// `dest.len()` is always a multiple of [`KB`]. On error the contents of
    /// `dest` are unspecified and must not be used.
    fn collect(&mut self, dest: &mut [u8]) -> Result<(), EntropyError>;
}

impl<C: EntropyCollector + ?Sized> EntropyCollector for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn collect(&mut self, dest: &mut [u8]) -> Result<(), EntropyError> {
        (**self).collect(dest)
    }
}
