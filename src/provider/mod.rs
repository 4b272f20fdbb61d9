//! Provider lifecycle.
//!
//! `ProviderState` is the process-wide state behind the exported entry
//! points: the loaded base provider, the threading mode picked at
//! `C_Initialize`, and the lazily built entropy source.
//!
//! # Components
//! - `base`: loading and validating the base provider's function table.
//! - `locking`: application-supplied mutex callbacks.
//! - `state`: initialize / finalize / random transitions.

pub mod base;
pub mod locking;
pub mod state;

pub use base::{BaseProvider, LibraryPin};
pub use locking::{CustomMutex, MutexCallbacks, Threading};
pub use state::{Initialization, ProviderState};

use core::fmt;

use crate::entropy::EntropyError;
use crate::pkcs11::vendor::*;
use crate::pkcs11::*;

/// Lifecycle and dispatch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderError {
    NotInitialized,
    AlreadyInitialized,
    ArgumentsBad,
    General,
    /// `EAAS_TOKEN` is unset or empty.
    TokenEmpty,
    /// `BASE_PROVIDER_PATH` is unset or empty.
    BaseProviderEmpty,
    /// The base provider could not be loaded or is incomplete.
    BaseProviderOpenFailed,
    /// Entropy collection or buffering failed.
    Entropy(EntropyError),
    /// A verdict from the base provider, reported unchanged.
    Base(CK_RV),
    /// An application mutex callback failed with this code.
    MutexCallback(CK_RV),
}

impl ProviderError {
    /// The Cryptoki return code reported for this failure.
    pub fn rv(&self) -> CK_RV {
        match self {
            ProviderError::NotInitialized => CKR_CRYPTOKI_NOT_INITIALIZED,
            ProviderError::AlreadyInitialized => CKR_CRYPTOKI_ALREADY_INITIALIZED,
            ProviderError::ArgumentsBad => CKR_ARGUMENTS_BAD,
            ProviderError::General => CKR_GENERAL_ERROR,
            ProviderError::TokenEmpty => CKR_EAAS_TOKEN_EMPTY,
            ProviderError::BaseProviderEmpty => CKR_EAAS_BASE_PROVIDER_EMPTY,
            ProviderError::BaseProviderOpenFailed => CKR_EAAS_BASE_PROVIDER_OPEN_FAILED,
            ProviderError::Entropy(err) => match err {
                EntropyError::InvalidToken => CKR_EAAS_TOKEN_INVALID,
                EntropyError::TokenRejected => CKR_EAAS_TOKEN_OTHER_FAIL,
                EntropyError::CaCertificate => CKR_EAAS_CA_CERT_FAILURE,
                EntropyError::HostMemory => CKR_HOST_MEMORY,
                _ => CKR_GENERAL_ERROR,
            },
            ProviderError::Base(rv) | ProviderError::MutexCallback(rv) => *rv,
        }
    }
}

impl From<EntropyError> for ProviderError {
    fn from(err: EntropyError) -> Self {
        ProviderError::Entropy(err)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotInitialized => write!(f, "Provider is not initialized"),
            ProviderError::AlreadyInitialized => write!(f, "Provider is already initialized"),
            ProviderError::ArgumentsBad => write!(f, "Invalid arguments"),
            ProviderError::General => write!(f, "General error"),
            ProviderError::TokenEmpty => write!(f, "Environment variable EAAS_TOKEN is empty"),
            ProviderError::BaseProviderEmpty => {
                write!(f, "Environment variable BASE_PROVIDER_PATH is empty")
            }
            ProviderError::BaseProviderOpenFailed => write!(f, "Could not open the base provider"),
            ProviderError::Entropy(err) => write!(f, "Entropy error: {}", err),
            ProviderError::Base(rv) => write!(f, "Base provider returned {:#x}", rv),
            ProviderError::MutexCallback(rv) => write!(f, "Mutex callback returned {:#x}", rv),
        }
    }
}

impl std::error::Error for ProviderError {}
