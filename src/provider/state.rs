//! Provider state machine.
//!
//! # States
//! - **Uninitialized**: no base provider, no entropy source.
//! - **Initialized**: base provider loaded, threading mode fixed. The entropy
//!   source is built on the first random request and lives until finalize.
//!
//! Initialization is transactional: [`ProviderState::begin_initialize`]
//! returns an [`Initialization`] guard that rolls everything back unless it
//! is committed.

use std::sync::{Mutex, MutexGuard};

use super::locking::{CustomMutex, Threading};
use super::{BaseProvider, ProviderError};
use crate::entropy::{BufferedEntropySource, SecureBuffer, KB};
use crate::pkcs11::{CK_C_INITIALIZE_ARGS, CK_FUNCTION_LIST};
use crate::platform::Platform;

/// Capacity of the leftover-entropy buffer.
pub const BUFFER_CAPACITY: usize = KB;

pub struct ProviderState<P> {
    platform: P,
    base: Option<BaseProvider>,
    threading: Threading,
    custom_mutex: Option<CustomMutex>,
    entropy: Mutex<Option<BufferedEntropySource>>,
}

impl<P> ProviderState<P> {
    /// An uninitialized provider.
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            base: None,
            threading: Threading::Single,
            custom_mutex: None,
            entropy: Mutex::new(None),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    pub fn threading(&self) -> Threading {
        self.threading
    }

    /// The base provider, if initialized.
    pub fn base(&self) -> Result<&BaseProvider, ProviderError> {
        self.base.as_ref().ok_or(ProviderError::NotInitialized)
    }

    /// Picks one entry out of the base provider's table.
    ///
    /// # Errors
    /// `NotInitialized` before initialize, `General` if the entry is null.
    pub fn base_function<F>(
        &self,
        select: impl FnOnce(&CK_FUNCTION_LIST) -> Option<F>,
    ) -> Result<F, ProviderError> {
        select(self.base()?.functions()).ok_or_else(|| {
            log::error!("Base provider function is missing");
            ProviderError::General
        })
    }

    /// Number of buffered entropy bytes, zero if no source exists yet.
    pub fn buffered(&self) -> usize {
        self.lock_entropy().as_ref().map_or(0, BufferedEntropySource::buffered)
    }

    pub fn has_entropy_source(&self) -> bool {
        self.lock_entropy().is_some()
    }

    /// Locks the entropy slot. A slot poisoned by a panic mid-request may
    /// hold a half-updated buffer, so its source is wiped and discarded.
    fn lock_entropy(&self) -> MutexGuard<'_, Option<BufferedEntropySource>> {
        match self.entropy.lock() {
            Ok(slot) => slot,
            Err(poisoned) => {
                log::warn!("Entropy source poisoned, discarding it");
                let mut slot = poisoned.into_inner();
                if let Some(mut source) = slot.take() {
                    source.wipe();
                }
                self.entropy.clear_poison();
                slot
            }
        }
    }

    /// Wipes and drops the entropy source, leaving the rest of the state
    /// alone. The next random request builds a new one.
    pub fn wipe_entropy(&self) {
        if let Some(mut source) = self.lock_entropy().take() {
            source.wipe();
        }
    }

    /// Wipes the entropy source and returns to Uninitialized.
    ///
    /// Only a failure to destroy the application's mutex is reported.
    fn teardown(&mut self) -> Result<(), ProviderError> {
        self.wipe_entropy();

        let destroyed = match self.custom_mutex.take() {
            Some(mutex) => mutex.destroy(),
            None => Ok(()),
        };

        self.threading = Threading::Single;
        self.base = None;

        destroyed
    }
}

impl<P: Platform> ProviderState<P> {
    /// Starts the Uninitialized -> Initialized transition.
    ///
    /// Validates the mutex callbacks, loads the base provider and creates the
    /// application mutex. The returned guard must be committed once the base
    /// provider's own `C_Initialize` succeeds.
    ///
    /// # Errors
    /// `AlreadyInitialized`, `ArgumentsBad` for a partial callback set, the
    /// platform's base provider errors, or a failed `CreateMutex` callback.
    /// Nothing is changed on error.
    pub fn begin_initialize(
        &mut self,
        args: Option<&CK_C_INITIALIZE_ARGS>,
    ) -> Result<Initialization<'_, P>, ProviderError> {
        if self.is_initialized() {
            return Err(ProviderError::AlreadyInitialized);
        }

        let threading = Threading::from_args(args)?;
        let base = self.platform.load_base_provider()?;
        let custom_mutex = match threading {
            Threading::Custom(callbacks) => Some(CustomMutex::create(callbacks)?),
            Threading::Single | Threading::OsLocking => None,
        };

        log::info!("Initializing provider ({:?})", threading);
        self.base = Some(base);
        self.threading = threading;
        self.custom_mutex = custom_mutex;

        Ok(Initialization {
            state: self,
            committed: false,
        })
    }

    /// Initialized -> Uninitialized.
    ///
    /// # Errors
    /// `NotInitialized`, or the `DestroyMutex` callback's failure. The state
    /// is Uninitialized afterwards either way.
    pub fn finalize(&mut self) -> Result<(), ProviderError> {
        if !self.is_initialized() {
            return Err(ProviderError::NotInitialized);
        }
        log::info!("Finalizing provider");
        self.teardown()
    }

    /// Fills `dest` with never-dispensed entropy.
    ///
    /// The entropy source is built on first use from the platform's current
    /// settings. Holds the buffer lock (and the application mutex, if one
    /// was supplied) for the whole call.
    ///
    /// # Errors
    /// `NotInitialized`; `TokenEmpty` if no token is configured, in which
    /// case nothing is built; `General` if the locked buffer cannot be
    /// allocated; otherwise the collector's classified failure.
    pub fn get_random(&self, dest: &mut [u8]) -> Result<(), ProviderError> {
        if !self.is_initialized() {
            return Err(ProviderError::NotInitialized);
        }
        if dest.is_empty() {
            return Ok(());
        }

        let app_lock = match &self.custom_mutex {
            Some(mutex) => Some(mutex.lock()?),
            None => None,
        };

        let result = self.fill(dest);

        let released = match app_lock {
            Some(guard) => guard.release(),
            None => Ok(()),
        };
        result.and(released)
    }

    fn fill(&self, dest: &mut [u8]) -> Result<(), ProviderError> {
        let mut slot = self.lock_entropy();

        if slot.is_none() {
            *slot = Some(self.build_entropy_source()?);
        }
        let Some(source) = slot.as_mut() else {
            return Err(ProviderError::General);
        };

        source.get_random(dest).map_err(ProviderError::from)
    }

    fn build_entropy_source(&self) -> Result<BufferedEntropySource, ProviderError> {
        let config = self.platform.entropy_config();
        if !config.has_token() {
            return Err(ProviderError::TokenEmpty);
        }

        let buffer = SecureBuffer::allocate(BUFFER_CAPACITY).map_err(|err| {
            log::error!("{}", err);
            ProviderError::General
        })?;
        let collector = self.platform.entropy_collector(&config)?;

        log::debug!("Built entropy source around {}", collector.name());
        Ok(BufferedEntropySource::new(buffer, collector)?)
    }
}

impl<P> core::fmt::Debug for ProviderState<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProviderState")
            .field("initialized", &self.is_initialized())
            .field("threading", &self.threading)
            .finish_non_exhaustive()
    }
}

/// An in-progress initialization.
///
/// Dropping it without [`commit`](Self::commit) tears the provider back down
/// to Uninitialized.
pub struct Initialization<'a, P> {
    state: &'a mut ProviderState<P>,
    committed: bool,
}

impl<P> Initialization<'_, P> {
    /// Picks one entry out of the freshly loaded base provider's table.
    pub fn base_function<F>(
        &self,
        select: impl FnOnce(&CK_FUNCTION_LIST) -> Option<F>,
    ) -> Result<F, ProviderError> {
        self.state.base_function(select)
    }

    pub fn commit(mut self) {
        self.committed = true;
        log::info!("Provider initialized");
    }
}

impl<P> Drop for Initialization<'_, P> {
    fn drop(&mut self) {
        if !self.committed {
            log::warn!("Rolling back provider initialization");
            let _ = self.state.teardown();
        }
    }
}
