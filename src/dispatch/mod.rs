//! Cryptoki entry points.
//!
//! The `extern "C"` functions in `exports` and `forward` are thin shells
//! around the generic operations here, which take the provider state
//! explicitly so they can be driven against a fake platform in tests.
//!
//! Every entry point runs inside [`boundary`]: errors become `CK_RV` codes
//! and panics become `CKR_GENERAL_ERROR`. Nothing unwinds into C.

pub mod exports;
pub mod forward;

pub use exports::{FUNCTION_LIST, PROVIDER};

use std::panic::{self, AssertUnwindSafe};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use crate::entropy::EntropyError;
use crate::pkcs11::*;
use crate::platform::Platform;
use crate::provider::{LibraryPin, ProviderError, ProviderState};

pub const MANUFACTURER_ID: &str = "EaaS PKCS#11 Shim";
pub const DESCRIPTION_PREFIX: &[u8] = b"Wrap of ";
pub const LIBRARY_VERSION: CK_VERSION = CK_VERSION { major: 0, minor: 1 };

/// Base verdicts on a zero-length `C_GenerateRandom` that still let the
/// request through.
const GENERATE_ACCEPTS: &[CK_RV] = &[
    CKR_OK,
    CKR_DEVICE_ERROR,
    CKR_DEVICE_MEMORY,
    CKR_DEVICE_REMOVED,
    CKR_FUNCTION_FAILED,
    CKR_HOST_MEMORY,
    CKR_RANDOM_NO_RNG,
];

const SEED_ACCEPTS: &[CK_RV] = &[
    CKR_OK,
    CKR_DEVICE_ERROR,
    CKR_DEVICE_MEMORY,
    CKR_DEVICE_REMOVED,
    CKR_FUNCTION_FAILED,
    CKR_HOST_MEMORY,
    CKR_RANDOM_NO_RNG,
    CKR_RANDOM_SEED_NOT_SUPPORTED,
];

/// Runs one entry point, turning its outcome into a return code.
pub fn boundary(name: &str, call: impl FnOnce() -> Result<(), ProviderError>) -> CK_RV {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => CKR_OK,
        Ok(Err(err)) => {
            report(name, &err);
            err.rv()
        }
        Err(_) => {
            log::error!("{} panicked", name);
            CKR_GENERAL_ERROR
        }
    }
}

fn report(name: &str, err: &ProviderError) {
    match err {
        ProviderError::TokenEmpty => log::error!("Environment variable EAAS_TOKEN empty."),
        ProviderError::Entropy(EntropyError::InvalidToken) => log::error!(
            "Could not fulfill random request, is EAAS_TOKEN a valid entropy token?"
        ),
        ProviderError::Entropy(EntropyError::TokenRejected) => {
            log::error!("Entropy service refused EAAS_TOKEN.")
        }
        ProviderError::Entropy(EntropyError::CaCertificate) => {
            log::error!("CA certificate error, consider editing CA_CERT_PATH.")
        }
        ProviderError::Entropy(other) => log::error!("{}: {}", name, other),
        ProviderError::Base(rv) => log::debug!("{}: base provider returned {:#x}", name, rv),
        other => log::debug!("{}: {}", name, other),
    }
}

pub(crate) fn read<P>(provider: &RwLock<ProviderState<P>>) -> RwLockReadGuard<'_, ProviderState<P>> {
    provider.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<P>(
    provider: &RwLock<ProviderState<P>>,
) -> RwLockWriteGuard<'_, ProviderState<P>> {
    provider.write().unwrap_or_else(PoisonError::into_inner)
}

/// A base provider verdict as a result.
pub fn verdict(rv: CK_RV) -> Result<(), ProviderError> {
    if rv == CKR_OK {
        Ok(())
    } else {
        Err(ProviderError::Base(rv))
    }
}

/// Looks up a base provider function without holding the state lock
/// during the call, so a blocking base call (`C_WaitForSlotEvent`) cannot
/// starve `C_Finalize`. Keep the returned pin alive until the call returns;
/// it defers `dlclose` if the provider is finalized meanwhile.
pub fn resolve<P, F>(
    provider: &RwLock<ProviderState<P>>,
    select: impl FnOnce(&CK_FUNCTION_LIST) -> Option<F>,
) -> Result<(F, LibraryPin), ProviderError> {
    let state = read(provider);
    let function = state.base_function(select)?;
    Ok((function, state.base()?.pin()))
}

/// Wipes buffered entropy for a process exiting without `C_Finalize`.
///
/// Never blocks: if another thread still holds the state the wipe is
/// skipped, and that thread's own request finishes with the buffer.
pub fn release_at_exit<P>(provider: &RwLock<ProviderState<P>>) {
    let state = match provider.try_write() {
        Ok(state) => state,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => {
            log::warn!("Provider busy at exit, buffered entropy not wiped");
            return;
        }
    };
    state.wipe_entropy();
}

/// `C_Initialize`.
///
/// # Safety
/// `init_args` is null or points to a valid `CK_C_INITIALIZE_ARGS`.
pub unsafe fn initialize<P: Platform>(
    provider: &RwLock<ProviderState<P>>,
    init_args: CK_VOID_PTR,
) -> Result<(), ProviderError> {
    let mut state = write(provider);
    let args = unsafe { init_args.cast::<CK_C_INITIALIZE_ARGS>().as_ref() };

    let transition = state.begin_initialize(args)?;
    let base_initialize = transition.base_function(|list| list.C_Initialize)?;

    // Safety: forwarding the caller's arguments unchanged.
    verdict(unsafe { base_initialize(init_args) })?;

    transition.commit();
    Ok(())
}

/// `C_Finalize`. The base provider is finalized first; if it refuses, this
/// provider stays initialized.
///
/// # Safety
/// `reserved` is forwarded to the base provider unchanged.
pub unsafe fn finalize<P: Platform>(
    provider: &RwLock<ProviderState<P>>,
    reserved: CK_VOID_PTR,
) -> Result<(), ProviderError> {
    let mut state = write(provider);
    let base_finalize = state.base_function(|list| list.C_Finalize)?;

    verdict(unsafe { base_finalize(reserved) })?;

    state.finalize()
}

/// `C_GetInfo`: the base provider's answer, rebranded.
///
/// # Safety
/// `info` is null or points to writable `CK_INFO` storage.
pub unsafe fn get_info<P>(
    provider: &RwLock<ProviderState<P>>,
    info: *mut CK_INFO,
) -> Result<(), ProviderError> {
    let (base_get_info, _pin) = resolve(provider, |list| list.C_GetInfo)?;
    verdict(unsafe { base_get_info(info) })?;

    match unsafe { info.as_mut() } {
        Some(info) => {
            rewrite_info(info);
            Ok(())
        }
        None => Err(ProviderError::ArgumentsBad),
    }
}

/// Stamps this library's identity over the base provider's `CK_INFO`.
pub fn rewrite_info(info: &mut CK_INFO) {
    pad_field(&mut info.manufacturerID, MANUFACTURER_ID);

    let original = info.libraryDescription;
    let wrapped = DESCRIPTION_PREFIX.iter().chain(original.iter());
    for (slot, byte) in info.libraryDescription.iter_mut().zip(wrapped) {
        *slot = *byte;
    }

    info.libraryVersion = LIBRARY_VERSION;
}

/// `C_GenerateRandom`.
///
/// The base provider validates the session through a zero-length request;
/// its verdict gates the request, the bytes themselves come from the
/// entropy service.
///
/// # Safety
/// `data` is null or valid for `len` writable bytes.
pub unsafe fn generate_random<P: Platform>(
    provider: &RwLock<ProviderState<P>>,
    session: CK_SESSION_HANDLE,
    data: *mut CK_BYTE,
    len: CK_ULONG,
) -> Result<(), ProviderError> {
    let state = read(provider);
    let base_generate = state.base_function(|list| list.C_GenerateRandom)?;

    accept(unsafe { base_generate(session, data, 0) }, GENERATE_ACCEPTS)?;

    if len == 0 {
        return Ok(());
    }
    if data.is_null() {
        return Err(ProviderError::ArgumentsBad);
    }
    let len = usize::try_from(len).map_err(|_| ProviderError::ArgumentsBad)?;

    // Safety: caller guarantees `data` is valid for `len` bytes.
    let dest = unsafe { core::slice::from_raw_parts_mut(data, len) };
    state.get_random(dest)
}

/// `C_SeedRandom`. Seeding is never supported; the base provider's verdict
/// on the session still takes precedence.
///
/// # Safety
/// `seed` is forwarded to the base provider with a zero length.
pub unsafe fn seed_random<P>(
    provider: &RwLock<ProviderState<P>>,
    session: CK_SESSION_HANDLE,
    seed: *mut CK_BYTE,
) -> Result<(), ProviderError> {
    let (base_seed, _pin) = resolve(provider, |list| list.C_SeedRandom)?;

    accept(unsafe { base_seed(session, seed, 0) }, SEED_ACCEPTS)?;

    Err(ProviderError::Base(CKR_RANDOM_SEED_NOT_SUPPORTED))
}

fn accept(rv: CK_RV, accepted: &[CK_RV]) -> Result<(), ProviderError> {
    if accepted.contains(&rv) {
        if rv != CKR_OK {
            log::debug!("Base provider random verdict {:#x} ignored", rv);
        }
        Ok(())
    } else {
        Err(ProviderError::Base(rv))
    }
}
