//! Shared fakes: a scripted base provider table and an in-process platform.

#![allow(dead_code, non_snake_case)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use eaas_pkcs11::config::EaasConfig;
use eaas_pkcs11::dispatch::{self, FUNCTION_LIST};
use eaas_pkcs11::entropy::{EntropyCollector, EntropyError};
use eaas_pkcs11::pkcs11::*;
use eaas_pkcs11::platform::Platform;
use eaas_pkcs11::provider::{BaseProvider, ProviderError, ProviderState};
use zeroize::Zeroizing;

/// Session handles understood by the fake base provider.
pub const SESSION_INVALID: CK_SESSION_HANDLE = 0;
pub const SESSION_OK: CK_SESSION_HANDLE = 1;
pub const SESSION_NO_RNG: CK_SESSION_HANDLE = 2;

fn session_verdict(session: CK_SESSION_HANDLE) -> CK_RV {
    match session {
        SESSION_OK => CKR_OK,
        SESSION_NO_RNG => CKR_RANDOM_NO_RNG,
        _ => CKR_SESSION_HANDLE_INVALID,
    }
}

unsafe extern "C" fn base_initialize(_: CK_VOID_PTR) -> CK_RV {
    CKR_OK
}

unsafe extern "C" fn base_initialize_fails(_: CK_VOID_PTR) -> CK_RV {
    CKR_DEVICE_ERROR
}

unsafe extern "C" fn base_finalize(_: CK_VOID_PTR) -> CK_RV {
    CKR_OK
}

unsafe extern "C" fn base_finalize_fails(_: CK_VOID_PTR) -> CK_RV {
    CKR_FUNCTION_FAILED
}

unsafe extern "C" fn base_get_info(info: *mut CK_INFO) -> CK_RV {
    let Some(info) = info.as_mut() else {
        return CKR_ARGUMENTS_BAD;
    };
    info.cryptokiVersion = CK_VERSION { major: 2, minor: 40 };
    pad_field(&mut info.manufacturerID, "Base Vendor");
    info.flags = 0;
    pad_field(&mut info.libraryDescription, "Fake Base Provider");
    info.libraryVersion = CK_VERSION { major: 9, minor: 9 };
    CKR_OK
}

unsafe extern "C" fn base_generate_random(
    session: CK_SESSION_HANDLE,
    data: *mut CK_BYTE,
    len: CK_ULONG,
) -> CK_RV {
    // the shim only ever asks for a verdict
    assert_eq!(len, 0);
    let _ = data;
    session_verdict(session)
}

unsafe extern "C" fn base_seed_random(
    session: CK_SESSION_HANDLE,
    _seed: *mut CK_BYTE,
    len: CK_ULONG,
) -> CK_RV {
    assert_eq!(len, 0);
    session_verdict(session)
}

unsafe extern "C" fn base_close_session(session: CK_SESSION_HANDLE) -> CK_RV {
    session_verdict(session)
}

/// A complete base table answering from the fakes above.
pub fn fake_base() -> &'static CK_FUNCTION_LIST {
    let mut table = FUNCTION_LIST;
    table.C_Initialize = Some(base_initialize);
    table.C_Finalize = Some(base_finalize);
    table.C_GetInfo = Some(base_get_info);
    table.C_GenerateRandom = Some(base_generate_random);
    table.C_SeedRandom = Some(base_seed_random);
    table.C_CloseSession = Some(base_close_session);
    Box::leak(Box::new(table))
}

pub fn fake_base_with(edit: impl FnOnce(&mut CK_FUNCTION_LIST)) -> &'static CK_FUNCTION_LIST {
    let mut table = *fake_base();
    edit(&mut table);
    Box::leak(Box::new(table))
}

pub fn failing_initialize(table: &mut CK_FUNCTION_LIST) {
    table.C_Initialize = Some(base_initialize_fails);
}

pub fn failing_finalize(table: &mut CK_FUNCTION_LIST) {
    table.C_Finalize = Some(base_finalize_fails);
}

/// Records every collection and hands out consecutive little-endian u64
/// counters, so any reuse shows up as a duplicate word.
#[derive(Default)]
pub struct Recorder {
    pub calls: Mutex<Vec<usize>>,
    next_word: AtomicU64,
    pub fail_with: Mutex<Option<EntropyError>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> usize {
        self.calls().iter().sum()
    }
}

struct ScriptedCollector {
    recorder: Arc<Recorder>,
}

impl EntropyCollector for ScriptedCollector {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn collect(&mut self, dest: &mut [u8]) -> Result<(), EntropyError> {
        self.recorder.calls.lock().unwrap().push(dest.len());
        if let Some(err) = *self.recorder.fail_with.lock().unwrap() {
            return Err(err);
        }
        for word in dest.chunks_exact_mut(8) {
            let value = self.recorder.next_word.fetch_add(1, Ordering::SeqCst) + 1;
            word.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }
}

pub struct FakePlatform {
    pub base: &'static CK_FUNCTION_LIST,
    pub token: Mutex<String>,
    pub recorder: Arc<Recorder>,
    pub collectors_built: AtomicUsize,
}

impl FakePlatform {
    pub fn new(token: &str) -> Self {
        Self::with_base(fake_base(), token)
    }

    pub fn with_base(base: &'static CK_FUNCTION_LIST, token: &str) -> Self {
        Self {
            base,
            token: Mutex::new(token.to_owned()),
            recorder: Arc::new(Recorder::default()),
            collectors_built: AtomicUsize::new(0),
        }
    }

    pub fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = token.to_owned();
    }
}

impl Platform for FakePlatform {
    fn load_base_provider(&self) -> Result<BaseProvider, ProviderError> {
        BaseProvider::from_static(self.base)
    }

    fn entropy_config(&self) -> EaasConfig {
        EaasConfig {
            token: Zeroizing::new(self.token.lock().unwrap().clone()),
            ..EaasConfig::default()
        }
    }

    fn entropy_collector(
        &self,
        _config: &EaasConfig,
    ) -> Result<Box<dyn EntropyCollector>, ProviderError> {
        self.collectors_built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCollector {
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

pub type Provider = RwLock<ProviderState<FakePlatform>>;

pub fn provider(platform: FakePlatform) -> Provider {
    RwLock::new(ProviderState::new(platform))
}

pub fn os_locking_args() -> CK_C_INITIALIZE_ARGS {
    CK_C_INITIALIZE_ARGS {
        CreateMutex: None,
        DestroyMutex: None,
        LockMutex: None,
        UnlockMutex: None,
        flags: CKF_OS_LOCKING_OK,
        pReserved: core::ptr::null_mut(),
    }
}

// Return codes as the exported functions would report them.

pub fn initialize(provider: &Provider, args: Option<&mut CK_C_INITIALIZE_ARGS>) -> CK_RV {
    let args: CK_VOID_PTR = match args {
        Some(args) => (args as *mut CK_C_INITIALIZE_ARGS).cast(),
        None => core::ptr::null_mut(),
    };
    dispatch::boundary("C_Initialize", || unsafe { dispatch::initialize(provider, args) })
}

pub fn finalize(provider: &Provider) -> CK_RV {
    dispatch::boundary("C_Finalize", || unsafe {
        dispatch::finalize(provider, core::ptr::null_mut())
    })
}

pub fn generate(provider: &Provider, session: CK_SESSION_HANDLE, dest: &mut [u8]) -> CK_RV {
    let len = dest.len() as CK_ULONG;
    dispatch::boundary("C_GenerateRandom", || unsafe {
        dispatch::generate_random(provider, session, dest.as_mut_ptr(), len)
    })
}

pub fn seed(provider: &Provider, session: CK_SESSION_HANDLE) -> CK_RV {
    let mut seed = [0u8; 8];
    dispatch::boundary("C_SeedRandom", || unsafe {
        dispatch::seed_random(provider, session, seed.as_mut_ptr())
    })
}

pub fn get_info(provider: &Provider, info: &mut CK_INFO) -> CK_RV {
    dispatch::boundary("C_GetInfo", || unsafe { dispatch::get_info(provider, info) })
}
