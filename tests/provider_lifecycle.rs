mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use common::*;
use eaas_pkcs11::dispatch::{self, LIBRARY_VERSION};
use eaas_pkcs11::entropy::{EntropyError, KB};
use eaas_pkcs11::pkcs11::vendor::*;
use eaas_pkcs11::pkcs11::*;
use eaas_pkcs11::provider::ProviderError;

#[test]
fn test_initialize_and_finalize_transitions() {
    let provider = provider(FakePlatform::new("token"));

    assert_eq!(finalize(&provider), CKR_CRYPTOKI_NOT_INITIALIZED);
    assert_eq!(initialize(&provider, None), CKR_OK);
    assert_eq!(initialize(&provider, None), CKR_CRYPTOKI_ALREADY_INITIALIZED);
    assert_eq!(finalize(&provider), CKR_OK);
    assert_eq!(finalize(&provider), CKR_CRYPTOKI_NOT_INITIALIZED);

    // a finalized provider can be brought back up
    assert_eq!(initialize(&provider, None), CKR_OK);
    assert!(provider.read().unwrap().is_initialized());
}

#[test]
fn test_partial_mutex_callbacks_rejected() {
    unsafe extern "C" fn create(_: *mut CK_VOID_PTR) -> CK_RV {
        CKR_OK
    }

    let provider = provider(FakePlatform::new("token"));
    let mut args = os_locking_args();
    args.CreateMutex = Some(create);

    assert_eq!(initialize(&provider, Some(&mut args)), CKR_ARGUMENTS_BAD);
    assert!(!provider.read().unwrap().is_initialized());
}

#[test]
fn test_base_initialize_failure_rolls_back() {
    let base = fake_base_with(failing_initialize);
    let provider = provider(FakePlatform::with_base(base, "token"));

    assert_eq!(initialize(&provider, None), CKR_DEVICE_ERROR);
    assert!(!provider.read().unwrap().is_initialized());

    let mut byte = [0u8; 1];
    assert_eq!(generate(&provider, SESSION_OK, &mut byte), CKR_CRYPTOKI_NOT_INITIALIZED);
}

#[test]
fn test_incomplete_base_rejected() {
    let base = fake_base_with(|table| table.C_Sign = None);
    let provider = provider(FakePlatform::with_base(base, "token"));

    assert_eq!(initialize(&provider, None), CKR_EAAS_BASE_PROVIDER_OPEN_FAILED);
    assert!(!provider.read().unwrap().is_initialized());
}

#[test]
fn test_base_finalize_failure_keeps_state() {
    let base = fake_base_with(failing_finalize);
    let provider = provider(FakePlatform::with_base(base, "token"));

    assert_eq!(initialize(&provider, None), CKR_OK);
    let mut dest = [0u8; 16];
    assert_eq!(generate(&provider, SESSION_OK, &mut dest), CKR_OK);

    assert_eq!(finalize(&provider), CKR_FUNCTION_FAILED);
    let state = provider.read().unwrap();
    assert!(state.is_initialized());
    assert!(state.has_entropy_source());
}

#[test]
fn test_finalize_wipes_entropy() {
    let provider = provider(FakePlatform::new("token"));
    assert_eq!(initialize(&provider, None), CKR_OK);

    let mut dest = [0u8; 100];
    assert_eq!(generate(&provider, SESSION_OK, &mut dest), CKR_OK);
    assert_eq!(provider.read().unwrap().buffered(), KB - 100);

    assert_eq!(finalize(&provider), CKR_OK);
    let state = provider.read().unwrap();
    assert!(!state.has_entropy_source());
    assert_eq!(state.buffered(), 0);
}

#[test]
fn test_token_set_after_first_failure() {
    let provider = provider(FakePlatform::new(""));
    assert_eq!(initialize(&provider, None), CKR_OK);

    let mut dest = [0u8; 32];
    assert_eq!(generate(&provider, SESSION_OK, &mut dest), CKR_EAAS_TOKEN_EMPTY);
    {
        let state = provider.read().unwrap();
        assert!(state.is_initialized());
        assert!(!state.has_entropy_source());
        assert!(state.platform().recorder.calls().is_empty());
        assert_eq!(state.platform().collectors_built.load(Ordering::SeqCst), 0);
    }
    assert_eq!(dest, [0u8; 32]);

    provider.read().unwrap().platform().set_token("now-set");
    assert_eq!(generate(&provider, SESSION_OK, &mut dest), CKR_OK);
    assert_eq!(provider.read().unwrap().platform().recorder.calls(), vec![KB]);
    assert_eq!(u64::from_le_bytes(dest[..8].try_into().unwrap()), 1);
}

#[test]
fn test_collector_failures_map_to_codes() {
    let cases = [
        (EntropyError::InvalidToken, CKR_EAAS_TOKEN_INVALID),
        (EntropyError::TokenRejected, CKR_EAAS_TOKEN_OTHER_FAIL),
        (EntropyError::CaCertificate, CKR_EAAS_CA_CERT_FAILURE),
        (EntropyError::Transport, CKR_GENERAL_ERROR),
        (EntropyError::MalformedResponse, CKR_GENERAL_ERROR),
        (EntropyError::HostMemory, CKR_HOST_MEMORY),
    ];

    for (err, expected) in cases {
        let provider = provider(FakePlatform::new("token"));
        assert_eq!(initialize(&provider, None), CKR_OK);
        *provider.read().unwrap().platform().recorder.fail_with.lock().unwrap() = Some(err);

        let mut dest = [0u8; 8];
        assert_eq!(generate(&provider, SESSION_OK, &mut dest), expected, "{:?}", err);
        assert_eq!(dest, [0u8; 8]);
    }
}

#[test]
fn test_base_verdict_gates_random() {
    let provider = provider(FakePlatform::new("token"));
    assert_eq!(initialize(&provider, None), CKR_OK);

    let mut dest = [0u8; 8];
    assert_eq!(generate(&provider, SESSION_INVALID, &mut dest), CKR_SESSION_HANDLE_INVALID);
    assert!(provider.read().unwrap().platform().recorder.calls().is_empty());

    // an accepted non-OK verdict still gets remote entropy
    assert_eq!(generate(&provider, SESSION_NO_RNG, &mut dest), CKR_OK);
    assert_eq!(u64::from_le_bytes(dest), 1);
}

#[test]
fn test_zero_length_and_null_buffer() {
    let provider = provider(FakePlatform::new("token"));
    assert_eq!(initialize(&provider, None), CKR_OK);

    assert_eq!(generate(&provider, SESSION_OK, &mut []), CKR_OK);
    assert_eq!(generate(&provider, SESSION_INVALID, &mut []), CKR_SESSION_HANDLE_INVALID);

    let rv = dispatch::boundary("C_GenerateRandom", || unsafe {
        dispatch::generate_random(&provider, SESSION_OK, core::ptr::null_mut(), 16)
    });
    assert_eq!(rv, CKR_ARGUMENTS_BAD);
    assert!(provider.read().unwrap().platform().recorder.calls().is_empty());
}

#[test]
fn test_seed_random_never_supported() {
    let provider = provider(FakePlatform::new("token"));
    assert_eq!(seed(&provider, SESSION_OK), CKR_CRYPTOKI_NOT_INITIALIZED);

    assert_eq!(initialize(&provider, None), CKR_OK);
    assert_eq!(seed(&provider, SESSION_OK), CKR_RANDOM_SEED_NOT_SUPPORTED);
    assert_eq!(seed(&provider, SESSION_NO_RNG), CKR_RANDOM_SEED_NOT_SUPPORTED);
    assert_eq!(seed(&provider, SESSION_INVALID), CKR_SESSION_HANDLE_INVALID);
}

#[test]
fn test_get_info_rebranded() {
    let provider = provider(FakePlatform::new("token"));
    let mut info = CK_INFO::default();
    assert_eq!(get_info(&provider, &mut info), CKR_CRYPTOKI_NOT_INITIALIZED);

    assert_eq!(initialize(&provider, None), CKR_OK);
    assert_eq!(get_info(&provider, &mut info), CKR_OK);

    assert_eq!(&info.manufacturerID, b"EaaS PKCS#11 Shim               ");
    assert_eq!(&info.libraryDescription, b"Wrap of Fake Base Provider      ");
    assert_eq!(info.libraryVersion, LIBRARY_VERSION);
    assert_eq!(info.cryptokiVersion, CK_VERSION { major: 2, minor: 40 });
}

#[test]
fn test_pass_through_verdicts() {
    let provider = provider(FakePlatform::new("token"));
    assert_eq!(
        dispatch::resolve(&provider, |list| list.C_CloseSession).unwrap_err(),
        ProviderError::NotInitialized
    );

    assert_eq!(initialize(&provider, None), CKR_OK);
    let (close, _pin) = dispatch::resolve(&provider, |list| list.C_CloseSession).unwrap();
    assert_eq!(dispatch::verdict(unsafe { close(SESSION_OK) }), Ok(()));
    assert_eq!(
        dispatch::verdict(unsafe { close(SESSION_INVALID) }).unwrap_err().rv(),
        CKR_SESSION_HANDLE_INVALID
    );
}

#[test]
fn test_concurrent_requests_never_share_bytes() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 100;

    let provider = Arc::new(provider(FakePlatform::new("token")));
    let mut args = os_locking_args();
    assert_eq!(initialize(&provider, Some(&mut args)), CKR_OK);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let provider = Arc::clone(&provider);
            thread::spawn(move || {
                let mut words = Vec::new();
                for round in 0..ROUNDS {
                    let mut dest = vec![0u8; 8 * (1 + (t * 7 + round * 13) % 300)];
                    assert_eq!(generate(&provider, SESSION_OK, &mut dest), CKR_OK);
                    words.extend(
                        dest.chunks_exact(8)
                            .map(|w| u64::from_le_bytes(w.try_into().unwrap())),
                    );
                }
                words
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut dispensed = 0usize;
    for handle in handles {
        for word in handle.join().unwrap() {
            assert_ne!(word, 0);
            assert!(seen.insert(word), "word {} dispensed twice", word);
            dispensed += 8;
        }
    }

    let state = provider.read().unwrap();
    assert_eq!(state.platform().recorder.fetched(), dispensed + state.buffered());
}

static LOCKS: AtomicUsize = AtomicUsize::new(0);
static UNLOCKS: AtomicUsize = AtomicUsize::new(0);
static DESTROYS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn app_create(out: *mut CK_VOID_PTR) -> CK_RV {
    *out = Box::into_raw(Box::new(0u8)).cast();
    CKR_OK
}

unsafe extern "C" fn app_destroy(mutex: CK_VOID_PTR) -> CK_RV {
    drop(Box::from_raw(mutex.cast::<u8>()));
    DESTROYS.fetch_add(1, Ordering::SeqCst);
    CKR_OK
}

unsafe extern "C" fn app_lock(_: CK_VOID_PTR) -> CK_RV {
    LOCKS.fetch_add(1, Ordering::SeqCst);
    CKR_OK
}

unsafe extern "C" fn app_unlock(_: CK_VOID_PTR) -> CK_RV {
    UNLOCKS.fetch_add(1, Ordering::SeqCst);
    CKR_OK
}

#[test]
fn test_application_mutex_wraps_every_request() {
    let provider = provider(FakePlatform::new("token"));
    let mut args = os_locking_args();
    args.CreateMutex = Some(app_create);
    args.DestroyMutex = Some(app_destroy);
    args.LockMutex = Some(app_lock);
    args.UnlockMutex = Some(app_unlock);

    assert_eq!(initialize(&provider, Some(&mut args)), CKR_OK);

    let mut dest = [0u8; 64];
    for _ in 0..5 {
        assert_eq!(generate(&provider, SESSION_OK, &mut dest), CKR_OK);
    }
    // a token failure still releases the lock
    *provider.read().unwrap().platform().recorder.fail_with.lock().unwrap() =
        Some(EntropyError::Transport);
    let mut large = vec![0u8; 4 * KB];
    assert_eq!(generate(&provider, SESSION_OK, &mut large), CKR_GENERAL_ERROR);

    assert_eq!(LOCKS.load(Ordering::SeqCst), 6);
    assert_eq!(UNLOCKS.load(Ordering::SeqCst), 6);

    assert_eq!(finalize(&provider), CKR_OK);
    assert_eq!(DESTROYS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_exit_wipes_unfinalized_buffer() {
    let provider = provider(FakePlatform::new("token"));
    assert_eq!(initialize(&provider, None), CKR_OK);
    let mut dest = [0u8; 24];
    assert_eq!(generate(&provider, SESSION_OK, &mut dest), CKR_OK);

    // a reader in flight: exit must not block on it
    {
        let state = provider.read().unwrap();
        dispatch::release_at_exit(&provider);
        assert_eq!(state.buffered(), KB - 24);
    }

    dispatch::release_at_exit(&provider);
    let state = provider.read().unwrap();
    assert!(!state.has_entropy_source());
    assert_eq!(state.buffered(), 0);
    assert!(state.is_initialized());
}
