//! Entry points with behavior of their own, and the exported function table.

#![allow(non_snake_case)]

use std::sync::{Once, RwLock};

use super::forward::*;
use super::{
    boundary, finalize, generate_random, get_info, initialize, release_at_exit, seed_random,
};
use crate::logging;
use crate::pkcs11::*;
use crate::platform::SystemPlatform;
use crate::provider::{ProviderError, ProviderState};

/// The process-wide provider behind the exported functions.
pub static PROVIDER: RwLock<ProviderState<SystemPlatform>> =
    RwLock::new(ProviderState::new(SystemPlatform));

static EXIT_HOOK: Once = Once::new();

extern "C" fn wipe_at_exit() {
    release_at_exit(&PROVIDER);
}

/// Statics are never dropped, so the buffer is wiped from an exit handler
/// when the host skips `C_Finalize`.
fn register_exit_hook() {
    EXIT_HOOK.call_once(|| {
        // Safety: `wipe_at_exit` only touches `PROVIDER`, which lives as
        // long as this library is mapped.
        if unsafe { libc::atexit(wipe_at_exit) } != 0 {
            log::warn!("Could not register exit handler, buffered entropy is wiped on C_Finalize only");
        }
    });
}

#[no_mangle]
pub unsafe extern "C" fn C_Initialize(pInitArgs: CK_VOID_PTR) -> CK_RV {
    logging::init();
    register_exit_hook();
    boundary("C_Initialize", || unsafe { initialize(&PROVIDER, pInitArgs) })
}

#[no_mangle]
pub unsafe extern "C" fn C_Finalize(pReserved: CK_VOID_PTR) -> CK_RV {
    boundary("C_Finalize", || unsafe { finalize(&PROVIDER, pReserved) })
}

#[no_mangle]
pub unsafe extern "C" fn C_GetInfo(pInfo: *mut CK_INFO) -> CK_RV {
    boundary("C_GetInfo", || unsafe { get_info(&PROVIDER, pInfo) })
}

/// Hands out this library's table. Usable before `C_Initialize`.
#[no_mangle]
pub unsafe extern "C" fn C_GetFunctionList(ppFunctionList: *mut *mut CK_FUNCTION_LIST) -> CK_RV {
    boundary("C_GetFunctionList", || {
        if ppFunctionList.is_null() {
            return Err(ProviderError::ArgumentsBad);
        }
        // Safety: checked non-null; callers never write through the table.
        unsafe { *ppFunctionList = core::ptr::addr_of!(FUNCTION_LIST).cast_mut() };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn C_SeedRandom(
    hSession: CK_SESSION_HANDLE,
    pSeed: *mut CK_BYTE,
    _ulSeedLen: CK_ULONG,
) -> CK_RV {
    boundary("C_SeedRandom", || unsafe { seed_random(&PROVIDER, hSession, pSeed) })
}

#[no_mangle]
pub unsafe extern "C" fn C_GenerateRandom(
    hSession: CK_SESSION_HANDLE,
    RandomData: *mut CK_BYTE,
    ulRandomLen: CK_ULONG,
) -> CK_RV {
    boundary("C_GenerateRandom", || unsafe {
        generate_random(&PROVIDER, hSession, RandomData, ulRandomLen)
    })
}

pub static FUNCTION_LIST: CK_FUNCTION_LIST = CK_FUNCTION_LIST {
    version: CK_VERSION {
        major: CRYPTOKI_VERSION_MAJOR,
        minor: CRYPTOKI_VERSION_MINOR,
    },
    C_Initialize: Some(C_Initialize),
    C_Finalize: Some(C_Finalize),
    C_GetInfo: Some(C_GetInfo),
    C_GetFunctionList: Some(C_GetFunctionList),
    C_GetSlotList: Some(C_GetSlotList),
    C_GetSlotInfo: Some(C_GetSlotInfo),
    C_GetTokenInfo: Some(C_GetTokenInfo),
    C_GetMechanismList: Some(C_GetMechanismList),
    C_GetMechanismInfo: Some(C_GetMechanismInfo),
    C_InitToken: Some(C_InitToken),
    C_InitPIN: Some(C_InitPIN),
    C_SetPIN: Some(C_SetPIN),
    C_OpenSession: Some(C_OpenSession),
    C_CloseSession: Some(C_CloseSession),
    C_CloseAllSessions: Some(C_CloseAllSessions),
    C_GetSessionInfo: Some(C_GetSessionInfo),
    C_GetOperationState: Some(C_GetOperationState),
    C_SetOperationState: Some(C_SetOperationState),
    C_Login: Some(C_Login),
    C_Logout: Some(C_Logout),
    C_CreateObject: Some(C_CreateObject),
    C_CopyObject: Some(C_CopyObject),
    C_DestroyObject: Some(C_DestroyObject),
    C_GetObjectSize: Some(C_GetObjectSize),
    C_GetAttributeValue: Some(C_GetAttributeValue),
    C_SetAttributeValue: Some(C_SetAttributeValue),
    C_FindObjectsInit: Some(C_FindObjectsInit),
    C_FindObjects: Some(C_FindObjects),
    C_FindObjectsFinal: Some(C_FindObjectsFinal),
    C_EncryptInit: Some(C_EncryptInit),
    C_Encrypt: Some(C_Encrypt),
    C_EncryptUpdate: Some(C_EncryptUpdate),
    C_EncryptFinal: Some(C_EncryptFinal),
    C_DecryptInit: Some(C_DecryptInit),
    C_Decrypt: Some(C_Decrypt),
    C_DecryptUpdate: Some(C_DecryptUpdate),
    C_DecryptFinal: Some(C_DecryptFinal),
    C_DigestInit: Some(C_DigestInit),
    C_Digest: Some(C_Digest),
    C_DigestUpdate: Some(C_DigestUpdate),
    C_DigestKey: Some(C_DigestKey),
    C_DigestFinal: Some(C_DigestFinal),
    C_SignInit: Some(C_SignInit),
    C_Sign: Some(C_Sign),
    C_SignUpdate: Some(C_SignUpdate),
    C_SignFinal: Some(C_SignFinal),
    C_SignRecoverInit: Some(C_SignRecoverInit),
    C_SignRecover: Some(C_SignRecover),
    C_VerifyInit: Some(C_VerifyInit),
    C_Verify: Some(C_Verify),
    C_VerifyUpdate: Some(C_VerifyUpdate),
    C_VerifyFinal: Some(C_VerifyFinal),
    C_VerifyRecoverInit: Some(C_VerifyRecoverInit),
    C_VerifyRecover: Some(C_VerifyRecover),
    C_DigestEncryptUpdate: Some(C_DigestEncryptUpdate),
    C_DecryptDigestUpdate: Some(C_DecryptDigestUpdate),
    C_SignEncryptUpdate: Some(C_SignEncryptUpdate),
    C_DecryptVerifyUpdate: Some(C_DecryptVerifyUpdate),
    C_GenerateKey: Some(C_GenerateKey),
    C_GenerateKeyPair: Some(C_GenerateKeyPair),
    C_WrapKey: Some(C_WrapKey),
    C_UnwrapKey: Some(C_UnwrapKey),
    C_DeriveKey: Some(C_DeriveKey),
    C_SeedRandom: Some(C_SeedRandom),
    C_GenerateRandom: Some(C_GenerateRandom),
    C_GetFunctionStatus: Some(C_GetFunctionStatus),
    C_CancelFunction: Some(C_CancelFunction),
    C_WaitForSlotEvent: Some(C_WaitForSlotEvent),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_complete() {
        assert!(FUNCTION_LIST.missing_entries().is_empty());
        assert_eq!(FUNCTION_LIST.version, CK_VERSION { major: 2, minor: 40 });
    }

    #[test]
    fn test_get_function_list() {
        let mut list: *mut CK_FUNCTION_LIST = core::ptr::null_mut();
        assert_eq!(unsafe { C_GetFunctionList(&mut list) }, CKR_OK);
        assert!(core::ptr::eq(list, &FUNCTION_LIST));
        assert_eq!(unsafe { C_GetFunctionList(core::ptr::null_mut()) }, CKR_ARGUMENTS_BAD);
    }

    #[test]
    fn test_exit_hook_registers_once() {
        register_exit_hook();
        register_exit_hook();
        assert!(EXIT_HOOK.is_completed());
        // harmless on an uninitialized provider
        wipe_at_exit();
        assert_eq!(PROVIDER.read().unwrap().buffered(), 0);
    }

    #[test]
    fn test_calls_before_initialize() {
        let mut byte = 0u8;
        assert_eq!(unsafe { C_GenerateRandom(1, &mut byte, 1) }, CKR_CRYPTOKI_NOT_INITIALIZED);
        assert_eq!(unsafe { C_SeedRandom(1, &mut byte, 1) }, CKR_CRYPTOKI_NOT_INITIALIZED);
        assert_eq!(unsafe { C_CloseSession(1) }, CKR_CRYPTOKI_NOT_INITIALIZED);
        assert_eq!(
            unsafe { C_Finalize(core::ptr::null_mut()) },
            CKR_CRYPTOKI_NOT_INITIALIZED
        );
    }
}
