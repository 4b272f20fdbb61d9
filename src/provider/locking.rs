//! Threading mode and application mutex callbacks.
//!
//! `C_Initialize` either supplies all four mutex callbacks or none of them.
//! With callbacks the application's mutex guards the entropy buffer; without
//! them `CKF_OS_LOCKING_OK` selects OS locking, otherwise the caller promises
//! single-threaded use.

use core::ptr;

use super::ProviderError;
use crate::pkcs11::*;

type MutexFn = unsafe extern "C" fn(CK_VOID_PTR) -> CK_RV;

/// The application's mutex callbacks, all present.
#[derive(Debug, Clone, Copy)]
pub struct MutexCallbacks {
    pub create: unsafe extern "C" fn(*mut CK_VOID_PTR) -> CK_RV,
    pub destroy: MutexFn,
    pub lock: MutexFn,
    pub unlock: MutexFn,
}

/// How concurrent calls are serialized, fixed from initialize to finalize.
#[derive(Debug, Clone, Copy)]
pub enum Threading {
    /// No locking was requested.
    Single,
    /// `CKF_OS_LOCKING_OK` without callbacks.
    OsLocking,
    /// Application-supplied callbacks, preferred whenever they are given.
    Custom(MutexCallbacks),
}

impl Threading {
    /// Derives the threading mode from `C_Initialize` arguments.
    ///
    /// # Errors
    /// `ArgumentsBad` if only some of the callbacks are supplied.
    pub fn from_args(args: Option<&CK_C_INITIALIZE_ARGS>) -> Result<Self, ProviderError> {
        let Some(args) = args else {
            return Ok(Threading::Single);
        };

        match (args.CreateMutex, args.DestroyMutex, args.LockMutex, args.UnlockMutex) {
            (Some(create), Some(destroy), Some(lock), Some(unlock)) => {
                Ok(Threading::Custom(MutexCallbacks {
                    create,
                    destroy,
                    lock,
                    unlock,
                }))
            }
            (None, None, None, None) => {
                if args.flags & CKF_OS_LOCKING_OK != 0 {
                    Ok(Threading::OsLocking)
                } else {
                    Ok(Threading::Single)
                }
            }
            _ => {
                log::error!("C_Initialize needs all four mutex callbacks or none");
                Err(ProviderError::ArgumentsBad)
            }
        }
    }

    pub fn is_multithreaded(&self) -> bool {
        !matches!(self, Threading::Single)
    }
}

/// A mutex created through the application's callbacks.
pub struct CustomMutex {
    handle: CK_VOID_PTR,
    callbacks: MutexCallbacks,
    destroyed: bool,
}

// Safety: the handle is only ever passed back to the application's own
// callbacks, which Cryptoki requires to be callable from any thread.
unsafe impl Send for CustomMutex {}
unsafe impl Sync for CustomMutex {}

impl CustomMutex {
    pub fn create(callbacks: MutexCallbacks) -> Result<Self, ProviderError> {
        let mut handle: CK_VOID_PTR = ptr::null_mut();
        // Safety: `create` was supplied by the application for exactly this use.
        let rv = unsafe { (callbacks.create)(&mut handle) };
        if rv != CKR_OK {
            log::error!("CreateMutex callback failed with {:#x}", rv);
            return Err(ProviderError::MutexCallback(rv));
        }
        Ok(Self {
            handle,
            callbacks,
            destroyed: false,
        })
    }

    /// Blocks until the mutex is held.
    pub fn lock(&self) -> Result<CustomMutexGuard<'_>, ProviderError> {
        // Safety: `handle` came from the matching `create` callback.
        let rv = unsafe { (self.callbacks.lock)(self.handle) };
        if rv != CKR_OK {
            log::error!("LockMutex callback failed with {:#x}", rv);
            return Err(ProviderError::MutexCallback(rv));
        }
        Ok(CustomMutexGuard {
            mutex: self,
            released: false,
        })
    }

    fn unlock(&self) -> Result<(), ProviderError> {
        // Safety: only called by a guard that holds the lock.
        let rv = unsafe { (self.callbacks.unlock)(self.handle) };
        if rv != CKR_OK {
            log::error!("UnlockMutex callback failed with {:#x}", rv);
            return Err(ProviderError::MutexCallback(rv));
        }
        Ok(())
    }

    /// Hands the mutex back to the application.
    pub fn destroy(mut self) -> Result<(), ProviderError> {
        self.destroy_inner()
    }

    fn destroy_inner(&mut self) -> Result<(), ProviderError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        // Safety: `handle` came from `create` and is destroyed exactly once.
        let rv = unsafe { (self.callbacks.destroy)(self.handle) };
        if rv != CKR_OK {
            log::error!("DestroyMutex callback failed with {:#x}", rv);
            return Err(ProviderError::MutexCallback(rv));
        }
        Ok(())
    }
}

impl Drop for CustomMutex {
    fn drop(&mut self) {
        let _ = self.destroy_inner();
    }
}

impl core::fmt::Debug for CustomMutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CustomMutex")
            .field("handle", &self.handle)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

/// Holds a [`CustomMutex`]. Unlocks on drop; use [`release`](Self::release)
/// to observe an unlock failure.
#[derive(Debug)]
pub struct CustomMutexGuard<'a> {
    mutex: &'a CustomMutex,
    released: bool,
}

impl CustomMutexGuard<'_> {
    pub fn release(mut self) -> Result<(), ProviderError> {
        self.released = true;
        self.mutex.unlock()
    }
}

impl Drop for CustomMutexGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.mutex.unlock();
        }
    }
}
