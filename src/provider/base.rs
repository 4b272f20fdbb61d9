//! The base PKCS#11 provider every call is forwarded to.
//!
//! The library is opened with `dlopen`, its table is fetched through its
//! `C_GetFunctionList` and rejected unless every entry is present.
//!
//! The `dlopen` handle is shared: every call made into the base provider
//! holds a [`LibraryPin`], so `dlclose` waits for the last one to return even
//! if the provider is finalized meanwhile.

use core::ffi::{c_void, CStr};
use core::ptr::{self, NonNull};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use super::ProviderError;
use crate::pkcs11::*;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
const DLOPEN_FLAGS: libc::c_int = libc::RTLD_LAZY | libc::RTLD_LOCAL | libc::RTLD_DEEPBIND;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
const DLOPEN_FLAGS: libc::c_int = libc::RTLD_LAZY | libc::RTLD_LOCAL;

type GetFunctionListFn = unsafe extern "C" fn(*mut *mut CK_FUNCTION_LIST) -> CK_RV;

/// A `dlopen` handle, closed on drop.
#[derive(Debug)]
struct Library {
    handle: NonNull<c_void>,
}

// Safety: `dlopen` handles are process-global and usable from any thread.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    fn open(path: &Path) -> Result<Self, ProviderError> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            log::error!("Base provider path contains a NUL byte");
            ProviderError::BaseProviderOpenFailed
        })?;

        // Safety: `c_path` is a valid NUL-terminated string.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), DLOPEN_FLAGS) };
        match NonNull::new(handle) {
            Some(handle) => Ok(Self { handle }),
            None => {
                log::error!("Could not open base provider {}: {}", path.display(), dlerror_message());
                Err(ProviderError::BaseProviderOpenFailed)
            }
        }
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        // Safety: the handle came from a successful `dlopen`.
        if unsafe { libc::dlclose(self.handle.as_ptr()) } != 0 {
            log::warn!("dlclose failed: {}", dlerror_message());
        }
    }
}

/// A validated base provider function table.
pub struct BaseProvider {
    functions: NonNull<CK_FUNCTION_LIST>,
    // Keeps `functions` mapped.
    library: LibraryPin,
}

/// Keeps the base library mapped while held. Empty for static tables.
#[derive(Debug, Clone, Default)]
pub struct LibraryPin(Option<Arc<Library>>);

// Safety: the table is immutable after validation and Cryptoki functions are
// callable from any thread once the provider is initialized.
unsafe impl Send for BaseProvider {}
unsafe impl Sync for BaseProvider {}

impl BaseProvider {
    /// Loads the shared library at `path` and fetches its function table.
    ///
    /// # Errors
    /// `BaseProviderOpenFailed` if the library cannot be opened, lacks
    /// `C_GetFunctionList`, or returns an incomplete table.
    pub fn open(path: &Path) -> Result<Self, ProviderError> {
        let library = Library::open(path)?;

        // Safety: looking up a symbol in a handle we own.
        let symbol = unsafe { libc::dlsym(library.handle.as_ptr(), c"C_GetFunctionList".as_ptr()) };
        if symbol.is_null() {
            log::error!(
                "Base provider {} has no C_GetFunctionList: {}",
                path.display(),
                dlerror_message()
            );
            return Err(ProviderError::BaseProviderOpenFailed);
        }

        // Safety: `C_GetFunctionList` has this signature in every Cryptoki library.
        let get_function_list: GetFunctionListFn = unsafe { core::mem::transmute(symbol) };

        let mut list: *mut CK_FUNCTION_LIST = ptr::null_mut();
        // Safety: `list` is a valid out-pointer.
        let rv = unsafe { get_function_list(&mut list) };
        if rv != CKR_OK {
            log::error!("Base provider C_GetFunctionList returned {:#x}", rv);
            return Err(ProviderError::BaseProviderOpenFailed);
        }
        let functions = NonNull::new(list).ok_or_else(|| {
            log::error!("Base provider C_GetFunctionList returned a null table");
            ProviderError::BaseProviderOpenFailed
        })?;

        let provider = Self {
            functions,
            library: LibraryPin(Some(Arc::new(library))),
        };
        provider.validate()?;

        log::info!("Loaded base provider {}", path.display());
        Ok(provider)
    }

    /// Wraps a table that lives for the whole process, such as one linked
    /// in statically.
    pub fn from_static(functions: &'static CK_FUNCTION_LIST) -> Result<Self, ProviderError> {
        let provider = Self {
            functions: NonNull::from(functions),
            library: LibraryPin::default(),
        };
        provider.validate()?;
        Ok(provider)
    }

    pub fn functions(&self) -> &CK_FUNCTION_LIST {
        // Safety: `functions` is non-null and outlives `self` (static, or
        // kept mapped by `library`).
        unsafe { self.functions.as_ref() }
    }

    /// A handle that keeps the library mapped for the length of one call.
    pub fn pin(&self) -> LibraryPin {
        self.library.clone()
    }

    fn validate(&self) -> Result<(), ProviderError> {
        let missing = self.functions().missing_entries();
        if missing.is_empty() {
            return Ok(());
        }
        log::error!("Base provider is missing {}", missing.join(", "));
        Err(ProviderError::BaseProviderOpenFailed)
    }
}

impl core::fmt::Debug for BaseProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BaseProvider")
            .field("functions", &self.functions)
            .field("dynamic", &self.library.0.is_some())
            .finish()
    }
}

fn dlerror_message() -> String {
    // Safety: `dlerror` returns null or a NUL-terminated thread-local string.
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return String::from("unknown error");
    }
    unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
}
