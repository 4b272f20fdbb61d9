//! Vendor-defined return codes reported by this provider.
//!
//! These sit in the `CKR_VENDOR_DEFINED` (0x8000_0000) range and are
//! exported to C through the generated `include/eaas_pkcs11_vendor.h`.

use super::CK_RV;

/// `EAAS_TOKEN` is unset or empty.
pub const CKR_EAAS_TOKEN_EMPTY: CK_RV = 0x8000_0001;
/// The entropy service rejected the token (HTTP 401).
pub const CKR_EAAS_TOKEN_INVALID: CK_RV = 0x8000_0002;
/// The entropy service refused the token for another reason (HTTP 403).
pub const CKR_EAAS_TOKEN_OTHER_FAIL: CK_RV = 0x8000_0003;
/// TLS certificate validation against the configured trust roots failed.
pub const CKR_EAAS_CA_CERT_FAILURE: CK_RV = 0x8000_0004;
/// `BASE_PROVIDER_PATH` is unset or empty.
pub const CKR_EAAS_BASE_PROVIDER_EMPTY: CK_RV = 0x8000_0005;
/// The base provider could not be loaded or its function table is incomplete.
pub const CKR_EAAS_BASE_PROVIDER_OPEN_FAILED: CK_RV = 0x8000_0006;
