//! PKCS#11 shim provider backed by an Entropy-as-a-Service endpoint.
//!
//! Every Cryptoki call is forwarded to a base provider loaded from
//! `BASE_PROVIDER_PATH`, except `C_GenerateRandom`, which is served from
//! remote entropy through a page-locked, never-reused buffer.

pub mod config;
pub mod dispatch;
pub mod entropy;
pub mod logging;
pub mod net;
pub mod pkcs11;
pub mod platform;
pub mod provider;

pub use dispatch::FUNCTION_LIST;
pub use entropy::{BufferedEntropySource, EntropyCollector, EntropyError, SecureBuffer};
pub use provider::{ProviderError, ProviderState};
