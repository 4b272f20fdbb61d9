//! Process environment seam.
//!
//! `ProviderState` reaches the outside world only through [`Platform`]:
//! loading the base provider, reading the entropy settings and building the
//! network collector. [`SystemPlatform`] does this for real; tests plug in
//! an in-process fake.

pub mod system;

pub use system::SystemPlatform;

use crate::config::EaasConfig;
use crate::entropy::EntropyCollector;
use crate::provider::{BaseProvider, ProviderError};

pub trait Platform: Send + Sync {
    /// Resolves and validates the base provider. Called from `C_Initialize`.
    fn load_base_provider(&self) -> Result<BaseProvider, ProviderError>;

    /// Current entropy service settings. Called when the entropy source is
    /// first needed.
    fn entropy_config(&self) -> EaasConfig;

    /// Builds the collector that refills the entropy buffer.
    fn entropy_collector(
        &self,
        config: &EaasConfig,
    ) -> Result<Box<dyn EntropyCollector>, ProviderError>;
}
