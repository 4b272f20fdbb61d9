use super::Platform;
use crate::config::{self, EaasConfig};
use crate::entropy::EntropyCollector;
use crate::net::EaasCollector;
use crate::provider::{BaseProvider, ProviderError};

/// Environment variables, `dlopen` and the HTTPS collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    fn load_base_provider(&self) -> Result<BaseProvider, ProviderError> {
        let Some(path) = config::base_provider_path() else {
            log::error!(
                "Environment variable {} is empty, set it to the base PKCS#11 library",
                config::ENV_BASE_PROVIDER_PATH
            );
            return Err(ProviderError::BaseProviderEmpty);
        };
        BaseProvider::open(&path)
    }

    fn entropy_config(&self) -> EaasConfig {
        EaasConfig::from_env()
    }

    fn entropy_collector(
        &self,
        config: &EaasConfig,
    ) -> Result<Box<dyn EntropyCollector>, ProviderError> {
        Ok(Box::new(EaasCollector::new(config)?))
    }
}
