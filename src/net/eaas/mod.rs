//! Entropy-as-a-Service collector.
//!
//! Fetches entropy over authenticated HTTPS:
//!
//! ```text
//! GET <endpoint>/api/v1/quantum-entropy?size=<KiB>
//! Authorization: Bearer <token>
//! Accept: application/json
//! ```
//!
//! Requests above the service limit are split into sequential calls, each
//! with its own retry budget.

pub mod client;
pub mod response;

pub use client::EaasClient;

use crate::config::EaasConfig;
use crate::entropy::{round_up_to_kb, EntropyCollector, EntropyError, KB};

pub struct EaasCollector {
    client: EaasClient,
    max_request: usize,
}

impl EaasCollector {
    pub fn new(config: &EaasConfig) -> Result<Self, EntropyError> {
        let max_request = round_up_to_kb(config.max_request_bytes.max(KB));
        Ok(Self {
            client: EaasClient::new(config)?,
            max_request,
        })
    }
}

impl EntropyCollector for EaasCollector {
    fn name(&self) -> &'static str {
        "EaaS"
    }

    fn collect(&mut self, dest: &mut [u8]) -> Result<(), EntropyError> {
        if dest.len() % KB != 0 {
            return Err(EntropyError::UnalignedRequest);
        }
        for chunk in dest.chunks_mut(self.max_request) {
            self.client.fetch(chunk)?;
        }
        Ok(())
    }
}
