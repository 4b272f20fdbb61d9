//! Network entropy collection.
//!
//! `eaas` talks to the remote Entropy-as-a-Service endpoint and implements
//! [`EntropyCollector`](crate::entropy::EntropyCollector) on top of it.

pub mod eaas;

pub use eaas::EaasCollector;
