use std::io::Read;
use std::thread;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use zeroize::Zeroizing;

use super::response;
use crate::config::{EaasConfig, RetryPolicy};
use crate::entropy::{EntropyError, KB};

const ENTROPY_PATH: &str = "/api/v1/quantum-entropy";

/// Largest response body accepted for `len` requested bytes. Base64 grows
/// the payload by a third; the slack covers JSON framing and chunking.
fn body_limit(len: usize) -> usize {
    len * 2 + KB
}

/// Blocking HTTPS client for the entropy service.
pub struct EaasClient {
    client: Client,
    endpoint: String,
    token: Zeroizing<String>,
    retry: RetryPolicy,
}

impl EaasClient {
    /// Builds the HTTP client, trusting `config.ca_cert_path` if set.
    ///
    /// # Errors
    /// `CaCertificate` if the CA bundle cannot be read or parsed,
    /// `Transport` if the TLS backend cannot be initialized otherwise.
    pub fn new(config: &EaasConfig) -> Result<Self, EntropyError> {
        let mut builder = Client::builder();

        if let Some(path) = &config.ca_cert_path {
            let pem = std::fs::read(path).map_err(|err| {
                log::error!("Could not read CA certificate {}: {}", path.display(), err);
                EntropyError::CaCertificate
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|err| {
                log::error!("Could not parse CA certificate {}: {}", path.display(), err);
                EntropyError::CaCertificate
            })?;
            builder = builder.add_root_certificate(cert);
        }

        // rustls only parses added roots here
        let client = builder.build().map_err(|err| {
            log::error!("Could not build HTTP client: {}", err);
            if config.ca_cert_path.is_some() {
                EntropyError::CaCertificate
            } else {
                EntropyError::Transport
            }
        })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
            retry: config.retry,
        })
    }

    /// Fills `dest` with one request's worth of entropy, retrying per the
    /// policy. `dest.len()` must be a multiple of [`KB`].
    pub fn fetch(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        if dest.len() % KB != 0 {
            return Err(EntropyError::UnalignedRequest);
        }

        let url = format!("{}{}?size={}", self.endpoint, ENTROPY_PATH, dest.len() / KB);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = EntropyError::Transport;

        for attempt in 1..=max_attempts {
            match self.attempt(&url, dest) {
                Ok(()) => return Ok(()),
                Err(EntropyError::CaCertificate) => return Err(EntropyError::CaCertificate),
                Err(err) => {
                    log::warn!(
                        "Entropy request attempt {}/{} failed: {}",
                        attempt,
                        max_attempts,
                        err
                    );
                    if err == EntropyError::RateLimited && attempt < max_attempts {
                        thread::sleep(self.retry.backoff(attempt));
                    }
                    last_error = err;
                }
            }
        }

        log::error!("Giving up on entropy request after {} attempts", max_attempts);
        Err(last_error)
    }

    fn attempt(&self, url: &str, dest: &mut [u8]) -> Result<(), EntropyError> {
        log::debug!("Requesting {} bytes of entropy", dest.len());

        let reply = self
            .client
            .get(url)
            .bearer_auth(self.token.as_str())
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|err| {
                log::debug!("Entropy request failed: {}", err);
                classify_transport(&err)
            })?;

        let status = reply.status();
        if status != StatusCode::OK {
            return Err(classify_status(status.as_u16()));
        }

        let limit = body_limit(dest.len());
        let mut body = Zeroizing::new(Vec::with_capacity(limit + 1));
        reply
            .take(limit as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|_| EntropyError::Transport)?;
        if body.len() > limit {
            log::debug!("Entropy response exceeds {} bytes", limit);
            return Err(EntropyError::MalformedResponse);
        }

        response::decode_into(&body, dest)
    }
}

impl core::fmt::Debug for EaasClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EaasClient")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Maps a non-200 HTTP status onto an entropy error.
pub fn classify_status(status: u16) -> EntropyError {
    match status {
        401 => EntropyError::InvalidToken,
        403 => EntropyError::TokenRejected,
        429 => EntropyError::RateLimited,
        other => EntropyError::Status(other),
    }
}

/// TLS verification failures surface somewhere in the error's source chain.
fn classify_transport(err: &reqwest::Error) -> EntropyError {
    let mut source = Some(err as &(dyn std::error::Error + 'static));
    while let Some(current) = source {
        if current.to_string().to_ascii_lowercase().contains("certificate") {
            return EntropyError::CaCertificate;
        }
        source = current.source();
    }
    EntropyError::Transport
}
