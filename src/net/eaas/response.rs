//! Entropy service response body.
//!
//! ```json
//! { "random": ["<base64>", "<base64>", ...] }
//! ```
//!
//! The decoded chunks are concatenated in order and must add up to exactly
//! the number of bytes requested.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::entropy::EntropyError;

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct EntropyResponse {
    random: Vec<String>,
}

/// Parses `body` and writes the decoded entropy into `dest`.
///
/// # Errors
/// `MalformedResponse` if the body is not the expected JSON document or a
/// chunk is not valid base64, `LengthMismatch` if the decoded total differs
/// from `dest.len()`.
pub fn decode_into(body: &[u8], dest: &mut [u8]) -> Result<(), EntropyError> {
    let response: EntropyResponse = serde_json::from_slice(body).map_err(|err| {
        log::debug!("Entropy response is not valid: {}", err);
        EntropyError::MalformedResponse
    })?;

    let mut written = 0usize;
    let mut overflow = 0usize;

    for encoded in &response.random {
        let chunk = Zeroizing::new(
            STANDARD
                .decode(encoded)
                .map_err(|_| EntropyError::MalformedResponse)?,
        );

        let room = dest.len() - written;
        if chunk.len() > room {
            dest[written..].copy_from_slice(&chunk[..room]);
            written += room;
            overflow += chunk.len() - room;
        } else {
            dest[written..written + chunk.len()].copy_from_slice(&chunk);
            written += chunk.len();
        }
    }

    let actual = written + overflow;
    if actual != dest.len() {
        dest.zeroize();
        return Err(EntropyError::LengthMismatch {
            expected: dest.len(),
            actual,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_for(chunks: &[&[u8]]) -> Vec<u8> {
        let encoded: Vec<String> = chunks.iter().map(|c| STANDARD.encode(c)).collect();
        serde_json::to_vec(&serde_json::json!({ "random": encoded })).unwrap()
    }

    #[test]
    fn test_decode_concatenates_chunks() {
        let first = [1u8; 600];
        let second = [2u8; 424];
        let body = body_for(&[&first, &second]);

        let mut dest = [0u8; 1024];
        decode_into(&body, &mut dest).unwrap();
        assert_eq!(&dest[..600], &first[..]);
        assert_eq!(&dest[600..], &second[..]);
    }

    #[test]
    fn test_short_response() {
        let body = body_for(&[&[9u8; 1000]]);
        let mut dest = [0u8; 1024];
        assert_eq!(
            decode_into(&body, &mut dest),
            Err(EntropyError::LengthMismatch { expected: 1024, actual: 1000 })
        );
        assert!(dest.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_long_response() {
        let body = body_for(&[&[9u8; 1024], &[7u8; 10]]);
        let mut dest = [0u8; 1024];
        assert_eq!(
            decode_into(&body, &mut dest),
            Err(EntropyError::LengthMismatch { expected: 1024, actual: 1034 })
        );
        assert!(dest.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_malformed_bodies() {
        let bodies: [&[u8]; 5] = [
            b"not json",
            b"[1, 2, 3]",
            b"{\"entropy\": []}",
            b"{\"random\": \"AAAA\"}",
            b"{\"random\": [\"***\"]}",
        ];
        let mut dest = [0u8; 16];
        for body in bodies {
            assert_eq!(decode_into(body, &mut dest), Err(EntropyError::MalformedResponse));
        }
    }

    #[test]
    fn test_extra_fields_ignored() {
        let body = serde_json::to_vec(&serde_json::json!({
            "random": [STANDARD.encode([5u8; 16])],
            "size": 16,
        }))
        .unwrap();
        let mut dest = [0u8; 16];
        decode_into(&body, &mut dest).unwrap();
        assert_eq!(dest, [5u8; 16]);
    }
}
