// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Pre-shared-key connection authentication.
//!
//! Mutual HMAC-SHA256 challenge-response, run once per connection before
//! any message. The accepting side sends a random nonce; the connecting
//! side answers with the keyed digest of that nonce plus a nonce of its
//! own, which the accepting side answers in turn. Either side closes the
//! connection on a digest mismatch.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type HmacSha256 = Hmac<Sha256>;

/// Challenge nonce length in bytes.
const NONCE_LEN: usize = 16;

/// HMAC-SHA256 digest length in bytes.
const DIGEST_LEN: usize = 32;

/// Errors during the connection handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Socket failure mid-handshake.
    #[error("socket error during handshake: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's digest did not verify against the shared key.
    #[error("peer failed authentication")]
    Rejected,
}

/// The shared secret both ends of every connection must hold.
#[derive(Clone)]
pub struct AuthKey {
    secret: Vec<u8>,
}

impl AuthKey {
    /// Build a key from secret material.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn digest(&self, nonce: &[u8]) -> Vec<u8> {
        // HMAC accepts keys of any length, so `new_from_slice` cannot fail.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(nonce);
        mac.finalize().into_bytes().to_vec()
    }

    fn verify(&self, nonce: &[u8], digest: &[u8]) -> bool {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(nonce);
        mac.verify_slice(digest).is_ok()
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material.
        f.debug_struct("AuthKey").finish_non_exhaustive()
    }
}

/// Run the accepting side of the handshake.
pub async fn authenticate_inbound<S>(stream: &mut S, key: &AuthKey) -> Result<(), AuthError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge: [u8; NONCE_LEN] = rand::random();
    stream.write_all(&challenge).await?;
    stream.flush().await?;

    let mut answer = [0u8; DIGEST_LEN + NONCE_LEN];
    stream.read_exact(&mut answer).await?;
    let (digest, peer_challenge) = answer.split_at(DIGEST_LEN);
    if !key.verify(&challenge, digest) {
        return Err(AuthError::Rejected);
    }

    stream.write_all(&key.digest(peer_challenge)).await?;
    stream.flush().await?;
    Ok(())
}

/// Run the connecting side of the handshake.
pub async fn authenticate_outbound<S>(stream: &mut S, key: &AuthKey) -> Result<(), AuthError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut challenge = [0u8; NONCE_LEN];
    stream.read_exact(&mut challenge).await?;

    let own_challenge: [u8; NONCE_LEN] = rand::random();
    let mut answer = key.digest(&challenge);
    answer.extend_from_slice(&own_challenge);
    stream.write_all(&answer).await?;
    stream.flush().await?;

    let mut peer_digest = [0u8; DIGEST_LEN];
    stream.read_exact(&mut peer_digest).await?;
    if !key.verify(&own_challenge, &peer_digest) {
        return Err(AuthError::Rejected);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_matching_keys_authenticate() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let key = AuthKey::new("a shared secret");
        let server_key = key.clone();

        let server_task =
            tokio::spawn(async move { authenticate_inbound(&mut server, &server_key).await });
        authenticate_outbound(&mut client, &key).await.unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_keys_rejected() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let server_key = AuthKey::new("right secret");
        let client_key = AuthKey::new("wrong secret");

        let server_task =
            tokio::spawn(async move { authenticate_inbound(&mut server, &server_key).await });
        // The server rejects and drops the stream; the client sees either
        // the rejection of its own verify step or the closed pipe.
        let client_result = authenticate_outbound(&mut client, &client_key).await;
        let server_result = server_task.await.unwrap();

        assert!(matches!(server_result, Err(AuthError::Rejected)));
        assert!(client_result.is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = AuthKey::new("super secret");
        assert!(!format!("{key:?}").contains("super"));
    }
}
