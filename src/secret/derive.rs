//! Secret and commitment derivation
//!
//! `secret = sha256(signature)` and `secret_hash = sha256(secret)`. The raw
//! signature is never revealed on-chain; only its digest is.

use super::store::{SecretMaterial, SecretStore};
use crate::error::CoordinatorResult;
use crate::order::Order;
use crate::wallet::MessageSigner;

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of the message the wallet signs to derive a swap secret
pub const SECRET_MESSAGE_PREFIX: &str = "Sign this message to derive the secret for swap nonce ";

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Build the message bound to one order's nonce
pub fn derive_sign_message(nonce: &str) -> String {
    format!("{}{}", SECRET_MESSAGE_PREFIX, nonce)
}

/// Derive `(secret, secret_hash)` from a signature over the nonce message
pub fn derive_secret(nonce: &str, signature: &[u8]) -> ([u8; 32], [u8; 32]) {
    let secret = sha256(signature);
    let secret_hash = sha256(&secret);
    debug!("Derived secret commitment for nonce {}", nonce);
    (secret, secret_hash)
}

/// Derives secrets once per order and serves cached material afterwards
pub struct CommitmentDeriver {
    store: Arc<dyn SecretStore>,
}

impl CommitmentDeriver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub async fn cached(&self, order_id: &str) -> CoordinatorResult<Option<SecretMaterial>> {
        self.store.get(order_id).await
    }

    /// Return cached material, or sign, derive and persist it
    pub async fn material_for(
        &self,
        order: &Order,
        signer: &dyn MessageSigner,
    ) -> CoordinatorResult<SecretMaterial> {
        if let Some(material) = self.store.get(&order.order_id).await? {
            debug!("Using cached secret for order {}", order.order_id);
            return Ok(material);
        }

        let nonce = order.secret_nonce().to_string();
        let message = derive_sign_message(&nonce);
        let signature = signer.sign_message(message.as_bytes()).await?;
        let (secret, secret_hash) = derive_secret(&nonce, &signature);

        let material = SecretMaterial::new(&order.order_id, &nonce, secret, secret_hash);
        // First write wins; a concurrent writer's material is returned instead
        let stored = self.store.put(material).await?;

        info!(
            "Secret derived for order {} (hash 0x{})",
            order.order_id,
            hex::encode(stored.secret_hash)
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::SwapIntent;
    use crate::secret::MemorySecretStore;
    use crate::wallet::MockMessageSigner;
    use mockall::predicate::eq;

    fn order() -> Order {
        Order {
            order_id: "ord-42".to_string(),
            source_intent: SwapIntent {
                asset: "bitcoin_testnet:btc".to_string(),
                commitment_hash: Some("0xfeed".to_string()),
                ..Default::default()
            },
            destination_intent: SwapIntent {
                asset: "arbitrum_sepolia:wbtc".to_string(),
                ..Default::default()
            },
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let signature = [7u8; 65];
        assert_eq!(derive_secret("n", &signature), derive_secret("n", &signature));
        assert_ne!(derive_secret("n", &signature).0, derive_secret("n", &[8u8; 65]).0);
    }

    #[test]
    fn test_commitment_chain() {
        let signature = b"wallet-signature-bytes";
        let (secret, secret_hash) = derive_secret("n", signature);
        assert_eq!(secret, sha256(signature));
        assert_eq!(secret_hash, sha256(&sha256(signature)));
        assert_ne!(secret.as_slice(), &signature[..]);
    }

    #[test]
    fn test_message_binds_nonce() {
        assert_eq!(
            derive_sign_message("0xfeed"),
            format!("{}0xfeed", SECRET_MESSAGE_PREFIX)
        );
        assert_ne!(derive_sign_message("a"), derive_sign_message("b"));
    }

    #[tokio::test]
    async fn test_cached_path_signs_once() {
        let deriver = CommitmentDeriver::new(Arc::new(MemorySecretStore::new()));
        let expected_message = derive_sign_message("0xfeed").into_bytes();

        let mut signer = MockMessageSigner::new();
        signer
            .expect_sign_message()
            .with(eq(expected_message))
            .times(1)
            .returning(|_| Ok(vec![1u8; 65]));

        let first = deriver.material_for(&order(), &signer).await.unwrap();
        let second = deriver.material_for(&order(), &signer).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.nonce, "0xfeed");
        assert_eq!(first.secret_hash, sha256(&sha256(&[1u8; 65])));
    }

    #[tokio::test]
    async fn test_rejected_signature_stores_nothing() {
        let deriver = CommitmentDeriver::new(Arc::new(MemorySecretStore::new()));
        let mut signer = MockMessageSigner::new();
        signer.expect_sign_message().returning(|_| {
            Err(crate::error::CoordinatorError::SigningRejected(
                "user dismissed".to_string(),
            ))
        });

        assert!(deriver.material_for(&order(), &signer).await.is_err());
        assert!(deriver.cached("ord-42").await.unwrap().is_none());
    }
}
