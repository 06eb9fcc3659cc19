//! EVM redemption via the escrow's `claimSwap(bytes32,bytes)`

use super::{decode_hex_32, Finality, RedeemRequest, Redeemer, Submission};
use crate::chain::{ChainFamily, ChainRegistry, ReceiptStatus};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::wallet::{ContractCall, EvmWallet, WalletSessions};

use async_trait::async_trait;
use ethers::abi::{self, Token};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const CLAIM_SWAP_SIGNATURE: &str = "claimSwap(bytes32,bytes)";

/// ABI-encode a `claimSwap(swapId, secret)` call
pub fn encode_claim_swap(swap_id: [u8; 32], secret: &[u8]) -> Vec<u8> {
    let selector = Keccak256::digest(CLAIM_SWAP_SIGNATURE.as_bytes());
    let args = abi::encode(&[
        Token::FixedBytes(swap_id.to_vec()),
        Token::Bytes(secret.to_vec()),
    ]);

    let mut data = Vec::with_capacity(4 + args.len());
    data.extend_from_slice(&selector[..4]);
    data.extend_from_slice(&args);
    data
}

pub struct EvmRedeemer {
    registry: Arc<ChainRegistry>,
    sessions: Arc<WalletSessions>,
    /// Held from the chain switch until the call is submitted; the wallet's
    /// active chain is shared by every order
    submit_lock: Mutex<()>,
}

impl EvmRedeemer {
    pub fn new(registry: Arc<ChainRegistry>, sessions: Arc<WalletSessions>) -> Self {
        Self {
            registry,
            sessions,
            submit_lock: Mutex::new(()),
        }
    }

    async fn wallet(&self) -> CoordinatorResult<Arc<dyn EvmWallet>> {
        self.sessions
            .evm()
            .await
            .ok_or_else(|| CoordinatorError::WalletUnavailable {
                family: ChainFamily::Evm.to_string(),
            })
    }
}

#[async_trait]
impl Redeemer for EvmRedeemer {
    async fn redeem(&self, request: &RedeemRequest) -> CoordinatorResult<Submission> {
        let chain_id = self.registry.evm_chain_id(&request.asset)?;
        let escrow = request.require_escrow()?.to_string();
        let swap_id = decode_hex_32("swap_id", &request.swap_id)?;
        let wallet = self.wallet().await?;

        let _submitting = self.submit_lock.lock().await;
        let active = wallet.active_chain_id().await?;
        if active != chain_id {
            debug!("Switching wallet from chain {} to {}", active, chain_id);
            wallet
                .switch_chain(chain_id)
                .await
                .map_err(|e| match e {
                    CoordinatorError::ChainSwitchFailed { .. } => e,
                    other => CoordinatorError::ChainSwitchFailed {
                        chain_id,
                        message: other.to_string(),
                    },
                })?;
        }

        let tx_hash = wallet
            .send_transaction(ContractCall {
                chain_id,
                to: escrow.clone(),
                data: encode_claim_swap(swap_id, &request.secret),
            })
            .await?;

        info!(
            "claimSwap submitted to {} on chain {}: {}",
            escrow, chain_id, tx_hash
        );
        Ok(Submission {
            family: ChainFamily::Evm,
            tx_hash,
            finality: Finality::AwaitReceipt { chain_id },
        })
    }

    async fn confirm(&self, submission: &Submission) -> CoordinatorResult<ReceiptStatus> {
        let Finality::AwaitReceipt { chain_id } = submission.finality else {
            return Err(CoordinatorError::UnsupportedOperation {
                family: submission.family.to_string(),
                operation: "receipt watching".to_string(),
            });
        };

        self.wallet()
            .await?
            .wait_for_receipt(chain_id, &submission.tx_hash)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redeem::tests::request;
    use crate::wallet::MockEvmWallet;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Wallet whose active chain can move between the switch and the send
    struct SharedSessionWallet {
        active: AtomicU64,
    }

    #[async_trait]
    impl EvmWallet for SharedSessionWallet {
        async fn active_chain_id(&self) -> CoordinatorResult<u64> {
            Ok(self.active.load(Ordering::SeqCst))
        }

        async fn switch_chain(&self, chain_id: u64) -> CoordinatorResult<()> {
            tokio::task::yield_now().await;
            self.active.store(chain_id, Ordering::SeqCst);
            Ok(())
        }

        async fn send_transaction(&self, call: ContractCall) -> CoordinatorResult<String> {
            tokio::task::yield_now().await;
            let active = self.active.load(Ordering::SeqCst);
            if active != call.chain_id {
                return Err(CoordinatorError::SubmissionFailed(format!(
                    "wallet is on chain {} but the call targets {}",
                    active, call.chain_id
                )));
            }
            Ok(format!("0x{:x}", call.chain_id))
        }

        async fn wait_for_receipt(
            &self,
            _chain_id: u64,
            _tx_hash: &str,
        ) -> CoordinatorResult<ReceiptStatus> {
            Ok(ReceiptStatus::Confirmed { block_number: 1 })
        }
    }

    async fn redeemer_with(wallet: MockEvmWallet) -> EvmRedeemer {
        let sessions = Arc::new(WalletSessions::new());
        sessions.set_evm(Arc::new(wallet)).await;
        EvmRedeemer::new(Arc::new(ChainRegistry::new()), sessions)
    }

    #[test]
    fn test_claim_swap_encoding() {
        let data = encode_claim_swap([0x11; 32], &[0x22; 32]);

        assert_eq!(&data[..4], &ethers::utils::id(CLAIM_SWAP_SIGNATURE));
        // selector + bytes32 + offset + length + one padded word
        assert_eq!(data.len(), 4 + 32 * 4);
        assert_eq!(&data[4..36], &[0x11; 32]);
        assert_eq!(data[36 + 31], 0x40);
        assert_eq!(data[68 + 31], 32);
        assert_eq!(&data[100..132], &[0x22; 32]);
    }

    #[tokio::test]
    async fn test_switches_chain_then_submits() {
        let mut wallet = MockEvmWallet::new();
        wallet.expect_active_chain_id().returning(|| Ok(1));
        wallet
            .expect_switch_chain()
            .with(eq(421614))
            .times(1)
            .returning(|_| Ok(()));
        wallet
            .expect_send_transaction()
            .withf(|call| {
                call.chain_id == 421614
                    && call.to == "0x00000000000000000000000000000000000000e5"
                    && call.data == encode_claim_swap([0x11; 32], &[0x22; 32])
            })
            .times(1)
            .returning(|_| Ok("0xfeed".to_string()));

        let redeemer = redeemer_with(wallet).await;
        let submission = redeemer
            .redeem(&request("arbitrum_sepolia:wbtc"))
            .await
            .unwrap();

        assert_eq!(submission.tx_hash, "0xfeed");
        assert_eq!(
            submission.finality,
            Finality::AwaitReceipt { chain_id: 421614 }
        );
    }

    #[tokio::test]
    async fn test_switch_failure_is_chain_switch_failed() {
        let mut wallet = MockEvmWallet::new();
        wallet.expect_active_chain_id().returning(|| Ok(1));
        wallet
            .expect_switch_chain()
            .returning(|_| Err(CoordinatorError::SigningRejected("denied".to_string())));
        wallet.expect_send_transaction().never();

        let redeemer = redeemer_with(wallet).await;
        let err = redeemer
            .redeem(&request("base_sepolia:usdc"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::ChainSwitchFailed { chain_id: 84532, .. }
        ));
        assert!(err.requires_user_action());
    }

    #[tokio::test]
    async fn test_missing_escrow_checked_before_wallet() {
        let redeemer = EvmRedeemer::new(
            Arc::new(ChainRegistry::new()),
            Arc::new(WalletSessions::new()),
        );
        let mut req = request("ethereum_sepolia:wbtc");
        req.escrow_address = None;

        let err = redeemer.redeem(&req).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::MissingRequiredField { .. }));

        let err = redeemer
            .redeem(&request("ethereum_sepolia:wbtc"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::WalletUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_confirm_waits_on_submission_chain() {
        let mut wallet = MockEvmWallet::new();
        wallet
            .expect_wait_for_receipt()
            .times(1)
            .returning(|chain_id, tx_hash| {
                assert_eq!(chain_id, 421614);
                assert_eq!(tx_hash, "0xfeed");
                Ok(ReceiptStatus::Reverted)
            });

        let redeemer = redeemer_with(wallet).await;
        let status = redeemer
            .confirm(&Submission {
                family: ChainFamily::Evm,
                tx_hash: "0xfeed".to_string(),
                finality: Finality::AwaitReceipt { chain_id: 421614 },
            })
            .await
            .unwrap();
        assert_eq!(status, ReceiptStatus::Reverted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_redeems_on_different_chains() {
        let sessions = Arc::new(WalletSessions::new());
        sessions
            .set_evm(Arc::new(SharedSessionWallet {
                active: AtomicU64::new(1),
            }))
            .await;
        let redeemer = EvmRedeemer::new(Arc::new(ChainRegistry::new()), sessions);

        let arbitrum = request("arbitrum_sepolia:wbtc");
        let base = request("base_sepolia:usdc");
        for _ in 0..100 {
            let (a, b) = tokio::join!(redeemer.redeem(&arbitrum), redeemer.redeem(&base));
            assert_eq!(a.unwrap().tx_hash, "0x66eee");
            assert_eq!(b.unwrap().tx_hash, "0x14a34");
        }
    }
}
