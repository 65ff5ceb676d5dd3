//! Builds, signs and submits the mirror transaction for one bridge event

use super::gas::GasEstimator;
use super::nonce::NonceTracker;
use crate::chain::ChainEndpoint;
use crate::config::{RelayerConfig, WardenKey};
use crate::error::{RelayerError, RelayerResult};
use crate::events::BridgeEvent;
use crate::metrics;
use crate::retry::Sleeper;
use crate::state::Outcome;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionRequest, H256, U64};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Transaction sender with bounded retry
pub struct RelayExecutor {
    config: RelayerConfig,
    gas: GasEstimator,
    nonces: NonceTracker,
    sleeper: Arc<dyn Sleeper>,
}

impl RelayExecutor {
    pub fn new(config: RelayerConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            gas: GasEstimator::new(&config),
            nonces: NonceTracker::new(),
            config,
            sleeper,
        }
    }

    /// Relay `event` to `target`, signing with `warden`.
    ///
    /// Never fails: every problem ends up in the returned [`Outcome`].
    pub async fn relay(
        &self,
        event: &BridgeEvent,
        target: &dyn ChainEndpoint,
        warden: Option<&WardenKey>,
    ) -> Outcome {
        let Some(key) = warden else {
            warn!(
                "{}, skipping {} {}",
                RelayerError::MissingWardenKey {
                    role: target.role()
                },
                event.kind().name(),
                event.id()
            );
            return Outcome::SkippedNoKey;
        };

        let wallet = match key.expose().trim().parse::<LocalWallet>() {
            Ok(wallet) => wallet.with_chain_id(target.chain_id()),
            Err(e) => {
                let err = RelayerError::Wallet(format!("invalid warden key: {}", e));
                error!("{}", err);
                return Outcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let calldata = match self.encode_call(event, target) {
            Ok(data) => data,
            Err(e) => {
                error!("Cannot encode mirror call for {}: {}", event.id(), e);
                return Outcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let tx_hash = match self.submit_with_retry(target, &wallet, calldata).await {
            Ok(hash) => hash,
            Err(e) => {
                error!(
                    "Giving up on {} {} after {} attempt(s): {}",
                    event.kind().name(),
                    event.id(),
                    self.config.max_submission_attempts,
                    e
                );
                return Outcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        info!(
            "Sent {} for {} on {} chain: {:?}",
            event.mirror_call().function,
            event.id(),
            target.role(),
            tx_hash
        );

        let detail = if self.config.wait_for_receipt {
            self.confirm(target, tx_hash).await
        } else {
            None
        };
        Outcome::Relayed { tx_hash, detail }
    }

    fn encode_call(&self, event: &BridgeEvent, target: &dyn ChainEndpoint) -> RelayerResult<Bytes> {
        let call = event.mirror_call();
        let function = target.contract().function(call.function)?;
        let data = function
            .encode_input(&call.args)
            .map_err(|e| RelayerError::Contract(format!("{}: {}", call.function, e)))?;
        Ok(Bytes::from(data))
    }

    async fn submit_with_retry(
        &self,
        target: &dyn ChainEndpoint,
        wallet: &LocalWallet,
        calldata: Bytes,
    ) -> RelayerResult<H256> {
        let max_attempts = self.config.max_submission_attempts.max(1);
        let mut backoff = self.config.submission_backoff.start();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.submit_once(target, wallet, calldata.clone()).await {
                Ok(hash) => return Ok(hash),
                Err(e @ RelayerError::Submission { .. }) => e,
                Err(other) => RelayerError::Submission {
                    role: target.role(),
                    message: other.to_string(),
                },
            };

            warn!(
                "Submission attempt {}/{} on {} chain failed: {}",
                attempt,
                max_attempts,
                target.role(),
                err
            );
            if attempt >= max_attempts {
                return Err(err);
            }
            match backoff.next_delay() {
                Some(delay) => self.sleeper.sleep(delay).await,
                None => return Err(err),
            }
        }
    }

    async fn submit_once(
        &self,
        target: &dyn ChainEndpoint,
        wallet: &LocalWallet,
        calldata: Bytes,
    ) -> RelayerResult<H256> {
        let account = wallet.address();
        let nonce = self.nonces.next_nonce(target, account).await?;
        let gas_price = self.gas.gas_price(target).await?;

        let request = TransactionRequest::new()
            .from(account)
            .to(target.contract().address)
            .data(calldata)
            .nonce(nonce)
            .gas_price(gas_price)
            .chain_id(target.chain_id());
        let mut tx = TypedTransaction::Legacy(request);
        let gas_limit = self.gas.gas_limit(target, &tx).await;
        tx.set_gas(gas_limit);

        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;

        debug!(
            "Submitting nonce {} gas {} price {} to {} chain",
            nonce,
            gas_limit,
            gas_price,
            target.role()
        );
        metrics::record_submit_attempt(target.role());
        let hash = target.send_raw_transaction(tx.rlp_signed(&signature)).await?;
        self.nonces.mark_used(target.chain_id(), account, nonce);
        Ok(hash)
    }

    /// Wait for the receipt. The transaction counts as relayed either way; the
    /// returned note records what was observed.
    async fn confirm(&self, target: &dyn ChainEndpoint, tx_hash: H256) -> Option<String> {
        match target
            .wait_for_receipt(tx_hash, self.config.receipt_timeout())
            .await
        {
            Ok(receipt) if receipt.status == Some(U64::from(1)) => {
                debug!(
                    "{:?} mined in block {:?}",
                    tx_hash,
                    receipt.block_number.map(|b| b.as_u64())
                );
                None
            }
            Ok(_) => {
                warn!("Mirror transaction {:?} reverted", tx_hash);
                Some("receipt status 0 (reverted)".to_string())
            }
            Err(e) => {
                warn!("{}", e);
                Some(format!("unconfirmed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::EventKind;
    use crate::retry::BackoffPolicy;
    use crate::test_utils::{
        addr, deposit_log, test_binding, unwrap_log, FakeChain, ReceiptMode, RecordingSleeper,
        TEST_WARDEN_KEY,
    };
    use ethers::abi::Token;
    use ethers::types::U256;
    use std::time::Duration;

    fn executor(config: RelayerConfig) -> (RelayExecutor, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        (RelayExecutor::new(config, sleeper.clone()), sleeper)
    }

    fn config() -> RelayerConfig {
        RelayerConfig {
            submission_backoff: BackoffPolicy::fixed(Duration::from_millis(100), 10),
            ..Default::default()
        }
    }

    fn deposit(block: u64, log_index: u64) -> BridgeEvent {
        let binding = test_binding();
        let log = deposit_log(&binding, block, log_index, addr(0x70), addr(0x42), 1_000);
        BridgeEvent::from_log(
            EventKind::Deposit,
            binding.event(EventKind::Deposit).unwrap(),
            &log,
        )
        .unwrap()
    }

    fn key() -> WardenKey {
        WardenKey::new(TEST_WARDEN_KEY)
    }

    #[tokio::test]
    async fn relays_deposit_as_signed_wrap_call() {
        let chain = FakeChain::destination(50);
        let (executor, sleeper) = executor(config());

        let outcome = executor.relay(&deposit(10, 0), &chain, Some(&key())).await;
        assert!(matches!(outcome, Outcome::Relayed { detail: None, .. }));

        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        let (tx, signature) = &sent[0];
        let binding = test_binding();
        let expected = binding
            .function("wrap")
            .unwrap()
            .encode_input(&[
                Token::Address(addr(0x70)),
                Token::Address(addr(0x42)),
                Token::Uint(U256::from(1_000)),
            ])
            .unwrap();

        assert_eq!(tx.to_addr(), Some(&binding.address));
        assert_eq!(tx.data().map(|d| d.to_vec()), Some(expected));
        assert_eq!(tx.nonce(), Some(&U256::zero()));
        assert_eq!(tx.gas(), Some(&U256::from(60_000)));
        assert_eq!(tx.gas_price(), Some(U256::from(25_000_000_000u64)));
        // EIP-155 replay protection for chain 97
        assert!(signature.v == 97 * 2 + 35 || signature.v == 97 * 2 + 36);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn unwrap_goes_to_withdraw() {
        let chain = FakeChain::source(50);
        let binding = test_binding();
        let log = unwrap_log(&binding, 3, 1, addr(0x70), addr(0x42), 9);
        let event = BridgeEvent::from_log(
            EventKind::Unwrap,
            binding.event(EventKind::Unwrap).unwrap(),
            &log,
        )
        .unwrap();

        let (executor, _) = executor(config());
        assert!(matches!(
            executor.relay(&event, &chain, Some(&key())).await,
            Outcome::Relayed { .. }
        ));

        let selector = binding.function("withdraw").unwrap().short_signature();
        let sent = chain.sent();
        assert_eq!(&sent[0].0.data().unwrap()[..4], &selector[..]);
    }

    #[tokio::test]
    async fn missing_key_skips_without_touching_chain() {
        let chain = FakeChain::destination(50);
        let (executor, _) = executor(config());

        let outcome = executor.relay(&deposit(1, 0), &chain, None).await;
        assert_eq!(outcome, Outcome::SkippedNoKey);
        assert_eq!(chain.calls("eth_sendRawTransaction"), 0);
        assert_eq!(chain.calls("eth_getTransactionCount"), 0);
    }

    #[tokio::test]
    async fn malformed_key_fails_the_event() {
        let chain = FakeChain::destination(50);
        let (executor, _) = executor(config());

        let outcome = executor
            .relay(&deposit(1, 0), &chain, Some(&WardenKey::new("0x1234")))
            .await;
        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_default_gas_limit() {
        let chain = FakeChain::destination(50);
        chain.set_estimate(None);
        let (executor, _) = executor(config());

        executor.relay(&deposit(1, 0), &chain, Some(&key())).await;
        assert_eq!(chain.sent()[0].0.gas(), Some(&U256::from(200_000)));
    }

    #[tokio::test]
    async fn retries_transient_send_failures() {
        let chain = FakeChain::destination(50);
        chain.fail_next_sends(2);
        let (executor, sleeper) = executor(config());

        let outcome = executor.relay(&deposit(1, 0), &chain, Some(&key())).await;
        assert!(matches!(outcome, Outcome::Relayed { .. }));
        assert_eq!(chain.calls("eth_sendRawTransaction"), 3);
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(100); 2]);
    }

    #[tokio::test]
    async fn stops_at_attempt_ceiling() {
        let chain = FakeChain::destination(50);
        chain.fail_next_sends(10);
        let (executor, _) = executor(config());

        let outcome = executor.relay(&deposit(1, 0), &chain, Some(&key())).await;
        match outcome {
            Outcome::Failed { reason } => assert!(reason.contains("connection reset")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(chain.calls("eth_sendRawTransaction"), 3);
    }

    #[tokio::test]
    async fn nonces_never_go_backwards() {
        let chain = FakeChain::destination(50);
        let (executor, _) = executor(config());

        executor.relay(&deposit(1, 0), &chain, Some(&key())).await;
        // node has not seen our first transaction yet
        chain.set_pending_nonce(0);
        executor.relay(&deposit(1, 1), &chain, Some(&key())).await;

        let nonces: Vec<_> = chain
            .sent()
            .iter()
            .map(|(tx, _)| tx.nonce().copied())
            .collect();
        assert_eq!(nonces, vec![Some(U256::zero()), Some(U256::one())]);
    }

    #[tokio::test]
    async fn reverted_or_missing_receipt_still_counts_as_relayed() {
        let chain = FakeChain::destination(50);
        let (executor, _) = executor(config());

        chain.set_receipt_mode(ReceiptMode::Reverted);
        match executor.relay(&deposit(1, 0), &chain, Some(&key())).await {
            Outcome::Relayed { detail, .. } => assert!(detail.unwrap().contains("reverted")),
            other => panic!("unexpected {:?}", other),
        }

        chain.set_receipt_mode(ReceiptMode::Timeout);
        match executor.relay(&deposit(2, 0), &chain, Some(&key())).await {
            Outcome::Relayed { detail, .. } => assert!(detail.unwrap().contains("unconfirmed")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn receipt_wait_can_be_disabled() {
        let chain = FakeChain::destination(50);
        let (executor, _) = executor(RelayerConfig {
            wait_for_receipt: false,
            ..config()
        });

        executor.relay(&deposit(1, 0), &chain, Some(&key())).await;
        assert_eq!(chain.calls("eth_getTransactionReceipt"), 0);
    }
}
