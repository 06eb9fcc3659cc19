//! Per-order lifecycle coordinator
//!
//! Every tracked order runs in its own task, which owns all mutable state for
//! that order. Snapshots, derivation outcomes, redemption outcomes, receipt
//! outcomes and caller commands all pass through one `select!` loop. Each
//! suspension point (fetch, sign, submit, receipt) runs in a sub-task that
//! reports back over a channel, so a pending wallet prompt never stalls polling.

use crate::chain::{ChainRegistry, ReceiptStatus};
use crate::error::{CoordinatorError, CoordinatorResult, ErrorReport};
use crate::order::{Order, OrderSource};
use crate::redeem::{Finality, RedeemRequest, RedemptionDispatcher, Submission};
use crate::secret::{CommitmentDeriver, SecretMaterial};
use crate::status::{classify_phase, should_continue_polling, Phase};
use crate::wallet::WalletSessions;

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 16;

/// Time a coordinator gets to stop before its task is aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Collaborators shared by every order coordinator
#[derive(Clone)]
pub struct CoordinatorContext {
    /// Order snapshot source
    pub source: Arc<dyn OrderSource>,
    /// Secret derivation and storage
    pub deriver: Arc<CommitmentDeriver>,
    /// Redemption dispatch
    pub dispatcher: Arc<RedemptionDispatcher>,
    /// Connected wallet sessions
    pub sessions: Arc<WalletSessions>,
    /// Chain name resolution
    pub registry: Arc<ChainRegistry>,
    /// Snapshot polling cadence
    pub poll_interval: Duration,
}

/// Coordinator lifecycle, as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Polling,
    DerivingSecret,
    DispatchingRedeem,
    Terminal,
}

/// Observable state of one tracked order
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order_id: String,
    pub phase: Phase,
    /// Latest snapshot, if any fetch has succeeded
    pub order: Option<Order>,
    pub secret_known: bool,
    pub redeem_pending: bool,
    /// Whether the snapshot ticker is running
    pub polling: bool,
    pub lifecycle: Lifecycle,
    /// Set when the latest poll failed and `order` is an older snapshot
    pub stale: bool,
    pub last_error: Option<ErrorReport>,
    pub redeem_tx_hash: Option<String>,
}

impl OrderView {
    fn initial(order_id: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            phase: Phase::Initiated,
            order: None,
            secret_known: false,
            redeem_pending: false,
            polling: true,
            lifecycle: Lifecycle::Idle,
            stale: false,
            last_error: None,
            redeem_tx_hash: None,
        }
    }
}

/// Caller commands accepted by a running coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fetch a snapshot now, even if the ticker is stopped
    Refresh,
    /// Re-arm the auto-secret rule after a blocking failure
    RetrySecret,
    /// Re-arm the auto-redeem rule after a blocking failure
    RetryRedeem,
    Shutdown,
}

enum Outcome {
    Snapshot(CoordinatorResult<Order>),
    Secret(CoordinatorResult<SecretMaterial>),
    Submitted(CoordinatorResult<Submission>),
    Receipt {
        tx_hash: String,
        result: CoordinatorResult<ReceiptStatus>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RedeemState {
    Idle,
    Dispatching,
    AwaitingReceipt { tx_hash: String },
    /// Submitted and final on-chain; waiting for a snapshot showing the claim
    AwaitingClaim { tx_hash: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Poll,
    Secret,
    Redeem,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Poll => f.write_str("poll"),
            Stage::Secret => f.write_str("secret derivation"),
            Stage::Redeem => f.write_str("redemption"),
        }
    }
}

/// Handle to a running order coordinator
pub struct OrderHandle {
    order_id: String,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<OrderView>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl OrderHandle {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    /// Current view
    pub fn view(&self) -> OrderView {
        self.view.borrow().clone()
    }

    /// Watch channel receiving every view update
    pub fn subscribe(&self) -> watch::Receiver<OrderView> {
        self.view.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    pub async fn send(&self, command: Command) -> CoordinatorResult<()> {
        if !self.is_alive() {
            return Err(stopped(&self.order_id));
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| stopped(&self.order_id))
    }

    /// Stop the coordinator and wait for its task to finish
    pub async fn shutdown(self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Shutdown).await;

        let mut task = self.task;
        if timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("Coordinator for order {} did not stop, aborting", self.order_id);
            task.abort();
        }
    }
}

pub(crate) fn stopped(order_id: &str) -> CoordinatorError {
    CoordinatorError::Internal(format!("coordinator for order {} has stopped", order_id))
}

/// Reactive coordinator for a single order
pub struct OrderCoordinator {
    order_id: String,
    ctx: CoordinatorContext,
    alive: Arc<AtomicBool>,
    view_tx: watch::Sender<OrderView>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,

    order: Option<Order>,
    material: Option<SecretMaterial>,
    fetching: bool,
    fetched_once: bool,
    deriving: bool,
    redeem: RedeemState,
    redeem_tx_hash: Option<String>,
    secret_blocked: bool,
    redeem_blocked: bool,
    /// A trigger failed with a retryable error and waits for the next snapshot
    retry_pending: bool,
    polling: bool,
    stale: bool,
    terminated: bool,
    last_error: Option<(Stage, ErrorReport)>,
    tasks: Vec<JoinHandle<()>>,
}

impl OrderCoordinator {
    /// Spawn the coordinator task for one order
    pub fn spawn(order_id: &str, ctx: CoordinatorContext) -> OrderHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(OrderView::initial(order_id));
        let alive = Arc::new(AtomicBool::new(true));

        let coordinator = Self {
            order_id: order_id.to_string(),
            ctx,
            alive: alive.clone(),
            view_tx,
            outcome_tx,
            order: None,
            material: None,
            fetching: false,
            fetched_once: false,
            deriving: false,
            redeem: RedeemState::Idle,
            redeem_tx_hash: None,
            secret_blocked: false,
            redeem_blocked: false,
            retry_pending: false,
            polling: true,
            stale: false,
            terminated: false,
            last_error: None,
            tasks: Vec::new(),
        };

        let task = tokio::spawn(coordinator.run(command_rx, outcome_rx));

        OrderHandle {
            order_id: order_id.to_string(),
            commands: command_tx,
            view: view_rx,
            alive,
            task,
        }
    }

    /// Main loop
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<Outcome>,
    ) {
        match self.ctx.deriver.cached(&self.order_id).await {
            Ok(material) => self.material = material,
            Err(e) => warn!("Secret lookup failed for order {}: {}", self.order_id, e),
        }
        self.publish();

        let mut ticker = interval(self.ctx.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Coordinator started for order {}", self.order_id);

        let mut was_ticking = true;
        loop {
            if !self.is_alive() {
                break;
            }

            // A resumed ticker waits a full interval before the next poll
            let ticking = self.ticker_active();
            if ticking && !was_ticking {
                ticker.reset();
            }
            was_ticking = ticking;

            tokio::select! {
                _ = ticker.tick(), if ticking => {
                    self.spawn_fetch();
                }

                Some(outcome) = outcomes.recv() => {
                    self.handle_outcome(outcome).await;
                }

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        self.teardown();
    }

    fn ticker_active(&self) -> bool {
        self.polling
            || self.retry_pending
            || matches!(self.redeem, RedeemState::AwaitingClaim { .. })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn spawn_task<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_alive() {
            debug!("Order {} is shutting down, not spawning work", self.order_id);
            return;
        }
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(tokio::spawn(future));
    }

    fn spawn_fetch(&mut self) {
        if self.fetching {
            return;
        }
        self.fetching = true;

        let source = self.ctx.source.clone();
        let order_id = self.order_id.clone();
        let outcome_tx = self.outcome_tx.clone();
        self.spawn_task(async move {
            let result = source.fetch_order(&order_id).await;
            let _ = outcome_tx.send(Outcome::Snapshot(result));
        });
    }

    async fn handle_command(&mut self, command: Command) {
        if !self.is_alive() {
            return;
        }
        debug!("Order {} received {:?}", self.order_id, command);
        match command {
            Command::Refresh => self.spawn_fetch(),
            Command::RetrySecret => {
                self.secret_blocked = false;
                self.clear_error(Stage::Secret);
                self.run_triggers().await;
            }
            Command::RetryRedeem => {
                self.redeem_blocked = false;
                self.clear_error(Stage::Redeem);
                self.run_triggers().await;
            }
            Command::Shutdown => {}
        }
        self.publish();
    }

    async fn handle_outcome(&mut self, outcome: Outcome) {
        if !self.is_alive() {
            debug!("Dropping outcome for stopped order {}", self.order_id);
            return;
        }
        match outcome {
            Outcome::Snapshot(result) => {
                self.fetching = false;
                self.on_snapshot(result).await;
            }
            Outcome::Secret(result) => {
                self.deriving = false;
                self.on_secret(result).await;
            }
            Outcome::Submitted(result) => self.on_submitted(result),
            Outcome::Receipt { tx_hash, result } => self.on_receipt(tx_hash, result),
        }
        self.publish();
    }

    async fn on_snapshot(&mut self, result: CoordinatorResult<Order>) {
        let order = match result {
            Ok(order) => order,
            Err(e) => {
                crate::metrics::record_poll_failure(e.kind());
                if self.fetched_once {
                    warn!("Poll failed for order {}, keeping last snapshot: {}", self.order_id, e);
                    self.stale = true;
                } else {
                    self.record_error(Stage::Poll, &e);
                }
                return;
            }
        };

        crate::metrics::record_poll();
        self.fetched_once = true;
        self.stale = false;
        self.retry_pending = false;
        self.clear_error(Stage::Poll);

        let claimed = order.destination_intent.has_claim_tx()
            || order.destination_intent.is_completed()
            || order.source_intent.is_completed();
        if claimed
            && matches!(
                self.redeem,
                RedeemState::AwaitingReceipt { .. } | RedeemState::AwaitingClaim { .. }
            )
        {
            info!("Redemption for order {} is visible on the backend", self.order_id);
            self.redeem = RedeemState::Idle;
        }

        let previous = self.phase();
        let was_polling = self.polling;
        self.polling = should_continue_polling(&order);
        self.order = Some(order);

        let phase = self.phase();
        if phase != previous {
            info!("Order {} phase {} -> {}", self.order_id, previous, phase);
        }
        if was_polling && !self.polling {
            info!("Polling stopped for order {} at phase {}", self.order_id, phase);
        }

        self.run_triggers().await;
    }

    /// Evaluate the auto-secret and auto-redeem rules against the cached snapshot
    async fn run_triggers(&mut self) {
        let Some(order) = self.order.clone() else {
            return;
        };
        if order.source_intent.is_completed() || order.destination_intent.is_completed() {
            return;
        }

        self.maybe_derive_secret(&order).await;
        self.maybe_redeem(&order);
    }

    async fn maybe_derive_secret(&mut self, order: &Order) {
        if self.material.is_some()
            || self.deriving
            || self.secret_blocked
            || !order.source_intent.has_create_tx()
        {
            return;
        }

        let classified = self
            .ctx
            .registry
            .classify_redeem_family(&order.destination_intent.asset);
        let family = match classified {
            Ok(family) => family,
            Err(e) => {
                self.record_failure(Stage::Secret, e);
                return;
            }
        };

        let Some(signer) = self.ctx.sessions.signer(family).await else {
            debug!(
                "No {} signer connected, deferring secret for order {}",
                family, self.order_id
            );
            return;
        };

        info!("Deriving secret for order {} with {} signer", self.order_id, family);
        self.deriving = true;

        let deriver = self.ctx.deriver.clone();
        let order = order.clone();
        let outcome_tx = self.outcome_tx.clone();
        self.spawn_task(async move {
            let result = deriver.material_for(&order, signer.as_ref()).await;
            let _ = outcome_tx.send(Outcome::Secret(result));
        });
    }

    fn maybe_redeem(&mut self, order: &Order) {
        let Some(material) = self.material.as_ref() else {
            return;
        };
        if self.redeem != RedeemState::Idle
            || self.redeem_blocked
            || !order.source_intent.has_create_tx()
            || !order.destination_intent.has_create_tx()
            || order.destination_intent.has_claim_tx()
        {
            return;
        }

        let request = RedeemRequest::for_destination(order, material);
        info!("Dispatching redemption for order {}", self.order_id);
        self.redeem = RedeemState::Dispatching;

        let dispatcher = self.ctx.dispatcher.clone();
        let outcome_tx = self.outcome_tx.clone();
        self.spawn_task(async move {
            let result = dispatcher.dispatch(&request).await;
            let _ = outcome_tx.send(Outcome::Submitted(result));
        });
    }

    async fn on_secret(&mut self, result: CoordinatorResult<SecretMaterial>) {
        match result {
            Ok(material) => {
                crate::metrics::record_secret_derived();
                self.material = Some(material);
                self.clear_error(Stage::Secret);
                self.run_triggers().await;
            }
            Err(e) => self.record_failure(Stage::Secret, e),
        }
    }

    fn on_submitted(&mut self, result: CoordinatorResult<Submission>) {
        let submission = match result {
            Ok(submission) => submission,
            Err(e) => {
                self.redeem = RedeemState::Idle;
                self.record_failure(Stage::Redeem, e);
                return;
            }
        };

        self.clear_error(Stage::Redeem);
        self.redeem_tx_hash = Some(submission.tx_hash.clone());

        match submission.finality {
            Finality::AwaitReceipt { chain_id } => {
                debug!(
                    "Watching receipt {} on chain {} for order {}",
                    submission.tx_hash, chain_id, self.order_id
                );
                self.redeem = RedeemState::AwaitingReceipt {
                    tx_hash: submission.tx_hash.clone(),
                };

                let dispatcher = self.ctx.dispatcher.clone();
                let outcome_tx = self.outcome_tx.clone();
                self.spawn_task(async move {
                    let result = dispatcher.confirm(&submission).await;
                    let _ = outcome_tx.send(Outcome::Receipt {
                        tx_hash: submission.tx_hash,
                        result,
                    });
                });
            }
            Finality::Broadcast => {
                self.redeem = RedeemState::AwaitingClaim {
                    tx_hash: submission.tx_hash,
                };
                self.spawn_fetch();
            }
        }
    }

    fn on_receipt(&mut self, tx_hash: String, result: CoordinatorResult<ReceiptStatus>) {
        if !matches!(&self.redeem, RedeemState::AwaitingReceipt { tx_hash: pending } if *pending == tx_hash)
        {
            debug!("Ignoring receipt {} for order {}", tx_hash, self.order_id);
            return;
        }

        match result {
            Ok(ReceiptStatus::Confirmed { block_number }) => {
                info!(
                    "Redemption {} for order {} confirmed in block {}",
                    tx_hash, self.order_id, block_number
                );
                crate::metrics::record_redeem_confirmed();
                self.redeem = RedeemState::AwaitingClaim { tx_hash };
                self.spawn_fetch();
            }
            Ok(ReceiptStatus::Reverted) => {
                crate::metrics::record_redeem_reverted();
                self.redeem = RedeemState::Idle;
                self.record_failure(Stage::Redeem, CoordinatorError::TransactionReverted { tx_hash });
            }
            Err(e) => {
                // Outcome unknown: resubmitting needs an explicit retry
                self.redeem = RedeemState::Idle;
                self.record_failure(Stage::Redeem, e);
                self.redeem_blocked = true;
                self.retry_pending = false;
                self.spawn_fetch();
            }
        }
    }

    /// Record a trigger failure; retryable ones re-arm the rule on the next tick
    fn record_failure(&mut self, stage: Stage, err: CoordinatorError) {
        if err.is_retryable() {
            if stage != Stage::Poll {
                self.retry_pending = true;
            }
        } else {
            match stage {
                Stage::Secret => self.secret_blocked = true,
                Stage::Redeem => self.redeem_blocked = true,
                Stage::Poll => {}
            }
        }
        self.record_error(stage, &err);
    }

    fn record_error(&mut self, stage: Stage, err: &CoordinatorError) {
        if err.requires_user_action() || !err.is_retryable() {
            warn!("{} for order {} needs attention: {}", stage, self.order_id, err);
        } else {
            warn!("{} for order {} failed: {}", stage, self.order_id, err);
        }
        self.last_error = Some((stage, ErrorReport::from(err)));
    }

    fn clear_error(&mut self, stage: Stage) {
        if matches!(&self.last_error, Some((s, _)) if *s == stage) {
            self.last_error = None;
        }
    }

    fn phase(&self) -> Phase {
        match &self.order {
            Some(order) => classify_phase(
                order,
                self.material.is_some(),
                self.redeem != RedeemState::Idle,
            ),
            None => Phase::Initiated,
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        if self.terminated {
            Lifecycle::Terminal
        } else if self.deriving {
            Lifecycle::DerivingSecret
        } else if self.redeem != RedeemState::Idle {
            Lifecycle::DispatchingRedeem
        } else if self.order.is_none() && !self.fetching && !self.fetched_once {
            Lifecycle::Idle
        } else if self.polling || self.retry_pending {
            Lifecycle::Polling
        } else {
            Lifecycle::Terminal
        }
    }

    fn publish(&self) {
        let phase = self.phase();
        crate::metrics::set_order_phase(&self.order_id, phase);

        self.view_tx.send_replace(OrderView {
            order_id: self.order_id.clone(),
            phase,
            order: self.order.clone(),
            secret_known: self.material.is_some(),
            redeem_pending: self.redeem != RedeemState::Idle,
            polling: !self.terminated && self.ticker_active(),
            lifecycle: self.lifecycle(),
            stale: self.stale,
            last_error: self.last_error.as_ref().map(|(_, report)| report.clone()),
            redeem_tx_hash: self.redeem_tx_hash.clone(),
        });
    }

    fn teardown(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.terminated = true;
        self.publish();
        crate::metrics::remove_order(&self.order_id);
        info!("Coordinator stopped for order {}", self.order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainFamily;
    use crate::error::ErrorKind;
    use crate::order::{IntentTransactions, MockOrderSource, SwapIntent};
    use crate::redeem::MockRedeemer;
    use crate::secret::{MemorySecretStore, SecretStore};
    use crate::wallet::{MessageSigner, MockMessageSigner};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const ORDER_ID: &str = "ord-1";

    fn order(source_created: bool, destination_created: bool, destination_claimed: bool) -> Order {
        let tx = |set: bool, hash: &str| set.then(|| hash.to_string());
        Order {
            order_id: ORDER_ID.to_string(),
            source_intent: SwapIntent {
                asset: "bitcoin_testnet:btc".to_string(),
                deposit_address: Some("tb1qdeposit".to_string()),
                commitment_hash: Some("0xc0ffee".to_string()),
                transactions: IntentTransactions {
                    create_tx: tx(source_created, "src-create"),
                    ..Default::default()
                },
                ..Default::default()
            },
            destination_intent: SwapIntent {
                asset: "arbitrum_sepolia:wbtc".to_string(),
                swap_id: format!("0x{}", "ab".repeat(32)),
                escrow_address: Some("0x00000000000000000000000000000000000000e5".to_string()),
                recipient: Some("0x00000000000000000000000000000000000000f1".to_string()),
                transactions: IntentTransactions {
                    create_tx: tx(destination_created, "0xdst-create"),
                    claim_tx: tx(destination_claimed, "0xdst-claim"),
                    ..Default::default()
                },
                ..Default::default()
            },
            created_at: None,
            updated_at: None,
        }
    }

    fn scripted_source(current: Arc<Mutex<Order>>) -> MockOrderSource {
        let mut source = MockOrderSource::new();
        source
            .expect_fetch_order()
            .returning(move |_| Ok(current.lock().unwrap().clone()));
        source
    }

    fn counting_signer(calls: Arc<AtomicUsize>, reject_first: bool) -> MockMessageSigner {
        let mut signer = MockMessageSigner::new();
        signer.expect_sign_message().returning(move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if reject_first && n == 0 {
                Err(CoordinatorError::SigningRejected("dismissed".to_string()))
            } else {
                Ok(vec![7u8; 65])
            }
        });
        signer
    }

    /// Signer that holds the signature until released
    struct GatedSigner {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl MessageSigner for GatedSigner {
        fn address(&self) -> String {
            "0x00000000000000000000000000000000000000a1".to_string()
        }

        async fn sign_message(&self, _message: &[u8]) -> CoordinatorResult<Vec<u8>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![7u8; 65])
        }
    }

    /// Redeemer counting submissions; receipts follow `receipts` then confirm
    fn counting_redeemer(
        calls: Arc<AtomicUsize>,
        receipts: Vec<ReceiptStatus>,
    ) -> MockRedeemer {
        let mut redeemer = MockRedeemer::new();
        redeemer.expect_redeem().returning(move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Submission {
                family: ChainFamily::Evm,
                tx_hash: format!("0x{:02x}", n),
                finality: Finality::AwaitReceipt { chain_id: 421614 },
            })
        });

        let receipts = Mutex::new(receipts.into_iter());
        redeemer.expect_confirm().returning(move |_| {
            Ok(receipts
                .lock()
                .unwrap()
                .next()
                .unwrap_or(ReceiptStatus::Confirmed { block_number: 10 }))
        });
        redeemer
    }

    async fn context(
        source: MockOrderSource,
        redeemer: MockRedeemer,
        signer: Option<MockMessageSigner>,
        cached_secret: bool,
    ) -> CoordinatorContext {
        let registry = Arc::new(ChainRegistry::new());
        let sessions = Arc::new(WalletSessions::new());
        if let Some(signer) = signer {
            sessions.set_signer(ChainFamily::Evm, Arc::new(signer)).await;
        }

        let store = Arc::new(MemorySecretStore::new());
        if cached_secret {
            store
                .put(SecretMaterial::new(ORDER_ID, "0xc0ffee", [1; 32], [2; 32]))
                .await
                .unwrap();
        }

        CoordinatorContext {
            source: Arc::new(source),
            deriver: Arc::new(CommitmentDeriver::new(store)),
            dispatcher: Arc::new(
                RedemptionDispatcher::empty(registry.clone())
                    .with_redeemer(ChainFamily::Evm, Arc::new(redeemer)),
            ),
            sessions,
            registry,
            poll_interval: Duration::from_millis(10),
        }
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<OrderView>, predicate: F) -> OrderView
    where
        F: Fn(&OrderView) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                {
                    let view = rx.borrow_and_update();
                    if predicate(&view) {
                        return view.clone();
                    }
                }
                rx.changed().await.expect("coordinator dropped its view");
            }
        })
        .await
        .expect("timed out waiting for view")
    }

    #[tokio::test]
    async fn test_auto_secret_after_source_deposit() {
        let current = Arc::new(Mutex::new(order(true, false, false)));
        let signs = Arc::new(AtomicUsize::new(0));
        let redeems = Arc::new(AtomicUsize::new(0));

        let ctx = context(
            scripted_source(current),
            counting_redeemer(redeems.clone(), vec![]),
            Some(counting_signer(signs.clone(), false)),
            false,
        )
        .await;
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();

        let view = wait_for(&mut rx, |v| v.secret_known).await;
        assert_eq!(view.phase, Phase::AwaitingRedeem);
        assert!(view.polling);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(signs.load(Ordering::SeqCst), 1);
        assert_eq!(redeems.load(Ordering::SeqCst), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_auto_redeem_fires_once() {
        let current = Arc::new(Mutex::new(order(true, true, false)));
        let redeems = Arc::new(AtomicUsize::new(0));

        let ctx = context(
            scripted_source(current.clone()),
            counting_redeemer(redeems.clone(), vec![]),
            None,
            true,
        )
        .await;
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();

        // Two rapid snapshots on top of the ticker
        handle.send(Command::Refresh).await.unwrap();
        handle.send(Command::Refresh).await.unwrap();

        let view = wait_for(&mut rx, |v| v.redeem_tx_hash.is_some()).await;
        assert!(view.redeem_pending);
        assert_eq!(view.phase, Phase::Redeeming);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(redeems.load(Ordering::SeqCst), 1);

        *current.lock().unwrap() = order(true, true, true);
        let view = wait_for(&mut rx, |v| !v.redeem_pending).await;
        assert!(!view.polling);
        assert_eq!(view.redeem_tx_hash.as_deref(), Some("0x01"));
        assert_eq!(view.lifecycle, Lifecycle::Terminal);
        assert_eq!(redeems.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_derivation_triggers_redeem_after_polling_stopped() {
        let current = Arc::new(Mutex::new(order(true, true, false)));
        let signs = Arc::new(AtomicUsize::new(0));
        let redeems = Arc::new(AtomicUsize::new(0));

        let ctx = context(
            scripted_source(current),
            counting_redeemer(redeems.clone(), vec![]),
            Some(counting_signer(signs.clone(), false)),
            false,
        )
        .await;
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();

        wait_for(&mut rx, |v| v.secret_known && v.redeem_tx_hash.is_some()).await;
        assert_eq!(signs.load(Ordering::SeqCst), 1);
        assert_eq!(redeems.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_revert_clears_in_flight_guard() {
        let current = Arc::new(Mutex::new(order(true, true, false)));
        let redeems = Arc::new(AtomicUsize::new(0));

        let mut ctx = context(
            scripted_source(current),
            counting_redeemer(redeems.clone(), vec![ReceiptStatus::Reverted]),
            None,
            true,
        )
        .await;
        ctx.poll_interval = Duration::from_millis(200);
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();

        let view = wait_for(&mut rx, |v| v.last_error.is_some()).await;
        let report = view.last_error.unwrap();
        assert_eq!(report.kind, ErrorKind::Chain);
        assert!(report.retryable);
        assert!(!view.redeem_pending);

        // Polling had already stopped; the rule fires again on its own
        let view = wait_for(&mut rx, |v| v.redeem_tx_hash.as_deref() == Some("0x02")).await;
        assert!(view.last_error.is_none());
        assert_eq!(redeems.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_retryable_submit_failure_refires() {
        let current = Arc::new(Mutex::new(order(true, true, false)));
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut redeemer = MockRedeemer::new();
        let counter = attempts.clone();
        redeemer.expect_redeem().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CoordinatorError::Timeout {
                    operation: "send transaction".to_string(),
                })
            } else {
                Ok(Submission {
                    family: ChainFamily::Evm,
                    tx_hash: "0xbeef".to_string(),
                    finality: Finality::Broadcast,
                })
            }
        });

        let ctx = context(scripted_source(current), redeemer, None, true).await;
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();

        let view = wait_for(&mut rx, |v| v.redeem_tx_hash.as_deref() == Some("0xbeef")).await;
        assert!(view.last_error.is_none());
        assert!(view.redeem_pending);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_outcome_after_shutdown_is_dropped() {
        let current = Arc::new(Mutex::new(order(true, true, false)));
        let redeems = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let ctx = context(
            scripted_source(current),
            counting_redeemer(redeems.clone(), vec![]),
            None,
            false,
        )
        .await;
        ctx.sessions
            .set_signer(
                ChainFamily::Evm,
                Arc::new(GatedSigner {
                    entered: entered.clone(),
                    release: release.clone(),
                }),
            )
            .await;
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();

        timeout(Duration::from_secs(5), entered.notified())
            .await
            .unwrap();

        // Teardown starts while the signature is still outstanding
        handle.alive.store(false, Ordering::SeqCst);
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        assert_eq!(redeems.load(Ordering::SeqCst), 0);
        let view = rx.borrow_and_update().clone();
        assert_eq!(view.lifecycle, Lifecycle::Terminal);
        assert!(!view.secret_known);
        assert!(!view.redeem_pending);
    }

    #[tokio::test]
    async fn test_signing_rejection_blocks_until_retry() {
        let current = Arc::new(Mutex::new(order(true, false, false)));
        let signs = Arc::new(AtomicUsize::new(0));

        let ctx = context(
            scripted_source(current),
            counting_redeemer(Arc::new(AtomicUsize::new(0)), vec![]),
            Some(counting_signer(signs.clone(), true)),
            false,
        )
        .await;
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();

        let view = wait_for(&mut rx, |v| v.last_error.is_some()).await;
        assert!(view.last_error.unwrap().user_action);
        assert!(!view.secret_known);

        // Polling continues but the rule stays blocked
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(signs.load(Ordering::SeqCst), 1);
        assert!(handle.view().polling);

        handle.send(Command::RetrySecret).await.unwrap();
        let view = wait_for(&mut rx, |v| v.secret_known).await;
        assert!(view.last_error.is_none());
        assert_eq!(signs.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_first_fetch_error_then_stale() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = MockOrderSource::new();
        source.expect_fetch_order().returning(move |order_id| {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(CoordinatorError::NotFound {
                    order_id: order_id.to_string(),
                }),
                1 => Ok(order(false, false, false)),
                _ => Err(CoordinatorError::Timeout {
                    operation: "order".to_string(),
                }),
            }
        });

        let mut ctx = context(
            source,
            counting_redeemer(Arc::new(AtomicUsize::new(0)), vec![]),
            None,
            false,
        )
        .await;
        ctx.poll_interval = Duration::from_millis(200);
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();

        let view = wait_for(&mut rx, |v| v.last_error.is_some()).await;
        assert_eq!(view.last_error.unwrap().kind, ErrorKind::Network);
        assert!(view.order.is_none());

        let view = wait_for(&mut rx, |v| v.stale).await;
        assert!(view.order.is_some());
        assert!(view.last_error.is_none());
        assert_eq!(view.phase, Phase::AwaitingDeposit);
        assert!(view.polling);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_marks_terminal() {
        let current = Arc::new(Mutex::new(order(false, false, false)));
        let ctx = context(
            scripted_source(current),
            counting_redeemer(Arc::new(AtomicUsize::new(0)), vec![]),
            None,
            false,
        )
        .await;
        let handle = OrderCoordinator::spawn(ORDER_ID, ctx);
        let mut rx = handle.subscribe();
        wait_for(&mut rx, |v| v.order.is_some()).await;

        let alive = handle.alive.clone();
        handle.shutdown().await;

        assert!(!alive.load(Ordering::SeqCst));
        let view = rx.borrow().clone();
        assert_eq!(view.lifecycle, Lifecycle::Terminal);
        assert!(!view.polling);
    }
}
