//! Beneficiary session engine
//!
//! One session owns the live state for one beneficiary: it resolves
//! the wallet view, keeps it fresh off the change stream, classifies
//! notifications into the celebration queue, and serves programmatic
//! celebration requests from the bus.
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!   control ────> │              session task                │
//!   bus ────────> │  refresh ──> resolver ──> wallet watch   │
//!                 │  events ───> classifier ─> overlay/toast │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! At most one wallet resolve is in flight at a time. Refresh signals
//! landing mid-resolve coalesce into a single follow-up. Rebinding to
//! another beneficiary cancels the in-flight resolve outright, so a
//! stale key's result can never be published under the new key.

use futures_util::future::OptionFuture;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::celebration::audio::{AudioSink, EffectSink, InteractionGate, NullAudioSink, NullEffectSink};
use crate::celebration::bus::CelebrationBus;
use crate::celebration::overlay::{CelebrationOverlay, OverlayConfig};
use crate::identity::BeneficiaryKeys;
use crate::ledger::LedgerSource;
use crate::notify::{Classification, Classifier, ClassifierConfig, Toast};
use crate::stream::multiplexer::{ChangeMultiplexer, MultiplexerConfig};
use crate::stream::PushChannel;
use crate::wallet::resolver::{ResolverConfig, WalletResolver};
use crate::wallet::WalletView;

/// Configuration for a beneficiary session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub resolver: ResolverConfig,
    pub classifier: ClassifierConfig,
    pub overlay: OverlayConfig,
    pub multiplexer: MultiplexerConfig,
}

/// Collaborators a session is built from. The ledger and push channel
/// are required; everything else defaults to inert implementations.
#[derive(Clone)]
pub struct SessionContext {
    pub ledger: Arc<dyn LedgerSource>,
    pub channel: Arc<dyn PushChannel>,
    pub bus: CelebrationBus,
    pub audio: Arc<dyn AudioSink>,
    pub effects: Arc<dyn EffectSink>,
    pub gate: InteractionGate,
}

impl SessionContext {
    pub fn new(ledger: Arc<dyn LedgerSource>, channel: Arc<dyn PushChannel>) -> Self {
        Self {
            ledger,
            channel,
            bus: CelebrationBus::default(),
            audio: Arc::new(NullAudioSink),
            effects: Arc::new(NullEffectSink),
            gate: InteractionGate::new(),
        }
    }

    pub fn with_bus(mut self, bus: CelebrationBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioSink>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_effects(mut self, effects: Arc<dyn EffectSink>) -> Self {
        self.effects = effects;
        self
    }

    pub fn with_gate(mut self, gate: InteractionGate) -> Self {
        self.gate = gate;
        self
    }
}

enum SessionControl {
    Refresh,
    Rebind(BeneficiaryKeys),
    Shutdown,
}

/// A running beneficiary session
pub struct BeneficiarySession;

impl BeneficiarySession {
    /// Spawn the session task and return its handle. The wallet watch
    /// starts at the zero view; the first resolve is already in
    /// flight when this returns.
    pub fn spawn(context: SessionContext, keys: BeneficiaryKeys, config: SessionConfig) -> SessionHandle {
        let overlay = CelebrationOverlay::with_config(
            config.overlay.clone(),
            context.audio.clone(),
            context.effects.clone(),
            context.gate.clone(),
        );
        let (wallet_tx, wallet_rx) = watch::channel(WalletView::default());
        let (toast_tx, toast_rx) = mpsc::unbounded_channel();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let bus_rx = context.bus.subscribe();

        info!(beneficiary = %keys.canonical_id, "Beneficiary session starting");
        let task = tokio::spawn(run_session(
            context,
            keys,
            config,
            overlay.clone(),
            wallet_tx,
            toast_tx,
            ctrl_rx,
            bus_rx,
        ));

        SessionHandle {
            ctrl: ctrl_tx,
            wallet: wallet_rx,
            overlay,
            toasts: Some(toast_rx),
            task,
        }
    }
}

/// Handle to a running session.
///
/// Dropping the handle closes the control channel, which the session
/// treats as a shutdown request on its next turn. `shutdown` does the
/// same but waits until teardown has finished.
pub struct SessionHandle {
    ctrl: mpsc::UnboundedSender<SessionControl>,
    wallet: watch::Receiver<WalletView>,
    overlay: Arc<CelebrationOverlay>,
    toasts: Option<mpsc::UnboundedReceiver<Toast>>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Current wallet view
    pub fn wallet_view(&self) -> WalletView {
        *self.wallet.borrow()
    }

    /// Watch wallet view updates
    pub fn wallet_watch(&self) -> watch::Receiver<WalletView> {
        self.wallet.clone()
    }

    /// The celebration surface: state watch plus open/dismiss calls
    pub fn overlay(&self) -> Arc<CelebrationOverlay> {
        self.overlay.clone()
    }

    /// Take the informational toast feed. Yields each toast once, to
    /// whichever surface claims the feed first.
    pub fn take_toasts(&mut self) -> Option<mpsc::UnboundedReceiver<Toast>> {
        self.toasts.take()
    }

    /// Ask for a wallet re-resolve
    pub fn refresh(&self) {
        let _ = self.ctrl.send(SessionControl::Refresh);
    }

    /// Switch the session to another beneficiary. The old key's
    /// subscriptions close before the new key's open, and any resolve
    /// still in flight for the old key is discarded.
    pub fn rebind(&self, keys: BeneficiaryKeys) {
        let _ = self.ctrl.send(SessionControl::Rebind(keys));
    }

    /// Shut the session down and wait for teardown to complete.
    /// Nothing is published and no timer fires after this returns.
    pub async fn shutdown(self) {
        let _ = self.ctrl.send(SessionControl::Shutdown);
        let _ = self.task.await;
    }
}

fn start_resolve(
    resolver: Arc<WalletResolver>,
    keys: BeneficiaryKeys,
) -> Pin<Box<dyn Future<Output = WalletView> + Send>> {
    Box::pin(async move { resolver.resolve(&keys).await })
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    context: SessionContext,
    mut keys: BeneficiaryKeys,
    config: SessionConfig,
    overlay: Arc<CelebrationOverlay>,
    wallet_tx: watch::Sender<WalletView>,
    toast_tx: mpsc::UnboundedSender<Toast>,
    mut ctrl_rx: mpsc::UnboundedReceiver<SessionControl>,
    mut bus_rx: broadcast::Receiver<crate::celebration::CelebrationRequest>,
) {
    let mux = ChangeMultiplexer::with_config(context.channel.clone(), config.multiplexer.clone());
    let mut handle = mux.open(keys.channel_id()).await;
    let mut refresh = handle.refresh_signal();
    let mut feed_open = !handle.live_tables().is_empty();
    let mut bus_open = true;

    let mut classifier = Classifier::with_config(config.classifier.clone());
    let mut resolver = Arc::new(WalletResolver::with_config(
        context.ledger.clone(),
        config.resolver.clone(),
    ));

    // At most one resolve in flight; extra refresh signals fold into
    // one follow-up pass
    let mut pending: Option<Pin<Box<dyn Future<Output = WalletView> + Send>>> =
        Some(start_resolve(resolver.clone(), keys.clone()));
    let mut refresh_again = false;

    loop {
        tokio::select! {
            biased;

            ctrl = ctrl_rx.recv() => {
                match ctrl {
                    Some(SessionControl::Shutdown) | None => {
                        handle.shutdown();
                        overlay.shutdown().await;
                        info!(beneficiary = %keys.canonical_id, "Beneficiary session stopped");
                        break;
                    }
                    Some(SessionControl::Rebind(new_keys)) => {
                        // Drop the in-flight resolve: its result
                        // belongs to the old key
                        drop(pending.take());
                        refresh_again = false;
                        handle.shutdown();
                        overlay.reset().await;
                        info!(
                            from = %keys.canonical_id,
                            to = %new_keys.canonical_id,
                            "Session rebinding"
                        );
                        keys = new_keys;
                        resolver = Arc::new(WalletResolver::with_config(
                            context.ledger.clone(),
                            config.resolver.clone(),
                        ));
                        classifier = Classifier::with_config(config.classifier.clone());
                        wallet_tx.send_replace(WalletView::default());
                        handle = mux.open(keys.channel_id()).await;
                        refresh = handle.refresh_signal();
                        feed_open = !handle.live_tables().is_empty();
                        pending = Some(start_resolve(resolver.clone(), keys.clone()));
                    }
                    Some(SessionControl::Refresh) => {
                        if pending.is_some() {
                            refresh_again = true;
                        } else {
                            pending = Some(start_resolve(resolver.clone(), keys.clone()));
                        }
                    }
                }
            }

            resolved = OptionFuture::from(pending.as_mut()), if pending.is_some() => {
                if let Some(view) = resolved {
                    pending = None;
                    debug!(
                        beneficiary = %keys.canonical_id,
                        balance = view.balance,
                        "Wallet view published"
                    );
                    wallet_tx.send_replace(view);
                    if refresh_again {
                        refresh_again = false;
                        pending = Some(start_resolve(resolver.clone(), keys.clone()));
                    }
                }
            }

            _ = refresh.notified(), if feed_open => {
                if pending.is_some() {
                    refresh_again = true;
                } else {
                    pending = Some(start_resolve(resolver.clone(), keys.clone()));
                }
            }

            event = handle.next_event(), if feed_open => {
                match event {
                    Some(event) => match classifier.classify(&event) {
                        Classification::Celebration(item) => overlay.enqueue(item).await,
                        Classification::Informational(toast) => {
                            let _ = toast_tx.send(toast);
                        }
                        Classification::Suppressed | Classification::Ignored => {}
                    },
                    None => {
                        // Every table subscription ended; stay up for
                        // manual refreshes and bus requests
                        feed_open = false;
                    }
                }
            }

            request = bus_rx.recv(), if bus_open => {
                match request {
                    Ok(request) => {
                        overlay.open_specific(request).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Celebration bus lagged, requests dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        bus_open = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::WalletAggregateRow;
    use crate::stream::memory::MemoryChannel;
    use crate::stream::{ChangeEvent, TABLE_NOTIFICATIONS, TABLE_POINT_ENTRIES};
    use crate::wallet::WalletSource;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn aggregate(earned: f64, spent: f64, reserved: f64, available: f64) -> WalletAggregateRow {
        WalletAggregateRow {
            earned: Some(earned),
            spent: Some(spent),
            reserved: Some(reserved),
            available: Some(available),
            balance: None,
            updated_at: None,
        }
    }

    async fn wait_for_view<F>(rx: &mut watch::Receiver<WalletView>, check: F) -> WalletView
    where
        F: Fn(&WalletView) -> bool,
    {
        timeout(Duration::from_secs(1), async {
            loop {
                {
                    let view = rx.borrow_and_update();
                    if check(&view) {
                        return *view;
                    }
                }
                rx.changed().await.expect("session ended early");
            }
        })
        .await
        .expect("view condition not reached")
    }

    fn test_context(
        ledger: &Arc<MemoryLedger>,
        channel: &Arc<MemoryChannel>,
    ) -> SessionContext {
        SessionContext::new(ledger.clone(), channel.clone())
    }

    #[tokio::test]
    async fn test_initial_resolve_publishes_wallet() {
        let ledger = Arc::new(MemoryLedger::new());
        let channel = Arc::new(MemoryChannel::new());
        ledger.put_aggregate("child-1", aggregate(100.0, 20.0, 10.0, 70.0));

        let handle = BeneficiarySession::spawn(
            test_context(&ledger, &channel),
            BeneficiaryKeys::canonical("child-1"),
            SessionConfig::default(),
        );

        let mut rx = handle.wallet_watch();
        let view = wait_for_view(&mut rx, |v| v.balance == 80).await;
        assert_eq!(view.source, WalletSource::Aggregate);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_change_event_refreshes_wallet() {
        let ledger = Arc::new(MemoryLedger::new());
        let channel = Arc::new(MemoryChannel::new());
        ledger.put_aggregate("child-1", aggregate(100.0, 20.0, 10.0, 70.0));

        let handle = BeneficiarySession::spawn(
            test_context(&ledger, &channel),
            BeneficiaryKeys::canonical("child-1"),
            SessionConfig::default(),
        );
        let mut rx = handle.wallet_watch();
        wait_for_view(&mut rx, |v| v.balance == 80).await;

        // Backend writes new figures, then the stream signals
        ledger.put_aggregate("child-1", aggregate(110.0, 20.0, 10.0, 80.0));
        channel.publish(ChangeEvent::insert(
            TABLE_POINT_ENTRIES,
            "child-1",
            json!({"child_id": "child-1", "delta": 10}),
        ));

        let view = wait_for_view(&mut rx, |v| v.balance == 90).await;
        assert_eq!(view.earned, 110);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_notification_event_enqueues_celebration() {
        let ledger = Arc::new(MemoryLedger::new());
        let channel = Arc::new(MemoryChannel::new());

        let handle = BeneficiarySession::spawn(
            test_context(&ledger, &channel),
            BeneficiaryKeys::canonical("child-1"),
            SessionConfig::default(),
        );
        let overlay = handle.overlay();
        let mut overlay_rx = overlay.subscribe_view();

        channel.publish(ChangeEvent::insert(
            TABLE_NOTIFICATIONS,
            "child-1",
            json!({
                "id": "n1",
                "category": "wish_fulfilled",
                "title": "Bike",
                "child_id": "child-1",
            }),
        ));

        timeout(Duration::from_secs(1), async {
            loop {
                if overlay_rx.borrow_and_update().queued == 1 {
                    break;
                }
                overlay_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("celebration not enqueued");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_informational_event_toasts() {
        let ledger = Arc::new(MemoryLedger::new());
        let channel = Arc::new(MemoryChannel::new());

        let mut handle = BeneficiarySession::spawn(
            test_context(&ledger, &channel),
            BeneficiaryKeys::canonical("child-1"),
            SessionConfig::default(),
        );
        let mut toasts = handle.take_toasts().unwrap();
        assert!(handle.take_toasts().is_none());

        channel.publish(ChangeEvent::insert(
            TABLE_NOTIFICATIONS,
            "child-1",
            json!({
                "id": "n1",
                "category": "chore_assigned",
                "title": "New chore",
                "child_id": "child-1",
            }),
        ));

        let toast = timeout(Duration::from_secs(1), toasts.recv())
            .await
            .expect("no toast")
            .expect("toast channel closed");
        assert_eq!(toast.title.as_deref(), Some("New chore"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_bus_request_opens_overlay() {
        let ledger = Arc::new(MemoryLedger::new());
        let channel = Arc::new(MemoryChannel::new());
        let bus = CelebrationBus::default();

        let handle = BeneficiarySession::spawn(
            test_context(&ledger, &channel).with_bus(bus.clone()),
            BeneficiaryKeys::canonical("child-1"),
            SessionConfig::default(),
        );
        let overlay = handle.overlay();
        let mut overlay_rx = overlay.subscribe_view();

        bus.request_open(crate::celebration::CelebrationRequest {
            id: None,
            title: Some("Surprise".to_string()),
            message: None,
        });

        timeout(Duration::from_secs(1), async {
            loop {
                let open = overlay_rx
                    .borrow_and_update()
                    .open
                    .as_ref()
                    .and_then(|item| item.title.clone());
                if open.as_deref() == Some("Surprise") {
                    break;
                }
                overlay_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("bus request did not open overlay");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_rebind_switches_subscriptions_and_resets_state() {
        let ledger = Arc::new(MemoryLedger::new());
        let channel = Arc::new(MemoryChannel::new());
        ledger.put_aggregate("child-1", aggregate(100.0, 20.0, 10.0, 70.0));
        ledger.put_aggregate("child-2", aggregate(50.0, 0.0, 0.0, 50.0));

        let handle = BeneficiarySession::spawn(
            test_context(&ledger, &channel),
            BeneficiaryKeys::canonical("child-1"),
            SessionConfig::default(),
        );
        let mut rx = handle.wallet_watch();
        wait_for_view(&mut rx, |v| v.balance == 80).await;

        handle.rebind(BeneficiaryKeys::canonical("child-2"));
        let view = wait_for_view(&mut rx, |v| v.balance == 50).await;
        assert_eq!(view.earned, 50);

        // Exactly one live subscription per table, bound to the new key
        channel.publish(ChangeEvent::insert(
            TABLE_POINT_ENTRIES,
            "child-2",
            json!({"child_id": "child-2", "delta": 1}),
        ));
        assert_eq!(channel.subscriber_count(TABLE_POINT_ENTRIES), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_discards_inflight_resolve() {
        let ledger = Arc::new(MemoryLedger::new());
        let channel = Arc::new(MemoryChannel::new());
        ledger.put_aggregate("child-1", aggregate(100.0, 20.0, 10.0, 70.0));
        ledger.set_read_delay(Duration::from_millis(100));

        let handle = BeneficiarySession::spawn(
            test_context(&ledger, &channel),
            BeneficiaryKeys::canonical("child-1"),
            SessionConfig::default(),
        );
        let rx = handle.wallet_watch();

        // Tear down while the first resolve is still inside the source
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*rx.borrow(), WalletView::default());
    }

    #[tokio::test]
    async fn test_dropping_handle_tears_session_down() {
        let ledger = Arc::new(MemoryLedger::new());
        let channel = Arc::new(MemoryChannel::new());

        let handle = BeneficiarySession::spawn(
            test_context(&ledger, &channel),
            BeneficiaryKeys::canonical("child-1"),
            SessionConfig::default(),
        );
        let mut rx = handle.wallet_watch();
        // A clamped view means the first resolve ran, so the
        // subscriptions behind it are up too
        wait_for_view(&mut rx, |v| v.clamped).await;
        assert_eq!(channel.subscriber_count(TABLE_POINT_ENTRIES), 1);

        drop(handle);
        // The session notices the closed control channel and exits
        assert!(timeout(Duration::from_secs(1), rx.changed()).await.is_ok());
        channel.publish(ChangeEvent::insert(
            TABLE_POINT_ENTRIES,
            "child-1",
            json!({"child_id": "child-1", "delta": 1}),
        ));
        assert_eq!(channel.subscriber_count(TABLE_POINT_ENTRIES), 0);
    }
}
