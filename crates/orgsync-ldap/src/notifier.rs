//! Change notifications.
//!
//! A subscription is a long-lived subtree search carrying the Active
//! Directory server notification control. The server only reveals the
//! request id with the first event, so a stop requested before that cannot
//! abandon anything yet. It is recorded in `pending_stop` and honoured the
//! moment the id arrives.
//!
//! ```text
//! Subscribing ──first event──▶ Active ──stop──▶ Stopping ──▶ Stopped
//!      │                         │
//!      └────── stream error ─────┴──────────────────────────▶ Errored
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orgsync_core::client::SERVER_NOTIFICATION_OID;
use orgsync_core::{
    Control, DirectoryClient, DirectoryEntry, Filter, MessageId, OrgSyncError, OrgSyncResult, SearchEvent,
    SearchEvents, SearchRequest, SearchScope,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use uuid::Uuid;

use crate::config::DirectoryServiceVariant;

/// Filter sent to the server. Notification searches only accept this one;
/// narrower filters are evaluated locally.
const NOTIFICATION_FILTER: &str = "(objectClass=*)";

/// Capacity of the change event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

// ============================================================================
// Events and Phases
// ============================================================================

/// Lifecycle phase of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionPhase {
    /// Search issued, no event received yet.
    Subscribing,
    /// Request id known, changes are delivered.
    Active,
    /// Abandon in progress.
    Stopping,
    /// Stopped by the caller or ended by the server.
    Stopped,
    /// Failed. Not resumable.
    Errored,
}

impl SubscriptionPhase {
    /// Checks whether no further change can be delivered.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Errored)
    }
}

/// Event delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A changed entry matched the subscription.
    Change {
        /// The raw entry as the server sent it.
        entry: DirectoryEntry,
        /// When the change was received.
        received_at: DateTime<Utc>,
    },
    /// The subscription failed.
    Error(OrgSyncError),
    /// The subscription ended. Nothing follows.
    End,
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug)]
struct State {
    phase: SubscriptionPhase,
    message_id: Option<MessageId>,
    pending_stop: bool,
}

enum StopAction {
    Nothing,
    Deferred,
    Abandon(MessageId),
}

#[derive(Debug, PartialEq, Eq)]
enum Acknowledgement {
    AlreadyKnown,
    Activated,
    StopNow,
}

struct Shared {
    id: Uuid,
    base_dn: String,
    client: Arc<dyn DirectoryClient>,
    state: Mutex<State>,
    phase_tx: watch::Sender<SubscriptionPhase>,
    stop_signal: Notify,
}

impl Shared {
    fn set_phase(&self, state: &mut State, phase: SubscriptionPhase) {
        state.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn phase(&self) -> SubscriptionPhase {
        self.state.lock().phase
    }

    fn begin_stop(&self) -> StopAction {
        let mut state = self.state.lock();
        if state.phase.is_terminal() || state.phase == SubscriptionPhase::Stopping {
            return StopAction::Nothing;
        }
        match state.message_id {
            None => {
                state.pending_stop = true;
                StopAction::Deferred
            }
            Some(id) => {
                self.set_phase(&mut state, SubscriptionPhase::Stopping);
                StopAction::Abandon(id)
            }
        }
    }

    /// Records the request id. `pending_stop` is only ever looked at here.
    fn acknowledge(&self, message_id: MessageId) -> Acknowledgement {
        let mut state = self.state.lock();
        if state.message_id.is_some() {
            return Acknowledgement::AlreadyKnown;
        }
        state.message_id = Some(message_id);
        if state.pending_stop {
            self.set_phase(&mut state, SubscriptionPhase::Stopping);
            return Acknowledgement::StopNow;
        }
        if state.phase == SubscriptionPhase::Subscribing {
            self.set_phase(&mut state, SubscriptionPhase::Active);
        }
        Acknowledgement::Activated
    }

    /// Moves to a terminal phase. Returns false if one was already reached.
    fn finish(&self, phase: SubscriptionPhase) -> bool {
        let mut state = self.state.lock();
        if state.phase.is_terminal() {
            return false;
        }
        self.set_phase(&mut state, phase);
        true
    }

    /// Sends a change unless the subscription has left `Active`. The state
    /// lock is held across the check and the send.
    fn deliver(&self, permit: mpsc::Permit<'_, ChangeEvent>, entry: DirectoryEntry) {
        let state = self.state.lock();
        if state.phase != SubscriptionPhase::Active {
            tracing::trace!(subscription = %self.id, dn = %entry.dn, "Change dropped after stop");
            return;
        }
        permit.send(ChangeEvent::Change {
            entry,
            received_at: Utc::now(),
        });
    }

    async fn abandon(&self, message_id: MessageId) -> OrgSyncResult<()> {
        let result = self.client.abandon(message_id).await;
        self.finish(SubscriptionPhase::Stopped);
        self.stop_signal.notify_one();
        result
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Opens change subscriptions on a shared client.
pub struct ChangeNotifier<C: DirectoryClient + 'static> {
    client: Arc<C>,
    attributes: Vec<String>,
    variant: DirectoryServiceVariant,
    buffer: usize,
}

impl<C: DirectoryClient + 'static> ChangeNotifier<C> {
    /// Creates a notifier.
    pub fn new<I, S>(client: Arc<C>, attributes: I, variant: DirectoryServiceVariant) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client,
            attributes: attributes.into_iter().map(Into::into).collect(),
            variant,
            buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Sets the capacity of the event channel of new subscriptions.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Subscribes to changes below `base_dn`.
    ///
    /// `filter` is evaluated locally against each changed entry.
    ///
    /// ## Errors
    ///
    /// - `OrgSyncError::Unsupported` if the directory is not Active Directory
    /// - `OrgSyncError::InvalidFilter` if `filter` does not parse
    /// - the client's error if the search cannot be issued
    pub async fn subscribe(&self, base_dn: &str, filter: Option<&str>) -> OrgSyncResult<ChangeSubscription> {
        if !self.variant.supports_change_notifications() {
            return Err(OrgSyncError::unsupported(format!(
                "change notifications are not available for {}",
                self.variant
            )));
        }
        let filter = filter.map(Filter::parse).transpose()?;

        let request = SearchRequest::new(base_dn, SearchScope::Sub, NOTIFICATION_FILTER)
            .attributes(self.attributes.iter().cloned())
            .control(Control::new(SERVER_NOTIFICATION_OID, false));
        let events = self.client.search(request).await?;

        let (phase_tx, phase_rx) = watch::channel(SubscriptionPhase::Subscribing);
        let shared = Arc::new(Shared {
            id: Uuid::now_v7(),
            base_dn: base_dn.to_string(),
            client: self.client.clone(),
            state: Mutex::new(State {
                phase: SubscriptionPhase::Subscribing,
                message_id: None,
                pending_stop: false,
            }),
            phase_tx,
            stop_signal: Notify::new(),
        });

        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(pump(shared.clone(), events, filter, tx));

        tracing::info!(subscription = %shared.id, base_dn, "Change subscription started");

        Ok(ChangeSubscription {
            handle: SubscriptionHandle { shared, phase_rx },
            events: rx,
        })
    }
}

enum Exit {
    Stopped,
    Errored(OrgSyncError),
}

async fn pump(
    shared: Arc<Shared>,
    mut events: Box<dyn SearchEvents>,
    filter: Option<Filter>,
    tx: mpsc::Sender<ChangeEvent>,
) {
    let exit = loop {
        let next = tokio::select! {
            biased;
            () = shared.stop_signal.notified() => break Exit::Stopped,
            next = events.next_event() => next,
        };

        match next {
            Ok(Some(SearchEvent::Entry { message_id, entry, .. })) => {
                if shared.acknowledge(message_id) == Acknowledgement::StopNow {
                    tracing::info!(subscription = %shared.id, message_id, "Abandoning subscription stopped before acknowledgement");
                    if let Err(e) = shared.abandon(message_id).await {
                        tracing::warn!(subscription = %shared.id, error = %e, "Deferred abandon failed");
                    }
                    break Exit::Stopped;
                }
                if shared.phase() != SubscriptionPhase::Active {
                    continue;
                }
                if !filter.as_ref().map_or(true, |f| f.matches(&entry)) {
                    tracing::trace!(subscription = %shared.id, dn = %entry.dn, "Change filtered out");
                    continue;
                }
                let Ok(permit) = tx.reserve().await else {
                    tracing::debug!(subscription = %shared.id, "Subscriber went away, stopping");
                    if let StopAction::Abandon(id) = shared.begin_stop() {
                        if let Err(e) = shared.abandon(id).await {
                            tracing::warn!(subscription = %shared.id, error = %e, "Abandon failed");
                        }
                    }
                    break Exit::Stopped;
                };
                // A stop may have completed while waiting for buffer space.
                shared.deliver(permit, entry);
            }
            Ok(Some(SearchEvent::PageEnd { .. })) => {}
            Ok(Some(SearchEvent::Done(outcome))) if outcome.is_success() => break Exit::Stopped,
            Ok(Some(SearchEvent::Done(outcome))) => {
                break Exit::Errored(OrgSyncError::subscription(format!(
                    "server ended the subscription with result code {}: {}",
                    outcome.code, outcome.message
                )))
            }
            Ok(None) => break Exit::Stopped,
            Err(e) => break Exit::Errored(OrgSyncError::subscription(e.to_string())),
        }
    };

    let last = match exit {
        Exit::Errored(_) if shared.phase() == SubscriptionPhase::Stopping => {
            shared.finish(SubscriptionPhase::Stopped);
            ChangeEvent::End
        }
        Exit::Errored(e) if shared.finish(SubscriptionPhase::Errored) => {
            tracing::warn!(subscription = %shared.id, error = %e, "Change subscription failed");
            ChangeEvent::Error(e)
        }
        Exit::Errored(_) | Exit::Stopped => {
            shared.finish(SubscriptionPhase::Stopped);
            tracing::info!(subscription = %shared.id, base_dn = %shared.base_dn, "Change subscription stopped");
            ChangeEvent::End
        }
    };
    let _ = tx.send(last).await;
}

// ============================================================================
// Subscription
// ============================================================================

/// Cloneable control handle of a subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    shared: Arc<Shared>,
    phase_rx: watch::Receiver<SubscriptionPhase>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.shared.id)
            .field("base_dn", &self.shared.base_dn)
            .field("state", &*state)
            .finish()
    }
}

impl SubscriptionHandle {
    /// Returns the local subscription id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> SubscriptionPhase {
        self.shared.phase()
    }

    /// Returns the server-assigned request id, once known.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.shared.state.lock().message_id
    }

    /// Returns a receiver that observes phase changes.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<SubscriptionPhase> {
        self.phase_rx.clone()
    }

    /// Stops the subscription.
    ///
    /// If the server has not acknowledged the subscription yet, the stop is
    /// recorded and carried out as soon as it does; this call returns
    /// immediately. Stopping a finished subscription does nothing.
    ///
    /// ## Errors
    ///
    /// Returns the client's error if the abandon request fails. The
    /// subscription is stopped regardless.
    pub async fn stop(&self) -> OrgSyncResult<()> {
        match self.shared.begin_stop() {
            StopAction::Nothing => Ok(()),
            StopAction::Deferred => {
                tracing::info!(subscription = %self.shared.id, "Stop requested before acknowledgement, deferring abandon");
                Ok(())
            }
            StopAction::Abandon(message_id) => {
                tracing::info!(subscription = %self.shared.id, message_id, "Stopping change subscription");
                self.shared.abandon(message_id).await
            }
        }
    }

    /// Stops the subscription and waits until it has fully ended.
    ///
    /// ## Errors
    ///
    /// Returns `OrgSyncError::CancellationRaceTimeout` if the server does not
    /// acknowledge the subscription within `timeout`. The stop stays pending
    /// and is still carried out on acknowledgement.
    pub async fn stop_and_wait(&self, timeout: Duration) -> OrgSyncResult<()> {
        self.stop().await?;
        let mut phase_rx = self.phase_rx.clone();
        let result = match tokio::time::timeout(timeout, phase_rx.wait_for(SubscriptionPhase::is_terminal)).await {
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::warn!(subscription = %self.shared.id, ?timeout, "Subscription not acknowledged in time");
                Err(OrgSyncError::CancellationRaceTimeout(timeout))
            }
        };
        result
    }
}

/// A live change subscription.
///
/// Dropping it stops the subscription.
#[derive(Debug)]
pub struct ChangeSubscription {
    handle: SubscriptionHandle,
    events: mpsc::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// Receives the next event. Returns `None` after the final event.
    ///
    /// Changes still buffered when the subscription stops or fails are
    /// discarded; the final `End` or `Error` is delivered next.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            let event = self.events.recv().await?;
            if matches!(event, ChangeEvent::Change { .. }) && self.phase().is_terminal() {
                continue;
            }
            return Some(event);
        }
    }

    /// Returns a cloneable control handle.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Returns the local subscription id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> SubscriptionPhase {
        self.handle.phase()
    }

    /// Returns the server-assigned request id, once known.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.handle.message_id()
    }

    /// See [`SubscriptionHandle::stop`].
    ///
    /// ## Errors
    ///
    /// Returns the client's error if the abandon request fails.
    pub async fn stop(&self) -> OrgSyncResult<()> {
        self.handle.stop().await
    }

    /// See [`SubscriptionHandle::stop_and_wait`].
    ///
    /// ## Errors
    ///
    /// Returns `OrgSyncError::CancellationRaceTimeout` on timeout.
    pub async fn stop_and_wait(&self, timeout: Duration) -> OrgSyncResult<()> {
        self.handle.stop_and_wait(timeout).await
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        let StopAction::Abandon(message_id) = self.handle.shared.begin_stop() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        tracing::debug!(subscription = %self.handle.shared.id, message_id, "Subscription dropped, abandoning");
        let shared = self.handle.shared.clone();
        runtime.spawn(async move {
            if let Err(e) = shared.abandon(message_id).await {
                tracing::warn!(subscription = %shared.id, error = %e, "Abandon failed");
            }
        });
    }
}
