//! Snapshot reconciliation between this device and its peer.
//!
//! Policy: remote wins for records both sides know, unknown records are
//! added (the secret is re-created from the snapshot key), and absence never
//! deletes anything. Applying the same snapshot twice changes nothing.

use super::channel::{PeerChannel, PeerMessage};
use super::snapshot::Snapshot;
use crate::center::{CredentialCenter, CredentialEvent};
use crate::store::SecretRecord;
use crate::uri::parse_otpauth_uri;
use crate::Result;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Outcome of applying one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Malformed entries skipped.
    pub dropped: usize,
    /// Entries skipped because a store read or write failed.
    pub failed: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.added + self.updated > 0
    }
}

pub struct SyncReconciler {
    center: Arc<CredentialCenter>,
    channel: Arc<dyn PeerChannel>,
    received_context: AtomicBool,
}

impl SyncReconciler {
    pub fn new(center: Arc<CredentialCenter>, channel: Arc<dyn PeerChannel>) -> Self {
        Self {
            center,
            channel,
            received_context: AtomicBool::new(false),
        }
    }

    /// Full local set keyed by canonical credential URI.
    ///
    /// Credentials sharing a token (the same code enrolled twice) get the
    /// identifier appended as a URI fragment, which the parser ignores.
    pub fn outgoing_snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for extended in self.center.list_credentials()? {
            match self.center.credential_uri(&extended.identifier) {
                Ok(uri) if snapshot.contains(&uri) => {
                    warn!(
                        "Credential {} shares its token with another record, keying by identifier",
                        extended.identifier
                    );
                    let key = format!(
                        "{}#{}",
                        uri,
                        utf8_percent_encode(&extended.identifier, NON_ALPHANUMERIC)
                    );
                    snapshot.insert(key, extended);
                }
                Ok(uri) => snapshot.insert(uri, extended),
                Err(e) => warn!(
                    "Leaving {} out of snapshot: {}",
                    extended.identifier, e
                ),
            }
        }
        Ok(snapshot)
    }

    /// Merge a remote snapshot into the local stores under the writer lock.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<MergeReport> {
        let mut report = MergeReport::default();

        {
            let writer = self.center.writer()?;
            for (uri, remote) in snapshot.entries() {
                if remote.identifier.trim().is_empty() {
                    warn!("Dropping snapshot entry with empty identifier");
                    report.dropped += 1;
                    continue;
                }
                let descriptor = match parse_otpauth_uri(uri) {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        warn!("Dropping snapshot entry {}: {}", remote.identifier, e);
                        report.dropped += 1;
                        continue;
                    }
                };

                let local = match writer.live(&remote.identifier) {
                    Ok(local) => local,
                    Err(e) => {
                        warn!("Cannot read local record {}: {}", remote.identifier, e);
                        report.failed += 1;
                        continue;
                    }
                };
                match local {
                    Some(local) if local == *remote => report.unchanged += 1,
                    Some(_) => match writer.save(remote) {
                        Ok(()) => report.updated += 1,
                        Err(e) => {
                            warn!("Failed to update {} from snapshot: {}", remote.identifier, e);
                            report.failed += 1;
                        }
                    },
                    None => {
                        let record = SecretRecord::from_descriptor(&descriptor);
                        let result = writer
                            .put_secret(&remote.identifier, &record)
                            .and_then(|()| writer.save(remote));
                        match result {
                            Ok(()) => report.added += 1,
                            Err(e) => {
                                warn!("Failed to add {} from snapshot: {}", remote.identifier, e);
                                report.failed += 1;
                            }
                        }
                    }
                }
            }
        }

        if report.changed() {
            info!(
                "Merged snapshot: {} added, {} updated, {} dropped, {} failed",
                report.added, report.updated, report.dropped, report.failed
            );
            self.center.emit(CredentialEvent::Merged {
                added: report.added,
                updated: report.updated,
            });
        }
        Ok(report)
    }

    /// Decode and merge a context received from the peer.
    pub fn apply_context(&self, context: &[u8]) -> Result<MergeReport> {
        let decoded = Snapshot::decode(context)?;
        self.received_context.store(true, Ordering::SeqCst);

        let mut report = self.apply_snapshot(&decoded.snapshot)?;
        report.dropped += decoded.dropped;
        Ok(report)
    }

    /// Push the full local snapshot. Returns `false` if the channel is not
    /// activated and the send was dropped.
    pub async fn push_snapshot(&self) -> Result<bool> {
        if !self.channel.is_activated() {
            debug!("Peer channel not activated, snapshot not sent");
            return Ok(false);
        }
        let context = self.outgoing_snapshot()?.encode()?;
        self.channel.push_context(context).await?;
        Ok(true)
    }

    /// Answer a peer's context request.
    pub fn handle_request(&self) -> Result<Vec<u8>> {
        self.outgoing_snapshot()?.encode()
    }

    /// Channel became usable: push our set, and pull the peer's if we have
    /// never received one.
    pub async fn on_activated(&self) -> Result<Option<MergeReport>> {
        self.push_snapshot().await?;

        if self.received_context.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.channel.request_context().await? {
            Some(context) => self.apply_context(&context).map(Some),
            None => Ok(None),
        }
    }

    async fn handle_message(&self, message: PeerMessage) {
        match message {
            PeerMessage::Context(context) => {
                if let Err(e) = self.apply_context(&context) {
                    warn!("Ignoring peer context: {}", e);
                }
            }
            PeerMessage::Request(reply) => match self.handle_request() {
                Ok(context) => {
                    let _ = reply.send(context);
                }
                Err(e) => warn!("Cannot answer peer context request: {}", e),
            },
        }
    }

    /// Serve the channel and re-push after every local mutation until both
    /// the event stream and the peer are gone.
    pub async fn run(&self, mut events: broadcast::Receiver<CredentialEvent>) {
        let mut events_open = true;
        let mut peer_open = true;

        while events_open || peer_open {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Ok(event) if event.is_local() => self.push_logged().await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Missed {} credential events, pushing full snapshot", skipped);
                        self.push_logged().await;
                    }
                    Err(RecvError::Closed) => events_open = false,
                },
                message = self.channel.recv(), if peer_open => match message {
                    Some(message) => self.handle_message(message).await,
                    None => peer_open = false,
                },
            }
        }
        debug!("Sync reconciler stopped");
    }

    async fn push_logged(&self) {
        if let Err(e) = self.push_snapshot().await {
            warn!("Failed to push snapshot: {}", e);
        }
    }
}
