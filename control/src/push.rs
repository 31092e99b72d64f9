//! Push requests to the proxy-configuration pipeline
//!
//! The coordinator issues at most one [`PushRequest`] per reconcile pass. What
//! happens to it is the sink's business: the binary logs and counts it, tests
//! capture it on a channel.

use crate::apis::gateway::types::ObjectKind;
use crate::apis::metrics::PUSHES_TOTAL;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Why a push was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerReason {
    /// Derived config changed
    ConfigUpdate,
    /// A Namespace change altered which Routes listeners admit
    NamespaceUpdate,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::ConfigUpdate => "config_update",
            TriggerReason::NamespaceUpdate => "namespace_update",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileTrigger {
    /// A change to a watched object of this kind
    Object(ObjectKind),
    /// Explicit full reconcile
    Full,
}

impl ReconcileTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileTrigger::Object(ObjectKind::GatewayClass) => "gatewayclass",
            ReconcileTrigger::Object(ObjectKind::Gateway) => "gateway",
            ReconcileTrigger::Object(ObjectKind::HttpRoute) => "httproute",
            ReconcileTrigger::Object(ObjectKind::Namespace) => "namespace",
            ReconcileTrigger::Full => "full",
        }
    }
}

impl fmt::Display for ReconcileTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to recompute and redistribute proxy config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// Always a full push
    pub full: bool,
    pub reasons: BTreeSet<TriggerReason>,
    /// Source of the pass that produced this push
    pub trigger: ReconcileTrigger,
    /// Snapshot version the push corresponds to
    pub version: u64,
}

impl PushRequest {
    pub fn full(version: u64, reasons: impl IntoIterator<Item = TriggerReason>) -> Self {
        Self {
            full: true,
            reasons: reasons.into_iter().collect(),
            trigger: ReconcileTrigger::Full,
            version,
        }
    }

    pub fn triggered_by(mut self, trigger: ReconcileTrigger) -> Self {
        self.trigger = trigger;
        self
    }
}

/// Receiver of push requests
pub trait PushSink: Send + Sync {
    fn notify(&self, request: PushRequest);
}

/// Sink that logs and counts every push
#[derive(Debug, Default, Clone)]
pub struct LoggingPushSink;

impl PushSink for LoggingPushSink {
    fn notify(&self, request: PushRequest) {
        let reasons: Vec<&str> = request.reasons.iter().map(|r| r.as_str()).collect();
        info!(
            "Push requested: full={} version={} trigger={} reasons={:?}",
            request.full, request.version, request.trigger, reasons
        );
        for reason in &request.reasons {
            PUSHES_TOTAL.with_label_values(&[reason.as_str()]).inc();
        }
    }
}

/// Sink that forwards pushes to a channel
#[derive(Debug, Clone)]
pub struct ChannelPushSink {
    tx: mpsc::UnboundedSender<PushRequest>,
}

impl ChannelPushSink {
    pub fn new() -> (Self, PushReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, PushReceiver { rx })
    }
}

impl PushSink for ChannelPushSink {
    fn notify(&self, request: PushRequest) {
        // A closed receiver means nobody is listening anymore
        let _ = self.tx.send(request);
    }
}

/// Receiving end of a [`ChannelPushSink`]
#[derive(Debug)]
pub struct PushReceiver {
    rx: mpsc::UnboundedReceiver<PushRequest>,
}

impl PushReceiver {
    /// Next push, or `None` if none arrives within `timeout`
    pub async fn wait(&mut self, timeout: Duration) -> Option<PushRequest> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// True if no push arrives within `timeout`
    pub async fn is_quiet(&mut self, timeout: Duration) -> bool {
        self.wait(timeout).await.is_none()
    }

    /// Pushes already delivered, without waiting
    pub fn drain(&mut self) -> Vec<PushRequest> {
        let mut out = Vec::new();
        while let Ok(request) = self.rx.try_recv() {
            out.push(request);
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_requests() {
        let (sink, mut rx) = ChannelPushSink::new();
        sink.notify(PushRequest::full(1, [TriggerReason::ConfigUpdate]));

        let push = rx.wait(Duration::from_millis(100)).await.unwrap();
        assert!(push.full);
        assert_eq!(push.version, 1);
        assert_eq!(push.trigger, ReconcileTrigger::Full);
        assert!(push.reasons.contains(&TriggerReason::ConfigUpdate));

        assert!(rx.is_quiet(Duration::from_millis(20)).await);
    }

    #[test]
    fn test_drain_and_closed_receiver() {
        let (sink, mut rx) = ChannelPushSink::new();
        sink.notify(PushRequest::full(1, [TriggerReason::ConfigUpdate]));
        sink.notify(PushRequest::full(2, [TriggerReason::NamespaceUpdate]));
        assert_eq!(rx.drain().len(), 2);

        drop(rx);
        // Must not panic
        sink.notify(PushRequest::full(3, Vec::<TriggerReason>::new()));
    }

    #[test]
    fn test_logging_sink_counts_reasons() {
        let before = PUSHES_TOTAL.with_label_values(&["namespace_update"]).get();
        LoggingPushSink.notify(PushRequest::full(
            4,
            [TriggerReason::NamespaceUpdate, TriggerReason::ConfigUpdate],
        ));
        assert!(PUSHES_TOTAL.with_label_values(&["namespace_update"]).get() > before);
    }

    #[test]
    fn test_trigger_is_carried() {
        let push = PushRequest::full(5, [TriggerReason::ConfigUpdate])
            .triggered_by(ReconcileTrigger::Object(ObjectKind::HttpRoute));
        assert_eq!(push.trigger, ReconcileTrigger::Object(ObjectKind::HttpRoute));
        assert_eq!(push.trigger.to_string(), "httproute");
        assert_eq!(push.version, 5);
    }
}
