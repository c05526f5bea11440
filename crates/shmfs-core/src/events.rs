// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Change notifications

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{FsError, FsResult};
use crate::types::{NodeId, StatMask, SubscriptionId, VolumeId};

/// What happened to an attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeCause {
    Created,
    Changed,
    Removed,
}

/// Event kinds for filesystem change notifications
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    EntryCreated {
        volume: VolumeId,
        dir: NodeId,
        name: String,
        node: NodeId,
    },
    EntryRemoved {
        volume: VolumeId,
        dir: NodeId,
        name: String,
        node: NodeId,
    },
    EntryMoved {
        volume: VolumeId,
        from_dir: NodeId,
        from_name: String,
        to_dir: NodeId,
        to_name: String,
        node: NodeId,
    },
    /// `dir` is the parent at the time of the change, `None` for the root
    StatChanged {
        volume: VolumeId,
        dir: Option<NodeId>,
        node: NodeId,
        fields: StatMask,
    },
    AttributeChanged {
        volume: VolumeId,
        node: NodeId,
        name: String,
        cause: AttributeCause,
    },
}

/// Event sink trait for receiving filesystem change notifications.
///
/// Sinks are called with the volume lock released and may call back into
/// the volume.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn on_event(&self, evt: &EventKind);
}

/// Subscriber registry owned by a volume.
pub(crate) struct EventHub {
    enabled: bool,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, Arc<dyn EventSink>>>,
}

impl EventHub {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().insert(id, sink);
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> FsResult<()> {
        match self.subscriptions.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound),
        }
    }

    pub(crate) fn publish(&self, event: &EventKind) {
        if !self.enabled {
            return;
        }
        // Snapshot so sinks may subscribe or unsubscribe from the callback.
        let sinks: Vec<Arc<dyn EventSink>> = self.subscriptions.lock().values().cloned().collect();
        trace!(?event, sinks = sinks.len(), "publishing event");
        for sink in sinks {
            sink.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created() -> EventKind {
        EventKind::EntryCreated {
            volume: VolumeId(1),
            dir: NodeId(1),
            name: "a".to_string(),
            node: NodeId(2),
        }
    }

    #[test]
    fn subscribers_receive_events_until_unsubscribed() {
        let hub = EventHub::new(true);
        let mut sink = MockEventSink::new();
        sink.expect_on_event()
            .withf(|evt| *evt == created())
            .times(1)
            .return_const(());
        let id = hub.subscribe(Arc::new(sink));

        hub.publish(&created());
        hub.unsubscribe(id).unwrap();
        hub.publish(&created());
        assert_eq!(hub.unsubscribe(id), Err(FsError::NotFound));
    }

    #[test]
    fn disabled_hub_is_silent() {
        let hub = EventHub::new(false);
        let mut sink = MockEventSink::new();
        sink.expect_on_event().never();
        hub.subscribe(Arc::new(sink));
        hub.publish(&created());
    }
}
