use tokio::sync::broadcast;

/// Change notifications published by the session store. Subscribers re-read the
/// store on receipt; the payload is a hint, the store is the truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    /// A refresh replaced the cached identity.
    IdentityReplaced,
    ImpersonationChanged { active: bool },
}

const CHANNEL_CAPACITY: usize = 32;

/// Fire-and-forget fan-out. Publishing with no subscribers is not an error and a
/// lagging subscriber simply misses older events.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl SessionEvents {
    pub fn publish(&self, ev: SessionEvent) {
        let _ = self.tx.send(ev);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
