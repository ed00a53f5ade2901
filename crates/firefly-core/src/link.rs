// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Neighbor Links
// ─────────────────────────────────────────────────────────────────────
//! Directed delivery path from an oscillator to one neighbor.
//!
//! Oscillators only ever see `dyn NeighborLink`; whether a signal is a
//! direct call into another thread's oscillator or a TCP round-trip to
//! another process is decided by whoever wires the topology.

use std::sync::{Arc, Weak};

use firefly_types::{OscillatorId, SyncError, SyncResult};

use crate::oscillator::Oscillator;

/// Delivery contract for one edge.
pub trait NeighborLink: Send + Sync {
    /// Identity of the oscillator on the far end.
    fn neighbor_id(&self) -> OscillatorId;

    /// Deliver `value` from `sender` to the neighbor.
    fn deliver(&self, sender: OscillatorId, value: f64) -> SyncResult<()>;

    /// Read the neighbor's current phase (sampled family only).
    fn sample_phase(&self) -> SyncResult<f64> {
        Err(SyncError::Unsupported(format!(
            "link to {} cannot sample phases",
            self.neighbor_id()
        )))
    }
}

/// In-process link: a synchronous call into the neighbor's
/// `receive_signal`.
///
/// Holds a weak reference so mutually linked oscillators do not keep
/// each other alive.
pub struct LocalLink {
    id: OscillatorId,
    target: Weak<Oscillator>,
}

impl LocalLink {
    pub fn new(target: &Arc<Oscillator>) -> Self {
        Self {
            id: target.id(),
            target: Arc::downgrade(target),
        }
    }

    fn target(&self) -> SyncResult<Arc<Oscillator>> {
        self.target.upgrade().ok_or(SyncError::NeighborGone(self.id))
    }
}

impl NeighborLink for LocalLink {
    fn neighbor_id(&self) -> OscillatorId {
        self.id
    }

    fn deliver(&self, sender: OscillatorId, value: f64) -> SyncResult<()> {
        self.target()?.receive_signal(sender, value)
    }

    fn sample_phase(&self) -> SyncResult<f64> {
        Ok(self.target()?.phase())
    }
}

type DeliverFn = Box<dyn Fn(OscillatorId, f64) -> SyncResult<()> + Send + Sync>;

/// Link that hands every delivery to a closure.
///
/// Used to embed oscillators in foreign transports and as a test double
/// for failing or slow neighbors.
pub struct ExternalLink {
    id: OscillatorId,
    deliver_fn: DeliverFn,
}

impl ExternalLink {
    pub fn new(
        id: OscillatorId,
        deliver_fn: impl Fn(OscillatorId, f64) -> SyncResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            deliver_fn: Box::new(deliver_fn),
        }
    }
}

impl NeighborLink for ExternalLink {
    fn neighbor_id(&self) -> OscillatorId {
        self.id
    }

    fn deliver(&self, sender: OscillatorId, value: f64) -> SyncResult<()> {
        (self.deliver_fn)(sender, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firefly_types::SyncConfig;
    use parking_lot::Mutex;

    fn oscillator(id: u32, phase: f64) -> Arc<Oscillator> {
        Arc::new(Oscillator::new(OscillatorId(id), &SyncConfig::default(), phase).unwrap())
    }

    #[test]
    fn test_local_link_delivers() {
        let a = oscillator(0, 0.0);
        let b = oscillator(1, 0.0);
        b.attach_neighbors(vec![Arc::new(LocalLink::new(&a)) as Arc<dyn NeighborLink>])
            .unwrap();

        let link = LocalLink::new(&b);
        assert_eq!(link.neighbor_id(), OscillatorId(1));
        link.deliver(OscillatorId(0), 42.0).unwrap();
        assert!(b.is_dirty());
        assert_eq!(b.signal_snapshot(), vec![(OscillatorId(0), 42.0)]);
    }

    #[test]
    fn test_local_link_samples_phase() {
        let a = oscillator(3, 1.25);
        let link = LocalLink::new(&a);
        assert_eq!(link.sample_phase().unwrap(), 1.25);
    }

    #[test]
    fn test_local_link_to_dropped_neighbor() {
        let a = oscillator(7, 0.0);
        let link = LocalLink::new(&a);
        drop(a);
        assert!(matches!(
            link.deliver(OscillatorId(1), 1.0),
            Err(SyncError::NeighborGone(OscillatorId(7)))
        ));
        assert!(link.sample_phase().is_err());
    }

    #[test]
    fn test_external_link() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let link = ExternalLink::new(OscillatorId(9), move |from, v| {
            sink.lock().push((from, v));
            Ok(())
        });
        link.deliver(OscillatorId(2), 0.5).unwrap();
        assert_eq!(*seen.lock(), vec![(OscillatorId(2), 0.5)]);
        assert!(matches!(link.sample_phase(), Err(SyncError::Unsupported(_))));
    }
}
