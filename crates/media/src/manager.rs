use std::collections::HashMap;

use crate::{PreviewError, TrackType};

/// A preview generation job the manager can schedule. Implementations
/// post their results and a final `Done` message on the shared preview
/// channel; the manager only sequences who runs.
pub trait PreviewGenerator {
    /// Asset content hash, the job's identity within its track type.
    fn key(&self) -> &str;

    fn track_type(&self) -> TrackType;

    fn start_generation(&mut self) -> Result<(), PreviewError>;

    fn stop_generation(&mut self);
}

/// Serializes preview generation: at most one controlled job per track
/// type runs at a time, bounding concurrent decode pipelines.
///
/// Pending jobs are inserted at the head of the list and drained from
/// the tail. That mix is inherited behavior: the newest request waits
/// for older still-pending ones, yet outranks even older ones. Keep it
/// as is unless the scheduling policy is deliberately revisited.
#[derive(Default)]
pub struct PreviewGeneratorManager {
    controlled: HashMap<TrackType, Box<dyn PreviewGenerator>>,
    pending: HashMap<TrackType, Vec<Box<dyn PreviewGenerator>>>,
}

impl PreviewGeneratorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a job, or starts it right away when nothing of its track
    /// type is running. Re-adding a job that is already controlled or
    /// already queued is a no-op.
    pub fn add_pipeline(&mut self, generator: Box<dyn PreviewGenerator>) {
        let track = generator.track_type();
        let key = generator.key().to_owned();

        if self
            .controlled
            .get(&track)
            .is_some_and(|c| c.key() == key)
        {
            return;
        }
        let queue = self.pending.entry(track).or_default();
        if queue.iter().any(|g| g.key() == key) {
            return;
        }

        if queue.is_empty() && !self.controlled.contains_key(&track) {
            self.set_pipeline(generator);
        } else {
            tracing::debug!(?track, key = %key, "queueing preview job");
            self.pending.entry(track).or_default().insert(0, generator);
        }
    }

    fn set_pipeline(&mut self, mut generator: Box<dyn PreviewGenerator>) {
        let track = generator.track_type();
        tracing::debug!(?track, key = generator.key(), "starting preview job");
        match generator.start_generation() {
            Ok(()) => {
                self.controlled.insert(track, generator);
            }
            Err(err) => {
                tracing::warn!(key = generator.key(), %err, "preview job failed to start");
                self.next_pipeline(track);
            }
        }
    }

    /// Advances a track type's queue after its controlled job reported
    /// done (errors included).
    pub fn mark_done(&mut self, track: TrackType) {
        if let Some(mut finished) = self.controlled.remove(&track) {
            finished.stop_generation();
        }
        self.next_pipeline(track);
    }

    fn next_pipeline(&mut self, track: TrackType) {
        let next = self.pending.get_mut(&track).and_then(Vec::pop);
        if let Some(generator) = next {
            self.set_pipeline(generator);
        }
    }

    pub fn controlled_key(&self, track: TrackType) -> Option<&str> {
        self.controlled.get(&track).map(|g| g.key())
    }

    pub fn pending_count(&self, track: TrackType) -> usize {
        self.pending.get(&track).map_or(0, Vec::len)
    }

    pub fn stop_all(&mut self) {
        for (_, mut generator) in self.controlled.drain() {
            generator.stop_generation();
        }
        self.pending.clear();
    }
}
