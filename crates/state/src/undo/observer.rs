use std::collections::HashMap;

use crate::event::TimelineEvent;
use crate::timeline::{
    Clip, ClipId, ClipProperty, Effect, EffectId, ElementId, Keyframe, KeyframeId, LayerId,
    PropertyValue, Timeline,
};

use super::{
    KeyframeChangeTracker, PropertyChangeTracker, UndoError, UndoableAction, UndoableActionLog,
};

#[derive(Debug)]
pub struct PropertyChangedAction {
    clip: ClipId,
    property: ClipProperty,
    old: PropertyValue,
    new: PropertyValue,
}

impl UndoableAction for PropertyChangedAction {
    fn name(&self) -> &'static str {
        "property-change"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .set_property(self.clip, self.property, self.new)
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .set_property(self.clip, self.property, self.old)
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug)]
pub struct ClipAddedAction {
    layer: LayerId,
    clip: Clip,
}

impl UndoableAction for ClipAddedAction {
    fn name(&self) -> &'static str {
        "clip-add"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .insert_clip(self.layer, self.clip.clone())
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .remove_clip(self.clip.id)
            .map(|_| ())
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug)]
pub struct ClipRemovedAction {
    layer: LayerId,
    clip: Clip,
}

impl UndoableAction for ClipRemovedAction {
    fn name(&self) -> &'static str {
        "clip-remove"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .remove_clip(self.clip.id)
            .map(|_| ())
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .insert_clip(self.layer, self.clip.clone())
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug)]
pub struct EffectAddedAction {
    element: ElementId,
    effect: Effect,
}

impl UndoableAction for EffectAddedAction {
    fn name(&self) -> &'static str {
        "effect-add"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .add_effect(self.element, self.effect.clone())
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .remove_effect(self.effect.id)
            .map(|_| ())
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug)]
pub struct EffectRemovedAction {
    element: ElementId,
    effect: Effect,
}

impl UndoableAction for EffectRemovedAction {
    fn name(&self) -> &'static str {
        "effect-remove"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .remove_effect(self.effect.id)
            .map(|_| ())
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .add_effect(self.element, self.effect.clone())
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug)]
pub struct EffectActiveChangedAction {
    effect: EffectId,
    active: bool,
}

impl UndoableAction for EffectActiveChangedAction {
    fn name(&self) -> &'static str {
        "effect-toggle"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .set_effect_active(self.effect, self.active)
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .set_effect_active(self.effect, !self.active)
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug)]
pub struct KeyframeAddedAction {
    element: ElementId,
    keyframe: Keyframe,
}

impl UndoableAction for KeyframeAddedAction {
    fn name(&self) -> &'static str {
        "keyframe-add"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .add_keyframe(self.element, self.keyframe)
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .remove_keyframe(self.element, self.keyframe.id)
            .map(|_| ())
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug)]
pub struct KeyframeRemovedAction {
    element: ElementId,
    keyframe: Keyframe,
}

impl UndoableAction for KeyframeRemovedAction {
    fn name(&self) -> &'static str {
        "keyframe-remove"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .remove_keyframe(self.element, self.keyframe.id)
            .map(|_| ())
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .add_keyframe(self.element, self.keyframe)
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug)]
pub struct KeyframeMovedAction {
    element: ElementId,
    id: KeyframeId,
    old: Keyframe,
    new: Keyframe,
}

impl UndoableAction for KeyframeMovedAction {
    fn name(&self) -> &'static str {
        "keyframe-move"
    }

    fn apply(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .move_keyframe(self.element, self.id, self.new.time, self.new.value)
            .map_err(|e| UndoError::failed(self.name(), "apply", e))
    }

    fn revert(&mut self, timeline: &mut Timeline) -> Result<(), UndoError> {
        timeline
            .move_keyframe(self.element, self.id, self.old.time, self.old.value)
            .map_err(|e| UndoError::failed(self.name(), "revert", e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObserverMode {
    #[default]
    Normal,
    Replaying,
}

/// Translates timeline mutation events into recorded undoable actions.
///
/// The host drains the timeline after every mutation burst by calling
/// [`TimelineLogObserver::sync`]. While the action log replays history
/// the observer must be switched to [`ObserverMode::Replaying`]: handlers
/// then keep the trackers' snapshots current but record nothing, which is
/// what stops an undo from logging its own mutations.
#[derive(Debug, Default)]
pub struct TimelineLogObserver {
    mode: ObserverMode,
    clip_trackers: HashMap<ClipId, PropertyChangeTracker>,
    keyframe_trackers: HashMap<ElementId, KeyframeChangeTracker>,
    observing: bool,
}

impl TimelineLogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ObserverMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ObserverMode) {
        self.mode = mode;
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Walks the whole timeline, installing a property tracker per clip
    /// and a keyframe tracker per track element.
    pub fn start_observing(&mut self, timeline: &Timeline) {
        for layer in timeline.layers() {
            for clip in &layer.clips {
                self.connect_clip(clip, layer.priority);
            }
        }
        self.observing = true;
        tracing::debug!(clips = self.clip_trackers.len(), "observing timeline");
    }

    /// Drops every tracker. Safe to call twice; required before the
    /// timeline is discarded so no snapshot outlives its subject.
    pub fn stop_observing(&mut self) {
        self.clip_trackers.clear();
        self.keyframe_trackers.clear();
        self.observing = false;
    }

    fn connect_clip(&mut self, clip: &Clip, priority: u32) {
        self.clip_trackers
            .insert(clip.id, PropertyChangeTracker::connect(clip, priority));
        for element in &clip.elements {
            self.keyframe_trackers
                .insert(element.id, KeyframeChangeTracker::connect(element));
        }
    }

    fn disconnect_clip(&mut self, clip: &Clip) {
        self.clip_trackers.remove(&clip.id);
        for element in &clip.elements {
            self.keyframe_trackers.remove(&element.id);
        }
    }

    /// Drains pending timeline events and records one action per event.
    pub fn sync(
        &mut self,
        timeline: &mut Timeline,
        log: &mut UndoableActionLog,
    ) -> Result<(), UndoError> {
        let events = timeline.drain_events();
        if !self.observing {
            return Ok(());
        }
        for event in events {
            self.handle(timeline, log, event)?;
        }
        Ok(())
    }

    fn handle(
        &mut self,
        timeline: &Timeline,
        log: &mut UndoableActionLog,
        event: TimelineEvent,
    ) -> Result<(), UndoError> {
        let recording = self.mode() == ObserverMode::Normal;
        match event {
            TimelineEvent::LayerAdded { .. } | TimelineEvent::LayerRemoved { .. } => {}
            TimelineEvent::ClipAdded { layer, clip } => {
                let priority = timeline.layer_priority(layer).unwrap_or(0);
                self.connect_clip(&clip, priority);
                if recording {
                    log.push(Box::new(ClipAddedAction { layer, clip }))?;
                }
            }
            TimelineEvent::ClipRemoved { layer, clip } => {
                self.disconnect_clip(&clip);
                if recording {
                    log.push(Box::new(ClipRemovedAction { layer, clip }))?;
                }
            }
            TimelineEvent::PropertyChanged {
                clip,
                property,
                value,
            } => {
                let Some(tracker) = self.clip_trackers.get_mut(&clip) else {
                    tracing::warn!(?property, "property change for untracked clip");
                    return Ok(());
                };
                let Some(old) = tracker.record(property, value) else {
                    return Ok(());
                };
                if recording && old != value {
                    log.push(Box::new(PropertyChangedAction {
                        clip,
                        property,
                        old,
                        new: value,
                    }))?;
                }
            }
            TimelineEvent::EffectAdded {
                element, effect, ..
            } => {
                if recording {
                    log.push(Box::new(EffectAddedAction { element, effect }))?;
                }
            }
            TimelineEvent::EffectRemoved {
                element, effect, ..
            } => {
                if recording {
                    log.push(Box::new(EffectRemovedAction { element, effect }))?;
                }
            }
            TimelineEvent::EffectActiveChanged { effect, active } => {
                if recording {
                    log.push(Box::new(EffectActiveChangedAction { effect, active }))?;
                }
            }
            TimelineEvent::KeyframeAdded { element, keyframe } => {
                if let Some(tracker) = self.keyframe_trackers.get_mut(&element) {
                    tracker.record_added(keyframe);
                }
                if recording {
                    log.push(Box::new(KeyframeAddedAction { element, keyframe }))?;
                }
            }
            TimelineEvent::KeyframeRemoved { element, keyframe } => {
                if let Some(tracker) = self.keyframe_trackers.get_mut(&element) {
                    tracker.record_removed(keyframe.id);
                }
                if recording {
                    log.push(Box::new(KeyframeRemovedAction { element, keyframe }))?;
                }
            }
            TimelineEvent::KeyframeMoved { element, keyframe } => {
                let old = self
                    .keyframe_trackers
                    .get_mut(&element)
                    .and_then(|t| t.record_moved(keyframe));
                let Some(old) = old else {
                    tracing::warn!("keyframe move for untracked element");
                    return Ok(());
                };
                if recording {
                    log.push(Box::new(KeyframeMovedAction {
                        element,
                        id: keyframe.id,
                        old,
                        new: keyframe,
                    }))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TrackKind;

    const SEC: u64 = 1_000_000_000;

    struct Fixture {
        timeline: Timeline,
        log: UndoableActionLog,
        observer: TimelineLogObserver,
    }

    impl Fixture {
        fn new() -> Self {
            let mut timeline = Timeline::new();
            timeline.add_layer(0);
            timeline.drain_events();
            let mut observer = TimelineLogObserver::new();
            observer.start_observing(&timeline);
            Self {
                timeline,
                log: UndoableActionLog::new(),
                observer,
            }
        }

        fn transact(&mut self, name: &str, f: impl FnOnce(&mut Timeline)) {
            self.log.begin(name);
            f(&mut self.timeline);
            self.observer
                .sync(&mut self.timeline, &mut self.log)
                .unwrap();
            self.log.commit().unwrap();
        }

        fn undo(&mut self) -> bool {
            self.observer.set_mode(ObserverMode::Replaying);
            let undone = self.log.undo(&mut self.timeline).unwrap();
            self.observer
                .sync(&mut self.timeline, &mut self.log)
                .unwrap();
            self.observer.set_mode(ObserverMode::Normal);
            undone
        }

        fn redo(&mut self) -> bool {
            self.observer.set_mode(ObserverMode::Replaying);
            let redone = self.log.redo(&mut self.timeline).unwrap();
            self.observer
                .sync(&mut self.timeline, &mut self.log)
                .unwrap();
            self.observer.set_mode(ObserverMode::Normal);
            redone
        }

        fn add_clip(&mut self, name: &str, start: u64, duration: u64) -> ClipId {
            let clip = Clip::new(name, start, duration).with_element(TrackKind::Video);
            let mut id = None;
            self.transact("add-clip", |t| {
                id = Some(t.add_clip(0, clip).unwrap());
            });
            id.unwrap()
        }
    }

    fn observed_state(timeline: &Timeline) -> Vec<(ClipId, u64, u64, u64, u32, bool)> {
        let mut out = Vec::new();
        for layer in timeline.layers() {
            for clip in &layer.clips {
                out.push((
                    clip.id,
                    clip.start,
                    clip.duration,
                    clip.in_point,
                    layer.priority,
                    clip.selected,
                ));
            }
        }
        out.sort_by_key(|entry| entry.1);
        out
    }

    #[test]
    fn undo_then_redo_restores_observable_state() {
        let mut fx = Fixture::new();
        let a = fx.add_clip("a", 0, 2 * SEC);
        let b = fx.add_clip("b", 2 * SEC, 2 * SEC);
        fx.transact("move", |t| t.set_start(a, 5 * SEC).unwrap());
        fx.transact("resize", |t| t.set_duration(b, SEC).unwrap());

        let committed = observed_state(&fx.timeline);
        let n = fx.log.undo_depth();

        for _ in 0..n {
            assert!(fx.undo());
        }
        assert!(observed_state(&fx.timeline).is_empty());
        for _ in 0..n {
            assert!(fx.redo());
        }
        assert_eq!(observed_state(&fx.timeline), committed);
    }

    #[test]
    fn new_commit_after_undo_clears_redo() {
        let mut fx = Fixture::new();
        let a = fx.add_clip("a", 0, SEC);
        fx.transact("move", |t| t.set_start(a, SEC).unwrap());

        assert!(fx.undo());
        assert_eq!(fx.log.redo_depth(), 1);

        fx.transact("other-move", |t| t.set_start(a, 3 * SEC).unwrap());
        assert_eq!(fx.log.redo_depth(), 0);
        assert!(!fx.redo());
        assert_eq!(fx.timeline.find_clip(a).unwrap().start, 3 * SEC);
    }

    #[test]
    fn nested_scopes_revert_as_one_unit() {
        let mut fx = Fixture::new();
        let a = fx.add_clip("a", 0, 2 * SEC);

        fx.log.begin("outer");
        fx.timeline.set_start(a, SEC).unwrap();
        fx.observer.sync(&mut fx.timeline, &mut fx.log).unwrap();
        fx.log.begin("inner");
        fx.timeline.set_duration(a, 4 * SEC).unwrap();
        fx.timeline.set_selected(a, true).unwrap();
        fx.observer.sync(&mut fx.timeline, &mut fx.log).unwrap();
        fx.log.commit().unwrap();
        fx.timeline.set_in_point(a, SEC / 2).unwrap();
        fx.observer.sync(&mut fx.timeline, &mut fx.log).unwrap();
        fx.log.commit().unwrap();

        assert!(fx.undo());
        let clip = fx.timeline.find_clip(a).unwrap();
        assert_eq!(clip.start, 0);
        assert_eq!(clip.duration, 2 * SEC);
        assert_eq!(clip.in_point, 0);
        assert!(!clip.selected);
    }

    #[test]
    fn dirty_flag_follows_checkpoint_depth() {
        let mut fx = Fixture::new();
        let a = fx.add_clip("a", 0, SEC);
        fx.log.checkpoint().unwrap();
        assert!(!fx.log.is_dirty());

        fx.transact("move", |t| t.set_start(a, SEC).unwrap());
        assert!(fx.log.is_dirty());

        fx.undo();
        assert!(!fx.log.is_dirty());
        fx.redo();
        assert!(fx.log.is_dirty());
    }

    // The worked scenario: move then resize, undo twice, redo once.
    #[test]
    fn move_resize_undo_undo_redo_scenario() {
        let mut fx = Fixture::new();
        let clip = Clip::new("clip", 0, 1000);
        let a = clip.id;
        fx.timeline.add_clip(0, clip).unwrap();
        fx.timeline.drain_events();
        fx.observer.stop_observing();
        fx.observer.start_observing(&fx.timeline);
        fx.log.checkpoint().unwrap();

        fx.transact("move", |t| t.set_start(a, 500).unwrap());
        fx.transact("resize", |t| t.set_duration(a, 1200).unwrap());

        assert!(fx.undo());
        let c = fx.timeline.find_clip(a).unwrap();
        assert_eq!((c.start, c.duration), (500, 1000));
        assert_eq!(fx.log.redo_depth(), 1);

        assert!(fx.undo());
        let c = fx.timeline.find_clip(a).unwrap();
        assert_eq!((c.start, c.duration), (0, 1000));
        assert_eq!(fx.log.redo_depth(), 2);

        assert!(fx.redo());
        let c = fx.timeline.find_clip(a).unwrap();
        assert_eq!(c.start, 500);
        assert!(fx.log.is_dirty());
    }

    #[test]
    fn replay_is_not_recorded_and_trackers_stay_fresh() {
        let mut fx = Fixture::new();
        let a = fx.add_clip("a", 0, SEC);
        fx.transact("move", |t| t.set_start(a, 5 * SEC).unwrap());
        assert_eq!(fx.log.undo_depth(), 2);

        fx.undo();
        // Nothing new was recorded by the replayed mutation.
        assert_eq!(fx.log.undo_depth(), 1);
        assert_eq!(fx.log.redo_depth(), 1);

        // The tracker saw the replay: a fresh move must record 0 as the
        // old value, so undoing it returns to 0, not to the stale 5s.
        fx.transact("move-again", |t| t.set_start(a, 7 * SEC).unwrap());
        fx.undo();
        assert_eq!(fx.timeline.find_clip(a).unwrap().start, 0);
    }

    #[test]
    fn clip_removal_restores_elements_and_effects() {
        let mut fx = Fixture::new();
        let mut clip = Clip::new("a", SEC, SEC).with_element(TrackKind::Video);
        let element = clip.elements[0].id;
        clip.elements[0].effects.push(Effect::new("blur"));
        let id = clip.id;
        fx.transact("add", |t| {
            t.add_clip(0, clip).unwrap();
        });
        fx.transact("remove", |t| {
            t.remove_clip(id).unwrap();
        });
        assert!(fx.timeline.find_clip(id).is_none());

        fx.undo();
        let clip = fx.timeline.find_clip(id).unwrap();
        assert_eq!(clip.elements.len(), 1);
        assert_eq!(clip.elements[0].id, element);
        assert_eq!(clip.elements[0].effects[0].name, "blur");

        fx.redo();
        assert!(fx.timeline.find_clip(id).is_none());
    }

    #[test]
    fn effect_toggle_round_trips() {
        let mut fx = Fixture::new();
        let mut clip = Clip::new("a", 0, SEC).with_element(TrackKind::Video);
        let effect = Effect::new("scale");
        let effect_id = effect.id;
        clip.elements[0].effects.push(effect);
        fx.transact("add", |t| {
            t.add_clip(0, clip).unwrap();
        });

        fx.transact("toggle", |t| {
            t.set_effect_active(effect_id, false).unwrap();
        });
        fx.undo();
        let element = fx
            .timeline
            .layers()[0]
            .clips
            .iter()
            .flat_map(|c| c.elements.iter())
            .next()
            .unwrap();
        assert!(element.effects[0].active);
    }

    #[test]
    fn keyframe_move_uses_tracker_snapshot() {
        let mut fx = Fixture::new();
        let clip = Clip::new("a", 0, SEC).with_element(TrackKind::Video);
        let element = clip.elements[0].id;
        fx.transact("add", |t| {
            t.add_clip(0, clip).unwrap();
        });

        let kf = crate::timeline::Keyframe::new(100, 0.25, crate::timeline::KeyframeMode::Linear);
        fx.transact("add-keyframe", |t| {
            t.add_keyframe(element, kf).unwrap();
        });
        fx.transact("move-keyframe", |t| {
            t.move_keyframe(element, kf.id, 900, 0.75).unwrap();
        });

        fx.undo();
        let stored = fx.timeline.find_element(element).unwrap().keyframes[0];
        assert_eq!((stored.time, stored.value), (100, 0.25));

        fx.redo();
        let stored = fx.timeline.find_element(element).unwrap().keyframes[0];
        assert_eq!((stored.time, stored.value), (900, 0.75));
    }
}
