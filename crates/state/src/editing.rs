use std::time::{Duration, Instant};

use crate::timeline::{ClipId, EditEdge, EditError, EditMode, Timeline};
use crate::undo::{ObserverMode, TimelineLogObserver, UndoError, UndoableActionLog};

pub const LAYER_HEIGHT: f32 = 56.0;
pub const LAYER_GAP: f32 = 8.0;
pub const NEW_LAYER_HOVER_DELAY: Duration = Duration::from_millis(1500);

/// Where a vertical pointer coordinate landed: an existing layer, or the
/// gap between layers where a new one can be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerTarget {
    Existing(u32),
    Gap(u32),
}

/// Maps a y coordinate in timeline-strip space to a layer target. Each
/// layer strip is preceded by a thin gap band; pointing past the last
/// layer lands in the trailing gap.
pub fn layer_at_y(y: f32, layer_count: usize) -> LayerTarget {
    let y = y.max(0.0);
    let band = LAYER_HEIGHT + LAYER_GAP;
    let index = (y / band) as usize;
    if index >= layer_count {
        return LayerTarget::Gap(layer_count as u32);
    }
    let offset = y - index as f32 * band;
    if offset < LAYER_GAP {
        LayerTarget::Gap(index as u32)
    } else {
        LayerTarget::Existing(index as u32)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GestureError {
    #[error("gesture already ended")]
    AlreadyEnded,
    #[error(transparent)]
    Undo(#[from] UndoError),
    #[error(transparent)]
    Edit(#[from] EditError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    Active,
    Committed,
    Abandoned,
}

/// One interactive edit gesture against the live timeline.
///
/// Edits are applied immediately; the gesture opens an action-log
/// transaction at the first applied edit and must end in exactly one of
/// [`EditingContext::finish`] (commit) or [`EditingContext::abandon`]
/// (roll everything back). Leaving a context un-ended leaves the log's
/// transaction open, which blocks undo/redo globally.
#[derive(Debug)]
pub struct EditingContext {
    clip: ClipId,
    linked: Vec<ClipId>,
    mode: EditMode,
    edge: EditEdge,
    name: String,
    origin_position: u64,
    origin_priority: u32,
    last_good: u64,
    last_priority: u32,
    state: GestureState,
    began: bool,
    snap: Option<u64>,
    gap_hover: Option<(u32, Instant)>,
    layer_delay: Duration,
}

impl EditingContext {
    pub fn new(
        timeline: &Timeline,
        clip: ClipId,
        mode: EditMode,
        edge: EditEdge,
        name: impl Into<String>,
    ) -> Result<Self, EditError> {
        let target = timeline.find_clip(clip).ok_or(EditError::NoSuchClip)?;
        let priority = timeline.clip_priority(clip).ok_or(EditError::NoSuchClip)?;
        let origin_position = match edge {
            EditEdge::End => target.end(),
            EditEdge::None | EditEdge::Start => target.start,
        };
        Ok(Self {
            clip,
            linked: target.linked.clone(),
            mode,
            edge,
            name: name.into(),
            origin_position,
            origin_priority: priority,
            last_good: origin_position,
            last_priority: priority,
            state: GestureState::Active,
            began: false,
            snap: None,
            gap_hover: None,
            layer_delay: NEW_LAYER_HOVER_DELAY,
        })
    }

    pub fn with_layer_delay(mut self, delay: Duration) -> Self {
        self.layer_delay = delay;
        self
    }

    pub fn clip(&self) -> ClipId {
        self.clip
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn edge(&self) -> EditEdge {
        self.edge
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    /// Position captured at gesture start: the start edge, or the end
    /// edge for end-edge gestures. Stable across mode switches.
    pub fn origin(&self) -> u64 {
        self.origin_position
    }

    pub fn origin_priority(&self) -> u32 {
        self.origin_priority
    }

    /// The active snap point, when the last edit landed on one.
    pub fn snap_indicator(&self) -> Option<u64> {
        self.snap
    }

    /// Switches edit semantics mid-drag, e.g. when a modifier key is
    /// pressed. The reference position captured at gesture start stays.
    pub fn set_mode(&mut self, mode: EditMode) {
        if self.mode != mode {
            tracing::debug!(?mode, "edit mode switched mid-gesture");
            self.mode = mode;
        }
    }

    /// Applies one drag step. The position is snapped to nearby clip
    /// edges, the layer target is resolved (materializing a new layer
    /// only after the hover delay), and the edit lands on the engine
    /// immediately. A rejected edit falls back to the last position the
    /// engine accepted.
    pub fn edit_to(
        &mut self,
        timeline: &mut Timeline,
        log: &mut UndoableActionLog,
        observer: &mut TimelineLogObserver,
        position: u64,
        layer: LayerTarget,
    ) -> Result<(), GestureError> {
        if self.state != GestureState::Active {
            return Err(GestureError::AlreadyEnded);
        }

        let mut position = position;
        let mut exclude = vec![self.clip];
        exclude.extend_from_slice(&self.linked);
        match timeline.snap(position, &exclude) {
            Some(snapped) => {
                self.snap = Some(snapped);
                position = snapped;
            }
            None => self.snap = None,
        }

        let priority = self.resolve_layer(timeline, layer);

        if !self.began {
            log.begin(self.name.clone());
            self.began = true;
        }

        match timeline.edit(self.clip, self.mode, self.edge, position, priority) {
            Ok(()) => {
                self.last_good = position;
                self.last_priority = priority;
            }
            Err(err) => {
                tracing::debug!(%err, "edit rejected, reverting to last good position");
                timeline.edit(
                    self.clip,
                    self.mode,
                    self.edge,
                    self.last_good,
                    self.last_priority,
                )?;
            }
        }

        observer.sync(timeline, log)?;
        Ok(())
    }

    fn resolve_layer(&mut self, timeline: &mut Timeline, layer: LayerTarget) -> u32 {
        match layer {
            LayerTarget::Existing(priority) => {
                self.gap_hover = None;
                priority
            }
            LayerTarget::Gap(priority) => match self.gap_hover {
                Some((hovered, since)) if hovered == priority => {
                    if since.elapsed() >= self.layer_delay {
                        tracing::debug!(priority, "materializing hovered layer");
                        timeline.add_layer(priority);
                        self.gap_hover = None;
                        priority
                    } else {
                        self.last_priority
                    }
                }
                _ => {
                    self.gap_hover = Some((priority, Instant::now()));
                    self.last_priority
                }
            },
        }
    }

    /// Commits the gesture. Exactly one terminal call per context: a
    /// second `finish` or a `finish` after `abandon` is an error.
    pub fn finish(
        &mut self,
        timeline: &mut Timeline,
        log: &mut UndoableActionLog,
        observer: &mut TimelineLogObserver,
    ) -> Result<(), GestureError> {
        if self.state != GestureState::Active {
            return Err(GestureError::AlreadyEnded);
        }
        observer.sync(timeline, log)?;
        if self.began {
            log.commit()?;
        }
        self.snap = None;
        self.state = GestureState::Committed;
        Ok(())
    }

    /// Abandons the gesture (escape key, focus loss): provisional actions
    /// are reverted and the open transaction is discarded, leaving both
    /// the engine and the history as they were before the gesture.
    pub fn abandon(
        &mut self,
        timeline: &mut Timeline,
        log: &mut UndoableActionLog,
        observer: &mut TimelineLogObserver,
    ) -> Result<(), GestureError> {
        if self.state != GestureState::Active {
            return Err(GestureError::AlreadyEnded);
        }
        observer.sync(timeline, log)?;
        if self.began {
            observer.set_mode(ObserverMode::Replaying);
            let rolled_back = log.rollback(timeline);
            let synced = observer.sync(timeline, log);
            observer.set_mode(ObserverMode::Normal);
            rolled_back?;
            synced?;
        }
        self.snap = None;
        self.state = GestureState::Abandoned;
        Ok(())
    }
}
