use uuid::Uuid;

use crate::event::TimelineEvent;

pub const MIN_CLIP_DURATION_NS: u64 = 1_000_000;
pub const DEFAULT_SNAP_DISTANCE_NS: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClipId(Uuid);

impl ClipId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClipId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(Uuid);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(Uuid);

impl EffectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyframeId(Uuid);

impl KeyframeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for KeyframeId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipProperty {
    Start,
    Duration,
    InPoint,
    Priority,
    Selected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    Time(u64),
    Priority(u32),
    Flag(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeMode {
    Linear,
    Cubic,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    pub id: KeyframeId,
    pub time: u64,
    pub value: f64,
    pub mode: KeyframeMode,
}

impl Keyframe {
    pub fn new(time: u64, value: f64, mode: KeyframeMode) -> Self {
        Self {
            id: KeyframeId::new(),
            time,
            value,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub id: EffectId,
    pub name: String,
    pub active: bool,
}

impl Effect {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EffectId::new(),
            name: name.into(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackElement {
    pub id: ElementId,
    pub kind: TrackKind,
    pub active: bool,
    pub effects: Vec<Effect>,
    pub keyframes: Vec<Keyframe>,
}

impl TrackElement {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: ElementId::new(),
            kind,
            active: true,
            effects: Vec::new(),
            keyframes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub id: ClipId,
    pub name: String,
    pub start: u64,
    pub duration: u64,
    pub in_point: u64,
    pub max_duration: Option<u64>,
    pub selected: bool,
    pub elements: Vec<TrackElement>,
    pub linked: Vec<ClipId>,
}

impl Clip {
    pub fn new(name: impl Into<String>, start: u64, duration: u64) -> Self {
        Self {
            id: ClipId::new(),
            name: name.into(),
            start,
            duration,
            in_point: 0,
            max_duration: None,
            selected: false,
            elements: Vec::new(),
            linked: Vec::new(),
        }
    }

    pub fn with_element(mut self, kind: TrackKind) -> Self {
        self.elements.push(TrackElement::new(kind));
        self
    }

    pub fn end(&self) -> u64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub priority: u32,
    pub clips: Vec<Clip>,
}

impl Layer {
    fn new(priority: u32) -> Self {
        Self {
            id: LayerId::new(),
            priority,
            clips: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    Normal,
    Trim,
    Ripple,
    Roll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditEdge {
    None,
    Start,
    End,
}

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("no such clip")]
    NoSuchClip,
    #[error("no such layer priority {0}")]
    NoSuchLayer(u32),
    #[error("no such track element")]
    NoSuchElement,
    #[error("no such effect")]
    NoSuchEffect,
    #[error("no such keyframe")]
    NoSuchKeyframe,
    #[error("layer still holds clips")]
    LayerNotEmpty,
    #[error("edit mode {0:?} needs an edge")]
    InvalidEdge(EditMode),
    #[error("property value type mismatch")]
    PropertyMismatch,
}

/// The timeline engine the undo subsystem observes and commands.
///
/// Every mutation appends exactly one [`TimelineEvent`] to an internal
/// queue, in mutation order. The host drains the queue with
/// [`Timeline::drain_events`] and feeds it to the log observer; nothing
/// here calls back into the observer, so the borrow flow stays one-way.
#[derive(Debug, Default)]
pub struct Timeline {
    layers: Vec<Layer>,
    events: Vec<TimelineEvent>,
    snap_distance: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            events: Vec::new(),
            snap_distance: DEFAULT_SNAP_DISTANCE_NS,
        }
    }

    pub fn set_snap_distance(&mut self, ns: u64) {
        self.snap_distance = ns;
    }

    pub fn snap_distance(&self) -> u64 {
        self.snap_distance
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn drain_events(&mut self) -> Vec<TimelineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn duration(&self) -> u64 {
        self.layers
            .iter()
            .flat_map(|l| l.clips.iter())
            .map(Clip::end)
            .max()
            .unwrap_or(0)
    }

    /// Inserts a layer at `priority`; layers at or below slide down.
    pub fn add_layer(&mut self, priority: u32) -> LayerId {
        let index = (priority as usize).min(self.layers.len());
        let layer = Layer::new(priority);
        let id = layer.id;
        self.layers.insert(index, layer);
        self.renumber_layers();
        self.events.push(TimelineEvent::LayerAdded {
            layer: id,
            priority: index as u32,
        });
        id
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Result<(), EditError> {
        let index = self
            .layers
            .iter()
            .position(|l| l.id == id)
            .ok_or(EditError::NoSuchLayer(u32::MAX))?;
        if !self.layers[index].clips.is_empty() {
            return Err(EditError::LayerNotEmpty);
        }
        let layer = self.layers.remove(index);
        self.renumber_layers();
        self.events.push(TimelineEvent::LayerRemoved {
            layer: layer.id,
            priority: index as u32,
        });
        Ok(())
    }

    fn renumber_layers(&mut self) {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.priority = i as u32;
        }
    }

    pub fn find_clip(&self, id: ClipId) -> Option<&Clip> {
        self.layers
            .iter()
            .flat_map(|l| l.clips.iter())
            .find(|c| c.id == id)
    }

    fn find_clip_mut(&mut self, id: ClipId) -> Option<&mut Clip> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.clips.iter_mut())
            .find(|c| c.id == id)
    }

    pub fn clip_priority(&self, id: ClipId) -> Option<u32> {
        self.layers
            .iter()
            .find(|l| l.clips.iter().any(|c| c.id == id))
            .map(|l| l.priority)
    }

    pub fn layer_priority(&self, id: LayerId) -> Option<u32> {
        self.layers.iter().find(|l| l.id == id).map(|l| l.priority)
    }

    pub fn clip_layer(&self, id: ClipId) -> Option<LayerId> {
        self.layers
            .iter()
            .find(|l| l.clips.iter().any(|c| c.id == id))
            .map(|l| l.id)
    }

    /// Places a detached clip on the layer with the given priority.
    pub fn add_clip(&mut self, priority: u32, clip: Clip) -> Result<ClipId, EditError> {
        let layer_id = self
            .layers
            .get(priority as usize)
            .ok_or(EditError::NoSuchLayer(priority))?
            .id;
        let id = clip.id;
        self.insert_clip(layer_id, clip)?;
        Ok(id)
    }

    /// Re-attaches a clip snapshot to a specific layer. Used by the undo
    /// actions, which address layers by identity rather than priority.
    pub fn insert_clip(&mut self, layer: LayerId, clip: Clip) -> Result<(), EditError> {
        let slot = self
            .layers
            .iter_mut()
            .find(|l| l.id == layer)
            .ok_or(EditError::NoSuchLayer(u32::MAX))?;
        let snapshot = clip.clone();
        slot.clips.push(clip);
        self.events.push(TimelineEvent::ClipAdded {
            layer,
            clip: snapshot,
        });
        Ok(())
    }

    /// Detaches a clip, returning its full state as captured at removal.
    pub fn remove_clip(&mut self, id: ClipId) -> Result<Clip, EditError> {
        for layer in &mut self.layers {
            if let Some(index) = layer.clips.iter().position(|c| c.id == id) {
                let clip = layer.clips.remove(index);
                self.events.push(TimelineEvent::ClipRemoved {
                    layer: layer.id,
                    clip: clip.clone(),
                });
                return Ok(clip);
            }
        }
        Err(EditError::NoSuchClip)
    }

    pub fn set_start(&mut self, id: ClipId, start: u64) -> Result<(), EditError> {
        let clip = self.find_clip_mut(id).ok_or(EditError::NoSuchClip)?;
        if clip.start == start {
            return Ok(());
        }
        clip.start = start;
        self.events.push(TimelineEvent::PropertyChanged {
            clip: id,
            property: ClipProperty::Start,
            value: PropertyValue::Time(start),
        });
        Ok(())
    }

    pub fn set_duration(&mut self, id: ClipId, duration: u64) -> Result<(), EditError> {
        let clip = self.find_clip_mut(id).ok_or(EditError::NoSuchClip)?;
        if clip.duration == duration {
            return Ok(());
        }
        clip.duration = duration;
        self.events.push(TimelineEvent::PropertyChanged {
            clip: id,
            property: ClipProperty::Duration,
            value: PropertyValue::Time(duration),
        });
        Ok(())
    }

    pub fn set_in_point(&mut self, id: ClipId, in_point: u64) -> Result<(), EditError> {
        let clip = self.find_clip_mut(id).ok_or(EditError::NoSuchClip)?;
        if clip.in_point == in_point {
            return Ok(());
        }
        clip.in_point = in_point;
        self.events.push(TimelineEvent::PropertyChanged {
            clip: id,
            property: ClipProperty::InPoint,
            value: PropertyValue::Time(in_point),
        });
        Ok(())
    }

    pub fn set_selected(&mut self, id: ClipId, selected: bool) -> Result<(), EditError> {
        let clip = self.find_clip_mut(id).ok_or(EditError::NoSuchClip)?;
        if clip.selected == selected {
            return Ok(());
        }
        clip.selected = selected;
        self.events.push(TimelineEvent::PropertyChanged {
            clip: id,
            property: ClipProperty::Selected,
            value: PropertyValue::Flag(selected),
        });
        Ok(())
    }

    /// Moves a clip to the layer with the given priority.
    pub fn set_clip_priority(&mut self, id: ClipId, priority: u32) -> Result<(), EditError> {
        let current = self.clip_priority(id).ok_or(EditError::NoSuchClip)?;
        if current == priority {
            return Ok(());
        }
        if (priority as usize) >= self.layers.len() {
            return Err(EditError::NoSuchLayer(priority));
        }
        let clip = {
            let source = &mut self.layers[current as usize];
            let index = source
                .clips
                .iter()
                .position(|c| c.id == id)
                .ok_or(EditError::NoSuchClip)?;
            source.clips.remove(index)
        };
        self.layers[priority as usize].clips.push(clip);
        self.events.push(TimelineEvent::PropertyChanged {
            clip: id,
            property: ClipProperty::Priority,
            value: PropertyValue::Priority(priority),
        });
        Ok(())
    }

    /// Single dispatch point for the undo actions.
    pub fn set_property(
        &mut self,
        id: ClipId,
        property: ClipProperty,
        value: PropertyValue,
    ) -> Result<(), EditError> {
        match (property, value) {
            (ClipProperty::Start, PropertyValue::Time(t)) => self.set_start(id, t),
            (ClipProperty::Duration, PropertyValue::Time(t)) => self.set_duration(id, t),
            (ClipProperty::InPoint, PropertyValue::Time(t)) => self.set_in_point(id, t),
            (ClipProperty::Priority, PropertyValue::Priority(p)) => self.set_clip_priority(id, p),
            (ClipProperty::Selected, PropertyValue::Flag(f)) => self.set_selected(id, f),
            _ => Err(EditError::PropertyMismatch),
        }
    }

    pub fn property(&self, id: ClipId, property: ClipProperty) -> Option<PropertyValue> {
        let clip = self.find_clip(id)?;
        Some(match property {
            ClipProperty::Start => PropertyValue::Time(clip.start),
            ClipProperty::Duration => PropertyValue::Time(clip.duration),
            ClipProperty::InPoint => PropertyValue::Time(clip.in_point),
            ClipProperty::Priority => PropertyValue::Priority(self.clip_priority(id)?),
            ClipProperty::Selected => PropertyValue::Flag(clip.selected),
        })
    }

    fn find_element_mut(&mut self, id: ElementId) -> Option<(ClipId, &mut TrackElement)> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.clips.iter_mut())
            .find_map(|c| {
                let clip_id = c.id;
                c.elements
                    .iter_mut()
                    .find(|e| e.id == id)
                    .map(|e| (clip_id, e))
            })
    }

    pub fn find_element(&self, id: ElementId) -> Option<&TrackElement> {
        self.layers
            .iter()
            .flat_map(|l| l.clips.iter())
            .flat_map(|c| c.elements.iter())
            .find(|e| e.id == id)
    }

    pub fn add_effect(&mut self, element: ElementId, effect: Effect) -> Result<(), EditError> {
        let (clip, slot) = self.find_element_mut(element).ok_or(EditError::NoSuchElement)?;
        let snapshot = effect.clone();
        slot.effects.push(effect);
        self.events.push(TimelineEvent::EffectAdded {
            clip,
            element,
            effect: snapshot,
        });
        Ok(())
    }

    pub fn remove_effect(&mut self, id: EffectId) -> Result<Effect, EditError> {
        for layer in &mut self.layers {
            for clip in &mut layer.clips {
                for element in &mut clip.elements {
                    if let Some(index) = element.effects.iter().position(|e| e.id == id) {
                        let effect = element.effects.remove(index);
                        self.events.push(TimelineEvent::EffectRemoved {
                            clip: clip.id,
                            element: element.id,
                            effect: effect.clone(),
                        });
                        return Ok(effect);
                    }
                }
            }
        }
        Err(EditError::NoSuchEffect)
    }

    pub fn set_effect_active(&mut self, id: EffectId, active: bool) -> Result<(), EditError> {
        for layer in &mut self.layers {
            for clip in &mut layer.clips {
                for element in &mut clip.elements {
                    if let Some(effect) = element.effects.iter_mut().find(|e| e.id == id) {
                        if effect.active == active {
                            return Ok(());
                        }
                        effect.active = active;
                        self.events.push(TimelineEvent::EffectActiveChanged {
                            effect: id,
                            active,
                        });
                        return Ok(());
                    }
                }
            }
        }
        Err(EditError::NoSuchEffect)
    }

    pub fn add_keyframe(&mut self, element: ElementId, keyframe: Keyframe) -> Result<(), EditError> {
        let (_, slot) = self.find_element_mut(element).ok_or(EditError::NoSuchElement)?;
        slot.keyframes.push(keyframe);
        self.events.push(TimelineEvent::KeyframeAdded { element, keyframe });
        Ok(())
    }

    pub fn remove_keyframe(
        &mut self,
        element: ElementId,
        id: KeyframeId,
    ) -> Result<Keyframe, EditError> {
        let (_, slot) = self.find_element_mut(element).ok_or(EditError::NoSuchElement)?;
        let index = slot
            .keyframes
            .iter()
            .position(|k| k.id == id)
            .ok_or(EditError::NoSuchKeyframe)?;
        let keyframe = slot.keyframes.remove(index);
        self.events.push(TimelineEvent::KeyframeRemoved { element, keyframe });
        Ok(keyframe)
    }

    pub fn move_keyframe(
        &mut self,
        element: ElementId,
        id: KeyframeId,
        time: u64,
        value: f64,
    ) -> Result<(), EditError> {
        let (_, slot) = self.find_element_mut(element).ok_or(EditError::NoSuchElement)?;
        let keyframe = slot
            .keyframes
            .iter_mut()
            .find(|k| k.id == id)
            .ok_or(EditError::NoSuchKeyframe)?;
        if keyframe.time == time && keyframe.value == value {
            return Ok(());
        }
        keyframe.time = time;
        keyframe.value = value;
        let keyframe = *keyframe;
        self.events.push(TimelineEvent::KeyframeMoved { element, keyframe });
        Ok(())
    }

    /// Nearest clip edge within the snap distance, ignoring `exclude`.
    pub fn snap(&self, position: u64, exclude: &[ClipId]) -> Option<u64> {
        let mut best: Option<(u64, u64)> = None;
        for layer in &self.layers {
            for clip in &layer.clips {
                if exclude.contains(&clip.id) {
                    continue;
                }
                for edge in [clip.start, clip.end()] {
                    let distance = edge.abs_diff(position);
                    if distance <= self.snap_distance
                        && best.map_or(true, |(_, d)| distance < d)
                    {
                        best = Some((edge, distance));
                    }
                }
            }
        }
        best.map(|(edge, _)| edge)
    }

    /// Applies one edit step against the live model.
    ///
    /// The affected clips all reach their final values inside this call,
    /// so observers only ever see the completed step. Ripple shifts every
    /// downstream clip on the clip's layer by the same delta; roll adjusts
    /// the adjacent clip's opposite edge to preserve combined duration.
    pub fn edit(
        &mut self,
        id: ClipId,
        mode: EditMode,
        edge: EditEdge,
        position: u64,
        layer_priority: u32,
    ) -> Result<(), EditError> {
        if (layer_priority as usize) >= self.layers.len() {
            return Err(EditError::NoSuchLayer(layer_priority));
        }
        self.find_clip(id).ok_or(EditError::NoSuchClip)?;

        tracing::trace!(?mode, ?edge, position, layer_priority, "edit step");
        match (mode, edge) {
            (EditMode::Normal, _) => {
                self.move_clip(id, position)?;
                let current = self.clip_priority(id).ok_or(EditError::NoSuchClip)?;
                if current != layer_priority {
                    self.set_clip_priority(id, layer_priority)?;
                }
                Ok(())
            }
            (EditMode::Trim, EditEdge::Start) => self.trim_start(id, position),
            (EditMode::Trim, EditEdge::End) => self.trim_end(id, position),
            (EditMode::Trim, EditEdge::None) => Err(EditError::InvalidEdge(mode)),
            (EditMode::Ripple, EditEdge::None) => self.ripple_move(id, position),
            (EditMode::Ripple, EditEdge::Start) => self.ripple_trim_start(id, position),
            (EditMode::Ripple, EditEdge::End) => self.ripple_trim_end(id, position),
            (EditMode::Roll, EditEdge::Start) => self.roll_start(id, position),
            (EditMode::Roll, EditEdge::End) => self.roll_end(id, position),
            (EditMode::Roll, EditEdge::None) => Err(EditError::InvalidEdge(mode)),
        }
    }

    fn move_clip(&mut self, id: ClipId, position: u64) -> Result<(), EditError> {
        let clip = self.find_clip(id).ok_or(EditError::NoSuchClip)?;
        let mut members = vec![id];
        for linked in &clip.linked {
            if self.find_clip(*linked).is_some() && !members.contains(linked) {
                members.push(*linked);
            }
        }
        let mut delta = position as i128 - clip.start as i128;
        for member in &members {
            let start = self.find_clip(*member).map(|c| c.start).unwrap_or(0);
            delta = delta.max(-(start as i128));
        }
        for member in members {
            let start = self.find_clip(member).map(|c| c.start).unwrap_or(0);
            self.set_start(member, (start as i128 + delta) as u64)?;
        }
        Ok(())
    }

    fn trim_start(&mut self, id: ClipId, position: u64) -> Result<(), EditError> {
        let clip = self.find_clip(id).ok_or(EditError::NoSuchClip)?;
        let (start, duration, in_point) = (clip.start, clip.duration, clip.in_point);
        let mut delta = position as i128 - start as i128;
        // min then max, so the lower bound wins if they ever cross.
        delta = delta
            .min(duration as i128 - MIN_CLIP_DURATION_NS as i128)
            .max(-(in_point.min(start) as i128));
        self.set_start(id, (start as i128 + delta) as u64)?;
        self.set_in_point(id, (in_point as i128 + delta) as u64)?;
        self.set_duration(id, (duration as i128 - delta).max(0) as u64)?;
        Ok(())
    }

    fn trim_end(&mut self, id: ClipId, position: u64) -> Result<(), EditError> {
        let clip = self.find_clip(id).ok_or(EditError::NoSuchClip)?;
        let (start, in_point, max) = (clip.start, clip.in_point, clip.max_duration);
        let mut duration = position.saturating_sub(start).max(MIN_CLIP_DURATION_NS);
        if let Some(max) = max {
            duration = duration.min(max.saturating_sub(in_point).max(MIN_CLIP_DURATION_NS));
        }
        self.set_duration(id, duration)
    }

    fn downstream_on_same_layer(&self, id: ClipId) -> Vec<ClipId> {
        let Some(priority) = self.clip_priority(id) else {
            return Vec::new();
        };
        let Some(clip) = self.find_clip(id) else {
            return Vec::new();
        };
        self.layers[priority as usize]
            .clips
            .iter()
            .filter(|c| c.id != id && c.start >= clip.start)
            .map(|c| c.id)
            .collect()
    }

    fn shift_clips(&mut self, ids: &[ClipId], delta: i128) -> Result<(), EditError> {
        for id in ids {
            let start = self.find_clip(*id).ok_or(EditError::NoSuchClip)?.start;
            self.set_start(*id, (start as i128 + delta).max(0) as u64)?;
        }
        Ok(())
    }

    fn ripple_move(&mut self, id: ClipId, position: u64) -> Result<(), EditError> {
        let clip = self.find_clip(id).ok_or(EditError::NoSuchClip)?;
        let start = clip.start;
        let downstream = self.downstream_on_same_layer(id);
        let mut delta = position as i128 - start as i128;
        let mut min_start = start;
        for other in &downstream {
            if let Some(c) = self.find_clip(*other) {
                min_start = min_start.min(c.start);
            }
        }
        delta = delta.max(-(min_start as i128));
        self.set_start(id, (start as i128 + delta) as u64)?;
        self.shift_clips(&downstream, delta)
    }

    /// Consumes head material while the clip's start stays anchored, so
    /// downstream clips follow the moving end edge.
    fn ripple_trim_start(&mut self, id: ClipId, position: u64) -> Result<(), EditError> {
        let clip = self.find_clip(id).ok_or(EditError::NoSuchClip)?;
        let (start, duration, in_point) = (clip.start, clip.duration, clip.in_point);
        let mut delta = position as i128 - start as i128;
        delta = delta
            .min(duration as i128 - MIN_CLIP_DURATION_NS as i128)
            .max(-(in_point as i128));
        let downstream = self.downstream_on_same_layer(id);
        self.set_in_point(id, (in_point as i128 + delta) as u64)?;
        self.set_duration(id, (duration as i128 - delta).max(0) as u64)?;
        self.shift_clips(&downstream, -delta)
    }

    fn ripple_trim_end(&mut self, id: ClipId, position: u64) -> Result<(), EditError> {
        let before = self.find_clip(id).ok_or(EditError::NoSuchClip)?.duration;
        let downstream = self.downstream_on_same_layer(id);
        self.trim_end(id, position)?;
        let after = self.find_clip(id).ok_or(EditError::NoSuchClip)?.duration;
        let delta = after as i128 - before as i128;
        self.shift_clips(&downstream, delta)
    }

    fn adjacent_before(&self, id: ClipId) -> Option<ClipId> {
        let priority = self.clip_priority(id)?;
        let clip = self.find_clip(id)?;
        self.layers[priority as usize]
            .clips
            .iter()
            .find(|c| c.id != id && c.end() == clip.start)
            .map(|c| c.id)
    }

    fn adjacent_after(&self, id: ClipId) -> Option<ClipId> {
        let priority = self.clip_priority(id)?;
        let clip = self.find_clip(id)?;
        self.layers[priority as usize]
            .clips
            .iter()
            .find(|c| c.id != id && c.start == clip.end())
            .map(|c| c.id)
    }

    fn roll_start(&mut self, id: ClipId, position: u64) -> Result<(), EditError> {
        let Some(neighbour_id) = self.adjacent_before(id) else {
            return self.trim_start(id, position);
        };
        let clip = self.find_clip(id).ok_or(EditError::NoSuchClip)?;
        let (start, duration, in_point) = (clip.start, clip.duration, clip.in_point);
        let neighbour = self.find_clip(neighbour_id).ok_or(EditError::NoSuchClip)?;
        let (n_duration, n_in_point, n_max) = (
            neighbour.duration,
            neighbour.in_point,
            neighbour.max_duration,
        );

        let mut delta = position as i128 - start as i128;
        delta = delta
            .min(duration as i128 - MIN_CLIP_DURATION_NS as i128)
            .max(MIN_CLIP_DURATION_NS as i128 - n_duration as i128)
            .max(-(in_point as i128));
        if let Some(max) = n_max {
            let headroom = max as i128 - n_in_point as i128 - n_duration as i128;
            delta = delta.min(headroom.max(0));
        }

        self.set_start(id, (start as i128 + delta) as u64)?;
        self.set_in_point(id, (in_point as i128 + delta) as u64)?;
        self.set_duration(id, (duration as i128 - delta).max(0) as u64)?;
        self.set_duration(neighbour_id, (n_duration as i128 + delta) as u64)?;
        Ok(())
    }

    fn roll_end(&mut self, id: ClipId, position: u64) -> Result<(), EditError> {
        let Some(neighbour_id) = self.adjacent_after(id) else {
            return self.trim_end(id, position);
        };
        let clip = self.find_clip(id).ok_or(EditError::NoSuchClip)?;
        let (start, duration, in_point, max) =
            (clip.start, clip.duration, clip.in_point, clip.max_duration);
        let neighbour = self.find_clip(neighbour_id).ok_or(EditError::NoSuchClip)?;
        let (n_start, n_duration, n_in_point) =
            (neighbour.start, neighbour.duration, neighbour.in_point);

        let mut delta = position as i128 - (start + duration) as i128;
        delta = delta
            .min(n_duration as i128 - MIN_CLIP_DURATION_NS as i128)
            .max(MIN_CLIP_DURATION_NS as i128 - duration as i128)
            .max(-(n_in_point as i128));
        if let Some(max) = max {
            let headroom = max as i128 - in_point as i128 - duration as i128;
            delta = delta.min(headroom.max(0));
        }

        self.set_duration(id, (duration as i128 + delta) as u64)?;
        self.set_start(neighbour_id, (n_start as i128 + delta).max(0) as u64)?;
        self.set_in_point(neighbour_id, (n_in_point as i128 + delta) as u64)?;
        self.set_duration(neighbour_id, (n_duration as i128 - delta).max(0) as u64)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline_with_layer() -> Timeline {
        let mut t = Timeline::new();
        t.add_layer(0);
        t.drain_events();
        t
    }

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn add_and_remove_clip_round_trip() {
        let mut t = timeline_with_layer();
        let clip = Clip::new("a", 0, 2 * SEC).with_element(TrackKind::Video);
        let id = t.add_clip(0, clip).unwrap();
        assert!(t.find_clip(id).is_some());

        let removed = t.remove_clip(id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(removed.elements.len(), 1);
        assert!(t.find_clip(id).is_none());
    }

    #[test]
    fn events_arrive_in_mutation_order() {
        let mut t = timeline_with_layer();
        let id = t.add_clip(0, Clip::new("a", 0, SEC)).unwrap();
        t.set_start(id, SEC).unwrap();
        t.set_duration(id, 2 * SEC).unwrap();

        let events = t.drain_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TimelineEvent::ClipAdded { .. }));
        assert!(matches!(
            events[1],
            TimelineEvent::PropertyChanged {
                property: ClipProperty::Start,
                ..
            }
        ));
        assert!(matches!(
            events[2],
            TimelineEvent::PropertyChanged {
                property: ClipProperty::Duration,
                ..
            }
        ));
        assert!(t.drain_events().is_empty());
    }

    #[test]
    fn setting_same_value_emits_nothing() {
        let mut t = timeline_with_layer();
        let id = t.add_clip(0, Clip::new("a", SEC, SEC)).unwrap();
        t.drain_events();
        t.set_start(id, SEC).unwrap();
        assert!(t.drain_events().is_empty());
    }

    #[test]
    fn trim_start_adjusts_in_point_and_never_inverts() {
        let mut t = timeline_with_layer();
        let mut clip = Clip::new("a", 2 * SEC, 4 * SEC);
        clip.in_point = SEC;
        let id = t.add_clip(0, clip).unwrap();

        t.edit(id, EditMode::Trim, EditEdge::Start, 3 * SEC, 0).unwrap();
        let c = t.find_clip(id).unwrap();
        assert_eq!(c.start, 3 * SEC);
        assert_eq!(c.in_point, 2 * SEC);
        assert_eq!(c.duration, 3 * SEC);

        // Dragging far past the end clamps at the minimum duration.
        t.edit(id, EditMode::Trim, EditEdge::Start, 20 * SEC, 0).unwrap();
        let c = t.find_clip(id).unwrap();
        assert_eq!(c.duration, MIN_CLIP_DURATION_NS);

        // Dragging left never pulls the in-point below zero.
        t.edit(id, EditMode::Trim, EditEdge::Start, 0, 0).unwrap();
        let c = t.find_clip(id).unwrap();
        assert_eq!(c.in_point, 0);
    }

    #[test]
    fn trim_end_respects_source_length() {
        let mut t = timeline_with_layer();
        let mut clip = Clip::new("a", 0, 2 * SEC);
        clip.max_duration = Some(3 * SEC);
        let id = t.add_clip(0, clip).unwrap();

        t.edit(id, EditMode::Trim, EditEdge::End, 10 * SEC, 0).unwrap();
        assert_eq!(t.find_clip(id).unwrap().duration, 3 * SEC);

        t.edit(id, EditMode::Trim, EditEdge::End, 0, 0).unwrap();
        assert_eq!(t.find_clip(id).unwrap().duration, MIN_CLIP_DURATION_NS);
    }

    #[test]
    fn ripple_move_shifts_downstream_preserving_adjacency() {
        let mut t = timeline_with_layer();
        let a = t.add_clip(0, Clip::new("a", 0, SEC)).unwrap();
        let b = t.add_clip(0, Clip::new("b", SEC, SEC)).unwrap();
        let c = t.add_clip(0, Clip::new("c", 2 * SEC, SEC)).unwrap();

        t.edit(a, EditMode::Ripple, EditEdge::None, 3 * SEC, 0).unwrap();
        assert_eq!(t.find_clip(a).unwrap().start, 3 * SEC);
        assert_eq!(t.find_clip(b).unwrap().start, 4 * SEC);
        assert_eq!(t.find_clip(c).unwrap().start, 5 * SEC);
        assert_eq!(t.find_clip(a).unwrap().end(), t.find_clip(b).unwrap().start);
        assert_eq!(t.find_clip(b).unwrap().end(), t.find_clip(c).unwrap().start);
    }

    #[test]
    fn ripple_trim_end_keeps_downstream_attached() {
        let mut t = timeline_with_layer();
        let a = t.add_clip(0, Clip::new("a", 0, 2 * SEC)).unwrap();
        let b = t.add_clip(0, Clip::new("b", 2 * SEC, SEC)).unwrap();

        t.edit(a, EditMode::Ripple, EditEdge::End, SEC, 0).unwrap();
        assert_eq!(t.find_clip(a).unwrap().duration, SEC);
        assert_eq!(t.find_clip(b).unwrap().start, SEC);
    }

    #[test]
    fn roll_preserves_combined_duration() {
        let mut t = timeline_with_layer();
        let mut left = Clip::new("left", 0, 2 * SEC);
        left.max_duration = Some(10 * SEC);
        let a = t.add_clip(0, left).unwrap();
        let mut right = Clip::new("right", 2 * SEC, 2 * SEC);
        right.in_point = SEC;
        let b = t.add_clip(0, right).unwrap();

        t.edit(b, EditMode::Roll, EditEdge::Start, 3 * SEC, 0).unwrap();
        let left = t.find_clip(a).unwrap();
        let right = t.find_clip(b).unwrap();
        assert_eq!(left.duration, 3 * SEC);
        assert_eq!(right.start, 3 * SEC);
        assert_eq!(right.duration, SEC);
        assert_eq!(right.in_point, 2 * SEC);
        assert_eq!(left.duration + right.duration, 4 * SEC);
    }

    #[test]
    fn normal_move_carries_linked_clips() {
        let mut t = timeline_with_layer();
        t.add_layer(1);
        t.drain_events();
        let video = Clip::new("v", SEC, SEC);
        let audio = Clip::new("a", SEC, SEC);
        let (vid, aid) = (video.id, audio.id);
        let mut video = video;
        video.linked = vec![aid];
        let mut audio = audio;
        audio.linked = vec![vid];
        t.add_clip(0, video).unwrap();
        t.add_clip(1, audio).unwrap();

        t.edit(vid, EditMode::Normal, EditEdge::None, 4 * SEC, 0).unwrap();
        assert_eq!(t.find_clip(vid).unwrap().start, 4 * SEC);
        assert_eq!(t.find_clip(aid).unwrap().start, 4 * SEC);

        // Moving toward zero clamps the delta for the whole group.
        t.edit(vid, EditMode::Normal, EditEdge::None, 0, 0).unwrap();
        assert_eq!(t.find_clip(vid).unwrap().start, 0);
        assert_eq!(t.find_clip(aid).unwrap().start, 0);
    }

    #[test]
    fn snap_finds_nearest_edge_within_distance() {
        let mut t = timeline_with_layer();
        t.set_snap_distance(SEC / 10);
        let a = t.add_clip(0, Clip::new("a", 0, SEC)).unwrap();
        t.add_clip(0, Clip::new("b", 5 * SEC, SEC)).unwrap();

        assert_eq!(t.snap(SEC + SEC / 20, &[]), Some(SEC));
        assert_eq!(t.snap(3 * SEC, &[]), None);
        assert_eq!(t.snap(SEC + SEC / 20, &[a]), None);
        assert_eq!(t.snap(5 * SEC - SEC / 20, &[a]), Some(5 * SEC));
    }

    #[test]
    fn moving_to_another_layer_changes_priority() {
        let mut t = timeline_with_layer();
        t.add_layer(1);
        let id = t.add_clip(0, Clip::new("a", 0, SEC)).unwrap();
        t.drain_events();

        t.edit(id, EditMode::Normal, EditEdge::None, 0, 1).unwrap();
        assert_eq!(t.clip_priority(id), Some(1));
        let events = t.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            TimelineEvent::PropertyChanged {
                property: ClipProperty::Priority,
                value: PropertyValue::Priority(1),
                ..
            }
        )));
    }

    #[test]
    fn edit_to_missing_layer_is_rejected_untouched() {
        let mut t = timeline_with_layer();
        let id = t.add_clip(0, Clip::new("a", SEC, SEC)).unwrap();
        t.drain_events();

        assert!(t.edit(id, EditMode::Normal, EditEdge::None, 0, 7).is_err());
        assert_eq!(t.find_clip(id).unwrap().start, SEC);
        assert!(t.drain_events().is_empty());
    }
}
