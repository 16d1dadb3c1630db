use crate::timeline::{
    Clip, ClipId, ClipProperty, Effect, EffectId, ElementId, Keyframe, LayerId, PropertyValue,
};

/// Mutation notifications emitted by [`crate::timeline::Timeline`].
///
/// Property notifications carry only the new value; the property change
/// trackers supply the old one from their snapshots. Structural
/// notifications carry full detached copies captured at mutation time, so
/// an undo action never has to read back the live model later.
#[derive(Debug, Clone)]
pub enum TimelineEvent {
    LayerAdded {
        layer: LayerId,
        priority: u32,
    },
    LayerRemoved {
        layer: LayerId,
        priority: u32,
    },
    ClipAdded {
        layer: LayerId,
        clip: Clip,
    },
    ClipRemoved {
        layer: LayerId,
        clip: Clip,
    },
    PropertyChanged {
        clip: ClipId,
        property: ClipProperty,
        value: PropertyValue,
    },
    EffectAdded {
        clip: ClipId,
        element: ElementId,
        effect: Effect,
    },
    EffectRemoved {
        clip: ClipId,
        element: ElementId,
        effect: Effect,
    },
    EffectActiveChanged {
        effect: EffectId,
        active: bool,
    },
    KeyframeAdded {
        element: ElementId,
        keyframe: Keyframe,
    },
    KeyframeRemoved {
        element: ElementId,
        keyframe: Keyframe,
    },
    KeyframeMoved {
        element: ElementId,
        keyframe: Keyframe,
    },
}
