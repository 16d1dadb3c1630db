use std::sync::mpsc;

use slate_media::{
    Asset, AudioPreviewer, PreviewGeneratorManager, PreviewMessage, TrackType, VideoPreviewer,
};
use slate_state::editing::{layer_at_y, EditingContext, GestureError};
use slate_state::timeline::{ClipId, EditEdge, EditError, EditMode, Timeline};
use slate_state::undo::{
    ActionLogEvent, ObserverMode, TimelineLogObserver, UndoError, UndoableActionLog,
};

use crate::preview_store::PreviewStore;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no active gesture")]
    NoGesture,
    #[error("a gesture is already active")]
    GestureActive,
    #[error(transparent)]
    Gesture(#[from] GestureError),
    #[error(transparent)]
    Undo(#[from] UndoError),
    #[error(transparent)]
    Edit(#[from] EditError),
}

/// Owns the timeline, its undo machinery and the preview subsystem, and
/// keeps them consistent: every mutation flows through here so the
/// observer sees each event exactly once, and replays happen with the
/// observer switched into replaying mode.
pub struct EditorSession {
    timeline: Timeline,
    log: UndoableActionLog,
    observer: TimelineLogObserver,
    manager: PreviewGeneratorManager,
    preview_tx: mpsc::Sender<PreviewMessage>,
    preview_rx: mpsc::Receiver<PreviewMessage>,
    pub previews: PreviewStore,
    gesture: Option<EditingContext>,
    undo_enabled: bool,
    redo_enabled: bool,
}

impl EditorSession {
    pub fn new() -> Self {
        Self::with_timeline(Timeline::new())
    }

    pub fn with_timeline(timeline: Timeline) -> Self {
        let mut timeline = timeline;
        timeline.drain_events();
        let mut observer = TimelineLogObserver::new();
        observer.start_observing(&timeline);
        let (preview_tx, preview_rx) = mpsc::channel();
        Self {
            timeline,
            log: UndoableActionLog::new(),
            observer,
            manager: PreviewGeneratorManager::new(),
            preview_tx,
            preview_rx,
            previews: PreviewStore::default(),
            gesture: None,
            undo_enabled: false,
            redo_enabled: false,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Runs one undoable transaction against the timeline.
    pub fn record<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Timeline) -> Result<R, EditError>,
    ) -> Result<R, SessionError> {
        self.log.begin(name);
        let out = match f(&mut self.timeline) {
            Ok(out) => out,
            Err(err) => {
                // Revert whatever part of the transaction already landed
                // rather than committing a half-applied operation.
                self.observer.sync(&mut self.timeline, &mut self.log)?;
                self.observer.set_mode(ObserverMode::Replaying);
                let rolled_back = self.log.rollback(&mut self.timeline);
                let synced = self.observer.sync(&mut self.timeline, &mut self.log);
                self.observer.set_mode(ObserverMode::Normal);
                rolled_back?;
                synced?;
                self.refresh_affordances();
                return Err(err.into());
            }
        };
        self.observer.sync(&mut self.timeline, &mut self.log)?;
        self.log.commit()?;
        self.refresh_affordances();
        Ok(out)
    }

    pub fn undo(&mut self) -> Result<bool, SessionError> {
        if self.gesture.is_some() {
            return Err(SessionError::GestureActive);
        }
        let undone = self.replay(|log, timeline| log.undo(timeline))?;
        self.refresh_affordances();
        Ok(undone)
    }

    pub fn redo(&mut self) -> Result<bool, SessionError> {
        if self.gesture.is_some() {
            return Err(SessionError::GestureActive);
        }
        let redone = self.replay(|log, timeline| log.redo(timeline))?;
        self.refresh_affordances();
        Ok(redone)
    }

    fn replay(
        &mut self,
        f: impl FnOnce(&mut UndoableActionLog, &mut Timeline) -> Result<bool, UndoError>,
    ) -> Result<bool, SessionError> {
        self.observer.set_mode(ObserverMode::Replaying);
        let result = f(&mut self.log, &mut self.timeline);
        let synced = self.observer.sync(&mut self.timeline, &mut self.log);
        self.observer.set_mode(ObserverMode::Normal);
        let outcome = result?;
        synced?;
        Ok(outcome)
    }

    pub fn mark_saved(&mut self) -> Result<(), SessionError> {
        self.log.checkpoint()?;
        self.refresh_affordances();
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.log.is_dirty()
    }

    pub fn undo_enabled(&self) -> bool {
        self.undo_enabled
    }

    pub fn redo_enabled(&self) -> bool {
        self.redo_enabled
    }

    /// Applies drained log notifications to the undo/redo affordances.
    /// Nested commits are skipped by contract: they do not change what
    /// undo would do.
    fn refresh_affordances(&mut self) {
        for event in self.log.drain_events() {
            match event {
                ActionLogEvent::Begin { .. }
                | ActionLogEvent::Push
                | ActionLogEvent::Commit { nested: true } => {}
                _ => {
                    self.undo_enabled = self.log.can_undo();
                    self.redo_enabled = self.log.can_redo();
                }
            }
        }
    }

    pub fn begin_gesture(
        &mut self,
        clip: ClipId,
        mode: EditMode,
        edge: EditEdge,
        name: &str,
    ) -> Result<(), SessionError> {
        if self.gesture.is_some() {
            return Err(SessionError::GestureActive);
        }
        self.gesture = Some(EditingContext::new(&self.timeline, clip, mode, edge, name)?);
        Ok(())
    }

    pub fn set_gesture_mode(&mut self, mode: EditMode) -> Result<(), SessionError> {
        let gesture = self.gesture.as_mut().ok_or(SessionError::NoGesture)?;
        gesture.set_mode(mode);
        Ok(())
    }

    /// One pointer-motion step: y resolves to a layer target, position
    /// comes pre-converted from pixels by the view.
    pub fn update_gesture(&mut self, position: u64, pointer_y: f32) -> Result<(), SessionError> {
        let layer = layer_at_y(pointer_y, self.timeline.layer_count());
        let gesture = self.gesture.as_mut().ok_or(SessionError::NoGesture)?;
        gesture.edit_to(
            &mut self.timeline,
            &mut self.log,
            &mut self.observer,
            position,
            layer,
        )?;
        Ok(())
    }

    pub fn gesture_snap(&self) -> Option<u64> {
        self.gesture.as_ref().and_then(EditingContext::snap_indicator)
    }

    pub fn finish_gesture(&mut self) -> Result<(), SessionError> {
        let mut gesture = self.gesture.take().ok_or(SessionError::NoGesture)?;
        gesture.finish(&mut self.timeline, &mut self.log, &mut self.observer)?;
        self.refresh_affordances();
        Ok(())
    }

    pub fn abandon_gesture(&mut self) -> Result<(), SessionError> {
        let mut gesture = self.gesture.take().ok_or(SessionError::NoGesture)?;
        gesture.abandon(&mut self.timeline, &mut self.log, &mut self.observer)?;
        self.refresh_affordances();
        Ok(())
    }

    /// Channel end handed to preview generators built outside the
    /// session.
    pub fn preview_sender(&self) -> mpsc::Sender<PreviewMessage> {
        self.preview_tx.clone()
    }

    /// Queues thumbnail and waveform jobs for the asset's streams.
    pub fn request_previews(&mut self, asset: &Asset) {
        if asset.has_video {
            self.manager.add_pipeline(Box::new(VideoPreviewer::new(
                asset.clone(),
                self.preview_tx.clone(),
            )));
        }
        if asset.has_audio {
            self.manager.add_pipeline(Box::new(AudioPreviewer::new(
                asset.clone(),
                self.preview_tx.clone(),
            )));
        }
    }

    /// Drains preview worker messages into the store, advancing the
    /// manager's queue on every completed job. Returns the number of
    /// messages handled so callers know whether to repaint.
    pub fn poll_preview_events(&mut self) -> usize {
        let mut received = 0;
        while let Ok(message) = self.preview_rx.try_recv() {
            received += 1;
            match message {
                PreviewMessage::Thumbnail { asset, time, image } => {
                    self.previews
                        .thumbnails
                        .entry(asset)
                        .or_default()
                        .insert(time, image);
                }
                PreviewMessage::Waveform { asset, peaks } => {
                    self.previews.waveform_peaks.insert(asset, peaks);
                }
                PreviewMessage::Error {
                    asset,
                    track,
                    message,
                } => {
                    tracing::warn!(asset = %asset, ?track, %message, "preview job failed");
                    self.previews.failed.insert((asset, track));
                }
                PreviewMessage::Done { asset, track } => {
                    tracing::debug!(asset = %asset, ?track, "preview job finished");
                    self.manager.mark_done(track);
                }
            }
        }
        received
    }

    /// True once no preview job is running or queued.
    pub fn previews_idle(&self) -> bool {
        [TrackType::Audio, TrackType::Video].iter().all(|track| {
            self.manager.controlled_key(*track).is_none()
                && self.manager.pending_count(*track) == 0
        })
    }

    pub fn stop_previews(&mut self) {
        self.manager.stop_all();
    }
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slate_state::timeline::Clip;

    const SEC: u64 = 1_000_000_000;

    fn session_with_clip() -> (EditorSession, ClipId) {
        let mut timeline = Timeline::new();
        timeline.add_layer(0);
        let id = timeline.add_clip(0, Clip::new("a", 0, 2 * SEC)).unwrap();
        (EditorSession::with_timeline(timeline), id)
    }

    #[test]
    fn record_undo_redo_through_the_session() {
        let (mut session, id) = session_with_clip();

        session
            .record("move", |t| t.set_start(id, 5 * SEC))
            .unwrap();
        assert!(session.undo_enabled());
        assert!(!session.redo_enabled());
        assert!(session.is_dirty());

        assert!(session.undo().unwrap());
        assert_eq!(session.timeline().find_clip(id).unwrap().start, 0);
        assert!(session.redo_enabled());
        assert!(!session.is_dirty());

        assert!(session.redo().unwrap());
        assert_eq!(session.timeline().find_clip(id).unwrap().start, 5 * SEC);
    }

    #[test]
    fn gesture_lifecycle_and_terminal_guards() {
        let (mut session, id) = session_with_clip();

        session
            .begin_gesture(id, EditMode::Normal, EditEdge::None, "drag-clip")
            .unwrap();
        assert!(matches!(
            session.begin_gesture(id, EditMode::Normal, EditEdge::None, "again"),
            Err(SessionError::GestureActive)
        ));
        // Undo is refused while a drag is in flight.
        session.update_gesture(SEC, LAYER_MID).unwrap();
        assert!(matches!(session.undo(), Err(SessionError::GestureActive)));

        session.finish_gesture().unwrap();
        assert!(matches!(
            session.finish_gesture(),
            Err(SessionError::NoGesture)
        ));
        assert_eq!(session.timeline().find_clip(id).unwrap().start, SEC);

        assert!(session.undo().unwrap());
        assert_eq!(session.timeline().find_clip(id).unwrap().start, 0);
    }

    // A pointer y inside the first layer strip.
    const LAYER_MID: f32 = slate_state::editing::LAYER_GAP + slate_state::editing::LAYER_HEIGHT / 2.0;

    #[test]
    fn abandoned_gesture_leaves_no_trace() {
        let (mut session, id) = session_with_clip();

        session
            .begin_gesture(id, EditMode::Normal, EditEdge::None, "drag-clip")
            .unwrap();
        session.update_gesture(7 * SEC, LAYER_MID).unwrap();
        session.abandon_gesture().unwrap();

        assert_eq!(session.timeline().find_clip(id).unwrap().start, 0);
        assert!(!session.undo_enabled());
        assert!(!session.is_dirty());
    }

    #[test]
    fn preview_messages_fill_the_store_and_advance_the_queue() {
        let (mut session, _) = session_with_clip();
        let tx = session.preview_sender();

        tx.send(PreviewMessage::Thumbnail {
            asset: "hash-a".into(),
            time: 500,
            image: image::RgbaImage::new(2, 2),
        })
        .unwrap();
        tx.send(PreviewMessage::Waveform {
            asset: "hash-a".into(),
            peaks: vec![1.0, 2.0],
        })
        .unwrap();
        tx.send(PreviewMessage::Error {
            asset: "hash-b".into(),
            track: TrackType::Video,
            message: "decode failed".into(),
        })
        .unwrap();
        tx.send(PreviewMessage::Done {
            asset: "hash-b".into(),
            track: TrackType::Video,
        })
        .unwrap();

        assert_eq!(session.poll_preview_events(), 4);
        assert_eq!(session.previews.thumbnail_count("hash-a"), 1);
        assert_eq!(session.previews.peaks("hash-a").unwrap().len(), 2);
        assert!(session.previews.has_failed("hash-b", TrackType::Video));
        assert!(session.previews_idle());
    }
}
