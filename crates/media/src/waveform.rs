use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Instant;

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::cpu::{
    CpuUsageTracker, PipelineCpuAdapter, RateControlled, RATE_TICK, WAVEFORMS_CPU_USAGE,
};
use crate::gst_init::{connect_decodebin_audio_only, init_once, make_element};
use crate::manager::PreviewGenerator;
use crate::{cache_dir, PreviewError, PreviewMessage, TrackType};

pub const SAMPLE_DURATION_NS: u64 = 10_000_000;

const BUS_POLL: gst::ClockTime = gst::ClockTime::from_mseconds(50);

#[derive(Serialize, Deserialize)]
struct WaveSidecar {
    sample_duration_ns: u64,
    peaks: Vec<f32>,
}

/// Waveform extraction job for one audio asset.
///
/// A clocked pipeline plays the file through a level element with a
/// synced fakesink; RMS messages are folded into a linear mono peak per
/// sample interval. The CPU adapter modulates the playback rate from
/// the same bus loop. A finished sweep is persisted as a sidecar file
/// keyed by content hash, checked before any pipeline is built. One
/// pipeline failure is retried without rate modulation before the asset
/// is given up for the session.
pub struct AudioPreviewer {
    asset: Asset,
    events: mpsc::Sender<PreviewMessage>,
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl AudioPreviewer {
    pub fn new(asset: Asset, events: mpsc::Sender<PreviewMessage>) -> Self {
        Self {
            asset,
            events,
            stop: None,
            worker: None,
        }
    }
}

impl PreviewGenerator for AudioPreviewer {
    fn key(&self) -> &str {
        &self.asset.hash
    }

    fn track_type(&self) -> TrackType {
        TrackType::Audio
    }

    fn start_generation(&mut self) -> Result<(), PreviewError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = mpsc::channel();
        let asset = self.asset.clone();
        let events = self.events.clone();
        let worker = std::thread::Builder::new()
            .name("waveformer".into())
            .spawn(move || run_worker(asset, stop_rx, events))?;
        self.stop = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_generation(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(asset: Asset, stop: mpsc::Receiver<()>, events: mpsc::Sender<PreviewMessage>) {
    let hash = asset.hash.clone();
    match generate(asset, &stop) {
        Ok(Some(peaks)) => {
            let _ = events.send(PreviewMessage::Waveform { asset: hash.clone(), peaks });
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(%err, asset = %hash, "waveform generation failed");
            let _ = events.send(PreviewMessage::Error {
                asset: hash.clone(),
                track: TrackType::Audio,
                message: err.to_string(),
            });
        }
    }
    let _ = events.send(PreviewMessage::Done {
        asset: hash,
        track: TrackType::Audio,
    });
}

enum SweepOutcome {
    Peaks(Vec<f32>),
    Stopped,
    Failed(String),
}

fn generate(asset: Asset, stop: &mpsc::Receiver<()>) -> Result<Option<Vec<f32>>, PreviewError> {
    init_once();

    let sidecar = sidecar_path(&asset.hash);
    if let Some(peaks) = load_sidecar_from(&sidecar) {
        tracing::debug!(asset = %asset.hash, "waveform served from sidecar");
        return Ok(Some(peaks));
    }

    let n_samples = (asset.duration / SAMPLE_DURATION_NS).max(1) as usize;
    let mut failures = 0u32;
    loop {
        let pipeline = build_level_pipeline(&asset)?;
        let modulate = failures == 0;
        let outcome = sweep(&pipeline, n_samples, modulate, stop);
        let _ = pipeline.set_state(gst::State::Null);
        let _ = pipeline.state(gst::ClockTime::from_seconds(2));

        match outcome {
            SweepOutcome::Peaks(peaks) => {
                save_sidecar_to(&sidecar, &peaks)?;
                return Ok(Some(peaks));
            }
            SweepOutcome::Stopped => return Ok(None),
            SweepOutcome::Failed(message) => {
                failures += 1;
                if failures >= 2 {
                    return Err(PreviewError::Gst(message));
                }
                tracing::warn!(
                    %message,
                    asset = %asset.hash,
                    "waveform pipeline failed, retrying without rate modulation"
                );
            }
        }
    }
}

fn sweep(
    pipeline: &gst::Pipeline,
    n_samples: usize,
    modulate: bool,
    stop: &mpsc::Receiver<()>,
) -> SweepOutcome {
    let Some(bus) = pipeline.bus() else {
        return SweepOutcome::Failed("No bus".into());
    };
    if let Err(e) = pipeline.set_state(gst::State::Playing) {
        return SweepOutcome::Failed(format!("Failed to set Playing: {e}"));
    }

    let mut peaks = vec![0f32; n_samples];
    let mut rate_control = GstRateControl {
        pipeline: pipeline.clone(),
    };
    let mut adapter =
        modulate.then(|| PipelineCpuAdapter::new(WAVEFORMS_CPU_USAGE, CpuUsageTracker::new()));
    let mut last_tick = Instant::now();

    loop {
        match stop.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => return SweepOutcome::Stopped,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        if let Some(msg) = bus.timed_pop(BUS_POLL) {
            match msg.view() {
                gst::MessageView::Element(element) => {
                    if let Some(structure) = element.structure() {
                        if structure.name().as_str() == "level" {
                            fold_level_structure(&mut peaks, structure);
                        }
                    }
                }
                gst::MessageView::Eos(_) => return SweepOutcome::Peaks(peaks),
                gst::MessageView::Error(err) => {
                    return SweepOutcome::Failed(format!("{}", err.error()));
                }
                gst::MessageView::StateChanged(change) => {
                    let from_pipeline = msg
                        .src()
                        .is_some_and(|s| s == pipeline.upcast_ref::<gst::Object>());
                    if from_pipeline
                        && change.old() == gst::State::Ready
                        && change.current() == gst::State::Paused
                    {
                        if let Some(adapter) = adapter.as_mut() {
                            adapter.on_unparked(&mut rate_control);
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(adapter) = adapter.as_mut() {
            if last_tick.elapsed() >= RATE_TICK {
                adapter.tick(&mut rate_control);
                last_tick = Instant::now();
            }
        }
    }
}

struct GstRateControl {
    pipeline: gst::Pipeline,
}

impl RateControlled for GstRateControl {
    fn position(&mut self) -> Option<u64> {
        self.pipeline
            .query_position::<gst::ClockTime>()
            .map(|p| p.nseconds())
    }

    fn apply_rate(&mut self, rate: f64, position: u64) {
        let _ = self.pipeline.set_state(gst::State::Paused);
        let _ = self.pipeline.seek(
            rate,
            gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
            gst::SeekType::Set,
            Some(gst::ClockTime::from_nseconds(position)),
            gst::SeekType::None,
            gst::ClockTime::NONE,
        );
        let _ = self.pipeline.set_state(gst::State::Playing);
    }

    fn park(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Ready);
    }

    fn unpark(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Paused);
    }
}

fn build_level_pipeline(asset: &Asset) -> Result<gst::Pipeline, PreviewError> {
    let pipeline = gst::Pipeline::new();

    let filesrc = gst::ElementFactory::make("filesrc")
        .property("location", asset.path.to_str().unwrap_or_default())
        .build()
        .map_err(|e| PreviewError::Gst(format!("Failed to create filesrc: {e}")))?;
    let decodebin = make_element("decodebin")?;
    let audioconvert = make_element("audioconvert")?;
    let level = gst::ElementFactory::make("level")
        .property("interval", SAMPLE_DURATION_NS)
        .property("post-messages", true)
        .build()
        .map_err(|e| PreviewError::Gst(format!("Failed to create level: {e}")))?;
    let fakesink = gst::ElementFactory::make("fakesink")
        .property("sync", true)
        .property("qos", false)
        .build()
        .map_err(|e| PreviewError::Gst(format!("Failed to create fakesink: {e}")))?;

    pipeline
        .add_many([&filesrc, &decodebin, &audioconvert, &level, &fakesink])
        .map_err(|e| PreviewError::Gst(format!("Failed to add elements: {e}")))?;
    gst::Element::link_many([&filesrc, &decodebin])
        .map_err(|e| PreviewError::Gst(format!("Failed to link filesrc->decodebin: {e}")))?;
    gst::Element::link_many([&audioconvert, &level, &fakesink])
        .map_err(|e| PreviewError::Gst(format!("Failed to link audio chain: {e}")))?;

    connect_decodebin_audio_only(&decodebin, &audioconvert);

    Ok(pipeline)
}

fn fold_level_structure(peaks: &mut [f32], structure: &gst::StructureRef) {
    let Ok(stream_time) = structure.get::<u64>("stream-time") else {
        return;
    };
    let Ok(rms) = structure.get::<glib::ValueArray>("rms") else {
        return;
    };
    let dbs: Vec<f64> = rms
        .iter()
        .filter_map(|value| value.get::<f64>().ok())
        .collect();
    let pos = (stream_time / SAMPLE_DURATION_NS) as usize;
    fold_rms(peaks, pos, &dbs);
}

/// Converts per-channel RMS decibels to one linear mono peak in 0..100.
/// Non-negative readings are clipping artifacts and repeat the previous
/// peak instead.
pub(crate) fn fold_rms(peaks: &mut [f32], pos: usize, channel_dbs: &[f64]) {
    if pos >= peaks.len() || channel_dbs.is_empty() {
        return;
    }
    let previous = if pos > 0 { peaks[pos - 1] as f64 } else { 0.0 };
    let sum: f64 = channel_dbs
        .iter()
        .map(|db| {
            if *db < 0.0 {
                10f64.powf(db / 20.0) * 100.0
            } else {
                previous
            }
        })
        .sum();
    peaks[pos] = (sum / channel_dbs.len() as f64) as f32;
}

fn sidecar_path(hash: &str) -> PathBuf {
    cache_dir("waves").join(format!("{hash}.json"))
}

fn load_sidecar_from(path: &Path) -> Option<Vec<f32>> {
    let file = std::fs::File::open(path).ok()?;
    let sidecar: WaveSidecar = serde_json::from_reader(file).ok()?;
    (sidecar.sample_duration_ns == SAMPLE_DURATION_NS).then_some(sidecar.peaks)
}

fn save_sidecar_to(path: &Path, peaks: &[f32]) -> Result<(), PreviewError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(
        file,
        &WaveSidecar {
            sample_duration_ns: SAMPLE_DURATION_NS,
            peaks: peaks.to_vec(),
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_decibels_become_linear_mono_peaks() {
        let mut peaks = vec![0f32; 4];
        fold_rms(&mut peaks, 0, &[-20.0, -20.0]);
        assert!((peaks[0] - 10.0).abs() < 1e-4);

        fold_rms(&mut peaks, 1, &[0.0]);
        // A clipped reading repeats the previous peak.
        assert_eq!(peaks[1], peaks[0]);

        fold_rms(&mut peaks, 2, &[-6.0, -60.0]);
        let expected = (10f64.powf(-6.0 / 20.0) * 100.0 + 10f64.powf(-60.0 / 20.0) * 100.0) / 2.0;
        assert!((peaks[2] as f64 - expected).abs() < 1e-3);

        // Positions past the asset length are ignored.
        fold_rms(&mut peaks, 9, &[-3.0]);
        assert_eq!(peaks[3], 0.0);
    }

    #[test]
    fn sidecar_round_trips_and_rejects_other_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hash.json");
        let peaks = vec![0.0, 12.5, 99.9];

        save_sidecar_to(&path, &peaks).unwrap();
        assert_eq!(load_sidecar_from(&path).unwrap(), peaks);

        // A sidecar written with a different sample interval is stale.
        let stale = WaveSidecar {
            sample_duration_ns: SAMPLE_DURATION_NS / 2,
            peaks: peaks.clone(),
        };
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();
        assert!(load_sidecar_from(&path).is_none());
    }

    #[test]
    fn missing_sidecar_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_sidecar_from(&dir.path().join("nope.json")).is_none());
    }
}
