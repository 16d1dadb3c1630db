use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use crate::asset::Asset;
use crate::cpu::{CpuSampler, CpuUsageTracker, THUMBNAILS_CPU_USAGE};
use crate::gst_init::{
    build_thumb_caps, connect_decodebin_video_only, init_once, make_element, wait_for_async_done,
};
use crate::manager::PreviewGenerator;
use crate::thumb_cache::ThumbnailCache;
use crate::{quantize, PreviewError, PreviewMessage, TrackType};

pub const THUMB_HEIGHT: u32 = 96;
pub const THUMB_PERIOD_NS: u64 = 500_000_000;
pub const THUMB_MARGIN_PX: f64 = 3.0;

const NOMINAL_THUMB_WIDTH_PX: f64 = THUMB_HEIGHT as f64 * 16.0 / 9.0;
const MAX_CONSECUTIVE_MISSES: u32 = 8;

/// Spacing between generated thumbnails for a zoom level, so on-screen
/// width bounds the thumbnail count rather than the source framerate.
/// Always a multiple of the base period and never denser than it.
pub fn thumb_interval(ns_per_pixel: f64) -> u64 {
    let span = ((NOMINAL_THUMB_WIDTH_PX + THUMB_MARGIN_PX) * ns_per_pixel.max(0.0)) as u64;
    let mut interval = quantize(span, THUMB_PERIOD_NS);
    if interval < span {
        interval += THUMB_PERIOD_NS;
    }
    interval.max(THUMB_PERIOD_NS)
}

/// Quantized sample times covering a visible range.
pub fn wishlist_for_range(start: u64, end: u64, interval: u64) -> Vec<u64> {
    let interval = interval.max(THUMB_PERIOD_NS);
    let mut times = Vec::new();
    let mut t = quantize(start, interval);
    while t < end {
        times.push(t);
        t += interval;
    }
    times
}

enum ThumbControl {
    Wishlist(Vec<u64>),
    Stop,
}

/// Thumbnail generation job for one video asset.
///
/// The worker owns a paused decode pipeline and walks a queue of
/// period-quantized timestamps, seeking and pulling one preroll frame
/// per step. Wishlist updates reprioritize the visible window without
/// restarting the sweep. Pacing follows CPU feedback; the cache is
/// autosaved on a per-asset jittered schedule so long clips survive an
/// early exit.
pub struct VideoPreviewer {
    asset: Asset,
    events: mpsc::Sender<PreviewMessage>,
    control: Option<mpsc::Sender<ThumbControl>>,
    worker: Option<JoinHandle<()>>,
}

impl VideoPreviewer {
    pub fn new(asset: Asset, events: mpsc::Sender<PreviewMessage>) -> Self {
        Self {
            asset,
            events,
            control: None,
            worker: None,
        }
    }

    /// Requests the visible window first, at the density the current
    /// zoom supports.
    pub fn set_visible_range(&self, start: u64, end: u64, ns_per_pixel: f64) {
        let interval = thumb_interval(ns_per_pixel);
        let wishlist = wishlist_for_range(start, end, interval);
        if let Some(control) = &self.control {
            let _ = control.send(ThumbControl::Wishlist(wishlist));
        }
    }
}

impl PreviewGenerator for VideoPreviewer {
    fn key(&self) -> &str {
        &self.asset.hash
    }

    fn track_type(&self) -> TrackType {
        TrackType::Video
    }

    fn start_generation(&mut self) -> Result<(), PreviewError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (control_tx, control_rx) = mpsc::channel();
        let asset = self.asset.clone();
        let events = self.events.clone();
        let worker = std::thread::Builder::new()
            .name("thumbnailer".into())
            .spawn(move || run_worker(asset, control_rx, events))?;
        self.control = Some(control_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_generation(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(ThumbControl::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    asset: Asset,
    control: mpsc::Receiver<ThumbControl>,
    events: mpsc::Sender<PreviewMessage>,
) {
    let hash = asset.hash.clone();
    if let Err(err) = generate(asset, &control, &events) {
        tracing::warn!(%err, asset = %hash, "thumbnail generation failed");
        let _ = events.send(PreviewMessage::Error {
            asset: hash.clone(),
            track: TrackType::Video,
            message: err.to_string(),
        });
    }
    let _ = events.send(PreviewMessage::Done {
        asset: hash,
        track: TrackType::Video,
    });
}

struct PipelineGuard(gst::Pipeline);

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        let _ = self.0.set_state(gst::State::Null);
        let _ = self.0.state(gst::ClockTime::from_seconds(2));
    }
}

fn generate(
    asset: Asset,
    control: &mpsc::Receiver<ThumbControl>,
    events: &mpsc::Sender<PreviewMessage>,
) -> Result<(), PreviewError> {
    init_once();

    let mut cache = ThumbnailCache::open_for_hash(&asset.hash)?;
    let (pipeline, appsink) = build_pipeline(&asset)?;
    let pipeline = PipelineGuard(pipeline);

    let duration = pipeline
        .0
        .query_duration::<gst::ClockTime>()
        .map(|d| d.nseconds())
        .unwrap_or(asset.duration);

    let mut queue: Vec<u64> = (0..duration / THUMB_PERIOD_NS)
        .map(|i| i * THUMB_PERIOD_NS)
        .filter(|t| !cache.contains(*t))
        .collect();
    let mut wishlist: Vec<u64> = Vec::new();
    tracing::debug!(asset = %asset.hash, missing = queue.len(), "generating thumbnails");

    let mut cpu = CpuUsageTracker::new();
    let mut interval = Duration::from_millis(500);
    let autosave_every = autosave_period(&asset.hash);
    let mut last_save = Instant::now();
    let mut misses = 0u32;

    while !queue.is_empty() {
        loop {
            match control.try_recv() {
                Ok(ThumbControl::Wishlist(fresh)) => wishlist = fresh,
                Ok(ThumbControl::Stop) | Err(mpsc::TryRecvError::Disconnected) => {
                    cache.commit()?;
                    return Ok(());
                }
                Err(mpsc::TryRecvError::Empty) => break,
            }
        }

        let time = pick_next(&mut wishlist, &queue).unwrap_or(queue[0]);
        match capture_frame(&pipeline.0, &appsink, time) {
            Some(image) => {
                misses = 0;
                queue.retain(|t| *t != time);
                cache.set(time, &image)?;
                let _ = events.send(PreviewMessage::Thumbnail {
                    asset: asset.hash.clone(),
                    time,
                    image,
                });
            }
            None => {
                // Rotate the failed position to the back so one bad seek
                // target cannot wedge the sweep.
                misses += 1;
                queue.retain(|t| *t != time);
                queue.push(time);
                if misses > MAX_CONSECUTIVE_MISSES {
                    cache.commit()?;
                    return Err(PreviewError::Gst(
                        "pipeline stopped producing frames".into(),
                    ));
                }
            }
        }

        let usage = cpu.usage();
        if usage < THUMBNAILS_CPU_USAGE {
            interval = interval.mul_f64(0.9);
        } else {
            interval = interval.mul_f64(1.1);
        }
        interval = interval.clamp(Duration::from_millis(10), Duration::from_secs(10));
        std::thread::sleep(interval);

        if last_save.elapsed() >= autosave_every {
            tracing::debug!(asset = %asset.hash, "periodic thumbnail autosave");
            cache.commit()?;
            last_save = Instant::now();
        }
    }

    cache.commit()?;
    Ok(())
}

fn build_pipeline(asset: &Asset) -> Result<(gst::Pipeline, gst_app::AppSink), PreviewError> {
    let pipeline = gst::Pipeline::new();

    let filesrc = gst::ElementFactory::make("filesrc")
        .property("location", asset.path.to_str().unwrap_or_default())
        .build()
        .map_err(|e| PreviewError::Gst(format!("Failed to create filesrc: {e}")))?;
    let decodebin = make_element("decodebin")?;
    let videoconvert = make_element("videoconvert")?;
    let videoscale = make_element("videoscale")?;

    let appsink = gst_app::AppSink::builder()
        .caps(&build_thumb_caps(THUMB_HEIGHT))
        .sync(false)
        .build();

    pipeline
        .add_many([
            &filesrc,
            &decodebin,
            &videoconvert,
            &videoscale,
            appsink.upcast_ref::<gst::Element>(),
        ])
        .map_err(|e| PreviewError::Gst(format!("Failed to add elements: {e}")))?;
    gst::Element::link_many([&filesrc, &decodebin])
        .map_err(|e| PreviewError::Gst(format!("Failed to link filesrc->decodebin: {e}")))?;
    gst::Element::link_many([
        &videoconvert,
        &videoscale,
        appsink.upcast_ref::<gst::Element>(),
    ])
    .map_err(|e| PreviewError::Gst(format!("Failed to link video chain: {e}")))?;

    connect_decodebin_video_only(&decodebin, &videoconvert);

    if let Err(e) = pipeline.set_state(gst::State::Paused) {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(PreviewError::Gst(format!("Failed to set Paused: {e}")));
    }
    let bus = match pipeline.bus() {
        Some(b) => b,
        None => {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(PreviewError::Gst("No bus".into()));
        }
    };
    if let Err(e) = wait_for_async_done(&bus, gst::ClockTime::from_seconds(10)) {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(PreviewError::Gst(format!("Preroll error: {e}")));
    }

    Ok((pipeline, appsink))
}

/// Accurate seek in the paused pipeline, then one preroll frame.
fn capture_frame(
    pipeline: &gst::Pipeline,
    appsink: &gst_app::AppSink,
    time: u64,
) -> Option<image::RgbaImage> {
    pipeline
        .seek_simple(
            gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
            gst::ClockTime::from_nseconds(time),
        )
        .ok()?;

    let sample = appsink.try_pull_preroll(gst::ClockTime::from_seconds(2))?;
    let caps = sample.caps()?;
    let structure = caps.structure(0)?;
    let width = structure.get::<i32>("width").ok()? as u32;
    let height = structure.get::<i32>("height").ok()? as u32;

    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;
    let data = map.as_slice();
    let expected = (width * height * 4) as usize;

    let mut rgba = Vec::with_capacity(expected);
    if data.len() >= expected {
        rgba.extend_from_slice(&data[..expected]);
    } else {
        rgba.extend_from_slice(data);
        rgba.resize(expected, 0);
    }

    image::RgbaImage::from_raw(width, height, rgba)
}

fn pick_next(wishlist: &mut Vec<u64>, queue: &[u64]) -> Option<u64> {
    while !wishlist.is_empty() {
        let wish = wishlist.remove(0);
        if queue.contains(&wish) {
            return Some(wish);
        }
    }
    None
}

/// 30 to 80 seconds, spread by content hash so simultaneously open
/// assets do not flush to disk in lockstep.
fn autosave_period(hash: &str) -> Duration {
    let jitter = hash
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
        % 50;
    Duration::from_secs(30 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_quantized_and_never_denser_than_period() {
        // Zoomed far in: a thumb width covers almost no time.
        assert_eq!(thumb_interval(0.001), THUMB_PERIOD_NS);
        // Zoomed out: interval rounds up to the next period multiple.
        let wide = thumb_interval(10_000_000.0);
        assert_eq!(wide % THUMB_PERIOD_NS, 0);
        assert!(wide >= (NOMINAL_THUMB_WIDTH_PX * 10_000_000.0) as u64);
    }

    #[test]
    fn wishlist_covers_the_visible_window() {
        let times = wishlist_for_range(1_700_000_000, 4_000_000_000, THUMB_PERIOD_NS);
        assert_eq!(times.first(), Some(&1_500_000_000));
        assert!(times.iter().all(|t| *t < 4_000_000_000));
        assert!(times.windows(2).all(|w| w[1] - w[0] == THUMB_PERIOD_NS));
    }

    #[test]
    fn wishes_still_queued_win_over_queue_order() {
        let queue = vec![0, 500, 1_000, 1_500];
        let mut wishlist = vec![2_000, 1_000, 500];
        // 2000 is already done (not queued), so the next wish wins.
        assert_eq!(pick_next(&mut wishlist, &queue), Some(1_000));
        assert_eq!(wishlist, vec![500]);
        // An exhausted wishlist falls back to the queue head.
        let mut empty = Vec::new();
        assert_eq!(pick_next(&mut empty, &queue), None);
    }

    #[test]
    fn autosave_period_is_jittered_per_asset() {
        let a = autosave_period("aaaa1111");
        let b = autosave_period("bbbb2222");
        assert!(a >= Duration::from_secs(30) && a < Duration::from_secs(80));
        assert!(b >= Duration::from_secs(30) && b < Duration::from_secs(80));
    }
}
