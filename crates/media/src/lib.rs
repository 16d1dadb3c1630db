pub mod asset;
pub mod cpu;
pub mod gst_init;
pub mod manager;
pub mod thumb_cache;
pub mod thumbnailer;
pub mod waveform;

use std::path::PathBuf;

pub use asset::Asset;
pub use cpu::{CpuUsageTracker, PipelineCpuAdapter};
pub use manager::{PreviewGenerator, PreviewGeneratorManager};
pub use thumb_cache::ThumbnailCache;
pub use thumbnailer::VideoPreviewer;
pub use waveform::AudioPreviewer;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("gstreamer: {0}")]
    Gst(String),
    #[error("no thumbnail cached for time {0}")]
    NotCached(u64),
    #[error("cache: {0}")]
    Cache(#[from] rusqlite::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sidecar: {0}")]
    Sidecar(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Audio,
    Video,
}

/// Results and lifecycle notices posted by preview workers. Drained by
/// the host on its loop; `Done` always arrives last for a job, errors
/// included, so the manager can advance its queue.
#[derive(Debug)]
pub enum PreviewMessage {
    Thumbnail {
        asset: String,
        time: u64,
        image: image::RgbaImage,
    },
    Waveform {
        asset: String,
        peaks: Vec<f32>,
    },
    Error {
        asset: String,
        track: TrackType,
        message: String,
    },
    Done {
        asset: String,
        track: TrackType,
    },
}

/// `<user cache>/slate/<sub>`, falling back to the temp dir.
pub fn cache_dir(sub: &str) -> PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    base.join("slate").join(sub)
}

pub fn quantize(time: u64, period: u64) -> u64 {
    if period == 0 {
        return time;
    }
    (time / period) * period
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_floors_to_period() {
        assert_eq!(quantize(1_700, 500), 1_500);
        assert_eq!(quantize(499, 500), 0);
        assert_eq!(quantize(1_000, 500), 1_000);
        assert_eq!(quantize(42, 0), 42);
    }
}
