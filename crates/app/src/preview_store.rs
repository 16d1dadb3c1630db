use std::collections::{BTreeMap, HashMap, HashSet};

use slate_media::TrackType;

/// In-memory preview results for display, filled by the session's
/// channel polling. Keyed by asset content hash.
#[derive(Default)]
pub struct PreviewStore {
    pub thumbnails: HashMap<String, BTreeMap<u64, image::RgbaImage>>,
    pub waveform_peaks: HashMap<String, Vec<f32>>,
    pub failed: HashSet<(String, TrackType)>,
}

impl PreviewStore {
    /// The newest thumbnail at or before `time`, the frame a clip strip
    /// shows while later ones are still generating.
    pub fn thumbnail_at(&self, asset: &str, time: u64) -> Option<&image::RgbaImage> {
        self.thumbnails
            .get(asset)?
            .range(..=time)
            .next_back()
            .map(|(_, image)| image)
    }

    pub fn thumbnail_count(&self, asset: &str) -> usize {
        self.thumbnails.get(asset).map_or(0, BTreeMap::len)
    }

    pub fn peaks(&self, asset: &str) -> Option<&[f32]> {
        self.waveform_peaks.get(asset).map(Vec::as_slice)
    }

    pub fn has_failed(&self, asset: &str, track: TrackType) -> bool {
        self.failed.contains(&(asset.to_owned(), track))
    }
}
