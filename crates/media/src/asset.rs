use std::io::Read;
use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer_pbutils::prelude::*;
use sha2::{Digest, Sha256};

use crate::gst_init::init_once;
use crate::PreviewError;

const HASH_SAMPLE_BYTES: usize = 256 * 1024;

/// A probed media file. Previews are keyed by `hash`, so a renamed file
/// keeps its caches while a re-encoded one does not.
#[derive(Debug, Clone)]
pub struct Asset {
    pub path: PathBuf,
    pub hash: String,
    pub duration: u64,
    pub has_video: bool,
    pub has_audio: bool,
}

impl Asset {
    pub fn probe(path: &Path) -> Result<Self, PreviewError> {
        init_once();

        let hash = hash_file(path)?;
        let uri = file_uri(path)?;

        let discoverer = gstreamer_pbutils::Discoverer::new(gst::ClockTime::from_seconds(5))
            .map_err(|e| PreviewError::Gst(format!("Failed to create discoverer: {e}")))?;
        let info = discoverer
            .discover_uri(&uri)
            .map_err(|e| PreviewError::Gst(format!("Discovery failed for {uri}: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            hash,
            duration: info.duration().map(|d| d.nseconds()).unwrap_or(0),
            has_video: !info.video_streams().is_empty(),
            has_audio: !info.audio_streams().is_empty(),
        })
    }
}

pub(crate) fn file_uri(path: &Path) -> Result<String, PreviewError> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(format!("file://{}", abs.display()))
}

/// Hashes the first 256 KiB of the file.
pub fn hash_file(path: &Path) -> Result<String, PreviewError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 8192];
    let mut total = 0usize;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let take = n.min(HASH_SAMPLE_BYTES - total);
        hasher.update(&buf[..take]);
        total += take;
        if total >= HASH_SAMPLE_BYTES {
            break;
        }
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
