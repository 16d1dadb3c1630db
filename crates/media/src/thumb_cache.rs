use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::RgbaImage;
use lru::LruCache;
use rusqlite::{params, Connection};

use crate::{cache_dir, PreviewError};

const JPEG_QUALITY: u8 = 90;
const MEMORY_ENTRIES: usize = 256;

/// Two-tier thumbnail store for one asset.
///
/// The memory tier is a small LRU holding decoded frames for the
/// on-screen window; the durable tier is a SQLite file named after the
/// asset's content hash, one row per quantized timestamp. Writes build
/// up inside an open transaction until [`ThumbnailCache::commit`].
pub struct ThumbnailCache {
    conn: Connection,
    memory: LruCache<u64, RgbaImage>,
    path: PathBuf,
}

impl ThumbnailCache {
    /// Opens (or creates) the store for an asset content hash under the
    /// user cache directory.
    pub fn open_for_hash(hash: &str) -> Result<Self, PreviewError> {
        let dir = cache_dir("thumbs");
        std::fs::create_dir_all(&dir)?;
        Self::open(dir.join(hash))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreviewError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", &"WAL")?;
        conn.pragma_update(None, "synchronous", &"NORMAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS thumbs (
                time INTEGER NOT NULL PRIMARY KEY,
                jpeg BLOB NOT NULL
            )",
            [],
        )?;
        conn.execute_batch("BEGIN")?;
        Ok(Self {
            conn,
            memory: LruCache::new(NonZeroUsize::new(MEMORY_ENTRIES).unwrap()),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durable-tier existence check.
    pub fn contains(&self, time: u64) -> bool {
        self.conn
            .query_row(
                "SELECT time FROM thumbs WHERE time = ?1",
                params![time as i64],
                |_| Ok(()),
            )
            .is_ok()
    }

    pub fn get(&mut self, time: u64) -> Result<RgbaImage, PreviewError> {
        if let Some(image) = self.memory.get(&time) {
            return Ok(image.clone());
        }
        let blob: Vec<u8> = self
            .conn
            .query_row(
                "SELECT jpeg FROM thumbs WHERE time = ?1",
                params![time as i64],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => PreviewError::NotCached(time),
                other => PreviewError::Cache(other),
            })?;
        let image = image::load_from_memory_with_format(&blob, image::ImageFormat::Jpeg)?
            .to_rgba8();
        self.memory.put(time, image.clone());
        Ok(image)
    }

    /// Stores a frame, replacing any existing row for the exact time.
    /// Delete-then-insert keeps replacement free of constraint races.
    pub fn set(&mut self, time: u64, image: &RgbaImage) -> Result<(), PreviewError> {
        let blob = encode_jpeg(image)?;
        self.conn
            .execute("DELETE FROM thumbs WHERE time = ?1", params![time as i64])?;
        self.conn.execute(
            "INSERT INTO thumbs (time, jpeg) VALUES (?1, ?2)",
            params![time as i64, blob],
        )?;
        self.memory.put(time, image.clone());
        Ok(())
    }

    /// Flushes pending rows to disk and opens the next batch.
    pub fn commit(&mut self) -> Result<(), PreviewError> {
        tracing::debug!(path = %self.path.display(), "committing thumbnail cache");
        self.conn.execute_batch("COMMIT; BEGIN")?;
        Ok(())
    }
}

impl Drop for ThumbnailCache {
    fn drop(&mut self) {
        let _ = self.conn.execute_batch("COMMIT");
    }
}

fn encode_jpeg(image: &RgbaImage) -> Result<Vec<u8>, PreviewError> {
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut blob = Vec::new();
    JpegEncoder::new_with_quality(&mut blob, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_image(w: u32, h: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba([value, value, value, 255]))
    }

    #[test]
    fn round_trip_within_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ThumbnailCache::open(dir.path().join("asset")).unwrap();

        assert!(!cache.contains(500));
        cache.set(500, &flat_image(16, 8, 128)).unwrap();
        assert!(cache.contains(500));

        let back = cache.get(500).unwrap();
        assert_eq!(back.dimensions(), (16, 8));
    }

    #[test]
    fn committed_rows_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asset");
        {
            let mut cache = ThumbnailCache::open(&path).unwrap();
            cache.set(1_000, &flat_image(8, 8, 40)).unwrap();
            cache.commit().unwrap();
        }

        // The stored bytes are durable: two independent reopenings
        // decode the very same row to the very same pixels.
        let mut first = ThumbnailCache::open(&path).unwrap();
        let mut second = ThumbnailCache::open(&path).unwrap();
        assert!(first.contains(1_000));
        assert_eq!(first.get(1_000).unwrap(), second.get(1_000).unwrap());
        assert!(matches!(
            first.get(2_000),
            Err(PreviewError::NotCached(2_000))
        ));
    }

    #[test]
    fn set_replaces_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ThumbnailCache::open(dir.path().join("asset")).unwrap();

        cache.set(500, &flat_image(8, 8, 10)).unwrap();
        cache.set(500, &flat_image(8, 8, 200)).unwrap();

        let back = cache.get(500).unwrap();
        // JPEG is lossy, so compare against both candidates' luma range.
        assert!(back.get_pixel(4, 4)[0] > 100);
    }

    #[test]
    fn memory_tier_serves_hits_without_decode() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ThumbnailCache::open(dir.path().join("asset")).unwrap();
        let image = flat_image(4, 4, 99);
        cache.set(0, &image).unwrap();

        // The memory tier returns the exact pixels that were stored,
        // not the lossy decode.
        assert_eq!(cache.get(0).unwrap(), image);
    }
}
