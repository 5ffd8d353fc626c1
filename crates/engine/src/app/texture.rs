use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Loader worker count; at most this many decodes run at once.
pub const MAX_CONCURRENT_LOADS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKeyIssue {
    Empty,
    LeadingSlash,
    Backslash,
    ParentTraversal,
    InvalidCharacter(char),
}

impl fmt::Display for TextureKeyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureKeyIssue::Empty => write!(f, "key is empty"),
            TextureKeyIssue::LeadingSlash => write!(f, "key starts with '/'"),
            TextureKeyIssue::Backslash => write!(f, "key contains '\\'"),
            TextureKeyIssue::ParentTraversal => write!(f, "key contains '..' segment"),
            TextureKeyIssue::InvalidCharacter(c) => write!(f, "key contains invalid character {c:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("invalid texture key {key:?}: {issue}")]
    InvalidKey { key: String, issue: TextureKeyIssue },
    #[error("failed to read texture file for key {key:?}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode texture for key {key:?}")]
    Decode {
        key: String,
        #[source]
        source: image::ImageError,
    },
}

/// Keys are relative forward-slash paths under the asset root, e.g.
/// `"ui/button.png"`. Anything that could escape the root is rejected.
pub fn validate_texture_key(key: &str) -> Result<(), TextureKeyIssue> {
    if key.is_empty() {
        return Err(TextureKeyIssue::Empty);
    }
    if key.starts_with('/') {
        return Err(TextureKeyIssue::LeadingSlash);
    }
    if key.contains('\\') {
        return Err(TextureKeyIssue::Backslash);
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(TextureKeyIssue::ParentTraversal);
    }
    for c in key.chars() {
        let ok = c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-');
        if !ok {
            return Err(TextureKeyIssue::InvalidCharacter(c));
        }
    }
    Ok(())
}

/// Decoded RGBA8 image, immutable once loaded and shared across nodes.
#[derive(Debug, Clone)]
pub struct Texture {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Texture {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = (width as usize).checked_mul(height as usize)?.checked_mul(4)?;
        if rgba.len() != expected || width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height, rgba })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let index = ((y * self.width + x) * 4) as usize;
        [
            self.rgba[index],
            self.rgba[index + 1],
            self.rgba[index + 2],
            self.rgba[index + 3],
        ]
    }
}

pub trait TextureProvider: Send + Sync {
    fn load(&self, key: &str) -> Result<Texture, TextureError>;
}

/// Loads PNG files from a root directory on disk.
pub struct FileTextureProvider {
    root: PathBuf,
}

impl FileTextureProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TextureProvider for FileTextureProvider {
    fn load(&self, key: &str) -> Result<Texture, TextureError> {
        validate_texture_key(key).map_err(|issue| TextureError::InvalidKey {
            key: key.to_string(),
            issue,
        })?;
        let path = self.root.join(key);
        let bytes = std::fs::read(&path).map_err(|source| TextureError::Io {
            key: key.to_string(),
            source,
        })?;
        let decoded = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
            .map_err(|source| TextureError::Decode {
                key: key.to_string(),
                source,
            })?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Texture::from_rgba(width, height, rgba.into_raw()).ok_or_else(|| TextureError::Decode {
            key: key.to_string(),
            source: image::ImageError::Limits(image::error::LimitError::from_kind(
                image::error::LimitErrorKind::DimensionError,
            )),
        })
    }
}

enum TextureSlot {
    Loading,
    Ready(Arc<Texture>),
    Failed,
}

/// Asynchronous texture loader with a fixed worker pool. Keys are handed to
/// worker threads through a shared channel; finished results are drained on
/// the caller's thread via `poll`.
pub struct TextureQueue {
    job_tx: Sender<String>,
    result_rx: Receiver<(String, Result<Texture, TextureError>)>,
    cache: HashMap<String, TextureSlot>,
    in_flight: usize,
}

impl TextureQueue {
    pub fn new(provider: Arc<dyn TextureProvider>) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<String>();
        let (result_tx, result_rx) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        for worker in 0..MAX_CONCURRENT_LOADS {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let provider = Arc::clone(&provider);
            thread::Builder::new()
                .name(format!("texture-loader-{worker}"))
                .spawn(move || loop {
                    let key = {
                        let guard = match job_rx.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        match guard.recv() {
                            Ok(key) => key,
                            Err(_) => return,
                        }
                    };
                    let outcome = provider.load(&key);
                    if result_tx.send((key, outcome)).is_err() {
                        return;
                    }
                })
                .map_err(|error| {
                    warn!(target: "texture", error = %error, "texture_worker_spawn_failed")
                })
                .ok();
        }

        Self {
            job_tx,
            result_rx,
            cache: HashMap::new(),
            in_flight: 0,
        }
    }

    /// Schedules a key for loading. Repeated requests for a key that is
    /// loading, loaded, or failed are ignored.
    pub fn enqueue(&mut self, key: &str) {
        if self.cache.contains_key(key) {
            return;
        }
        if self.job_tx.send(key.to_string()).is_ok() {
            self.cache.insert(key.to_string(), TextureSlot::Loading);
            self.in_flight += 1;
        }
    }

    /// Drains finished loads without blocking. Returns how many completed.
    pub fn poll(&mut self) -> usize {
        let mut completed = 0;
        while let Ok((key, outcome)) = self.result_rx.try_recv() {
            self.settle(key, outcome);
            completed += 1;
        }
        completed
    }

    /// Blocks until every scheduled load has finished or the timeout lapses.
    /// Returns true when the queue is idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.result_rx.recv_timeout(remaining) {
                Ok((key, outcome)) => self.settle(key, outcome),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    fn settle(&mut self, key: String, outcome: Result<Texture, TextureError>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            Ok(texture) => {
                debug!(target: "texture", key = %key, width = texture.width, height = texture.height, "texture_loaded");
                self.cache.insert(key, TextureSlot::Ready(Arc::new(texture)));
            }
            Err(error) => {
                warn!(target: "texture", key = %key, error = %error, "texture_load_failed");
                self.cache.insert(key, TextureSlot::Failed);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Texture>> {
        match self.cache.get(key) {
            Some(TextureSlot::Ready(texture)) => Some(Arc::clone(texture)),
            _ => None,
        }
    }

    pub fn is_failed(&self, key: &str) -> bool {
        matches!(self.cache.get(key), Some(TextureSlot::Failed))
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn validate_texture_key_accepts_plain_relative_paths() {
        assert!(validate_texture_key("ui/button.png").is_ok());
        assert!(validate_texture_key("ball-2_x.png").is_ok());
    }

    #[test]
    fn validate_texture_key_rejects_escapes() {
        assert_eq!(validate_texture_key(""), Err(TextureKeyIssue::Empty));
        assert_eq!(validate_texture_key("/abs.png"), Err(TextureKeyIssue::LeadingSlash));
        assert_eq!(validate_texture_key("a\\b.png"), Err(TextureKeyIssue::Backslash));
        assert_eq!(
            validate_texture_key("../secret.png"),
            Err(TextureKeyIssue::ParentTraversal)
        );
        assert_eq!(
            validate_texture_key("sp ace.png"),
            Err(TextureKeyIssue::InvalidCharacter(' '))
        );
    }

    #[test]
    fn texture_from_rgba_checks_dimensions() {
        assert!(Texture::from_rgba(2, 2, vec![0; 16]).is_some());
        assert!(Texture::from_rgba(2, 2, vec![0; 15]).is_none());
        assert!(Texture::from_rgba(0, 2, vec![]).is_none());
    }

    #[test]
    fn texture_sample_is_clipped() {
        let texture = Texture::from_rgba(1, 1, vec![10, 20, 30, 255]).unwrap();
        assert_eq!(texture.sample(0, 0), [10, 20, 30, 255]);
        assert_eq!(texture.sample(1, 0), [0, 0, 0, 0]);
    }

    struct CountingProvider {
        concurrent: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TextureProvider for CountingProvider {
        fn load(&self, key: &str) -> Result<Texture, TextureError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            if key.starts_with("bad") {
                Err(TextureError::InvalidKey {
                    key: key.to_string(),
                    issue: TextureKeyIssue::Empty,
                })
            } else {
                Ok(Texture::from_rgba(1, 1, vec![0, 0, 0, 255]).unwrap())
            }
        }
    }

    #[test]
    fn queue_limits_concurrent_loads() {
        let provider = Arc::new(CountingProvider {
            concurrent: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut queue = TextureQueue::new(Arc::clone(&provider) as Arc<dyn TextureProvider>);
        for index in 0..10 {
            queue.enqueue(&format!("tex-{index}.png"));
        }
        assert!(queue.wait_idle(Duration::from_secs(5)));
        assert!(provider.peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_LOADS);
        assert!(queue.get("tex-0.png").is_some());
    }

    #[test]
    fn queue_records_failures_and_dedupes() {
        let provider = Arc::new(CountingProvider {
            concurrent: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut queue = TextureQueue::new(provider as Arc<dyn TextureProvider>);
        queue.enqueue("bad.png");
        queue.enqueue("bad.png");
        assert_eq!(queue.in_flight(), 1);
        assert!(queue.wait_idle(Duration::from_secs(5)));
        assert!(queue.is_failed("bad.png"));
        assert!(queue.get("bad.png").is_none());
    }

    #[test]
    fn file_provider_decodes_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoded = Vec::new();
        let img = image::RgbaImage::from_pixel(2, 3, image::Rgba([1, 2, 3, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(dir.path().join("dot.png"), &encoded).unwrap();

        let provider = FileTextureProvider::new(dir.path());
        let texture = provider.load("dot.png").unwrap();
        assert_eq!((texture.width(), texture.height()), (2, 3));
        assert_eq!(texture.sample(1, 2), [1, 2, 3, 255]);

        assert!(matches!(provider.load("missing.png"), Err(TextureError::Io { .. })));
        assert!(matches!(
            provider.load("../dot.png"),
            Err(TextureError::InvalidKey { .. })
        ));
    }
}
