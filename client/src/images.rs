//! At-most-once asynchronous image cache
//!
//! Loads run on the tokio runtime (or wherever an [`ImageLoader`] puts them)
//! and report back over a channel. The render thread drains that channel with
//! [`ImageCache::poll_completions`] once per frame and otherwise only reads
//! the current state of each entry, so a draw never waits on a load.

use log::{debug, warn};
use macroquad::texture::Image;
use shared::Avatar;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("failed to read `{asset}`: {reason}")]
    Read { asset: String, reason: String },
    #[error("failed to decode `{asset}`: {reason}")]
    Decode { asset: String, reason: String },
}

type LoadResult<I> = (String, Result<I, AssetError>);

/// Handle a loader uses to report the outcome of one load.
pub struct Completion<I> {
    asset: String,
    tx: mpsc::UnboundedSender<LoadResult<I>>,
}

impl<I> Completion<I> {
    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn finish(self, result: Result<I, AssetError>) {
        // The cache may already be gone at shutdown.
        let _ = self.tx.send((self.asset, result));
    }
}

pub trait ImageLoader<I> {
    /// Starts loading `completion.asset()`. Must not block.
    fn load(&mut self, completion: Completion<I>);
}

pub enum ImageState<'a, I> {
    Pending,
    Ready(&'a I),
    Failed,
}

impl<I> ImageState<'_, I> {
    pub fn is_ready(&self) -> bool {
        matches!(self, ImageState::Ready(_))
    }
}

enum Entry<I> {
    Pending,
    Ready(I),
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub pending: usize,
    pub ready: usize,
    pub failed: usize,
}

pub struct ImageCache<I> {
    entries: HashMap<String, Entry<I>>,
    loader: Box<dyn ImageLoader<I>>,
    completion_tx: mpsc::UnboundedSender<LoadResult<I>>,
    completion_rx: mpsc::UnboundedReceiver<LoadResult<I>>,
}

impl<I> ImageCache<I> {
    pub fn new(loader: Box<dyn ImageLoader<I>>) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Self {
            entries: HashMap::new(),
            loader,
            completion_tx,
            completion_rx,
        }
    }

    /// Returns the current state, starting a load on first sight of `asset`.
    pub fn request(&mut self, asset: &str) -> ImageState<'_, I> {
        if !self.entries.contains_key(asset) {
            debug!("Loading image {}", asset);
            self.entries.insert(asset.to_string(), Entry::Pending);
            self.loader.load(Completion {
                asset: asset.to_string(),
                tx: self.completion_tx.clone(),
            });
        }

        self.get_state(asset)
    }

    pub fn preload_avatar(&mut self, avatar: &Avatar) {
        for asset in avatar.asset_refs() {
            self.request(asset);
        }
    }

    /// Read-only lookup; never starts a load.
    pub fn get(&self, asset: &str) -> Option<&I> {
        match self.entries.get(asset) {
            Some(Entry::Ready(image)) => Some(image),
            _ => None,
        }
    }

    pub fn get_state(&self, asset: &str) -> ImageState<'_, I> {
        match self.entries.get(asset) {
            Some(Entry::Ready(image)) => ImageState::Ready(image),
            Some(Entry::Failed) => ImageState::Failed,
            _ => ImageState::Pending,
        }
    }

    /// Applies every finished load. Returns how many entries changed.
    pub fn poll_completions(&mut self) -> usize {
        let mut applied = 0;

        while let Ok((asset, result)) = self.completion_rx.try_recv() {
            let Some(entry) = self.entries.get_mut(&asset) else {
                continue;
            };
            if !matches!(entry, Entry::Pending) {
                debug!("Ignoring repeated completion for {}", asset);
                continue;
            }

            *entry = match result {
                Ok(image) => Entry::Ready(image),
                Err(e) => {
                    warn!("Image unavailable, drawing placeholder instead: {}", e);
                    Entry::Failed
                }
            };
            applied += 1;
        }

        applied
    }

    pub fn counts(&self) -> CacheCounts {
        let mut counts = CacheCounts::default();
        for entry in self.entries.values() {
            match entry {
                Entry::Pending => counts.pending += 1,
                Entry::Ready(_) => counts.ready += 1,
                Entry::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loader whose completions are held until the caller finishes them.
/// Cloning shares the queue, so a test can keep one handle and give the
/// other to the cache.
pub struct ManualLoader<I> {
    queued: Rc<RefCell<Vec<Completion<I>>>>,
    loads_started: Rc<RefCell<usize>>,
}

impl<I> Clone for ManualLoader<I> {
    fn clone(&self) -> Self {
        Self {
            queued: Rc::clone(&self.queued),
            loads_started: Rc::clone(&self.loads_started),
        }
    }
}

impl<I> Default for ManualLoader<I> {
    fn default() -> Self {
        Self {
            queued: Rc::new(RefCell::new(Vec::new())),
            loads_started: Rc::new(RefCell::new(0)),
        }
    }
}

impl<I> ManualLoader<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_count(&self) -> usize {
        *self.loads_started.borrow()
    }

    pub fn queued_assets(&self) -> Vec<String> {
        self.queued
            .borrow()
            .iter()
            .map(|c| c.asset().to_string())
            .collect()
    }

    /// Finishes the queued load for `asset` with `result`. Returns false if
    /// no such load is queued.
    pub fn complete(&self, asset: &str, result: Result<I, AssetError>) -> bool {
        let mut queued = self.queued.borrow_mut();
        match queued.iter().position(|c| c.asset() == asset) {
            Some(index) => {
                queued.remove(index).finish(result);
                true
            }
            None => false,
        }
    }

    /// Finishes every queued load with an image built from its reference.
    pub fn complete_all(&self, mut make: impl FnMut(&str) -> I) -> usize {
        let drained: Vec<Completion<I>> = self.queued.borrow_mut().drain(..).collect();
        let count = drained.len();
        for completion in drained {
            let image = make(completion.asset());
            completion.finish(Ok(image));
        }
        count
    }
}

impl<I> ImageLoader<I> for ManualLoader<I> {
    fn load(&mut self, completion: Completion<I>) {
        *self.loads_started.borrow_mut() += 1;
        self.queued.borrow_mut().push(completion);
    }
}

/// Reads asset references as paths under `root` and decodes them off the
/// render thread.
pub struct FileLoader {
    root: PathBuf,
    runtime: Handle,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>, runtime: Handle) -> Self {
        Self {
            root: root.into(),
            runtime,
        }
    }
}

impl ImageLoader<Image> for FileLoader {
    fn load(&mut self, completion: Completion<Image>) {
        let relative = Path::new(completion.asset().trim_start_matches('/'));

        // References come from the server and must stay under `root`.
        if relative
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            let asset = completion.asset().to_string();
            completion.finish(Err(AssetError::Read {
                asset,
                reason: "reference escapes the asset root".to_string(),
            }));
            return;
        }

        let path = self.root.join(relative);

        self.runtime.spawn(async move {
            let asset = completion.asset().to_string();

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    completion.finish(Err(AssetError::Read {
                        asset,
                        reason: e.to_string(),
                    }));
                    return;
                }
            };

            let decoded = tokio::task::spawn_blocking(move || {
                Image::from_file_with_format(&bytes, None).map_err(|e| format!("{:?}", e))
            })
            .await;

            let result = match decoded {
                Ok(Ok(image)) => Ok(image),
                Ok(Err(reason)) => Err(AssetError::Decode { asset, reason }),
                Err(e) => Err(AssetError::Decode {
                    asset,
                    reason: e.to_string(),
                }),
            };
            completion.finish(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Direction;

    #[derive(Debug, Clone, PartialEq)]
    struct FakeImage(String);

    fn cache_with_loader() -> (ImageCache<FakeImage>, ManualLoader<FakeImage>) {
        let loader = ManualLoader::new();
        let cache = ImageCache::new(Box::new(loader.clone()));
        (cache, loader)
    }

    #[test]
    fn test_first_request_is_pending() {
        let (mut cache, loader) = cache_with_loader();

        assert!(matches!(cache.request("a.png"), ImageState::Pending));
        assert_eq!(loader.load_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_repeated_requests_start_one_load() {
        let (mut cache, loader) = cache_with_loader();

        cache.request("a.png");
        cache.request("a.png");
        cache.request("a.png");

        assert_eq!(loader.load_count(), 1);
        assert_eq!(loader.queued_assets(), vec!["a.png".to_string()]);
    }

    #[test]
    fn test_completion_transitions_to_ready() {
        let (mut cache, loader) = cache_with_loader();
        cache.request("a.png");

        assert!(loader.complete("a.png", Ok(FakeImage("a".into()))));
        assert!(cache.get("a.png").is_none());

        assert_eq!(cache.poll_completions(), 1);
        assert_eq!(cache.get("a.png"), Some(&FakeImage("a".into())));
        assert!(cache.request("a.png").is_ready());
        assert_eq!(loader.load_count(), 1);
    }

    #[test]
    fn test_failure_is_permanent() {
        let (mut cache, loader) = cache_with_loader();
        cache.request("broken.png");

        loader.complete(
            "broken.png",
            Err(AssetError::Decode {
                asset: "broken.png".into(),
                reason: "bad header".into(),
            }),
        );
        cache.poll_completions();

        assert!(matches!(cache.request("broken.png"), ImageState::Failed));
        assert!(cache.get("broken.png").is_none());
        assert_eq!(loader.load_count(), 1);
        assert_eq!(cache.counts().failed, 1);
    }

    #[test]
    fn test_completions_apply_in_any_order() {
        let (mut cache, loader) = cache_with_loader();
        cache.request("a.png");
        cache.request("b.png");

        loader.complete("b.png", Ok(FakeImage("b".into())));
        cache.poll_completions();
        assert!(cache.get("a.png").is_none());
        assert!(cache.get("b.png").is_some());

        loader.complete("a.png", Ok(FakeImage("a".into())));
        cache.poll_completions();
        assert!(cache.get("a.png").is_some());
        assert_eq!(
            cache.counts(),
            CacheCounts {
                pending: 0,
                ready: 2,
                failed: 0
            }
        );
    }

    #[test]
    fn test_ready_entry_is_immutable() {
        let (mut cache, _loader) = cache_with_loader();
        cache.request("a.png");

        // A misbehaving loader reporting twice must not overwrite the first result.
        cache
            .completion_tx
            .send(("a.png".to_string(), Ok(FakeImage("first".into()))))
            .unwrap();
        cache
            .completion_tx
            .send(("a.png".to_string(), Ok(FakeImage("second".into()))))
            .unwrap();

        assert_eq!(cache.poll_completions(), 1);
        assert_eq!(cache.get("a.png"), Some(&FakeImage("first".into())));
    }

    #[test]
    fn test_preload_requests_every_frame_once() {
        let (mut cache, loader) = cache_with_loader();
        let avatar = Avatar::new("knight")
            .with_frames(Direction::East, ["e0.png", "e1.png"])
            .with_frames(Direction::South, ["s0.png", "e0.png"]);

        cache.preload_avatar(&avatar);
        cache.preload_avatar(&avatar);

        assert_eq!(loader.load_count(), 3);
        assert_eq!(cache.counts().pending, 3);
    }

    #[test]
    fn test_complete_all() {
        let (mut cache, loader) = cache_with_loader();
        cache.request("a.png");
        cache.request("b.png");

        assert_eq!(loader.complete_all(|asset| FakeImage(asset.to_string())), 2);
        cache.poll_completions();

        assert_eq!(cache.get("b.png"), Some(&FakeImage("b.png".into())));
        assert!(loader.queued_assets().is_empty());
    }

    #[tokio::test]
    async fn test_file_loader_reports_missing_file() {
        let loader = FileLoader::new("/nonexistent-asset-root", Handle::current());
        let mut cache: ImageCache<Image> = ImageCache::new(Box::new(loader));

        cache.request("missing.png");

        for _ in 0..100 {
            if cache.poll_completions() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(matches!(cache.get_state("missing.png"), ImageState::Failed));
    }

    #[tokio::test]
    async fn test_file_loader_rejects_parent_references() {
        let loader = FileLoader::new("assets", Handle::current());
        let mut cache: ImageCache<Image> = ImageCache::new(Box::new(loader));

        cache.request("../secret.png");
        cache.request("/skins/../../etc/passwd");

        // Rejected before any I/O is spawned.
        assert_eq!(cache.poll_completions(), 2);
        assert!(matches!(cache.get_state("../secret.png"), ImageState::Failed));
        assert!(matches!(
            cache.get_state("/skins/../../etc/passwd"),
            ImageState::Failed
        ));
        assert_eq!(cache.counts().failed, 2);
    }
}
