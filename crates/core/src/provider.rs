use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::RwLock;

use backtrack_decode::{AudioResource, load_resource};
use backtrack_transport::{Track, TrackId};

pub type ResolveFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<Option<AudioResource>>> + Send + 'a>>;

/// Supplies the encoded audio of a track.
///
/// `Ok(None)` means the provider has nothing for the track; errors are
/// failures of the provider itself. Both leave only that track out of a song.
pub trait AudioSourceProvider: Send + Sync {
    fn resolve<'a>(&'a self, track: &'a Track) -> ResolveFuture<'a>;
}

/// Resources held in memory, keyed by track id.
#[derive(Default)]
pub struct MemorySourceProvider {
    resources: RwLock<HashMap<TrackId, AudioResource>>,
}

impl MemorySourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TrackId, resource: AudioResource) {
        if let Ok(mut map) = self.resources.write() {
            map.insert(id, resource);
        }
    }

    pub fn with(self, id: TrackId, resource: AudioResource) -> Self {
        self.insert(id, resource);
        self
    }

    pub fn remove(&self, id: TrackId) -> Option<AudioResource> {
        self.resources.write().ok()?.remove(&id)
    }
}

impl AudioSourceProvider for MemorySourceProvider {
    fn resolve<'a>(&'a self, track: &'a Track) -> ResolveFuture<'a> {
        Box::pin(async move {
            let map = self
                .resources
                .read()
                .map_err(|_| anyhow::anyhow!("resource map lock poisoned"))?;
            Ok(map.get(&track.id).cloned())
        })
    }
}

/// Resources read from disk. A track without a registered path falls back to
/// its `resource` field.
#[derive(Default)]
pub struct FileSourceProvider {
    paths: RwLock<HashMap<TrackId, PathBuf>>,
}

impl FileSourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TrackId, path: impl Into<PathBuf>) {
        if let Ok(mut map) = self.paths.write() {
            map.insert(id, path.into());
        }
    }

    fn path_for(&self, track: &Track) -> Option<PathBuf> {
        let registered = self
            .paths
            .read()
            .ok()
            .and_then(|map| map.get(&track.id).cloned());
        registered.or_else(|| (!track.resource.is_empty()).then(|| PathBuf::from(&track.resource)))
    }
}

impl AudioSourceProvider for FileSourceProvider {
    fn resolve<'a>(&'a self, track: &'a Track) -> ResolveFuture<'a> {
        let path = self.path_for(track);
        Box::pin(async move {
            let Some(path) = path else {
                return Ok(None);
            };
            let read = tokio::task::spawn_blocking(move || {
                if !path.exists() {
                    return Ok(None);
                }
                load_resource(&path).map(Some)
            });
            Ok(read.await??)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn memory_provider_resolves_by_id() {
        let provider = MemorySourceProvider::new().with(TrackId(1), AudioResource::new(vec![1u8, 2, 3]));
        let known = Track::new(TrackId(1), "Drums");
        let unknown = Track::new(TrackId(2), "Bass");

        let resource = provider.resolve(&known).await.unwrap().unwrap();
        assert_eq!(resource.bytes(), &[1, 2, 3]);
        assert!(provider.resolve(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_provider_reads_registered_and_fallback_paths() {
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(b"RIFF").unwrap();
        file.flush().unwrap();

        let provider = FileSourceProvider::new();
        provider.insert(TrackId(1), file.path());
        let registered = Track::new(TrackId(1), "Keys");
        let by_resource =
            Track::new(TrackId(2), "Pads").with_resource(file.path().to_string_lossy().into_owned());
        let missing = Track::new(TrackId(3), "Vox").with_resource("/definitely/not/here.wav");

        let resource = provider.resolve(&registered).await.unwrap().unwrap();
        assert_eq!(resource.extension(), Some("wav"));
        assert!(provider.resolve(&by_resource).await.unwrap().is_some());
        assert!(provider.resolve(&missing).await.unwrap().is_none());
        assert!(provider.resolve(&Track::new(TrackId(4), "Empty")).await.unwrap().is_none());
    }
}
