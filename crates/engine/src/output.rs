use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{AudioError, AudioResult};
use crate::graph::RenderGraph;

/// Format the device will be driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A sink that pulls audio out of a [`RenderGraph`].
///
/// Not `Send`: platform streams usually have to stay on the thread that
/// created them.
pub trait OutputDevice {
    /// Query the device and pick the format the graph must render in.
    fn open(&mut self) -> AudioResult<OutputConfig>;

    /// Hand the graph over and start pulling from it. A device that could
    /// not start reports itself as suspended instead of failing.
    fn start(&mut self, graph: RenderGraph) -> AudioResult<()>;

    fn is_suspended(&self) -> bool;

    fn resume(&mut self) -> AudioResult<()>;

    fn close(&mut self);
}

#[derive(Default)]
struct OfflineShared {
    graph: Mutex<Option<RenderGraph>>,
    suspended: AtomicBool,
    fail_resume: AtomicBool,
    closed: AtomicBool,
}

/// Device without hardware: audio is rendered on demand through the paired
/// [`OfflineDriver`]. Used for tests and for bouncing a mix to a buffer.
pub struct OfflineOutput {
    config: OutputConfig,
    shared: Arc<OfflineShared>,
}

/// Pulls frames from an [`OfflineOutput`] and controls its suspended state.
#[derive(Clone)]
pub struct OfflineDriver {
    config: OutputConfig,
    shared: Arc<OfflineShared>,
}

impl OfflineOutput {
    pub fn new(sample_rate: u32, channels: u16) -> (Self, OfflineDriver) {
        let config = OutputConfig {
            sample_rate,
            channels: channels.max(1),
        };
        let shared = Arc::new(OfflineShared::default());
        (
            Self {
                config,
                shared: shared.clone(),
            },
            OfflineDriver { config, shared },
        )
    }
}

impl OutputDevice for OfflineOutput {
    fn open(&mut self) -> AudioResult<OutputConfig> {
        self.shared.closed.store(false, Ordering::Release);
        Ok(self.config)
    }

    fn start(&mut self, graph: RenderGraph) -> AudioResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(AudioError::NotOpen);
        }
        let mut slot = self
            .shared
            .graph
            .lock()
            .map_err(|_| AudioError::StreamBuild("render graph lock poisoned".into()))?;
        *slot = Some(graph);
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Acquire)
    }

    fn resume(&mut self) -> AudioResult<()> {
        if self.shared.fail_resume.load(Ordering::Acquire) {
            return Err(AudioError::StreamPlay("device refused to resume".into()));
        }
        self.shared.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Ok(mut slot) = self.shared.graph.lock() {
            slot.take();
        }
    }
}

impl OfflineDriver {
    pub fn config(&self) -> OutputConfig {
        self.config
    }

    pub fn is_started(&self) -> bool {
        self.shared
            .graph
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.shared.suspended.store(suspended, Ordering::Release);
    }

    /// Make the next `resume` calls fail.
    pub fn set_fail_resume(&self, fail: bool) {
        self.shared.fail_resume.store(fail, Ordering::Release);
    }

    /// Render `frames` interleaved frames. Returns silence while suspended or
    /// before the graph was started; the clock only moves while rendering.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.config.channels as usize];
        if self.shared.suspended.load(Ordering::Acquire) {
            return out;
        }
        if let Ok(mut slot) = self.shared.graph.lock() {
            if let Some(graph) = slot.as_mut() {
                graph.process(&mut out);
            }
        }
        out
    }

    /// Render `seconds` worth of audio in device-sized chunks.
    pub fn render_seconds(&self, seconds: f64) -> Vec<f32> {
        const CHUNK: usize = 512;
        let total = (seconds * self.config.sample_rate as f64).round() as usize;
        let mut out = Vec::with_capacity(total * self.config.channels as usize);
        let mut done = 0;
        while done < total {
            let n = CHUNK.min(total - done);
            out.extend(self.render(n));
            done += n;
        }
        out
    }
}
