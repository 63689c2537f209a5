//! Real-time side of the backing-track player.
//!
//! [`build_graph`] splits the engine into a [`RenderGraph`], which is moved
//! onto the audio thread by an [`OutputDevice`], and an [`EngineHandle`]
//! that stays with the control side. The two halves only talk through
//! lock-free ring buffers; buffers that cross over are wrapped in
//! [`basedrop::Shared`] so the audio thread never frees memory.

mod analyser;
mod click;
mod cpal_output;
mod error;
mod graph;
mod output;
mod pitch;
mod ramp;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use backtrack_transport::{Command, Status};
use basedrop::{Collector, Handle, Shared};

pub use analyser::Analyser;
pub use click::{ClickEvent, ClickSound, synthesize};
pub use cpal_output::CpalOutput;
pub use error::{AudioError, AudioResult};
pub use graph::{GraphConfig, RENDER_QUANTUM, RenderGraph};
pub use output::{OfflineDriver, OfflineOutput, OutputConfig, OutputDevice};
pub use pitch::{MAX_RATIO, MIN_RATIO, PASSTHROUGH_LATENCY, PitchShifter};
pub use ramp::Ramp;

/// Samples each analysis tap can hold before the render thread starts
/// dropping them.
pub const TAP_CAPACITY: usize = 4096;

const STATUS_CAPACITY: usize = 256;
const CLICK_CAPACITY: usize = 64;

/// Sends commands to the render thread.
pub struct CommandSender {
    producer: rtrb::Producer<Command>,
    handle: Handle,
}

impl CommandSender {
    /// Queue a command without blocking. A full queue hands the command back.
    pub fn send(&mut self, cmd: Command) -> Result<(), Command> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    /// Wrap a value for hand-over to the render thread.
    pub fn share<T: Send + 'static>(&self, value: T) -> Shared<T> {
        Shared::new(&self.handle, value)
    }
}

/// Control-side half of a render graph.
pub struct EngineHandle {
    pub commands: CommandSender,
    pub status: rtrb::Consumer<Status>,
    clicks: Option<rtrb::Producer<ClickEvent>>,
    taps: Vec<Option<rtrb::Consumer<f32>>>,
    master_tap: Option<rtrb::Consumer<f32>>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    channels: u16,
    collector: Collector,
}

impl EngineHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn max_tracks(&self) -> usize {
        self.taps.len()
    }

    /// Frames the render thread has produced so far. This is the engine clock.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// The engine clock in seconds.
    pub fn seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn handle(&self) -> Handle {
        self.collector.handle()
    }

    pub fn take_click_producer(&mut self) -> Option<rtrb::Producer<ClickEvent>> {
        self.clicks.take()
    }

    pub fn take_tap(&mut self, slot: usize) -> Option<rtrb::Consumer<f32>> {
        self.taps.get_mut(slot).and_then(Option::take)
    }

    pub fn take_master_tap(&mut self) -> Option<rtrb::Consumer<f32>> {
        self.master_tap.take()
    }

    /// Free everything the render thread has let go of.
    pub fn collect(&mut self) {
        self.collector.collect();
    }
}

/// Allocate a render graph and its control handle.
pub fn build_graph(config: GraphConfig) -> (EngineHandle, RenderGraph) {
    let collector = Collector::new();
    let handle = collector.handle();

    let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(config.command_capacity.max(16));
    let (status_tx, status_rx) = rtrb::RingBuffer::<Status>::new(STATUS_CAPACITY);
    let (click_tx, click_rx) = rtrb::RingBuffer::<ClickEvent>::new(CLICK_CAPACITY);
    let (master_tap_tx, master_tap_rx) = rtrb::RingBuffer::<f32>::new(TAP_CAPACITY);

    let (tap_txs, tap_rxs): (Vec<_>, Vec<_>) = (0..config.max_tracks)
        .map(|_| rtrb::RingBuffer::<f32>::new(TAP_CAPACITY))
        .unzip();

    let frames = Arc::new(AtomicU64::new(0));

    let graph = RenderGraph::new(
        &config,
        graph::GraphParts {
            commands: command_rx,
            status: status_tx,
            clicks: click_rx,
            taps: tap_txs,
            master_tap: master_tap_tx,
            frames: frames.clone(),
        },
    );

    let engine = EngineHandle {
        commands: CommandSender {
            producer: command_tx,
            handle,
        },
        status: status_rx,
        clicks: Some(click_tx),
        taps: tap_rxs.into_iter().map(Some).collect(),
        master_tap: Some(master_tap_rx),
        frames,
        sample_rate: config.sample_rate,
        channels: config.channels.max(1),
        collector,
    };

    (engine, graph)
}
