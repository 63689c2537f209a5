use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};

use crate::error::{AudioError, AudioResult};
use crate::graph::RenderGraph;
use crate::output::{OutputConfig, OutputDevice};

/// Frames converted per pass when the device wants a non-`f32` format.
const SCRATCH_FRAMES: usize = 4096;

/// The system's default output device.
#[derive(Default)]
pub struct CpalOutput {
    device: Option<cpal::Device>,
    config: Option<cpal::SupportedStreamConfig>,
    stream: Option<cpal::Stream>,
    suspended: bool,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputDevice for CpalOutput {
    fn open(&mut self) -> AudioResult<OutputConfig> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::Config(e.to_string()))?;

        let output = OutputConfig {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        };
        log::info!(
            "output device {:?}: {} Hz, {} channels, {}",
            device.name().unwrap_or_default(),
            output.sample_rate,
            output.channels,
            config.sample_format()
        );

        self.device = Some(device);
        self.config = Some(config);
        Ok(output)
    }

    fn start(&mut self, graph: RenderGraph) -> AudioResult<()> {
        let (Some(device), Some(config)) = (&self.device, &self.config) else {
            return Err(AudioError::NotOpen);
        };

        let stream_config: cpal::StreamConfig = config.clone().into();
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(device, &stream_config, graph)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(device, &stream_config, graph)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(device, &stream_config, graph)?,
            cpal::SampleFormat::I32 => build_stream::<i32>(device, &stream_config, graph)?,
            sample_format => return Err(AudioError::UnsupportedFormat(sample_format.to_string())),
        };

        // Some hosts refuse to start until the user interacts with them; keep
        // the stream and let `resume` retry.
        self.suspended = match stream.play() {
            Ok(()) => false,
            Err(e) => {
                log::warn!("output stream did not start, marking suspended: {e}");
                true
            }
        };
        self.stream = Some(stream);
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> AudioResult<()> {
        let stream = self.stream.as_ref().ok_or(AudioError::NotOpen)?;
        stream
            .play()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))?;
        self.suspended = false;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("pausing output stream on close: {e}");
            }
        }
        self.device = None;
        self.config = None;
        self.suspended = false;
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut graph: RenderGraph,
) -> AudioResult<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut scratch = vec![0.0f32; SCRATCH_FRAMES * channels];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(scratch.len()) {
                    let buf = &mut scratch[..chunk.len()];
                    graph.process(buf);
                    for (out, &sample) in chunk.iter_mut().zip(buf.iter()) {
                        *out = T::from_sample(sample);
                    }
                }
            },
            |err| log::error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))
}
