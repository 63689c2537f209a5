//! Decoding of in-memory audio resources.
//!
//! A resource is decoded in two steps so playback can begin early: a short
//! preview prefix first, then the remainder of the stream on the same decoder.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use backtrack_transport::AudioArc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Encoded bytes of one track as handed over by a source provider.
#[derive(Debug, Clone)]
pub struct AudioResource {
    bytes: Arc<[u8]>,
    extension: Option<String>,
}

impl AudioResource {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            extension: None,
        }
    }

    /// File extension used as a container hint (`"wav"`, `"mp3"`, ...).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Read a file into an [`AudioResource`], keeping its extension as the hint.
pub fn load_resource(path: &Path) -> std::io::Result<AudioResource> {
    let bytes = std::fs::read(path)?;
    let resource = AudioResource::new(bytes);
    Ok(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => resource.with_extension(ext),
        None => resource,
    })
}

pub fn decode_file(path: &Path) -> anyhow::Result<AudioArc> {
    let resource = load_resource(path)?;
    decode_resource(&resource)
}

/// Decode a whole resource in one go.
pub fn decode_resource(resource: &AudioResource) -> anyhow::Result<AudioArc> {
    ProgressiveDecoder::open(resource)?.finish()
}

/// Leading part of a track decoded ahead of the rest.
#[derive(Debug, Clone)]
pub struct Preview {
    pub audio: AudioArc,
    /// The stream ended inside the preview window, so `audio` is the whole track.
    pub complete: bool,
}

/// A decoder that can hand out a prefix of the track before finishing it.
pub struct ProgressiveDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    n_frames: Option<u64>,
    samples: Vec<f32>,
    sample_buf: Option<SampleBuffer<f32>>,
    finished: bool,
}

impl ProgressiveDecoder {
    pub fn open(resource: &AudioResource) -> anyhow::Result<Self> {
        if resource.is_empty() {
            anyhow::bail!("audio resource is empty");
        }

        let source = Cursor::new(resource.bytes.clone());
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = resource.extension() {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow::anyhow!("no decodable audio track"))?;

        let sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);
        let n_frames = track.codec_params.n_frames;
        let track_id = track.id;

        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            n_frames,
            samples: Vec::new(),
            sample_buf: None,
            finished: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Duration announced by the container, if it carries a frame count.
    pub fn estimated_duration(&self) -> Option<f64> {
        match (self.n_frames, self.sample_rate) {
            (Some(frames), rate) if rate > 0 => Some(frames as f64 / rate as f64),
            _ => None,
        }
    }

    pub fn decoded_frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Decode at least `seconds` of audio (or up to the end of the stream) and
    /// return a copy of everything decoded so far.
    pub fn preview(&mut self, seconds: f64) -> anyhow::Result<Preview> {
        let wanted = (seconds.max(0.0) * self.sample_rate.max(1) as f64).ceil() as usize;
        self.decode_until(wanted.max(1))?;
        if self.samples.is_empty() {
            anyhow::bail!("stream contains no audio frames");
        }
        Ok(Preview {
            audio: AudioArc::new(self.samples.clone(), self.sample_rate, self.channels),
            complete: self.finished,
        })
    }

    /// Decode the rest of the stream.
    pub fn finish(mut self) -> anyhow::Result<AudioArc> {
        self.decode_until(usize::MAX)?;
        if self.samples.is_empty() {
            anyhow::bail!("stream contains no audio frames");
        }
        Ok(AudioArc::new(self.samples, self.sample_rate, self.channels))
    }

    fn decode_until(&mut self, frames: usize) -> anyhow::Result<()> {
        while !self.finished && self.decoded_frames() < frames {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.finished = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::debug!("skipping corrupt packet: {msg}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count() as u16;
            if self.samples.is_empty() {
                self.channels = channels;
                if self.sample_rate == 0 {
                    self.sample_rate = spec.rate;
                }
            } else if channels != self.channels {
                log::debug!("skipping packet with {channels} channels, expected {}", self.channels);
                continue;
            }

            let capacity = decoded.capacity() as u64;
            let buf = match &mut self.sample_buf {
                Some(buf) if buf.capacity() as u64 >= capacity * channels as u64 => buf,
                slot => slot.insert(SampleBuffer::<f32>::new(capacity, spec)),
            };
            buf.copy_interleaved_ref(decoded);
            self.samples.extend_from_slice(buf.samples());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;
    use std::io::Write;

    fn wav_bytes(sample_rate: u32, channels: u16, seconds: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let frames = (sample_rate as f32 * seconds) as usize;
            for i in 0..frames {
                let value = (2.0 * PI * 220.0 * i as f32 / sample_rate as f32).sin() * 0.5;
                for _ in 0..channels {
                    writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_whole_wav() {
        let resource = AudioResource::new(wav_bytes(8000, 2, 1.0)).with_extension("wav");
        let audio = decode_resource(&resource).unwrap();
        assert_eq!(audio.sample_rate(), 8000);
        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.frames(), 8000);
    }

    #[test]
    fn preview_is_a_prefix_of_the_full_decode() {
        let resource = AudioResource::new(wav_bytes(8000, 1, 2.0)).with_extension("wav");
        let mut decoder = ProgressiveDecoder::open(&resource).unwrap();
        assert_eq!(decoder.estimated_duration(), Some(2.0));

        let preview = decoder.preview(0.25).unwrap();
        assert!(!preview.complete);
        assert!(preview.audio.frames() >= 2000);
        assert!(preview.audio.frames() < 16000);

        let full = decoder.finish().unwrap();
        assert_eq!(full.frames(), 16000);
        let n = preview.audio.len();
        assert_eq!(&full.samples()[..n], preview.audio.samples());
    }

    #[test]
    fn short_stream_completes_inside_preview() {
        let resource = AudioResource::new(wav_bytes(8000, 2, 0.1)).with_extension("wav");
        let mut decoder = ProgressiveDecoder::open(&resource).unwrap();
        let preview = decoder.preview(5.0).unwrap();
        assert!(preview.complete);
        assert_eq!(preview.audio.frames(), 800);
    }

    #[test]
    fn rejects_empty_and_garbage_payloads() {
        assert!(ProgressiveDecoder::open(&AudioResource::new(Vec::new())).is_err());
        let garbage = AudioResource::new(vec![0x42u8; 4096]);
        assert!(decode_resource(&garbage).is_err());
    }

    #[test]
    fn decodes_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(&wav_bytes(8000, 1, 0.5)).unwrap();
        file.flush().unwrap();

        let resource = load_resource(file.path()).unwrap();
        assert_eq!(resource.extension(), Some("wav"));
        let audio = decode_file(file.path()).unwrap();
        assert_eq!(audio.frames(), 4000);
    }
}
