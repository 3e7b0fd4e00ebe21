//! Decoding audio files into per-channel f32 waveforms.
//!
//! Any container/codec symphonia knows about is accepted (WAV, FLAC, MP3,
//! Ogg/Vorbis, AAC). Writing is limited to 16-bit PCM WAV, which is all the
//! tests and fixtures need.

use crate::error::PipelineError;
use crate::perf::{self, Metric};
use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

#[derive(Debug, Default)]
pub struct AudioIo;

impl AudioIo {
    /// Decode an audio file into `(channels, sample_rate)`.
    ///
    /// Every failure is reported as [`PipelineError::Decode`].
    pub fn read_audio(path: impl AsRef<Path>) -> Result<(Vec<Vec<f32>>, u32)> {
        let path = path.as_ref();
        let _span = perf::span(Metric::AudioDecode);
        let decoded = decode_file(path).map_err(|source| PipelineError::decode(path, source))?;
        perf::add_count(
            Metric::AudioSamples,
            decoded.0.first().map(|c| c.len()).unwrap_or(0) as u64,
        );
        Ok(decoded)
    }

    /// Decode an audio file and average its channels into one.
    pub fn read_mono(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32)> {
        let path = path.as_ref();
        let (channels, sample_rate) = Self::read_audio(path)?;
        Ok((Self::downmix_decoded(path, channels)?, sample_rate))
    }

    /// [`Self::to_mono`] for channels decoded from `path`; a bad layout is a decode failure.
    fn downmix_decoded(path: &Path, channels: Vec<Vec<f32>>) -> Result<Vec<f32>> {
        Self::to_mono(channels).map_err(|err| PipelineError::decode(path, err).into())
    }

    /// Average all channels into a single waveform.
    pub fn to_mono(mut channels: Vec<Vec<f32>>) -> Result<Vec<f32>> {
        match channels.len() {
            0 => Ok(Vec::new()),
            1 => Ok(channels.swap_remove(0)),
            count => {
                let len = channels[0].len();
                let mut mixed = vec![0.0_f32; len];
                for channel in &channels {
                    if channel.len() != len {
                        anyhow::bail!("Channel length mismatch in mono downmix");
                    }
                    for (acc, value) in mixed.iter_mut().zip(channel) {
                        *acc += *value;
                    }
                }
                let scale = 1.0 / count as f32;
                for value in &mut mixed {
                    *value *= scale;
                }
                Ok(mixed)
            }
        }
    }

    pub fn write_wav(
        path: impl AsRef<Path>,
        samples: &[Vec<f32>],
        sample_rate: u32,
    ) -> Result<()> {
        if samples.is_empty() {
            anyhow::bail!("No audio channels provided");
        }
        let channels = samples.len() as u16;
        let len = samples[0].len();
        for channel in samples.iter().skip(1) {
            if channel.len() != len {
                anyhow::bail!("Channel length mismatch in WAV write");
            }
        }

        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec)?;

        for idx in 0..len {
            for channel in samples {
                let value = channel[idx].clamp(-1.0, 1.0);
                let scaled = (value * i16::MAX as f32).round() as i16;
                writer.write_sample(scaled)?;
            }
        }

        writer.finalize()?;
        Ok(())
    }
}

type DecodeResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn decode_file(path: &Path) -> DecodeResult<(Vec<Vec<f32>>, u32)> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let opened = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = opened.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or("no supported audio track")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channel_count = track.codec_params.channels.map(|c| c.count());

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut channels: Vec<Vec<f32>> = channel_count
        .map(|count| vec![Vec::new(); count])
        .unwrap_or_default();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt packet drops its frames; the rest of the stream is still usable.
            Err(SymphoniaError::DecodeError(reason)) => {
                log::debug!("skipping undecodable packet: {reason}");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let spec = *decoded.spec();
        let count = spec.channels.count();
        if count == 0 {
            continue;
        }
        sample_rate.get_or_insert(spec.rate);
        track_channel_layout(&mut channels, &mut channel_count, count)?;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        for frame in buffer.samples().chunks_exact(count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
    }

    let sample_rate = sample_rate.ok_or("unknown sample rate")?;
    if sample_rate == 0 {
        return Err("sample rate must be positive".into());
    }
    if channels.is_empty() {
        channels.push(Vec::new());
    }
    Ok((channels, sample_rate))
}

/// Keep one buffer per channel; the layout may only change before any frame is stored.
fn track_channel_layout(
    channels: &mut Vec<Vec<f32>>,
    channel_count: &mut Option<usize>,
    count: usize,
) -> DecodeResult<()> {
    match *channel_count {
        Some(expected) if expected == count && channels.len() == count => Ok(()),
        Some(expected) if channels.iter().any(|c| !c.is_empty()) => Err(format!(
            "channel count changed mid-stream from {expected} to {count}"
        )
        .into()),
        _ => {
            *channel_count = Some(count);
            *channels = vec![Vec::new(); count];
            Ok(())
        }
    }
}
