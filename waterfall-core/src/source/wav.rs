//! WAV file source backed by hound.
//!
//! Decode happens eagerly at `open` time (with mono mixdown and optional
//! resampling), so `stream` is a replayable walk over an in-memory buffer
//! and `regenerate_spectrogram` never re-reads the file.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use tracing::info;

use crate::error::{Result, WaterfallError};
use crate::producer::SampleWriter;
use crate::source::resample::RateConverter;
use crate::source::{AudioInformation, AudioSource, BufferSource, ReadySignal};

#[derive(Debug)]
pub struct WavSource {
    buffer: BufferSource,
    info: AudioInformation,
}

impl WavSource {
    /// Decode `path` at its native sample rate.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_rate(path, None)
    }

    /// Decode `path`, resampling to `analysis_rate` when it differs from
    /// the file's native rate.
    pub fn open_with_rate<P: AsRef<Path>>(path: P, analysis_rate: Option<u32>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader =
            WavReader::open(path).map_err(|e| WaterfallError::SourceDecode(e.to_string()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1);

        let mono = decode_mono(&mut reader, channels as usize)?;

        let target_rate = analysis_rate.unwrap_or(spec.sample_rate);
        let samples = if target_rate == spec.sample_rate {
            mono
        } else {
            RateConverter::new(spec.sample_rate, target_rate)?.convert(&mono)?
        };

        info!(
            path = %path.display(),
            native_rate = spec.sample_rate,
            target_rate,
            channels,
            samples = samples.len(),
            "decoded wav source"
        );

        let mut info = AudioInformation::from_sample_count(target_rate, samples.len() as u64, 1);
        info.channels = channels;
        Ok(Self {
            buffer: BufferSource::new(samples, target_rate),
            info,
        })
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.buffer = self.buffer.with_block_size(block_size);
        self
    }
}

impl AudioSource for WavSource {
    fn info(&self) -> AudioInformation {
        self.info
    }

    fn stream(&self, writer: SampleWriter, ready: ReadySignal) {
        self.buffer.stream(writer, ready);
    }
}

fn decode_mono<R: std::io::Read>(
    reader: &mut WavReader<R>,
    channels: usize,
) -> Result<Vec<f32>> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| WaterfallError::SourceDecode(e.to_string()))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| WaterfallError::SourceDecode(e.to_string()))?
        }
    };

    if channels <= 1 {
        return Ok(interleaved);
    }

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for frame in interleaved.chunks_exact(channels) {
        mono.push(frame.iter().sum::<f32>() / channels as f32);
    }
    Ok(mono)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    fn write_test_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _c in 0..channels {
                let v = ((i as f32 * 0.05).sin() * 12_000.0) as i16;
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_stereo_to_mono_at_native_rate() {
        let dir = std::env::temp_dir();
        let path = dir.join("waterfall_test_stereo.wav");
        write_test_wav(&path, 2, 22_050, 2_000);

        let source = WavSource::open(&path).unwrap();
        let info = source.info();
        assert_eq!(info.sample_rate, 22_050);
        assert_eq!(info.channels, 2);
        assert_eq!(info.total_samples(), 2_000);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn resamples_to_requested_analysis_rate() {
        let dir = std::env::temp_dir();
        let path = dir.join("waterfall_test_resample.wav");
        write_test_wav(&path, 1, 48_000, 9_600);

        let source = WavSource::open_with_rate(&path, Some(16_000)).unwrap();
        let info = source.info();
        assert_eq!(info.sample_rate, 16_000);
        // 9 600 frames at 48 kHz ≈ 3 200 at 16 kHz, with tolerance for the
        // interpolation tail.
        assert!(
            (info.total_samples() as i64 - 3_200).unsigned_abs() <= 400,
            "unexpected sample count {}",
            info.total_samples()
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_a_source_decode_error() {
        assert!(matches!(
            WavSource::open("/definitely/not/here.wav"),
            Err(WaterfallError::SourceDecode(_))
        ));
    }
}
