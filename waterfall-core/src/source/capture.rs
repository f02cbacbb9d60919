//! Live input capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate after warm-up, block on a mutex or condvar, or
//! perform I/O. `SampleWriter::write_block` honours that contract: its only
//! wait is a bounded spin on the hand-off flag.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so the stream is created and dropped inside `stream`, which the
//! controller runs on a single blocking thread.

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{Result, WaterfallError};
use crate::producer::{SampleWriter, WriteOutcome};
use crate::source::{AudioInformation, AudioSource, ReadySignal};

/// Polling interval for the supervising thread while the callback runs.
const CAPTURE_POLL: Duration = Duration::from_millis(20);

/// Names of every available input device, for configuration UIs.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| WaterfallError::AudioDevice(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Captures a fixed span of live audio from an input device.
///
/// The device's native sample rate and channel count are probed at `open`
/// time so the analysis dimensions are known before streaming starts. The
/// device itself is re-opened on every `stream` call, which keeps the
/// `!Send` stream off the source type and makes the source replayable.
#[derive(Debug)]
pub struct CaptureSource {
    preferred_device: Option<String>,
    info: AudioInformation,
}

/// Handles shared with a playing capture stream.
struct ActiveCapture {
    /// Kept alive so the stream is not dropped prematurely.
    stream: Stream,
    /// Set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Mono samples pushed so far, capped at the announced span.
    delivered: Arc<AtomicU64>,
}

impl CaptureSource {
    /// Probe the input device and fix the capture span to `duration_secs`.
    pub fn open(preferred_device: Option<String>, duration_secs: f64) -> Result<Self> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(WaterfallError::InvalidOptions(format!(
                "capture duration must be positive, got {duration_secs}"
            )));
        }
        let device = select_device(preferred_device.as_deref())?;
        let supported = device
            .default_input_config()
            .map_err(|e| WaterfallError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate, channels, duration_secs, "probed capture device"
        );

        Ok(Self {
            preferred_device,
            info: AudioInformation::from_duration(sample_rate, duration_secs, channels),
        })
    }

    /// Open the device, build the callback, and start it playing.
    fn start_capture(&self, writer: &SampleWriter) -> Result<ActiveCapture> {
        let device = select_device(self.preferred_device.as_deref())?;
        let supported = device
            .default_input_config()
            .map_err(|e| WaterfallError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        if sample_rate != self.info.sample_rate {
            return Err(WaterfallError::AudioDevice(format!(
                "device rate changed since open: {} -> {}",
                self.info.sample_rate, sample_rate
            )));
        }

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let total = self.info.total_samples();
        let delivered = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let ch = channels as usize;
                let writer = writer.clone();
                let delivered = Arc::clone(&delivered);
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        let frames = data.len() / ch;
                        mix_buf.resize(frames, 0.0);
                        if ch == 1 {
                            mix_buf.copy_from_slice(&data[..frames]);
                        } else {
                            for f in 0..frames {
                                let mut sum = 0f32;
                                let base = f * ch;
                                for c in 0..ch {
                                    sum += data[base + c];
                                }
                                mix_buf[f] = sum / ch as f32;
                            }
                        }
                        push_capped(&writer, &mix_buf, total, &delivered, &running_f32);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let ch = channels as usize;
                let writer = writer.clone();
                let delivered = Arc::clone(&delivered);
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        let frames = data.len() / ch;
                        mix_buf.resize(frames, 0.0);
                        if ch == 1 {
                            for (idx, sample) in data.iter().take(frames).enumerate() {
                                mix_buf[idx] = *sample as f32 / 32768.0;
                            }
                        } else {
                            for f in 0..frames {
                                let mut sum = 0f32;
                                let base = f * ch;
                                for c in 0..ch {
                                    sum += data[base + c] as f32 / 32768.0;
                                }
                                mix_buf[f] = sum / ch as f32;
                            }
                        }
                        push_capped(&writer, &mix_buf, total, &delivered, &running_i16);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(WaterfallError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| WaterfallError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| WaterfallError::AudioStream(e.to_string()))?;

        Ok(ActiveCapture {
            stream,
            running,
            delivered,
        })
    }
}

/// Push a mixed-down block, truncated so the total never exceeds the
/// announced span. Runs on the audio callback thread.
fn push_capped(
    writer: &SampleWriter,
    block: &[f32],
    total: u64,
    delivered: &AtomicU64,
    running: &AtomicBool,
) {
    let done = delivered.load(Ordering::Relaxed);
    if done >= total {
        return;
    }
    let take = (block.len() as u64).min(total - done) as usize;
    if writer.write_block(&block[..take]) == WriteOutcome::Aborted {
        running.store(false, Ordering::Relaxed);
        return;
    }
    delivered.store(done + take as u64, Ordering::Relaxed);
}

/// Resolve an input device by preferred name, otherwise the default input
/// device, otherwise the first available input.
fn select_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let mut selected = None;

    if let Some(name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                selected = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                if selected.is_none() {
                    warn!("preferred input device '{name}' not found, falling back");
                }
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    if let Some(device) = selected {
        return Ok(device);
    }
    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| WaterfallError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(WaterfallError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

impl AudioSource for CaptureSource {
    fn info(&self) -> AudioInformation {
        self.info
    }

    fn stream(&self, writer: SampleWriter, ready: ReadySignal) {
        let active = match self.start_capture(&writer) {
            Ok(active) => active,
            Err(e) => {
                error!("capture setup failed: {e}");
                ready.err(e);
                return;
            }
        };

        ready.ok();
        if !writer.announce_ready() {
            active.running.store(false, Ordering::Relaxed);
            return;
        }

        let total = self.info.total_samples();
        // Supervise until the span is delivered or the generation moves on.
        while active.running.load(Ordering::Relaxed)
            && active.delivered.load(Ordering::Relaxed) < total
            && !writer.is_aborted()
        {
            std::thread::sleep(CAPTURE_POLL);
        }
        active.running.store(false, Ordering::Relaxed);
        drop(active.stream);

        if active.delivered.load(Ordering::Relaxed) >= total {
            info!(total, "capture span complete");
            writer.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_duration() {
        let err = CaptureSource::open(None, 0.0).unwrap_err();
        assert!(matches!(err, WaterfallError::InvalidOptions(_)));
        let err = CaptureSource::open(None, f64::NAN).unwrap_err();
        assert!(matches!(err, WaterfallError::InvalidOptions(_)));
    }
}
