//! Microphone capture with energy-based voice activity detection.
//!
//! Capture runs in two phases: wait for speech onset (RMS above threshold),
//! then record until trailing silence or the hard duration cap. The cpal
//! input callback feeds a shared state machine; the blocking capture thread
//! polls it so the async loop above never touches the device directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;

pub struct Microphone {
    available: AtomicBool,
    listening: AtomicBool,
    config: VoiceConfig,
    sample_rate: u32,
}

#[derive(PartialEq)]
enum Phase {
    WaitingForOnset,
    Recording,
    Done,
}

struct CaptureState {
    phase: Phase,
    buffer: Vec<i16>,
    onset_elapsed: f64,
    recorded: f64,
    silence_elapsed: f64,
}

impl Microphone {
    pub fn new(config: &VoiceConfig, sample_rate: u32) -> Self {
        Self {
            available: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            config: config.clone(),
            sample_rate,
        }
    }

    /// Probe for an input device. Degrades to disabled when none exists.
    pub async fn start(&self) {
        let found = cpal::default_host().default_input_device().is_some();
        self.available.store(found, Ordering::Relaxed);
        if found {
            info!("Microphone input device detected — capture enabled");
        } else {
            warn!("No microphone input device — capture disabled");
        }
    }

    pub async fn stop(&self) {
        self.listening.store(false, Ordering::Relaxed);
        self.available.store(false, Ordering::Relaxed);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Record until trailing silence or the duration cap. Returns PCM16
    /// mono bytes, or `None` when no speech arrives within the listen
    /// timeout or capture fails.
    pub async fn capture_until_silence(&self) -> Option<Vec<u8>> {
        if !self.is_available() {
            return None;
        }

        let config = self.config.clone();
        let sample_rate = self.sample_rate;

        self.listening.store(true, Ordering::Relaxed);
        let result = tokio::task::spawn_blocking(move || capture_sync(&config, sample_rate)).await;
        self.listening.store(false, Ordering::Relaxed);

        match result {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Microphone capture task failed: {e}");
                None
            }
        }
    }
}

/// Blocking capture. Builds the input stream on this thread (device handles
/// stay off the async loop), then polls the callback-fed state machine.
fn capture_sync(config: &VoiceConfig, sample_rate: u32) -> Option<Vec<u8>> {
    let host = cpal::default_host();
    let device = host.default_input_device()?;

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let state = Arc::new(Mutex::new(CaptureState {
        phase: Phase::WaitingForOnset,
        buffer: Vec::new(),
        onset_elapsed: 0.0,
        recorded: 0.0,
        silence_elapsed: 0.0,
    }));

    let callback_state = Arc::clone(&state);
    let silence_threshold = config.silence_threshold;
    let silence_duration = config.silence_duration;
    let listen_timeout = config.listen_timeout;
    let max_duration = config.max_record_duration;
    let rate = sample_rate as f64;

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[i16], _info: &cpal::InputCallbackInfo| {
            let mut state = callback_state.lock().unwrap();
            let frame_secs = data.len() as f64 / rate;
            let rms = rms_energy(data);

            match state.phase {
                Phase::WaitingForOnset => {
                    state.onset_elapsed += frame_secs;
                    if rms > silence_threshold {
                        debug!("Speech onset detected (rms={rms:.4})");
                        state.phase = Phase::Recording;
                        state.buffer.extend_from_slice(data);
                        state.recorded += frame_secs;
                    } else if state.onset_elapsed >= listen_timeout {
                        state.phase = Phase::Done;
                    }
                }
                Phase::Recording => {
                    state.buffer.extend_from_slice(data);
                    state.recorded += frame_secs;

                    if state.recorded >= max_duration {
                        debug!("Max recording duration reached");
                        state.phase = Phase::Done;
                        return;
                    }

                    if rms < silence_threshold {
                        state.silence_elapsed += frame_secs;
                        if state.silence_elapsed >= silence_duration {
                            debug!("Trailing silence detected — stopping capture");
                            state.phase = Phase::Done;
                        }
                    } else {
                        state.silence_elapsed = 0.0;
                    }
                }
                Phase::Done => {}
            }
        },
        move |err| {
            warn!("Microphone stream error: {err}");
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to build input stream: {e}");
            return None;
        }
    };

    if let Err(e) = stream.play() {
        warn!("Failed to start input stream: {e}");
        return None;
    }

    // Wall-clock guard in case the device callback stalls.
    let deadline =
        Instant::now() + Duration::from_secs_f64(config.listen_timeout + max_duration + 2.0);

    loop {
        std::thread::sleep(Duration::from_millis(30));
        let done = state.lock().unwrap().phase == Phase::Done;
        if done || Instant::now() >= deadline {
            break;
        }
    }

    drop(stream);

    let state = state.lock().unwrap();
    if state.buffer.is_empty() {
        info!("No speech detected within listen timeout");
        return None;
    }

    let duration = state.buffer.len() as f64 / rate;
    info!(
        "Captured {:.1}s of audio ({} samples)",
        duration,
        state.buffer.len()
    );

    let mut pcm = Vec::with_capacity(state.buffer.len() * 2);
    for sample in &state.buffer {
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    Some(pcm)
}

/// RMS energy of int16 samples, normalized to [0, 1].
fn rms_energy(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / 32768.0;
            normalized * normalized
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_energy(&[0; 480]), 0.0);
        assert_eq!(rms_energy(&[]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_signal_is_one() {
        let samples = vec![i16::MIN; 480];
        let rms = rms_energy(&samples);
        assert!((rms - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rms_scales_with_amplitude() {
        let quiet: Vec<i16> = vec![327; 480]; // ~1% full scale
        let loud: Vec<i16> = vec![16384; 480]; // 50% full scale
        assert!(rms_energy(&quiet) < 0.02);
        assert!(rms_energy(&loud) > 0.4);
    }

    #[tokio::test]
    async fn unavailable_microphone_returns_none() {
        let mic = Microphone::new(&VoiceConfig::default(), 16000);
        // start() not called — mic stays unavailable.
        assert!(!mic.is_available());
        assert!(mic.capture_until_silence().await.is_none());
        assert!(!mic.is_listening());
    }
}
