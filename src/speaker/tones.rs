//! Programmatic alert tone generation.
//!
//! Each block reason gets a distinct audio signature so the developer can
//! tell permission requests, questions, and idle prompts apart by ear.
//! Tones are sequences of (frequency, seconds) segments; frequency 0 is
//! silence. Non-silent segments get a 5 ms linear fade at both ends to
//! prevent clicks.

use crate::events::BlockReason;

/// Urgent double-beep, ~0.60 s.
const PERMISSION_TONES: &[(f32, f32)] = &[
    (880.0, 0.12),
    (0.0, 0.04),
    (1320.0, 0.12),
    (0.0, 0.04),
    (880.0, 0.12),
    (0.0, 0.04),
    (1320.0, 0.12),
];

/// Rising two-tone, ~0.35 s.
const QUESTION_TONES: &[(f32, f32)] = &[(660.0, 0.15), (0.0, 0.05), (880.0, 0.15)];

/// Gentle low tone, ~0.40 s.
const IDLE_TONES: &[(f32, f32)] = &[(440.0, 0.20), (0.0, 0.05), (550.0, 0.15)];

/// Standard alert, ~0.35 s.
const DEFAULT_TONES: &[(f32, f32)] = &[(880.0, 0.15), (0.0, 0.05), (1320.0, 0.15)];

const FADE_DURATION: f32 = 0.005;

fn segments_for(block_reason: Option<BlockReason>) -> &'static [(f32, f32)] {
    match block_reason {
        Some(BlockReason::PermissionPrompt) => PERMISSION_TONES,
        Some(BlockReason::Question) => QUESTION_TONES,
        Some(BlockReason::IdlePrompt) => IDLE_TONES,
        None => DEFAULT_TONES,
    }
}

/// Generate the alert tone for a block reason as float samples in [-1, 1].
pub fn generate_alert(block_reason: Option<BlockReason>, sample_rate: u32) -> Vec<f32> {
    let mut samples = Vec::new();
    for &(freq, duration) in segments_for(block_reason) {
        let n = (duration * sample_rate as f32) as usize;
        if freq == 0.0 {
            samples.extend(std::iter::repeat(0.0).take(n));
        } else {
            let mut segment = sine(freq, n, sample_rate);
            apply_fade(&mut segment, (FADE_DURATION * sample_rate as f32) as usize);
            samples.extend(segment);
        }
    }
    samples
}

/// Generate the alert tone as little-endian int16 PCM bytes.
pub fn generate_alert_pcm16(block_reason: Option<BlockReason>, sample_rate: u32) -> Vec<u8> {
    let samples = generate_alert(block_reason, sample_rate);
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        pcm.extend_from_slice(&value.to_le_bytes());
    }
    pcm
}

fn sine(freq: f32, num_samples: usize, sample_rate: u32) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

/// Linear fade-in and fade-out over `fade_samples` at each end.
fn apply_fade(samples: &mut [f32], fade_samples: usize) {
    if fade_samples == 0 || samples.len() < 2 * fade_samples {
        return;
    }
    let len = samples.len();
    for i in 0..fade_samples {
        let gain = i as f32 / fade_samples as f32;
        samples[i] *= gain;
        samples[len - 1 - i] *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_samples(segments: &[(f32, f32)], sample_rate: u32) -> usize {
        segments
            .iter()
            .map(|&(_, d)| (d * sample_rate as f32) as usize)
            .sum()
    }

    #[test]
    fn generation_is_deterministic() {
        for reason in [
            None,
            Some(BlockReason::PermissionPrompt),
            Some(BlockReason::Question),
            Some(BlockReason::IdlePrompt),
        ] {
            assert_eq!(
                generate_alert(reason, 16000),
                generate_alert(reason, 16000)
            );
        }
    }

    #[test]
    fn segment_lengths_match_tone_tables() {
        assert_eq!(
            generate_alert(Some(BlockReason::PermissionPrompt), 16000).len(),
            expected_samples(PERMISSION_TONES, 16000)
        );
        assert_eq!(
            generate_alert(Some(BlockReason::Question), 16000).len(),
            expected_samples(QUESTION_TONES, 16000)
        );
        assert_eq!(
            generate_alert(Some(BlockReason::IdlePrompt), 16000).len(),
            expected_samples(IDLE_TONES, 16000)
        );
        assert_eq!(
            generate_alert(None, 16000).len(),
            expected_samples(DEFAULT_TONES, 16000)
        );
    }

    #[test]
    fn samples_are_in_range() {
        let samples = generate_alert(Some(BlockReason::PermissionPrompt), 16000);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn fade_starts_and_ends_near_zero() {
        let samples = generate_alert(Some(BlockReason::Question), 16000);
        // First sample of the first non-silent segment is fully faded.
        assert!(samples[0].abs() < 1e-6);
        // Last sample of the final segment likewise.
        assert!(samples[samples.len() - 1].abs() < 0.05);
    }

    #[test]
    fn pcm16_is_twice_the_sample_count() {
        let float_len = generate_alert(None, 16000).len();
        let pcm = generate_alert_pcm16(None, 16000);
        assert_eq!(pcm.len(), float_len * 2);
    }

    #[test]
    fn silence_segments_are_zero() {
        let samples = generate_alert(Some(BlockReason::Question), 16000);
        // 0.15 s of tone, then 0.05 s of silence.
        let tone_len = (0.15 * 16000.0) as usize;
        let silence = &samples[tone_len..tone_len + (0.05 * 16000.0) as usize];
        assert!(silence.iter().all(|&s| s == 0.0));
    }
}
