use crate::perf::{self, Metric};
use anyhow::Result;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

#[derive(Debug, Default)]
pub struct AudioResampler;

impl AudioResampler {
    /// Resample a mono waveform from `from_rate` to `to_rate`.
    ///
    /// The output is aligned with the input and holds
    /// `ceil(len * to_rate / from_rate)` samples.
    pub fn resample_mono(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
        if from_rate == 0 || to_rate == 0 {
            anyhow::bail!("Sample rates must be positive (got {from_rate} -> {to_rate})");
        }
        if from_rate == to_rate || samples.is_empty() {
            return Ok(samples);
        }

        let _span = perf::span(Metric::AudioResample);
        let input_len = samples.len();
        let ratio = to_rate as f64 / from_rate as f64;
        let expected_len = (input_len as f64 * ratio).ceil() as usize;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, input_len, 1)?;

        // rubato already compensates the sinc filter delay; only the tail needs flushing.
        let mut output = resampler.process(&[samples], None)?.swap_remove(0);
        while output.len() < expected_len {
            let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
            let tail = tail.into_iter().next().unwrap_or_default();
            if tail.is_empty() {
                break;
            }
            output.extend(tail);
        }

        output.resize(expected_len, 0.0);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::AudioResampler;

    #[test]
    fn identity_when_rates_match() {
        let samples = vec![0.1_f32, -0.2, 0.3];
        let output = AudioResampler::resample_mono(samples.clone(), 16000, 16000).unwrap();
        assert_eq!(output, samples);
    }

    #[test]
    fn downsampling_halves_length() {
        let samples = vec![0.0_f32; 4800];
        let output = AudioResampler::resample_mono(samples, 48000, 16000).expect("resample");
        assert_eq!(output.len(), 1600);
        assert!(output.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn upsampling_preserves_a_low_tone() {
        let from_rate = 8000_u32;
        let to_rate = 16000_u32;
        let tone: Vec<f32> = (0..8000)
            .map(|i| (2.0 * std::f32::consts::PI * 100.0 * i as f32 / from_rate as f32).sin())
            .collect();
        let output = AudioResampler::resample_mono(tone, from_rate, to_rate).expect("resample");
        assert_eq!(output.len(), 16000);

        // Compare away from the edges where the filter has no history.
        for (i, value) in output.iter().enumerate().skip(1000).take(1000) {
            let expected = (2.0 * std::f32::consts::PI * 100.0 * i as f32 / to_rate as f32).sin();
            assert!(
                (value - expected).abs() < 0.08,
                "sample {i}: {value} vs {expected}"
            );
        }
    }

    fn impulse_peak(len: usize, at: usize, from_rate: u32, to_rate: u32) -> (usize, usize) {
        let mut samples = vec![0.0_f32; len];
        samples[at] = 1.0;
        let output = AudioResampler::resample_mono(samples, from_rate, to_rate).expect("resample");
        let peak = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(idx, _)| idx)
            .expect("non-empty output");
        (peak, output.len())
    }

    #[test]
    fn upsampling_keeps_impulse_position() {
        let (peak, len) = impulse_peak(8000, 2000, 8000, 16000);
        assert_eq!(len, 16000);
        assert!(peak.abs_diff(4000) <= 2, "peak at {peak}");
    }

    #[test]
    fn downsampling_keeps_impulse_position() {
        let (peak, len) = impulse_peak(4800, 1200, 48000, 16000);
        assert_eq!(len, 1600);
        assert!(peak.abs_diff(400) <= 2, "peak at {peak}");

        let (peak, len) = impulse_peak(44100, 22050, 44100, 16000);
        assert_eq!(len, 16000);
        assert!(peak.abs_diff(8000) <= 2, "peak at {peak}");
    }

    #[test]
    fn rejects_zero_rate() {
        let err = AudioResampler::resample_mono(vec![0.0; 4], 0, 16000).unwrap_err();
        assert!(err.to_string().contains("positive"));
    }
}
