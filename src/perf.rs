//! Stage timings for `--verbose`.
//!
//! Each pipeline stage records into a process-wide table; the CLI prints one
//! line per stage on stderr after the JSON result.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Pipeline stages and counters, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    PipelineLoad,
    WeightsLoad,
    PipelineClassify,
    AudioDecode,
    AudioResample,
    FeatureExtract,
    FeatureEncoder,
    Encoder,
    ClassifierHead,
    AudioSamples,
    ModelFrames,
}

const SLOTS: usize = 11;

const ALL: [Metric; SLOTS] = [
    Metric::PipelineLoad,
    Metric::WeightsLoad,
    Metric::PipelineClassify,
    Metric::AudioDecode,
    Metric::AudioResample,
    Metric::FeatureExtract,
    Metric::FeatureEncoder,
    Metric::Encoder,
    Metric::ClassifierHead,
    Metric::AudioSamples,
    Metric::ModelFrames,
];

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Self::PipelineLoad => "pipeline.load",
            Self::WeightsLoad => "weights.load",
            Self::PipelineClassify => "pipeline.classify",
            Self::AudioDecode => "audio.decode",
            Self::AudioResample => "audio.resample",
            Self::FeatureExtract => "features.extract",
            Self::FeatureEncoder => "model.feature_encoder",
            Self::Encoder => "model.encoder",
            Self::ClassifierHead => "model.head",
            Self::AudioSamples => "audio.samples",
            Self::ModelFrames => "model.frames",
        }
    }

    fn is_counter(self) -> bool {
        matches!(self, Self::AudioSamples | Self::ModelFrames)
    }

    /// Stages nested inside a load or a classify call are indented under it.
    fn is_nested(self) -> bool {
        !matches!(self, Self::PipelineLoad | Self::PipelineClassify)
    }
}

struct Table {
    micros: [AtomicU64; SLOTS],
    hits: [AtomicU64; SLOTS],
}

static TABLE: OnceLock<Table> = OnceLock::new();

fn table() -> &'static Table {
    TABLE.get_or_init(|| Table {
        micros: std::array::from_fn(|_| AtomicU64::new(0)),
        hits: std::array::from_fn(|_| AtomicU64::new(0)),
    })
}

/// Times a stage until dropped.
pub struct PerfSpan {
    metric: Metric,
    start: Instant,
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        let micros = u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX);
        let slot = self.metric as usize;
        table().micros[slot].fetch_add(micros, Ordering::Relaxed);
        table().hits[slot].fetch_add(1, Ordering::Relaxed);
    }
}

pub fn span(metric: Metric) -> PerfSpan {
    PerfSpan {
        metric,
        start: Instant::now(),
    }
}

/// Add `delta` to a counter such as the decoded sample count.
pub fn add_count(metric: Metric, delta: u64) {
    table().hits[metric as usize].fetch_add(delta, Ordering::Relaxed);
}

/// Copy of the table at one point in time.
#[derive(Debug)]
pub struct PerfSnapshot {
    micros: [u64; SLOTS],
    hits: [u64; SLOTS],
}

impl PerfSnapshot {
    pub fn total(&self, metric: Metric) -> Duration {
        Duration::from_micros(self.micros[metric as usize])
    }

    /// Spans closed for a stage, or the accumulated value of a counter.
    pub fn count(&self, metric: Metric) -> u64 {
        self.hits[metric as usize]
    }

    /// Stages in run order, skipping any that never ran.
    pub fn format(&self) -> String {
        let mut output = String::from("timings:\n");
        for metric in ALL {
            let hits = self.count(metric);
            if hits == 0 {
                continue;
            }
            let indent = if metric.is_nested() { "    " } else { "  " };
            let _ = if metric.is_counter() {
                writeln!(output, "{indent}{:<22} {hits}", metric.name())
            } else {
                let millis = self.total(metric).as_secs_f64() * 1000.0;
                writeln!(output, "{indent}{:<22} {millis:.1} ms", metric.name())
            };
        }
        output
    }
}

pub fn snapshot() -> PerfSnapshot {
    let table = table();
    PerfSnapshot {
        micros: std::array::from_fn(|slot| table.micros[slot].load(Ordering::Relaxed)),
        hits: std::array::from_fn(|slot| table.hits[slot].load(Ordering::Relaxed)),
    }
}

/// The `--verbose` report.
pub fn report() -> String {
    snapshot().format()
}

#[cfg(test)]
mod tests {
    use super::{add_count, report, snapshot, span, Metric, PerfSnapshot, SLOTS};

    #[test]
    fn report_lists_stages_in_run_order() {
        add_count(Metric::ModelFrames, 49);
        {
            let _span = span(Metric::FeatureExtract);
        }
        {
            let _span = span(Metric::WeightsLoad);
        }
        let summary = report();
        assert!(summary.starts_with("timings:"));
        let weights = summary.find("weights.load").expect("weights.load listed");
        let features = summary.find("features.extract").expect("features.extract listed");
        let frames = summary.find("model.frames").expect("model.frames listed");
        assert!(weights < features && features < frames, "{summary}");

        let snapshot = snapshot();
        assert!(snapshot.count(Metric::ModelFrames) >= 49);
        assert!(snapshot.count(Metric::WeightsLoad) >= 1);
    }

    #[test]
    fn format_skips_stages_that_never_ran() {
        let mut micros = [0; SLOTS];
        let mut hits = [0; SLOTS];
        micros[Metric::PipelineClassify as usize] = 12_500;
        hits[Metric::PipelineClassify as usize] = 1;
        hits[Metric::AudioSamples as usize] = 16_000;
        let summary = PerfSnapshot { micros, hits }.format();

        assert_eq!(
            summary,
            "timings:\n  pipeline.classify      12.5 ms\n    audio.samples          16000\n"
        );
    }
}
