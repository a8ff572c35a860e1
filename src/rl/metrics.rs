//! Training metrics and scalar sinks

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::Result;

use super::rollout::{BaselineKind, RolloutReport};

/// Moving average calculator
#[derive(Debug, Clone)]
pub struct MovingAverage {
    values: VecDeque<f32>,
    window_size: usize,
    sum: f32,
}

impl MovingAverage {
    pub fn new(window_size: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.values.len() >= self.window_size {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
    }

    pub fn average(&self) -> f32 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f32
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Receives scalar summaries keyed by tag.
pub trait MetricsSink {
    fn log_scalars(&mut self, step: usize, scalars: &[(&str, f32)]) -> Result<()>;
}

/// Writes scalars to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn log_scalars(&mut self, step: usize, scalars: &[(&str, f32)]) -> Result<()> {
        let line = scalars
            .iter()
            .map(|(tag, value)| format!("{tag}={value:.4}"))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!("step {}: {}", step, line);
        Ok(())
    }
}

/// One `step,value` CSV per tag under a log directory
#[derive(Debug, Clone)]
pub struct CsvSink {
    log_dir: PathBuf,
}

impl CsvSink {
    pub fn new(log_dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(log_dir.as_ref())?;
        Ok(Self {
            log_dir: log_dir.as_ref().to_path_buf(),
        })
    }

    pub fn path_for(&self, tag: &str) -> PathBuf {
        self.log_dir.join(format!("{}.csv", tag.replace('/', "_")))
    }
}

impl MetricsSink for CsvSink {
    fn log_scalars(&mut self, step: usize, scalars: &[(&str, f32)]) -> Result<()> {
        for (tag, value) in scalars {
            let path = self.path_for(tag);
            let exists = path.exists();
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            if !exists {
                writeln!(file, "step,value")?;
            }
            writeln!(file, "{step},{value}")?;
        }
        Ok(())
    }
}

/// Fans out to several sinks
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl MetricsSink for MultiSink {
    fn log_scalars(&mut self, step: usize, scalars: &[(&str, f32)]) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.log_scalars(step, scalars)?;
        }
        Ok(())
    }
}

/// Training metrics tracker
#[derive(Debug)]
pub struct TrainingMetrics {
    /// Episode return (initial minus final cost)
    pub episode_return: MovingAverage,
    /// Summed log-likelihood of the sampled actions
    pub log_likelihood: MovingAverage,
    /// Policy-gradient loss
    pub loss: MovingAverage,
    /// Mean reinsertion entropy
    pub entropy: MovingAverage,
    pub initial_cost: MovingAverage,
    pub final_cost: MovingAverage,
    /// Critic estimate at episode start (diagnostic only)
    pub critic_value: MovingAverage,
    /// Share of actions matching cost-based insertion
    pub greedy_agreement: MovingAverage,
    /// Gradient steps taken
    pub step: usize,
    /// Episodes trained on, summed over instances
    pub total_episodes: usize,
    start_time: Instant,
}

impl TrainingMetrics {
    pub fn new(window_size: usize) -> Self {
        Self {
            episode_return: MovingAverage::new(window_size),
            log_likelihood: MovingAverage::new(window_size),
            loss: MovingAverage::new(window_size),
            entropy: MovingAverage::new(window_size),
            initial_cost: MovingAverage::new(window_size),
            final_cost: MovingAverage::new(window_size),
            critic_value: MovingAverage::new(window_size),
            greedy_agreement: MovingAverage::new(window_size),
            step: 0,
            total_episodes: 0,
            start_time: Instant::now(),
        }
    }

    pub fn record_batch(&mut self, stats: &BatchStats) {
        self.episode_return.push(stats.mean_return);
        self.log_likelihood.push(stats.mean_log_likelihood);
        self.loss.push(stats.loss);
        self.entropy.push(stats.mean_entropy);
        self.initial_cost.push(stats.mean_initial_cost);
        self.final_cost.push(stats.mean_final_cost);
        self.critic_value.push(stats.critic_value);
        self.greedy_agreement.push(stats.greedy_agreement);
        self.step += 1;
        self.total_episodes += stats.batch_size;
    }

    pub fn episodes_per_second(&self) -> f64 {
        let duration = self.start_time.elapsed().as_secs_f64();
        if duration > 0.0 {
            self.total_episodes as f64 / duration
        } else {
            0.0
        }
    }

    pub fn scalars(&self) -> Vec<(&'static str, f32)> {
        vec![
            ("train/return", self.episode_return.average()),
            ("train/log_likelihood", self.log_likelihood.average()),
            ("train/loss", self.loss.average()),
            ("train/entropy", self.entropy.average()),
            ("train/initial_cost", self.initial_cost.average()),
            ("train/final_cost", self.final_cost.average()),
            ("train/critic_value", self.critic_value.average()),
            ("train/greedy_agreement", self.greedy_agreement.average()),
            ("perf/episodes_per_sec", self.episodes_per_second() as f32),
        ]
    }

    pub fn log_to(&self, sink: &mut dyn MetricsSink) -> Result<()> {
        sink.log_scalars(self.step, &self.scalars())
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Host-side summary of one gradient step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    pub batch_size: usize,
    pub loss: f32,
    pub mean_return: f32,
    pub mean_log_likelihood: f32,
    pub mean_entropy: f32,
    pub mean_initial_cost: f32,
    pub mean_final_cost: f32,
    pub critic_value: f32,
    pub greedy_agreement: f32,
}

/// Validation scalars for one report
pub fn validation_scalars(report: &RolloutReport) -> Vec<(&'static str, f32)> {
    let mut scalars = vec![
        ("val/initial_cost", report.mean_initial_cost()),
        ("val/final_cost", report.mean_cost()),
    ];
    if let Some(cmp) = report.compare(BaselineKind::Greedy) {
        scalars.push(("val/greedy_not_worse", cmp.count_not_worse as f32));
        scalars.push(("val/greedy_gap", cmp.mean_gap));
    }
    if let Some(cmp) = report.compare(BaselineKind::Cheapest) {
        scalars.push(("val/cheapest_not_worse", cmp.count_not_worse as f32));
        scalars.push(("val/cheapest_gap", cmp.mean_gap));
    }
    scalars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average() {
        let mut avg = MovingAverage::new(3);

        avg.push(1.0);
        assert!((avg.average() - 1.0).abs() < 1e-6);

        avg.push(2.0);
        assert!((avg.average() - 1.5).abs() < 1e-6);

        avg.push(3.0);
        assert!((avg.average() - 2.0).abs() < 1e-6);

        avg.push(4.0); // Pushes out 1.0
        assert!((avg.average() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_training_metrics_record() {
        let mut metrics = TrainingMetrics::new(10);
        metrics.record_batch(&BatchStats {
            batch_size: 4,
            mean_return: 0.5,
            ..BatchStats::default()
        });
        assert_eq!(metrics.step, 1);
        assert_eq!(metrics.total_episodes, 4);
        assert!((metrics.episode_return.average() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_csv_sink_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path()).unwrap();
        sink.log_scalars(1, &[("train/return", 0.25)]).unwrap();
        sink.log_scalars(2, &[("train/return", 0.5)]).unwrap();
        let contents = std::fs::read_to_string(sink.path_for("train/return")).unwrap();
        assert_eq!(contents, "step,value\n1,0.25\n2,0.5\n");
    }
}
