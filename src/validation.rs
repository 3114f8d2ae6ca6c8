//! Accuracy check of a compiled q7 runtime against the quantized test set.
//!
//! Every sample goes through one blocking round trip: encode it into the input file,
//! invoke the runtime, decode the output file and score the prediction. A prediction
//! is correct only when the arg-max class matches the label and its decoded score is
//! strictly above the confidence threshold.

use std::fmt;

use crate::dataset::{Label, NUM_CLASSES};
use crate::error::{Error, Result};
use crate::exchange::{ExchangeFiles, Runtime};
use crate::quantization::FixedPoint;
use crate::shift_table::{ShiftTable, INPUT_TENSOR, OUTPUT_TENSOR};
use crate::tensor::Tensor;

pub const CONFIDENCE_THRESHOLD: f32 = 0.8;
pub const ACCURACY_THRESHOLD: f64 = 0.8;
pub const PROGRESS_INTERVAL: usize = 1000;

/// What to do with a sample whose runtime invocation exits non-zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Leave the sample out of the accuracy denominator
    Skip,
    /// Score the sample as a wrong prediction
    #[default]
    CountIncorrect,
    /// Stop the run with the invocation error
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    pub input_tensor: String,
    pub output_tensor: String,
    /// Overrides the output tensor's entry in the shift table
    pub output_shift: Option<i32>,
    pub num_classes: usize,
    pub confidence_threshold: f32,
    pub accuracy_threshold: f64,
    pub failure_policy: FailurePolicy,
    /// Report progress after sample index `n * progress_interval`, n >= 1; 0 disables it
    pub progress_interval: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            input_tensor: INPUT_TENSOR.to_string(),
            output_tensor: OUTPUT_TENSOR.to_string(),
            output_shift: None,
            num_classes: NUM_CLASSES,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            accuracy_threshold: ACCURACY_THRESHOLD,
            failure_policy: FailurePolicy::default(),
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

/// Arg-max of one decoded output vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class: usize,
    pub confidence: f32,
    pub runner_up: Option<usize>,
}

impl Prediction {
    /// Ties go to the lowest class index. `None` for an empty vector.
    pub fn from_scores(scores: &[f32]) -> Option<Self> {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        // stable sort keeps lower indices first among equal scores
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let class = *order.first()?;
        Some(Prediction {
            class,
            confidence: scores[class],
            runner_up: order.get(1).copied(),
        })
    }

    pub fn in_top2(&self, label: Label) -> bool {
        self.class == label.index() || self.runner_up == Some(label.index())
    }
}

/// Aggregate statistics of a validation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Samples taken from the test set so far
    pub processed: usize,
    /// Samples in the accuracy denominator
    pub scored: usize,
    pub correct: usize,
    /// Samples whose arg-max is the label or the runner-up, regardless of confidence
    pub top2: usize,
    /// Invocations that exited non-zero
    pub failed_invocations: usize,
    /// Failed samples left out of `scored`
    pub skipped: usize,
    /// `confusion[label][predicted]` over samples that produced an output
    pub confusion: Vec<Vec<usize>>,
}

impl ValidationReport {
    pub fn new(num_classes: usize) -> Self {
        Self {
            processed: 0,
            scored: 0,
            correct: 0,
            top2: 0,
            failed_invocations: 0,
            skipped: 0,
            confusion: vec![vec![0; num_classes]; num_classes],
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.correct as f64 / self.scored as f64)
    }

    pub fn top2_accuracy(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.top2 as f64 / self.scored as f64)
    }

    /// Passes when accuracy is strictly above `threshold`
    pub fn check(&self, threshold: f64) -> Result<()> {
        let accuracy = self.accuracy().ok_or(Error::NoSamplesScored)?;
        if accuracy > threshold {
            Ok(())
        } else {
            Err(Error::ValidationFailure {
                accuracy,
                threshold,
            })
        }
    }

    pub fn progress_line(&self) -> String {
        format!(
            "{:.1}%({}) out of {} is correct predicted",
            self.accuracy().unwrap_or(0.) * 100.0,
            self.correct,
            self.scored
        )
    }

    fn record(&mut self, label: Label, prediction: Prediction, confidence_threshold: f32) {
        self.scored += 1;
        if prediction.class == label.index() && prediction.confidence > confidence_threshold {
            self.correct += 1;
        }
        if prediction.in_top2(label) {
            self.top2 += 1;
        }
        if let Some(row) = self.confusion.get_mut(label.index()) {
            if let Some(cell) = row.get_mut(prediction.class) {
                *cell += 1;
            }
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.progress_line())?;
        if let Some(top2) = self.top2_accuracy() {
            writeln!(f, "Top 2: {:.1}%", top2 * 100.0)?;
        }
        writeln!(
            f,
            "Runtime failures: {} ({} skipped)",
            self.failed_invocations, self.skipped
        )?;

        writeln!(f, "Confusion matrix (rows: label, columns: prediction)")?;
        write!(f, "     ")?;
        for class in 0..self.confusion.len() {
            write!(f, "{class:>6}")?;
        }
        writeln!(f)?;
        for (label, row) in self.confusion.iter().enumerate() {
            write!(f, "{label:>5}")?;
            for count in row {
                write!(f, "{count:>6}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Drives a [`Runtime`] over a quantized test set.
///
/// All state of a run lives in the returned [`ValidationReport`], so one validator can
/// run any number of times.
pub struct Validator<R> {
    config: ValidationConfig,
    input: FixedPoint,
    output: FixedPoint,
    files: ExchangeFiles,
    runtime: R,
}

impl<R: Runtime> Validator<R> {
    /// Resolves the input and output shifts; fails with `NotFound` if either is missing
    pub fn new(
        config: ValidationConfig,
        shifts: &ShiftTable,
        files: ExchangeFiles,
        runtime: R,
    ) -> Result<Self> {
        let input = FixedPoint::new(shifts.get(&config.input_tensor)?);
        let output = FixedPoint::new(match config.output_shift {
            Some(shift) => shift,
            None => shifts.get(&config.output_tensor)?,
        });
        tracing::info!(
            "Input `{}` uses {} fractional bits, output `{}` uses {}",
            config.input_tensor,
            input.shift,
            config.output_tensor,
            output.shift
        );

        Ok(Self {
            config,
            input,
            output,
            files,
            runtime,
        })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// One round trip. `Ok(None)` when the runtime exited non-zero and the policy
    /// tolerates it.
    pub fn infer(&mut self, sample: &[i8]) -> Result<Option<Vec<f32>>> {
        let values: Vec<f32> = sample.iter().map(|&q| q as f32).collect();
        self.files.write_input(&self.input.encode_bytes(&values))?;
        // a runtime that exits 0 without writing must not be scored on a stale answer
        self.files.clear_output()?;

        match self.runtime.invoke(&self.files) {
            Ok(()) => {}
            Err(err @ Error::ExternalInvocation { .. }) => {
                if self.config.failure_policy == FailurePolicy::Abort {
                    return Err(err);
                }
                tracing::warn!("{err}");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        let bytes = self.files.read_output(self.config.num_classes)?;
        Ok(Some(self.output.decode_bytes(&bytes)))
    }

    /// Scores every sample and returns the aggregate, without applying the accuracy
    /// threshold. `on_progress` sees the running report every `progress_interval`
    /// samples.
    pub fn run(
        &mut self,
        images: &Tensor<i8>,
        labels: &[Label],
        mut on_progress: impl FnMut(&ValidationReport),
    ) -> Result<ValidationReport> {
        if images.batch() != labels.len() {
            return Err(Error::Dataset(format!(
                "{} images but {} labels",
                images.batch(),
                labels.len()
            )));
        }

        let mut report = ValidationReport::new(self.config.num_classes);
        for (i, (sample, &label)) in images.samples().zip(labels).enumerate() {
            report.processed += 1;

            match self.infer(sample)? {
                Some(scores) => {
                    // read_output guarantees num_classes scores
                    if let Some(prediction) = Prediction::from_scores(&scores) {
                        tracing::debug!(
                            "Sample {i}: label {} predicted {} with {:.3}",
                            label.index(),
                            prediction.class,
                            prediction.confidence
                        );
                        report.record(label, prediction, self.config.confidence_threshold);
                    }
                }
                None => {
                    report.failed_invocations += 1;
                    match self.config.failure_policy {
                        FailurePolicy::Skip => report.skipped += 1,
                        _ => report.scored += 1,
                    }
                }
            }

            // fires at sample indices interval, 2 * interval, ...
            let interval = self.config.progress_interval;
            if interval > 0 && i > 0 && i % interval == 0 {
                on_progress(&report);
            }
        }

        tracing::info!(
            "Scored {} of {} samples, {} correct",
            report.scored,
            report.processed,
            report.correct
        );
        Ok(report)
    }

    /// Runs and applies the accuracy threshold
    pub fn validate(
        &mut self,
        images: &Tensor<i8>,
        labels: &[Label],
        on_progress: impl FnMut(&ValidationReport),
    ) -> Result<ValidationReport> {
        let report = self.run(images, labels, on_progress)?;
        report.check(self.config.accuracy_threshold)?;
        Ok(report)
    }
}
