use serde::Serialize;
use sim::models::{Model, Reportable};
use sim::simulator::Simulation;
use std::fmt;

use crate::arch::fixed::Sample;

pub fn print_simulation_records(simulation: &mut Simulation) {
  println!("\n--- Simulation Records ---");

  for model in simulation.models().iter() {
    print_model_records(model);
  }

  println!("--- End Records ---\n");
}

fn print_model_records(model: &Model) {
  let records = model.records();
  if !records.is_empty() {
    println!("\n[{}] {}", model.id(), model.status());
    for record in records {
      println!("  Time {:.1}: {} {}", record.time, record.action, record.subject);
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelStats {
  pub count: usize,
  pub mean: f64,
  pub std: f64,
  pub min: Sample,
  pub max: Sample,
  pub non_zero: usize,
}

impl ChannelStats {
  fn from_values(values: &[Sample]) -> Self {
    if values.is_empty() {
      return Self::default();
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    Self {
      count: values.len(),
      mean,
      std: var.sqrt(),
      min: values.iter().copied().min().unwrap_or_default(),
      max: values.iter().copied().max().unwrap_or_default(),
      non_zero: values.iter().filter(|&&v| v != 0).count(),
    }
  }
}

/// Mismatches listed by `Display`; the report keeps all of them
const SHOWN_MISMATCHES: usize = 10;

/// One output off by more than one LSB, or missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatch {
  pub index: usize,
  pub pixel: usize,
  pub channel: usize,
  pub expected: Sample,
  pub actual: Option<Sample>,
}

/// Output-vs-golden comparison, in LSBs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccuracyReport {
  pub total: usize,
  pub exact: usize,
  /// Off by exactly one LSB
  pub close: usize,
  /// Off by more than one LSB, or missing
  pub errors: usize,
  pub mean_abs_error: f64,
  pub max_error: u32,
  pub channels: Vec<ChannelStats>,
  pub mismatches: Vec<Mismatch>,
}

impl AccuracyReport {
  /// Compare pixel-major outputs (channels innermost) against the expected sequence.
  ///
  /// Expected values with no actual counterpart count as errors; surplus actual values are ignored.
  pub fn compare(actual: &[Sample], expected: &[Sample], channels: usize) -> Self {
    let mut report = Self {
      total: expected.len(),
      ..Self::default()
    };
    let mut abs_sum = 0u64;
    let stride = channels.max(1);
    for (i, &want) in expected.iter().enumerate() {
      let got = actual.get(i).copied();
      let bad = match got {
        Some(got) => {
          let diff = (got as i32 - want as i32).unsigned_abs();
          abs_sum += diff as u64;
          report.max_error = report.max_error.max(diff);
          match diff {
            0 => report.exact += 1,
            1 => report.close += 1,
            _ => report.errors += 1,
          }
          diff > 1
        },
        None => {
          report.errors += 1;
          true
        },
      };
      if bad {
        report.mismatches.push(Mismatch {
          index: i,
          pixel: i / stride,
          channel: i % stride,
          expected: want,
          actual: got,
        });
      }
    }
    let compared = actual.len().min(expected.len());
    if compared > 0 {
      report.mean_abs_error = abs_sum as f64 / compared as f64;
    }

    if channels > 0 {
      let mut per_channel: Vec<Vec<Sample>> = vec![Vec::new(); channels];
      for (i, &v) in actual.iter().enumerate() {
        per_channel[i % channels].push(v);
      }
      report.channels = per_channel.iter().map(|v| ChannelStats::from_values(v)).collect();
    }
    report
  }

  pub fn passed(&self) -> bool {
    self.errors == 0
  }
}

fn percent(part: usize, total: usize) -> f64 {
  if total == 0 {
    0.0
  } else {
    100.0 * part as f64 / total as f64
  }
}

impl fmt::Display for AccuracyReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "--- Accuracy Report ---")?;
    writeln!(f, "Total outputs processed: {}", self.total)?;
    writeln!(f, "Exact matches: {} ({:.2}%)", self.exact, percent(self.exact, self.total))?;
    writeln!(f, "Close matches (1 LSB): {} ({:.2}%)", self.close, percent(self.close, self.total))?;
    writeln!(f, "Total errors: {} ({:.2}%)", self.errors, percent(self.errors, self.total))?;
    writeln!(f, "Mean absolute error: {:.4} LSB", self.mean_abs_error)?;
    writeln!(f, "Maximum error: {} LSB", self.max_error)?;
    for (ch, stats) in self.channels.iter().enumerate() {
      writeln!(
        f,
        "  ch{:<3} count={} mean={:.2} std={:.2} min={} max={} non_zero={}",
        ch, stats.count, stats.mean, stats.std, stats.min, stats.max, stats.non_zero
      )?;
    }
    if !self.mismatches.is_empty() {
      writeln!(f, "Error details:")?;
      for m in self.mismatches.iter().take(SHOWN_MISMATCHES) {
        match m.actual {
          Some(got) => writeln!(
            f,
            "  [{}] pixel {} ch{}: expected {} got {} (diff {})",
            m.index,
            m.pixel,
            m.channel,
            m.expected,
            got,
            got as i32 - m.expected as i32
          )?,
          None => writeln!(f, "  [{}] pixel {} ch{}: expected {} missing", m.index, m.pixel, m.channel, m.expected)?,
        }
      }
      if self.mismatches.len() > SHOWN_MISMATCHES {
        writeln!(f, "  ... {} more", self.mismatches.len() - SHOWN_MISMATCHES)?;
      }
    }
    write!(f, "--- End Report ---")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_compare_buckets() {
    let report = AccuracyReport::compare(&[10, 11, 15, 0], &[10, 10, 10, 0, 7], 2);
    assert_eq!(report.total, 5);
    assert_eq!(report.exact, 2);
    assert_eq!(report.close, 1);
    // one off by five plus one missing
    assert_eq!(report.errors, 2);
    assert_eq!(report.max_error, 5);
    assert!((report.mean_abs_error - 1.5).abs() < 1e-12);
    assert!(!report.passed());
  }

  #[test]
  fn test_mismatch_details() {
    let report = AccuracyReport::compare(&[10, 11, 15, 0], &[10, 10, 10, 0, 7], 2);
    assert_eq!(
      report.mismatches,
      vec![
        Mismatch {
          index: 2,
          pixel: 1,
          channel: 0,
          expected: 10,
          actual: Some(15),
        },
        Mismatch {
          index: 4,
          pixel: 2,
          channel: 0,
          expected: 7,
          actual: None,
        },
      ]
    );
    let text = report.to_string();
    assert!(text.contains("[2] pixel 1 ch0: expected 10 got 15 (diff 5)"));
    assert!(text.contains("[4] pixel 2 ch0: expected 7 missing"));
  }

  #[test]
  fn test_mismatch_listing_is_capped() {
    let expected = vec![100; 15];
    let report = AccuracyReport::compare(&[0; 15], &expected, 3);
    assert_eq!(report.mismatches.len(), 15);
    assert!(report.to_string().contains("... 5 more"));
  }

  #[test]
  fn test_channel_stats() {
    let report = AccuracyReport::compare(&[1, 0, 3, 4], &[1, 0, 3, 4], 2);
    assert!(report.passed());
    assert_eq!(report.channels.len(), 2);
    assert_eq!(report.channels[0].count, 2);
    assert_eq!(report.channels[0].min, 1);
    assert_eq!(report.channels[0].max, 3);
    assert!((report.channels[0].mean - 2.0).abs() < 1e-12);
    assert!((report.channels[0].std - 1.0).abs() < 1e-12);
    assert_eq!(report.channels[1].non_zero, 1);
    assert!(report.mismatches.is_empty());
    assert!(report.to_string().contains("Exact matches: 4 (100.00%)"));
  }
}
