use crate::model::{ElementKind, TimingBreakdown, TimingStats};
use std::collections::{BTreeMap, HashMap};

/// Summarise the elapsed-time samples of one element.
///
/// Median is the mean of the two middle values for an even count, standard
/// deviation is the sample deviation (denominator `n - 1`). Empty input yields
/// all zeroes, and fewer than two samples yield a zero deviation.
pub fn aggregate(samples: &[f64]) -> TimingStats {
    let n = samples.len();
    if n == 0 {
        return TimingStats::default();
    }

    let total: f64 = samples.iter().sum();
    let mean = total / n as f64;

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };

    let std_deviation = if n < 2 {
        0.0
    } else {
        let variance: f64 =
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / ((n - 1) as f64);
        variance.sqrt()
    };

    TimingStats {
        total_time: total,
        call_count: u32::try_from(n).unwrap_or(u32::MAX),
        average_time: mean,
        median_time: median,
        std_deviation,
    }
}

/// Collects raw samples per (kind, qualified name) while a report is walked.
#[derive(Debug, Default)]
pub struct TimingCollector {
    values: HashMap<(ElementKind, String), Vec<f64>>,
}

impl TimingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ElementKind, name: impl Into<String>, elapsed: f64) {
        self.values
            .entry((kind, name.into()))
            .or_default()
            .push(elapsed);
    }

    pub fn finish(self) -> TimingBreakdown {
        let mut out: TimingBreakdown = BTreeMap::new();
        for ((kind, name), vs) in self.values {
            out.entry(kind).or_default().insert(name, aggregate(&vs));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_samples() {
        let s = aggregate(&[]);
        assert_eq!(s, TimingStats::default());
    }

    #[test]
    fn test_single_sample_has_zero_deviation() {
        let s = aggregate(&[1.5]);
        assert_eq!(s.call_count, 1);
        assert!(close(s.total_time, 1.5));
        assert!(close(s.average_time, 1.5));
        assert!(close(s.median_time, 1.5));
        assert_eq!(s.std_deviation, 0.0);
    }

    #[test]
    fn test_even_count_median_is_mean_of_middle() {
        let s = aggregate(&[4.0, 1.0, 3.0, 2.0]);
        assert!(close(s.median_time, 2.5));
        assert!(close(s.total_time, 10.0));
        assert!(close(s.average_time, 2.5));
    }

    #[test]
    fn test_sample_standard_deviation() {
        // mean 5, squared deviations sum to 32, 32 / 7 for the sample variance
        let s = aggregate(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!(close(s.std_deviation, (32.0f64 / 7.0).sqrt()));
        assert!(close(s.median_time, 4.5));
    }

    #[test]
    fn test_average_times_count_matches_total() {
        let samples = [0.013, 0.2, 1.7, 0.004, 12.25];
        let s = aggregate(&samples);
        assert_eq!(s.call_count as usize, samples.len());
        assert!((s.average_time * s.call_count as f64 - s.total_time).abs() < 1e-9);
    }

    #[test]
    fn test_collector_groups_by_kind_and_name() {
        let mut c = TimingCollector::new();
        c.push(ElementKind::Keyword, "BuiltIn.Log", 0.1);
        c.push(ElementKind::Keyword, "BuiltIn.Log", 0.3);
        c.push(ElementKind::Test, "Suite.Case", 1.0);

        let out = c.finish();
        let log = &out[&ElementKind::Keyword]["BuiltIn.Log"];
        assert_eq!(log.call_count, 2);
        assert!(close(log.total_time, 0.4));
        assert_eq!(out[&ElementKind::Test]["Suite.Case"].call_count, 1);
        assert!(!out.contains_key(&ElementKind::Suite));
    }
}
