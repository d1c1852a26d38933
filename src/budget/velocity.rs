//! Spending Velocity
//!
//! Turns a time-ascending series of usage samples into a smoothed spend rate
//! in tokens per second. Smoothing is asymmetric: a burst raises the rate
//! quickly, a fade lowers it slowly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timing;

pub const DEFAULT_VELOCITY_WINDOW_S: u64 = 3_600;
pub const DEFAULT_ALPHA_RISE: f64 = 0.5;
pub const DEFAULT_ALPHA_FALL: f64 = 0.2;

/// Spend accrued since the previous sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    pub timestamp: DateTime<Utc>,
    pub tokens_used: u64,
    #[serde(default)]
    pub request_count: u32,
}

impl UsageSample {
    pub fn new(timestamp: DateTime<Utc>, tokens_used: u64, request_count: u32) -> Self {
        Self {
            timestamp,
            tokens_used,
            request_count,
        }
    }
}

/// Time-ascending usage samples
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    #[serde(default)]
    pub samples: Vec<UsageSample>,
}

impl UsageMetrics {
    /// Build from samples in any order
    pub fn new(mut samples: Vec<UsageSample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self { samples }
    }

    /// New metrics with one more sample, kept in time order
    pub fn with_sample(&self, sample: UsageSample) -> Self {
        let mut samples = self.samples.clone();
        let at = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(at, sample);
        Self { samples }
    }

    /// New metrics without samples older than `cutoff`
    pub fn pruned_before(&self, cutoff: DateTime<Utc>) -> Self {
        Self {
            samples: self
                .samples
                .iter()
                .filter(|s| s.timestamp >= cutoff)
                .copied()
                .collect(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.samples
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.tokens_used))
    }

    pub fn latest(&self) -> Option<&UsageSample> {
        self.samples.last()
    }
}

fn default_window_s() -> u64 {
    DEFAULT_VELOCITY_WINDOW_S
}

fn default_alpha_rise() -> f64 {
    DEFAULT_ALPHA_RISE
}

fn default_alpha_fall() -> f64 {
    DEFAULT_ALPHA_FALL
}

/// Window and smoothing constants for velocity estimation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityConfig {
    /// Only samples this close to the reference time are considered
    #[serde(default = "default_window_s")]
    pub window_s: u64,
    /// EWMA weight applied when the rate goes up
    #[serde(default = "default_alpha_rise")]
    pub alpha_rise: f64,
    /// EWMA weight applied when the rate goes down
    #[serde(default = "default_alpha_fall")]
    pub alpha_fall: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_s: DEFAULT_VELOCITY_WINDOW_S,
            alpha_rise: DEFAULT_ALPHA_RISE,
            alpha_fall: DEFAULT_ALPHA_FALL,
        }
    }
}

fn ewma(old: f64, new: f64, alpha: f64) -> f64 {
    alpha.mul_add(new, (1.0 - alpha) * old)
}

/// Smoothed spend rate in tokens per second, with the window measured from
/// the newest sample.
///
/// Returns 0.0 when fewer than two samples fall inside the window or no pair
/// of samples is separated by a positive interval.
pub fn calculate_spending_velocity(metrics: &UsageMetrics, config: &VelocityConfig) -> f64 {
    let Some(newest) = metrics.latest() else {
        return 0.0;
    };
    let cutoff = timing::sub(newest.timestamp, timing::seconds(config.window_s));
    let window: Vec<&UsageSample> = metrics
        .samples
        .iter()
        .filter(|s| s.timestamp >= cutoff)
        .collect();
    smooth(&window, config).map_or(0.0, |(v, _)| finite_rate(v))
}

/// Smoothed spend rate as seen at `now`.
///
/// The window ends at `now`, so a quiet spell eventually empties it. Inside
/// the window, every whole interval (at the last observed sample spacing)
/// that passed without a sample counts as a zero-spend interval and decays
/// the rate at `alpha_fall`. Samples after `now` are ignored.
pub fn spending_velocity_at(
    metrics: &UsageMetrics,
    config: &VelocityConfig,
    now: DateTime<Utc>,
) -> f64 {
    let cutoff = timing::sub(now, timing::seconds(config.window_s));
    let window: Vec<&UsageSample> = metrics
        .samples
        .iter()
        .filter(|s| s.timestamp >= cutoff && s.timestamp <= now)
        .collect();
    let Some((smoothed, spacing)) = smooth(&window, config) else {
        return 0.0;
    };
    let Some(newest) = window.last() else {
        return 0.0;
    };

    let idle = timing::as_secs_f64(now - newest.timestamp);
    let missed = (idle / spacing).floor().min(i32::MAX as f64) as i32;
    let decayed = if missed > 0 {
        smoothed * (1.0 - config.alpha_fall).powi(missed)
    } else {
        smoothed
    };
    finite_rate(decayed)
}

/// EWMA over consecutive pairs; also returns the last positive spacing
fn smooth(window: &[&UsageSample], config: &VelocityConfig) -> Option<(f64, f64)> {
    let mut smoothed: Option<(f64, f64)> = None;
    for pair in window.windows(2) {
        let elapsed = timing::as_secs_f64(pair[1].timestamp - pair[0].timestamp);
        if elapsed <= 0.0 {
            continue;
        }
        let rate = pair[1].tokens_used as f64 / elapsed;
        let next = match smoothed {
            None => rate,
            Some((prev, _)) if rate > prev => ewma(prev, rate, config.alpha_rise),
            Some((prev, _)) => ewma(prev, rate, config.alpha_fall),
        };
        smoothed = Some((next, elapsed));
    }
    smoothed
}

fn finite_rate(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn sample(secs: i64, tokens: u64) -> UsageSample {
        UsageSample::new(t(secs), tokens, 1)
    }

    #[test]
    fn test_insufficient_samples() {
        let config = VelocityConfig::default();
        assert_eq!(calculate_spending_velocity(&UsageMetrics::default(), &config), 0.0);
        let one = UsageMetrics::new(vec![sample(0, 500)]);
        assert_eq!(calculate_spending_velocity(&one, &config), 0.0);
        // Same timestamp: no positive interval
        let same = UsageMetrics::new(vec![sample(0, 500), sample(0, 500)]);
        assert_eq!(calculate_spending_velocity(&same, &config), 0.0);
    }

    #[test]
    fn test_constant_rate() {
        let metrics = UsageMetrics::new((0..5).map(|i| sample(i * 60, 600)).collect());
        let v = calculate_spending_velocity(&metrics, &VelocityConfig::default());
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rise_reacts_faster_than_fall() {
        let config = VelocityConfig::default();
        // 10 tok/s then a burst at 50 tok/s
        let burst = UsageMetrics::new(vec![sample(0, 0), sample(60, 600), sample(120, 3000)]);
        // 50 tok/s then a drop to 10 tok/s
        let fade = UsageMetrics::new(vec![sample(0, 0), sample(60, 3000), sample(120, 600)]);

        let up = calculate_spending_velocity(&burst, &config);
        let down = calculate_spending_velocity(&fade, &config);
        assert!((up - 30.0).abs() < 1e-9);
        assert!((down - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_drops_old_samples() {
        let config = VelocityConfig {
            window_s: 120,
            ..Default::default()
        };
        let metrics = UsageMetrics::new(vec![
            sample(0, 0),
            sample(60, 60_000),
            sample(600, 0),
            sample(660, 600),
        ]);
        let v = calculate_spending_velocity(&metrics, &config);
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_stay_sorted() {
        let metrics = UsageMetrics::new(vec![sample(60, 2), sample(0, 1)]);
        assert_eq!(metrics.samples[0].tokens_used, 1);
        let metrics = metrics.with_sample(sample(30, 3));
        let order: Vec<u64> = metrics.samples.iter().map(|s| s.tokens_used).collect();
        assert_eq!(order, vec![1, 3, 2]);
        assert_eq!(metrics.total_tokens(), 6);
        assert_eq!(metrics.pruned_before(t(30)).samples.len(), 2);
    }

    #[test]
    fn test_idle_gap_decays_rate() {
        let config = VelocityConfig::default();
        let metrics = UsageMetrics::new(vec![sample(0, 0), sample(60, 600)]);
        // No time has passed since the newest sample
        let fresh = spending_velocity_at(&metrics, &config, t(60));
        assert!((fresh - 10.0).abs() < 1e-9);
        // Under one interval of silence: unchanged
        assert!((spending_velocity_at(&metrics, &config, t(100)) - 10.0).abs() < 1e-9);
        // Two missed intervals fold in two zero-spend rates
        let idle = spending_velocity_at(&metrics, &config, t(180));
        assert!((idle - 6.4).abs() < 1e-9);
        // The newest-sample view does not see the silence
        assert!((calculate_spending_velocity(&metrics, &config) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_ends_at_now() {
        let config = VelocityConfig::default();
        let metrics = UsageMetrics::new(vec![sample(0, 0), sample(60, 60_000)]);
        assert_eq!(spending_velocity_at(&metrics, &config, t(60 + 12 * 3600)), 0.0);
        // Samples after `now` are not counted
        assert_eq!(spending_velocity_at(&metrics, &config, t(30)), 0.0);
    }
}
