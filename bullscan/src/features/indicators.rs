//! Technical indicator primitives used by the weekly feature extractor.
//!
//! # Conventions
//! - Inputs are plain slices ordered **oldest → newest**.
//! - Functions are defensive against empty/short inputs and return `NaN`
//!   (or `None` for multi-value results) when the window is not satisfiable.
//! - EMAs are the recursive form seeded with the first observation
//!   (`e_0 = x_0`, `e_t = a·x_t + (1-a)·e_{t-1}`, `a = 2/(span+1)`).

/// Arithmetic mean. `NaN` if empty.
pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Simple moving average last value for a given window. `NaN` if insufficient.
pub fn sma_last(x: &[f64], window: usize) -> f64 {
    if window == 0 || x.len() < window {
        return f64::NAN;
    }
    mean(&x[x.len() - window..])
}

/// Rolling simple moving average; output has `x.len() - window + 1` points.
pub fn sma_series(x: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || x.len() < window {
        return Vec::new();
    }
    x.windows(window).map(mean).collect()
}

/// Recursive EMA series seeded with the first value.
pub fn ema_series(x: &[f64], span: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(x.len());
    let Some(&first) = x.first() else {
        return out;
    };
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut ema = first;
    out.push(ema);
    for &v in &x[1..] {
        ema = alpha * v + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// Median (mean of the two middle values for even lengths). `NaN` if empty.
pub fn median(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation (ddof = 0).
pub fn population_std(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    let m = mean(x);
    (x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / x.len() as f64).sqrt()
}

/// Sample standard deviation (ddof = 1). `NaN` if fewer than 2 points.
pub fn sample_std(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    (x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (x.len() - 1) as f64).sqrt()
}

pub fn max_of(x: &[f64]) -> f64 {
    x.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

pub fn min_of(x: &[f64]) -> f64 {
    x.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Period-over-period relative change; `NaN` where the previous value is zero.
pub fn pct_changes(x: &[f64]) -> Vec<f64> {
    x.windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { f64::NAN })
        .collect()
}

/// Pearson correlation. `NaN` if lengths differ, fewer than 2 points, or zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return f64::NAN;
    }
    let ma = mean(a);
    let mb = mean(b);
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    let denom = (va * vb).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    cov / denom
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub dif: f64,
    pub dea: f64,
    pub hist: f64,
    /// dif - dea on the previous bar
    pub prev_diff: f64,
}

/// MACD(fast, slow, signal) at the last bar. `None` if fewer than `slow` points.
pub fn macd_last(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdPoint> {
    if closes.len() < slow || closes.len() < 2 {
        return None;
    }
    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);
    let dif: Vec<f64> = ema_fast.iter().zip(&ema_slow).map(|(f, s)| f - s).collect();
    let dea = ema_series(&dif, signal);
    let n = dif.len();
    Some(MacdPoint {
        dif: dif[n - 1],
        dea: dea[n - 1],
        hist: (dif[n - 1] - dea[n - 1]) * 2.0,
        prev_diff: dif[n - 2] - dea[n - 2],
    })
}

/// RSI from the simple mean of the last `period` gains and losses.
pub fn rsi_last(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return f64::NAN;
    }
    let tail = &closes[closes.len() - period - 1..];
    let mut gain = 0.0;
    let mut loss = 0.0;
    for w in tail.windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            gain += delta;
        } else {
            loss -= delta;
        }
    }
    let rs = (gain / period as f64) / (loss / period as f64 + 0.0001);
    100.0 - 100.0 / (1.0 + rs)
}

/// Stochastic KDJ with 2/3-1/3 smoothing, K and D seeded at 50.
/// Returns `(k, d, j)`. `None` if fewer than `period` bars.
pub fn kdj_last(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<(f64, f64, f64)> {
    let n = closes.len();
    if period == 0 || n < period || highs.len() != n || lows.len() != n {
        return None;
    }
    let mut k = 50.0;
    let mut d = 50.0;
    for i in (period - 1)..n {
        let hh = max_of(&highs[i + 1 - period..=i]);
        let ll = min_of(&lows[i + 1 - period..=i]);
        let rsv = (closes[i] - ll) / (hh - ll + 0.0001) * 100.0;
        k = 2.0 / 3.0 * k + 1.0 / 3.0 * rsv;
        d = 2.0 / 3.0 * d + 1.0 / 3.0 * k;
    }
    Some((k, d, 3.0 * k - 2.0 * d))
}

/// On-balance volume walk starting at 0.
pub fn obv_series(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(closes.len());
    if closes.is_empty() || closes.len() != volumes.len() {
        return out;
    }
    let mut obv = 0.0;
    out.push(obv);
    for i in 1..closes.len() {
        if closes[i] > closes[i - 1] {
            obv += volumes[i];
        } else if closes[i] < closes[i - 1] {
            obv -= volumes[i];
        }
        out.push(obv);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
}

impl Bollinger {
    /// Band width as a percentage of the middle band.
    pub fn width_pct(&self) -> f64 {
        if self.middle > 0.0 {
            (self.upper - self.lower) / self.middle * 100.0
        } else {
            0.0
        }
    }
}

/// Bollinger bands over the last `window` closes with sample deviation.
pub fn bollinger_last(closes: &[f64], window: usize, k: f64) -> Option<Bollinger> {
    if window < 2 || closes.len() < window {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    let middle = mean(tail);
    let sd = sample_std(tail);
    Some(Bollinger {
        middle,
        upper: middle + k * sd,
        lower: middle - k * sd,
    })
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_stats() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(mean(&x), 2.5);
        assert_eq!(median(&x), 2.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert!((population_std(&x) - 1.118034).abs() < 1e-6);
        assert!((sample_std(&x) - 1.290994).abs() < 1e-6);
        assert!(mean(&[]).is_nan());
        assert!(sample_std(&[1.0]).is_nan());
    }

    #[test]
    fn test_sma() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma_last(&x, 2), 4.5);
        assert!(sma_last(&x, 6).is_nan());
        assert_eq!(sma_series(&x, 3), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_ema_seeded_with_first() {
        let e = ema_series(&[10.0, 20.0], 3);
        assert_eq!(e[0], 10.0);
        assert_eq!(e[1], 15.0);
        assert!(ema_series(&[], 3).is_empty());
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        assert!(rsi_last(&rising, 14) > 99.0);
        let falling: Vec<f64> = (0..20).map(|i| 30.0 - i as f64).collect();
        assert!(rsi_last(&falling, 14) < 1.0);
        assert!(rsi_last(&rising[..10], 14).is_nan());
    }

    #[test]
    fn test_obv_walk() {
        let obv = obv_series(&[10.0, 11.0, 10.5, 10.5], &[100.0, 200.0, 50.0, 70.0]);
        assert_eq!(obv, vec![0.0, 200.0, 150.0, 150.0]);
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let flat = [10.0; 30];
        let m = macd_last(&flat, 12, 26, 9).expect("enough data");
        assert_eq!(m.dif, 0.0);
        assert_eq!(m.hist, 0.0);
        assert!(macd_last(&flat[..20], 12, 26, 9).is_none());
    }

    #[test]
    fn test_kdj_flat_stays_near_seed() {
        let highs = [11.0; 12];
        let lows = [9.0; 12];
        let closes = [10.0; 12];
        let (k, d, _) = kdj_last(&highs, &lows, &closes, 9).expect("enough data");
        assert!((k - 50.0).abs() < 0.01);
        assert!((d - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_bollinger() {
        let b = bollinger_last(&[1.0, 2.0, 3.0, 4.0], 4, 2.0).expect("enough data");
        assert_eq!(b.middle, 2.5);
        assert!((b.upper - b.lower - 4.0 * 1.290994).abs() < 1e-5);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(-1.235, 0), -1.0);
        assert_eq!(round_to(1234.5, 0), 1235.0);
    }
}
