use chrono::NaiveDate;
use kline_store::{Bar, BarSeries};
use tracing::debug;

use super::indicators::{
    bollinger_last, kdj_last, macd_last, max_of, mean, min_of, obv_series, pct_changes, pearson,
    rsi_last, sma_last, sma_series,
};
use super::schema::{Feature, FeatureVector};
use crate::config::FeatureConfig;

pub const DEFAULT_LOOKBACK: usize = 40;
pub const DEFAULT_MIN_HISTORY: usize = 20;

const LIMIT_UP_PCT: f64 = 9.5;
const LIMIT_UP_DAYS: usize = 44;
const SMOOTHNESS_MIN_DAILY_BARS: usize = 65;
const SMOOTHNESS_CHANGES: usize = 60;
const SMOOTHNESS_MAX: f64 = 25.0;

/// 주봉 시퀀스의 특정 시점에서 특징 벡터를 계산
///
/// 평가 시점 이전 `min(lookback, eval_index)`개의 봉을 창으로 사용하고,
/// 가격과 거래량은 평가 시점 봉의 값을 사용한다.
/// 창이 `min_history`보다 짧으면 값을 지어내지 않고 `None`을 반환한다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureExtractor {
    lookback: usize,
    min_history: usize,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK, DEFAULT_MIN_HISTORY)
    }
}

impl FeatureExtractor {
    pub fn new(lookback: usize, min_history: usize) -> Self {
        Self {
            lookback,
            min_history,
        }
    }

    pub fn from_config(config: &FeatureConfig) -> Self {
        Self::new(config.lookback, config.min_history)
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn min_history(&self) -> usize {
        self.min_history
    }

    pub fn extract(&self, series: &BarSeries, eval_index: usize) -> Option<FeatureVector> {
        self.extract_with_daily(series, eval_index, None)
    }

    /// 일봉이 주어지면 limit_up_recent, ma_smoothness를 추가로 계산
    pub fn extract_with_daily(
        &self,
        series: &BarSeries,
        eval_index: usize,
        daily: Option<&BarSeries>,
    ) -> Option<FeatureVector> {
        let eval = series.get(eval_index)?;
        let actual = self.lookback.min(eval_index);
        if actual < self.min_history {
            debug!(
                "🔍 [Features] 이력 부족: 필요 {}개, 보유 {}개",
                self.min_history, actual
            );
            return None;
        }

        let window = Window::new(&series.bars()[eval_index - actual..eval_index], eval);
        let mut fv = FeatureVector::new();

        volume_features(&window, &mut fv);
        price_features(&window, &mut fv);
        moving_average_features(&window, &mut fv);
        oscillator_features(&window, &mut fv);
        co_movement_features(&window, &mut fv);
        chip_features(&window, &mut fv);

        if let Some(daily) = daily {
            daily_features(daily, eval.date, &mut fv);
        }

        debug!(
            "🧮 [Features] {} 기준 창 {}개, 특징 {}개 {:?}",
            eval.date,
            actual,
            fv.len(),
            fv.count_by_category()
        );
        Some(fv)
    }
}

/// 기본 설정(lookback 40, 최소 이력 20)으로 특징 추출
pub fn extract(series: &BarSeries, eval_index: usize, lookback: usize) -> Option<FeatureVector> {
    FeatureExtractor::new(lookback, DEFAULT_MIN_HISTORY.min(lookback)).extract(series, eval_index)
}

struct Window<'a> {
    bars: &'a [Bar],
    eval: &'a Bar,
    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
    volumes: Vec<f64>,
}

impl<'a> Window<'a> {
    fn new(bars: &'a [Bar], eval: &'a Bar) -> Self {
        Self {
            bars,
            eval,
            closes: bars.iter().map(|b| b.close).collect(),
            highs: bars.iter().map(|b| b.high).collect(),
            lows: bars.iter().map(|b| b.low).collect(),
            volumes: bars.iter().map(|b| b.volume).collect(),
        }
    }

    fn len(&self) -> usize {
        self.bars.len()
    }

    /// 창 길이가 레지스트리의 `min_window` 이상인지
    fn supports(&self, feature: Feature) -> bool {
        self.len() >= feature.spec().min_window
    }

    /// 창이 짧으면 값을 버린다
    fn put(&self, fv: &mut FeatureVector, feature: Feature, value: f64) {
        if self.supports(feature) {
            fv.insert(feature, value);
        }
    }

    fn put_flag(&self, fv: &mut FeatureVector, feature: Feature, flag: bool) {
        if self.supports(feature) {
            fv.insert_flag(feature, flag);
        }
    }

    fn price(&self) -> f64 {
        self.eval.close
    }

    fn tail<'b>(&self, x: &'b [f64], n: usize) -> &'b [f64] {
        &x[x.len().saturating_sub(n)..]
    }
}

fn ratio_or_one(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        1.0
    }
}

fn volume_features(w: &Window, fv: &mut FeatureVector) {
    let n = w.len();
    let volume = w.eval.volume;

    let avg10 = sma_last(&w.volumes, 10);
    w.put(fv, Feature::AvgVolume10, avg10);
    w.put(fv, Feature::VolumeRatio, ratio_or_one(volume, avg10));
    if w.supports(Feature::AvgVolume20) {
        let avg20 = sma_last(&w.volumes, 20);
        w.put(fv, Feature::AvgVolume20, avg20);
        w.put(fv, Feature::VolumeRatio20, ratio_or_one(volume, avg20));
        w.put(fv, Feature::VolumeContraction, ratio_or_one(avg10, avg20));
    }
    if w.supports(Feature::AvgVolume40) {
        let avg40 = sma_last(&w.volumes, 40);
        w.put(fv, Feature::AvgVolume40, avg40);
        w.put(fv, Feature::VolumeRatio40, ratio_or_one(volume, avg40));
    }

    // 최근 40봉 중 최대 거래량 봉 (동률이면 먼저 나온 봉)
    let recent = &w.bars[n.saturating_sub(40)..];
    let mut max_bar: Option<&Bar> = None;
    for bar in recent {
        if max_bar.map_or(true, |m| bar.volume > m.volume) {
            max_bar = Some(bar);
        }
    }
    let Some(max_bar) = max_bar else {
        return;
    };

    w.put(fv, Feature::MaxVolume40, max_bar.volume);
    w.put(fv, Feature::MaxVolumeLow, max_bar.low);
    if max_bar.low > 0.0 {
        let below = w.price() < max_bar.low;
        w.put_flag(fv, Feature::BelowMaxVolumeLow, below);
        let drop = if below {
            (max_bar.low - w.price()) / max_bar.low * 100.0
        } else {
            0.0
        };
        w.put(fv, Feature::MaxVolumeLowDropPct, drop);
    }
    if max_bar.volume > 0.0 {
        w.put(fv, Feature::VolumeVsMaxVolume, volume / max_bar.volume);
    }
}

fn close_volatility(closes: &[f64]) -> f64 {
    let lo = min_of(closes);
    if lo > 0.0 {
        (max_of(closes) - lo) / lo * 100.0
    } else {
        f64::NAN
    }
}

fn price_features(w: &Window, fv: &mut FeatureVector) {
    let n = w.len();
    let price = w.price();

    if w.supports(Feature::Volatility10) {
        w.put(fv, Feature::Volatility10, close_volatility(w.tail(&w.closes, 10)));
    }

    if w.supports(Feature::High20) {
        let high20 = max_of(w.tail(&w.highs, 20));
        let low20 = min_of(w.tail(&w.lows, 20));
        w.put(fv, Feature::High20, high20);
        w.put(fv, Feature::Low20, low20);

        if high20 > low20 {
            w.put(fv, Feature::PricePosition, (price - low20) / (high20 - low20) * 100.0);
        } else {
            w.put(fv, Feature::PricePosition, 50.0);
        }
        if high20 > 0.0 {
            w.put(fv, Feature::DrawdownFromHigh, (high20 - price) / high20 * 100.0);
        }
        if low20 > 0.0 {
            w.put(fv, Feature::Range20Pct, (high20 - low20) / low20 * 100.0);
        }

        w.put_flag(fv, Feature::BreaksHigh20, price > high20);
        w.put_flag(fv, Feature::NearHigh20, price > high20 * 0.95);
        w.put(fv, Feature::Volatility20, close_volatility(w.tail(&w.closes, 20)));

        let sideways = w.bars[n - 20..]
            .iter()
            .filter(|b| b.low > 0.0 && (b.high - b.low) / b.low * 100.0 < 10.0)
            .count();
        w.put(fv, Feature::SidewaysBars, sideways as f64);
    }

    if w.supports(Feature::High40) {
        let high40 = max_of(w.tail(&w.highs, 40));
        w.put(fv, Feature::High40, high40);
        w.put(fv, Feature::Low40, min_of(w.tail(&w.lows, 40)));
        w.put_flag(fv, Feature::BreaksHigh40, price > high40);
    }
}

fn moving_average_features(w: &Window, fv: &mut FeatureVector) {
    let n = w.len();
    let price = w.price();

    for (period, ma_feature, offset_feature) in [
        (5, Feature::Ma5, Feature::PriceVsMa5),
        (10, Feature::Ma10, Feature::PriceVsMa10),
        (20, Feature::Ma20, Feature::PriceVsMa20),
        (40, Feature::Ma40, Feature::PriceVsMa40),
    ] {
        if !w.supports(ma_feature) {
            continue;
        }
        let ma = sma_last(&w.closes, period);
        if ma > 0.0 {
            w.put(fv, ma_feature, ma);
            w.put(fv, offset_feature, (price - ma) / ma * 100.0);
        }
    }

    if !w.supports(Feature::Ma20Slope) {
        return;
    }

    // 최근 5봉 평균 vs 15~20봉 전 평균
    let recent = mean(&w.closes[n - 5..]);
    let earlier = mean(&w.closes[n - 20..n - 15]);
    if earlier > 0.0 {
        w.put(fv, Feature::Ma20Slope, (recent - earlier) / earlier * 100.0);
    }

    let ma5 = sma_last(&w.closes, 5);
    let ma10 = sma_last(&w.closes, 10);
    let ma20 = sma_last(&w.closes, 20);
    if price > 0.0 {
        let center = (ma5 + ma10 + ma20) / 3.0;
        let spread = ((ma5 - center).abs() + (ma10 - center).abs() + (ma20 - center).abs()) / 3.0;
        w.put(fv, Feature::MaConvergence, spread / price * 100.0);
    }
    w.put_flag(fv, Feature::MaBullishAlignment, ma5 > ma10 && ma10 > ma20);
}

fn oscillator_features(w: &Window, fv: &mut FeatureVector) {
    let n = w.len();
    let price = w.price();

    if let Some(macd) = macd_last(&w.closes, 12, 26, 9) {
        w.put(fv, Feature::MacdDif, macd.dif);
        w.put(fv, Feature::MacdDea, macd.dea);
        w.put(fv, Feature::MacdHist, macd.hist);
        let diff = macd.dif - macd.dea;
        w.put_flag(fv, Feature::MacdGoldenCross, macd.prev_diff < 0.0 && diff >= 0.0);
        w.put_flag(fv, Feature::MacdAboveZero, macd.dif > 0.0);
    }

    if w.supports(Feature::Rsi) {
        let rsi = rsi_last(&w.closes, 14);
        if rsi.is_finite() {
            w.put(fv, Feature::Rsi, rsi);
            w.put_flag(fv, Feature::RsiOversold, rsi < 30.0);
            w.put_flag(fv, Feature::RsiStrong, rsi > 50.0 && rsi < 70.0);
        }
    }

    if let Some((k, d, j)) = kdj_last(&w.highs, &w.lows, &w.closes, 9) {
        w.put(fv, Feature::KdjK, k);
        w.put(fv, Feature::KdjD, d);
        w.put(fv, Feature::KdjJ, j);
        w.put_flag(fv, Feature::KdjOversold, k < 20.0 && d < 20.0);
    }

    if w.supports(Feature::ObvTrend) {
        let obv = obv_series(&w.closes, &w.volumes);
        let last = obv[n - 1];
        let base = obv[n - 10];
        w.put(fv, Feature::ObvTrend, (last - base) / (base.abs() + 1.0) * 100.0);
        if w.supports(Feature::ObvNewHigh) {
            w.put_flag(fv, Feature::ObvNewHigh, last >= max_of(&obv[n - 20..]) * 0.95);
        }
    }

    if let Some(boll) = bollinger_last(&w.closes, 20, 2.0) {
        let width = boll.width_pct();
        w.put(fv, Feature::BollWidth, width);
        w.put(
            fv,
            Feature::BollPosition,
            (price - boll.lower) / (boll.upper - boll.lower + 0.01) * 100.0,
        );
        // 10봉 전 밴드 폭 대비 수축 여부
        if w.supports(Feature::BollSqueeze) {
            if let Some(prev) = bollinger_last(&w.closes[..n - 9], 20, 2.0) {
                if prev.middle > 0.0 {
                    w.put_flag(fv, Feature::BollSqueeze, width < prev.width_pct() * 0.8);
                }
            }
        }
    }
}

fn co_movement_features(w: &Window, fv: &mut FeatureVector) {
    if w.supports(Feature::PriceVolumeCorr) {
        let price_changes = pct_changes(w.tail(&w.closes, 20));
        let volume_changes = pct_changes(w.tail(&w.volumes, 20));
        let (xs, ys): (Vec<f64>, Vec<f64>) = price_changes
            .iter()
            .zip(&volume_changes)
            .filter(|(p, v)| p.is_finite() && v.is_finite())
            .map(|(p, v)| (*p, *v))
            .unzip();
        if xs.len() > 5 {
            let corr = pearson(&xs, &ys);
            if corr.is_finite() {
                w.put(fv, Feature::PriceVolumeCorr, corr);
            }
        }
    }

    if let Some(prev) = w.bars.last() {
        let price_up = w.eval.close > prev.close;
        let volume_up = w.eval.volume > prev.volume;
        w.put_flag(fv, Feature::PriceUp, price_up);
        w.put_flag(fv, Feature::VolumeUp, volume_up);
        w.put_flag(fv, Feature::PriceUpVolumeUp, price_up && volume_up);
    }
}

fn chip_features(w: &Window, fv: &mut FeatureVector) {
    if !w.supports(Feature::CostDeviation) {
        return;
    }
    let recent = &w.bars[w.len() - 20..];
    let total_volume: f64 = recent.iter().map(|b| b.volume).sum();
    if total_volume <= 0.0 {
        return;
    }
    let vwap = recent.iter().map(|b| b.close * b.volume).sum::<f64>() / total_volume;
    if vwap <= 0.0 {
        return;
    }
    w.put(fv, Feature::CostDeviation, (w.price() - vwap) / vwap * 100.0);
    let variance = recent
        .iter()
        .map(|b| (b.close - vwap).powi(2) * b.volume)
        .sum::<f64>()
        / total_volume;
    w.put(fv, Feature::ChipConcentration, variance.sqrt() / vwap * 100.0);
}

/// 일봉 기반 특징: 최근 상한가 여부와 MA5 방향 전환 횟수
fn daily_features(daily: &BarSeries, eval_date: NaiveDate, fv: &mut FeatureVector) {
    let before = daily.before(eval_date);
    let closes = before.closes();
    let recent = &closes[closes.len().saturating_sub(LIMIT_UP_DAYS)..];
    if recent.len() >= 2 {
        let limit_up = pct_changes(recent)
            .iter()
            .any(|c| c.is_finite() && c * 100.0 >= LIMIT_UP_PCT);
        fv.insert_flag(Feature::LimitUpRecent, limit_up);
    } else {
        fv.insert_flag(Feature::LimitUpRecent, false);
    }

    let upto = daily.up_to(eval_date).closes();
    if upto.len() < SMOOTHNESS_MIN_DAILY_BARS {
        return;
    }
    let ma5 = sma_series(&upto, 5);
    let changes = pct_changes(&ma5);
    let tail = &changes[changes.len().saturating_sub(SMOOTHNESS_CHANGES)..];
    let signs: Vec<f64> = tail
        .iter()
        .map(|c| {
            if *c > 0.0 {
                1.0
            } else if *c < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
        .collect();
    let flips = signs.windows(2).filter(|s| s[0] != s[1]).count() as f64;
    fv.insert(Feature::MaSmoothness, SMOOTHNESS_MAX - flips.min(SMOOTHNESS_MAX));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::schema::Category;
    use chrono::Duration;

    fn weekly(closes: &[f64], volumes: &[f64]) -> BarSeries {
        let start = NaiveDate::from_ymd_opt(2022, 1, 2).expect("valid date");
        BarSeries::new(
            closes
                .iter()
                .zip(volumes)
                .enumerate()
                .map(|(i, (c, v))| Bar::new(start + Duration::weeks(i as i64), *c, *c, c * 1.02, c * 0.98, *v))
                .collect(),
        )
        .expect("valid series")
    }

    fn trending(len: usize) -> BarSeries {
        let closes: Vec<f64> = (0..len).map(|i| 10.0 + i as f64 * 0.1 + (i % 3) as f64 * 0.05).collect();
        let volumes: Vec<f64> = (0..len).map(|i| 1000.0 + (i % 7) as f64 * 100.0).collect();
        weekly(&closes, &volumes)
    }

    #[test]
    fn test_insufficient_history_returns_none() {
        let series = trending(60);
        let extractor = FeatureExtractor::default();
        assert!(extractor.extract(&series, 19).is_none());
        assert!(extractor.extract(&series, 20).is_some());
        assert!(extractor.extract(&series, 60).is_none());
    }

    #[test]
    fn test_deterministic() {
        let series = trending(60);
        let a = extract(&series, 50, 40);
        let b = extract(&series, 50, 40);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_window_limits_optional_features() {
        let series = trending(60);
        let short = extract(&series, 25, 40).expect("enough history");
        assert!(short.contains(Feature::VolumeRatio));
        assert!(short.contains(Feature::PricePosition));
        assert!(!short.contains(Feature::AvgVolume40));
        assert!(!short.contains(Feature::MacdDif));

        let long = extract(&series, 55, 40).expect("enough history");
        assert!(long.contains(Feature::AvgVolume40));
        assert!(long.contains(Feature::MacdDif));
        assert!(long.contains(Feature::BollSqueeze));
        assert!(!long.contains(Feature::LimitUpRecent));
    }

    #[test]
    fn test_every_feature_respects_min_window() {
        let extractor = FeatureExtractor::new(40, 5);
        for len in 6..=47 {
            let series = trending(len);
            let eval_index = len - 1;
            let actual = eval_index.min(40);
            let fv = extractor.extract(&series, eval_index).expect("enough history");
            for (feature, _) in fv.iter() {
                assert!(
                    feature.spec().min_window <= actual,
                    "{} 창 {}개로 계산됨 (필요 {})",
                    feature,
                    actual,
                    feature.spec().min_window
                );
            }
            for feature in Feature::ALL {
                let spec = feature.spec();
                if spec.category == Category::Daily {
                    assert!(!fv.contains(*feature));
                }
            }
            assert_eq!(fv.contains(Feature::AvgVolume40), actual >= 40);
            assert_eq!(fv.contains(Feature::High40), actual >= 40);
            assert_eq!(fv.contains(Feature::MacdDif), actual >= 26);
            assert_eq!(fv.contains(Feature::PricePosition), actual >= 20);
            assert_eq!(fv.contains(Feature::KdjK), actual >= 9);
            assert!(fv.contains(Feature::PriceUp));
        }
    }

    #[test]
    fn test_volume_ratio_uses_eval_bar() {
        let mut volumes = vec![100.0; 30];
        volumes[25] = 500.0;
        let closes = vec![10.0; 30];
        let series = weekly(&closes, &volumes);
        let fv = extract(&series, 25, 40).expect("enough history");
        assert_eq!(fv.get(Feature::VolumeRatio), Some(5.0));
        assert_eq!(fv.get(Feature::VolumeContraction), Some(1.0));
        assert_eq!(fv.get(Feature::PriceUpVolumeUp), Some(0.0));
        assert_eq!(fv.get(Feature::VolumeUp), Some(1.0));
    }

    #[test]
    fn test_flat_price_position_is_midpoint() {
        let start = NaiveDate::from_ymd_opt(2022, 1, 2).expect("valid date");
        let series = BarSeries::new(
            (0..25)
                .map(|i| Bar::new(start + Duration::weeks(i), 10.0, 10.0, 10.0, 10.0, 100.0))
                .collect(),
        )
        .expect("valid series");
        let fv = extract(&series, 24, 40).expect("enough history");
        assert_eq!(fv.get(Feature::PricePosition), Some(50.0));
        assert_eq!(fv.get(Feature::MaConvergence), Some(0.0));
        assert_eq!(fv.get(Feature::BelowMaxVolumeLow), Some(0.0));
        assert_eq!(fv.get(Feature::SidewaysBars), Some(20.0));
    }

    #[test]
    fn test_below_max_volume_low() {
        let mut closes = vec![10.0; 30];
        let mut volumes = vec![100.0; 30];
        volumes[10] = 1000.0;
        closes[29] = 8.0;
        let series = weekly(&closes, &volumes);
        let fv = extract(&series, 29, 40).expect("enough history");
        assert_eq!(fv.get(Feature::BelowMaxVolumeLow), Some(1.0));
        assert_eq!(fv.get(Feature::MaxVolumeLow), Some(9.8));
        // (9.8 - 8.0) / 9.8 * 100
        assert_eq!(fv.get(Feature::MaxVolumeLowDropPct), Some(18.37));
    }

    #[test]
    fn test_daily_enrichment() {
        let weekly_series = trending(30);
        let eval_index = 29;
        let eval_date = weekly_series.get(eval_index).expect("bar").date;

        let start = eval_date - Duration::days(100);
        let mut daily_bars = Vec::new();
        let mut price = 10.0;
        for i in 0..100 {
            // 마지막 구간에 상한가 하나
            price *= if i == 95 { 1.10 } else { 1.001 };
            daily_bars.push(Bar::new(start + Duration::days(i), price, price, price, price, 100.0));
        }
        let daily = BarSeries::new(daily_bars).expect("valid daily");

        let fv = FeatureExtractor::default()
            .extract_with_daily(&weekly_series, eval_index, Some(&daily))
            .expect("enough history");
        assert_eq!(fv.get(Feature::LimitUpRecent), Some(1.0));
        // 단조 증가이므로 방향 전환 없음
        assert_eq!(fv.get(Feature::MaSmoothness), Some(25.0));
    }

    #[test]
    fn test_daily_smoothness_needs_history() {
        let weekly_series = trending(30);
        let eval_date = weekly_series.get(29).expect("bar").date;
        let daily = BarSeries::new(
            (0..30)
                .map(|i| Bar::new(eval_date - Duration::days(40 - i), 10.0, 10.0, 10.0, 10.0, 1.0))
                .collect(),
        )
        .expect("valid daily");
        let fv = FeatureExtractor::default()
            .extract_with_daily(&weekly_series, 29, Some(&daily))
            .expect("enough history");
        assert_eq!(fv.get(Feature::LimitUpRecent), Some(0.0));
        assert!(!fv.contains(Feature::MaSmoothness));
    }
}
