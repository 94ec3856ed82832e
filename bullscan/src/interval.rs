use chrono::NaiveDate;
use kline_store::BarSeries;
use serde::{Deserialize, Serialize};

/// 시작 봉 종가 대비 이후 최고가까지의 상승 구간
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainInterval {
    pub start_index: usize,
    pub end_index: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_price: f64,
    pub end_price: f64,
    pub gain_pct: f64,
}

impl GainInterval {
    pub fn weeks(&self) -> usize {
        self.end_index - self.start_index
    }
}

/// `search_weeks`봉 이내 최대 상승 구간 탐색
///
/// 모든 시작점에 대해 창 안의 최고가를 찾아 상승률이 가장 큰 구간을 고른다.
/// 최대 상승률이 `min_gain_pct` 미만이거나 시퀀스가 창보다 짧으면 `None`.
pub fn find_max_gain_interval(series: &BarSeries, search_weeks: usize, min_gain_pct: f64) -> Option<GainInterval> {
    let bars = series.bars();
    if search_weeks == 0 || bars.len() < search_weeks {
        return None;
    }

    let mut best: Option<GainInterval> = None;
    for start in 0..=(bars.len() - search_weeks) {
        let start_bar = &bars[start];
        if start_bar.close <= 0.0 {
            continue;
        }
        let end = (start + search_weeks).min(bars.len());

        let mut peak = start;
        for i in start..end {
            if bars[i].high > bars[peak].high {
                peak = i;
            }
        }
        let gain = (bars[peak].high - start_bar.close) / start_bar.close * 100.0;

        if best.as_ref().map_or(true, |b| gain > b.gain_pct) {
            best = Some(GainInterval {
                start_index: start,
                end_index: peak,
                start_date: start_bar.date,
                end_date: bars[peak].date,
                start_price: start_bar.close,
                end_price: bars[peak].high,
                gain_pct: gain,
            });
        }
    }

    best.filter(|b| b.gain_pct >= min_gain_pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kline_store::Bar;

    fn series(closes: &[f64]) -> BarSeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid date");
        BarSeries::new(
            closes
                .iter()
                .enumerate()
                .map(|(i, c)| Bar::new(start + Duration::weeks(i as i64), *c, *c, *c, *c, 1.0))
                .collect(),
        )
        .expect("valid series")
    }

    #[test]
    fn test_finds_doubling() {
        let s = series(&[10.0, 9.0, 12.0, 15.0, 20.0, 19.0, 18.0, 10.0]);
        let interval = find_max_gain_interval(&s, 5, 100.0).expect("doubling found");
        assert_eq!(interval.start_index, 1);
        assert_eq!(interval.end_index, 4);
        assert_eq!(interval.weeks(), 3);
        assert!((interval.gain_pct - 122.222).abs() < 0.01);
    }

    #[test]
    fn test_below_min_gain() {
        let s = series(&[10.0, 11.0, 12.0, 13.0]);
        assert!(find_max_gain_interval(&s, 3, 100.0).is_none());
        assert!(find_max_gain_interval(&s, 3, 10.0).is_some());
    }

    #[test]
    fn test_window_longer_than_series() {
        let s = series(&[10.0, 30.0]);
        assert!(find_max_gain_interval(&s, 10, 50.0).is_none());
    }
}
