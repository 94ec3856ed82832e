use kline_store::BarSeries;
use tracing::debug;

use crate::config::FeatureConfig;

/// 거래량 급증 시작점 탐색기
///
/// 목표 시점 직전부터 거슬러 올라가며 직전 봉 대비 거래량 비율이
/// `min_ratio` 이상인 봉을 찾고, 그중 가장 이른 봉을 급증 시작점으로 본다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSurgeLocator {
    pub min_ratio: f64,
    pub lookback: usize,
    /// 급증 지점이 없을 때 목표 시점에서 거슬러 올라갈 봉 수
    pub fallback_offset: usize,
}

impl Default for VolumeSurgeLocator {
    fn default() -> Self {
        Self {
            min_ratio: 3.0,
            lookback: 52,
            fallback_offset: 20,
        }
    }
}

impl VolumeSurgeLocator {
    pub fn from_config(config: &FeatureConfig) -> Self {
        Self {
            min_ratio: config.surge_min_ratio,
            lookback: config.surge_lookback,
            fallback_offset: config.fallback_offset,
        }
    }

    pub fn find_surge(&self, series: &BarSeries, target_index: usize) -> Option<usize> {
        find_surge(series, target_index, self.min_ratio, self.lookback)
    }

    /// 급증 시작점, 없으면 `target - fallback_offset` (0 미만이면 0)
    pub fn anchor(&self, series: &BarSeries, target_index: usize) -> usize {
        match self.find_surge(series, target_index) {
            Some(index) => index,
            None => {
                debug!(
                    "📉 [Surge] 거래량 급증 없음, {}봉 전으로 대체",
                    self.fallback_offset
                );
                target_index.saturating_sub(self.fallback_offset)
            }
        }
    }
}

/// `[max(1, target - lookback), target - 1]` 구간에서 가장 이른 급증 봉의 인덱스
///
/// 직전 봉 거래량이 0 이하인 봉은 비율을 정의할 수 없으므로 건너뛴다.
pub fn find_surge(series: &BarSeries, target_index: usize, min_ratio: f64, lookback: usize) -> Option<usize> {
    let bars = series.bars();
    let target = target_index.min(bars.len());
    if target < 2 {
        return None;
    }
    let start = target.saturating_sub(lookback).max(1);

    let mut earliest = None;
    for i in (start..target).rev() {
        let prev = bars[i - 1].volume;
        if prev <= 0.0 {
            continue;
        }
        if bars[i].volume / prev >= min_ratio {
            earliest = Some(i);
        }
    }
    earliest
}
