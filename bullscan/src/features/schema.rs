use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::indicators::round_to;

/// 특징 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Volume,
    Price,
    MovingAverage,
    Oscillator,
    CoMovement,
    Chip,
    Daily,
}

/// 값의 성격 (반올림 자릿수와 함께 사용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Ratio,
    Percent,
    Price,
    Volume,
    Flag,
    Count,
    Oscillator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSpec {
    pub category: Category,
    pub kind: ValueKind,
    pub decimals: u32,
    /// 이 특징을 계산하는 데 필요한 최소 주봉 수 (일봉 특징은 0)
    pub min_window: usize,
    pub core: bool,
}

macro_rules! feature_registry {
    ($( $variant:ident => $name:literal, $category:ident, $kind:ident, $decimals:literal, $window:literal, $core:literal; )*) => {
        /// 특징 이름 레지스트리
        ///
        /// 새 특징은 아래 표에 한 줄을 추가하고 추출 로직에서 값을 채우면 된다.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Feature {
            $($variant),*
        }

        impl Feature {
            pub const ALL: &'static [Feature] = &[$(Feature::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Feature::$variant => $name),*
                }
            }

            pub fn spec(self) -> FeatureSpec {
                match self {
                    $(Feature::$variant => FeatureSpec {
                        category: Category::$category,
                        kind: ValueKind::$kind,
                        decimals: $decimals,
                        min_window: $window,
                        core: $core,
                    }),*
                }
            }
        }
    };
}

feature_registry! {
    VolumeRatio => "volume_ratio", Volume, Ratio, 2, 10, true;
    VolumeRatio20 => "volume_ratio_20", Volume, Ratio, 2, 20, false;
    VolumeRatio40 => "volume_ratio_40", Volume, Ratio, 2, 40, false;
    AvgVolume10 => "avg_volume_10", Volume, Volume, 0, 10, false;
    AvgVolume20 => "avg_volume_20", Volume, Volume, 0, 20, false;
    AvgVolume40 => "avg_volume_40", Volume, Volume, 0, 40, false;
    VolumeContraction => "volume_contraction", Volume, Ratio, 2, 20, true;
    MaxVolume40 => "max_volume_40", Volume, Volume, 0, 1, false;
    MaxVolumeLow => "max_volume_low", Volume, Price, 2, 1, false;
    BelowMaxVolumeLow => "below_max_volume_low", Volume, Flag, 0, 1, true;
    MaxVolumeLowDropPct => "max_volume_low_drop_pct", Volume, Percent, 2, 1, false;
    VolumeVsMaxVolume => "volume_vs_max_volume", Volume, Ratio, 2, 1, false;

    PricePosition => "price_position", Price, Percent, 2, 20, true;
    DrawdownFromHigh => "drawdown_from_high", Price, Percent, 2, 20, false;
    High20 => "high_20", Price, Price, 2, 20, false;
    Low20 => "low_20", Price, Price, 2, 20, false;
    Range20Pct => "range_20_pct", Price, Percent, 2, 20, false;
    High40 => "high_40", Price, Price, 2, 40, false;
    Low40 => "low_40", Price, Price, 2, 40, false;
    Volatility10 => "volatility_10", Price, Percent, 2, 10, false;
    Volatility20 => "volatility_20", Price, Percent, 2, 20, true;
    BreaksHigh20 => "breaks_high_20", Price, Flag, 0, 20, false;
    NearHigh20 => "near_high_20", Price, Flag, 0, 20, false;
    BreaksHigh40 => "breaks_high_40", Price, Flag, 0, 40, false;
    SidewaysBars => "sideways_bars", Price, Count, 0, 20, false;

    Ma5 => "ma5", MovingAverage, Price, 2, 5, false;
    Ma10 => "ma10", MovingAverage, Price, 2, 10, false;
    Ma20 => "ma20", MovingAverage, Price, 2, 20, false;
    Ma40 => "ma40", MovingAverage, Price, 2, 40, false;
    PriceVsMa5 => "price_vs_ma5", MovingAverage, Percent, 2, 5, false;
    PriceVsMa10 => "price_vs_ma10", MovingAverage, Percent, 2, 10, false;
    PriceVsMa20 => "price_vs_ma20", MovingAverage, Percent, 2, 20, true;
    PriceVsMa40 => "price_vs_ma40", MovingAverage, Percent, 2, 40, false;
    Ma20Slope => "ma20_slope", MovingAverage, Percent, 2, 20, false;
    MaConvergence => "ma_convergence", MovingAverage, Percent, 2, 20, true;
    MaBullishAlignment => "ma_bullish_alignment", MovingAverage, Flag, 0, 20, true;

    MacdDif => "macd_dif", Oscillator, Oscillator, 4, 26, false;
    MacdDea => "macd_dea", Oscillator, Oscillator, 4, 26, false;
    MacdHist => "macd_hist", Oscillator, Oscillator, 4, 26, false;
    MacdGoldenCross => "macd_golden_cross", Oscillator, Flag, 0, 26, false;
    MacdAboveZero => "macd_above_zero", Oscillator, Flag, 0, 26, true;
    Rsi => "rsi", Oscillator, Oscillator, 2, 15, true;
    RsiOversold => "rsi_oversold", Oscillator, Flag, 0, 15, false;
    RsiStrong => "rsi_strong", Oscillator, Flag, 0, 15, false;
    KdjK => "kdj_k", Oscillator, Oscillator, 2, 9, false;
    KdjD => "kdj_d", Oscillator, Oscillator, 2, 9, false;
    KdjJ => "kdj_j", Oscillator, Oscillator, 2, 9, false;
    KdjOversold => "kdj_oversold", Oscillator, Flag, 0, 9, false;
    ObvTrend => "obv_trend", Oscillator, Percent, 2, 10, true;
    ObvNewHigh => "obv_new_high", Oscillator, Flag, 0, 20, false;
    BollWidth => "boll_width", Oscillator, Percent, 2, 20, true;
    BollPosition => "boll_position", Oscillator, Percent, 2, 20, false;
    BollSqueeze => "boll_squeeze", Oscillator, Flag, 0, 29, false;

    PriceVolumeCorr => "price_volume_corr", CoMovement, Ratio, 3, 20, false;
    PriceUp => "price_up", CoMovement, Flag, 0, 1, false;
    VolumeUp => "volume_up", CoMovement, Flag, 0, 1, false;
    PriceUpVolumeUp => "price_up_volume_up", CoMovement, Flag, 0, 1, false;

    CostDeviation => "cost_deviation", Chip, Percent, 2, 20, false;
    ChipConcentration => "chip_concentration", Chip, Percent, 2, 20, false;

    LimitUpRecent => "limit_up_recent", Daily, Flag, 0, 0, true;
    MaSmoothness => "ma_smoothness", Daily, Count, 0, 0, true;
}

impl Feature {
    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.name() == name)
    }

    pub fn is_core(self) -> bool {
        self.spec().core
    }

    pub fn core_features() -> impl Iterator<Item = Feature> {
        Feature::ALL.iter().copied().filter(|f| f.is_core())
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Feature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Feature::from_name(&name).ok_or_else(|| de::Error::custom(format!("알 수 없는 특징: {}", name)))
    }
}

/// 한 평가 시점의 특징 값 모음
///
/// 값은 삽입 시 레지스트리의 종류와 자릿수에 맞춰 정규화되며 유한하지 않은 값은 버린다.
/// `Flag`는 0/1로, `Count`는 정수로 저장된다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: BTreeMap<Feature, f64>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: Feature, value: f64) {
        if !value.is_finite() {
            return;
        }
        let spec = feature.spec();
        let value = match spec.kind {
            ValueKind::Flag => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ValueKind::Count => value.round(),
            _ => round_to(value, spec.decimals),
        };
        self.values.insert(feature, value);
    }

    pub fn insert_flag(&mut self, feature: Feature, flag: bool) {
        self.values.insert(feature, if flag { 1.0 } else { 0.0 });
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.values.contains_key(&feature)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }

    /// 분류별 특징 개수
    pub fn count_by_category(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for feature in self.values.keys() {
            *counts.entry(feature.spec().category).or_insert(0) += 1;
        }
        counts
    }
}
