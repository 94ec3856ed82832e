use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ScoringSection;
use crate::features::indicators::round_to;
use crate::features::{Feature, FeatureVector};
use crate::template::{FeatureStats, FeatureTemplate};

/// 가중 평균 위에 얹는 가산점 정책
///
/// 모든 가산점은 곱/합으로 누적된 뒤 1.0으로 상한이 걸린다.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BonusPolicy {
    pub enabled: bool,
    /// 핵심 특징 평균이 이 값 이상이면 `core_high_multiplier`
    pub core_high: f64,
    pub core_high_multiplier: f64,
    pub core_mid: f64,
    pub core_mid_multiplier: f64,
    /// 점수가 `high_match_score` 이상인 특징 비율이 `high_match_ratio` 이상이면 가산
    pub high_match_score: f64,
    pub high_match_ratio: f64,
    pub high_match_multiplier: f64,
    /// 이평선 수렴도가 템플릿 중앙값보다 낮을 때 더하는 최대 점수
    pub ma_convergence_reward: f64,
}

impl Default for BonusPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            core_high: 0.8,
            core_high_multiplier: 1.15,
            core_mid: 0.7,
            core_mid_multiplier: 1.10,
            high_match_score: 0.8,
            high_match_ratio: 0.8,
            high_match_multiplier: 1.10,
            ma_convergence_reward: 0.02,
        }
    }
}

impl BonusPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// 핵심 특징의 가우시안 감쇠 계수 (일반 특징보다 완만)
    pub core_decay: f64,
    pub normal_decay: f64,
    pub core_weight: f64,
    pub normal_weight: f64,
    /// [min, max] 범위 안 값의 최저 점수
    pub in_range_floor: f64,
    /// 범위를 (max - min) * tolerance 만큼 양쪽으로 넓힘
    pub tolerance: f64,
    pub bonus: BonusPolicy,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            core_decay: 0.2,
            normal_decay: 0.35,
            core_weight: 3.0,
            normal_weight: 1.0,
            in_range_floor: 0.7,
            tolerance: 0.0,
            bonus: BonusPolicy::default(),
        }
    }
}

impl ScoringConfig {
    pub fn from_section(section: &ScoringSection) -> Self {
        Self {
            core_decay: section.core_decay,
            normal_decay: section.normal_decay,
            core_weight: section.core_weight,
            normal_weight: section.normal_weight,
            in_range_floor: section.in_range_floor,
            tolerance: section.tolerance,
            bonus: if section.bonus_enabled {
                BonusPolicy::default()
            } else {
                BonusPolicy::disabled()
            },
        }
    }
}

/// 매칭 결과
///
/// `total_score`는 [0, 1] 범위의 휴리스틱 유사도이며 확률이 아니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub total_score: f64,
    pub matched_feature_count: usize,
    pub core_scores: BTreeMap<Feature, f64>,
    pub feature_scores: BTreeMap<Feature, f64>,
}

/// 특징 벡터와 템플릿의 유사도 계산기
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MatchScorer {
    config: ScoringConfig,
}

impl MatchScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// 특징 하나의 점수 [0, 1]
    pub fn feature_score(&self, feature: Feature, value: f64, stats: &FeatureStats) -> f64 {
        let c = &self.config;
        let raw_range = stats.max - stats.min;
        let pad = raw_range.max(0.0) * c.tolerance;
        let lower = stats.min - pad;
        let upper = stats.max + pad;
        let in_range = value >= lower && value <= upper;
        let out_distance = if value < lower {
            lower - value
        } else if value > upper {
            value - upper
        } else {
            0.0
        };

        let range_val = if raw_range > 0.0 {
            raw_range
        } else if stats.median != 0.0 {
            stats.median.abs() * 0.2
        } else {
            1.0
        };

        let distance = (value - stats.median).abs();
        let score = if stats.std > 0.0 {
            let z = distance / stats.std;
            let decay = if feature.is_core() { c.core_decay } else { c.normal_decay };
            let base = (-decay * z * z).exp();
            if in_range {
                let mut s = base.max(c.in_range_floor);
                if z < 0.3 {
                    s += 0.05;
                } else if z < 0.6 {
                    s += 0.03;
                }
                s.min(1.0)
            } else {
                let out_ratio = out_distance / (range_val + 0.01);
                base * (-3.0 * out_ratio).exp() * 0.8
            }
        } else if in_range {
            (1.0 - distance / range_val * 0.3).max(c.in_range_floor)
        } else {
            let out_ratio = out_distance / (range_val + 0.01);
            (0.5 * (-2.0 * out_ratio).exp()).max(0.0)
        };

        score.clamp(0.0, 1.0)
    }

    pub fn score(&self, fv: &FeatureVector, template: &FeatureTemplate) -> MatchResult {
        let c = &self.config;
        let mut feature_scores = BTreeMap::new();
        let mut core_scores = BTreeMap::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for (feature, stats) in template.iter() {
            let Some(value) = fv.get(feature) else {
                continue;
            };
            let s = self.feature_score(feature, value, stats);
            let weight = if feature.is_core() { c.core_weight } else { c.normal_weight };
            weighted_sum += s * weight;
            weight_total += weight;
            if feature.is_core() {
                core_scores.insert(feature, round_to(s, 3));
            }
            feature_scores.insert(feature, round_to(s, 3));
        }

        let matched_feature_count = feature_scores.len();
        if weight_total <= 0.0 {
            return MatchResult {
                total_score: 0.0,
                matched_feature_count,
                core_scores,
                feature_scores,
            };
        }

        let mut total = weighted_sum / weight_total;
        if c.bonus.enabled {
            total = self.apply_bonus(total, fv, template, &core_scores, &feature_scores);
        }

        MatchResult {
            total_score: round_to(total.clamp(0.0, 1.0), 3),
            matched_feature_count,
            core_scores,
            feature_scores,
        }
    }

    fn apply_bonus(
        &self,
        base: f64,
        fv: &FeatureVector,
        template: &FeatureTemplate,
        core_scores: &BTreeMap<Feature, f64>,
        feature_scores: &BTreeMap<Feature, f64>,
    ) -> f64 {
        let b = &self.config.bonus;
        let mut total = base;

        if !core_scores.is_empty() {
            let core_avg = core_scores.values().sum::<f64>() / core_scores.len() as f64;
            if core_avg >= b.core_high {
                total *= b.core_high_multiplier;
            } else if core_avg >= b.core_mid {
                total *= b.core_mid_multiplier;
            }
        }

        let high = feature_scores.values().filter(|s| **s >= b.high_match_score).count();
        if high as f64 / feature_scores.len() as f64 >= b.high_match_ratio {
            total *= b.high_match_multiplier;
        }

        if let (Some(value), Some(stats)) = (fv.get(Feature::MaConvergence), template.get(Feature::MaConvergence)) {
            if value < stats.median {
                let reward = (stats.median - value) / stats.median.max(1.0) * b.ma_convergence_reward;
                total += reward.min(b.ma_convergence_reward);
            }
        }

        total.min(1.0)
    }
}

/// 기본 설정 + 허용 오차로 점수 계산
pub fn score(fv: &FeatureVector, template: &FeatureTemplate, tolerance: f64) -> MatchResult {
    MatchScorer::new(ScoringConfig {
        tolerance,
        ..ScoringConfig::default()
    })
    .score(fv, template)
}
