use std::collections::BTreeMap;

use kline_store::BarSeries;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{BullscanError, BullscanResult};
use crate::features::{Feature, FeatureExtractor, FeatureVector};
use crate::interval::find_max_gain_interval;
use crate::surge::VolumeSurgeLocator;
use crate::template::{FeatureStats, FeatureTemplate};

/// 종목 코드가 붙은 특징 벡터
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFeatures {
    pub code: String,
    pub features: FeatureVector,
}

/// 학습 표본: 주봉과 매수 시점(상승 구간 시작)
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub code: String,
    pub name: String,
    pub weekly: BarSeries,
    pub buy_index: usize,
    pub daily: Option<BarSeries>,
}

impl TrainingSample {
    /// 최대 상승 구간의 시작점을 매수 시점으로 하는 표본
    pub fn from_max_gain(
        code: impl Into<String>,
        name: impl Into<String>,
        weekly: BarSeries,
        search_weeks: usize,
        min_gain_pct: f64,
    ) -> Option<Self> {
        let interval = find_max_gain_interval(&weekly, search_weeks, min_gain_pct)?;
        Some(Self {
            code: code.into(),
            name: name.into(),
            weekly,
            buy_index: interval.start_index,
            daily: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSample {
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub template: FeatureTemplate,
    pub used: Vec<String>,
    pub skipped: Vec<SkippedSample>,
}

/// 상승 종목 표본으로부터 공통 특징 템플릿을 학습
#[derive(Debug, Clone, Default)]
pub struct TemplateTrainer {
    extractor: FeatureExtractor,
    locator: VolumeSurgeLocator,
}

impl TemplateTrainer {
    pub fn new(extractor: FeatureExtractor, locator: VolumeSurgeLocator) -> Self {
        Self { extractor, locator }
    }

    /// 특징별 mean/median/std/min/max 집계
    ///
    /// 어떤 벡터에도 나타나지 않은 특징은 템플릿에서 빠진다.
    pub fn train(&self, labeled: &[LabeledFeatures]) -> BullscanResult<FeatureTemplate> {
        train(labeled)
    }

    /// 표본마다 거래량 급증 시점을 찾아 특징을 추출한 뒤 집계
    pub fn train_samples(&self, samples: &[TrainingSample]) -> BullscanResult<TrainingReport> {
        info!("📊 [Trainer] 학습 시작: 표본 {}개", samples.len());

        let results: Vec<Result<LabeledFeatures, SkippedSample>> =
            samples.par_iter().map(|sample| self.extract_sample(sample)).collect();

        let mut labeled = Vec::new();
        let mut skipped = Vec::new();
        for result in results {
            match result {
                Ok(features) => labeled.push(features),
                Err(skip) => {
                    warn!("⚠️ [Trainer] {} 표본 제외: {}", skip.code, skip.reason);
                    skipped.push(skip);
                }
            }
        }

        if labeled.is_empty() {
            return Err(BullscanError::invalid_template(format!(
                "유효한 표본이 없습니다 (제외 {}개)",
                skipped.len()
            )));
        }

        let template = train(&labeled)?;
        let used = labeled.into_iter().map(|l| l.code).collect();
        info!(
            "✅ [Trainer] 학습 완료: 특징 {}개, 표본 {}개, 제외 {}개",
            template.len(),
            template.sample_count(),
            skipped.len()
        );
        Ok(TrainingReport {
            template,
            used,
            skipped,
        })
    }

    fn extract_sample(&self, sample: &TrainingSample) -> Result<LabeledFeatures, SkippedSample> {
        let skip = |reason: String| SkippedSample {
            code: sample.code.clone(),
            reason,
        };

        if sample.buy_index >= sample.weekly.len() {
            return Err(skip(format!(
                "매수 시점 {}이 범위를 벗어남 (봉 {}개)",
                sample.buy_index,
                sample.weekly.len()
            )));
        }

        let anchor = self.locator.anchor(&sample.weekly, sample.buy_index);
        if anchor < self.extractor.min_history() {
            return Err(skip(format!("급증 시점 {} 이전 이력 부족", anchor)));
        }
        debug!(
            "🔍 [Trainer] {} 매수 시점 {} → 급증 시점 {}",
            sample.code, sample.buy_index, anchor
        );

        self.extractor
            .extract_with_daily(&sample.weekly, anchor, sample.daily.as_ref())
            .map(|features| LabeledFeatures {
                code: sample.code.clone(),
                features,
            })
            .ok_or_else(|| skip("특징 추출 실패".to_string()))
    }
}

/// 레이블된 특징 벡터들을 템플릿으로 집계
pub fn train(labeled: &[LabeledFeatures]) -> BullscanResult<FeatureTemplate> {
    let mut columns: BTreeMap<Feature, Vec<f64>> = BTreeMap::new();
    for sample in labeled {
        for (feature, value) in sample.features.iter() {
            columns.entry(feature).or_default().push(value);
        }
    }

    let features: BTreeMap<Feature, FeatureStats> = columns
        .into_iter()
        .filter_map(|(feature, values)| FeatureStats::from_values(&values).map(|s| (feature, s)))
        .collect();

    let stocks = labeled.iter().map(|l| l.code.clone()).collect();
    FeatureTemplate::new(features, labeled.len(), stocks)
}
