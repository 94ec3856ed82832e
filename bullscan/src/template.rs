use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::errors::{BullscanError, BullscanResult};
use crate::features::indicators::{max_of, mean, median, min_of, population_std, round_to};
use crate::features::Feature;

pub const TEMPLATE_SCHEMA_VERSION: u32 = 1;

/// 특징 하나에 대한 학습 통계 (모두 소수 셋째 자리로 반올림)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: usize,
}

impl FeatureStats {
    /// 유한한 값만 사용, 값이 없으면 None
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        Some(Self {
            mean: round_to(mean(&finite), 3),
            median: round_to(median(&finite), 3),
            std: round_to(population_std(&finite), 3),
            min: round_to(min_of(&finite), 3),
            max: round_to(max_of(&finite), 3),
            sample_count: finite.len(),
        })
    }

    fn check(&self) -> Result<(), String> {
        let values = [self.mean, self.median, self.std, self.min, self.max];
        if values.iter().any(|v| !v.is_finite()) {
            return Err("유한하지 않은 통계 값".to_string());
        }
        if self.std < 0.0 {
            return Err(format!("음수 표준편차: {}", self.std));
        }
        if self.min > self.max {
            return Err(format!("min({}) > max({})", self.min, self.max));
        }
        if self.sample_count == 0 {
            return Err("표본 수 0".to_string());
        }
        Ok(())
    }
}

/// 템플릿 식별값: 체크포인트가 같은 템플릿으로 재개되는지 확인할 때 사용
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFingerprint {
    pub trained_at: String,
    pub sample_count: usize,
    pub feature_count: usize,
}

/// 학습된 특징 템플릿
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTemplate {
    features: BTreeMap<Feature, FeatureStats>,
    sample_count: usize,
    trained_at: DateTime<Local>,
    sample_stocks: Vec<String>,
}

/// 저장 형식 (특징 이름은 문자열 키)
#[derive(Debug, Serialize, Deserialize)]
struct TemplateDocument {
    #[serde(default)]
    schema_version: u32,
    common_features: BTreeMap<String, FeatureStats>,
    sample_count: usize,
    trained_at: DateTime<Local>,
    #[serde(default)]
    sample_stocks: Vec<String>,
}

impl FeatureTemplate {
    pub fn new(
        features: BTreeMap<Feature, FeatureStats>,
        sample_count: usize,
        sample_stocks: Vec<String>,
    ) -> BullscanResult<Self> {
        let template = Self {
            features,
            sample_count,
            trained_at: Local::now(),
            sample_stocks,
        };
        template.validate()?;
        Ok(template)
    }

    pub fn get(&self, feature: Feature) -> Option<&FeatureStats> {
        self.features.get(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, &FeatureStats)> + '_ {
        self.features.iter().map(|(f, s)| (*f, s))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn trained_at(&self) -> DateTime<Local> {
        self.trained_at
    }

    pub fn sample_stocks(&self) -> &[String] {
        &self.sample_stocks
    }

    pub fn fingerprint(&self) -> TemplateFingerprint {
        TemplateFingerprint {
            trained_at: self.trained_at.to_rfc3339(),
            sample_count: self.sample_count,
            feature_count: self.features.len(),
        }
    }

    /// 비어 있거나 통계가 손상된 템플릿은 스캔에 사용할 수 없다
    pub fn validate(&self) -> BullscanResult<()> {
        if self.features.is_empty() {
            return Err(BullscanError::invalid_template("특징 통계가 비어 있음"));
        }
        for (feature, stats) in &self.features {
            stats
                .check()
                .map_err(|reason| BullscanError::invalid_template(format!("{}: {}", feature, reason)))?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> BullscanResult<String> {
        let document = TemplateDocument {
            schema_version: TEMPLATE_SCHEMA_VERSION,
            common_features: self
                .features
                .iter()
                .map(|(f, s)| (f.name().to_string(), *s))
                .collect(),
            sample_count: self.sample_count,
            trained_at: self.trained_at,
            sample_stocks: self.sample_stocks.clone(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// 알 수 없는 특징 이름은 경고 후 무시
    pub fn from_json(json: &str) -> BullscanResult<Self> {
        let document: TemplateDocument = serde_json::from_str(json)
            .map_err(|e| BullscanError::invalid_template(format!("JSON 파싱 실패: {}", e)))?;

        if document.schema_version > TEMPLATE_SCHEMA_VERSION {
            warn!(
                "⚠️ [Template] 더 새로운 스키마 버전: {} (지원: {})",
                document.schema_version, TEMPLATE_SCHEMA_VERSION
            );
        }

        let mut features = BTreeMap::new();
        for (name, stats) in document.common_features {
            match Feature::from_name(&name) {
                Some(feature) => {
                    features.insert(feature, stats);
                }
                None => warn!("⚠️ [Template] 알 수 없는 특징 무시: {}", name),
            }
        }

        let template = Self {
            features,
            sample_count: document.sample_count,
            trained_at: document.trained_at,
            sample_stocks: document.sample_stocks,
        };
        template.validate()?;
        Ok(template)
    }

    /// 같은 디렉터리의 임시 파일에 쓴 뒤 rename
    pub fn save(&self, path: impl AsRef<Path>) -> BullscanResult<()> {
        let path = path.as_ref();
        write_atomically(path, self.to_json()?.as_bytes())?;
        info!(
            "💾 [Template] 템플릿 저장: {} (특징 {}개, 표본 {}개)",
            path.display(),
            self.features.len(),
            self.sample_count
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> BullscanResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BullscanError::invalid_template(format!(
                "템플릿 파일이 없습니다: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| BullscanError::io(format!("템플릿 읽기: {}", path.display()), e))?;
        let template = Self::from_json(&content)?;
        info!(
            "📂 [Template] 템플릿 로드: {} (특징 {}개, 표본 {}개)",
            path.display(),
            template.len(),
            template.sample_count
        );
        Ok(template)
    }
}

/// 중간에 중단되어도 반쯤 쓰인 파일이 남지 않도록 임시 파일 + rename
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> BullscanResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| BullscanError::io(format!("디렉터리 생성: {}", dir.display()), e))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| BullscanError::io(format!("임시 파일 생성: {}", dir.display()), e))?;
    tmp.write_all(contents)
        .map_err(|e| BullscanError::io("임시 파일 쓰기", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| BullscanError::io("임시 파일 동기화", e))?;
    tmp.persist(path)
        .map_err(|e| BullscanError::io(format!("파일 교체: {}", path.display()), e.error))?;
    Ok(())
}
