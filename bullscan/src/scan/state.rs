use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::ScanSection;
use crate::features::FeatureVector;

/// 스캔 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Idle,
    Running,
    Stopped,
    Done,
    Failed,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanStatus::Idle => "대기",
            ScanStatus::Running => "진행 중",
            ScanStatus::Stopped => "중지됨",
            ScanStatus::Done => "완료",
            ScanStatus::Failed => "실패",
        };
        f.write_str(label)
    }
}

/// 스캔 파라미터 (체크포인트에 함께 저장되어 재개 시 그대로 사용)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    pub threshold: f64,
    pub market_cap_cap: Option<f64>,
    pub concurrency: usize,
    /// 지정하면 이 날짜 이전 마지막 주봉에서 평가
    pub scan_date: Option<NaiveDate>,
    /// 스캔할 종목 수 제한
    pub limit: Option<usize>,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self::from_section(&ScanSection::default())
    }
}

impl ScanParams {
    pub fn from_section(section: &ScanSection) -> Self {
        Self {
            threshold: section.threshold,
            market_cap_cap: (section.market_cap_cap > 0.0).then_some(section.market_cap_cap),
            concurrency: section.concurrency.max(1),
            scan_date: None,
            limit: None,
        }
    }
}

/// 매칭 후보
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    pub name: String,
    pub score: f64,
    pub evaluation_date: NaiveDate,
    pub evaluation_price: f64,
    pub market_cap: Option<f64>,
    pub matched_feature_count: usize,
    pub features: FeatureVector,
    /// 종목 목록 내 위치
    #[serde(default)]
    pub scan_index: usize,
}

/// 점수 내림차순, 동점이면 종목 코드 오름차순
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.code.cmp(&b.code)));
}

/// 종목 처리 결과 집계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCounters {
    pub scanned: usize,
    pub matched: usize,
    pub below_threshold: usize,
    pub over_market_cap: usize,
    pub no_data: usize,
    pub insufficient_history: usize,
    pub timed_out: usize,
    pub errored: usize,
}

impl ScanCounters {
    /// 평가 자체를 못 한 종목 수
    pub fn skipped(&self) -> usize {
        self.no_data + self.insufficient_history + self.timed_out + self.errored
    }
}

/// 진행 상황 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub status: ScanStatus,
    pub current: usize,
    pub total: usize,
    pub found: usize,
    pub skipped: usize,
    pub percentage: f64,
    pub detail: String,
    pub current_stock: Option<String>,
    pub updated_at: DateTime<Local>,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self {
            status: ScanStatus::Idle,
            current: 0,
            total: 0,
            found: 0,
            skipped: 0,
            percentage: 0.0,
            detail: String::new(),
            current_stock: None,
            updated_at: Local::now(),
        }
    }
}

/// 다른 스레드에서 진행 상황을 읽기 위한 핸들
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    inner: Arc<RwLock<ScanProgress>>,
}

impl ProgressHandle {
    pub fn snapshot(&self) -> ScanProgress {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn status(&self) -> ScanStatus {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).status
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ScanProgress)) {
        let mut progress = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut progress);
        progress.percentage = if progress.total > 0 {
            (progress.current as f64 / progress.total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        progress.updated_at = Local::now();
    }
}

/// 스캔 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub success: bool,
    pub status: ScanStatus,
    pub message: String,
    /// 상위 N개 후보
    pub candidates: Vec<Candidate>,
    pub total_scanned: usize,
    pub total: usize,
    pub found_count: usize,
    pub counters: ScanCounters,
    pub stopped: bool,
}
