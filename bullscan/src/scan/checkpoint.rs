use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use kline_store::StockInfo;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::{Candidate, ScanCounters, ScanParams, ScanStatus};
use crate::errors::{BullscanError, BullscanResult};
use crate::template::{write_atomically, TemplateFingerprint};

/// 중단/재개를 위한 스캔 상태 저장본
///
/// `cursor` 앞의 종목은 모두 처리 완료되었고 그 결과만 `candidates`와
/// `counters`에 반영되어 있다. 재개 시 `cursor`부터 이어서 처리한다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub params: ScanParams,
    pub universe: Vec<StockInfo>,
    pub cursor: usize,
    pub candidates: Vec<Candidate>,
    pub counters: ScanCounters,
    pub status: ScanStatus,
    pub template: TemplateFingerprint,
    pub started_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl ScanCheckpoint {
    pub fn new(params: ScanParams, universe: Vec<StockInfo>, template: TemplateFingerprint) -> Self {
        let now = Local::now();
        Self {
            params,
            universe,
            cursor: 0,
            candidates: Vec::new(),
            counters: ScanCounters::default(),
            status: ScanStatus::Idle,
            template,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn total(&self) -> usize {
        self.universe.len()
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.universe.len()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> BullscanResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        write_atomically(path, json.as_bytes())?;
        debug!(
            "💾 [Checkpoint] 저장: {} ({}/{})",
            path.display(),
            self.cursor,
            self.universe.len()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> BullscanResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| BullscanError::io(format!("체크포인트 읽기: {}", path.display()), e))?;
        let checkpoint: ScanCheckpoint = serde_json::from_str(&content)
            .map_err(|e| BullscanError::parsing("체크포인트", e.to_string()))?;
        if checkpoint.cursor > checkpoint.universe.len() {
            return Err(BullscanError::validation(
                "cursor",
                format!(
                    "커서 {}가 종목 수 {}를 초과",
                    checkpoint.cursor,
                    checkpoint.universe.len()
                ),
            ));
        }
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fingerprint() -> TemplateFingerprint {
        TemplateFingerprint {
            trained_at: "2024-05-01T10:00:00+08:00".to_string(),
            sample_count: 3,
            feature_count: 10,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = ScanCheckpoint::new(
            ScanParams::default(),
            vec![StockInfo::new("600519", "贵州茅台"), StockInfo::new("000001", "平安银行")],
            fingerprint(),
        );
        checkpoint.cursor = 1;
        checkpoint.status = ScanStatus::Stopped;
        checkpoint.counters.scanned = 1;
        checkpoint.save(&path).expect("save");

        let loaded = ScanCheckpoint::load(&path).expect("load");
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.total(), 2);
        assert!(!loaded.is_complete());
    }

    #[test]
    fn test_cursor_out_of_range_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = ScanCheckpoint::new(ScanParams::default(), Vec::new(), fingerprint());
        checkpoint.cursor = 5;
        checkpoint.save(&path).expect("save");
        assert!(matches!(
            ScanCheckpoint::load(&path),
            Err(BullscanError::Validation { .. })
        ));
    }

    #[test]
    fn test_missing_checkpoint() {
        assert!(matches!(
            ScanCheckpoint::load("/nonexistent/checkpoint.json"),
            Err(BullscanError::Io { .. })
        ));
    }
}
