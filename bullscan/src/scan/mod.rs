//! 전 종목 유사도 스캔
//!
//! [`ScanEngine`]은 rayon 스레드 풀 위에서 `concurrency`개의 감시자를 돌린다.
//! 각 감시자는 공유 커서에서 다음 종목을 가져와 별도 작업 스레드에 맡기고,
//! 제한 시간 안에 결과가 오지 않으면 취소 토큰을 올린 뒤 TimedOut으로 기록한다.
//! 공유 상태(후보, 집계, 체크포인트)는 감시자만 수정한다.

mod checkpoint;
mod state;
mod worker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use kline_store::{KlineSource, Period, StockInfo};
use tracing::{debug, info, warn};

pub use checkpoint::ScanCheckpoint;
pub use state::{
    sort_candidates, Candidate, ProgressHandle, ScanCounters, ScanParams, ScanProgress, ScanResult, ScanStatus,
};
pub use worker::{CancelToken, StockOutcome};

use crate::config::Config;
use crate::errors::{BullscanError, BullscanResult};
use crate::features::FeatureExtractor;
use crate::scorer::{MatchScorer, ScoringConfig};
use crate::template::FeatureTemplate;
use worker::ScanUnit;

/// 스캔 실행 설정
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub unit_timeout: Duration,
    pub market_cap_timeout: Duration,
    pub top_n: usize,
    pub use_cache: bool,
    pub local_only: bool,
    pub period: Period,
    pub use_daily_features: bool,
    pub checkpoint_path: Option<PathBuf>,
    /// 완료된 종목 수 기준 체크포인트 저장 주기
    pub checkpoint_interval: usize,
    pub show_progress_bar: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            unit_timeout: Duration::from_secs(15),
            market_cap_timeout: Duration::from_secs(3),
            top_n: 50,
            use_cache: true,
            local_only: false,
            period: Period::TwoYears,
            use_daily_features: false,
            checkpoint_path: None,
            checkpoint_interval: 50,
            show_progress_bar: false,
        }
    }
}

impl ScanConfig {
    pub fn from_config(config: &Config) -> BullscanResult<Self> {
        let scan = &config.scan;
        let period = config.database.period.parse::<Period>()?;
        Ok(Self {
            unit_timeout: Duration::from_millis(scan.unit_timeout_ms),
            market_cap_timeout: Duration::from_millis(scan.market_cap_timeout_ms),
            top_n: scan.top_n,
            use_cache: scan.use_cache,
            local_only: scan.local_only,
            period,
            use_daily_features: config.features.use_daily_features,
            checkpoint_path: (!scan.checkpoint_path.is_empty()).then(|| PathBuf::from(&scan.checkpoint_path)),
            checkpoint_interval: scan.checkpoint_interval.max(1),
            show_progress_bar: scan.show_progress_bar,
        })
    }
}

#[derive(Default)]
struct EngineState {
    checkpoint: Option<ScanCheckpoint>,
    template: Option<Arc<FeatureTemplate>>,
}

/// 실행 중 감시자들이 공유하는 결과 누적기
///
/// 완료 순서가 뒤섞여도 `watermark` 앞쪽은 항상 빈틈없이 처리된 구간이다.
struct RunShared {
    watermark: usize,
    counters: ScanCounters,
    candidates: Vec<Candidate>,
    pending: BTreeMap<usize, StockOutcome>,
    since_save: usize,
}

impl RunShared {
    fn complete(&mut self, index: usize, outcome: StockOutcome) {
        self.pending.insert(index, outcome);
        while let Some(outcome) = self.pending.remove(&self.watermark) {
            tally(&mut self.counters, &outcome);
            if let StockOutcome::Matched(mut candidate) = outcome {
                candidate.scan_index = self.watermark;
                self.candidates.push(candidate);
            }
            self.watermark += 1;
        }
    }

    fn live_counters(&self) -> ScanCounters {
        let mut counters = self.counters;
        for outcome in self.pending.values() {
            tally(&mut counters, outcome);
        }
        counters
    }

    fn snapshot(&self, base: &ScanCheckpoint, status: ScanStatus) -> ScanCheckpoint {
        let mut candidates = self.candidates.clone();
        sort_candidates(&mut candidates);
        ScanCheckpoint {
            cursor: self.watermark,
            candidates,
            counters: self.counters,
            status,
            updated_at: Local::now(),
            ..base.clone()
        }
    }
}

fn tally(counters: &mut ScanCounters, outcome: &StockOutcome) {
    counters.scanned += 1;
    match outcome {
        StockOutcome::Matched(_) => counters.matched += 1,
        StockOutcome::BelowThreshold { .. } => counters.below_threshold += 1,
        StockOutcome::OverMarketCap { .. } => counters.over_market_cap += 1,
        StockOutcome::NoData { .. } => counters.no_data += 1,
        StockOutcome::InsufficientHistory => counters.insufficient_history += 1,
        StockOutcome::TimedOut | StockOutcome::Cancelled => counters.timed_out += 1,
        StockOutcome::Failed { .. } => counters.errored += 1,
    }
}

struct RunContext<'a> {
    base: &'a ScanCheckpoint,
    unit: &'a ScanUnit,
    next: &'a AtomicUsize,
    shared: &'a Mutex<RunShared>,
    pb: &'a ProgressBar,
}

/// 전 종목 스캔 엔진
pub struct ScanEngine {
    source: Arc<dyn KlineSource>,
    extractor: FeatureExtractor,
    scorer: MatchScorer,
    config: ScanConfig,
    progress: ProgressHandle,
    stop_requested: Arc<AtomicBool>,
    state: Mutex<EngineState>,
}

impl ScanEngine {
    pub fn new(source: Arc<dyn KlineSource>, extractor: FeatureExtractor, scorer: MatchScorer, config: ScanConfig) -> Self {
        Self {
            source,
            extractor,
            scorer,
            config,
            progress: ProgressHandle::default(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn from_config(source: Arc<dyn KlineSource>, config: &Config) -> BullscanResult<Self> {
        Ok(Self::new(
            source,
            FeatureExtractor::from_config(&config.features),
            MatchScorer::new(ScoringConfig::from_section(&config.scoring)),
            ScanConfig::from_config(config)?,
        ))
    }

    pub fn status(&self) -> ScanStatus {
        self.progress.status()
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress.snapshot()
    }

    /// 다른 스레드에서 진행 상황을 조회할 핸들
    pub fn progress_handle(&self) -> ProgressHandle {
        self.progress.clone()
    }

    pub fn checkpoint(&self) -> Option<ScanCheckpoint> {
        self.lock_state().checkpoint.clone()
    }

    /// 협조적 중지: 진행 중인 종목은 끝까지 처리하고 새 종목은 가져가지 않는다
    pub fn stop(&self) {
        if self.status() == ScanStatus::Running {
            info!("🛑 [Scan] 중지 요청");
        }
        self.stop_requested.store(true, Ordering::Release);
    }

    /// 새 스캔 시작 (이전 체크포인트는 버림)
    ///
    /// `universe`가 없으면 소스의 전체 종목 목록을 사용한다.
    pub fn start_scan(
        &self,
        template: Arc<FeatureTemplate>,
        params: ScanParams,
        universe: Option<Vec<StockInfo>>,
    ) -> BullscanResult<ScanResult> {
        template.validate()?;
        self.claim("start_scan", |state, _| {
            state.checkpoint = None;
            state.template = None;
            Ok(())
        })?;

        let mut universe = match universe {
            Some(list) => list,
            None => match self.source.get_all_stocks() {
                Ok(list) => list,
                Err(e) => {
                    let message = format!("종목 목록 조회 실패: {}", e);
                    warn!("❌ [Scan] {}", message);
                    self.progress.update(|p| {
                        p.status = ScanStatus::Failed;
                        p.detail = message.clone();
                    });
                    return Ok(ScanResult {
                        success: false,
                        status: ScanStatus::Failed,
                        message,
                        candidates: Vec::new(),
                        total_scanned: 0,
                        total: 0,
                        found_count: 0,
                        counters: ScanCounters::default(),
                        stopped: false,
                    });
                }
            },
        };
        if let Some(limit) = params.limit {
            universe.truncate(limit);
        }

        let checkpoint = ScanCheckpoint::new(params, universe, template.fingerprint());
        self.run(checkpoint, template)
    }

    /// 중지된 스캔을 메모리의 체크포인트에서 재개
    pub fn resume_scan(&self) -> BullscanResult<ScanResult> {
        let (checkpoint, template) = self.claim("resume_scan", |state, status| {
            if status != ScanStatus::Stopped {
                return Err(BullscanError::scan_state(
                    "resume_scan",
                    format!("중지된 스캔이 아닙니다 (상태: {})", status),
                ));
            }
            match (&state.checkpoint, &state.template) {
                (Some(cp), Some(tpl)) if cp.status == ScanStatus::Stopped => Ok((cp.clone(), tpl.clone())),
                (Some(cp), _) => Err(BullscanError::scan_state(
                    "resume_scan",
                    format!("중지된 스캔이 아닙니다 (상태: {})", cp.status),
                )),
                _ => Err(BullscanError::scan_state("resume_scan", "재개할 스캔이 없습니다")),
            }
        })?;
        self.run(checkpoint, template)
    }

    /// 파일에 저장된 체크포인트에서 재개 (프로세스 재시작 후)
    pub fn resume_from_checkpoint(
        &self,
        path: impl AsRef<Path>,
        template: Arc<FeatureTemplate>,
    ) -> BullscanResult<ScanResult> {
        template.validate()?;
        let checkpoint = ScanCheckpoint::load(path.as_ref())?;
        if checkpoint.template != template.fingerprint() {
            return Err(BullscanError::invalid_template(format!(
                "체크포인트의 템플릿({} / 표본 {}개)과 일치하지 않습니다",
                checkpoint.template.trained_at, checkpoint.template.sample_count
            )));
        }
        self.claim("resume_from_checkpoint", |state, _| {
            state.checkpoint = None;
            state.template = None;
            Ok(())
        })?;
        info!(
            "📂 [Scan] 체크포인트에서 재개: {} ({}/{})",
            path.as_ref().display(),
            checkpoint.cursor,
            checkpoint.total()
        );
        self.run(checkpoint, template)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 실행 중이 아니면 상태를 Running으로 바꾸고 `check` 결과를 반환
    ///
    /// `check`는 현재 엔진 상태를 받으며, 실패하면 상태는 바뀌지 않는다.
    fn claim<T>(
        &self,
        operation: &str,
        check: impl FnOnce(&mut EngineState, ScanStatus) -> BullscanResult<T>,
    ) -> BullscanResult<T> {
        let mut state = self.lock_state();
        let status = self.progress.status();
        if status == ScanStatus::Running {
            return Err(BullscanError::scan_state(operation, "이미 스캔이 진행 중입니다"));
        }
        let value = check(&mut *state, status)?;
        self.progress.update(|p| p.status = ScanStatus::Running);
        self.stop_requested.store(false, Ordering::Release);
        Ok(value)
    }

    fn progress_bar(&self, total: usize, position: usize) -> ProgressBar {
        if !self.config.show_progress_bar {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) - {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_position(position as u64);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn run(&self, mut base: ScanCheckpoint, template: Arc<FeatureTemplate>) -> BullscanResult<ScanResult> {
        let total = base.total();
        let start_cursor = base.cursor.min(total);
        let concurrency = base.params.concurrency.max(1);
        base.status = ScanStatus::Running;

        let shared = Mutex::new(RunShared {
            watermark: start_cursor,
            counters: base.counters,
            candidates: std::mem::take(&mut base.candidates),
            pending: BTreeMap::new(),
            since_save: 0,
        });

        info!(
            "🚀 [Scan] 스캔 시작: {}/{}부터, 임계값 {:.2}, 동시 처리 {}개",
            start_cursor, total, base.params.threshold, concurrency
        );
        {
            let shared = shared.lock().unwrap_or_else(|e| e.into_inner());
            self.progress.update(|p| {
                p.status = ScanStatus::Running;
                p.current = start_cursor;
                p.total = total;
                p.found = shared.candidates.len();
                p.skipped = shared.counters.skipped();
                p.detail = format!("{}/{} 처리 중", start_cursor, total);
                p.current_stock = None;
            });
        }

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("bullscan-scan-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                let message = format!("스레드 풀 생성 실패: {}", e);
                self.progress.update(|p| {
                    p.status = ScanStatus::Failed;
                    p.detail = message.clone();
                });
                return Err(BullscanError::general(message));
            }
        };

        let unit = ScanUnit {
            source: self.source.clone(),
            extractor: self.extractor,
            scorer: self.scorer,
            template: template.clone(),
            params: base.params.clone(),
            period: self.config.period,
            use_cache: self.config.use_cache,
            local_only: self.config.local_only,
            use_daily_features: self.config.use_daily_features,
            market_cap_timeout: self.config.market_cap_timeout,
        };
        let next = AtomicUsize::new(start_cursor);
        let pb = self.progress_bar(total, start_cursor);
        let ctx = RunContext {
            base: &base,
            unit: &unit,
            next: &next,
            shared: &shared,
            pb: &pb,
        };

        let ctx = &ctx;
        pool.scope(|s| {
            for _ in 0..concurrency {
                s.spawn(move |_| self.supervise(ctx));
            }
        });

        let shared = shared.into_inner().unwrap_or_else(|e| e.into_inner());
        let cursor = shared.watermark.min(total);
        let stopped = cursor < total;
        let status = if stopped { ScanStatus::Stopped } else { ScanStatus::Done };
        let checkpoint = shared.snapshot(&base, status);
        pb.finish_and_clear();

        if let Some(path) = &self.config.checkpoint_path {
            if let Err(e) = checkpoint.save(path) {
                warn!("⚠️ [Scan] 체크포인트 저장 실패: {}", e);
            }
        }

        let counters = checkpoint.counters;
        let message = if stopped {
            format!(
                "스캔 중지: {}/{}개 종목 처리, 후보 {}개 (재개 가능)",
                cursor,
                total,
                checkpoint.candidates.len()
            )
        } else {
            format!(
                "스캔 완료: {}개 종목 처리, 후보 {}개 (건너뜀 {}개: 데이터 없음 {}, 이력 부족 {}, 시간 초과 {}, 오류 {})",
                counters.scanned,
                checkpoint.candidates.len(),
                counters.skipped(),
                counters.no_data,
                counters.insufficient_history,
                counters.timed_out,
                counters.errored
            )
        };
        info!("🏁 [Scan] {}", message);

        let result = ScanResult {
            success: true,
            status,
            message: message.clone(),
            candidates: checkpoint.candidates.iter().take(self.config.top_n).cloned().collect(),
            total_scanned: counters.scanned,
            total,
            found_count: checkpoint.candidates.len(),
            counters,
            stopped,
        };

        {
            let mut state = self.lock_state();
            state.checkpoint = Some(checkpoint);
            state.template = Some(template);
            self.progress.update(|p| {
                p.status = status;
                p.current = cursor;
                p.found = result.found_count;
                p.skipped = counters.skipped();
                p.detail = message;
                p.current_stock = None;
            });
        }

        Ok(result)
    }

    fn supervise(&self, ctx: &RunContext<'_>) {
        loop {
            if self.stop_requested.load(Ordering::Acquire) {
                break;
            }
            let index = ctx.next.fetch_add(1, Ordering::AcqRel);
            let Some(stock) = ctx.base.universe.get(index) else {
                break;
            };

            self.progress.update(|p| p.current_stock = Some(stock.code.clone()));
            let outcome = ctx.unit.run_with_budget(stock, self.config.unit_timeout);
            if let StockOutcome::Matched(candidate) = &outcome {
                debug!("🎯 [Scan] {} {} 매칭: {:.3}", candidate.code, candidate.name, candidate.score);
            }
            self.record(ctx, index, stock, outcome);
        }
    }

    fn record(&self, ctx: &RunContext<'_>, index: usize, stock: &StockInfo, outcome: StockOutcome) {
        let mut shared = ctx.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.complete(index, outcome);

        let live = shared.live_counters();
        let found = live.matched;
        self.progress.update(|p| {
            p.current = live.scanned;
            p.found = found;
            p.skipped = live.skipped();
            p.detail = format!("{} 처리 완료", stock.code);
        });
        ctx.pb.inc(1);
        ctx.pb.set_message(format!("후보 {}개", found));

        shared.since_save += 1;
        if shared.since_save >= self.config.checkpoint_interval {
            shared.since_save = 0;
            if let Some(path) = &self.config.checkpoint_path {
                let snapshot = shared.snapshot(ctx.base, ScanStatus::Running);
                if let Err(e) = snapshot.save(path) {
                    warn!("⚠️ [Scan] 체크포인트 저장 실패: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;

    fn candidate(code: &str) -> Candidate {
        Candidate {
            code: code.to_string(),
            name: code.to_string(),
            score: 0.95,
            evaluation_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 7).expect("valid date"),
            evaluation_price: 10.0,
            market_cap: None,
            matched_feature_count: 1,
            features: FeatureVector::new(),
            scan_index: 0,
        }
    }

    #[test]
    fn test_watermark_advances_only_over_contiguous_prefix() {
        let mut shared = RunShared {
            watermark: 0,
            counters: ScanCounters::default(),
            candidates: Vec::new(),
            pending: BTreeMap::new(),
            since_save: 0,
        };
        shared.complete(1, StockOutcome::Matched(candidate("000002")));
        assert_eq!(shared.watermark, 0);
        assert_eq!(shared.counters.scanned, 0);
        assert_eq!(shared.live_counters().matched, 1);

        shared.complete(0, StockOutcome::TimedOut);
        assert_eq!(shared.watermark, 2);
        assert_eq!(shared.counters.scanned, 2);
        assert_eq!(shared.counters.timed_out, 1);
        assert_eq!(shared.candidates.len(), 1);
        assert_eq!(shared.candidates[0].scan_index, 1);
        assert!(shared.pending.is_empty());
    }

    #[test]
    fn test_tally_buckets() {
        let mut counters = ScanCounters::default();
        tally(&mut counters, &StockOutcome::NoData { reason: "없음".into() });
        tally(&mut counters, &StockOutcome::InsufficientHistory);
        tally(&mut counters, &StockOutcome::BelowThreshold { score: 0.3 });
        tally(&mut counters, &StockOutcome::Failed { reason: "오류".into() });
        assert_eq!(counters.scanned, 4);
        assert_eq!(counters.skipped(), 3);
        assert_eq!(counters.below_threshold, 1);
    }

    #[test]
    fn test_resume_without_scan_is_state_error() {
        let engine = ScanEngine::new(
            Arc::new(kline_store::MemoryKlineSource::new()),
            FeatureExtractor::default(),
            MatchScorer::default(),
            ScanConfig::default(),
        );
        assert!(matches!(engine.resume_scan(), Err(BullscanError::ScanState { .. })));
        assert_eq!(engine.status(), ScanStatus::Idle);
    }
}
