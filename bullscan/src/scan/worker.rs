use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kline_store::{KlineSource, Period, StockInfo};
use tracing::{debug, warn};

use super::state::{Candidate, ScanParams};
use crate::errors::BullscanError;
use crate::features::FeatureExtractor;
use crate::scorer::MatchScorer;
use crate::template::FeatureTemplate;

/// 협조적 취소 토큰
///
/// 감시자가 시간 초과를 선언하면 `cancel()`을 호출하고,
/// 작업 스레드는 단계 사이마다 확인해서 남은 작업을 건너뛴다.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// 종목 하나의 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum StockOutcome {
    Matched(Candidate),
    BelowThreshold { score: f64 },
    OverMarketCap { market_cap: f64 },
    NoData { reason: String },
    InsufficientHistory,
    TimedOut,
    Cancelled,
    Failed { reason: String },
}

/// 작업 스레드에서 실행되는 종목 단위 작업
#[derive(Clone)]
pub(crate) struct ScanUnit {
    pub source: Arc<dyn KlineSource>,
    pub extractor: FeatureExtractor,
    pub scorer: MatchScorer,
    pub template: Arc<FeatureTemplate>,
    pub params: ScanParams,
    pub period: Period,
    pub use_cache: bool,
    pub local_only: bool,
    pub use_daily_features: bool,
    pub market_cap_timeout: Duration,
}

impl ScanUnit {
    /// 별도 스레드에서 실행하고 `budget` 안에 끝나지 않으면 취소 후 TimedOut
    ///
    /// 결과 기록은 호출한 감시자만 하므로, 버려진 스레드가 나중에 끝나도
    /// 채널 전송이 실패할 뿐 공유 상태에는 영향이 없다.
    pub fn run_with_budget(&self, stock: &StockInfo, budget: Duration) -> StockOutcome {
        let token = CancelToken::new();
        let (tx, rx) = mpsc::sync_channel(1);

        let unit = self.clone();
        let worker_stock = stock.clone();
        let worker_token = token.clone();
        let spawned = thread::Builder::new()
            .name(format!("bullscan-unit-{}", stock.code))
            .spawn(move || {
                let outcome = unit.run(&worker_stock, &worker_token);
                let _ = tx.send(outcome);
            });

        if let Err(e) = spawned {
            return StockOutcome::Failed {
                reason: format!("작업 스레드 생성 실패: {}", e),
            };
        }

        match rx.recv_timeout(budget) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                token.cancel();
                let error = BullscanError::Timeout {
                    code: stock.code.clone(),
                    timeout_ms: budget.as_millis() as u64,
                };
                warn!("⏰ [Scan] {}", error);
                StockOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => StockOutcome::Failed {
                reason: "작업 스레드가 결과 없이 종료됨".to_string(),
            },
        }
    }

    pub fn run(&self, stock: &StockInfo, token: &CancelToken) -> StockOutcome {
        let code = stock.code.as_str();

        let weekly = match self
            .source
            .get_weekly_kline(code, self.period, self.use_cache, self.local_only)
        {
            Ok(Some(series)) if !series.is_empty() => series,
            Ok(_) => {
                debug!("📭 [Scan] {} 주봉 데이터 없음", code);
                return StockOutcome::NoData {
                    reason: "주봉 데이터 없음".to_string(),
                };
            }
            Err(e) => {
                let error = BullscanError::data_unavailable(code, e.to_string());
                debug!("📭 [Scan] {}", error);
                return StockOutcome::NoData {
                    reason: e.to_string(),
                };
            }
        };

        if token.is_cancelled() {
            return StockOutcome::Cancelled;
        }

        let eval_index = match self.params.scan_date {
            Some(date) => weekly.index_on_or_before(date),
            None => weekly.len().checked_sub(1),
        };
        let Some(eval_index) = eval_index else {
            return StockOutcome::NoData {
                reason: "평가 시점 이전 데이터 없음".to_string(),
            };
        };

        let daily = if self.use_daily_features {
            self.source.get_daily_kline(code, self.period).ok().flatten()
        } else {
            None
        };

        if token.is_cancelled() {
            return StockOutcome::Cancelled;
        }

        let Some(features) = self
            .extractor
            .extract_with_daily(&weekly, eval_index, daily.as_ref())
        else {
            let error = BullscanError::insufficient_history(
                code,
                self.extractor.min_history(),
                self.extractor.lookback().min(eval_index),
            );
            debug!("📉 [Scan] {}", error);
            return StockOutcome::InsufficientHistory;
        };

        let result = self.scorer.score(&features, &self.template);
        if result.total_score < self.params.threshold {
            return StockOutcome::BelowThreshold {
                score: result.total_score,
            };
        }

        if token.is_cancelled() {
            return StockOutcome::Cancelled;
        }

        // 시가총액을 알 수 없으면 후보 유지
        let market_cap = match self.params.market_cap_cap {
            Some(cap) => match self.source.get_market_cap(code, self.market_cap_timeout) {
                Ok(Some(mc)) if mc > cap => return StockOutcome::OverMarketCap { market_cap: mc },
                Ok(found) => found,
                Err(e) => {
                    debug!("📭 [Scan] {} 시가총액 조회 실패, 후보 유지: {}", code, e);
                    None
                }
            },
            None => None,
        };

        let eval_bar = weekly.bars()[eval_index];
        StockOutcome::Matched(Candidate {
            code: stock.code.clone(),
            name: stock.name.clone(),
            score: result.total_score,
            evaluation_date: eval_bar.date,
            evaluation_price: eval_bar.close,
            market_cap,
            matched_feature_count: result.matched_feature_count,
            features,
            scan_index: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
