#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bullscan::features::extract;
use bullscan::template::FeatureTemplate;
use bullscan::trainer::{train, LabeledFeatures};
use chrono::NaiveDate;
use kline_store::{Bar, BarSeries, KlineError, KlineResult, KlineSource, MemoryKlineSource, Period, StockInfo};

/// 종목별 지연을 주는 테스트용 소스
pub struct DelayedSource {
    inner: MemoryKlineSource,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    stock_list_down: AtomicBool,
}

impl DelayedSource {
    pub fn new(inner: MemoryKlineSource) -> Self {
        Self {
            inner,
            delays: HashMap::new(),
            default_delay: Duration::ZERO,
            stock_list_down: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, code: &str, delay: Duration) -> Self {
        self.delays.insert(code.to_string(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// 켜 두면 종목 목록 조회가 실패한다
    pub fn set_stock_list_down(&self, down: bool) {
        self.stock_list_down.store(down, Ordering::SeqCst);
    }
}

impl KlineSource for DelayedSource {
    fn get_weekly_kline(
        &self,
        code: &str,
        period: Period,
        use_cache: bool,
        local_only: bool,
    ) -> KlineResult<Option<BarSeries>> {
        let delay = self.delays.get(code).copied().unwrap_or(self.default_delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.inner.get_weekly_kline(code, period, use_cache, local_only)
    }

    fn get_daily_kline(&self, code: &str, period: Period) -> KlineResult<Option<BarSeries>> {
        self.inner.get_daily_kline(code, period)
    }

    fn get_all_stocks(&self) -> KlineResult<Vec<StockInfo>> {
        if self.stock_list_down.load(Ordering::SeqCst) {
            return Err(KlineError::source("*", "종목 목록 서버 응답 없음"));
        }
        self.inner.get_all_stocks()
    }

    fn get_market_cap(&self, code: &str, timeout: Duration) -> KlineResult<Option<f64>> {
        self.inner.get_market_cap(code, timeout)
    }
}

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid date")
}

/// 바닥 횡보 후 거래량이 붙으며 오르는 주봉 60개
pub fn bull_series() -> BarSeries {
    let bars = (0..60)
        .map(|i| {
            let date = start_date() + chrono::Duration::weeks(i as i64);
            let wave = ((i as f64) * 0.7).sin();
            let (close, volume) = if i < 50 {
                (10.0 + wave * 0.3, 1_000.0 + (i % 5) as f64 * 120.0)
            } else {
                let k = (i - 49) as f64;
                (10.0 + k * 0.6 + wave * 0.2, 3_500.0 + k * 400.0)
            };
            let open = close - 0.1 * wave;
            Bar::new(date, open, close, close.max(open) + 0.2, close.min(open) - 0.2, volume)
        })
        .collect();
    BarSeries::new(bars).expect("bull series")
}

/// 거래량이 말라가며 계속 내리는 주봉 60개
pub fn bear_series(seed: usize) -> BarSeries {
    let bars = (0..60)
        .map(|i| {
            let date = start_date() + chrono::Duration::weeks(i as i64);
            let close = 40.0 - i as f64 * 0.45 + ((i + seed) as f64 * 1.3).sin() * 0.8;
            let open = close + 0.3;
            let volume = 8_000.0 - i as f64 * 110.0 + (seed * 37) as f64;
            Bar::new(date, open, close, open + 0.5, close - 0.5, volume)
        })
        .collect();
    BarSeries::new(bars).expect("bear series")
}

/// 이력이 부족한 주봉
pub fn short_series() -> BarSeries {
    let bars = (0..8)
        .map(|i| {
            let date = start_date() + chrono::Duration::weeks(i as i64);
            Bar::new(date, 5.0, 5.1, 5.3, 4.9, 500.0)
        })
        .collect();
    BarSeries::new(bars).expect("short series")
}

/// `bull_series`의 마지막 주봉 특징 하나로 만든 템플릿
pub fn bull_template() -> Arc<FeatureTemplate> {
    let series = bull_series();
    let features = extract(&series, series.len() - 1, 40).expect("features");
    Arc::new(
        train(&[LabeledFeatures {
            code: "BULL".to_string(),
            features,
        }])
        .expect("template"),
    )
}

/// 상승 종목 `bull` 개, 하락 종목 `bear` 개로 이루어진 소스
///
/// 상승 종목 코드는 `6000xx`, 하락 종목 코드는 `0000xx`.
pub fn market(bull: usize, bear: usize) -> MemoryKlineSource {
    let source = MemoryKlineSource::new();
    for i in 0..bull {
        let code = format!("6000{:02}", i);
        source.insert_stock(StockInfo::new(code.clone(), format!("상승{}", i)), bull_series());
    }
    for i in 0..bear {
        let code = format!("0000{:02}", i);
        source.insert_stock(StockInfo::new(code.clone(), format!("하락{}", i)), bear_series(i));
    }
    source
}
