use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::aggregate::aggregate_weekly;
use crate::bar::{BarSeries, Period, StockInfo};
use crate::error::{KlineError, KlineResult};
use crate::source::KlineSource;

#[derive(Debug, Default)]
struct MemoryData {
    stocks: Vec<StockInfo>,
    weekly: HashMap<String, BarSeries>,
    daily: HashMap<String, BarSeries>,
    market_caps: HashMap<String, f64>,
    failing: HashMap<String, String>,
}

/// 메모리 내 시세 소스
///
/// 백테스트나 오프라인 재현, 테스트에서 원격 소스 대신 사용한다.
#[derive(Debug, Default)]
pub struct MemoryKlineSource {
    data: RwLock<MemoryData>,
}

impl MemoryKlineSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock(self, info: StockInfo, weekly: BarSeries) -> Self {
        self.insert_stock(info, weekly);
        self
    }

    pub fn insert_stock(&self, info: StockInfo, weekly: BarSeries) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.weekly.insert(info.code.clone(), weekly);
        if !data.stocks.iter().any(|s| s.code == info.code) {
            data.stocks.push(info);
        }
    }

    pub fn insert_daily(&self, code: &str, daily: BarSeries) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.daily.insert(code.to_string(), daily);
    }

    pub fn insert_market_cap(&self, code: &str, market_cap: f64) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.market_caps.insert(code.to_string(), market_cap);
    }

    /// 해당 종목 조회 시 항상 오류를 반환하도록 설정
    pub fn fail_on(&self, code: &str, reason: impl Into<String>) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.failing.insert(code.to_string(), reason.into());
    }

    fn check_failure(data: &MemoryData, code: &str) -> KlineResult<()> {
        match data.failing.get(code) {
            Some(reason) => Err(KlineError::source(code, reason.clone())),
            None => Ok(()),
        }
    }
}

impl KlineSource for MemoryKlineSource {
    fn get_weekly_kline(
        &self,
        code: &str,
        period: Period,
        _use_cache: bool,
        _local_only: bool,
    ) -> KlineResult<Option<BarSeries>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Self::check_failure(&data, code)?;
        if let Some(weekly) = data.weekly.get(code) {
            return Ok(Some(weekly.within(period)));
        }
        match data.daily.get(code) {
            Some(daily) => Ok(Some(aggregate_weekly(daily)?.within(period))),
            None => Ok(None),
        }
    }

    fn get_daily_kline(&self, code: &str, period: Period) -> KlineResult<Option<BarSeries>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Self::check_failure(&data, code)?;
        Ok(data.daily.get(code).map(|s| s.within(period)))
    }

    fn get_all_stocks(&self) -> KlineResult<Vec<StockInfo>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.stocks.clone())
    }

    fn get_market_cap(&self, code: &str, _timeout: Duration) -> KlineResult<Option<f64>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.market_caps.get(code).copied())
    }
}
