use std::time::Duration;

use tracing::{debug, warn};

use crate::bar::{BarSeries, Period, StockInfo};
use crate::error::KlineResult;
use crate::source::KlineSource;
use crate::store::{Frequency, SqliteKlineStore};

/// 원격 소스 앞단에 SQLite 캐시를 두는 write-through 소스
///
/// 캐시 저장 실패는 경고만 남기고 조회 결과는 그대로 반환한다.
pub struct CachingKlineSource<U> {
    upstream: U,
    cache: SqliteKlineStore,
}

impl<U: KlineSource> CachingKlineSource<U> {
    pub fn new(upstream: U, cache: SqliteKlineStore) -> Self {
        Self { upstream, cache }
    }

    pub fn cache(&self) -> &SqliteKlineStore {
        &self.cache
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    fn write_through(&self, code: &str, frequency: Frequency, series: &BarSeries) {
        if let Err(e) = self.cache.save_bars(code, frequency, series) {
            warn!("⚠️ [CachingKlineSource] {} 캐시 저장 실패: {}", code, e);
        }
    }
}

impl<U: KlineSource> KlineSource for CachingKlineSource<U> {
    fn get_weekly_kline(
        &self,
        code: &str,
        period: Period,
        use_cache: bool,
        local_only: bool,
    ) -> KlineResult<Option<BarSeries>> {
        if use_cache || local_only {
            match self.cache.get_weekly_kline(code, period, true, true) {
                Ok(Some(series)) if !series.is_empty() => {
                    debug!("📦 [CachingKlineSource] {} 주봉 캐시 적중", code);
                    return Ok(Some(series));
                }
                Ok(_) => {}
                Err(e) => warn!("⚠️ [CachingKlineSource] {} 캐시 조회 실패: {}", code, e),
            }
        }

        if local_only {
            debug!("📦 [CachingKlineSource] {} 로컬 캐시 없음 (local_only)", code);
            return Ok(None);
        }

        let fetched = self.upstream.get_weekly_kline(code, period, false, false)?;
        if let Some(series) = &fetched {
            if !series.is_empty() {
                self.write_through(code, Frequency::Weekly, series);
            }
        }
        Ok(fetched)
    }

    fn get_daily_kline(&self, code: &str, period: Period) -> KlineResult<Option<BarSeries>> {
        match self.cache.get_daily_kline(code, period) {
            Ok(Some(series)) if !series.is_empty() => return Ok(Some(series)),
            Ok(_) => {}
            Err(e) => warn!("⚠️ [CachingKlineSource] {} 일봉 캐시 조회 실패: {}", code, e),
        }

        let fetched = self.upstream.get_daily_kline(code, period)?;
        if let Some(series) = &fetched {
            if !series.is_empty() {
                self.write_through(code, Frequency::Daily, series);
            }
        }
        Ok(fetched)
    }

    /// 캐시된 종목 목록이 있으면 사용하고, 없으면 원격에서 받아 저장
    fn get_all_stocks(&self) -> KlineResult<Vec<StockInfo>> {
        match self.cache.load_stocks() {
            Ok(stocks) if !stocks.is_empty() => return Ok(stocks),
            Ok(_) => {}
            Err(e) => warn!("⚠️ [CachingKlineSource] 종목 목록 캐시 조회 실패: {}", e),
        }

        let stocks = self.upstream.get_all_stocks()?;
        if !stocks.is_empty() {
            if let Err(e) = self.cache.save_stocks(&stocks) {
                warn!("⚠️ [CachingKlineSource] 종목 목록 캐시 저장 실패: {}", e);
            }
        }
        Ok(stocks)
    }

    /// 원격 조회를 우선하고, 실패하거나 값이 없으면 캐시된 값을 사용
    fn get_market_cap(&self, code: &str, timeout: Duration) -> KlineResult<Option<f64>> {
        match self.upstream.get_market_cap(code, timeout) {
            Ok(Some(cap)) => {
                if let Err(e) = self.cache.set_market_cap(code, cap) {
                    warn!("⚠️ [CachingKlineSource] {} 시가총액 저장 실패: {}", code, e);
                }
                Ok(Some(cap))
            }
            Ok(None) => self.cache.load_market_cap(code),
            Err(e) => {
                debug!("📦 [CachingKlineSource] {} 시가총액 원격 조회 실패, 캐시 사용: {}", code, e);
                self.cache.load_market_cap(code)
            }
        }
    }
}
