use std::time::Duration;

use crate::bar::{BarSeries, Period, StockInfo};
use crate::error::KlineResult;

/// 시세 데이터 공급자 인터페이스
///
/// 모든 메서드는 데이터가 없을 때 `Ok(None)`을 반환할 수 있으며,
/// 호출하는 쪽은 항상 `None`과 `Err`를 모두 처리해야 한다.
/// 스캔 엔진이 여러 스레드에서 동시에 호출하므로 `Send + Sync`가 필요하다.
pub trait KlineSource: Send + Sync {
    /// 주봉 조회
    ///
    /// `use_cache`가 참이면 로컬 캐시를 먼저 확인하고,
    /// `local_only`가 참이면 캐시에 없을 때 원격 조회 없이 `None`을 반환한다.
    fn get_weekly_kline(
        &self,
        code: &str,
        period: Period,
        use_cache: bool,
        local_only: bool,
    ) -> KlineResult<Option<BarSeries>>;

    /// 일봉 조회
    fn get_daily_kline(&self, code: &str, period: Period) -> KlineResult<Option<BarSeries>>;

    /// 전체 종목 목록
    fn get_all_stocks(&self) -> KlineResult<Vec<StockInfo>>;

    /// 시가총액 (억 위안 단위)
    fn get_market_cap(&self, code: &str, timeout: Duration) -> KlineResult<Option<f64>>;
}

impl<S: KlineSource + ?Sized> KlineSource for std::sync::Arc<S> {
    fn get_weekly_kline(
        &self,
        code: &str,
        period: Period,
        use_cache: bool,
        local_only: bool,
    ) -> KlineResult<Option<BarSeries>> {
        (**self).get_weekly_kline(code, period, use_cache, local_only)
    }

    fn get_daily_kline(&self, code: &str, period: Period) -> KlineResult<Option<BarSeries>> {
        (**self).get_daily_kline(code, period)
    }

    fn get_all_stocks(&self) -> KlineResult<Vec<StockInfo>> {
        (**self).get_all_stocks()
    }

    fn get_market_cap(&self, code: &str, timeout: Duration) -> KlineResult<Option<f64>> {
        (**self).get_market_cap(code, timeout)
    }
}
