use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::aggregate::aggregate_weekly;
use crate::bar::{parse_date, Bar, BarSeries, Period, StockInfo, DATE_FORMAT};
use crate::error::{KlineError, KlineResult};
use crate::source::KlineSource;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// 봉 주기
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    fn table(self) -> &'static str {
        match self {
            Frequency::Daily => "daily_bars",
            Frequency::Weekly => "weekly_bars",
        }
    }
}

/// SQLite 기반 로컬 시세 저장소
///
/// 종목별 테이블 대신 `(code, date)` 기본키를 가진 정규화된 테이블을 사용한다.
/// 작업마다 새 연결을 열기 때문에 여러 스레드, 여러 인스턴스가
/// 같은 파일을 동시에 써도 WAL과 busy timeout으로 직렬화된다.
#[derive(Debug, Clone)]
pub struct SqliteKlineStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteKlineStore {
    pub fn open(path: impl AsRef<Path>) -> KlineResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> KlineResult<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
        };
        store.locked("open", store.create_schema())?;
        info!("📂 [SqliteKlineStore] 저장소 열기: {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_schema(&self) -> KlineResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS stocks (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                market_cap REAL
            );
            CREATE TABLE IF NOT EXISTS daily_bars (
                code TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL NOT NULL,
                close REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (code, date)
            );
            CREATE TABLE IF NOT EXISTS weekly_bars (
                code TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL NOT NULL,
                close REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (code, date)
            );",
        )?;
        Ok(())
    }

    fn connect(&self) -> KlineResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = 10000;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(conn)
    }

    fn save_bars_inner(&self, code: &str, frequency: Frequency, series: &BarSeries) -> KlineResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let sql = format!(
                "INSERT OR REPLACE INTO {} (code, date, open, close, high, low, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                frequency.table()
            );
            let mut stmt = tx.prepare(&sql)?;
            for bar in series.iter() {
                stmt.execute(params![
                    code,
                    bar.date.format(DATE_FORMAT).to_string(),
                    bar.open,
                    bar.close,
                    bar.high,
                    bar.low,
                    bar.volume
                ])?;
            }
        }
        tx.commit()?;
        debug!(
            "💾 [SqliteKlineStore] {} {:?} {}개 봉 저장",
            code,
            frequency,
            series.len()
        );
        Ok(series.len())
    }

    fn load_bars_inner(&self, code: &str, frequency: Frequency) -> KlineResult<Option<BarSeries>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT date, open, close, high, low, volume FROM {} WHERE code = ?1 ORDER BY date",
            frequency.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![code], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?;

        let mut bars = Vec::new();
        for row in rows {
            let (date, open, close, high, low, volume) = row?;
            bars.push(Bar::new(parse_date(&date)?, open, close, high, low, volume));
        }

        if bars.is_empty() {
            return Ok(None);
        }
        Ok(Some(BarSeries::new(bars)?))
    }

    fn save_stocks_inner(&self, stocks: &[StockInfo]) -> KlineResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO stocks (code, name) VALUES (?1, ?2)
                 ON CONFLICT(code) DO UPDATE SET name = excluded.name",
            )?;
            for stock in stocks {
                stmt.execute(params![stock.code, stock.name])?;
            }
        }
        tx.commit()?;
        info!("💾 [SqliteKlineStore] 종목 목록 저장: {}개", stocks.len());
        Ok(stocks.len())
    }

    fn set_market_cap_inner(&self, code: &str, market_cap: f64) -> KlineResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO stocks (code, name, market_cap) VALUES (?1, ?1, ?2)
             ON CONFLICT(code) DO UPDATE SET market_cap = excluded.market_cap",
            params![code, market_cap],
        )?;
        Ok(())
    }

    fn load_stocks_inner(&self) -> KlineResult<Vec<StockInfo>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT code, name FROM stocks ORDER BY code")?;
        let rows = stmt.query_map([], |row| Ok(StockInfo::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut stocks = Vec::new();
        for row in rows {
            stocks.push(row?);
        }
        Ok(stocks)
    }

    fn load_market_cap_inner(&self, code: &str) -> KlineResult<Option<f64>> {
        let conn = self.connect()?;
        let cap: Option<Option<f64>> = conn
            .query_row(
                "SELECT market_cap FROM stocks WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cap.flatten())
    }
}

impl SqliteKlineStore {
    /// 봉 데이터 저장 (같은 날짜는 덮어쓰기), 저장한 행 수 반환
    pub fn save_bars(&self, code: &str, frequency: Frequency, series: &BarSeries) -> KlineResult<usize> {
        self.locked("save_bars", self.save_bars_inner(code, frequency, series))
    }

    /// 저장된 봉 데이터 조회 (없으면 None)
    pub fn load_bars(&self, code: &str, frequency: Frequency) -> KlineResult<Option<BarSeries>> {
        self.locked("load_bars", self.load_bars_inner(code, frequency))
    }

    /// 종목 목록 저장 (기존 시가총액은 유지)
    pub fn save_stocks(&self, stocks: &[StockInfo]) -> KlineResult<usize> {
        self.locked("save_stocks", self.save_stocks_inner(stocks))
    }

    pub fn set_market_cap(&self, code: &str, market_cap: f64) -> KlineResult<()> {
        self.locked("set_market_cap", self.set_market_cap_inner(code, market_cap))
    }

    pub fn load_stocks(&self) -> KlineResult<Vec<StockInfo>> {
        self.locked("load_stocks", self.load_stocks_inner())
    }

    pub fn load_market_cap(&self, code: &str) -> KlineResult<Option<f64>> {
        self.locked("load_market_cap", self.load_market_cap_inner(code))
    }

    /// 잠금 대기 초과를 작업 이름과 설정된 busy timeout으로 채워 반환
    fn locked<T>(&self, operation: &str, result: KlineResult<T>) -> KlineResult<T> {
        result.map_err(|e| match e {
            KlineError::Timeout { .. } => {
                warn!(
                    "⏰ [SqliteKlineStore] {} 잠금 대기 초과 ({}ms)",
                    operation,
                    self.busy_timeout.as_millis()
                );
                KlineError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.busy_timeout.as_millis() as u64,
                }
            }
            other => other,
        })
    }
}

impl KlineSource for SqliteKlineStore {
    /// 로컬 저장소는 항상 로컬 조회이므로 `use_cache`와 `local_only`는 의미가 없다.
    /// 주봉이 없으면 저장된 일봉으로 합성한다.
    fn get_weekly_kline(
        &self,
        code: &str,
        period: Period,
        _use_cache: bool,
        _local_only: bool,
    ) -> KlineResult<Option<BarSeries>> {
        if let Some(weekly) = self.load_bars(code, Frequency::Weekly)? {
            return Ok(Some(weekly.within(period)));
        }
        match self.load_bars(code, Frequency::Daily)? {
            Some(daily) => Ok(Some(aggregate_weekly(&daily)?.within(period))),
            None => Ok(None),
        }
    }

    fn get_daily_kline(&self, code: &str, period: Period) -> KlineResult<Option<BarSeries>> {
        Ok(self
            .load_bars(code, Frequency::Daily)?
            .map(|series| series.within(period)))
    }

    fn get_all_stocks(&self) -> KlineResult<Vec<StockInfo>> {
        self.load_stocks()
    }

    fn get_market_cap(&self, code: &str, _timeout: Duration) -> KlineResult<Option<f64>> {
        self.load_market_cap(code)
    }
}
