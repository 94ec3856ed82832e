//! 주봉/일봉 OHLCV 데이터 저장소와 소스 인터페이스
//!
//! - [`KlineSource`]: 스캔/학습 코어가 의존하는 좁은 읽기 인터페이스
//! - [`SqliteKlineStore`]: 정규화된 SQLite 로컬 저장소
//! - [`CachingKlineSource`]: 원격 소스 + 로컬 캐시 write-through 조합
//! - [`MemoryKlineSource`]: 메모리 내 소스

pub mod aggregate;
pub mod bar;
pub mod cache;
pub mod error;
pub mod memory;
pub mod source;
pub mod store;

pub use aggregate::aggregate_weekly;
pub use bar::{parse_date, Bar, BarSeries, Period, StockInfo, DATE_FORMAT};
pub use cache::CachingKlineSource;
pub use error::{KlineError, KlineResult};
pub use memory::MemoryKlineSource;
pub use source::KlineSource;
pub use store::{Frequency, SqliteKlineStore};
