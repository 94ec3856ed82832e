use thiserror::Error;

/// 시세 저장소와 데이터 소스에서 발생하는 오류
#[derive(Error, Debug)]
pub enum KlineError {
    /// 봉 데이터 유효성 검증 실패 (날짜 역순, 음수 거래량 등)
    #[error("잘못된 봉 데이터: {reason}")]
    InvalidSeries { reason: String },

    /// 데이터베이스 관련 오류
    #[error("데이터베이스 오류: {operation} - {reason}")]
    Database { operation: String, reason: String },

    /// 원격 소스 조회 실패
    #[error("데이터 소스 오류: {code} - {reason}")]
    Source { code: String, reason: String },

    /// 제한 시간 초과
    #[error("조회 시간 초과: {operation} ({timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("날짜 파싱 오류: {value}")]
    DateParse { value: String },
}

pub type KlineResult<T> = Result<T, KlineError>;

impl KlineError {
    pub fn invalid_series(reason: impl Into<String>) -> Self {
        Self::InvalidSeries {
            reason: reason.into(),
        }
    }

    pub fn database(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn source(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Source {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// Rusqlite 오류를 KlineError로 변환
///
/// 잠금 대기 초과(SQLITE_BUSY/LOCKED)는 `Timeout`으로 분류한다. 대기 시간은
/// 연결 설정을 아는 쪽(`SqliteKlineStore`)이 채운다.
impl From<rusqlite::Error> for KlineError {
    fn from(error: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &error {
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return KlineError::Timeout {
                    operation: "SQLite 잠금 대기".to_string(),
                    timeout_ms: 0,
                };
            }
        }

        let operation = match &error {
            rusqlite::Error::SqliteFailure(_, _) => "SQL 실행",
            rusqlite::Error::InvalidPath(_) => "경로 확인",
            rusqlite::Error::InvalidColumnType(_, _, _) => "컬럼 타입",
            rusqlite::Error::QueryReturnedNoRows => "조회 결과 없음",
            _ => "데이터베이스 작업",
        };

        KlineError::Database {
            operation: operation.to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = KlineError::source("600519", "연결 거부");
        assert_eq!(error.to_string(), "데이터 소스 오류: 600519 - 연결 거부");
    }

    #[test]
    fn test_busy_maps_to_timeout() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(KlineError::from(busy), KlineError::Timeout { .. }));
    }

    #[test]
    fn test_rusqlite_conversion() {
        let error: KlineError = rusqlite::Error::QueryReturnedNoRows.into();
        match error {
            KlineError::Database { operation, .. } => assert_eq!(operation, "조회 결과 없음"),
            other => panic!("잘못된 오류 타입: {:?}", other),
        }
    }
}
