use kline_store::KlineError;
use thiserror::Error;

/// bullscan 시스템의 모든 오류 타입
///
/// `DataUnavailable`, `InsufficientHistory`, `Timeout`은 종목 단위 결과로
/// 스캔 도중에 기록만 되고 스캔 전체를 중단시키지 않는다.
/// `InvalidTemplate`은 스캔 시작 전에 즉시 실패한다.
#[derive(Error, Debug)]
pub enum BullscanError {
    /// 시세 데이터를 얻을 수 없음
    #[error("데이터 없음: {code} - {reason}")]
    DataUnavailable { code: String, reason: String },

    /// 특징 추출에 필요한 이력이 부족함
    #[error("이력 부족: {code} (필요 {required}개, 보유 {available}개)")]
    InsufficientHistory {
        code: String,
        required: usize,
        available: usize,
    },

    /// 종목 처리 제한 시간 초과
    #[error("처리 시간 초과: {code} ({timeout_ms}ms)")]
    Timeout { code: String, timeout_ms: u64 },

    /// 템플릿이 비어 있거나 손상됨
    #[error("잘못된 템플릿: {reason}")]
    InvalidTemplate { reason: String },

    /// 스캔 상태 전이 오류 (실행 중 재시작 등)
    #[error("스캔 상태 오류: {operation} - {reason}")]
    ScanState { operation: String, reason: String },

    #[error("설정 오류: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("시세 저장소 오류: {0}")]
    Kline(#[from] KlineError),

    #[error("I/O 오류: {operation} - {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("파싱 오류: {data_type} 파싱 실패 - {reason}")]
    Parsing { data_type: String, reason: String },

    #[error("유효성 검증 실패: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("오류: {message}")]
    General { message: String },
}

pub type BullscanResult<T> = Result<T, BullscanError>;

impl BullscanError {
    pub fn data_unavailable(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn insufficient_history(code: impl Into<String>, required: usize, available: usize) -> Self {
        Self::InsufficientHistory {
            code: code.into(),
            required,
            available,
        }
    }

    pub fn invalid_template(reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            reason: reason.into(),
        }
    }

    pub fn scan_state(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ScanState {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn parsing(data_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parsing {
            data_type: data_type.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::General {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for BullscanError {
    fn from(error: std::io::Error) -> Self {
        BullscanError::Io {
            operation: "파일 I/O".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for BullscanError {
    fn from(error: serde_json::Error) -> Self {
        BullscanError::parsing("JSON", error.to_string())
    }
}
