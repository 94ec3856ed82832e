use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("설정 파일을 찾을 수 없습니다: {0}")]
    FileNotFound(String),
    #[error("설정 파일 읽기 오류: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("설정 파일 파싱 오류: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("설정 유효성 검증 실패: {0}")]
    ValidationError(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub scoring: ScoringSection,
    pub scan: ScanSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 주봉/일봉 SQLite 캐시 경로
    pub kline_db_path: String,
    /// 학습된 템플릿 JSON 경로
    pub template_path: String,
    /// 조회 기간 (6m, 1y, 2y, 3y, 5y, all)
    pub period: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kline_db_path: "kline.db".to_string(),
            template_path: "bull_template.json".to_string(),
            period: "2y".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FeatureConfig {
    pub lookback: usize,
    pub min_history: usize,
    pub surge_min_ratio: f64,
    pub surge_lookback: usize,
    /// 거래량 급증 지점을 찾지 못했을 때 매수 시점에서 거슬러 올라갈 주 수
    pub fallback_offset: usize,
    /// 일봉 기반 특징(limit_up_recent, ma_smoothness) 사용 여부
    pub use_daily_features: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookback: 40,
            min_history: 20,
            surge_min_ratio: 3.0,
            surge_lookback: 52,
            fallback_offset: 20,
            use_daily_features: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TrainingConfig {
    pub search_weeks: usize,
    pub min_gain_pct: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            search_weeks: 10,
            min_gain_pct: 100.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScoringSection {
    pub core_decay: f64,
    pub normal_decay: f64,
    pub core_weight: f64,
    pub normal_weight: f64,
    pub in_range_floor: f64,
    pub tolerance: f64,
    pub bonus_enabled: bool,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            core_decay: 0.2,
            normal_decay: 0.35,
            core_weight: 3.0,
            normal_weight: 1.0,
            in_range_floor: 0.7,
            tolerance: 0.0,
            bonus_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScanSection {
    pub threshold: f64,
    /// 시가총액 상한 (억 위안), 0 이하이면 필터 없음
    pub market_cap_cap: f64,
    pub concurrency: usize,
    pub unit_timeout_ms: u64,
    pub market_cap_timeout_ms: u64,
    pub top_n: usize,
    pub use_cache: bool,
    pub local_only: bool,
    pub checkpoint_path: String,
    pub checkpoint_interval: usize,
    pub show_progress_bar: bool,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            market_cap_cap: 100.0,
            concurrency: 5,
            unit_timeout_ms: 15_000,
            market_cap_timeout_ms: 3_000,
            top_n: 50,
            use_cache: true,
            local_only: false,
            checkpoint_path: "scan_checkpoint.json".to_string(),
            checkpoint_interval: 50,
            show_progress_bar: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// config.toml 파일에서 설정을 로드
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("config.toml")
    }

    /// 지정된 파일에서 설정을 로드
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound(format!(
                "{}가 없습니다. config.example.toml을 복사해서 config.toml을 만들어주세요.",
                path
            )));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 환경 변수로 설정을 오버라이드
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("BULLSCAN_DB_PATH") {
            self.database.kline_db_path = path;
        }
        if let Ok(path) = std::env::var("BULLSCAN_TEMPLATE_PATH") {
            self.database.template_path = path;
        }
        if let Ok(path) = std::env::var("BULLSCAN_CHECKPOINT_PATH") {
            self.scan.checkpoint_path = path;
        }
        if let Ok(value) = std::env::var("BULLSCAN_SCAN_CONCURRENCY") {
            if let Ok(concurrency) = value.parse::<usize>() {
                self.scan.concurrency = concurrency;
            }
        }

        // 로그 레벨
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// 설정 유효성 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.period.parse::<kline_store::Period>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "period는 6m, 1y, 2y, 3y, 5y, all 중 하나여야 합니다: {}",
                self.database.period
            )));
        }

        if self.features.min_history == 0 || self.features.lookback < self.features.min_history {
            return Err(ConfigError::ValidationError(
                "lookback은 min_history 이상이어야 하며 min_history는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.features.surge_min_ratio <= 1.0 {
            return Err(ConfigError::ValidationError(
                "surge_min_ratio는 1보다 커야 합니다".to_string(),
            ));
        }

        if self.training.search_weeks == 0 {
            return Err(ConfigError::ValidationError(
                "search_weeks는 0보다 커야 합니다".to_string(),
            ));
        }

        let s = &self.scoring;
        if s.core_decay <= 0.0 || s.normal_decay <= 0.0 {
            return Err(ConfigError::ValidationError(
                "core_decay와 normal_decay는 0보다 커야 합니다".to_string(),
            ));
        }
        if s.core_weight <= 0.0 || s.normal_weight <= 0.0 {
            return Err(ConfigError::ValidationError(
                "가중치는 0보다 커야 합니다".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&s.in_range_floor) {
            return Err(ConfigError::ValidationError(
                "in_range_floor는 0~1 사이여야 합니다".to_string(),
            ));
        }
        if s.tolerance < 0.0 {
            return Err(ConfigError::ValidationError(
                "tolerance는 0 이상이어야 합니다".to_string(),
            ));
        }

        let scan = &self.scan;
        if !(0.0..=1.0).contains(&scan.threshold) {
            return Err(ConfigError::ValidationError(
                "threshold는 0~1 사이여야 합니다".to_string(),
            ));
        }
        if scan.concurrency == 0 || scan.concurrency > 64 {
            return Err(ConfigError::ValidationError(
                "concurrency는 1~64 사이여야 합니다".to_string(),
            ));
        }
        if scan.unit_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "unit_timeout_ms는 0보다 커야 합니다".to_string(),
            ));
        }
        if scan.top_n == 0 {
            return Err(ConfigError::ValidationError(
                "top_n은 0보다 커야 합니다".to_string(),
            ));
        }
        if scan.checkpoint_interval == 0 {
            return Err(ConfigError::ValidationError(
                "checkpoint_interval은 0보다 커야 합니다".to_string(),
            ));
        }

        Ok(())
    }

    /// 설정을 파일로 저장 (주로 디버깅용)
    pub fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(format!("직렬화 오류: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// 글로벌 설정 인스턴스 (한 번만 로드)
static GLOBAL_CONFIG: std::sync::OnceLock<Config> = std::sync::OnceLock::new();

/// 글로벌 설정 인스턴스를 가져오기 (설정되지 않았으면 config.toml 로드)
pub fn get_config() -> Result<&'static Config, ConfigError> {
    if let Some(config) = GLOBAL_CONFIG.get() {
        return Ok(config);
    }
    let loaded = Config::load()?;
    Ok(GLOBAL_CONFIG.get_or_init(|| loaded))
}

/// 전역 설정을 설정 (main.rs에서 사용)
pub fn set_global_config(config: Config) -> Result<(), ConfigError> {
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| ConfigError::ValidationError("전역 설정이 이미 초기화되어 있습니다".to_string()))
}
