use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// tracing 초기화 함수
///
/// JSON 구조화 로그를 출력한다. `RUST_LOG`가 있으면 그 필터를, 없으면
/// `default_level`을 사용한다.
pub fn init_tracing(default_level: &str) -> Result<(), String> {
    // 의존 크레이트의 log! 매크로 호환
    LogTracer::init().map_err(|e| {
        eprintln!("Failed to set LogTracer: {}", e);
        format!("로그 시스템 초기화 실패: {}", e)
    })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true),
    );

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        eprintln!("Failed to set tracing subscriber: {}", e);
        format!("로그 시스템 초기화 실패: {}", e)
    })?;

    Ok(())
}

pub mod config;
pub mod errors;
pub mod features;
pub mod interval;
pub mod scan;
pub mod scorer;
pub mod surge;
pub mod template;
pub mod trainer;

pub use config::{get_config, Config, ConfigError};
pub use errors::{BullscanError, BullscanResult};
pub use features::{Feature, FeatureExtractor, FeatureVector};
pub use interval::{find_max_gain_interval, GainInterval};
pub use scan::{Candidate, ScanConfig, ScanEngine, ScanParams, ScanProgress, ScanResult, ScanStatus};
pub use scorer::{MatchResult, MatchScorer, ScoringConfig};
pub use surge::{find_surge, VolumeSurgeLocator};
pub use template::{FeatureStats, FeatureTemplate};
pub use trainer::{LabeledFeatures, TemplateTrainer, TrainingReport, TrainingSample};
