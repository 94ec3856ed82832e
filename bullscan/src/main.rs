use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use bullscan::config::{set_global_config, Config};
use bullscan::errors::{BullscanError, BullscanResult};
use bullscan::scan::{ScanEngine, ScanParams, ScanResult};
use bullscan::template::FeatureTemplate;
use bullscan::trainer::{TemplateTrainer, TrainingSample};
use bullscan::{init_tracing, FeatureExtractor, VolumeSurgeLocator};
use clap::{Parser, Subcommand};
use kline_store::{parse_date, KlineSource, Period, SqliteKlineStore, StockInfo};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bullscan")]
#[command(about = "Explosive-growth pattern template training and market scan")]
struct Args {
    /// 설정 파일 경로 (기본값: config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 상승 종목 표본으로 템플릿 학습
    Train {
        /// 한 줄에 `종목코드[,매수일 YYYY-MM-DD]`
        #[arg(long)]
        samples: String,
        /// 템플릿 저장 경로 (기본값: 설정 파일의 template_path)
        #[arg(long)]
        output: Option<String>,
    },
    /// 전 종목 스캔
    Scan {
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// 평가 기준일 (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// 체크포인트에서 스캔 재개
    Resume {
        /// 체크포인트 경로 (기본값: 설정 파일의 checkpoint_path)
        #[arg(long)]
        checkpoint: Option<String>,
    },
}

fn main() -> BullscanResult<()> {
    let args = Args::parse();

    let config = Config::load_from_file(&args.config)?;
    init_tracing(&config.logging.level).map_err(BullscanError::general)?;
    set_global_config(config.clone())?;

    info!("🚀 bullscan 시작! 설정 파일: {}", args.config);
    info!("💾 K선 DB 경로: {}", config.database.kline_db_path);

    let store = Arc::new(SqliteKlineStore::open(&config.database.kline_db_path)?);

    let outcome = match args.command {
        Command::Train { samples, output } => run_train(&config, store, &samples, output),
        Command::Scan {
            threshold,
            concurrency,
            date,
            limit,
        } => {
            let mut params = ScanParams::from_section(&config.scan);
            if let Some(threshold) = threshold {
                params.threshold = threshold;
            }
            if let Some(concurrency) = concurrency {
                params.concurrency = concurrency.max(1);
            }
            if let Some(date) = date {
                params.scan_date = Some(parse_date(&date)?);
            }
            params.limit = limit;
            run_scan(&config, store, params)
        }
        Command::Resume { checkpoint } => {
            let path = checkpoint.unwrap_or_else(|| config.scan.checkpoint_path.clone());
            run_resume(&config, store, &path)
        }
    };

    if let Err(e) = &outcome {
        error!("❌ 실행 중 오류 발생: {}", e);
    }
    info!("🏁 bullscan 종료");
    outcome
}

fn run_train(config: &Config, store: Arc<SqliteKlineStore>, samples_path: &str, output: Option<String>) -> BullscanResult<()> {
    let content = fs::read_to_string(samples_path)
        .map_err(|e| BullscanError::io(format!("표본 파일 읽기: {}", samples_path), e))?;
    let period: Period = config.database.period.parse()?;
    let names: HashMap<String, String> = store
        .load_stocks()?
        .into_iter()
        .map(|s| (s.code, s.name))
        .collect();

    let mut samples = Vec::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')) {
        let mut parts = line.splitn(2, ',').map(str::trim);
        let code = parts.next().unwrap_or_default().to_string();
        let buy_date = parts.next().map(parse_date).transpose()?;
        let name = names.get(&code).cloned().unwrap_or_else(|| code.clone());

        let Some(weekly) = store.get_weekly_kline(&code, period, true, true)? else {
            warn!("📭 [Train] {} 주봉 데이터 없음, 건너뜀", code);
            continue;
        };
        let daily = if config.features.use_daily_features {
            store.get_daily_kline(&code, period)?
        } else {
            None
        };

        let sample = match buy_date {
            Some(date) => weekly.index_on_or_before(date).map(|buy_index| TrainingSample {
                code: code.clone(),
                name,
                weekly,
                buy_index,
                daily: None,
            }),
            None => TrainingSample::from_max_gain(
                code.clone(),
                name,
                weekly,
                config.training.search_weeks,
                config.training.min_gain_pct,
            ),
        };
        match sample {
            Some(mut sample) => {
                sample.daily = daily;
                samples.push(sample);
            }
            None => warn!("⚠️ [Train] {} 매수 시점을 정할 수 없음, 건너뜀", code),
        }
    }

    let trainer = TemplateTrainer::new(
        FeatureExtractor::from_config(&config.features),
        VolumeSurgeLocator::from_config(&config.features),
    );
    let report = trainer.train_samples(&samples)?;
    let path = output.unwrap_or_else(|| config.database.template_path.clone());
    report.template.save(&path)?;
    info!(
        "✨ 템플릿 저장: {} (표본 {}개, 제외 {}개)",
        path,
        report.used.len(),
        report.skipped.len()
    );
    Ok(())
}

fn run_scan(config: &Config, store: Arc<SqliteKlineStore>, params: ScanParams) -> BullscanResult<()> {
    let template = Arc::new(FeatureTemplate::load(&config.database.template_path)?);
    let engine = ScanEngine::from_config(store.clone(), config)?;
    let universe: Vec<StockInfo> = store.get_all_stocks()?;
    let result = engine.start_scan(template, params, Some(universe))?;
    print_result(&result)
}

fn run_resume(config: &Config, store: Arc<SqliteKlineStore>, checkpoint: &str) -> BullscanResult<()> {
    let template = Arc::new(FeatureTemplate::load(&config.database.template_path)?);
    let engine = ScanEngine::from_config(store, config)?;
    let result = engine.resume_from_checkpoint(checkpoint, template)?;
    print_result(&result)
}

fn print_result(result: &ScanResult) -> BullscanResult<()> {
    info!("📊 {}", result.message);
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
