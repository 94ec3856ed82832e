mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bullscan::errors::BullscanError;
use bullscan::features::FeatureExtractor;
use bullscan::scan::{ScanCheckpoint, ScanConfig, ScanEngine, ScanParams, ScanStatus};
use bullscan::scorer::MatchScorer;
use bullscan::template::FeatureTemplate;
use bullscan::trainer::{train, LabeledFeatures};
use common::{bear_series, bull_series, bull_template, market, short_series, DelayedSource};
use kline_store::{CachingKlineSource, KlineSource, SqliteKlineStore, StockInfo};
use tempfile::TempDir;

fn engine(source: Arc<dyn KlineSource>, config: ScanConfig) -> ScanEngine {
    ScanEngine::new(source, FeatureExtractor::default(), MatchScorer::default(), config)
}

fn params(concurrency: usize) -> ScanParams {
    ScanParams {
        threshold: 0.9,
        market_cap_cap: Some(100.0),
        concurrency,
        scan_date: None,
        limit: None,
    }
}

fn codes(candidates: &[bullscan::scan::Candidate]) -> Vec<String> {
    candidates.iter().map(|c| c.code.clone()).collect()
}

#[test]
fn test_full_scan_counts_every_outcome() {
    let source = market(5, 4);
    source.insert_stock(StockInfo::new("300001", "신규상장"), short_series());
    source.insert_stock(StockInfo::new("300002", "조회실패"), bear_series(9));
    source.fail_on("300002", "네트워크 오류");
    source.insert_market_cap("600000", 500.0);
    source.insert_market_cap("600001", 50.0);

    let config = ScanConfig {
        top_n: 3,
        ..ScanConfig::default()
    };
    let engine = engine(Arc::new(source), config);
    let result = engine.start_scan(bull_template(), params(3), None).expect("scan");

    assert!(result.success);
    assert_eq!(result.status, ScanStatus::Done);
    assert!(!result.stopped);
    assert_eq!(result.total, 11);
    assert_eq!(result.total_scanned, 11);
    assert_eq!(result.found_count, 4);
    assert_eq!(codes(&result.candidates), vec!["600001", "600002", "600003"]);
    assert_eq!(result.candidates[0].market_cap, Some(50.0));
    assert!(result.candidates.iter().all(|c| c.score >= 0.9));

    let counters = result.counters;
    assert_eq!(counters.matched, 4);
    assert_eq!(counters.over_market_cap, 1);
    assert_eq!(counters.below_threshold, 4);
    assert_eq!(counters.insufficient_history, 1);
    assert_eq!(counters.no_data, 1);
    assert_eq!(counters.skipped(), 2);
    assert!(result.message.contains("11개 종목 처리"));

    let checkpoint = engine.checkpoint().expect("checkpoint");
    assert!(checkpoint.is_complete());
    assert_eq!(checkpoint.candidates.len(), 4);

    let progress = engine.progress();
    assert_eq!(progress.status, ScanStatus::Done);
    assert_eq!(progress.current, 11);
    assert_eq!(progress.percentage, 100.0);
}

#[test]
fn test_scan_date_and_limit() {
    let engine = engine(Arc::new(market(3, 3)), ScanConfig::default());
    let mut p = params(2);
    p.limit = Some(2);
    p.scan_date = Some(bull_series().bars()[59].date);
    let result = engine.start_scan(bull_template(), p, None).expect("scan");
    assert_eq!(result.total, 2);
    assert_eq!(result.found_count, 2);
    assert_eq!(result.candidates[0].evaluation_date, bull_series().bars()[59].date);
}

#[test]
fn test_slow_stock_times_out_without_blocking_scan() {
    let source = DelayedSource::new(market(3, 0)).with_delay("600001", Duration::from_secs(3));
    let config = ScanConfig {
        unit_timeout: Duration::from_millis(300),
        ..ScanConfig::default()
    };
    let engine = engine(Arc::new(source), config);

    let started = Instant::now();
    let result = engine.start_scan(bull_template(), params(2), None).expect("scan");
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(result.status, ScanStatus::Done);
    assert_eq!(result.total_scanned, 3);
    assert_eq!(result.counters.timed_out, 1);
    assert_eq!(codes(&result.candidates), vec!["600000", "600002"]);
}

#[test]
fn test_invalid_template_rejected_before_scan() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("template.json");
    std::fs::write(
        &path,
        r#"{"common_features": {}, "sample_count": 0, "trained_at": "2024-05-01T10:00:00+08:00"}"#,
    )
    .expect("write");
    assert!(matches!(
        FeatureTemplate::load(&path),
        Err(BullscanError::InvalidTemplate { .. })
    ));

    let empty = train(&[LabeledFeatures {
        code: "X".to_string(),
        features: Default::default(),
    }]);
    assert!(matches!(empty, Err(BullscanError::InvalidTemplate { .. })));

    let engine = engine(Arc::new(market(1, 0)), ScanConfig::default());
    assert_eq!(engine.status(), ScanStatus::Idle);
    assert!(engine.checkpoint().is_none());
}

#[test]
fn test_stop_then_resume_matches_uninterrupted_run() {
    let dir = TempDir::new().expect("temp dir");
    let checkpoint_path = dir.path().join("checkpoint.json");
    let template = bull_template();

    let baseline = engine(Arc::new(market(6, 6)), ScanConfig::default())
        .start_scan(template.clone(), params(1), None)
        .expect("baseline");

    let source = DelayedSource::new(market(6, 6)).with_default_delay(Duration::from_millis(80));
    let config = ScanConfig {
        checkpoint_path: Some(checkpoint_path.clone()),
        checkpoint_interval: 2,
        ..ScanConfig::default()
    };
    let engine = Arc::new(engine(Arc::new(source), config));

    let stopper = {
        let engine = engine.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            engine.stop();
        })
    };
    let stopped = engine.start_scan(template.clone(), params(1), None).expect("scan");
    stopper.join().expect("stopper");

    assert_eq!(stopped.status, ScanStatus::Stopped);
    assert!(stopped.stopped);
    assert!(stopped.total_scanned < 12);
    assert_eq!(engine.status(), ScanStatus::Stopped);

    let saved = ScanCheckpoint::load(&checkpoint_path).expect("checkpoint");
    assert_eq!(saved.status, ScanStatus::Stopped);
    assert_eq!(saved.cursor, stopped.total_scanned);
    assert_eq!(saved.counters.scanned, saved.cursor);

    let resumed = engine.resume_scan().expect("resume");
    assert_eq!(resumed.status, ScanStatus::Done);
    assert_eq!(resumed.total_scanned, 12);
    assert_eq!(codes(&resumed.candidates), codes(&baseline.candidates));
    assert_eq!(resumed.counters, baseline.counters);

    // 완료된 스캔은 다시 재개할 수 없다
    assert!(matches!(engine.resume_scan(), Err(BullscanError::ScanState { .. })));
}

#[test]
fn test_concurrent_stop_with_slow_stock_resumes_to_same_result() {
    let dir = TempDir::new().expect("temp dir");
    let checkpoint_path = dir.path().join("checkpoint.json");
    let template = bull_template();

    let baseline = engine(Arc::new(market(8, 8)), ScanConfig::default())
        .start_scan(template.clone(), params(4), None)
        .expect("baseline");

    // 600002가 늦게 끝나는 동안 뒤쪽 종목이 먼저 완료된다
    let source = DelayedSource::new(market(8, 8))
        .with_default_delay(Duration::from_millis(100))
        .with_delay("600002", Duration::from_millis(400));
    let config = ScanConfig {
        checkpoint_path: Some(checkpoint_path.clone()),
        checkpoint_interval: 1,
        ..ScanConfig::default()
    };
    let engine = Arc::new(engine(Arc::new(source), config));

    let stopper = {
        let engine = engine.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            engine.stop();
        })
    };
    let stopped = engine.start_scan(template.clone(), params(4), None).expect("scan");
    stopper.join().expect("stopper");

    assert_eq!(stopped.status, ScanStatus::Stopped);
    assert!(stopped.total_scanned > 2);
    assert!(stopped.total_scanned < 16);

    let saved = ScanCheckpoint::load(&checkpoint_path).expect("checkpoint");
    assert_eq!(saved.cursor, stopped.total_scanned);
    assert_eq!(saved.counters.scanned, saved.cursor);
    assert!(saved.candidates.iter().all(|c| c.scan_index < saved.cursor));

    let resumed = engine.resume_scan().expect("resume");
    assert_eq!(resumed.status, ScanStatus::Done);
    assert_eq!(resumed.total_scanned, 16);
    assert_eq!(codes(&resumed.candidates), codes(&baseline.candidates));
    assert_eq!(resumed.counters, baseline.counters);
}

#[test]
fn test_failed_start_discards_stopped_scan() {
    let template = bull_template();
    let source = Arc::new(DelayedSource::new(market(4, 4)).with_default_delay(Duration::from_millis(80)));
    let engine = Arc::new(engine(source.clone(), ScanConfig::default()));

    let stopper = {
        let engine = engine.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            engine.stop();
        })
    };
    let stopped = engine.start_scan(template.clone(), params(1), None).expect("scan");
    stopper.join().expect("stopper");
    assert_eq!(stopped.status, ScanStatus::Stopped);

    source.set_stock_list_down(true);
    let failed = engine.start_scan(template.clone(), params(1), None).expect("start");
    assert!(!failed.success);
    assert_eq!(failed.status, ScanStatus::Failed);
    assert_eq!(failed.total_scanned, 0);
    assert_eq!(engine.status(), ScanStatus::Failed);
    assert!(engine.checkpoint().is_none());

    // 이전에 중지된 스캔으로 되돌아가지 않는다
    assert!(matches!(engine.resume_scan(), Err(BullscanError::ScanState { .. })));
    assert_eq!(engine.status(), ScanStatus::Failed);

    source.set_stock_list_down(false);
    let fresh = engine.start_scan(template, params(2), None).expect("scan");
    assert_eq!(fresh.status, ScanStatus::Done);
    assert_eq!(fresh.total_scanned, 8);
    assert_eq!(fresh.found_count, 4);
}

#[test]
fn test_resume_from_checkpoint_after_restart() {
    let dir = TempDir::new().expect("temp dir");
    let checkpoint_path = dir.path().join("checkpoint.json");
    let template = bull_template();

    let config = ScanConfig {
        checkpoint_path: Some(checkpoint_path.clone()),
        ..ScanConfig::default()
    };
    let first = engine(Arc::new(market(4, 4)), config.clone());
    let full = first.start_scan(template.clone(), params(2), None).expect("scan");

    // 중간 지점 체크포인트를 흉내내서 새 엔진이 이어서 처리하게 한다
    let mut partial = ScanCheckpoint::load(&checkpoint_path).expect("checkpoint");
    partial.cursor = 3;
    partial.status = ScanStatus::Stopped;
    partial.candidates.retain(|c| c.scan_index < 3);
    partial.counters = Default::default();
    partial.counters.scanned = 3;
    partial.counters.matched = partial.candidates.len();
    partial.counters.below_threshold = 3 - partial.candidates.len();
    partial.save(&checkpoint_path).expect("save");

    let second = engine(Arc::new(market(4, 4)), config);
    let resumed = second
        .resume_from_checkpoint(&checkpoint_path, template.clone())
        .expect("resume");
    assert_eq!(resumed.status, ScanStatus::Done);
    assert_eq!(codes(&resumed.candidates), codes(&full.candidates));
    assert_eq!(resumed.counters, full.counters);

    let other = Arc::new(
        train(&[
            LabeledFeatures {
                code: "A".to_string(),
                features: bullscan::features::extract(&bull_series(), 59, 40).expect("features"),
            },
            LabeledFeatures {
                code: "B".to_string(),
                features: bullscan::features::extract(&bear_series(1), 59, 40).expect("features"),
            },
        ])
        .expect("template"),
    );
    let third = engine(Arc::new(market(4, 4)), ScanConfig::default());
    assert!(matches!(
        third.resume_from_checkpoint(&checkpoint_path, other),
        Err(BullscanError::InvalidTemplate { .. })
    ));
}

#[test]
fn test_two_engines_share_one_cache_database() {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("kline.db");
    let template = bull_template();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let db_path = db_path.clone();
            let template = template.clone();
            thread::spawn(move || {
                let store = SqliteKlineStore::open(&db_path).expect("store");
                let source = CachingKlineSource::new(market(5, 5), store);
                engine(Arc::new(source), ScanConfig::default())
                    .start_scan(template, params(3), None)
                    .expect("scan")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().expect("thread")).collect();
    for result in &results {
        assert_eq!(result.status, ScanStatus::Done);
        assert_eq!(result.found_count, 5);
    }
    assert_eq!(codes(&results[0].candidates), codes(&results[1].candidates));

    // 캐시만으로 다시 스캔해도 결과가 같아야 한다
    let store = SqliteKlineStore::open(&db_path).expect("store");
    let offline = CachingKlineSource::new(kline_store::MemoryKlineSource::new(), store);
    let config = ScanConfig {
        local_only: true,
        ..ScanConfig::default()
    };
    let universe = market(5, 5).get_all_stocks().expect("stocks");
    let result = engine(Arc::new(offline), config)
        .start_scan(template, params(2), Some(universe))
        .expect("scan");
    assert_eq!(codes(&result.candidates), codes(&results[0].candidates));
}
