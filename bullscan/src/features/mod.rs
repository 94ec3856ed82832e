//! 주봉 특징 추출
//!
//! - `schema`: 특징 이름 레지스트리와 [`FeatureVector`]
//! - `indicators`: MA/EMA/MACD/RSI/KDJ/OBV/볼린저 계산
//! - `extractor`: 평가 시점 기준 특징 벡터 계산

pub mod extractor;
pub mod indicators;
pub mod schema;

pub use extractor::{extract, FeatureExtractor, DEFAULT_LOOKBACK, DEFAULT_MIN_HISTORY};
pub use schema::{Category, Feature, FeatureSpec, FeatureVector, ValueKind};
