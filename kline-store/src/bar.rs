use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{KlineError, KlineResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 한 거래 기간(일 또는 주)의 OHLCV 레코드
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, close: f64, high: f64, low: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            close,
            high,
            low,
            volume,
        }
    }

    fn check(&self) -> KlineResult<()> {
        let prices = [self.open, self.close, self.high, self.low];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(KlineError::invalid_series(format!(
                "{} 가격이 유한하지 않음",
                self.date
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(KlineError::invalid_series(format!(
                "{} 거래량이 잘못됨: {}",
                self.date, self.volume
            )));
        }
        Ok(())
    }
}

/// 날짜 오름차순으로 정렬된 봉 시퀀스
///
/// 생성 시점에 날짜가 엄격하게 증가하는지, 거래량이 0 이상인지 검증한다.
/// 검증을 통과한 값만 존재하므로 이후 연산은 정렬을 다시 확인하지 않는다.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Bar>", into = "Vec<Bar>")]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> KlineResult<Self> {
        for bar in &bars {
            bar.check()?;
        }
        for pair in bars.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(KlineError::invalid_series(format!(
                    "날짜가 증가하지 않음: {} -> {}",
                    pair[0].date, pair[1].date
                )));
            }
        }
        Ok(Self { bars })
    }

    /// 정렬되지 않은 원시 데이터로부터 생성 (같은 날짜는 마지막 값 유지)
    pub fn from_unsorted(mut bars: Vec<Bar>) -> KlineResult<Self> {
        bars.sort_by_key(|b| b.date);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }
        Self::new(deduped)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bar> {
        self.bars.iter()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// 주어진 날짜 이전(당일 포함) 마지막 봉의 인덱스
    pub fn index_on_or_before(&self, date: NaiveDate) -> Option<usize> {
        let pos = self.bars.partition_point(|b| b.date <= date);
        pos.checked_sub(1)
    }

    /// 주어진 날짜 이전(당일 포함) 봉만 남긴 시퀀스
    pub fn up_to(&self, date: NaiveDate) -> BarSeries {
        let pos = self.bars.partition_point(|b| b.date <= date);
        BarSeries {
            bars: self.bars[..pos].to_vec(),
        }
    }

    /// 주어진 날짜 이전(당일 제외) 봉만 남긴 시퀀스
    pub fn before(&self, date: NaiveDate) -> BarSeries {
        let pos = self.bars.partition_point(|b| b.date < date);
        BarSeries {
            bars: self.bars[..pos].to_vec(),
        }
    }

    /// 마지막 봉 기준으로 기간을 잘라낸 시퀀스
    pub fn within(&self, period: Period) -> BarSeries {
        let (Some(days), Some(last)) = (period.days(), self.bars.last()) else {
            return self.clone();
        };
        let cutoff = last.date - Duration::days(days);
        let pos = self.bars.partition_point(|b| b.date <= cutoff);
        BarSeries {
            bars: self.bars[pos..].to_vec(),
        }
    }
}

impl TryFrom<Vec<Bar>> for BarSeries {
    type Error = KlineError;

    fn try_from(bars: Vec<Bar>) -> Result<Self, Self::Error> {
        BarSeries::new(bars)
    }
}

impl From<BarSeries> for Vec<Bar> {
    fn from(series: BarSeries) -> Self {
        series.bars
    }
}

/// 조회 기간
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[serde(rename = "6m")]
    HalfYear,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "3y")]
    ThreeYears,
    #[serde(rename = "5y")]
    FiveYears,
    All,
}

impl Period {
    pub fn days(self) -> Option<i64> {
        match self {
            Period::HalfYear => Some(183),
            Period::OneYear => Some(365),
            Period::TwoYears => Some(730),
            Period::ThreeYears => Some(1095),
            Period::FiveYears => Some(1826),
            Period::All => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::HalfYear => "6m",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::ThreeYears => "3y",
            Period::FiveYears => "5y",
            Period::All => "all",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = KlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "6m" => Ok(Period::HalfYear),
            "1y" => Ok(Period::OneYear),
            "2y" => Ok(Period::TwoYears),
            "3y" => Ok(Period::ThreeYears),
            "5y" => Ok(Period::FiveYears),
            "all" | "max" => Ok(Period::All),
            other => Err(KlineError::invalid_series(format!(
                "알 수 없는 조회 기간: {}",
                other
            ))),
        }
    }
}

/// 종목 기본 정보
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockInfo {
    pub code: String,
    pub name: String,
}

impl StockInfo {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

pub fn parse_date(value: &str) -> KlineResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| KlineError::DateParse {
        value: value.to_string(),
    })
}
