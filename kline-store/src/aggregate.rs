use chrono::{Datelike, NaiveDate, Weekday};

use crate::bar::{Bar, BarSeries};
use crate::error::KlineResult;

/// ISO 주 단위로 일봉을 주봉으로 합성
///
/// 시가는 주의 첫 봉, 종가는 마지막 봉, 고가/저가는 최대/최소, 거래량은 합계.
/// 주봉 날짜는 해당 ISO 주의 일요일로 표기한다.
pub fn aggregate_weekly(daily: &BarSeries) -> KlineResult<BarSeries> {
    let mut weekly: Vec<Bar> = Vec::new();
    let mut current_week: Option<(i32, u32)> = None;

    for bar in daily.iter() {
        let iso = bar.date.iso_week();
        let key = (iso.year(), iso.week());

        if current_week == Some(key) {
            if let Some(last) = weekly.last_mut() {
                last.close = bar.close;
                last.high = last.high.max(bar.high);
                last.low = last.low.min(bar.low);
                last.volume += bar.volume;
            }
            continue;
        }

        current_week = Some(key);
        let label = week_label(bar.date);
        weekly.push(Bar::new(label, bar.open, bar.close, bar.high, bar.low, bar.volume));
    }

    BarSeries::new(weekly)
}

fn week_label(date: NaiveDate) -> NaiveDate {
    let iso = date.iso_week();
    NaiveDate::from_isoywd_opt(iso.year(), iso.week(), Weekday::Sun).unwrap_or(date)
}
