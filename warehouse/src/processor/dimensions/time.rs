//! Calendar dimension. Unlike the other dimensions this one is computed in
//! Rust per distinct calendar date, since holiday and fiscal logic is easier
//! to keep correct (and test) here than in SQL CASE arms.

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Date32Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate, Weekday};
use common::Result;

use super::STAGING_TABLE;
use crate::store::AnalyticalStore;

// Days from 0001-01-01 (CE) to the unix epoch; Date32 counts from the epoch.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug)]
pub struct TimeAttributes {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub quarter: u32,
    pub day_of_week: u32,
    pub day_name: &'static str,
    pub month_name: &'static str,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub is_business_day: bool,
    pub season: &'static str,
    pub service_season: &'static str,
    pub fiscal_year: i32,
    pub fiscal_quarter: u32,
    pub week_of_year: u32,
    pub week_of_month: u32,
    pub day_of_year: u32,
    pub is_month_start: bool,
    pub is_month_end: bool,
    pub is_quarter_start: bool,
    pub is_quarter_end: bool,
    pub is_year_start: bool,
    pub is_year_end: bool,
    pub holiday_name: Option<&'static str>,
    pub business_days_in_month: i32,
}

fn floating_holiday(d: NaiveDate) -> Option<&'static str> {
    let (month, day, weekday) = (d.month(), d.day(), d.weekday());
    match (month, weekday) {
        (1, Weekday::Mon) if (15..=21).contains(&day) => Some("Martin Luther King Jr Day"),
        (2, Weekday::Mon) if (15..=21).contains(&day) => Some("Presidents Day"),
        (5, Weekday::Mon) if day > 24 => Some("Memorial Day"),
        (9, Weekday::Mon) if day <= 7 => Some("Labor Day"),
        (11, Weekday::Thu) if (22..=28).contains(&day) => Some("Thanksgiving"),
        _ => None,
    }
}

fn fixed_holiday(month: u32, day: u32) -> Option<&'static str> {
    match (month, day) {
        (1, 1) => Some("New Years Day"),
        (7, 4) => Some("Independence Day"),
        (12, 25) => Some("Christmas Day"),
        (11, 11) => Some("Veterans Day"),
        _ => None,
    }
}

pub fn describe_date(d: NaiveDate) -> TimeAttributes {
    let (year, month, day) = (d.year(), d.month(), d.day());
    let weekday = d.weekday();
    let day_of_week = weekday.num_days_from_sunday();
    let is_weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);

    let holiday_name = fixed_holiday(month, day).or_else(|| floating_holiday(d));
    // Valentine's and Halloween count as observed dates but carry no
    // city-holiday name and stay business days.
    let is_holiday = holiday_name.is_some() || matches!((month, day), (2, 14) | (10, 31));
    let closes_city_offices = fixed_holiday(month, day).is_some()
        || floating_holiday(d) == Some("Thanksgiving");
    let is_business_day = !is_weekend && !closes_city_offices;

    let next_day = d.succ_opt().unwrap_or(d);
    let is_month_end = next_day.month() != month;

    TimeAttributes {
        year,
        month,
        day,
        quarter: (month - 1) / 3 + 1,
        day_of_week,
        day_name: match weekday {
            Weekday::Mon => "Monday",
            Weekday::Tue => "Tuesday",
            Weekday::Wed => "Wednesday",
            Weekday::Thu => "Thursday",
            Weekday::Fri => "Friday",
            Weekday::Sat => "Saturday",
            Weekday::Sun => "Sunday",
        },
        month_name: [
            "January", "February", "March", "April", "May", "June", "July", "August",
            "September", "October", "November", "December",
        ][(month - 1) as usize],
        is_weekend,
        is_holiday,
        is_business_day,
        season: match month {
            6..=8 => "Summer",
            12 | 1 | 2 => "Winter",
            3..=5 => "Spring",
            _ => "Fall",
        },
        service_season: match month {
            11 | 12 | 1..=3 => "Winter Service Peak",
            6..=8 => "Summer Service Peak",
            _ => "Regular Season",
        },
        fiscal_year: if month >= 7 { year + 1 } else { year },
        fiscal_quarter: match month {
            7..=9 => 1,
            10..=12 => 2,
            1..=3 => 3,
            _ => 4,
        },
        week_of_year: d.iso_week().week(),
        week_of_month: day.div_ceil(7),
        day_of_year: d.ordinal(),
        is_month_start: day == 1,
        is_month_end,
        is_quarter_start: day == 1 && matches!(month, 1 | 4 | 7 | 10),
        is_quarter_end: is_month_end && matches!(month, 3 | 6 | 9 | 12),
        is_year_start: month == 1 && day == 1,
        is_year_end: month == 12 && day == 31,
        holiday_name,
        business_days_in_month: match month {
            2 => 20,
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 23,
            _ => 22,
        },
    }
}

pub fn dim_time_schema() -> Schema {
    Schema::new(vec![
        Field::new("time_id", DataType::Int32, false),
        Field::new("date_id", DataType::Date32, false),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        Field::new("day", DataType::Int32, false),
        Field::new("quarter", DataType::Int32, false),
        Field::new("day_of_week", DataType::Int32, false),
        Field::new("day_name", DataType::Utf8, false),
        Field::new("month_name", DataType::Utf8, false),
        Field::new("is_weekend", DataType::Boolean, false),
        Field::new("is_holiday", DataType::Boolean, false),
        Field::new("is_business_day", DataType::Boolean, false),
        Field::new("season", DataType::Utf8, false),
        Field::new("service_season", DataType::Utf8, false),
        Field::new("fiscal_year", DataType::Int32, false),
        Field::new("fiscal_quarter", DataType::Int32, false),
        Field::new("week_of_year", DataType::Int32, false),
        Field::new("week_of_month", DataType::Int32, false),
        Field::new("day_of_year", DataType::Int32, false),
        Field::new("is_month_start", DataType::Boolean, false),
        Field::new("is_month_end", DataType::Boolean, false),
        Field::new("is_quarter_start", DataType::Boolean, false),
        Field::new("is_quarter_end", DataType::Boolean, false),
        Field::new("is_year_start", DataType::Boolean, false),
        Field::new("is_year_end", DataType::Boolean, false),
        Field::new("holiday_name", DataType::Utf8, true),
        Field::new("business_days_in_month", DataType::Int32, false),
    ])
}

fn dim_time_batch(dates: &BTreeSet<NaiveDate>) -> Result<RecordBatch> {
    let rows: Vec<(NaiveDate, TimeAttributes)> =
        dates.iter().map(|d| (*d, describe_date(*d))).collect();

    let i32_col = |f: &dyn Fn(&TimeAttributes) -> i32| -> ArrayRef {
        Arc::new(Int32Array::from(rows.iter().map(|(_, a)| f(a)).collect::<Vec<_>>()))
    };
    let bool_col = |f: &dyn Fn(&TimeAttributes) -> bool| -> ArrayRef {
        Arc::new(BooleanArray::from(rows.iter().map(|(_, a)| f(a)).collect::<Vec<_>>()))
    };
    let str_col = |f: &dyn Fn(&TimeAttributes) -> &'static str| -> ArrayRef {
        Arc::new(StringArray::from(rows.iter().map(|(_, a)| f(a)).collect::<Vec<_>>()))
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(
            (1..=rows.len() as i32).collect::<Vec<_>>(),
        )),
        Arc::new(Date32Array::from(
            rows.iter()
                .map(|(d, _)| d.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
                .collect::<Vec<_>>(),
        )),
        i32_col(&|a| a.year),
        i32_col(&|a| a.month as i32),
        i32_col(&|a| a.day as i32),
        i32_col(&|a| a.quarter as i32),
        i32_col(&|a| a.day_of_week as i32),
        str_col(&|a| a.day_name),
        str_col(&|a| a.month_name),
        bool_col(&|a| a.is_weekend),
        bool_col(&|a| a.is_holiday),
        bool_col(&|a| a.is_business_day),
        str_col(&|a| a.season),
        str_col(&|a| a.service_season),
        i32_col(&|a| a.fiscal_year),
        i32_col(&|a| a.fiscal_quarter as i32),
        i32_col(&|a| a.week_of_year as i32),
        i32_col(&|a| a.week_of_month as i32),
        i32_col(&|a| a.day_of_year as i32),
        bool_col(&|a| a.is_month_start),
        bool_col(&|a| a.is_month_end),
        bool_col(&|a| a.is_quarter_start),
        bool_col(&|a| a.is_quarter_end),
        bool_col(&|a| a.is_year_start),
        bool_col(&|a| a.is_year_end),
        Arc::new(StringArray::from(
            rows.iter().map(|(_, a)| a.holiday_name).collect::<Vec<_>>(),
        )),
        i32_col(&|a| a.business_days_in_month),
    ];

    Ok(RecordBatch::try_new(Arc::new(dim_time_schema()), columns)?)
}

/// Builds dim_time from every distinct parseable created date. The
/// surrogate follows calendar order, so rebuilding from the same input
/// reproduces identical keys.
pub async fn build(store: &AnalyticalStore) -> Result<()> {
    super::require_staging(store)?;

    let df = store
        .sql(&format!(
            "SELECT DISTINCT CAST(TRY_CAST(created_date AS TIMESTAMP) AS DATE) AS d \
             FROM {STAGING_TABLE} \
             WHERE TRY_CAST(created_date AS TIMESTAMP) IS NOT NULL"
        ))
        .await?;

    let mut dates = BTreeSet::new();
    for batch in df.collect().await? {
        let column = batch.column(0);
        let days = column
            .as_any()
            .downcast_ref::<Date32Array>()
            .ok_or_else(|| common::Error::InvalidInput("expected date column".to_string()))?;
        for i in 0..days.len() {
            if days.is_null(i) {
                continue;
            }
            if let Some(d) = NaiveDate::from_num_days_from_ce_opt(days.value(i) + EPOCH_DAYS_FROM_CE)
            {
                dates.insert(d);
            }
        }
    }

    let batch = dim_time_batch(&dates)?;
    store.create_table_from_batches("dim_time", vec![batch]).await
}
