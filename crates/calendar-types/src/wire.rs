//! Wire format of the ticketing calendar endpoint.
//!
//! The endpoint answers with `{"data": {"calendar": {"YYYY-MM-DD": {...}}}}`.
//! Optional fields may be null or missing and are mapped to their
//! null-equivalent instead of failing the whole payload.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{DayRecord, OpenStatus, SaleStatus};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed calendar payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    data: CalendarData,
}

#[derive(Debug, Deserialize)]
struct CalendarData {
    calendar: BTreeMap<String, RawDay>,
}

#[derive(Debug, Deserialize)]
struct RawDay {
    #[serde(default)]
    apply_type: Option<i64>,
    #[serde(default)]
    sale_status: SaleStatus,
    #[serde(default)]
    open_status: OpenStatus,
    #[serde(default)]
    holiday: Option<String>,
    #[serde(default)]
    day_label: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    is_temporary_closure: bool,
    #[serde(default)]
    temporary_closure_time: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    is_holding: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn parse_calendar(body: &[u8]) -> Result<Vec<DayRecord>, ParseError> {
    let response: CalendarResponse = serde_json::from_slice(body)?;

    let records = response
        .data
        .calendar
        .into_iter()
        .filter_map(|(key, raw)| match NaiveDate::parse_from_str(&key, "%Y-%m-%d") {
            Ok(date) => Some(DayRecord {
                date,
                apply_type: raw.apply_type,
                sale_status: raw.sale_status,
                open_status: raw.open_status,
                holiday: raw.holiday,
                day_label: raw.day_label,
                is_temporary_closure: raw.is_temporary_closure,
                temporary_closure_time: raw.temporary_closure_time,
                is_holding: raw.is_holding,
            }),
            Err(e) => {
                tracing::warn!("Skipping calendar entry with invalid date key {:?}: {}", key, e);
                None
            }
        })
        .collect();

    Ok(records)
}
