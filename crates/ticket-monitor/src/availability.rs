use calendar_types::{DayRecord, OpenStatus, SaleStatus};
use chrono::NaiveDate;

/// Whether a day is worth announcing: open, on sale, not in the past and not
/// under a temporary closure.
pub fn is_actionable(record: &DayRecord, today: NaiveDate) -> bool {
    record.open_status == OpenStatus::Open
        && record.sale_status == SaleStatus::Available
        && record.date >= today
        && !record.is_temporary_closure
}
