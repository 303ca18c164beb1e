use chrono::NaiveDate;
use std::collections::HashSet;

/// Dates already announced during this process run.
///
/// Entries are never removed: a date that sells out and later reopens is
/// not announced a second time.
#[derive(Debug, Default)]
pub struct NotifiedSet {
    dates: HashSet<NaiveDate>,
}

impl NotifiedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `date` as notified, returning true only the first time it is seen
    pub fn should_notify(&mut self, date: NaiveDate) -> bool {
        self.dates.insert(date)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}
