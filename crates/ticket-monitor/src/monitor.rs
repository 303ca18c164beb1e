//! The poll loop.
//!
//! Each cycle fetches the target month, filters actionable days, marks new
//! ones as notified and then announces them. A failed fetch skips straight
//! to the sleep; a failed delivery is logged and never retried.

use calendar_types::YearMonth;
use chrono::{Local, NaiveDate, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tokio::sync::watch;

use crate::availability::is_actionable;
use crate::calendar_client::CalendarSource;
use crate::notifier::{Alert, Notifier};
use crate::tracker::NotifiedSet;

/// Source of "today" for the availability filter
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock in a fixed time zone, or the host's zone when none is given
pub struct SystemClock {
    tz: Option<Tz>,
}

impl SystemClock {
    pub fn new(tz: Option<Tz>) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        match self.tz {
            Some(tz) => Utc::now().with_timezone(&tz).date_naive(),
            None => Local::now().date_naive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Terminal
    Stopped,
}

/// Everything the loop mutates, owned by the monitor
#[derive(Debug)]
pub struct PollState {
    target: YearMonth,
    notified: NotifiedSet,
    state: LoopState,
}

impl PollState {
    pub fn new(target: YearMonth) -> Self {
        Self {
            target,
            notified: NotifiedSet::new(),
            state: LoopState::Running,
        }
    }

    pub fn target(&self) -> YearMonth {
        self.target
    }

    pub fn notified(&self) -> &NotifiedSet {
        &self.notified
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    fn stop(&mut self) {
        self.state = LoopState::Stopped;
    }
}

/// Outcome of a single poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    FetchFailed,
    Checked {
        /// Days passing the filter, including ones already announced
        actionable: usize,
        /// Newly announced dates, ascending
        notified: Vec<NaiveDate>,
        failed_deliveries: usize,
    },
}

pub struct Monitor {
    source: Box<dyn CalendarSource>,
    notifier: Box<dyn Notifier>,
    clock: Box<dyn Clock>,
    interval: Duration,
    state: PollState,
}

impl Monitor {
    pub fn new(
        target: YearMonth,
        source: Box<dyn CalendarSource>,
        notifier: Box<dyn Notifier>,
        clock: Box<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            notifier,
            clock,
            interval,
            state: PollState::new(target),
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let target = self.state.target();
        tracing::info!("Checking availability for {}", target);

        let snapshot = match self.source.fetch(target).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Calendar fetch for {} failed: {}", target, e);
                return CycleReport::FetchFailed;
            }
        };

        let today = self.clock.today();
        let mut actionable = 0;
        let mut queued = Vec::new();

        for record in snapshot.days() {
            if !is_actionable(record, today) {
                continue;
            }
            actionable += 1;

            if self.state.notified.should_notify(record.date) {
                tracing::info!(
                    "Found available date: {} (sale_status={}, open_status={})",
                    record.date,
                    record.sale_status.as_str(),
                    record.open_status.as_str()
                );
                queued.push(Alert::from(record));
            } else {
                tracing::debug!("{} already notified, skipping", record.date);
            }
        }

        if queued.is_empty() {
            tracing::info!("No new available dates found");
        } else {
            tracing::info!("Found {} new available dates", queued.len());
        }

        let mut failed_deliveries = 0;
        for alert in &queued {
            match self.notifier.notify(alert).await {
                Ok(()) => tracing::info!("Notification sent for {}", alert.date),
                Err(e) => {
                    failed_deliveries += 1;
                    tracing::error!("Failed to send notification for {}: {}", alert.date, e);
                }
            }
        }

        CycleReport::Checked {
            actionable,
            notified: queued.iter().map(|a| a.date).collect(),
            failed_deliveries,
        }
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    ///
    /// The signal is honoured between cycles and cuts the sleep short; an
    /// in-flight fetch is allowed to finish.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Starting ticket monitor for {} (interval: {:?})",
            self.state.target(),
            self.interval
        );

        while self.state.is_running() {
            if *shutdown.borrow_and_update() {
                self.state.stop();
                break;
            }

            self.run_cycle().await;

            tracing::debug!("Waiting {:?} before next check", self.interval);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.state.stop();
                    }
                }
            }
        }

        tracing::info!(
            "Monitor stopped ({} dates notified this run)",
            self.state.notified().len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, NotifyError};
    use async_trait::async_trait;
    use calendar_types::{CalendarSnapshot, DayRecord, OpenStatus, SaleStatus};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, d).unwrap()
    }

    fn november() -> YearMonth {
        YearMonth::new(2025, 11).unwrap()
    }

    fn snapshot(records: Vec<DayRecord>) -> CalendarSnapshot {
        CalendarSnapshot::new(november(), records)
    }

    fn closed_sold_out(date: NaiveDate) -> DayRecord {
        let mut record = DayRecord::available(date);
        record.open_status = OpenStatus::Closed;
        record.sale_status = SaleStatus::SoldOut;
        record
    }

    fn unavailable() -> FetchError {
        FetchError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        }
    }

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<CalendarSnapshot, FetchError>>>,
        calls: Arc<AtomicUsize>,
        stop_when_drained: Option<watch::Sender<bool>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<CalendarSnapshot, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Arc::new(AtomicUsize::new(0)),
                stop_when_drained: None,
            }
        }
    }

    #[async_trait]
    impl CalendarSource for ScriptedSource {
        async fn fetch(&self, _target: YearMonth) -> Result<CalendarSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (next, drained) = {
                let mut responses = self.responses.lock().unwrap();
                let next = responses.pop_front();
                (next, responses.is_empty())
            };
            if drained {
                if let Some(tx) = &self.stop_when_drained {
                    let _ = tx.send(true);
                }
            }
            next.unwrap_or_else(|| Err(unavailable()))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<NaiveDate>>>,
        attempts: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotifyError::Status {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    body: String::new(),
                });
            }
            self.sent.lock().unwrap().push(alert.date);
            Ok(())
        }
    }

    struct FixedClock(NaiveDate);

    impl Clock for FixedClock {
        fn today(&self) -> NaiveDate {
            self.0
        }
    }

    fn monitor(source: ScriptedSource, notifier: RecordingNotifier, interval: Duration) -> Monitor {
        Monitor::new(
            november(),
            Box::new(source),
            Box::new(notifier),
            Box::new(FixedClock(day(1))),
            interval,
        )
    }

    #[tokio::test]
    async fn test_only_open_available_date_is_queued() {
        let source = ScriptedSource::new(vec![Ok(snapshot(vec![
            DayRecord::available(day(3)),
            closed_sold_out(day(4)),
        ]))]);
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(source, notifier.clone(), Duration::ZERO);

        let report = monitor.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Checked {
                actionable: 1,
                notified: vec![day(3)],
                failed_deliveries: 0,
            }
        );
        assert_eq!(*notifier.sent.lock().unwrap(), vec![day(3)]);
    }

    #[tokio::test]
    async fn test_same_date_in_consecutive_snapshots_notified_once() {
        let same = snapshot(vec![DayRecord::available(day(3))]);
        let source = ScriptedSource::new(vec![Ok(same.clone()), Ok(same.clone()), Ok(same)]);
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(source, notifier.clone(), Duration::ZERO);

        monitor.run_cycle().await;
        let second = monitor.run_cycle().await;
        monitor.run_cycle().await;

        assert_eq!(
            second,
            CycleReport::Checked {
                actionable: 1,
                notified: vec![],
                failed_deliveries: 0,
            }
        );
        assert_eq!(*notifier.sent.lock().unwrap(), vec![day(3)]);
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_notified_set_untouched() {
        let source = ScriptedSource::new(vec![
            Ok(snapshot(vec![DayRecord::available(day(3))])),
            Err(unavailable()),
            Ok(snapshot(vec![
                DayRecord::available(day(3)),
                DayRecord::available(day(5)),
            ])),
        ]);
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(source, notifier.clone(), Duration::ZERO);

        monitor.run_cycle().await;
        assert_eq!(monitor.state().notified().len(), 1);

        assert_eq!(monitor.run_cycle().await, CycleReport::FetchFailed);
        assert_eq!(monitor.state().notified().len(), 1);
        assert!(monitor.state().is_running());

        monitor.run_cycle().await;
        assert_eq!(*notifier.sent.lock().unwrap(), vec![day(3), day(5)]);
    }

    #[tokio::test]
    async fn test_notifications_sent_in_ascending_date_order() {
        let source = ScriptedSource::new(vec![Ok(snapshot(vec![
            DayRecord::available(day(20)),
            DayRecord::available(day(7)),
            DayRecord::available(day(12)),
        ]))]);
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(source, notifier.clone(), Duration::ZERO);

        monitor.run_cycle().await;

        assert_eq!(*notifier.sent.lock().unwrap(), vec![day(7), day(12), day(20)]);
    }

    #[tokio::test]
    async fn test_past_dates_are_ignored() {
        let mut monitor = Monitor::new(
            november(),
            Box::new(ScriptedSource::new(vec![Ok(snapshot(vec![
                DayRecord::available(day(2)),
                DayRecord::available(day(10)),
            ]))])),
            Box::new(RecordingNotifier::default()),
            Box::new(FixedClock(day(5))),
            Duration::ZERO,
        );

        match monitor.run_cycle().await {
            CycleReport::Checked { notified, .. } => assert_eq!(notified, vec![day(10)]),
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let same = snapshot(vec![DayRecord::available(day(3))]);
        let source = ScriptedSource::new(vec![Ok(same.clone()), Ok(same)]);
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let mut monitor = monitor(source, notifier.clone(), Duration::ZERO);

        let first = monitor.run_cycle().await;
        let second = monitor.run_cycle().await;

        assert_eq!(
            first,
            CycleReport::Checked {
                actionable: 1,
                notified: vec![day(3)],
                failed_deliveries: 1,
            }
        );
        assert_eq!(
            second,
            CycleReport::Checked {
                actionable: 1,
                notified: vec![],
                failed_deliveries: 0,
            }
        );
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.state().notified().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continues_after_fetch_error() {
        let (tx, rx) = watch::channel(false);
        let mut source = ScriptedSource::new(vec![
            Err(unavailable()),
            Ok(snapshot(vec![DayRecord::available(day(3))])),
        ]);
        source.stop_when_drained = Some(tx);
        let calls = source.calls.clone();
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor(source, notifier.clone(), Duration::from_secs(30));

        monitor.run(rx).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*notifier.sent.lock().unwrap(), vec![day(3)]);
        assert!(!monitor.state().is_running());
    }

    #[tokio::test]
    async fn test_stop_signal_interrupts_sleep() {
        let (tx, rx) = watch::channel(false);
        let mut source = ScriptedSource::new(vec![Ok(snapshot(vec![]))]);
        source.stop_when_drained = Some(tx);
        let calls = source.calls.clone();
        let mut monitor = monitor(
            source,
            RecordingNotifier::default(),
            Duration::from_secs(3600),
        );

        tokio::time::timeout(Duration::from_secs(5), monitor.run(rx))
            .await
            .expect("stop signal should cut the sleep short");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!monitor.state().is_running());
    }

    #[tokio::test]
    async fn test_stop_before_first_cycle_skips_fetch() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let source = ScriptedSource::new(vec![]);
        let calls = source.calls.clone();
        let mut monitor = monitor(source, RecordingNotifier::default(), Duration::from_secs(3600));

        monitor.run(rx).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!monitor.state().is_running());
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_loop() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let source = ScriptedSource::new(vec![Ok(snapshot(vec![]))]);
        let mut monitor = monitor(source, RecordingNotifier::default(), Duration::from_secs(3600));

        tokio::time::timeout(Duration::from_secs(5), monitor.run(rx))
            .await
            .expect("dropped sender should stop the loop");

        assert!(!monitor.state().is_running());
    }
}
