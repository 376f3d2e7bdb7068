use crate::config::{LateDataPolicy, duration_millis};
use crate::formatter::OutputRecord;
use crate::message::WordEvent;
use crate::metrics::PipelineMetrics;
use crate::watermark::WatermarkTracker;
use crate::window_instance::{Window, WindowAssigner};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Finalized counts of one window pane, emitted when the pane closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub window: Window,
    /// 0 for the on-time pane, 1.. for late panes.
    pub pane: u32,
    pub counts: HashMap<String, u64>,
}

impl WindowSnapshot {
    /// Output records sorted by word.
    pub fn records(&self) -> Vec<OutputRecord> {
        let mut records: Vec<OutputRecord> = self
            .counts
            .iter()
            .map(|(word, count)| OutputRecord::new(word.clone(), *count))
            .collect();
        records.sort();
        records
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Running counts of an open window pane.
#[derive(Debug, Clone)]
struct WindowState {
    counts: HashMap<String, u64>,
    pane: u32,
    opened_at_watermark: i64,
}

impl WindowState {
    fn new(pane: u32, opened_at_watermark: i64) -> Self {
        Self {
            counts: HashMap::new(),
            pane,
            opened_at_watermark,
        }
    }

    fn increment(&mut self, word: &str) {
        match self.counts.get_mut(word) {
            Some(count) => *count += 1,
            None => {
                self.counts.insert(word.to_string(), 1);
            }
        }
    }
}

/// What happened to an event handed to [`WindowedAggregator::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted,
    /// Counted into a late pane of an already emitted window.
    Refired,
    DroppedLate,
}

/// Callback type for closed window emission
pub type WindowCallback = Arc<dyn Fn(&WindowSnapshot) + Send + Sync>;

/// Fixed-window word counter driven by an event-time watermark.
pub struct WindowedAggregator {
    assigner: WindowAssigner,
    watermark: WatermarkTracker,
    late_data: LateDataPolicy,
    active_windows: HashMap<Window, WindowState>,
    /// Last pane emitted per recently closed window; only kept under the refire policy.
    closed_panes: BTreeMap<Window, u32>,
    metrics: Arc<PipelineMetrics>,
    callbacks: Vec<WindowCallback>,
}

impl WindowedAggregator {
    pub fn new(
        assigner: WindowAssigner,
        allowed_lateness: Duration,
        late_data: LateDataPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            assigner,
            watermark: WatermarkTracker::new(allowed_lateness),
            late_data,
            active_windows: HashMap::new(),
            closed_panes: BTreeMap::new(),
            metrics,
            callbacks: Vec::new(),
        }
    }

    /// Counts one word into its window, unless that window is already complete.
    pub fn add(&mut self, event: &WordEvent) -> AddOutcome {
        let window = self.assigner.assign(event.event_timestamp);

        if let Some(state) = self.active_windows.get_mut(&window) {
            state.increment(&event.word);
            self.metrics.record_word_accepted();
            if state.pane > 0 {
                self.metrics.record_late_refired();
                return AddOutcome::Refired;
            }
            return AddOutcome::Accepted;
        }

        let current = self.watermark.current();
        if !self.watermark.has_passed(window.end) {
            let mut state = WindowState::new(0, current);
            state.increment(&event.word);
            self.active_windows.insert(window, state);
            self.metrics.record_word_accepted();
            return AddOutcome::Accepted;
        }

        if let LateDataPolicy::Refire { horizon } = self.late_data {
            if window.end > current.saturating_sub(duration_millis(horizon)) {
                let pane = self.closed_panes.get(&window).map_or(1, |last| last + 1);
                debug!(%window, pane, word = %event.word, "late event opens a late pane");
                let mut state = WindowState::new(pane, current);
                state.increment(&event.word);
                self.active_windows.insert(window, state);
                self.metrics.record_word_accepted();
                self.metrics.record_late_refired();
                return AddOutcome::Refired;
            }
        }

        debug!(
            %window,
            word = %event.word,
            event_timestamp = event.event_timestamp,
            watermark = current,
            "dropping late event"
        );
        self.metrics.record_dropped_late();
        AddOutcome::DroppedLate
    }

    /// Advances the watermark from an observed event timestamp and closes complete windows.
    pub fn observe_timestamp(&mut self, timestamp: i64) -> Vec<WindowSnapshot> {
        match self.watermark.on_event(timestamp) {
            Some(_) => self.close_complete_windows(false),
            None => Vec::new(),
        }
    }

    /// Advances the watermark after `idle_for` without input.
    pub fn on_idle(&mut self, idle_for: Duration) -> Vec<WindowSnapshot> {
        match self.watermark.on_idle(idle_for) {
            Some(_) => self.close_complete_windows(false),
            None => Vec::new(),
        }
    }

    /// Closes every open window, as on shutdown.
    pub fn flush_all(&mut self) -> Vec<WindowSnapshot> {
        self.watermark.advance_to_end();
        self.close_complete_windows(true)
    }

    /// Late panes normally wait for a strict watermark advance past the one that opened them;
    /// `force` closes them regardless.
    fn close_complete_windows(&mut self, force: bool) -> Vec<WindowSnapshot> {
        let watermark = self.watermark.current();
        let mut ready: Vec<Window> = self
            .active_windows
            .iter()
            .filter(|(window, state)| {
                window.end <= watermark
                    && (force || state.pane == 0 || watermark > state.opened_at_watermark)
            })
            .map(|(window, _)| *window)
            .collect();
        ready.sort();

        let mut snapshots = Vec::with_capacity(ready.len());
        for window in ready {
            let Some(state) = self.active_windows.remove(&window) else {
                continue;
            };
            debug!(%window, pane = state.pane, words = state.counts.len(), "window closed");
            if matches!(self.late_data, LateDataPolicy::Refire { .. }) {
                self.closed_panes.insert(window, state.pane);
            }
            let snapshot = WindowSnapshot {
                window,
                pane: state.pane,
                counts: state.counts,
            };
            self.metrics.record_window_emitted();
            self.emit(&snapshot);
            snapshots.push(snapshot);
        }

        if let LateDataPolicy::Refire { horizon } = self.late_data {
            let expired_before = watermark.saturating_sub(duration_millis(horizon));
            self.closed_panes.retain(|window, _| window.end > expired_before);
        }

        snapshots
    }

    /// Subscribe a callback to closed window emissions
    ///
    /// Callbacks run while the aggregator is mutably borrowed, so under a running pipeline they
    /// run with its lock held. Use [`WordCountPipeline::subscribe`] there instead.
    ///
    /// [`WordCountPipeline::subscribe`]: crate::WordCountPipeline::subscribe
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(&WindowSnapshot) + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
    }

    fn emit(&self, snapshot: &WindowSnapshot) {
        for callback in &self.callbacks {
            callback(snapshot);
        }
    }

    pub fn watermark(&self) -> i64 {
        self.watermark.current()
    }

    pub fn active_window_count(&self) -> usize {
        self.active_windows.len()
    }

    /// Current counts of the open window containing `timestamp`, if any.
    pub fn get_content(&self, timestamp: i64) -> Option<&HashMap<String, u64>> {
        let window = self.assigner.assign(timestamp);
        self.active_windows.get(&window).map(|state| &state.counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn aggregator(late_data: LateDataPolicy) -> (WindowedAggregator, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let assigner = WindowAssigner::new(Duration::from_secs(60)).unwrap();
        (
            WindowedAggregator::new(assigner, Duration::ZERO, late_data, metrics.clone()),
            metrics,
        )
    }

    fn feed(agg: &mut WindowedAggregator, word: &str, ts: i64) -> Vec<WindowSnapshot> {
        agg.add(&WordEvent::new(word, ts));
        agg.observe_timestamp(ts)
    }

    #[test]
    fn test_window_closes_when_watermark_reaches_end() {
        let (mut agg, _) = aggregator(LateDataPolicy::Drop);
        assert!(feed(&mut agg, "the", 1_000).is_empty());
        assert!(feed(&mut agg, "cat", 59_999).is_empty());
        assert_eq!(agg.active_window_count(), 1);

        let closed = feed(&mut agg, "sat", 60_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].window, Window::new(0, 60_000));
        assert_eq!(closed[0].counts.len(), 2);
        assert_eq!(agg.active_window_count(), 1);
    }

    #[test]
    fn test_late_event_is_dropped_under_drop_policy() {
        let (mut agg, metrics) = aggregator(LateDataPolicy::Drop);
        feed(&mut agg, "the", 1_000);
        let closed = feed(&mut agg, "next", 61_000);
        assert_eq!(closed[0].counts.get("the"), Some(&1));

        assert_eq!(agg.add(&WordEvent::new("the", 2_000)), AddOutcome::DroppedLate);
        assert_eq!(metrics.dropped_late_events(), 1);
        assert!(agg.get_content(2_000).is_none());
        assert!(agg.flush_all().iter().all(|s| s.window.start == 60_000));
    }

    #[test]
    fn test_refire_opens_late_pane() {
        let (mut agg, metrics) = aggregator(LateDataPolicy::Refire {
            horizon: Duration::from_secs(120),
        });
        feed(&mut agg, "the", 1_000);
        feed(&mut agg, "next", 61_000);

        assert_eq!(agg.add(&WordEvent::new("the", 2_000)), AddOutcome::Refired);
        assert_eq!(agg.add(&WordEvent::new("the", 3_000)), AddOutcome::Refired);
        // The late pane stays open until the watermark moves again.
        assert!(agg.observe_timestamp(61_000).is_empty());

        let closed = agg.observe_timestamp(62_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].pane, 1);
        assert_eq!(closed[0].counts.get("the"), Some(&2));
        assert_eq!(metrics.snapshot().late_events_refired, 2);

        // Beyond the horizon events are dropped again.
        agg.observe_timestamp(500_000);
        assert_eq!(agg.add(&WordEvent::new("the", 4_000)), AddOutcome::DroppedLate);
    }

    #[test]
    fn test_flush_closes_late_pane_at_end_of_time() {
        let (mut agg, _) = aggregator(LateDataPolicy::Refire {
            horizon: Duration::from_secs(120),
        });
        let closed = feed(&mut agg, "a", i64::MAX);
        assert_eq!(closed.len(), 1);
        assert_eq!(agg.watermark(), i64::MAX);

        assert_eq!(agg.add(&WordEvent::new("b", i64::MAX)), AddOutcome::Refired);
        let flushed = agg.flush_all();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].pane, 1);
        assert_eq!(flushed[0].counts.get("b"), Some(&1));
        assert_eq!(agg.active_window_count(), 0);
    }

    #[test]
    fn test_subscribers_receive_snapshots() {
        let (mut agg, _) = aggregator(LateDataPolicy::Drop);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        agg.subscribe(move |snapshot| {
            seen_clone.lock().unwrap().push(snapshot.window);
        });

        feed(&mut agg, "a", 10);
        feed(&mut agg, "b", 70_000);
        agg.flush_all();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Window::new(0, 60_000), Window::new(60_000, 120_000)]
        );
    }

    #[test]
    fn test_records_sorted_by_word() {
        let snapshot = WindowSnapshot {
            window: Window::new(0, 60_000),
            pane: 0,
            counts: HashMap::from([("the".to_string(), 3), ("end".to_string(), 1)]),
        };
        assert_eq!(
            snapshot.records(),
            vec![OutputRecord::new("end", 1), OutputRecord::new("the", 3)]
        );
        assert_eq!(snapshot.total(), 4);
    }
}
