use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::{PipelineError, SinkError, SourceError};
use crate::message::Message;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::sink::{FileSink, PendingWindow};
use crate::source::{IngestionSource, subscribe_with_retry};
use crate::tokenizer::Tokenizer;
use crate::window_instance::WindowAssigner;
use crate::windowing::{WindowCallback, WindowSnapshot, WindowedAggregator};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Cooperative shutdown signal shared between the pipeline and its caller.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the pipeline to stop ingesting, flush every open window and return.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of a finished pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub metrics: MetricsSnapshot,
    /// Every output file written, in write order.
    pub files: Vec<PathBuf>,
}

enum Ingest {
    Message(Message),
    Failed(SourceError),
}

/// Streaming word count: tokenize, count per fixed window, write one file set per window.
pub struct WordCountPipeline {
    config: PipelineConfig,
    tokenizer: Tokenizer,
    aggregator: Arc<Mutex<WindowedAggregator>>,
    sink: FileSink,
    metrics: Arc<PipelineMetrics>,
    shutdown: ShutdownHandle,
    pending: VecDeque<PendingWindow>,
    files: Vec<PathBuf>,
    subscribers: Vec<WindowCallback>,
}

impl WordCountPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let metrics = Arc::new(PipelineMetrics::new());
        let assigner = WindowAssigner::new(config.window_length)?;
        let aggregator = WindowedAggregator::new(
            assigner,
            config.allowed_lateness,
            config.late_data,
            metrics.clone(),
        );
        let sink = FileSink::new(
            config.output_prefix.clone(),
            config.num_shards,
            config.sink_retry,
            metrics.clone(),
        );

        Ok(Self {
            tokenizer: Tokenizer::new(metrics.clone()),
            aggregator: Arc::new(Mutex::new(aggregator)),
            sink,
            metrics,
            shutdown: ShutdownHandle::new(),
            pending: VecDeque::new(),
            files: Vec::new(),
            subscribers: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Shared handle to the window state, for inspection.
    pub fn aggregator(&self) -> Arc<Mutex<WindowedAggregator>> {
        self.aggregator.clone()
    }

    /// Subscribe a callback to closed window snapshots.
    ///
    /// Callbacks run after the window state lock is released, before the snapshot is written.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(&WindowSnapshot) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(callback));
    }

    /// Runs until the source ends, shutdown is requested, or a fatal error occurs.
    ///
    /// Open windows are flushed on every exit path except a fatal sink error.
    pub fn run<S>(mut self, source: S) -> Result<PipelineSummary, PipelineError>
    where
        S: IngestionSource + 'static,
    {
        info!(
            topic = %self.config.input_topic,
            output_prefix = %self.config.output_prefix,
            window_length_ms = self.config.window_length.as_millis() as u64,
            num_shards = self.config.num_shards,
            "starting word count pipeline"
        );

        let (tx, rx) = mpsc::sync_channel(self.config.channel_capacity);
        let worker = spawn_ingestion(
            source,
            self.config.input_topic.clone(),
            self.config.source_retry,
            self.metrics.clone(),
            self.shutdown.clone(),
            tx,
        );

        let mut last_input = Instant::now();
        let mut last_export = Instant::now();
        let outcome = loop {
            if self.shutdown.is_shutdown() {
                info!("shutdown requested");
                break Ok(());
            }

            let step = match rx.recv_timeout(self.config.idle_timeout) {
                Ok(Ingest::Message(message)) => {
                    last_input = Instant::now();
                    self.process_message(&message)
                }
                Ok(Ingest::Failed(e)) => break Err(PipelineError::Source(e)),
                Err(RecvTimeoutError::Timeout) => self.on_idle(last_input.elapsed()),
                Err(RecvTimeoutError::Disconnected) => {
                    info!("input stream ended");
                    break Ok(());
                }
            };
            if let Err(e) = step {
                break Err(e);
            }

            if last_export.elapsed() >= self.config.metrics_interval {
                self.metrics.export();
                last_export = Instant::now();
            }
        };

        self.shutdown.shutdown();
        let outcome = match outcome {
            Ok(()) => self.drain(&rx),
            Err(e) => Err(e),
        };
        drop(rx);
        let worker_result = join_if_finished(worker);

        match outcome {
            Ok(()) => {
                worker_result?;
                self.finish()
            }
            Err(PipelineError::Source(e)) => {
                error!(error = %e, "ingestion failed, flushing open windows before exit");
                if let Err(flush_err) = self.finish() {
                    error!(error = %flush_err, "flush after ingestion failure failed");
                }
                Err(PipelineError::Source(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Processes messages the ingestion worker handed over before it saw the shutdown flag.
    ///
    /// Stops once the worker disconnects, or after `idle_timeout` without anything queued.
    fn drain(&mut self, rx: &Receiver<Ingest>) -> Result<(), PipelineError> {
        let mut drained = 0u64;
        loop {
            match rx.recv_timeout(self.config.idle_timeout) {
                Ok(Ingest::Message(message)) => {
                    drained += 1;
                    self.process_message(&message)?;
                }
                Ok(Ingest::Failed(e)) => {
                    warn!(error = %e, "ingestion failed while shutting down");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("ingestion worker still blocked, leaving it behind");
                    break;
                }
            }
        }
        if drained > 0 {
            info!(drained, "processed queued messages before shutdown");
        }
        Ok(())
    }

    /// Tokenizes and counts one message, then advances the watermark to its timestamp.
    pub fn process_message(&mut self, message: &Message) -> Result<(), PipelineError> {
        self.metrics.record_message();
        debug!(
            element = %message.text,
            timestamp = message.event_timestamp,
            "message received"
        );

        let events = self.tokenizer.word_events(message);
        let closed = {
            let mut aggregator = self.aggregator.lock().unwrap_or_else(PoisonError::into_inner);
            for event in &events {
                aggregator.add(event);
            }
            aggregator.observe_timestamp(message.event_timestamp)
        };

        self.enqueue(closed);
        self.flush_pending()
    }

    /// Idle tick: advances the watermark by the time spent without input and retries
    /// pending writes.
    pub fn on_idle(&mut self, idle_for: Duration) -> Result<(), PipelineError> {
        let closed = self
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_idle(idle_for);
        if !closed.is_empty() {
            debug!(
                idle_ms = idle_for.as_millis() as u64,
                windows = closed.len(),
                "idle timeout closed windows"
            );
        }
        self.enqueue(closed);
        self.flush_pending()
    }

    /// Closes every open window and writes everything still pending.
    pub fn finish(&mut self) -> Result<PipelineSummary, PipelineError> {
        let closed = self
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush_all();
        info!(windows = closed.len(), "flushing open windows");
        self.enqueue(closed);

        while !self.pending.is_empty() {
            self.flush_pending()?;
            if !self.pending.is_empty() {
                thread::sleep(self.config.sink_retry.max_backoff);
            }
        }

        self.metrics.export();
        Ok(PipelineSummary {
            metrics: self.metrics.snapshot(),
            files: self.files.clone(),
        })
    }

    fn enqueue(&mut self, snapshots: Vec<WindowSnapshot>) {
        for snapshot in &snapshots {
            for callback in &self.subscribers {
                callback(snapshot);
            }
        }
        let num_shards = self.sink.num_shards();
        self.pending.extend(
            snapshots
                .into_iter()
                .map(|snapshot| PendingWindow::new(snapshot, num_shards)),
        );
    }

    /// One flush cycle over every pending window.
    fn flush_pending(&mut self) -> Result<(), PipelineError> {
        let mut retained = VecDeque::new();
        while let Some(mut pending) = self.pending.pop_front() {
            match self.sink.write_window(&mut pending) {
                Ok(()) => {
                    info!(
                        window = %pending.snapshot.window,
                        pane = pending.snapshot.pane,
                        words = pending.snapshot.counts.len(),
                        "window written"
                    );
                    self.files.extend(pending.written_paths().cloned());
                }
                Err(e) if e.is_retryable() => {
                    pending.failed_cycles += 1;
                    if pending.failed_cycles >= self.config.max_flush_cycles {
                        let window = pending.snapshot.window;
                        let cycles = pending.failed_cycles;
                        self.restore_pending(retained, pending);
                        error!(%window, cycles, error = %e, "giving up on window output");
                        return Err(SinkError::Exhausted {
                            start: window.start,
                            end: window.end,
                            cycles,
                            last: e.to_string(),
                        }
                        .into());
                    }
                    warn!(
                        window = %pending.snapshot.window,
                        failed_cycles = pending.failed_cycles,
                        error = %e,
                        "window write failed, holding snapshot for the next flush"
                    );
                    retained.push_back(pending);
                }
                Err(e) => {
                    self.restore_pending(retained, pending);
                    return Err(e.into());
                }
            }
        }
        self.pending = retained;
        Ok(())
    }

    fn restore_pending(&mut self, mut retained: VecDeque<PendingWindow>, current: PendingWindow) {
        retained.push_back(current);
        retained.extend(self.pending.drain(..));
        self.pending = retained;
    }

    /// Windows closed but not yet fully written.
    pub fn pending_windows(&self) -> usize {
        self.pending.len()
    }
}

fn spawn_ingestion<S>(
    mut source: S,
    topic: String,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
    shutdown: ShutdownHandle,
    tx: SyncSender<Ingest>,
) -> JoinHandle<()>
where
    S: IngestionSource + 'static,
{
    thread::spawn(move || {
        let mut consecutive_failures = 0u32;
        loop {
            let stream = match subscribe_with_retry(&mut source, &topic, &retry, &metrics) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Ingest::Failed(e));
                    return;
                }
            };

            let mut broken = None;
            for item in stream {
                if shutdown.is_shutdown() {
                    return;
                }
                match item {
                    Ok(message) => {
                        consecutive_failures = 0;
                        if tx.send(Ingest::Message(message)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        broken = Some(e);
                        break;
                    }
                }
            }

            let Some(e) = broken else {
                debug!(topic = %topic, "source stream ended");
                return;
            };

            consecutive_failures += 1;
            if consecutive_failures >= retry.max_attempts {
                let _ = tx.send(Ingest::Failed(SourceError::Exhausted {
                    topic: topic.clone(),
                    attempts: consecutive_failures,
                    last: e.to_string(),
                }));
                return;
            }
            let delay = retry.backoff(consecutive_failures);
            warn!(topic = %topic, error = %e, delay_ms = delay.as_millis() as u64, "source stream broke, resubscribing");
            metrics.record_source_reconnect();
            thread::sleep(delay);
        }
    })
}

/// Joins the ingestion worker if it already exited; a worker blocked on input is left behind.
fn join_if_finished(worker: JoinHandle<()>) -> Result<(), PipelineError> {
    if worker.is_finished() {
        worker.join().map_err(|_| PipelineError::WorkerPanicked)
    } else {
        Ok(())
    }
}
