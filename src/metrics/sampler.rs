use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use log::{debug, trace};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::stats::{ProcessStats, RuntimeStats, StatsSource, GAUGES};
use super::types::{Batch, MetricRecord};

pub const RANDOM_VALUE: &str = "RandomValue";
pub const POLL_COUNT: &str = "PollCount";

/// Builds the records of one tick from a stats snapshot.
pub fn build_batch(stats: &RuntimeStats, random: f64, poll: i64) -> Batch {
    let mut records = Vec::with_capacity(GAUGES.len() + 2);
    records.extend(
        GAUGES
            .iter()
            .map(|(name, extract)| MetricRecord::gauge(*name, extract(stats))),
    );
    records.push(MetricRecord::gauge(RANDOM_VALUE, random));
    records.push(MetricRecord::counter(POLL_COUNT, poll));
    Batch::new(poll, Utc::now(), records)
}

/// Periodic producer of [`Batch`]es.
///
/// Consumed by [`Sampler::start`]; a stopped sampler cannot be restarted.
pub struct Sampler<S = ProcessStats> {
    poll_interval: Duration,
    source: S,
    poll_count: AtomicI64,
}

impl Sampler<ProcessStats> {
    pub fn for_current_process(poll_interval: Duration) -> Self {
        Sampler::new(poll_interval, ProcessStats::new())
    }
}

impl<S: StatsSource> Sampler<S> {
    pub fn new(poll_interval: Duration, source: S) -> Self {
        Sampler {
            poll_interval,
            source,
            poll_count: AtomicI64::new(0),
        }
    }

    pub fn polls(&self) -> i64 {
        self.poll_count.load(Ordering::SeqCst)
    }

    /// Takes one snapshot and bumps the poll counter.
    pub fn sample(&mut self) -> Batch {
        let stats = self.source.snapshot();
        let random = rand::random::<f64>();
        let poll = self.poll_count.fetch_add(1, Ordering::SeqCst) + 1;
        build_batch(&stats, random, poll)
    }

    /// Spawns the sampling loop and returns the receiving end of the
    /// single-slot handoff channel. The channel closes when `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> mpsc::Receiver<Batch> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(self.run(cancel, tx));
        rx
    }

    pub async fn run(mut self, cancel: CancellationToken, tx: mpsc::Sender<Batch>) {
        // first tick one full period after start
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                biased;
                _ = cancel.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {}
            }

            let batch = self.sample();
            let poll = batch.poll();
            trace!("poll {}: {} records", poll, batch.len());

            select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("poll {} discarded on shutdown", poll);
                    break;
                }
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        debug!("batch receiver dropped, stopping sampler");
                        break;
                    }
                }
            }
        }

        debug!("sampler stopped after {} polls", self.polls());
    }
}
