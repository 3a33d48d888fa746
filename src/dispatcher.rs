use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, warn};
use tokio::select;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::metrics::Batch;
use crate::transport::{DeliveryError, Transport};

/// Consumes batches from the sampler and hands each one to a paced,
/// fire-and-forget delivery task.
pub struct Dispatcher<T> {
    transport: Arc<T>,
    send_interval: Duration,
    in_flight: Arc<Semaphore>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, send_interval: Duration, max_in_flight: usize) -> Self {
        Dispatcher {
            transport: Arc::new(transport),
            send_interval,
            in_flight: Arc::new(Semaphore::new(
                max_in_flight.clamp(1, Semaphore::MAX_PERMITS),
            )),
        }
    }

    pub fn spawn(
        self,
        cancel: CancellationToken,
        batches: mpsc::Receiver<Batch>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel, batches))
    }

    /// Receive loop. Returns when `cancel` fires or the channel closes;
    /// delivery tasks already spawned keep running on their own.
    pub async fn run(self, cancel: CancellationToken, mut batches: mpsc::Receiver<Batch>) {
        let mut pacer = interval_at(Instant::now() + self.send_interval, self.send_interval);
        pacer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let pacer = Arc::new(Mutex::new(pacer));
        let mut spawned = 0u64;

        loop {
            let batch = select! {
                biased;
                _ = cancel.cancelled() => break,
                next = batches.recv() => match next {
                    Some(batch) => batch,
                    None => {
                        debug!("batch channel closed");
                        break;
                    }
                },
            };

            // Waiting here back-pressures the sampler through the single slot.
            let permit = select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("poll {} dropped on shutdown", batch.poll());
                    break;
                }
                permit = Arc::clone(&self.in_flight).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let transport = Arc::clone(&self.transport);
            let pacer = Arc::clone(&pacer);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                deliver_paced(transport.as_ref(), &pacer, &cancel, batch).await;
                drop(permit);
            });
            spawned += 1;
        }

        debug!(
            "dispatcher stopped, {} deliveries spawned over {}",
            spawned,
            self.transport.name()
        );
    }
}

async fn deliver_paced<T: Transport>(
    transport: &T,
    pacer: &Mutex<Interval>,
    cancel: &CancellationToken,
    batch: Batch,
) {
    let paced = select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = async { pacer.lock().await.tick().await } => true,
    };
    if !paced {
        debug!("poll {} dropped before its pacing tick", batch.poll());
        return;
    }

    let age = batch.age_at(Utc::now());
    match transport.deliver(&batch).await {
        Ok(()) => debug!(
            "poll {} delivered over {} ({} records, sampled {}ms earlier)",
            batch.poll(),
            transport.name(),
            batch.len(),
            age.num_milliseconds()
        ),
        Err(err @ DeliveryError::Encode(_)) => {
            error!("poll {} not sent: {}", batch.poll(), err)
        }
        Err(err) => warn!(
            "poll {} lost over {} after {}ms: {}",
            batch.poll(),
            transport.name(),
            age.num_milliseconds(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRecord;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, timeout};

    #[derive(Default)]
    struct Recorder {
        attempts: StdMutex<Vec<(i64, Instant)>>,
        delivered: StdMutex<Vec<i64>>,
    }

    impl Recorder {
        fn attempts(&self) -> Vec<i64> {
            self.attempts.lock().unwrap().iter().map(|(poll, _)| *poll).collect()
        }

        fn delivered(&self) -> Vec<i64> {
            self.delivered.lock().unwrap().clone()
        }
    }

    enum Behaviour {
        Accept,
        Refuse,
        FailEncodeOnFirst,
        Hang,
    }

    struct FakeTransport {
        behaviour: Behaviour,
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
            self.recorder
                .attempts
                .lock()
                .unwrap()
                .push((batch.poll(), Instant::now()));
            let result = match self.behaviour {
                Behaviour::Accept => Ok(()),
                Behaviour::Refuse => Err(DeliveryError::Status(500)),
                Behaviour::FailEncodeOnFirst if batch.poll() == 1 => {
                    Err(DeliveryError::Encode("poisoned".to_string()))
                }
                Behaviour::FailEncodeOnFirst => Ok(()),
                Behaviour::Hang => std::future::pending().await,
            };
            if result.is_ok() {
                self.recorder.delivered.lock().unwrap().push(batch.poll());
            }
            result
        }
    }

    fn batch(poll: i64) -> Batch {
        Batch::new(poll, Utc::now(), vec![MetricRecord::counter("PollCount", poll)])
    }

    fn dispatcher(
        behaviour: Behaviour,
        max_in_flight: usize,
    ) -> (Dispatcher<FakeTransport>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let transport = FakeTransport {
            behaviour,
            recorder: Arc::clone(&recorder),
        };
        (
            Dispatcher::new(transport, Duration::from_millis(100), max_in_flight),
            recorder,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn failing_transport_does_not_stop_the_loop() {
        let (dispatcher, recorder) = dispatcher(Behaviour::Refuse, 8);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        let handle = dispatcher.spawn(cancel.clone(), rx);

        for poll in 1..=3 {
            tx.send(batch(poll)).await.expect("dispatcher receiving");
        }
        sleep(Duration::from_millis(350)).await;

        assert_eq!(recorder.attempts(), vec![1, 2, 3]);
        assert!(recorder.delivered().is_empty());
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.expect("dispatcher task");
    }

    #[tokio::test(start_paused = true)]
    async fn encode_failure_does_not_affect_next_batch() {
        let (dispatcher, recorder) = dispatcher(Behaviour::FailEncodeOnFirst, 8);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        let handle = dispatcher.spawn(cancel.clone(), rx);

        tx.send(batch(1)).await.unwrap();
        tx.send(batch(2)).await.unwrap();
        sleep(Duration::from_millis(250)).await;

        assert_eq!(recorder.attempts(), vec![1, 2]);
        assert_eq!(recorder.delivered(), vec![2]);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deliveries_wait_for_pacing_ticks() {
        let (dispatcher, recorder) = dispatcher(Behaviour::Accept, 8);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        let started = Instant::now();
        let handle = dispatcher.spawn(cancel.clone(), rx);

        tx.send(batch(1)).await.unwrap();
        tx.send(batch(2)).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(recorder.attempts().is_empty(), "sent before the first tick");

        sleep(Duration::from_millis(200)).await;
        let offsets: Vec<Duration> = recorder
            .attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| at.duration_since(started))
            .collect();
        assert_eq!(offsets, vec![Duration::from_millis(100), Duration::from_millis(200)]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ends_when_channel_closes() {
        let (dispatcher, _recorder) = dispatcher(Behaviour::Accept, 8);
        let (tx, rx) = mpsc::channel(1);
        let handle = dispatcher.spawn(CancellationToken::new(), rx);
        drop(tx);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher exits on closed channel")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pending_deliveries_drop_on_cancel() {
        let (dispatcher, recorder) = dispatcher(Behaviour::Accept, 8);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        let handle = dispatcher.spawn(cancel.clone(), rx);

        tx.send(batch(1)).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        handle.await.unwrap();
        sleep(Duration::from_millis(500)).await;

        assert!(recorder.attempts().is_empty());
    }

    #[test]
    fn in_flight_cap_is_clamped_to_semaphore_range() {
        let (oversized, _) = dispatcher(Behaviour::Accept, usize::MAX);
        assert_eq!(oversized.in_flight.available_permits(), Semaphore::MAX_PERMITS);
        let (zero, _) = dispatcher(Behaviour::Accept, 0);
        assert_eq!(zero.in_flight.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_cap_holds_back_batches() {
        let (dispatcher, recorder) = dispatcher(Behaviour::Hang, 1);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        let handle = dispatcher.spawn(cancel.clone(), rx);

        tx.send(batch(1)).await.unwrap();
        tx.send(batch(2)).await.unwrap();
        sleep(Duration::from_millis(500)).await;

        // poll 2 waits for a permit inside the loop, poll 3 takes the slot
        assert!(tx.try_send(batch(3)).is_ok());
        assert!(tx.try_send(batch(4)).is_err());
        assert_eq!(recorder.attempts(), vec![1]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
