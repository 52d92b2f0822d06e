//! Asynchronous prediction on a dedicated worker thread.
//!
//! An [`AsyncPredictor`] owns a synchronous [`Predictor`] and serves requests
//! from a FIFO queue, one at a time. Each request resolves through a
//! [`Prediction`], which can be awaited or waited on from blocking code.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

use crate::config::{self, PredictorConfig};
use crate::error::{EdgeError, EdgeResult};
use crate::feature::Feature;
use crate::model::Predictor;

struct PredictionRequest<O> {
    inputs: Vec<Feature<'static>>,
    result: oneshot::Sender<EdgeResult<O>>,
}

struct WorkerShared<O> {
    queue: Mutex<VecDeque<PredictionRequest<O>>>,
    work_ready: Condvar,
    accepting: AtomicBool,
    ready: AtomicBool,
}

/// Serializes predictions for a predictor on its own thread
pub struct AsyncPredictor<P: Predictor> {
    shared: Arc<WorkerShared<P::Output>>,
    worker: Option<JoinHandle<()>>,
}

impl<P> AsyncPredictor<P>
where
    P: Predictor + Send + 'static,
    P::Output: Send + 'static,
{
    /// Start a worker using the global predictor configuration
    pub fn new(predictor: P) -> EdgeResult<Self> {
        Self::with_config(predictor, &config::get_config().predictor)
    }

    pub fn with_config(predictor: P, config: &PredictorConfig) -> EdgeResult<Self> {
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            accepting: AtomicBool::new(true),
            ready: AtomicBool::new(true),
        });

        let mut builder = std::thread::Builder::new().name(config.thread_name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let worker_shared = Arc::clone(&shared);
        let worker = builder.spawn(move || worker_loop(predictor, &worker_shared))?;
        tracing::debug!(thread = %config.thread_name, "started predictor worker");

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Queue a prediction.
    ///
    /// Requests run in submission order. After [`close`](Self::close) or
    /// shutdown the returned prediction resolves to
    /// [`EdgeError::PredictionCancelled`] without running.
    pub fn predict(&self, inputs: Vec<Feature<'static>>) -> Prediction<P::Output> {
        let (tx, rx) = oneshot::channel();
        let request = PredictionRequest { inputs, result: tx };
        {
            let mut queue = self.shared.queue.lock();
            if !self.shared.accepting.load(Ordering::Acquire) {
                drop(queue);
                tracing::warn!("prediction submitted after predictor shutdown");
                let _ = request.result.send(Err(EdgeError::PredictionCancelled));
                return Prediction { receiver: rx };
            }
            queue.push_back(request);
        }
        self.shared.work_ready.notify_one();
        Prediction { receiver: rx }
    }
}

impl<P: Predictor> AsyncPredictor<P> {
    /// Whether no prediction is in flight
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Number of queued requests not yet started
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Stop accepting requests.
    ///
    /// The in-flight prediction completes; queued ones are cancelled. The
    /// worker thread exits but is only joined on shutdown or drop.
    pub fn close(&self) {
        // Hold the queue lock so a worker between its check and wait sees the flag
        let _queue = self.shared.queue.lock();
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.work_ready.notify_all();
    }

    /// Close, wait for the in-flight prediction and release the predictor
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.close();
        if worker.join().is_err() {
            tracing::error!("predictor worker panicked during shutdown");
        } else {
            tracing::debug!("predictor worker stopped");
        }
    }
}

impl<P: Predictor> Drop for AsyncPredictor<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<P: Predictor>(mut predictor: P, shared: &WorkerShared<P::Output>) {
    loop {
        let request = {
            let mut queue = shared.queue.lock();
            loop {
                if !shared.accepting.load(Ordering::Acquire) {
                    break None;
                }
                if let Some(request) = queue.pop_front() {
                    shared.ready.store(false, Ordering::Release);
                    break Some(request);
                }
                shared.work_ready.wait(&mut queue);
            }
        };
        let Some(request) = request else {
            break;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| predictor.predict(&request.inputs)));
        let result = match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "prediction failed");
                Err(EdgeError::prediction_failed(err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("predictor panicked: {}", message);
                Err(EdgeError::prediction_failed(EdgeError::InvalidOperation(format!(
                    "predictor panicked: {}",
                    message
                ))))
            }
        };
        drop(request.inputs);

        shared.ready.store(true, Ordering::Release);
        // The caller may have dropped its prediction
        let _ = request.result.send(result);
    }

    let cancelled: Vec<_> = shared.queue.lock().drain(..).collect();
    if !cancelled.is_empty() {
        tracing::debug!(count = cancelled.len(), "cancelling queued predictions");
    }
    for request in cancelled {
        let _ = request.result.send(Err(EdgeError::PredictionCancelled));
    }
    drop(predictor);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "(non-string panic)".to_string())
}

/// Pending result of an [`AsyncPredictor::predict`] call
#[must_use = "a prediction does nothing unless awaited or waited on"]
pub struct Prediction<O> {
    receiver: oneshot::Receiver<EdgeResult<O>>,
}

impl<O> Prediction<O> {
    /// Block the current thread until the prediction resolves.
    ///
    /// Panics if called from within an async runtime; await the prediction there.
    pub fn wait(self) -> EdgeResult<O> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(EdgeError::PredictionCancelled))
    }
}

impl<O> Future for Prediction<O> {
    type Output = EdgeResult<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(EdgeError::PredictionCancelled)))
    }
}

/// Move a predictor onto its own worker
pub trait PredictorExt: Predictor + Sized {
    fn into_async(self) -> EdgeResult<AsyncPredictor<Self>>;
}

impl<P> PredictorExt for P
where
    P: Predictor + Send + 'static,
    P::Output: Send + 'static,
{
    fn into_async(self) -> EdgeResult<AsyncPredictor<Self>> {
        AsyncPredictor::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Counter {
        calls: u64,
    }

    impl Predictor for Counter {
        type Output = u64;

        fn predict(&mut self, inputs: &[Feature<'_>]) -> EdgeResult<u64> {
            match inputs.first() {
                Some(Feature::Int(0)) => Err(EdgeError::InvalidOperation("zero input".to_string())),
                Some(Feature::Int(-1)) => panic!("negative input"),
                _ => {
                    self.calls += 1;
                    Ok(self.calls)
                }
            }
        }
    }

    /// Blocks every prediction until the test passes the barrier
    struct Gate {
        barrier: Arc<Barrier>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Predictor for Gate {
        type Output = ();

        fn predict(&mut self, _inputs: &[Feature<'_>]) -> EdgeResult<()> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            self.barrier.wait();
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn gate() -> (Gate, Arc<Barrier>, Arc<AtomicUsize>) {
        let barrier = Arc::new(Barrier::new(2));
        let peak = Arc::new(AtomicUsize::new(0));
        let gate = Gate {
            barrier: Arc::clone(&barrier),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        };
        (gate, barrier, peak)
    }

    /// Sets its flag when the wrapped predictor is dropped
    struct Tracked<P> {
        inner: P,
        dropped: Arc<AtomicBool>,
    }

    impl<P: Predictor> Predictor for Tracked<P> {
        type Output = P::Output;

        fn predict(&mut self, inputs: &[Feature<'_>]) -> EdgeResult<P::Output> {
            self.inner.predict(inputs)
        }
    }

    impl<P> Drop for Tracked<P> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn wait_until_busy<P: Predictor>(predictor: &AsyncPredictor<P>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while predictor.is_ready() {
            assert!(Instant::now() < deadline, "worker never started the prediction");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_requests_run_in_order() {
        let predictor = AsyncPredictor::new(Counter { calls: 0 }).unwrap();
        let predictions: Vec<_> = (0..5).map(|_| predictor.predict(vec![Feature::int(1)])).collect();
        let results: Vec<u64> = predictions.into_iter().map(|p| p.wait().unwrap()).collect();
        assert_eq!(results, vec![1, 2, 3, 4, 5]);
        assert!(predictor.is_ready());
        predictor.shutdown();
    }

    #[test]
    fn test_single_prediction_in_flight() {
        let (gate, barrier, peak) = gate();
        let predictor = AsyncPredictor::new(gate).unwrap();

        let first = predictor.predict(Vec::new());
        wait_until_busy(&predictor);
        let second = predictor.predict(Vec::new());
        assert_eq!(predictor.pending(), 1);
        assert!(!predictor.is_ready());

        barrier.wait();
        first.wait().unwrap();
        barrier.wait();
        second.wait().unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(predictor.pending(), 0);
        assert!(predictor.is_ready());
    }

    #[test]
    fn test_close_cancels_queued_requests() {
        let (gate, barrier, _) = gate();
        let predictor = AsyncPredictor::new(gate).unwrap();

        let in_flight = predictor.predict(Vec::new());
        wait_until_busy(&predictor);
        let queued: Vec<_> = (0..2).map(|_| predictor.predict(Vec::new())).collect();

        predictor.close();
        let late = predictor.predict(Vec::new());
        assert!(matches!(late.wait(), Err(EdgeError::PredictionCancelled)));

        barrier.wait();
        assert!(in_flight.wait().is_ok());
        for prediction in queued {
            assert!(matches!(prediction.wait(), Err(EdgeError::PredictionCancelled)));
        }
        predictor.shutdown();
    }

    #[test]
    fn test_shutdown_releases_predictor() {
        let (gate, barrier, _) = gate();
        let dropped = Arc::new(AtomicBool::new(false));
        let predictor = AsyncPredictor::new(Tracked {
            inner: gate,
            dropped: Arc::clone(&dropped),
        })
        .unwrap();

        let in_flight = predictor.predict(Vec::new());
        wait_until_busy(&predictor);
        let queued: Vec<_> = (0..3).map(|_| predictor.predict(Vec::new())).collect();
        assert_eq!(predictor.pending(), 3);

        predictor.close();
        let releaser = thread::spawn(move || barrier.wait());
        predictor.shutdown();
        assert!(dropped.load(Ordering::SeqCst));
        releaser.join().unwrap();

        assert!(in_flight.wait().is_ok());
        for prediction in queued {
            assert!(matches!(prediction.wait(), Err(EdgeError::PredictionCancelled)));
        }
    }

    #[test]
    fn test_concurrent_submitters_keep_fifo_order() {
        struct Sequence {
            calls: usize,
        }

        impl Predictor for Sequence {
            type Output = (usize, i32);

            fn predict(&mut self, inputs: &[Feature<'_>]) -> EdgeResult<(usize, i32)> {
                self.calls += 1;
                match inputs.first() {
                    Some(Feature::Int(value)) => Ok((self.calls, *value)),
                    _ => Err(EdgeError::InvalidOperation("expected an int".to_string())),
                }
            }
        }

        let predictor = AsyncPredictor::new(Sequence { calls: 0 }).unwrap();
        let order = std::sync::Mutex::new(0usize);

        thread::scope(|scope| {
            for submitter in 0..5 {
                let predictor = &predictor;
                let order = &order;
                scope.spawn(move || {
                    for round in 0..10 {
                        let tag = (submitter * 100 + round) as i32;
                        let (position, prediction) = {
                            let mut next = order.lock().unwrap();
                            let position = *next;
                            *next += 1;
                            (position, predictor.predict(vec![Feature::int(tag)]))
                        };
                        let (call, echoed) = prediction.wait().unwrap();
                        assert_eq!(call, position + 1);
                        assert_eq!(echoed, tag);
                    }
                });
            }
        });

        assert_eq!(*order.lock().unwrap(), 50);
        predictor.shutdown();
    }

    #[test]
    fn test_failures_do_not_stop_worker() {
        let predictor = Counter { calls: 0 }.into_async().unwrap();

        let failed = predictor.predict(vec![Feature::int(0)]).wait().unwrap_err();
        match failed {
            EdgeError::PredictionFailed(source) => assert!(source.to_string().contains("zero input")),
            other => panic!("unexpected error: {other:?}"),
        }

        let panicked = predictor.predict(vec![Feature::int(-1)]).wait().unwrap_err();
        assert!(panicked.to_string().contains("negative input"));

        assert_eq!(predictor.predict(vec![Feature::int(1)]).wait().unwrap(), 1);
    }

    #[test]
    fn test_worker_uses_configured_thread() {
        struct ThreadName;

        impl Predictor for ThreadName {
            type Output = Option<String>;

            fn predict(&mut self, _inputs: &[Feature<'_>]) -> EdgeResult<Option<String>> {
                Ok(std::thread::current().name().map(str::to_string))
            }
        }

        let config = PredictorConfig {
            thread_name: "vision-worker".to_string(),
            stack_size: Some(1024 * 1024),
        };
        let predictor = AsyncPredictor::with_config(ThreadName, &config).unwrap();
        let name = predictor.predict(Vec::new()).wait().unwrap();
        assert_eq!(name.as_deref(), Some("vision-worker"));
    }

    #[tokio::test]
    async fn test_prediction_can_be_awaited() {
        let predictor = AsyncPredictor::new(Counter { calls: 0 }).unwrap();
        let first = predictor.predict(vec![Feature::text("a")]);
        let second = predictor.predict(vec![Feature::text("b")]);
        assert_eq!(second.await.unwrap(), 2);
        assert_eq!(first.await.unwrap(), 1);
    }
}
