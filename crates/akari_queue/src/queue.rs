use std::{
    any::Any,
    collections::{BinaryHeap, HashMap},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, RwLock};
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::{
    request::Queued, ChannelId, Outcome, QueueError, Request, RequestHandler, RequestId, Response,
    ResponseHandler,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of background workers, 0 runs every request on the submitting thread
    pub workers: usize,
    pub thread_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1),
            thread_name: "akari-worker".to_string(),
        }
    }
}

type Handlers<Req, Res> = Vec<Arc<dyn RequestHandler<Req, Res>>>;

struct Shared<Req, Res> {
    pending: Mutex<BinaryHeap<Queued<Req>>>,
    handlers: RwLock<HashMap<ChannelId, Handlers<Req, Res>, fxhash::FxBuildHasher>>,
    senders: RwLock<HashMap<ChannelId, flume::Sender<Response<Req, Res>>, fxhash::FxBuildHasher>>,
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl<Req, Res> Shared<Req, Res> {
    fn finish(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }
    fn wait_idle(&self) {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            self.idle.wait(&mut outstanding);
        }
    }
}

impl<Req: Send + 'static, Res: Send + 'static> Shared<Req, Res> {
    /// Pops the most urgent pending request and answers it.
    /// Exactly one call happens per queued submission.
    fn run_next(&self) {
        let Some(Queued(request)) = self.pending.lock().pop() else {
            return;
        };

        let outcome = if request.is_aborted() {
            log::debug!("Skipping aborted request {}", request.id());
            Outcome::Aborted
        } else {
            self.execute(&request)
        };

        self.deliver(Response::new(request, outcome));
    }
    fn execute(&self, request: &Request<Req>) -> Outcome<Res> {
        let handler = self
            .handlers
            .read()
            .get(&request.channel())
            .and_then(|handlers| handlers.iter().find(|h| h.can_handle(request)).cloned());

        let Some(handler) = handler else {
            return Outcome::Failed(anyhow::anyhow!(
                "No request handler accepted request {} on channel {:?}",
                request.id(),
                request.channel()
            ));
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle_request(request))) {
            Ok(Ok(response)) => Outcome::Completed(response),
            Ok(Err(err)) => Outcome::Failed(err),
            Err(payload) => Outcome::Failed(anyhow::anyhow!(
                "Request handler panicked: {}",
                panic_message(&*payload)
            )),
        }
    }
    fn deliver(&self, response: Response<Req, Res>) {
        let channel = response.channel();
        let sender = self.senders.read().get(&channel).cloned();

        match sender {
            Some(sender) => {
                if sender.send(response).is_err() {
                    log::error!("Response receiver of channel {:?} is gone", channel);
                }
            }
            None => log::error!("No response channel for {:?}", channel),
        }

        self.finish();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Multi-worker request/response queue.
///
/// Requests are executed by the request handlers registered on their channel, either on the
/// worker pool or inline for blocking submissions. Responses of queued submissions pile up per
/// channel until the owner drains them with [`WorkQueue::process_responses`], so response side
/// effects always happen on the draining thread.
pub struct WorkQueue<Req, Res> {
    shared: Arc<Shared<Req, Res>>,
    pool: Option<ThreadPool>,
    channels: HashMap<String, ChannelId, fxhash::FxBuildHasher>,
    receivers: HashMap<ChannelId, flume::Receiver<Response<Req, Res>>, fxhash::FxBuildHasher>,
    next_id: AtomicU64,
    accepting: AtomicBool,
}

impl<Req: Send + 'static, Res: Send + 'static> WorkQueue<Req, Res> {
    pub fn new(config: &QueueConfig) -> Result<Self, QueueError> {
        let pool = if config.workers == 0 {
            None
        } else {
            let thread_name = config.thread_name.clone();
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(move |ix| format!("{}-{}", thread_name, ix))
                .build()?;
            Some(pool)
        };

        log::info!("Started work queue with {} worker(s)", config.workers);

        Ok(Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(BinaryHeap::new()),
                handlers: RwLock::new(HashMap::default()),
                senders: RwLock::new(HashMap::default()),
                outstanding: Mutex::new(0),
                idle: Condvar::new(),
            }),
            pool,
            channels: HashMap::default(),
            receivers: HashMap::default(),
            next_id: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
        })
    }
    pub fn worker_count(&self) -> usize {
        self.pool
            .as_ref()
            .map(|pool| pool.current_num_threads())
            .unwrap_or(0)
    }
    /// Returns the channel registered under `name`, creating it on first use
    pub fn channel(&mut self, name: &str) -> Result<ChannelId, QueueError> {
        if let Some(&channel) = self.channels.get(name) {
            return Ok(channel);
        }

        let index =
            u16::try_from(self.channels.len()).map_err(|_| QueueError::TooManyChannels)?;
        let channel = ChannelId(index);
        let (sender, receiver) = flume::unbounded();

        self.shared.senders.write().insert(channel, sender);
        self.receivers.insert(channel, receiver);
        self.channels.insert(name.to_owned(), channel);

        log::debug!("Created work queue channel {:?} as {:?}", name, channel);
        Ok(channel)
    }
    pub fn add_request_handler(
        &self,
        channel: ChannelId,
        handler: Arc<dyn RequestHandler<Req, Res>>,
    ) -> Result<(), QueueError> {
        self.check_channel(channel)?;
        self.shared
            .handlers
            .write()
            .entry(channel)
            .or_default()
            .push(handler);

        Ok(())
    }
    pub fn remove_request_handlers(&self, channel: ChannelId) {
        self.shared.handlers.write().remove(&channel);
    }
    /// Id the next submission will get. Lets callers record bookkeeping for a request before it
    /// exists, so a response can never arrive ahead of it.
    pub fn peek_next_request_id(&self) -> RequestId {
        self.next_id.load(Ordering::Acquire)
    }
    fn check_channel(&self, channel: ChannelId) -> Result<(), QueueError> {
        if self.receivers.contains_key(&channel) {
            Ok(())
        } else {
            Err(QueueError::UnknownChannel(channel))
        }
    }
    fn allocate(
        &self,
        channel: ChannelId,
        payload: Req,
        priority: u8,
    ) -> Result<Request<Req>, QueueError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(QueueError::ShutDown);
        }
        self.check_channel(channel)?;

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        Ok(Request::new(id, channel, priority, payload))
    }
    /// Queues a request for the worker pool.
    ///
    /// Without workers the request is executed right away, its response still waits for the next
    /// [`WorkQueue::process_responses`].
    pub fn submit(
        &self,
        channel: ChannelId,
        payload: Req,
        priority: u8,
    ) -> Result<RequestId, QueueError> {
        let request = self.allocate(channel, payload, priority)?;
        let id = request.id();

        *self.shared.outstanding.lock() += 1;
        self.shared.pending.lock().push(Queued(request));

        match &self.pool {
            Some(pool) => {
                let shared = self.shared.clone();
                pool.spawn(move || shared.run_next());
            }
            None => self.shared.run_next(),
        }

        Ok(id)
    }
    /// Executes a request on the calling thread and hands its response to `handler` before
    /// returning
    pub fn submit_blocking<H>(
        &self,
        channel: ChannelId,
        payload: Req,
        priority: u8,
        handler: &mut H,
    ) -> Result<RequestId, QueueError>
    where
        H: ResponseHandler<Req, Res> + ?Sized,
    {
        let request = self.allocate(channel, payload, priority)?;
        let id = request.id();

        let outcome = self.shared.execute(&request);
        let response = Response::new(request, outcome);

        if handler.can_handle(&response) {
            handler.handle_response(response);
        } else {
            log::warn!("Blocking request {} was not handled", id);
        }

        Ok(id)
    }
    /// Best effort cancellation, only requests no worker has picked up yet can be aborted.
    /// Their response still arrives, flagged as aborted.
    pub fn abort(&self, id: RequestId) -> bool {
        let pending = self.shared.pending.lock();
        match pending.iter().find(|queued| queued.0.id() == id) {
            Some(queued) => {
                queued.0.abort();
                log::debug!("Aborted request {}", id);
                true
            }
            None => false,
        }
    }
    pub fn process_responses<H>(
        &self,
        channel: ChannelId,
        handler: &mut H,
    ) -> Result<usize, QueueError>
    where
        H: ResponseHandler<Req, Res> + ?Sized,
    {
        self.drain(channel, handler, None)
    }
    /// Like [`WorkQueue::process_responses`] but stops once `budget` is used up, leftovers are
    /// kept for the next call
    pub fn process_responses_with_budget<H>(
        &self,
        channel: ChannelId,
        handler: &mut H,
        budget: Duration,
    ) -> Result<usize, QueueError>
    where
        H: ResponseHandler<Req, Res> + ?Sized,
    {
        self.drain(channel, handler, Some(budget))
    }
    fn drain<H>(
        &self,
        channel: ChannelId,
        handler: &mut H,
        budget: Option<Duration>,
    ) -> Result<usize, QueueError>
    where
        H: ResponseHandler<Req, Res> + ?Sized,
    {
        let receiver = self
            .receivers
            .get(&channel)
            .ok_or(QueueError::UnknownChannel(channel))?;

        let start = Instant::now();
        let mut processed = 0;

        for response in receiver.try_iter() {
            if handler.can_handle(&response) {
                handler.handle_response(response);
            } else {
                log::warn!("Response {} was not handled", response.id());
            }
            processed += 1;

            if let Some(budget) = budget {
                if start.elapsed() >= budget {
                    break;
                }
            }
        }

        Ok(processed)
    }
}

impl<Req, Res> WorkQueue<Req, Res> {
    /// Submitted requests which haven't produced a response yet
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.lock()
    }
    /// Blocks until every queued submission has produced its response
    pub fn wait_idle(&self) {
        self.shared.wait_idle();
    }
    pub fn is_shut_down(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }
    /// Stops accepting requests and waits for the in flight ones.
    /// Their responses stay available to [`WorkQueue::process_responses`].
    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            log::debug!("Shutting down work queue");
        }
        self.shared.wait_idle();
    }
}

impl<Req, Res> Drop for WorkQueue<Req, Res> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double;

    impl RequestHandler<u32, u32> for Double {
        fn handle_request(&self, request: &Request<u32>) -> anyhow::Result<u32> {
            Ok(request.payload() * 2)
        }
    }

    /// Blocks on `release` for payloads >= 100
    struct Gate {
        started: flume::Sender<u32>,
        release: flume::Receiver<()>,
    }

    impl RequestHandler<u32, u32> for Gate {
        fn can_handle(&self, request: &Request<u32>) -> bool {
            *request.payload() >= 100
        }
        fn handle_request(&self, request: &Request<u32>) -> anyhow::Result<u32> {
            let _ = self.started.send(*request.payload());
            self.release.recv()?;
            Ok(*request.payload())
        }
    }

    #[derive(Default)]
    struct Collect {
        responses: Vec<(RequestId, Option<u32>, bool)>,
    }

    impl ResponseHandler<u32, u32> for Collect {
        fn handle_response(&mut self, response: Response<u32, u32>) {
            let value = match response.outcome() {
                Outcome::Completed(value) => Some(*value),
                _ => None,
            };
            self.responses
                .push((response.id(), value, response.is_aborted()));
        }
    }

    fn queue(workers: usize) -> (WorkQueue<u32, u32>, ChannelId) {
        let _ = simple_logger::SimpleLogger::new().init();

        let mut queue = WorkQueue::new(&QueueConfig {
            workers,
            ..Default::default()
        })
        .unwrap();
        let channel = queue.channel("test").unwrap();
        (queue, channel)
    }

    fn gated(
        queue: &WorkQueue<u32, u32>,
        channel: ChannelId,
    ) -> (flume::Receiver<u32>, flume::Sender<()>) {
        let (started_send, started_recv) = flume::unbounded();
        let (release_send, release_recv) = flume::unbounded();
        queue
            .add_request_handler(
                channel,
                Arc::new(Gate {
                    started: started_send,
                    release: release_recv,
                }),
            )
            .unwrap();
        queue.add_request_handler(channel, Arc::new(Double)).unwrap();

        (started_recv, release_send)
    }

    #[test]
    fn channels_are_reused_by_name() {
        let (mut queue, channel) = queue(0);
        assert_eq!(queue.channel("test").unwrap(), channel);
        assert_ne!(queue.channel("other").unwrap(), channel);
    }

    #[test]
    fn channel_ids_are_bounded() {
        let (mut queue, _) = queue(0);
        for ix in 1..=u16::MAX as usize {
            queue.channel(&ix.to_string()).unwrap();
        }

        assert!(matches!(
            queue.channel("one too many"),
            Err(QueueError::TooManyChannels)
        ));
        assert!(queue.channel("test").is_ok());
    }

    #[test]
    fn without_workers_responses_wait_for_processing() {
        let (queue, channel) = queue(0);
        queue.add_request_handler(channel, Arc::new(Double)).unwrap();

        let ids: Vec<_> = (1..=3)
            .map(|value| queue.submit(channel, value, 0).unwrap())
            .collect();
        assert_eq!(queue.outstanding(), 0);

        let mut collect = Collect::default();
        assert_eq!(queue.process_responses(channel, &mut collect).unwrap(), 3);
        assert_eq!(
            collect.responses,
            vec![
                (ids[0], Some(2), false),
                (ids[1], Some(4), false),
                (ids[2], Some(6), false)
            ]
        );
        assert_eq!(queue.process_responses(channel, &mut collect).unwrap(), 0);
    }

    #[test]
    fn peeked_id_matches_submission() {
        let (queue, channel) = queue(2);
        queue.add_request_handler(channel, Arc::new(Double)).unwrap();

        for value in 0..8 {
            let peeked = queue.peek_next_request_id();
            assert_eq!(queue.submit(channel, value, 0).unwrap(), peeked);
        }

        queue.wait_idle();
        let mut collect = Collect::default();
        assert_eq!(queue.process_responses(channel, &mut collect).unwrap(), 8);
    }

    #[test]
    fn blocking_requests_skip_the_channel() {
        let (queue, channel) = queue(2);
        queue.add_request_handler(channel, Arc::new(Double)).unwrap();

        let mut collect = Collect::default();
        let id = queue.submit_blocking(channel, 21, 0, &mut collect).unwrap();
        assert_eq!(collect.responses, vec![(id, Some(42), false)]);

        assert_eq!(queue.outstanding(), 0);
        assert_eq!(queue.process_responses(channel, &mut collect).unwrap(), 0);
    }

    #[test]
    fn abort_only_hits_queued_requests() {
        let (queue, channel) = queue(1);
        let (started, release) = gated(&queue, channel);

        let running = queue.submit(channel, 100, 0).unwrap();
        assert_eq!(started.recv().unwrap(), 100);
        let queued = queue.submit(channel, 1, 0).unwrap();

        assert!(!queue.abort(running));
        assert!(queue.abort(queued));

        release.send(()).unwrap();
        queue.wait_idle();

        let mut collect = Collect::default();
        assert_eq!(queue.process_responses(channel, &mut collect).unwrap(), 2);
        assert_eq!(
            collect.responses,
            vec![(running, Some(100), false), (queued, None, true)]
        );
        assert!(!queue.abort(queued));
    }

    #[test]
    fn higher_priority_starts_first() {
        let (queue, channel) = queue(1);
        let (started, release) = gated(&queue, channel);

        let gate = queue.submit(channel, 100, 0).unwrap();
        assert_eq!(started.recv().unwrap(), 100);

        let low = queue.submit(channel, 1, 0).unwrap();
        let high = queue.submit(channel, 2, 10).unwrap();

        release.send(()).unwrap();
        queue.wait_idle();

        let mut collect = Collect::default();
        queue.process_responses(channel, &mut collect).unwrap();
        let order: Vec<_> = collect.responses.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(order, vec![gate, high, low]);
    }

    #[test]
    fn failures_become_failed_responses() {
        struct Panics;
        impl RequestHandler<u32, u32> for Panics {
            fn can_handle(&self, request: &Request<u32>) -> bool {
                *request.payload() == 0
            }
            fn handle_request(&self, _request: &Request<u32>) -> anyhow::Result<u32> {
                panic!("zero")
            }
        }

        let (queue, channel) = queue(0);
        queue.add_request_handler(channel, Arc::new(Panics)).unwrap();

        struct Failures(Vec<String>);
        impl ResponseHandler<u32, u32> for Failures {
            fn handle_response(&mut self, response: Response<u32, u32>) {
                if let Outcome::Failed(err) = response.outcome() {
                    self.0.push(err.to_string());
                }
            }
        }

        queue.submit(channel, 0, 0).unwrap();
        queue.submit(channel, 1, 0).unwrap();

        let mut failures = Failures(Vec::new());
        queue.process_responses(channel, &mut failures).unwrap();

        assert_eq!(failures.0.len(), 2);
        assert!(failures.0[0].contains("panicked: zero"));
        assert!(failures.0[1].contains("No request handler"));
    }

    #[test]
    fn budget_limits_processing() {
        let (queue, channel) = queue(0);
        queue.add_request_handler(channel, Arc::new(Double)).unwrap();
        for value in 0..3 {
            queue.submit(channel, value, 0).unwrap();
        }

        let mut collect = Collect::default();
        let budget = Duration::from_secs(0);
        assert_eq!(
            queue
                .process_responses_with_budget(channel, &mut collect, budget)
                .unwrap(),
            1
        );
        assert_eq!(queue.process_responses(channel, &mut collect).unwrap(), 2);
    }

    #[test]
    fn shutdown_drains_and_rejects() {
        let (queue, channel) = queue(2);
        queue.add_request_handler(channel, Arc::new(Double)).unwrap();
        for value in 0..16 {
            queue.submit(channel, value, 0).unwrap();
        }

        queue.shutdown();
        assert!(queue.is_shut_down());
        assert_eq!(queue.outstanding(), 0);
        assert!(matches!(
            queue.submit(channel, 0, 0),
            Err(QueueError::ShutDown)
        ));

        let mut collect = Collect::default();
        assert_eq!(queue.process_responses(channel, &mut collect).unwrap(), 16);
    }

    #[test]
    fn foreign_channels_are_rejected() {
        let (queue, _) = queue(0);
        let foreign = ChannelId(5);

        assert!(matches!(
            queue.submit(foreign, 0, 0),
            Err(QueueError::UnknownChannel(_))
        ));
        assert!(queue.add_request_handler(foreign, Arc::new(Double)).is_err());
    }
}
