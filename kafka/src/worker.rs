//! Consumer loops and the machinery they share.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!                    │        SharedConsumer        │
//!   worker(orders) ──┤  access lock ─► poll/commit  │
//!   worker(billing) ─┤  routes: topic ─► inbox      │
//!                    └──────────────┬───────────────┘
//!                                   │ record for "billing"
//!                                   ▼
//!                          billing inbox (FIFO)
//! ```
//!
//! Every subscription made through one broker multiplexes onto a single
//! backend consumer. Whichever worker holds the access lock polls; the record
//! it gets is pushed into the inbox of the subscription that owns the record's
//! topic, so each worker sees its own topic in log order no matter who polled.
//!
//! Inboxes are bounded. When a poll turns up a record for a full inbox, the
//! record is parked in that route's overflow and the topic is paused at the
//! backend, so a slow handler holds back its own topic without stalling the
//! others. The topic is resumed once a poll finds room for the parked
//! records again.
//!
//! Each worker has its own [`CancellationToken`] and is tracked in the
//! [`WorkerRegistry`], so a single subscription can be stopped without
//! touching the others.

use crate::client::{ClientConsumer, ClientProducer, CommitPosition, ConsumerRecord, ProducerRecord};
use crate::error::ClientError;
use crate::health::{HealthState, SubscriptionHealth};
use crate::publication::Publication;
use crate::publish::DEFAULT_PARTITION;
use logbus_core::{BrokerError, Event, Handler};
use logbus_runtime::metrics::ConsumerMetrics;
use logbus_runtime::{DeadLetterQueue, RetryOutcome, RetryPolicy, retry_with_backoff};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Route {
    id: u64,
    inbox: Sender<ConsumerRecord>,
    /// Records polled while the inbox was full, oldest first.
    overflow: VecDeque<ConsumerRecord>,
    paused: bool,
}

impl Route {
    fn new(id: u64, inbox: Sender<ConsumerRecord>) -> Self {
        Self {
            id,
            inbox,
            overflow: VecDeque::new(),
            paused: false,
        }
    }
}

/// One backend consumer shared by every subscription of a broker.
pub(crate) struct SharedConsumer {
    client: Arc<dyn ClientConsumer>,
    routes: Mutex<HashMap<String, Route>>,
    access: tokio::sync::Mutex<()>,
}

impl SharedConsumer {
    pub(crate) fn new(client: Arc<dyn ClientConsumer>) -> Self {
        Self {
            client,
            routes: Mutex::new(HashMap::new()),
            access: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn client(&self) -> &Arc<dyn ClientConsumer> {
        &self.client
    }

    /// Route `topic` to `inbox` and subscribe the backend to it.
    ///
    /// Nothing is registered if the backend rejects the new topic set.
    pub(crate) async fn register(
        &self,
        topic: &str,
        id: u64,
        inbox: Sender<ConsumerRecord>,
    ) -> Result<(), BrokerError> {
        let _access = self.access.lock().await;
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);

        if routes.contains_key(topic) {
            return Err(BrokerError::Subscription {
                topic: topic.to_string(),
                reason: "topic already has an active subscription".to_string(),
            });
        }

        let mut topics: Vec<String> = routes.keys().cloned().collect();
        topics.push(topic.to_string());
        topics.sort();

        self.client
            .subscribe(&topics)
            .map_err(|e| BrokerError::Subscription {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        routes.insert(topic.to_string(), Route::new(id, inbox));
        Ok(())
    }

    /// Drop the route for `topic` if it still belongs to subscription `id`,
    /// and shrink the backend subscription accordingly.
    pub(crate) async fn unregister(&self, topic: &str, id: u64) -> Result<(), ClientError> {
        let _access = self.access.lock().await;
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);

        match routes.get(topic) {
            Some(route) if route.id == id => {
                routes.remove(topic);
            }
            _ => return Ok(()),
        }

        if routes.is_empty() {
            self.client.unsubscribe()
        } else {
            let mut topics: Vec<String> = routes.keys().cloned().collect();
            topics.sort();
            self.client.subscribe(&topics)
        }
    }

    /// Forget every route. Inboxes close once their workers drain them.
    pub(crate) fn clear(&self) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Poll once and route whatever arrives to its subscription's inbox.
    ///
    /// Parked records are moved into inboxes that have room first, so they
    /// keep their place ahead of anything polled later.
    pub(crate) async fn poll(&self, timeout: Duration) -> Result<(), ClientError> {
        let _access = self.access.lock().await;
        self.refill();

        let Some(record) = self.client.poll(timeout).await? else {
            return Ok(());
        };

        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(route) = routes.get_mut(&record.topic) else {
            tracing::debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "No subscription for topic, record left uncommitted"
            );
            return Ok(());
        };

        if !route.overflow.is_empty() {
            route.overflow.push_back(record);
            self.pause(route);
            return Ok(());
        }

        match route.inbox.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                route.overflow.push_back(record);
                self.pause(route);
            }
            Err(TrySendError::Closed(record)) => {
                tracing::debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Subscription is shutting down, record left uncommitted"
                );
            }
        }
        Ok(())
    }

    /// Stop fetching `route`'s topic until its overflow drains.
    ///
    /// Re-applied on every overflow push: a rebalance may have dropped the
    /// previous pause.
    fn pause(&self, route: &mut Route) {
        let Some(topic) = route.overflow.front().map(|record| record.topic.clone()) else {
            return;
        };
        match self.client.pause(std::slice::from_ref(&topic)) {
            Ok(()) => {
                if !route.paused {
                    tracing::debug!(
                        topic = %topic,
                        parked = route.overflow.len(),
                        "Inbox full, topic paused"
                    );
                }
                route.paused = true;
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Failed to pause topic");
            }
        }
    }

    /// Move parked records into inboxes with room, resuming topics whose
    /// overflow is empty again.
    fn refill(&self) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        for (topic, route) in routes.iter_mut() {
            while let Some(record) = route.overflow.pop_front() {
                match route.inbox.try_send(record) {
                    Ok(()) => {}
                    Err(TrySendError::Full(record)) => {
                        route.overflow.push_front(record);
                        break;
                    }
                    Err(TrySendError::Closed(_)) => route.overflow.clear(),
                }
            }

            if route.paused && route.overflow.is_empty() {
                match self.client.resume(std::slice::from_ref(topic)) {
                    Ok(()) => {
                        tracing::debug!(topic = %topic, "Inbox drained, topic resumed");
                        route.paused = false;
                    }
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "Failed to resume topic");
                    }
                }
            }
        }
    }

    pub(crate) async fn commit(&self, positions: &[CommitPosition]) -> Result<(), ClientError> {
        let _access = self.access.lock().await;
        self.client.commit(positions)
    }
}

struct WorkerEntry {
    topic: String,
    shared: Arc<SharedConsumer>,
    token: CancellationToken,
    health: Arc<HealthState>,
    handle: JoinHandle<()>,
}

/// Supervises the running consumer loops of one broker.
#[derive(Default)]
pub(crate) struct WorkerRegistry {
    next_id: AtomicU64,
    workers: Mutex<HashMap<u64, WorkerEntry>>,
}

impl WorkerRegistry {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn `worker` under subscription `id`.
    pub(crate) fn spawn(&self, id: u64, worker: Worker) {
        let topic = worker.topic.clone();
        let shared = Arc::clone(&worker.shared);
        let token = worker.token.clone();
        let health = Arc::clone(&worker.health);
        let handle = tokio::spawn(worker.run());

        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, WorkerEntry {
                topic,
                shared,
                token,
                health,
                handle,
            });
    }

    /// Cancel one worker and wait for it to exit.
    pub(crate) async fn stop(&self, id: u64) {
        let entry = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        if let Some(entry) = entry {
            entry.token.cancel();
            join(entry).await;
        }
    }

    /// Cancel every worker polling `shared` and wait for them to exit.
    pub(crate) async fn stop_attached(&self, shared: &Arc<SharedConsumer>) {
        let entries: Vec<WorkerEntry> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<u64> = workers
                .iter()
                .filter(|(_, entry)| Arc::ptr_eq(&entry.shared, shared))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| workers.remove(id)).collect()
        };

        for entry in &entries {
            entry.token.cancel();
        }
        for entry in entries {
            join(entry).await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn health(&self) -> Vec<SubscriptionHealth> {
        let mut health: Vec<SubscriptionHealth> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.health.snapshot(&entry.topic))
            .collect();
        health.sort_by(|a, b| a.topic.cmp(&b.topic));
        health
    }
}

async fn join(entry: WorkerEntry) {
    // Stopped from inside its own handler: the worker sees the cancelled
    // token once the handler returns. Awaiting it here would never finish.
    if tokio::task::try_id() == Some(entry.handle.id()) {
        tracing::debug!(topic = %entry.topic, "Worker stopped from its own handler");
        return;
    }

    if let Err(e) = entry.handle.await {
        tracing::error!(topic = %entry.topic, error = %e, "Consumer worker panicked");
        entry.health.set_running(false);
    }
}

/// Where exhausted records are republished, if anywhere.
#[derive(Clone)]
pub(crate) struct DeadLetterSink {
    pub(crate) topic: String,
    pub(crate) producer: Arc<dyn ClientProducer>,
}

/// The consumer loop for one subscription.
pub(crate) struct Worker {
    pub(crate) topic: String,
    pub(crate) shared: Arc<SharedConsumer>,
    pub(crate) inbox: Receiver<ConsumerRecord>,
    pub(crate) handler: Handler,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) poll_timeout: Duration,
    pub(crate) dead_letters: DeadLetterQueue<Publication>,
    pub(crate) dead_letter_sink: Option<DeadLetterSink>,
    pub(crate) health: Arc<HealthState>,
    pub(crate) token: CancellationToken,
}

impl Worker {
    pub(crate) fn run(mut self) -> impl Future<Output = ()> + Send + 'static {
        async move {
            self.health.set_running(true);
            ConsumerMetrics::record_worker_started();
            tracing::info!(topic = %self.topic, "Consumer worker started");

            loop {
                let record = tokio::select! {
                    biased;
                    () = self.token.cancelled() => break,
                    Some(record) = self.inbox.recv() => record,
                    result = self.shared.poll(self.poll_timeout) => {
                        if let Err(e) = result {
                            self.on_poll_error(&e).await;
                        }
                        continue;
                    }
                };

                if !self.dispatch(record).await {
                    break;
                }
            }

            self.health.set_running(false);
            ConsumerMetrics::record_worker_stopped();
            tracing::info!(topic = %self.topic, "Consumer worker stopped");
        }
    }

    async fn on_poll_error(&self, error: &ClientError) {
        tracing::warn!(topic = %self.topic, error = %error, "Poll failed, retrying");
        ConsumerMetrics::record_poll_error(&self.topic);
        self.health.record_poll_error(&error.to_string());

        // Immediate failures would otherwise spin.
        tokio::select! {
            () = self.token.cancelled() => {}
            () = tokio::time::sleep(self.poll_timeout) => {}
        }
    }

    /// Run the handler for one record and settle it.
    ///
    /// Returns `false` if the worker was cancelled while backing off.
    async fn dispatch(&self, record: ConsumerRecord) -> bool {
        let publication = Publication::from_record(&record);
        if let Some(error) = publication.error() {
            tracing::debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %error,
                "Record decoded with problems"
            );
        }

        ConsumerMetrics::record_consume(&self.topic);
        self.health.record_delivered();

        let outcome = retry_with_backoff(
            &self.retry_policy,
            |_attempt| {
                let event: Box<dyn Event> = Box::new(publication.clone());
                let invocation = (self.handler)(event);
                let topic = self.topic.clone();
                let health = Arc::clone(&self.health);
                async move {
                    let started = Instant::now();
                    let result = invocation.await;
                    ConsumerMetrics::record_handler(&topic, started.elapsed(), result.is_err());
                    if let Err(e) = &result {
                        health.record_handler_failure(e.message());
                    }
                    result
                }
            },
            self.token.cancelled(),
        )
        .await;

        match outcome {
            RetryOutcome::Succeeded { .. } => {
                self.commit(&record).await;
                true
            }
            RetryOutcome::Exhausted { error, attempts } => {
                tracing::error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    attempts,
                    error = %error,
                    "Handler kept failing, moving record to dead letters"
                );
                self.dead_letter(publication, error.message(), attempts).await;
                true
            }
            RetryOutcome::Cancelled { attempts, .. } => {
                tracing::debug!(
                    topic = %record.topic,
                    offset = record.offset,
                    attempts,
                    "Worker cancelled while retrying, record left uncommitted"
                );
                false
            }
        }
    }

    async fn commit(&self, record: &ConsumerRecord) {
        match self.shared.commit(&[record.next_position()]).await {
            Ok(()) => {
                ConsumerMetrics::record_commit(&self.topic, false);
                self.health.record_committed();
            }
            Err(e) => {
                tracing::warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Failed to commit offset (message may be redelivered)"
                );
                ConsumerMetrics::record_commit(&self.topic, true);
                self.health.record_commit_error(&e.to_string());
            }
        }
    }

    /// Park an exhausted record. It is not committed; the next successful
    /// commit on its partition moves past it.
    async fn dead_letter(&self, publication: Publication, error: &str, attempts: usize) {
        ConsumerMetrics::record_dead_letter(&self.topic);
        self.health.record_dead_letter();

        if let Some(sink) = &self.dead_letter_sink {
            let record = ProducerRecord {
                topic: sink.topic.clone(),
                partition: DEFAULT_PARTITION,
                payload: publication.message().body.clone(),
            };
            if let Err(e) = sink.producer.produce(record).await {
                tracing::error!(
                    topic = %self.topic,
                    dead_letter_topic = %sink.topic,
                    error = %e,
                    "Failed to publish dead letter"
                );
            }
        }

        self.dead_letters.push(publication, error.to_string(), attempts);
    }
}
