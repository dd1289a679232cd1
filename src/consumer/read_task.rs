use crate::broker::PeekableStream;
use crate::consumer::instance::ConsumerInstance;
use crate::consumer::topic_state::{FailedRead, TopicState};
use crate::error::RestMqError;
use crate::time::Clock;
use crate::types::ConsumerRecord;
use crate::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, trace, warn};

pub type ReadCallback = Box<dyn FnOnce(Result<Vec<ConsumerRecord>>) + Send + 'static>;

/// State of a single consumer read request, from first fetch attempt to
/// callback completion.
///
/// A task is advanced one bounded step at a time by a worker and stops on the
/// first of three conditions: the response byte cap would be exceeded, the
/// accumulated bytes passed the configured floor, or the request deadline
/// elapsed. The floor may legitimately exceed the cap (that configuration
/// disables the floor shortcut and is not clamped).
pub(crate) struct ReadTask {
    instance: Arc<ConsumerInstance>,
    topic: String,
    topic_state: Option<Arc<TopicState>>,
    /// Owning the guard is holding the topic's in-use flag; dropping it at
    /// finish releases the stream for the next request.
    stream_guard: Option<OwnedMutexGuard<Option<PeekableStream>>>,
    messages: Vec<ConsumerRecord>,
    bytes_consumed: u64,
    exceeded_min_response_bytes: bool,
    will_exceed_max_response_bytes: bool,
    max_response_bytes: u64,
    request_timeout_ms: u64,
    response_min_bytes: u64,
    iterator_backoff_ms: u64,
    started_ms: u64,
    wait_expiration_ms: u64,
    finished: bool,
    callback: Option<ReadCallback>,
    clock: Arc<dyn Clock>,
}

impl ReadTask {
    /// Build a task for one read request. On a construction-time failure
    /// (e.g. the instance is bound to a different topic) the callback fires
    /// immediately and the task is already done.
    pub fn new(
        instance: Arc<ConsumerInstance>,
        topic: String,
        max_bytes: u64,
        clock: Arc<dyn Clock>,
        callback: ReadCallback,
    ) -> Self {
        let settings = instance.settings().clone();
        let started_ms = clock.now_ms();
        let mut task = Self {
            instance,
            topic,
            topic_state: None,
            stream_guard: None,
            messages: Vec::new(),
            bytes_consumed: 0,
            exceeded_min_response_bytes: false,
            will_exceed_max_response_bytes: false,
            max_response_bytes: max_bytes.min(settings.response_max_bytes),
            request_timeout_ms: settings.request_wait_ms,
            response_min_bytes: settings.response_min_bytes,
            iterator_backoff_ms: settings.iterator_backoff_ms,
            started_ms,
            wait_expiration_ms: 0,
            finished: false,
            callback: Some(callback),
            clock,
        };

        match task.instance.get_or_create_topic_state(&task.topic) {
            Ok(state) => {
                // If the previous read failed with data on board, restore it
                // so those messages lead this response.
                if let Some(rescued) = state.take_failed_read() {
                    debug!(
                        topic = %task.topic,
                        messages = rescued.messages.len(),
                        "resuming read from rescued buffer"
                    );
                    task.messages = rescued.messages;
                    task.bytes_consumed = rescued.bytes_consumed;
                    task.exceeded_min_response_bytes = rescued.exceeded_min_response_bytes;
                    task.will_exceed_max_response_bytes = rescued.will_exceed_max_response_bytes;
                }
                task.topic_state = Some(state);
            }
            Err(e) => task.finish(Some(e)),
        }
        task
    }

    pub fn is_done(&self) -> bool {
        self.finished
    }

    pub fn wait_expiration_ms(&self) -> u64 {
        self.wait_expiration_ms
    }

    /// Finish early with a terminal error, e.g. when the worker pool drains
    /// on shutdown.
    pub fn cancel(&mut self, err: RestMqError) {
        self.finish(Some(err));
    }

    /// One cooperative step. Returns true when the step ended on the stream's
    /// bounded-wait timeout, i.e. the task is backing off; the updated wake
    /// time already accounts for it.
    pub async fn do_partial_read(&mut self) -> bool {
        match self.partial_read_step().await {
            Ok(backoff) => backoff,
            Err(e) => {
                let e = if self.instance.is_shutting_down() {
                    RestMqError::ShuttingDown
                } else {
                    e
                };
                debug!(topic = %self.topic, "read task failed: {e}");
                self.finish(Some(e));
                false
            }
        }
    }

    async fn partial_read_step(&mut self) -> Result<bool> {
        if self.instance.is_shutting_down() {
            return Err(RestMqError::ShuttingDown);
        }

        // Bind the stream on the first step that wins the in-use flag.
        if self.stream_guard.is_none() {
            let state = match &self.topic_state {
                Some(state) => Arc::clone(state),
                None => {
                    return Err(RestMqError::BrokerRead(
                        "read task has no topic state".to_string(),
                    ))
                }
            };
            match state.stream_handle().try_lock_owned() {
                Ok(mut guard) => {
                    if guard.is_none() {
                        *guard = Some(self.instance.open_stream(&self.topic).await?);
                    }
                    self.stream_guard = Some(guard);
                    self.wait_expiration_ms = 0;
                }
                Err(_) => {
                    // Another request holds the stream; retry after a backoff
                    // without blocking the worker.
                    let now = self.clock.now_ms();
                    self.wait_expiration_ms = (now + self.iterator_backoff_ms)
                        .min(self.started_ms + self.request_timeout_ms);
                    if now.saturating_sub(self.started_ms) >= self.request_timeout_ms {
                        self.finish(None);
                    }
                    return Ok(true);
                }
            }
        }

        let iteration_started_ms = self.clock.now_ms();
        let mut backoff = false;

        let instance = Arc::clone(&self.instance);
        if let Some(guard) = self.stream_guard.as_mut() {
            if let Some(stream) = guard.as_mut() {
                // Pull as many messages as one bounded wait yields. The
                // stream timeout is much smaller than the request deadline,
                // so checking elapsed time once after the loop is enough.
                loop {
                    let raw = match stream.peek().await? {
                        Some(message) => message.clone(),
                        None => {
                            backoff = true;
                            break;
                        }
                    };
                    let (record, size) = match instance.create_consumer_record(&raw) {
                        Ok(converted) => converted,
                        Err(e) => {
                            // Take the undecodable message off the stream, or
                            // every following read would peek it again and
                            // fail the same way.
                            stream.advance();
                            warn!(
                                topic = %self.topic,
                                partition = raw.partition,
                                offset = raw.offset,
                                "skipping undecodable message: {e}"
                            );
                            return Err(e);
                        }
                    };
                    if self.bytes_consumed.saturating_add(size) >= self.max_response_bytes {
                        self.will_exceed_max_response_bytes = true;
                        // The message stays peeked for the next request.
                        break;
                    }
                    stream.advance();
                    self.messages.push(record);
                    self.bytes_consumed += size;
                    // Offsets are not recorded here: they advance only at a
                    // successful finish, once the data is actually returned.
                    if self.bytes_consumed > self.response_min_bytes {
                        self.exceeded_min_response_bytes = true;
                        break;
                    }
                }
            }
        }

        trace!(
            topic = %self.topic,
            messages = self.messages.len(),
            bytes = self.bytes_consumed,
            "read task step done"
        );

        let now = self.clock.now_ms();
        // Anchor the backoff to the iteration's start, not the current time,
        // so total elapsed matches the request timeout exactly.
        let backoff_expiration = iteration_started_ms + self.iterator_backoff_ms;
        let request_expiration = self.started_ms + self.request_timeout_ms;
        self.wait_expiration_ms = backoff_expiration.min(request_expiration);

        let request_timed_out = now.saturating_sub(self.started_ms) >= self.request_timeout_ms;
        if request_timed_out
            || self.will_exceed_max_response_bytes
            || self.exceeded_min_response_bytes
        {
            trace!(
                topic = %self.topic,
                request_timed_out,
                will_exceed_max = self.will_exceed_max_response_bytes,
                exceeded_min = self.exceeded_min_response_bytes,
                "read task finishing"
            );
            self.finish(None);
        }

        Ok(backoff)
    }

    /// Terminal transition: update offsets on success, rescue the buffer on
    /// failure, release the stream, and fire the callback exactly once.
    fn finish(&mut self, err: Option<RestMqError>) {
        if self.finished {
            return;
        }

        match &err {
            None => {
                // Safe to mark these consumed now that they are being returned.
                if let Some(state) = &self.topic_state {
                    state.record_consumed(&self.messages);
                }
            }
            Some(RestMqError::ShuttingDown) => {
                // Instance state is being torn down; nothing to rescue into.
            }
            Some(_) => {
                if let Some(state) = &self.topic_state {
                    if !self.messages.is_empty() {
                        debug!(
                            topic = %self.topic,
                            messages = self.messages.len(),
                            "rescuing read buffer for the next request"
                        );
                        state.store_failed_read(FailedRead {
                            messages: std::mem::take(&mut self.messages),
                            bytes_consumed: self.bytes_consumed,
                            exceeded_min_response_bytes: self.exceeded_min_response_bytes,
                            will_exceed_max_response_bytes: self.will_exceed_max_response_bytes,
                        });
                    }
                }
            }
        }

        // Drop the owned guard: the topic is available to the next request.
        self.stream_guard = None;
        self.instance.end_read(self.clock.now_ms());

        let result = match err {
            None => Ok(std::mem::take(&mut self.messages)),
            Some(e) => Err(e),
        };
        if let Some(callback) = self.callback.take() {
            if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                // A panicking callback is a bug in the calling code; it must
                // not unwind into the worker.
                error!(topic = %self.topic, "read callback panicked");
            }
        }
        self.finished = true;
    }
}
