//! Request/response correlation
//!
//! Every request registers a [`PendingRequest`] under a fresh request id.
//! Whoever removes the entry from the pending map resolves the request:
//! the reader task with the response, the waiter on timeout, the waiter's
//! drop on cancellation, or the channel on failure. Anything arriving after
//! removal is discarded.

use crate::statistics::ChannelStatistics;
use opcua_core::{UaError, UaResult};
use opcua_service::ServiceResponse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// An outstanding request
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: u32,
    /// Service name, for logging
    pub service: &'static str,
    pub sent_at: Instant,
    pub deadline: Instant,
    sender: oneshot::Sender<UaResult<ServiceResponse>>,
}

#[derive(Debug)]
pub struct Correlator {
    pending: Mutex<HashMap<u32, PendingRequest>>,
    /// Timed out or cancelled since the reader last looked
    abandoned: Mutex<Vec<u32>>,
    next_id: AtomicU32,
    statistics: Arc<ChannelStatistics>,
}

impl Correlator {
    pub fn new(statistics: Arc<ChannelStatistics>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            abandoned: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            statistics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next request id; never 0
    pub fn next_request_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Register a request resolved at the latest after `timeout`
    pub fn register(self: &Arc<Self>, service: &'static str, timeout: Duration) -> PendingResponse {
        let (sender, receiver) = oneshot::channel();
        let sent_at = Instant::now();
        let deadline = sent_at + timeout;
        let mut pending = self.lock();
        let request_id = loop {
            let id = self.next_request_id();
            if !pending.contains_key(&id) {
                break id;
            }
        };
        pending.insert(
            request_id,
            PendingRequest {
                request_id,
                service,
                sent_at,
                deadline,
                sender,
            },
        );
        drop(pending);
        log::trace!("Registered {} as request {}", service, request_id);
        PendingResponse {
            correlator: Arc::clone(self),
            request_id,
            deadline,
            receiver,
            resolved: false,
        }
    }

    fn remove(&self, request_id: u32) -> Option<PendingRequest> {
        self.lock().remove(&request_id)
    }

    /// Remove a request its waiter gave up on
    fn abandon(&self, request_id: u32) -> Option<PendingRequest> {
        let removed = self.remove(request_id);
        if removed.is_some() {
            self.abandoned
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request_id);
        }
        removed
    }

    /// Requests abandoned since the last call, whose partial responses
    /// can be dropped
    pub fn take_abandoned(&self) -> Vec<u32> {
        std::mem::take(&mut *self.abandoned.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_pending(&self, request_id: u32) -> bool {
        self.lock().contains_key(&request_id)
    }

    /// Resolve `request_id` with `result`
    ///
    /// Returns `false` if the request is no longer pending; the result is
    /// then discarded.
    pub fn complete(&self, request_id: u32, result: UaResult<ServiceResponse>) -> bool {
        match self.remove(request_id) {
            Some(pending) => {
                let elapsed = pending.sent_at.elapsed();
                log::trace!(
                    "{} request {} resolved after {:?}",
                    pending.service,
                    request_id,
                    elapsed
                );
                if pending.sender.send(result).is_err() {
                    log::debug!("Waiter for request {} already gone", request_id);
                }
                true
            }
            None => {
                self.statistics.increment_discarded_responses();
                log::debug!("Discarding response to unknown request {}", request_id);
                false
            }
        }
    }

    /// Fail every pending request, returning how many were failed
    pub fn fail_all<F>(&self, error: F) -> usize
    where
        F: Fn() -> UaError,
    {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.sender.send(Err(error()));
        }
        if count > 0 {
            log::debug!("Failed {} pending requests", count);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Deadline of the request waiting longest, if any
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.lock().values().map(|p| p.deadline).min()
    }

    #[cfg(test)]
    fn with_next_id(statistics: Arc<ChannelStatistics>, next_id: u32) -> Self {
        let correlator = Self::new(statistics);
        correlator.next_id.store(next_id, Ordering::Relaxed);
        correlator
    }
}

/// Waiter side of a registered request
///
/// Dropping it before resolution cancels the request.
#[derive(Debug)]
pub struct PendingResponse {
    correlator: Arc<Correlator>,
    request_id: u32,
    deadline: Instant,
    receiver: oneshot::Receiver<UaResult<ServiceResponse>>,
    resolved: bool,
}

impl PendingResponse {
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Wait for the response or the deadline
    ///
    /// # Errors
    ///
    /// Returns `UaError::Timeout` when the deadline passes first; the server
    /// may still have processed the request.
    pub async fn wait(mut self) -> UaResult<ServiceResponse> {
        let outcome = tokio::time::timeout_at(self.deadline, &mut self.receiver).await;
        self.resolved = true;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(UaError::ChannelLost("request abandoned".to_string())),
            Err(_) => {
                if let Some(pending) = self.correlator.abandon(self.request_id) {
                    self.correlator.statistics.increment_timeouts();
                    log::debug!("{} request {} timed out", pending.service, self.request_id);
                    return Err(UaError::Timeout);
                }
                // The reader removed the entry first; its result is on the way
                match (&mut self.receiver).await {
                    Ok(result) => result,
                    Err(_) => Err(UaError::Timeout),
                }
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.resolved && self.correlator.abandon(self.request_id).is_some() {
            log::debug!("Request {} cancelled", self.request_id);
        }
    }
}
