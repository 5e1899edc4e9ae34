//! In-flight request tracking.
//!
//! A [`PendingCall`] is created when a request is queued and resolved exactly
//! once: with the matching response, or with the connection's sticky error.
//! [`PendingQueue`] holds the calls already written to the wire, oldest
//! first, and pairs each inbound response with the call at its front.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{AbciError, Result};
use crate::types::{MessageKind, Request, Response};

/// Outcome of a single call.
pub type CallResult = std::result::Result<Response, AbciError>;

type Callback = Box<dyn FnOnce(&CallResult) + Send + 'static>;

struct CallInner {
    request: Request,
    done: watch::Sender<Option<CallResult>>,
    callback: Mutex<Option<Callback>>,
}

/// Handle to a queued request.
///
/// Cloning is cheap; all clones observe the same completion.
#[derive(Clone)]
pub struct PendingCall {
    inner: Arc<CallInner>,
}

impl PendingCall {
    pub(crate) fn new(request: Request) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            inner: Arc::new(CallInner {
                request,
                done,
                callback: Mutex::new(None),
            }),
        }
    }

    /// The request this call carries.
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Install a completion callback.
    ///
    /// If the call already resolved the callback runs immediately on the
    /// calling task; otherwise it runs on the reader task when the response
    /// arrives (or during teardown). Replaces any earlier callback that has
    /// not run yet.
    pub fn set_callback<F>(&self, f: F)
    where
        F: FnOnce(&CallResult) + Send + 'static,
    {
        let mut slot = self.inner.callback.lock().unwrap_or_else(|e| e.into_inner());
        let resolved = self.inner.done.borrow().clone();
        match resolved {
            Some(result) => {
                drop(slot);
                f(&result);
            }
            None => *slot = Some(Box::new(f)),
        }
    }

    /// True once the call has a result.
    pub fn is_done(&self) -> bool {
        self.inner.done.borrow().is_some()
    }

    /// The result, if the call has resolved.
    pub fn result(&self) -> Option<CallResult> {
        self.inner.done.borrow().clone()
    }

    /// Wait until the call resolves.
    pub async fn wait(&self) -> CallResult {
        let mut rx = self.inner.done.subscribe();
        let resolved = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            // The sender lives in `self`, so the channel cannot close first.
            Err(_) => None,
        };
        resolved.unwrap_or(Err(AbciError::Stopped))
    }

    /// Resolve the call and run its callback. Later calls are ignored.
    ///
    /// Returns false if the call had already resolved.
    pub(crate) fn complete(&self, result: CallResult) -> bool {
        let callback = {
            let mut slot = self.inner.callback.lock().unwrap_or_else(|e| e.into_inner());
            let first = self.inner.done.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(result.clone());
                true
            });
            if !first {
                return false;
            }
            slot.take()
        };

        if let Some(callback) = callback {
            callback(&result);
        }
        true
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("kind", &self.inner.request.kind())
            .field("done", &self.is_done())
            .finish()
    }
}

/// Calls written to the wire and awaiting a response, oldest first.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    calls: VecDeque<PendingCall>,
}

impl PendingQueue {
    pub fn push(&mut self, call: PendingCall) {
        self.calls.push_back(call);
    }

    /// Pop the oldest call if `received` answers it.
    ///
    /// On mismatch the call stays queued so teardown fails it along with
    /// the rest.
    pub fn match_response(&mut self, received: MessageKind) -> Result<PendingCall> {
        let front = self
            .calls
            .front()
            .ok_or(AbciError::UnsolicitedResponse(received))?;

        let expected = front.request().expected_response();
        if expected != received {
            return Err(AbciError::UnexpectedResponse { expected, received });
        }

        self.calls
            .pop_front()
            .ok_or(AbciError::UnsolicitedResponse(received))
    }

    pub fn drain(&mut self) -> Vec<PendingCall> {
        self.calls.drain(..).collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.calls.len()
    }
}
