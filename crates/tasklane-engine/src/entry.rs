use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use tasklane::protocol::Request;

/// Encoded response, or the error the requester should see.
pub(crate) type Response = tasklane::Result<String>;

/// Queue entry
#[derive(Debug)]
pub(crate) struct QueueEntry {
    /// Identifier
    pub id: Uuid,

    pub request: Request,

    /// Response sender
    pub response_tx: oneshot::Sender<Response>,

    /// Instant when this entry was queued
    pub queue_time: Instant,
}

impl QueueEntry {
    pub fn new(request: Request, response_tx: oneshot::Sender<Response>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            response_tx,
            queue_time: Instant::now(),
        }
    }

    /// Answer the request, logging if the requester already gave up.
    pub fn respond(self, response: Response) {
        if self.response_tx.send(response).is_ok() {
            tracing::trace!("Sent response for request {}", self.id)
        } else {
            tracing::error!("Failed to send response for request {}", self.id)
        }
    }
}
