//! Dispatch fabric
//!
//! Spreads requests from the gateway over the request workers. Workers
//! announce themselves idle; a request goes to the worker that has been
//! idle longest, or waits in a FIFO queue when every worker is busy.
//! Replies are relayed to the gateway unchanged. The fabric never looks
//! inside a message.
//!
//! The request channel is unbounded: the fabric may wait on the bounded
//! reply channel, which only the gateway drains, so the gateway must never
//! wait on the fabric. Backlog lives in the fabric's pending queue.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tg_protocol::Multipart;

use crate::error::BrokerError;

/// Worker index within the pool
pub type WorkerId = usize;

/// Notifications from workers to the fabric
#[derive(Debug)]
pub enum WorkerEvent {
    /// Worker started and can take a request
    Ready(WorkerId),
    /// Worker finished a request and can take another
    Done {
        worker: WorkerId,
        /// Reply to relay, if the request produced one
        reply: Option<Multipart>,
    },
}

/// A worker's end of the fabric
#[derive(Debug)]
pub struct WorkerLink {
    /// Worker index
    pub id: WorkerId,
    /// Requests assigned to this worker
    pub jobs: mpsc::Receiver<Multipart>,
    /// Where to report readiness and replies
    pub events: mpsc::Sender<WorkerEvent>,
}

/// Load-balancing connector between the gateway and the workers
pub struct DispatchFabric {
    requests: mpsc::UnboundedReceiver<Multipart>,
    replies: mpsc::Sender<Multipart>,
    events: mpsc::Receiver<WorkerEvent>,
    workers: Vec<mpsc::Sender<Multipart>>,
    pending: VecDeque<Multipart>,
    idle: VecDeque<WorkerId>,
}

impl DispatchFabric {
    /// Create a fabric for `worker_count` workers, returning their links
    pub fn new(
        worker_count: usize,
        requests: mpsc::UnboundedReceiver<Multipart>,
        replies: mpsc::Sender<Multipart>,
    ) -> (Self, Vec<WorkerLink>) {
        let (events_tx, events_rx) = mpsc::channel(worker_count.max(1) * 2);
        let mut workers = Vec::with_capacity(worker_count);
        let mut links = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            // A worker holds at most one request at a time
            let (job_tx, job_rx) = mpsc::channel(1);
            workers.push(job_tx);
            links.push(WorkerLink {
                id,
                jobs: job_rx,
                events: events_tx.clone(),
            });
        }

        let fabric = Self {
            requests,
            replies,
            events: events_rx,
            workers,
            pending: VecDeque::new(),
            idle: VecDeque::with_capacity(worker_count),
        };

        (fabric, links)
    }

    /// Run until cancelled or the gateway goes away
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BrokerError> {
        tracing::debug!("Dispatch fabric started with {} workers", self.workers.len());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(request) = self.requests.recv() => {
                    self.assign(request).await?;
                }

                Some(event) = self.events.recv() => {
                    let worker = match event {
                        WorkerEvent::Ready(worker) => worker,
                        WorkerEvent::Done { worker, reply } => {
                            if let Some(reply) = reply {
                                if self.replies.send(reply).await.is_err() {
                                    if cancel.is_cancelled() {
                                        break;
                                    }
                                    return Err(BrokerError::ChannelClosed("gateway replies"));
                                }
                            }
                            worker
                        }
                    };
                    self.worker_idle(worker).await?;
                }

                else => break,
            }
        }

        if !self.pending.is_empty() {
            tracing::debug!("Dispatch fabric stopped with {} queued requests", self.pending.len());
        }
        Ok(())
    }

    async fn assign(&mut self, request: Multipart) -> Result<(), BrokerError> {
        match self.idle.pop_front() {
            Some(worker) => self.send_to(worker, request).await,
            None => {
                self.pending.push_back(request);
                tracing::trace!("All workers busy, {} requests queued", self.pending.len());
                Ok(())
            }
        }
    }

    async fn worker_idle(&mut self, worker: WorkerId) -> Result<(), BrokerError> {
        match self.pending.pop_front() {
            Some(request) => self.send_to(worker, request).await,
            None => {
                self.idle.push_back(worker);
                Ok(())
            }
        }
    }

    async fn send_to(&mut self, worker: WorkerId, request: Multipart) -> Result<(), BrokerError> {
        let Some(jobs) = self.workers.get(worker) else {
            tracing::warn!("Event from unknown worker {}", worker);
            self.pending.push_front(request);
            return Ok(());
        };

        jobs.send(request)
            .await
            .map_err(|_| BrokerError::ChannelClosed("worker jobs"))
    }
}
