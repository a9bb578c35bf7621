//! Gateway routing loop

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tg_protocol::{ConnectionId, Multipart};

use super::transport::ConnectionTable;
use crate::error::BrokerError;

/// Validate an inbound `[identity, payload...]` message and append the
/// identity as a trailing frame.
///
/// Returns `None` when the identity is missing or empty, or when the
/// payload has no frames or only empty ones.
pub fn tag_request(message: Multipart) -> Option<Multipart> {
    let Some(identity) = message.get(0).filter(|frame| !frame.is_empty()).cloned() else {
        tracing::warn!("Dropping inbound message without identity");
        return None;
    };

    let payload = &message.frames()[1..];
    if payload.iter().all(|frame| frame.is_empty()) {
        tracing::warn!("Dropping empty message from {}", ConnectionId::from(identity));
        return None;
    }

    let mut tagged = message;
    tagged.push(identity);
    Some(tagged)
}

/// Single front-door loop between the transport and the dispatch fabric
pub struct Gateway {
    /// Tagged messages from connection tasks
    inbound: mpsc::Receiver<Multipart>,
    /// Replies and pushes addressed by identity
    outbound: mpsc::Receiver<Multipart>,
    /// Requests towards the dispatch fabric. Unbounded so the gateway never
    /// stops draining `outbound` while the fabric waits to hand it a reply.
    requests: mpsc::UnboundedSender<Multipart>,
    /// Live connections
    table: Arc<ConnectionTable>,
}

impl Gateway {
    /// Create the gateway
    pub fn new(
        inbound: mpsc::Receiver<Multipart>,
        outbound: mpsc::Receiver<Multipart>,
        requests: mpsc::UnboundedSender<Multipart>,
        table: Arc<ConnectionTable>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            requests,
            table,
        }
    }

    /// Run until cancelled
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BrokerError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(message) = self.inbound.recv() => {
                    let Some(request) = tag_request(message) else {
                        continue;
                    };
                    if self.requests.send(request).is_err() {
                        return Err(BrokerError::ChannelClosed("dispatch requests"));
                    }
                }

                Some(message) = self.outbound.recv() => {
                    self.table.deliver(message);
                }

                else => break,
            }
        }

        tracing::debug!("Gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_tag_appends_identity() {
        let message = Multipart::new().with("id").with("").with("command");
        let tagged = tag_request(message).unwrap();
        assert_eq!(
            tagged,
            Multipart::new().with("id").with("").with("command").with("id")
        );
    }

    #[test]
    fn test_missing_identity_dropped() {
        assert!(tag_request(Multipart::new()).is_none());
        assert!(tag_request(Multipart::new().with("").with("command")).is_none());
    }

    #[test]
    fn test_empty_body_dropped() {
        assert!(tag_request(Multipart::new().with("id")).is_none());
        assert!(tag_request(Multipart::new().with("id").with("")).is_none());
        assert!(tag_request(Multipart::new().with("id").with("").with(Bytes::new())).is_none());
    }

    #[tokio::test]
    async fn test_empty_body_never_reaches_fabric() {
        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let (_outbound_tx, outbound_rx) = mpsc::channel(4);
        let (requests_tx, mut requests_rx) = mpsc::unbounded_channel();
        let table = Arc::new(ConnectionTable::new());
        let (conn_tx, mut conn_rx) = mpsc::channel(4);
        table.register(ConnectionId::from("caller"), conn_tx);

        let cancel = CancellationToken::new();
        let gateway = Gateway::new(inbound_rx, outbound_rx, requests_tx, table);
        let task = tokio::spawn(gateway.run(cancel.clone()));

        inbound_tx.send(Multipart::new().with("caller").with("")).await.unwrap();
        inbound_tx
            .send(Multipart::new().with("caller").with("").with("real"))
            .await
            .unwrap();

        // Only the second message comes through
        let forwarded = requests_rx.recv().await.unwrap();
        assert_eq!(forwarded.get(2).unwrap().as_ref(), b"real");
        assert!(requests_rx.try_recv().is_err());
        assert!(conn_rx.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_outbound_routed_to_connection() {
        let (_inbound_tx, inbound_rx) = mpsc::channel(4);
        let (outbound_tx, outbound_rx) = mpsc::channel(4);
        let (requests_tx, _requests_rx) = mpsc::unbounded_channel();
        let table = Arc::new(ConnectionTable::new());
        let (conn_tx, mut conn_rx) = mpsc::channel(4);
        table.register(ConnectionId::from("caller"), conn_tx);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Gateway::new(inbound_rx, outbound_rx, requests_tx, table).run(cancel.clone()));

        outbound_tx
            .send(Multipart::new().with("caller").with("").with("reply"))
            .await
            .unwrap();
        assert_eq!(
            conn_rx.recv().await.unwrap(),
            Multipart::new().with("").with("reply")
        );

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_gateway_and_fabric_progress_with_full_queues() {
        use crate::dispatch::{DispatchFabric, WorkerEvent};
        use std::time::Duration;

        const REQUESTS: usize = 50;
        const PUSHES: usize = 50;

        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let table = Arc::new(ConnectionTable::new());
        let (conn_tx, mut conn_rx) = mpsc::channel(REQUESTS + PUSHES);
        table.register(ConnectionId::from("caller"), conn_tx);

        let cancel = CancellationToken::new();
        let (fabric, mut links) = DispatchFabric::new(1, requests_rx, outbound_tx.clone());
        let gateway = Gateway::new(inbound_rx, outbound_rx, requests_tx, table);
        let fabric_task = tokio::spawn(fabric.run(cancel.clone()));
        let gateway_task = tokio::spawn(gateway.run(cancel.clone()));

        // Echo worker: the request itself is the reply
        let mut link = links.remove(0);
        tokio::spawn(async move {
            link.events.send(WorkerEvent::Ready(link.id)).await.unwrap();
            while let Some(job) = link.jobs.recv().await {
                let reply = Some(job);
                if link.events.send(WorkerEvent::Done { worker: link.id, reply }).await.is_err() {
                    break;
                }
            }
        });

        // Pushes compete with replies for the single outbound slot
        tokio::spawn(async move {
            for n in 0..PUSHES {
                let push = Multipart::new().with("caller").with("").with(format!("push-{}", n));
                if outbound_tx.send(push).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            for n in 0..REQUESTS {
                let request = Multipart::new().with("caller").with("").with(format!("req-{}", n));
                inbound_tx.send(request).await.unwrap();
            }
        });

        let received = tokio::time::timeout(Duration::from_secs(5), async {
            let mut received = 0;
            while received < REQUESTS + PUSHES {
                conn_rx.recv().await.unwrap();
                received += 1;
            }
            received
        })
        .await
        .expect("gateway and fabric stalled");
        assert_eq!(received, REQUESTS + PUSHES);

        cancel.cancel();
        gateway_task.await.unwrap().unwrap();
        fabric_task.await.unwrap().unwrap();
    }
}
