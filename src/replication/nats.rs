//! NATS JetStream `Replicator`. Grounded on `internal/replication/nats.go`:
//! same subject convention (`<stream>.changes.<workspace_id>`), same
//! durable consumer naming (`etherply-<server_id>`), same retention
//! (24h / 1GiB, `LimitsPolicy`, file storage), same loop-suppression rule
//! (drop-and-ack events whose `origin_server_id` is our own), and the same
//! `Close()` contract: signal the delivery loop, then wait for it to
//! actually exit (the Go original's `r.wg.Wait()`) before flushing the
//! connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::AckPolicy, consumer::DeliverPolicy, stream::RetentionPolicy, stream::StorageType};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::{ChangeEvent, ChangeHandler, Replica, ReplicationConfig, Replicator};
use crate::error::{Result, SyncError};

const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 3600);
const STREAM_MAX_BYTES: i64 = 1024 * 1024 * 1024;
const FETCH_BATCH: usize = 10;
const FETCH_MAX_WAIT: Duration = Duration::from_secs(5);

pub struct NatsReplicator {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    stream: jetstream::stream::Stream,
    config: ReplicationConfig,
    peers: RwLock<Vec<Replica>>,
    healthy: AtomicBool,
    shutdown: Arc<Notify>,
    delivery_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NatsReplicator {
    pub async fn connect(config: ReplicationConfig) -> Result<Self> {
        if config.server_id.is_empty() {
            return Err(SyncError::InvalidArgument("server_id is required".into()));
        }
        if config.region.is_empty() {
            return Err(SyncError::InvalidArgument("region is required".into()));
        }
        if config.nats_urls.is_empty() {
            return Err(SyncError::InvalidArgument(
                "at least one NATS URL is required".into(),
            ));
        }

        let client = async_nats::ConnectOptions::new()
            .name(&config.server_id)
            .reconnect_delay_callback(move |_| config.reconnect_wait)
            .connect(config.nats_urls.join(","))
            .await
            .map_err(|e| SyncError::Unavailable(format!("failed to connect to NATS: {e}")))?;

        let jetstream = jetstream::new(client.clone());

        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                description: Some("EtherPly cross-region replication events".to_string()),
                subjects: vec![format!("{}.>", config.stream_name)],
                retention: RetentionPolicy::Limits,
                max_age: STREAM_MAX_AGE,
                max_bytes: STREAM_MAX_BYTES,
                num_replicas: 1,
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| SyncError::Unavailable(format!("failed to create/update stream: {e}")))?;

        let self_peer = Replica {
            id: config.server_id.clone(),
            endpoint: config.nats_urls[0].clone(),
            region: config.region.clone(),
            last_seen_unix_ms: 0,
        };

        Ok(Self {
            client,
            jetstream,
            stream,
            config,
            peers: RwLock::new(vec![self_peer]),
            healthy: AtomicBool::new(true),
            shutdown: Arc::new(Notify::new()),
            delivery_task: parking_lot::Mutex::new(None),
        })
    }
}

#[async_trait]
impl Replicator for NatsReplicator {
    async fn broadcast(&self, event: ChangeEvent) -> Result<()> {
        if !self.healthy() {
            return Err(SyncError::Unavailable("replicator is not healthy".into()));
        }

        let subject = format!("{}.changes.{}", self.config.stream_name, event.workspace_id);
        let data =
            serde_json::to_vec(&event).map_err(|e| SyncError::Internal(e.to_string()))?;

        let ack = self
            .jetstream
            .publish(subject, data.into())
            .await
            .map_err(|e| SyncError::Unavailable(format!("failed to publish change event: {e}")))?;
        ack.await
            .map_err(|e| SyncError::Unavailable(format!("publish was not acked: {e}")))?;
        Ok(())
    }

    async fn subscribe(&self, handler: Box<dyn ChangeHandler>) -> Result<()> {
        let consumer = self
            .stream
            .get_or_create_consumer(
                &self.config.consumer_durable_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(self.config.consumer_durable_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    deliver_policy: DeliverPolicy::New,
                    filter_subject: format!("{}.changes.>", self.config.stream_name),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SyncError::Unavailable(format!("failed to create consumer: {e}")))?;

        let server_id = self.config.server_id.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                let fetch = consumer
                    .fetch()
                    .max_messages(FETCH_BATCH)
                    .expires(FETCH_MAX_WAIT)
                    .messages();

                let mut messages = tokio::select! {
                    _ = shutdown.notified() => return,
                    result = fetch => match result {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(error = %e, "replication fetch failed");
                            continue;
                        }
                    },
                };

                while let Some(next) = messages.next().await {
                    let message = match next {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(error = %e, "replication message iteration error");
                            continue;
                        }
                    };

                    let event: ChangeEvent = match serde_json::from_slice(&message.payload) {
                        Ok(e) => e,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to decode replicated change event");
                            let _ = message.ack().await;
                            continue;
                        }
                    };

                    if event.origin_server_id == server_id {
                        let _ = message.ack().await;
                        continue;
                    }

                    match handler.handle(event.clone()).await {
                        Ok(()) => {
                            let _ = message.ack().await;
                        }
                        Err(e) => {
                            tracing::error!(
                                workspace_id = %event.workspace_id,
                                error = %e,
                                "replication handler failed, will redeliver"
                            );
                            let _ = message
                                .ack_with(async_nats::jetstream::AckKind::Nak(None))
                                .await;
                        }
                    }
                }
            }
        });

        *self.delivery_task.lock() = Some(handle);

        Ok(())
    }

    fn peers(&self) -> Vec<Replica> {
        self.peers.read().clone()
    }

    fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed) && self.client.connection_state() == async_nats::connection::State::Connected
    }

    async fn close(&self) -> Result<()> {
        self.healthy.store(false, Ordering::Relaxed);
        self.shutdown.notify_waiters();

        let handle = self.delivery_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "delivery loop task panicked during shutdown");
            }
        }

        self.client
            .flush()
            .await
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(())
    }
}
