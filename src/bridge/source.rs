//! Broker record sources.
//!
//! The bridge reads records through [`RecordSource`] so the consume loop
//! does not depend on a live broker. [`KafkaConnector`] is the production
//! implementation on top of `rdkafka`.

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One record as read from the broker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerRecord {
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

impl BrokerRecord {
    pub fn new(key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            payload: Some(payload.into()),
            ..Default::default()
        }
    }
}

/// Broker errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Topic {topic} has no partition {partition}")]
    TopicMissing { topic: String, partition: i32 },

    #[error("Failed to consume record: {0}")]
    Consume(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// A live subscription yielding records in partition order
#[async_trait]
pub trait RecordSource: Send {
    /// Next record, `None` once the subscription has ended
    async fn next_record(&mut self) -> Option<Result<BrokerRecord, BrokerError>>;
}

/// Establishes subscriptions; called again on every retry
#[async_trait]
pub trait SourceConnector: Send + Sync {
    type Source: RecordSource + 'static;

    async fn connect(&self) -> Result<Self::Source, BrokerError>;
}

/// Kafka subscription settings
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: String,
    pub topic: String,
    pub partition: i32,
    pub group_id: String,
    pub metadata_timeout: Duration,
}

/// Connects to one Kafka topic/partition at its newest offset
pub struct KafkaConnector {
    settings: KafkaSettings,
}

impl KafkaConnector {
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SourceConnector for KafkaConnector {
    type Source = KafkaSource;

    async fn connect(&self) -> Result<KafkaSource, BrokerError> {
        let s = &self.settings;

        // Offsets are never committed: a restart resumes at the newest record
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &s.brokers)
            .set("group.id", &s.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "latest")
            .create()?;
        let consumer = Arc::new(consumer);

        // librdkafka's metadata call blocks
        let probe = Arc::clone(&consumer);
        let topic = s.topic.clone();
        let partition = s.partition;
        let timeout = s.metadata_timeout;
        let found = tokio::task::spawn_blocking(move || -> Result<bool, KafkaError> {
            let metadata = probe.fetch_metadata(Some(topic.as_str()), timeout)?;
            Ok(metadata.topics().iter().any(|t| {
                t.name() == topic
                    && t.error().is_none()
                    && t.partitions().iter().any(|p| p.id() == partition)
            }))
        })
        .await
        .map_err(|e| BrokerError::Connect(e.to_string()))??;

        if !found {
            return Err(BrokerError::TopicMissing {
                topic: s.topic.clone(),
                partition: s.partition,
            });
        }

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(&s.topic, s.partition, Offset::End)?;
        consumer.assign(&assignment)?;

        tracing::info!(
            brokers = %s.brokers,
            topic = %s.topic,
            partition = s.partition,
            "Assigned broker partition at newest offset"
        );

        Ok(KafkaSource { consumer })
    }
}

/// Assigned Kafka partition
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn next_record(&mut self) -> Option<Result<BrokerRecord, BrokerError>> {
        let record = match self.consumer.recv().await {
            Ok(msg) => Ok(BrokerRecord {
                key: msg.key().map(<[u8]>::to_vec),
                payload: msg.payload().map(<[u8]>::to_vec),
                partition: msg.partition(),
                offset: msg.offset(),
            }),
            Err(e) => Err(BrokerError::Consume(e.to_string())),
        };
        Some(record)
    }
}
