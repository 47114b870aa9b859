//! Kafka subscriber that decodes probe results off the wire and forwards
//! them to a [`walt_storage::ResultSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use walt_config::KafkaConfig;
use walt_result::ProbeResult;
use walt_runtime::{retry_forever, RunAction, Runner};
use walt_storage::ResultSink;

pub struct Consumer {
    sink: Arc<dyn ResultSink>,
    interval: Duration,
    timeout: Duration,
    kafka: KafkaConfig,
    consumed: AtomicU64,
}

impl Consumer {
    pub fn new(sink: Arc<dyn ResultSink>, interval: Duration, timeout: Duration, kafka: KafkaConfig) -> Self {
        Self { sink, interval, timeout, kafka, consumed: AtomicU64::new(0) }
    }
}

#[async_trait]
impl RunAction for Consumer {
    async fn run_action(&self, runner: Arc<Runner>) {
        if let Err(e) = self.sink.connect().await {
            tracing::error!("Failed to connect storage sink: {:?}", e);
            return;
        }

        let kafka = self.kafka.clone();
        let timeout = self.timeout;
        let interval = self.interval;
        let base = self.interval.max(Duration::from_secs(1));
        let consumer: StreamConsumer = retry_forever(
            || {
                let kafka = kafka.clone();
                async move { build_consumer(&kafka, timeout, interval) }
            },
            base,
            "Kafka Consumer",
        )
        .await;

        let sink = self.sink.clone();
        runner
            .spawn(async move {
                consume_loop(consumer, sink, runner.clone()).await;
            })
            .await;
    }
}

fn build_consumer(kafka: &KafkaConfig, timeout: Duration, interval: Duration) -> Result<StreamConsumer, KafkaError> {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &kafka.uri)
        .set("group.id", "walt-consumer")
        .set("request.timeout.ms", (timeout.as_millis() as u64).to_string())
        .set("retry.backoff.ms", (interval.as_millis() as u64).to_string())
        .set("enable.partition.eof", "false");
    apply_tls(&mut config, kafka);

    let consumer: StreamConsumer = config.create()?;
    consumer.subscribe(&[kafka.topic.as_str()])?;
    Ok(consumer)
}

fn apply_tls(config: &mut ClientConfig, kafka: &KafkaConfig) {
    if kafka.cafile.is_empty() && kafka.certfile.is_empty() && kafka.keyfile.is_empty() {
        return;
    }
    config
        .set("security.protocol", "SSL")
        .set("ssl.ca.location", &kafka.cafile)
        .set("ssl.certificate.location", &kafka.certfile)
        .set("ssl.key.location", &kafka.keyfile);
}

async fn consume_loop(consumer: StreamConsumer, sink: Arc<dyn ResultSink>, runner: Arc<Runner>) {
    let mut stream = consumer.stream();
    let mut total: u64 = 0;
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Kafka stream error: {}", e);
                continue;
            }
        };
        let Some(payload) = message.payload() else {
            tracing::warn!("Received message with no payload, skipping");
            continue;
        };

        match ProbeResult::decode(payload) {
            Ok(result) => {
                if let Err(e) = sink.save(&result).await {
                    tracing::error!("Failed to save result for {}: {:?}", result.url, e);
                }
                total += 1;
                runner.incr_counter().await;
            }
            Err(e) => tracing::error!("Skipping malformed message: {}", e),
        }
    }
    tracing::info!("Consumed {} messages total", total);
    sink.disconnect().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_tls_is_a_no_op_with_no_cert_paths() {
        let kafka = KafkaConfig::default();
        let mut config = ClientConfig::new();
        apply_tls(&mut config, &kafka);
        assert!(config.get("security.protocol").is_none());
    }

    #[test]
    fn apply_tls_sets_ssl_options_when_any_cert_path_present() {
        let kafka = KafkaConfig { keyfile: "key.pem".to_string(), ..KafkaConfig::default() };
        let mut config = ClientConfig::new();
        apply_tls(&mut config, &kafka);
        assert_eq!(config.get("security.protocol"), Some("SSL"));
    }

    struct RecordingSink {
        saved: tokio::sync::Mutex<Vec<ProbeResult>>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn save(&self, result: &ProbeResult) -> anyhow::Result<()> {
            self.saved.lock().await.push(result.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn decode_failure_is_skipped_not_fatal() {
        let sink = Arc::new(RecordingSink { saved: tokio::sync::Mutex::new(Vec::new()) });
        let good = b"1\nwow.web\n0.359\n200\n2\n719".to_vec();
        let bad = b"not a valid record".to_vec();

        for payload in [bad, good] {
            match ProbeResult::decode(&payload) {
                Ok(result) => sink.save(&result).await.unwrap(),
                Err(_) => continue,
            }
        }

        assert_eq!(sink.saved.lock().await.len(), 1);
    }
}
