//! Concurrent URL prober that publishes classified probe outcomes to Kafka.
//!
//! Mirrors the original's worker-pool design: a fixed number of workers
//! pop a URL off a rotating queue, probe it, publish the result, then
//! re-enqueue the same URL so the set of targets is revisited forever at
//! roughly `interval` second intervals per worker.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use regex::{Regex, RegexBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tokio::sync::Mutex;
use walt_config::{Config, KafkaConfig};
use walt_result::{Pattern, ProbeResult, ResultKind};
use walt_runtime::{retry_forever, RunAction, Runner};

/// Compiled URL → pattern table. A `None` pattern means the URL has no
/// content check configured; a pattern string that failed to compile is
/// also stored as `None`, with the compile failure logged once at startup.
pub type CompiledUrlMap = BTreeMap<String, Option<Regex>>;

fn compile_url_patterns(url_map: &BTreeMap<String, String>) -> CompiledUrlMap {
    url_map
        .iter()
        .map(|(url, pattern)| {
            let compiled = if pattern.is_empty() {
                None
            } else {
                match RegexBuilder::new(pattern).multi_line(true).build() {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::error!("Invalid pattern {:?} for {}: {}", pattern, url, e);
                        None
                    }
                }
            };
            (url.clone(), compiled)
        })
        .collect()
}

/// A rotating queue of URLs to probe, seeded once at startup. A single URL
/// is enqueued twice so a lone worker always has a next item while it is
/// still processing the one it just popped.
struct UrlQueue {
    items: Mutex<VecDeque<String>>,
}

impl UrlQueue {
    fn new(urls: impl Iterator<Item = String>) -> Self {
        let mut items: VecDeque<String> = urls.collect();
        if items.len() == 1 {
            let only = items[0].clone();
            items.push_back(only);
        }
        Self { items: Mutex::new(items) }
    }

    async fn pop(&self) -> String {
        let mut items = self.items.lock().await;
        items.pop_front().expect("UrlQueue is never fully drained: every pop re-enqueues")
    }

    async fn push(&self, url: String) {
        self.items.lock().await.push_back(url);
    }
}

pub struct Producer {
    headers: HeaderMap,
    interval: Duration,
    concurrent: u32,
    timeout: Duration,
    kafka: KafkaConfig,
    url_map: CompiledUrlMap,
}

impl Producer {
    pub fn new(cfg: &Config) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&cfg.user_agent).unwrap_or(HeaderValue::from_static("")));
        for (k, v) in &cfg.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(k.as_str()), HeaderValue::from_str(v)) {
                headers.insert(name, value);
            }
        }

        Self {
            headers,
            interval: Duration::from_secs(cfg.interval),
            concurrent: cfg.concurrent,
            timeout: Duration::from_secs(cfg.timeout),
            kafka: cfg.kafka.clone(),
            url_map: compile_url_patterns(&cfg.url_map),
        }
    }
}

#[async_trait]
impl RunAction for Producer {
    async fn run_action(&self, runner: Arc<Runner>) {
        if self.url_map.is_empty() {
            tracing::warn!("No URLs configured, nothing to do");
            return;
        }

        let kafka = self.kafka.clone();
        let base = self.interval.max(Duration::from_secs(1));
        let producer: FutureProducer = retry_forever(
            || {
                let kafka = kafka.clone();
                let timeout = self.timeout;
                async move { build_producer(&kafka, timeout) }
            },
            base,
            "Kafka Producer",
        )
        .await;
        let producer = Arc::new(producer);

        let client = reqwest::Client::builder()
            .default_headers(self.headers.clone())
            .build()
            .expect("reqwest client configuration is always valid");

        let queue = Arc::new(UrlQueue::new(self.url_map.keys().cloned()));
        let patterns = Arc::new(self.url_map.clone());
        let topic = Arc::new(self.kafka.topic.clone());

        for i in 0..self.concurrent {
            let worker_name = format!("producer-{}", i + 1);
            let client = client.clone();
            let queue = queue.clone();
            let patterns = patterns.clone();
            let producer = producer.clone();
            let topic = topic.clone();
            let runner = runner.clone();
            let timeout = self.timeout;
            let interval = self.interval;

            runner
                .spawn(async move {
                    worker_loop(worker_name, client, queue, patterns, producer, topic, timeout, interval, runner).await;
                })
                .await;
        }
    }
}

fn build_producer(kafka: &KafkaConfig, timeout: Duration) -> Result<FutureProducer, rdkafka::error::KafkaError> {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &kafka.uri)
        .set("request.timeout.ms", (timeout.as_millis() as u64).to_string());
    apply_tls(&mut config, kafka);
    config.create()
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

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    name: String,
    client: reqwest::Client,
    queue: Arc<UrlQueue>,
    patterns: Arc<CompiledUrlMap>,
    producer: Arc<FutureProducer>,
    topic: Arc<String>,
    timeout: Duration,
    interval: Duration,
    runner: Arc<Runner>,
) {
    tracing::debug!("Starting worker {}", name);
    loop {
        let url = queue.pop().await;
        let result = probe(&client, &url, timeout, patterns.get(&url).and_then(Option::as_ref)).await;

        let payload = result.encode();
        let record = FutureRecord::to(&topic).payload(payload.as_slice());
        // A non-zero queue timeout lets a momentarily-full local librdkafka
        // queue drain briefly instead of dropping the record on transient
        // backpressure; only a genuine broker-side failure should be
        // treated as a publish failure.
        if let Err((e, _)) = producer.send(record, timeout).await {
            tracing::error!("Failed to publish result for {}: {}", url, e);
        }

        queue.push(url).await;
        runner.incr_counter().await;
        tokio::time::sleep(interval).await;
    }
}

async fn probe(client: &reqwest::Client, url: &str, timeout: Duration, pattern: Option<&Regex>) -> ProbeResult {
    let start = Instant::now();
    match client.get(url).timeout(timeout).send().await {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let verdict = evaluate_pattern(pattern, &body);
            ProbeResult::success(url, start.elapsed().as_secs_f64(), status_code, verdict)
        }
        Err(e) if e.is_connect() || e.is_request() => {
            tracing::error!("Client error probing {}: {}", url, e);
            ProbeResult::failure(ResultKind::ClientError, url)
        }
        Err(e) if e.is_timeout() => {
            tracing::error!("Timeout probing {}: {}", url, e);
            ProbeResult::failure(ResultKind::TimeoutError, url)
        }
        Err(e) => {
            tracing::error!("Error probing {}: {:?}", url, e);
            ProbeResult::failure(ResultKind::Error, url)
        }
    }
}

fn evaluate_pattern(pattern: Option<&Regex>, body: &str) -> Pattern {
    match pattern {
        None => Pattern::NoPattern,
        Some(re) if re.is_match(body) => Pattern::Found,
        Some(_) => Pattern::NotFound,
    }
}
