use crate::error::NotifyError;
use crate::types::{NotificationMessage, NotificationSeverity};
use chrono::{DateTime, Utc};
use medic_core::{NotificationConfig, NotificationSinkKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2,
        }
    }
}

impl From<&NotificationConfig> for RetryConfig {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            initial_delay_ms: config.retry_initial_delay_ms,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub notification_id: String,
    pub sink: NotificationSinkKind,
    pub payload: String,
    pub last_error: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Bounded queue of notifications no sink would accept. Oldest entries are
/// evicted first.
#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    entries: VecDeque<DeadLetterEntry>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
        }
    }

    pub fn push(&mut self, entry: DeadLetterEntry) {
        if self.max_size == 0 {
            return;
        }
        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}

pub fn exponential_backoff_delay_ms(config: &RetryConfig, attempt: u32) -> u64 {
    if attempt <= 1 {
        return config.initial_delay_ms;
    }

    let mut delay = config.initial_delay_ms;
    for _ in 1..attempt {
        delay = delay.saturating_mul(config.backoff_multiplier);
    }
    delay
}

fn should_retry(err: &NotifyError) -> bool {
    matches!(err, NotifyError::SinkFailed { .. })
}

fn build_dead_letter_entry(
    sink: &dyn NotificationSink,
    message: &NotificationMessage,
    attempts: u32,
    last_error: NotifyError,
) -> DeadLetterEntry {
    let payload = serde_json::to_string(message).unwrap_or_else(|e| {
        format!("{{\"error\":\"failed to serialize notification\",\"detail\":\"{e}\"}}")
    });

    DeadLetterEntry {
        notification_id: format!(
            "{:?}-{}-{}",
            message.topic,
            message.at.timestamp_millis(),
            message.title
        ),
        sink: sink.kind(),
        payload,
        last_error: last_error.to_string(),
        attempts,
        created_at: Utc::now(),
    }
}

/// Deliver with exponential backoff. Blocks the calling thread between attempts.
pub fn deliver_with_retry(
    sink: &dyn NotificationSink,
    message: &NotificationMessage,
    config: &RetryConfig,
) -> Result<(), Box<DeadLetterEntry>> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match sink.send(message) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        if attempt >= max_attempts || !should_retry(&err) {
            return Err(Box::new(build_dead_letter_entry(sink, message, attempt, err)));
        }

        let delay_ms = exponential_backoff_delay_ms(config, attempt);
        warn!(
            sink = ?sink.kind(),
            attempt = attempt + 1,
            max_attempts,
            delay_ms,
            error = %err,
            "retrying notification delivery"
        );
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms));
        }
        attempt += 1;
    }
}

pub trait NotificationSink: Send + Sync {
    fn kind(&self) -> NotificationSinkKind;
    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn render(message: &NotificationMessage) -> String {
        format!(
            "[{}] {:?} {} | session={} source={} | {}",
            message.severity.as_str(),
            message.topic,
            message.title,
            message
                .session_id
                .as_ref()
                .map(|id| id.0.as_str())
                .unwrap_or("-"),
            message.source.as_deref().unwrap_or("-"),
            message.body
        )
    }
}

impl NotificationSink for StdoutSink {
    fn kind(&self) -> NotificationSinkKind {
        NotificationSinkKind::Stdout
    }

    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        println!("{}", Self::render(message));
        Ok(())
    }
}

fn post_json(url: &str, timeout_secs: u64, payload: String, label: &str) -> Result<(), NotifyError> {
    let output = Command::new("curl")
        .arg("-sS")
        .arg("--fail")
        .arg("-m")
        .arg(timeout_secs.to_string())
        .arg("-X")
        .arg("POST")
        .arg("-H")
        .arg("Content-Type: application/json")
        .arg("-d")
        .arg(payload)
        .arg(url)
        .output()
        .map_err(|e| NotifyError::SinkFailed {
            message: format!("failed to execute curl for {label} sink: {e}"),
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(NotifyError::SinkFailed {
        message: format!(
            "{label} request failed (status {:?}): {}",
            output.status.code(),
            stderr.trim()
        ),
    })
}

#[derive(Debug, Clone)]
pub struct WebhookSink {
    pub url: String,
    pub timeout_secs: u64,
}

impl WebhookSink {
    pub fn build_payload(message: &NotificationMessage) -> serde_json::Value {
        serde_json::json!({
            "at": message.at.to_rfc3339(),
            "topic": message.topic,
            "severity": message.severity,
            "title": &message.title,
            "body": &message.body,
            "session_id": message.session_id.as_ref().map(|id| id.0.clone()),
            "source": &message.source,
        })
    }
}

impl NotificationSink for WebhookSink {
    fn kind(&self) -> NotificationSinkKind {
        NotificationSinkKind::Webhook
    }

    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&Self::build_payload(message)).map_err(|e| {
            NotifyError::SinkFailed {
                message: format!("failed to encode webhook payload: {e}"),
            }
        })?;
        post_json(&self.url, self.timeout_secs, payload, "webhook")
    }
}

/// Posts to a Slack incoming-webhook URL as a single mrkdwn section block.
#[derive(Debug, Clone)]
pub struct SlackSink {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub timeout_secs: u64,
}

impl SlackSink {
    pub fn build_payload(message: &NotificationMessage, channel: Option<&str>) -> serde_json::Value {
        let marker = match message.severity {
            NotificationSeverity::Info => ":information_source:",
            NotificationSeverity::Warning => ":warning:",
            NotificationSeverity::Error => ":red_circle:",
        };

        let session_label = message
            .session_id
            .as_ref()
            .map(|id| format!(" | session: `{id}`"))
            .unwrap_or_default();

        let text = format!("{marker} *{}*{session_label}\n{}", message.title, message.body);

        let mut payload = serde_json::json!({
            "text": text,
            "blocks": [
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": text
                    }
                }
            ]
        });

        if let Some(ch) = channel {
            payload["channel"] = serde_json::Value::String(ch.to_string());
        }

        payload
    }
}

impl NotificationSink for SlackSink {
    fn kind(&self) -> NotificationSinkKind {
        NotificationSinkKind::Slack
    }

    fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let payload = Self::build_payload(message, self.channel.as_deref());
        let payload = serde_json::to_string(&payload).map_err(|e| NotifyError::SinkFailed {
            message: format!("failed to encode Slack payload: {e}"),
        })?;
        post_json(&self.webhook_url, self.timeout_secs, payload, "Slack")
    }
}

pub struct NotificationDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
    retry_config: RetryConfig,
    dead_letters: Mutex<DeadLetterQueue>,
}

impl NotificationDispatcher {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self::with_retry_config(sinks, RetryConfig::default(), DeadLetterQueue::default().max_size)
    }

    pub fn with_retry_config(
        sinks: Vec<Box<dyn NotificationSink>>,
        retry_config: RetryConfig,
        dead_letter_limit: usize,
    ) -> Self {
        Self {
            sinks,
            retry_config,
            dead_letters: Mutex::new(DeadLetterQueue::new(dead_letter_limit)),
        }
    }

    /// Build the enabled sinks. A webhook or Slack sink without a URL is left
    /// out with a warning.
    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();
        for kind in &config.enabled_sinks {
            match kind {
                NotificationSinkKind::Stdout => sinks.push(Box::new(StdoutSink)),
                NotificationSinkKind::Webhook => match &config.webhook_url {
                    Some(url) => sinks.push(Box::new(WebhookSink {
                        url: url.clone(),
                        timeout_secs: config.timeout_secs,
                    })),
                    None => warn!("webhook sink enabled without webhook_url; skipping"),
                },
                NotificationSinkKind::Slack => match &config.slack_webhook_url {
                    Some(url) => sinks.push(Box::new(SlackSink {
                        webhook_url: url.clone(),
                        channel: config.slack_channel.clone(),
                        timeout_secs: config.timeout_secs,
                    })),
                    None => warn!("slack sink enabled without slack_webhook_url; skipping"),
                },
            }
        }
        Self::with_retry_config(sinks, RetryConfig::from(config), config.dead_letter_limit)
    }

    pub fn sink_kinds(&self) -> Vec<NotificationSinkKind> {
        self.sinks.iter().map(|sink| sink.kind()).collect()
    }

    fn dead_letters(&self) -> MutexGuard<'_, DeadLetterQueue> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn failed_notifications(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters().entries()
    }

    pub fn clear_failed_notifications(&self) {
        self.dead_letters().clear();
    }

    pub fn failed_notifications_len(&self) -> usize {
        self.dead_letters().len()
    }

    /// Fan a message out to every sink. A sink that exhausts its retries
    /// leaves a dead letter; the other sinks are unaffected.
    pub fn dispatch(
        &self,
        message: &NotificationMessage,
    ) -> Vec<(NotificationSinkKind, Result<(), NotifyError>)> {
        let mut out = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let result = match deliver_with_retry(sink.as_ref(), message, &self.retry_config) {
                Ok(()) => Ok(()),
                Err(dead_letter) => {
                    let error_message = dead_letter.last_error.clone();
                    self.dead_letters().push(*dead_letter);
                    Err(NotifyError::SinkFailed {
                        message: format!("delivery failed after retry attempts: {error_message}"),
                    })
                }
            };
            out.push((sink.kind(), result));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use medic_core::{NotificationConfig, NotificationSinkKind, SessionId};
    use std::sync::{Arc, Mutex};

    use super::{
        exponential_backoff_delay_ms, DeadLetterEntry, DeadLetterQueue, NotificationDispatcher,
        NotificationSink, RetryConfig, SlackSink, StdoutSink, WebhookSink,
    };
    use crate::error::NotifyError;
    use crate::types::{NotificationMessage, NotificationSeverity, NotificationTopic};

    #[derive(Clone)]
    struct CaptureSink {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl NotificationSink for CaptureSink {
        fn kind(&self) -> NotificationSinkKind {
            NotificationSinkKind::Stdout
        }

        fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
            self.seen
                .lock()
                .expect("capture lock")
                .push(message.title.clone());
            Ok(())
        }
    }

    struct AlwaysFailSink;

    impl NotificationSink for AlwaysFailSink {
        fn kind(&self) -> NotificationSinkKind {
            NotificationSinkKind::Webhook
        }

        fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            Err(NotifyError::SinkFailed {
                message: "fail".to_string(),
            })
        }
    }

    struct FlakySink {
        attempts: Arc<Mutex<u32>>,
        succeed_on: u32,
    }

    impl NotificationSink for FlakySink {
        fn kind(&self) -> NotificationSinkKind {
            NotificationSinkKind::Slack
        }

        fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            let mut attempts = self.attempts.lock().expect("flaky sink attempts lock");
            *attempts += 1;
            if *attempts >= self.succeed_on {
                Ok(())
            } else {
                Err(NotifyError::SinkFailed {
                    message: "transient failure".to_string(),
                })
            }
        }
    }

    fn no_delay() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 0,
            backoff_multiplier: 2,
        }
    }

    fn mk_dead_letter(id: &str) -> DeadLetterEntry {
        DeadLetterEntry {
            notification_id: id.to_string(),
            sink: NotificationSinkKind::Webhook,
            payload: "{}".to_string(),
            last_error: "boom".to_string(),
            attempts: 3,
            created_at: Utc::now(),
        }
    }

    fn mk_message() -> NotificationMessage {
        NotificationMessage {
            at: Utc::now(),
            topic: NotificationTopic::AlertRaised,
            severity: NotificationSeverity::Error,
            title: "error rate above threshold".to_string(),
            body: "details".to_string(),
            session_id: Some(SessionId::new("S1")),
            source: Some("aggregate".to_string()),
        }
    }

    #[test]
    fn dispatch_fans_out_and_returns_per_sink_results() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let dispatcher = NotificationDispatcher::with_retry_config(
            vec![
                Box::new(CaptureSink { seen: seen.clone() }),
                Box::new(AlwaysFailSink),
            ],
            no_delay(),
            10,
        );

        let results = dispatcher.dispatch(&mk_message());
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, NotificationSinkKind::Webhook);
        assert!(results[1].1.is_err());

        let captured = seen.lock().expect("capture lock");
        assert_eq!(captured.as_slice(), ["error rate above threshold"]);
    }

    #[test]
    fn from_config_skips_sinks_without_urls() {
        let dispatcher = NotificationDispatcher::from_config(&NotificationConfig {
            enabled_sinks: vec![
                NotificationSinkKind::Stdout,
                NotificationSinkKind::Webhook,
                NotificationSinkKind::Slack,
            ],
            slack_webhook_url: Some("https://hooks.slack.test/services/x".to_string()),
            ..NotificationConfig::default()
        });
        assert_eq!(
            dispatcher.sink_kinds(),
            vec![NotificationSinkKind::Stdout, NotificationSinkKind::Slack]
        );
    }

    #[test]
    fn from_config_with_no_sinks_dispatches_to_none() {
        let dispatcher = NotificationDispatcher::from_config(&NotificationConfig {
            enabled_sinks: Vec::new(),
            ..NotificationConfig::default()
        });
        assert!(dispatcher.dispatch(&mk_message()).is_empty());
    }

    #[test]
    fn stdout_render_includes_session_and_source() {
        let line = StdoutSink::render(&mk_message());
        assert!(line.starts_with("[error]"));
        assert!(line.contains("session=S1"));
        assert!(line.contains("source=aggregate"));
    }

    #[test]
    fn webhook_payload_carries_session_id() {
        let payload = WebhookSink::build_payload(&mk_message());
        assert_eq!(payload["session_id"], "S1");
        assert_eq!(payload["topic"], "alert_raised");
        assert_eq!(payload["severity"], "error");
    }

    #[test]
    fn slack_payload_marks_severity_and_session() {
        let payload = SlackSink::build_payload(&mk_message(), None);
        let text = payload["text"].as_str().expect("text field");
        assert!(text.contains(":red_circle:"));
        assert!(text.contains("S1"));
        assert!(payload.get("channel").is_none());

        let mut info = mk_message();
        info.severity = NotificationSeverity::Info;
        let payload = SlackSink::build_payload(&info, Some("#ops"));
        assert_eq!(payload["channel"], "#ops");
        assert!(payload["text"]
            .as_str()
            .is_some_and(|text| text.contains(":information_source:")));
    }

    #[test]
    fn retry_succeeds_on_second_attempt() {
        let attempts = Arc::new(Mutex::new(0));
        let dispatcher = NotificationDispatcher::with_retry_config(
            vec![Box::new(FlakySink {
                attempts: attempts.clone(),
                succeed_on: 2,
            })],
            no_delay(),
            10,
        );

        let results = dispatcher.dispatch(&mk_message());
        assert!(results[0].1.is_ok());
        assert_eq!(*attempts.lock().expect("attempts lock"), 2);
        assert_eq!(dispatcher.failed_notifications_len(), 0);
    }

    #[test]
    fn retry_exhausts_attempts_to_dead_letter() {
        let dispatcher =
            NotificationDispatcher::with_retry_config(vec![Box::new(AlwaysFailSink)], no_delay(), 10);

        let results = dispatcher.dispatch(&mk_message());
        assert!(results[0].1.is_err());

        let failed = dispatcher.failed_notifications();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 3);
        assert_eq!(failed[0].sink, NotificationSinkKind::Webhook);

        dispatcher.clear_failed_notifications();
        assert_eq!(dispatcher.failed_notifications_len(), 0);
    }

    #[test]
    fn not_configured_error_is_not_retried() {
        struct Unconfigured(Arc<Mutex<u32>>);
        impl NotificationSink for Unconfigured {
            fn kind(&self) -> NotificationSinkKind {
                NotificationSinkKind::Webhook
            }
            fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
                *self.0.lock().expect("calls lock") += 1;
                Err(NotifyError::SinkNotConfigured {
                    sink: "webhook".to_string(),
                })
            }
        }

        let calls = Arc::new(Mutex::new(0));
        let dispatcher = NotificationDispatcher::with_retry_config(
            vec![Box::new(Unconfigured(calls.clone()))],
            no_delay(),
            10,
        );
        dispatcher.dispatch(&mk_message());
        assert_eq!(*calls.lock().expect("calls lock"), 1);
        assert_eq!(dispatcher.failed_notifications()[0].attempts, 1);
    }

    #[test]
    fn dead_letter_queue_respects_max_size() {
        let mut queue = DeadLetterQueue::new(2);
        queue.push(mk_dead_letter("n1"));
        queue.push(mk_dead_letter("n2"));
        queue.push(mk_dead_letter("n3"));

        let ids: Vec<String> = queue
            .entries()
            .into_iter()
            .map(|entry| entry.notification_id)
            .collect();
        assert_eq!(ids, vec!["n2", "n3"]);

        let mut disabled = DeadLetterQueue::new(0);
        disabled.push(mk_dead_letter("n4"));
        assert!(disabled.is_empty());
    }

    #[test]
    fn exponential_backoff_calculation() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2,
        };

        assert_eq!(exponential_backoff_delay_ms(&config, 1), 1000);
        assert_eq!(exponential_backoff_delay_ms(&config, 2), 2000);
        assert_eq!(exponential_backoff_delay_ms(&config, 3), 4000);
    }
}
