//! Serializes outbound completion calls to respect upstream rate limits.
//!
//! One worker task owns a FIFO queue. Every request carries an absolute
//! deadline; a transient failure puts it back in the queue no earlier than
//! the minimum retry interval, a 429 puts it back after a short fixed delay
//! without counting as an attempt. Requests that cannot finish before their
//! deadline fail with `Timeout`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::{CompletionProvider, CompletionRequest};
use crate::config::SchedulerConfig;
use crate::error::{EngineError, Result};

struct Job {
    request: CompletionRequest,
    deadline: Instant,
    not_before: Instant,
    attempts: u32,
    last_error: Option<EngineError>,
    reply: oneshot::Sender<Result<String>>,
}

impl Job {
    fn fail_timeout(self) {
        let detail = match &self.last_error {
            Some(e) => format!(
                "deadline exceeded after {} attempts; last error: {}",
                self.attempts, e
            ),
            None => format!("deadline exceeded after {} attempts", self.attempts),
        };
        let _ = self.reply.send(Err(EngineError::Timeout(detail)));
    }
}

/// Rate-limited front for another provider. Implements `CompletionProvider`
/// itself, so callers do not know it is there.
pub struct RequestScheduler {
    sender: mpsc::UnboundedSender<Job>,
    deadline: Duration,
}

impl RequestScheduler {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(provider: Arc<dyn CompletionProvider>, config: &SchedulerConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            provider,
            receiver,
            queue: VecDeque::new(),
            min_retry_interval: Duration::from_secs(config.min_retry_interval_secs),
            rate_limit_delay: Duration::from_millis(config.rate_limit_delay_ms),
            closed: false,
        };
        tokio::spawn(worker.run());

        Self {
            sender,
            deadline: Duration::from_secs(config.deadline_secs),
        }
    }
}

#[async_trait]
impl CompletionProvider for RequestScheduler {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let (reply, response) = oneshot::channel();
        let now = Instant::now();
        let job = Job {
            request: request.clone(),
            deadline: now + self.deadline,
            not_before: now,
            attempts: 0,
            last_error: None,
            reply,
        };
        self.sender
            .send(job)
            .map_err(|_| EngineError::Provider("request scheduler has stopped".to_string()))?;

        response
            .await
            .map_err(|_| {
                EngineError::Provider("request scheduler dropped the request".to_string())
            })?
    }

    fn name(&self) -> &str {
        "request-scheduler"
    }
}

struct Worker {
    provider: Arc<dyn CompletionProvider>,
    receiver: mpsc::UnboundedReceiver<Job>,
    queue: VecDeque<Job>,
    min_retry_interval: Duration,
    rate_limit_delay: Duration,
    closed: bool,
}

impl Worker {
    async fn run(mut self) {
        loop {
            while let Ok(job) = self.receiver.try_recv() {
                self.queue.push_back(job);
            }

            let now = Instant::now();
            self.expire(now);

            if let Some(index) = self.queue.iter().position(|job| job.not_before <= now) {
                if let Some(job) = self.queue.remove(index) {
                    self.attempt(job).await;
                }
                continue;
            }

            let wake_at = self.queue.iter().map(|job| job.not_before.min(job.deadline)).min();

            match (wake_at, self.closed) {
                (None, true) => {
                    tracing::debug!("Request scheduler stopped");
                    return;
                }
                (None, false) => match self.receiver.recv().await {
                    Some(job) => self.queue.push_back(job),
                    None => self.closed = true,
                },
                (Some(at), true) => tokio::time::sleep_until(at).await,
                (Some(at), false) => {
                    tokio::select! {
                        received = self.receiver.recv() => match received {
                            Some(job) => self.queue.push_back(job),
                            None => self.closed = true,
                        },
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
            }
        }
    }

    /// Fail every queued job whose deadline has passed, and forget jobs whose
    /// caller went away.
    fn expire(&mut self, now: Instant) {
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for job in self.queue.drain(..) {
            if job.reply.is_closed() {
                continue;
            }
            if job.deadline <= now {
                job.fail_timeout();
            } else {
                kept.push_back(job);
            }
        }
        self.queue = kept;
    }

    async fn attempt(&mut self, mut job: Job) {
        if job.reply.is_closed() {
            return;
        }

        let remaining = job.deadline.saturating_duration_since(Instant::now());
        let outcome = tokio::time::timeout(remaining, self.provider.complete(&job.request)).await;
        let now = Instant::now();

        match outcome {
            Err(_) => {
                job.attempts += 1;
                job.fail_timeout();
            }
            Ok(Ok(text)) => {
                let _ = job.reply.send(Ok(text));
            }
            Ok(Err(EngineError::RateLimited(detail))) => {
                tracing::warn!(
                    delay_ms = self.rate_limit_delay.as_millis() as u64,
                    detail = %detail,
                    "Rate limited, rescheduling request"
                );
                job.not_before = now + self.rate_limit_delay;
                job.last_error = Some(EngineError::RateLimited(detail));
                self.requeue(job);
            }
            Ok(Err(error)) if error.is_transient() => {
                job.attempts += 1;
                tracing::warn!(
                    attempt = job.attempts,
                    error = %error,
                    "Transient provider failure, rescheduling request"
                );
                job.not_before = now + self.min_retry_interval;
                job.last_error = Some(error);
                self.requeue(job);
            }
            Ok(Err(error)) => {
                tracing::error!(error = %error, "Provider rejected request");
                let _ = job.reply.send(Err(error));
            }
        }
    }

    fn requeue(&mut self, job: Job) {
        if job.not_before >= job.deadline {
            job.fail_timeout();
        } else {
            self.queue.push_back(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String>>>,
        fallback: Result<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String>>, fallback: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            if let crate::llm::CompletionInput::Prompt(prompt) = &request.input {
                self.prompts.lock().push(prompt.clone());
            }
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            min_retry_interval_secs: 30,
            deadline_secs: 180,
            rate_limit_delay_ms: 2000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_reschedules_after_short_delay() {
        let provider = ScriptedProvider::new(
            vec![Err(EngineError::RateLimited("429".into()))],
            Ok("done".into()),
        );
        let scheduler = RequestScheduler::spawn(provider.clone(), &config());

        let started = Instant::now();
        let result = scheduler.complete(&CompletionRequest::prompt("hi", 8)).await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(provider.calls(), 2);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_wait_retry_interval_then_time_out() {
        let provider = ScriptedProvider::new(vec![], Err(EngineError::Provider("502".into())));
        let scheduler = RequestScheduler::spawn(provider.clone(), &config());

        let result = scheduler.complete(&CompletionRequest::prompt("hi", 8)).await;

        assert!(matches!(result, Err(EngineError::Timeout(_))));
        // attempts at 0s, 30s, ..., 150s; the next slot would reach the deadline
        assert_eq!(provider.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_then_success() {
        let provider = ScriptedProvider::new(
            vec![Err(EngineError::Timeout("slow".into()))],
            Ok("ok".into()),
        );
        let scheduler = RequestScheduler::spawn(provider.clone(), &config());

        let started = Instant::now();
        let result = scheduler.complete(&CompletionRequest::prompt("hi", 8)).await;

        assert_eq!(result.unwrap(), "ok");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let provider =
            ScriptedProvider::new(vec![], Err(EngineError::ProviderFatal("401".into())));
        let scheduler = RequestScheduler::spawn(provider.clone(), &config());

        let result = scheduler.complete(&CompletionRequest::prompt("hi", 8)).await;

        assert!(matches!(result, Err(EngineError::ProviderFatal(_))));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_served_in_order() {
        let provider = ScriptedProvider::new(vec![], Ok("ok".into()));
        let scheduler = RequestScheduler::spawn(provider.clone(), &config());

        let first = CompletionRequest::prompt("first", 8);
        let second = CompletionRequest::prompt("second", 8);
        let (a, b) = tokio::join!(scheduler.complete(&first), scheduler.complete(&second));

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(*provider.prompts.lock(), vec!["first".to_string(), "second".to_string()]);
    }
}
