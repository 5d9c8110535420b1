use async_trait::async_trait;
use onbid_storage::BackoffPolicy;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mail api rejected message: {status} {body}")]
    Api { status: u16, body: String },
    #[error("mail delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: String },
}

/// Outbound mail collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

#[derive(Serialize)]
struct Sender<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct Recipient<'a> {
    email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Payload<'a> {
    sender: Sender<'a>,
    to: Vec<Recipient<'a>>,
    subject: &'a str,
    text_content: &'a str,
}

/// Transactional-mail HTTP API client (JSON body, `api-key` header).
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    sender_email: String,
    sender_name: String,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: String, sender_email: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            sender_email,
            sender_name: "Onbid 알림".to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let payload = Payload {
            sender: Sender {
                name: &self.sender_name,
                email: &self.sender_email,
            },
            to: vec![Recipient { email: to }],
            subject,
            text_content: body,
        };

        let resp = self
            .client
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unreadable body".to_string());
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Logs messages instead of sending them; used when no mail API key is set.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        info!(to, subject, body_len = body.len(), "mail delivery disabled; message logged");
        Ok(())
    }
}

/// Try `attempts` times, sleeping per `backoff` between failures. Only the last
/// failure is surfaced.
pub async fn send_with_retry(
    mailer: &dyn Mailer,
    to: &str,
    subject: &str,
    body: &str,
    attempts: usize,
    backoff: &BackoffPolicy,
) -> Result<usize, MailError> {
    let attempts = attempts.max(1);
    let mut last = String::new();
    for attempt in 0..attempts {
        match mailer.send(to, subject, body).await {
            Ok(()) => return Ok(attempt + 1),
            Err(err) => {
                warn!(to, attempt = attempt + 1, error = %err, "mail attempt failed");
                last = err.to_string();
                if attempt + 1 < attempts {
                    tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
    Err(MailError::Exhausted { attempts, last })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct FlakyMailer {
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(MailError::Api {
                    status: 503,
                    body: "busy".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn quick_backoff() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let mailer = FlakyMailer {
            failures_before_success: 2,
            calls: AtomicUsize::new(0),
        };
        let used = send_with_retry(&mailer, "a@b.c", "s", "b", 3, &quick_backoff())
            .await
            .unwrap();
        assert_eq!(used, 3);
    }

    #[tokio::test]
    async fn surfaces_error_after_last_attempt() {
        let mailer = FlakyMailer {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let err = send_with_retry(&mailer, "a@b.c", "s", "b", 3, &quick_backoff())
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Exhausted { attempts: 3, .. }));
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn log_mailer_always_accepts() {
        assert!(LogMailer.send("x@y.z", "subject", "body").await.is_ok());
    }
}
