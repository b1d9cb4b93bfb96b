//! Module for relaying accepted submissions by email.

use crate::error::Error;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// A contact message ready to be relayed to the site owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from_name: String,
    pub from_email: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl OutgoingMessage {
    pub fn contact(name: &str, email: &str, text: &str, to: &str) -> Self {
        Self {
            from_name: name.to_string(),
            from_email: email.to_string(),
            to: to.to_string(),
            subject: format!("Contact form submission from {name}"),
            text: text.to_string(),
        }
    }

    /// The submitter as a mailbox, `name <email>`.
    fn sender(&self) -> Result<Mailbox, Error> {
        Ok(Mailbox::new(
            Some(self.from_name.clone()),
            self.from_email.parse()?,
        ))
    }
}

/// Outbound transport for contact messages.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), Error>;
}

/// Sends through the Mailgun messages API.
#[derive(Debug, Clone)]
pub struct MailgunDispatcher {
    client: reqwest::Client,
    host: String,
    domain: String,
    key: String,
}

impl MailgunDispatcher {
    pub fn new(client: reqwest::Client, host: &str, domain: &str, key: &str) -> Self {
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            domain: domain.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl Dispatcher for MailgunDispatcher {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), Error> {
        let url = format!("{}/v3/{}/messages", self.host, self.domain);
        let from = message.sender()?.to_string();

        let response = self
            .client
            .post(&url)
            .basic_auth("api", Some(&self.key))
            .form(&[
                ("from", from.as_str()),
                ("to", message.to.as_str()),
                ("subject", message.subject.as_str()),
                ("text", message.text.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Provider {
            status: status.as_u16(),
            body,
        })
    }
}

/// Relays through an SMTP server, with the submitter as `Reply-To`.
pub struct SmtpDispatcher {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpDispatcher {
    pub fn new(host: &str, port: u16, from: &str) -> Result<Self, Error> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();
        Ok(Self {
            mailer,
            from: from.parse()?,
        })
    }

    fn build(&self, message: &OutgoingMessage) -> Result<Message, Error> {
        Ok(Message::builder()
            .from(self.from.clone())
            .reply_to(message.sender()?)
            .to(message.to.parse()?)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.text.clone())?)
    }
}

#[async_trait]
impl Dispatcher for SmtpDispatcher {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), Error> {
        let email = self.build(message)?;
        self.mailer.send(email).await?;
        Ok(())
    }
}

/// How often and how patiently a failed send is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of tries, including the first.
    pub attempts: u32,
    /// Wait before the second try, doubled for each following one.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    log::warn!(
                        "Attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                        self.attempts
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A [`Dispatcher`] that retries its inner dispatcher on transient failures.
pub struct Retrying<D> {
    inner: D,
    policy: RetryPolicy,
}

impl<D: Dispatcher> Retrying<D> {
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<D: Dispatcher> Dispatcher for Retrying<D> {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), Error> {
        self.policy.run(|| self.inner.send(message)).await
    }
}
