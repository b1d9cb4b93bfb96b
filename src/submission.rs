//! The contact form submission pipeline.

use crate::address_check::{EmailCheck, SyntaxEmailCheck};
use crate::captcha::{ChallengeError, ChallengeGate, Disabled};
use crate::cooldown::{CooldownTracker, Snapshot, now_millis};
use crate::outbound::{Dispatcher, OutgoingMessage};
use serde::Deserialize;
use std::sync::Arc;

/// Fields of a submitted contact form, as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    #[serde(
        default,
        rename = "captcha-token",
        alias = "cf-turnstile-response",
        alias = "h-captcha-response"
    )]
    pub captcha_token: Option<String>,
}

/// Broad class of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The submitter can fix the form.
    ValidationError,
    /// The submitter could not be trusted.
    UntrustedInput,
    /// The submitter has to wait.
    RateLimited,
    /// A collaborator failed, the submission may be retried later.
    DependencyUnavailable,
}

/// Why a submission was not accepted.
///
/// The display text is what the submitter gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Form data missing")]
    FieldsMissing,
    #[error("Form data does not meet length requirements")]
    FieldsTooLong,
    #[error("The provided email is invalid")]
    InvalidEmail,
    #[error("Please complete the captcha")]
    CaptchaMissing,
    #[error("Captcha verification failed")]
    CaptchaFailed,
    #[error("Please wait before sending another message")]
    RateLimited,
    #[error("Failed to send email, please try again")]
    StoreUnavailable,
    #[error("Failed to send email, please try again")]
    DispatchFailed,
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::FieldsMissing | Rejection::FieldsTooLong => RejectionKind::ValidationError,
            Rejection::InvalidEmail | Rejection::CaptchaMissing | Rejection::CaptchaFailed => {
                RejectionKind::UntrustedInput
            }
            Rejection::RateLimited => RejectionKind::RateLimited,
            Rejection::StoreUnavailable | Rejection::DispatchFailed => {
                RejectionKind::DependencyUnavailable
            }
        }
    }

    /// HTTP status code reported for this rejection.
    pub fn status(&self) -> u16 {
        match self.kind() {
            RejectionKind::ValidationError | RejectionKind::UntrustedInput => 400,
            RejectionKind::RateLimited => 429,
            RejectionKind::DependencyUnavailable => 500,
        }
    }
}

/// Upper bounds on field lengths, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLimits {
    pub name: usize,
    pub email: usize,
    pub message: usize,
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            name: 100,
            email: 100,
            message: 500,
        }
    }
}

/// Validates, rate-limits and relays contact form submissions.
pub struct SubmissionPipeline {
    cooldown: CooldownTracker,
    dispatcher: Arc<dyn Dispatcher>,
    recipient: String,
    email_check: Arc<dyn EmailCheck>,
    challenge: Arc<dyn ChallengeGate>,
    limits: FieldLimits,
    fail_open: bool,
}

impl SubmissionPipeline {
    pub fn new(
        cooldown: CooldownTracker,
        dispatcher: Arc<dyn Dispatcher>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            cooldown,
            dispatcher,
            recipient: recipient.into(),
            email_check: Arc::new(SyntaxEmailCheck),
            challenge: Arc::new(Disabled),
            limits: FieldLimits::default(),
            fail_open: false,
        }
    }

    pub fn with_email_check(mut self, email_check: Arc<dyn EmailCheck>) -> Self {
        self.email_check = email_check;
        self
    }

    pub fn with_challenge(mut self, challenge: Arc<dyn ChallengeGate>) -> Self {
        self.challenge = challenge;
        self
    }

    pub fn with_limits(mut self, limits: FieldLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Let submissions through unthrottled while the cooldown store is unavailable.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn cooldown_window(&self) -> std::time::Duration {
        self.cooldown.window()
    }

    /// Runs one submission from `identity` through the pipeline.
    pub async fn submit(&self, form: &ContactForm, identity: &str) -> Result<(), Rejection> {
        self.submit_at(form, identity, now_millis()).await
    }

    async fn submit_at(
        &self,
        form: &ContactForm,
        identity: &str,
        now: u64,
    ) -> Result<(), Rejection> {
        // Expiry runs before validation, so malformed submissions also retire stale batches.
        let cooling_down = match self.cooldown.prepare(now).await {
            Ok(snapshot) => snapshot,
            Err(e) if self.fail_open => {
                log::warn!("Cooldown store unavailable, not rate limiting: {e}");
                Snapshot::default()
            }
            Err(e) => {
                log::error!("Cooldown store unavailable: {e}");
                return Err(Rejection::StoreUnavailable);
            }
        };

        let (Some(name), Some(email), Some(text)) = (&form.name, &form.email, &form.message)
        else {
            log::info!("Rejected submission from {identity}: form data missing");
            return Err(Rejection::FieldsMissing);
        };

        if name.chars().count() > self.limits.name
            || email.chars().count() > self.limits.email
            || text.chars().count() > self.limits.message
        {
            log::info!("Rejected submission from {identity}: fields too long");
            return Err(Rejection::FieldsTooLong);
        }

        if let Err(reason) = self.email_check.check(email).await {
            log::info!("Failed to validate email {email}: {reason}");
            return Err(Rejection::InvalidEmail);
        }

        match self
            .challenge
            .check(form.captcha_token.as_deref(), identity)
            .await
        {
            Ok(()) => {}
            Err(ChallengeError::Missing) => {
                log::info!("Rejected submission from {identity}: captcha missing");
                return Err(Rejection::CaptchaMissing);
            }
            Err(e) => {
                log::info!("Rejected submission from {identity}: {e}");
                return Err(Rejection::CaptchaFailed);
            }
        }

        if cooling_down.contains_identity(identity) {
            log::debug!("{identity} is still cooling down");
            return Err(Rejection::RateLimited);
        }

        if let Err(e) = self.cooldown.track(identity).await {
            if !self.fail_open {
                log::error!("Failed to record {identity} as cooling down: {e}");
                return Err(Rejection::StoreUnavailable);
            }
            log::warn!("Failed to record {identity} as cooling down, continuing: {e}");
        }

        let message = OutgoingMessage::contact(name, email, text, &self.recipient);
        if let Err(e) = self.dispatcher.send(&message).await {
            log::error!("Failed to send email: {e}");
            return Err(Rejection::DispatchFailed);
        }

        log::info!("Relayed contact message from {identity}");
        Ok(())
    }
}
