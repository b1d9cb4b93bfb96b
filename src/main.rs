#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::correctness,
    missing_debug_implementations,
    missing_docs,
    clippy::all,
    clippy::wildcard_imports,
    clippy::needless_borrow,
    clippy::cast_lossless,
    clippy::unused_async,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
    clippy::cloned_instead_of_copied
)]
#![cfg_attr(not(test), forbid(clippy::indexing_slicing))]
#![cfg_attr(not(test), forbid(clippy::string_slice))]
#![allow(
    clippy::match_bool,
    clippy::mixed_read_write_in_expression,
    clippy::bool_assert_comparison,
    clippy::manual_split_once,
    clippy::format_push_string,
    clippy::bool_to_int_with_if
)]
pub(crate) mod address_check;
pub(crate) mod captcha;
mod config;
pub(crate) mod cooldown;
pub(crate) mod error;
pub(crate) mod http_server;
pub(crate) mod outbound;
pub(crate) mod store;
pub(crate) mod submission;
pub(crate) mod utils;

use address_check::SyntaxEmailCheck;
use captcha::{ChallengeGate, Disabled, SiteVerify};
use config::{Config, DispatcherKind};
use cooldown::CooldownTracker;
use env_logger::Env;
use error::Error;
use http_server::run_http_server;
use outbound::{Dispatcher, MailgunDispatcher, RetryPolicy, Retrying, SmtpDispatcher};
use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use store::{CooldownStore, MemoryStore, RedisStore};
use submission::{FieldLimits, SubmissionPipeline};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // default to info level
    let env = Env::new().filter_or("RUST_LOG", "info");
    env_logger::Builder::from_env(env)
        // disable timestamps - automatically added by systemd
        .format_timestamp(None)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!(
            "Usage: {} <config_file>",
            args.first().unwrap_or(&"contactmail".to_string())
        );
        process::exit(1);
    }

    let Some(config_path) = args.get(1) else {
        unreachable!("args length checked above")
    };

    let config = match Config::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to read config: {}", e);
            process::exit(1);
        }
    };

    let pipeline = match build_pipeline(&config).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to set up submission pipeline: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_http_server(&config.listen_addr, Arc::new(pipeline)).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}

/// Connects the collaborators selected by `config`.
async fn build_pipeline(config: &Config) -> Result<SubmissionPipeline, Error> {
    let store: Arc<dyn CooldownStore> = match &config.redis_url {
        Some(url) => {
            log::info!("Tracking cooldowns in redis set {}", config.cooldown_set_key);
            Arc::new(RedisStore::connect(url, config.cooldown_set_key.clone()).await?)
        }
        None => {
            log::warn!("redis_url not set, cooldowns are only tracked by this process");
            Arc::new(MemoryStore::default())
        }
    };

    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let policy = RetryPolicy {
        attempts: config.dispatch_attempts,
        backoff: config.dispatch_backoff(),
    };

    let dispatcher: Arc<dyn Dispatcher> = match config.dispatcher_kind()? {
        DispatcherKind::Mailgun => {
            let domain = config
                .mailgun_domain
                .as_deref()
                .ok_or(Error::MissingSetting("mailgun_domain"))?;
            let key = config
                .mailgun_key
                .as_deref()
                .ok_or(Error::MissingSetting("mailgun_key"))?;
            let mailgun = MailgunDispatcher::new(client.clone(), &config.mailgun_host, domain, key);
            Arc::new(Retrying::new(mailgun, policy))
        }
        DispatcherKind::Smtp => {
            let from = config
                .mail_from
                .as_deref()
                .ok_or(Error::MissingSetting("mail_from"))?;
            let smtp = SmtpDispatcher::new(&config.smtp_host, config.smtp_port, from)?;
            Arc::new(Retrying::new(smtp, policy))
        }
    };

    let challenge: Arc<dyn ChallengeGate> = if config.captcha_enabled {
        let secret = config
            .captcha_secret
            .as_deref()
            .ok_or(Error::MissingSetting("captcha_secret"))?;
        Arc::new(SiteVerify::new(client, &config.captcha_verify_url, secret))
    } else {
        Arc::new(Disabled)
    };

    let recipient = config
        .mail_to
        .clone()
        .ok_or(Error::MissingSetting("mail_to"))?;

    Ok(SubmissionPipeline::new(
        CooldownTracker::new(store, config.cooldown_window()),
        dispatcher,
        recipient,
    )
    .with_email_check(Arc::new(SyntaxEmailCheck))
    .with_challenge(challenge)
    .with_limits(FieldLimits {
        name: config.max_name_len,
        email: config.max_email_len,
        message: config.max_message_len,
    })
    .fail_open(config.cooldown_fail_open))
}
