//! Sender address validity checks.

use crate::utils::extract_address;
use async_trait::async_trait;
use lettre::Address;

/// Decides whether a submitted sender address is acceptable.
#[async_trait]
pub trait EmailCheck: Send + Sync {
    /// Returns `Err` with a human-readable reason if `email` should be rejected.
    async fn check(&self, email: &str) -> Result<(), String>;
}

/// Offline check: the input must be a single bare address on a dotted domain.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxEmailCheck;

#[async_trait]
impl EmailCheck for SyntaxEmailCheck {
    async fn check(&self, email: &str) -> Result<(), String> {
        let extracted = extract_address(email).ok_or("not an address")?;
        if !extracted.eq_ignore_ascii_case(email) {
            return Err(format!("not a bare address, parsed as <{extracted}>"));
        }

        let address = email.parse::<Address>().map_err(|e| format!("{e}"))?;
        let domain = address.domain();
        if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
            return Err(format!("domain {domain} is not fully qualified"));
        }
        Ok(())
    }
}
