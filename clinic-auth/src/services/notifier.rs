use async_trait::async_trait;
use std::sync::Mutex;

/// Delivers password reset tokens to account holders.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_password_reset(&self, to_email: &str, reset_token: &str)
        -> Result<(), anyhow::Error>;
}

/// Writes a delivery notice to the log. The token itself is never logged.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn send_password_reset(
        &self,
        to_email: &str,
        _reset_token: &str,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(
            to = %to_email,
            "Password reset token issued (no delivery channel configured)"
        );
        Ok(())
    }
}

/// Captures sent tokens so tests can complete a reset.
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent token sent to `email`.
    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, token)| token.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ResetNotifier for MockNotifier {
    async fn send_password_reset(
        &self,
        to_email: &str,
        reset_token: &str,
    ) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((to_email.to_string(), reset_token.to_string()));
        Ok(())
    }
}
