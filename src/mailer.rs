//! Outbound notification boundary.
//!
//! Password-reset delivery is an external collaborator; the default
//! implementation only logs the link so the server runs without any mail
//! transport configured.  Swap in a real transport by implementing
//! [`Mailer`] and changing the composition root.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> anyhow::Result<()>;
}

/// Log-only mailer.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> anyhow::Result<()> {
        info!(%email, %reset_link, "password reset link issued");
        Ok(())
    }
}
