//! Confirmation email proxy.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use provost_core::fsm::registration as states;
use provost_core::{Ledger, Resource};

use super::{TransportError, CALL_TIMEOUT};
use crate::queue::{Dispatch, Receiver};

/// How long a confirmation link stays valid.
const CONFIRMATION_WINDOW_HOURS: i64 = 24;

const TEXT_TEMPLATE: &str = "\
Your account registration needs to be confirmed.

Please visit this link within 24 hours:

{url}

If you did not request an account, ignore this message.
";

const HTML_TEMPLATE: &str = "\
<html>
<body>
<p>Your account registration needs to be confirmed.</p>
<p>Please visit <a href=\"{url}\">this link</a> within 24 hours.</p>
<p>If you did not request an account, ignore this message.</p>
</body>
</html>
";

/// One outbound message, multipart-alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Recipient address.
    pub to: String,
    /// Sender address.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body.
    pub html: String,
}

/// Seam to the mail system. Implementations own connection handling;
/// the proxy owns retry policy and the ledger.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Delivers one message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Failed`] when delivery did not happen.
    async fn send(&self, message: &MailMessage) -> Result<(), TransportError>;
}

/// Stand-in transport that logs the message instead of relaying it.
/// Useful against environments with no reachable MTA.
#[derive(Debug, Clone, Default)]
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), TransportError> {
        info!(to = %message.to, subject = %message.subject, "mail (log transport)\n{}", message.text);
        Ok(())
    }
}

/// A queued confirmation email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailJob {
    /// Registration artifact the mail confirms.
    pub artifact: String,
    /// Recipient address.
    pub recipient: String,
    /// Confirmation link for the recipient to visit.
    pub confirm_url: String,
}

/// Consumer of the email queue.
pub struct Emailer<T: MailTransport> {
    ledger: Ledger,
    actor: String,
    transport: T,
    from: String,
    subject: String,
    timeout: Duration,
}

impl<T: MailTransport> Emailer<T> {
    /// Creates an emailer writing ledger events as `actor_uuid`.
    pub fn new(ledger: Ledger, actor_uuid: String, transport: T, from: String, subject: String) -> Self {
        Self {
            ledger,
            actor: actor_uuid,
            transport,
            from,
            subject,
            timeout: CALL_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Consumes the queue until the shutdown sentinel or channel closure.
    pub async fn run(self, mut queue: Receiver<EmailJob>) {
        info!("emailer started");
        while let Some(item) = queue.recv().await {
            match item {
                Dispatch::Job(job) => self.handle(job).await,
                Dispatch::Shutdown => break,
            }
        }
        info!("emailer stopped");
    }

    async fn handle(&self, job: EmailJob) {
        let message = confirmation_message(&self.from, &self.subject, &job.recipient, &job.confirm_url);
        let outcome = match tokio::time::timeout(self.timeout, self.transport.send(&message)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        match outcome {
            Ok(()) => {
                let opened = Utc::now();
                let window = Resource::TimeInterval {
                    opened,
                    expires: opened + chrono::Duration::hours(CONFIRMATION_WINDOW_HOURS),
                };
                if let Err(err) = self.ledger.append(
                    &job.artifact,
                    &self.actor,
                    states::PRE_REGISTRATION_INETORGPERSON,
                    &[window],
                ) {
                    // Put the artifact back in its scan state rather than
                    // stranding it in pending; the recipient gets a second
                    // (identical) mail on the retry.
                    error!(artifact = %job.artifact, %err, "mail sent but event refused");
                    self.revert(&job);
                    return;
                }
                info!(artifact = %job.artifact, to = %job.recipient, "confirmation mail sent");
            }
            Err(err) => {
                warn!(artifact = %job.artifact, %err, "mail delivery failed, reverting");
                self.revert(&job);
            }
        }
    }

    fn revert(&self, job: &EmailJob) {
        if let Err(err) = self.ledger.append(
            &job.artifact,
            &self.actor,
            states::PRE_REGISTRATION_PERSON,
            &[],
        ) {
            error!(artifact = %job.artifact, %err, "failed to revert claim");
        }
    }
}

/// Renders the confirmation message for one recipient.
#[must_use]
pub fn confirmation_message(from: &str, subject: &str, to: &str, url: &str) -> MailMessage {
    MailMessage {
        to: to.to_string(),
        from: from.to_string(),
        subject: subject.to_string(),
        text: TEXT_TEMPLATE.replace("{url}", url),
        html: HTML_TEMPLATE.replace("{url}", url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_embed_the_confirmation_url() {
        let message = confirmation_message(
            "registration@example.ac.uk",
            "Portal account registration",
            "who@example.ac.uk",
            "https://portal/registration/abc123",
        );
        assert!(message.text.contains("https://portal/registration/abc123"));
        assert!(message
            .html
            .contains("href=\"https://portal/registration/abc123\""));
        assert!(!message.text.contains("{url}"));
        assert!(!message.html.contains("{url}"));
    }
}
