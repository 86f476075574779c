//! Outgoing mail.
//!
//! Sending is fire-and-forget: [`Mailer::send_email`] hands the message to a
//! detached thread and returns at once. The thread owns its own copy of the
//! mail settings, never reports back, and is lost if the process exits first.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::config::{Config, MailConfig};
use crate::models::models::User;
use crate::reset::issue_reset_password_token;
use crate::templates;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub text_body: String,
    pub html_body: String,
}

/// Delivers a composed message. Called off the request thread.
pub trait MailTransport: Send + Sync {
    fn send(&self, config: &MailConfig, message: &Message) -> anyhow::Result<()>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogTransport;

impl MailTransport for LogTransport {
    fn send(&self, config: &MailConfig, message: &Message) -> anyhow::Result<()> {
        log::info!(
            "mail via {}:{} from {} to {:?}: {}\n{}",
            config.server.as_deref().unwrap_or("localhost"),
            config.port,
            message.sender,
            message.recipients,
            message.subject,
            message.text_body
        );
        Ok(())
    }
}

/// Hands every sent message to a channel.
pub struct CapturingTransport {
    sender: mpsc::Sender<Message>,
}

impl CapturingTransport {
    pub fn new() -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel();
        (CapturingTransport { sender }, receiver)
    }
}

impl MailTransport for CapturingTransport {
    fn send(&self, _config: &MailConfig, message: &Message) -> anyhow::Result<()> {
        self.sender
            .send(message.clone())
            .map_err(|_| anyhow::anyhow!("mail receiver dropped"))
    }
}

#[derive(Clone)]
pub struct Mailer {
    config: Arc<MailConfig>,
    transport: Arc<dyn MailTransport>,
}

impl Mailer {
    pub fn new(config: MailConfig, transport: Arc<dyn MailTransport>) -> Self {
        Mailer {
            config: Arc::new(config),
            transport,
        }
    }

    pub fn send_email(
        &self,
        subject: &str,
        sender: &str,
        recipients: &[String],
        text_body: String,
        html_body: String,
    ) {
        let message = Message {
            subject: subject.to_string(),
            sender: sender.to_string(),
            recipients: recipients.to_vec(),
            text_body,
            html_body,
        };

        let config = Arc::clone(&self.config);
        let transport = Arc::clone(&self.transport);

        let spawned = thread::Builder::new()
            .name("mail".to_string())
            .spawn(move || {
                if let Err(e) = transport.send(&config, &message) {
                    log::error!("failed to send {:?} to {:?}: {}", message.subject, message.recipients, e);
                }
            });

        if let Err(e) = spawned {
            log::error!("failed to start mail thread: {}", e);
        }
    }
}

pub fn send_password_reset_email(mailer: &Mailer, config: &Config, user: &User) -> anyhow::Result<()> {
    let token = issue_reset_password_token(user.id, &config.secret_key, config.reset_token_ttl_secs)?;

    mailer.send_email(
        "[Microblog] Reset Your Password",
        config.mail_sender(),
        &[user.email.clone()],
        templates::reset_password_text(user, &config.base_url, &token),
        templates::reset_password_html(user, &config.base_url, &token),
    );
    Ok(())
}
