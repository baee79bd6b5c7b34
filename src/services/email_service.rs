//! Outgoing email: SMTP delivery with retries, an optional background queue
//! and the HTML templates sent to payers

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::EmailSettings;
use crate::models::{format_amount, Transaction};
use crate::utils::escape_html;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email is not configured")]
    NotConfigured,
    #[error("Invalid email address '{0}'")]
    Address(String),
    #[error("Failed to build email: {0}")]
    Build(String),
    #[error("SMTP error: {0}")]
    Transport(String),
    #[error("Failed to send email to {to} after {attempts} attempts: {last_error}")]
    Exhausted { to: String, attempts: u32, last_error: String },
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct EmailOptions {
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_html: String,
    pub options: EmailOptions,
}

/// Delivers a single message, no retries
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(settings: &EmailSettings) -> Result<Self, EmailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
            .map_err(|e| EmailError::Transport(e.to_string()))?
            .port(settings.port)
            .credentials(Credentials::new(settings.username.clone(), settings.password.clone()))
            .build();
        Ok(Self { transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let message = build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        Ok(())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|_| EmailError::Address(address.to_string()))
}

/// Multipart message: HTML body followed by any attachments
pub fn build_message(email: &OutgoingEmail) -> Result<Message, EmailError> {
    let mut builder = Message::builder()
        .from(mailbox(&email.from)?)
        .to(mailbox(&email.to)?)
        .subject(email.subject.clone());

    for cc in &email.options.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in &email.options.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }
    if let Some(reply_to) = &email.options.reply_to {
        builder = builder.reply_to(mailbox(reply_to)?);
    }

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(email.body_html.clone()));
    for attachment in &email.options.attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .map_err(|e| EmailError::Build(format!("{}: {}", attachment.filename, e)))?;
        body = body.singlepart(
            MailAttachment::new(attachment.filename.clone()).body(attachment.data.clone(), content_type),
        );
    }

    builder.multipart(body).map_err(|e| EmailError::Build(e.to_string()))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub delay: Duration,
}

async fn deliver_with_retry(mailer: &dyn Mailer, email: &OutgoingEmail, retry: RetryPolicy) -> Result<(), EmailError> {
    let attempts = retry.max_retries + 1;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match mailer.deliver(email).await {
            Ok(()) => {
                info!("Email sent to {}: {}", email.to, email.subject);
                return Ok(());
            }
            // Malformed messages never succeed on retry
            Err(e @ (EmailError::Address(_) | EmailError::Build(_))) => return Err(e),
            Err(e) => {
                warn!("Error sending email to {} (attempt {}/{}): {}", email.to, attempt, attempts, e);
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(retry.delay).await;
                }
            }
        }
    }

    error!("Failed to send email to {} after {} attempts", email.to, attempts);
    Err(EmailError::Exhausted {
        to: email.to.clone(),
        attempts,
        last_error,
    })
}

struct Worker {
    queue: mpsc::UnboundedSender<OutgoingEmail>,
    handle: JoinHandle<()>,
}

pub struct EmailService {
    mailer: Option<Arc<dyn Mailer>>,
    sender: String,
    retry: RetryPolicy,
    background: bool,
    worker: Mutex<Option<Worker>>,
}

impl EmailService {
    /// SMTP-backed service, or a disabled one when `settings` is `None`
    pub fn from_settings(
        settings: Option<&EmailSettings>,
        retry: RetryPolicy,
        background: bool,
    ) -> Result<Self, EmailError> {
        match settings {
            Some(settings) => {
                let mailer = SmtpMailer::new(settings)?;
                Ok(Self::with_mailer(Arc::new(mailer), settings.sender.clone(), retry, background))
            }
            None => Ok(Self::disabled()),
        }
    }

    pub fn with_mailer(mailer: Arc<dyn Mailer>, sender: String, retry: RetryPolicy, background: bool) -> Self {
        Self {
            mailer: Some(mailer),
            sender,
            retry,
            background,
            worker: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self {
            mailer: None,
            sender: String::new(),
            retry: RetryPolicy {
                max_retries: 0,
                delay: Duration::ZERO,
            },
            background: false,
            worker: Mutex::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mailer.is_some()
    }

    /// Start the background worker; false if disabled or already running
    pub async fn start(&self) -> bool {
        let Some(mailer) = self.mailer.clone() else {
            return false;
        };
        if !self.background {
            return false;
        }

        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return false;
        }

        let (queue, mut rx) = mpsc::unbounded_channel::<OutgoingEmail>();
        let retry = self.retry;
        let handle = tokio::spawn(async move {
            while let Some(email) = rx.recv().await {
                if let Err(e) = deliver_with_retry(mailer.as_ref(), &email, retry).await {
                    error!("Queued email dropped: {}", e);
                }
            }
        });

        *worker = Some(Worker { queue, handle });
        info!("Email worker started");
        true
    }

    /// Stop the worker after it drains the queue
    pub async fn stop(&self) {
        let Some(Worker { queue, handle }) = self.worker.lock().await.take() else {
            return;
        };
        drop(queue);

        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(_) => info!("Email worker stopped"),
            Err(_) => warn!("Email worker did not stop within {}s", STOP_TIMEOUT.as_secs()),
        }
    }

    fn outgoing(&self, to: &str, subject: &str, body_html: String, options: EmailOptions) -> OutgoingEmail {
        OutgoingEmail {
            from: self.sender.clone(),
            to: to.trim().to_string(),
            subject: subject.to_string(),
            body_html,
            options,
        }
    }

    /// Queue when the worker is running, deliver directly otherwise
    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body_html: String,
        options: EmailOptions,
    ) -> Result<(), EmailError> {
        let mailer = self.mailer.as_ref().ok_or(EmailError::NotConfigured)?;
        let email = self.outgoing(to, subject, body_html, options);

        let email = match self.worker.lock().await.as_ref() {
            Some(worker) => match worker.queue.send(email) {
                Ok(()) => {
                    info!("Email to {} queued", to);
                    return Ok(());
                }
                Err(mpsc::error::SendError(email)) => email,
            },
            None => email,
        };

        deliver_with_retry(mailer.as_ref(), &email, self.retry).await
    }

    /// Deliver immediately, bypassing the queue
    pub async fn send_direct(
        &self,
        to: &str,
        subject: &str,
        body_html: String,
        options: EmailOptions,
    ) -> Result<(), EmailError> {
        let mailer = self.mailer.as_ref().ok_or(EmailError::NotConfigured)?;
        let email = self.outgoing(to, subject, body_html, options);
        deliver_with_retry(mailer.as_ref(), &email, self.retry).await
    }

    pub async fn send_payment_link(
        &self,
        to: &str,
        payment_link: &str,
        transaction: &Transaction,
    ) -> Result<(), EmailError> {
        let (subject, body) = payment_request_email(transaction, payment_link);
        self.send_email(to, &subject, body, EmailOptions::default()).await
    }

    pub async fn send_payment_confirmation(&self, transaction: &Transaction, tx_hash: &str) -> Result<(), EmailError> {
        let (subject, body) = payment_confirmation_email(transaction, tx_hash);
        self.send_email(&transaction.client_email, &subject, body, EmailOptions::default())
            .await
    }
}

const WRAPPER_OPEN: &str = r#"<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
<div style="max-width: 600px; margin: 0 auto; padding: 20px; border: 1px solid #ddd; border-radius: 5px;">
"#;
const WRAPPER_CLOSE: &str = "</div>\n</body>\n</html>\n";

pub fn payment_request_email(transaction: &Transaction, payment_link: &str) -> (String, String) {
    let amount = format_amount(transaction.amount);
    let symbol = transaction.network.symbol();
    let subject = format!("Payment Request for {} {}", amount, symbol);
    let link = escape_html(payment_link);

    let description = transaction
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(|d| format!("<p><strong>Description:</strong> {}</p>\n", escape_html(d)))
        .unwrap_or_default();

    let body = format!(
        "{open}<h2 style=\"color: #3498db; text-align: center;\">Payment Request</h2>\n\
         <div style=\"background-color: #f8f9fa; padding: 15px; border-radius: 5px;\">\n\
         <h3>Payment Details:</h3>\n\
         <p><strong>Amount:</strong> {amount} {symbol}</p>\n\
         <p><strong>Network:</strong> {network}</p>\n\
         {description}</div>\n\
         <p>Please click the link below to process your payment:</p>\n\
         <p style=\"text-align: center;\"><a href=\"{link}\">Make Payment</a></p>\n\
         <p style=\"text-align: center; word-break: break-all;\">{link}</p>\n\
         <p style=\"font-size: 12px; color: #777; text-align: center;\">This is an automated payment request. Please do not reply to this email.</p>\n\
         {close}",
        open = WRAPPER_OPEN,
        close = WRAPPER_CLOSE,
        network = transaction.network.display_name(),
    );

    (subject, body)
}

pub fn payment_confirmation_email(transaction: &Transaction, tx_hash: &str) -> (String, String) {
    let amount = format_amount(transaction.amount);
    let symbol = transaction.network.symbol();
    let subject = format!("Payment Confirmation - {} {}", amount, symbol);

    let hash = if tx_hash.is_empty() {
        String::new()
    } else {
        format!("<p><strong>Transaction Hash:</strong> {}</p>\n", escape_html(tx_hash))
    };

    let body = format!(
        "{open}<h2 style=\"color: #2ecc71; text-align: center;\">Payment Confirmed</h2>\n\
         <div style=\"background-color: #f8f9fa; padding: 15px; border-radius: 5px;\">\n\
         <h3>Payment Details:</h3>\n\
         <p><strong>Transaction ID:</strong> {id}</p>\n\
         <p><strong>Amount:</strong> {amount} {symbol}</p>\n\
         <p><strong>Network:</strong> {network}</p>\n\
         {hash}</div>\n\
         <p style=\"text-align: center;\">Thank you for your payment!</p>\n\
         <p style=\"font-size: 12px; color: #777; text-align: center;\">This is an automated confirmation email. Please do not reply to this email.</p>\n\
         {close}",
        open = WRAPPER_OPEN,
        close = WRAPPER_CLOSE,
        id = escape_html(&transaction.id),
        network = transaction.network.display_name(),
    );

    (subject, body)
}

/// Body of the daily report email; `lines` are pre-formatted summary rows
pub fn daily_report_email(date: &str, lines: &[String]) -> (String, String) {
    let subject = format!("Daily Crypto Payment Report - {}", date);
    let items: String = lines
        .iter()
        .map(|line| format!("<li>{}</li>\n", escape_html(line)))
        .collect();

    let body = format!(
        "{open}<h2 style=\"text-align: center;\">Daily Crypto Payment Report</h2>\n\
         <p>Date: {date}</p>\n\
         <ul>\n{items}</ul>\n\
         <p>Please find attached the daily transaction report.</p>\n\
         {close}",
        open = WRAPPER_OPEN,
        close = WRAPPER_CLOSE,
        date = escape_html(date),
    );

    (subject, body)
}
