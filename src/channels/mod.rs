//! Mail transport seam.
//!
//! The core only reads [`InboundMessage`]s and produces [`OutboundReply`]s as
//! plain data; fetching and sending belong to a [`MailTransport`].

pub mod email;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

pub use email::{EmailChannel, EmailConfig};

/// One unread command message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Bare lower-case sender address.
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Message-ID used to thread the reply.
    pub correlation_id: String,
}

/// A message to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundReply {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Message-ID being replied to; `None` for fresh notifications.
    pub in_reply_to: Option<String>,
}

impl OutboundReply {
    /// Reply to `message`, threaded via its correlation id.
    pub fn reply_to(message: &InboundMessage, body: impl Into<String>) -> Self {
        Self {
            to: message.sender.clone(),
            subject: reply_subject(&message.subject),
            body: body.into(),
            in_reply_to: (!message.correlation_id.is_empty())
                .then(|| message.correlation_id.clone()),
        }
    }

    /// Fresh, unthreaded notification.
    pub fn notification(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            in_reply_to: None,
        }
    }
}

/// `Re: <subject>` unless the subject already carries a reply prefix.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityReport {
    pub inbound_ok: bool,
    pub outbound_ok: bool,
    /// Unread messages, fetched without flagging them as seen.
    pub unread: Vec<InboundMessage>,
}

/// Mail I/O used by the cycle controller.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Fetch unread messages and flag them as seen.
    async fn fetch_unread(&self) -> Result<Vec<InboundMessage>, ChannelError>;

    /// Send one message.
    async fn send(&self, reply: &OutboundReply) -> Result<(), ChannelError>;

    /// Verify inbound and outbound connectivity without consuming mail.
    async fn check(&self) -> Result<ConnectivityReport, ChannelError>;
}
