//! Email transport: raw IMAP over rustls for inbound, SMTP via lettre for outbound.
//!
//! Both directions are blocking and run on `spawn_blocking`; callers await
//! them immediately so only one mail operation is ever in flight.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::channels::{ConnectivityReport, InboundMessage, MailTransport, OutboundReply};
use crate::error::ChannelError;

const CHANNEL: &str = "email";

/// Socket read timeout for IMAP and SMTP.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Email transport configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailConfig {
    /// Build config from a key lookup (normally the environment).
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let imap_host = lookup("EMAIL_IMAP_HOST").filter(|h| !h.trim().is_empty())?;

        let imap_port: u16 = lookup("EMAIL_IMAP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            lookup("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = lookup("EMAIL_SMTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = lookup("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = lookup("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// IMAP (inbound) + SMTP (outbound) mail transport.
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn smtp_transport(&self) -> Result<SmtpTransport, ChannelError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        // 465 is implicit TLS; everything else negotiates STARTTLS.
        let builder = if self.config.smtp_port == 465 {
            SmtpTransport::relay(&self.config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
        }
        .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?;

        Ok(builder
            .port(self.config.smtp_port)
            .credentials(creds)
            .timeout(Some(IO_TIMEOUT))
            .build())
    }

    /// Send an email via SMTP (blocking).
    fn send_email(&self, reply: &OutboundReply) -> Result<(), ChannelError> {
        let transport = self.smtp_transport()?;

        let mut builder = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
            )
            .to(reply
                .to
                .parse()
                .map_err(|e| send_failed(format!("Invalid to address: {e}")))?)
            .subject(reply.subject.as_str())
            .header(ContentType::TEXT_PLAIN);

        if let Some(ref id) = reply.in_reply_to {
            builder = builder.in_reply_to(id.clone()).references(id.clone());
        }

        let email = builder
            .body(reply.body.clone())
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))?;

        transport
            .send(&email)
            .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = %reply.to, subject = %reply.subject, "Email sent");
        Ok(())
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: CHANNEL.into(),
        reason,
    }
}

fn fetch_failed(reason: String) -> ChannelError {
    ChannelError::FetchFailed {
        name: CHANNEL.into(),
        reason,
    }
}

#[async_trait]
impl MailTransport for EmailChannel {
    fn name(&self) -> &str {
        CHANNEL
    }

    async fn fetch_unread(&self) -> Result<Vec<InboundMessage>, ChannelError> {
        let cfg = self.config.clone();
        match tokio::task::spawn_blocking(move || fetch_unseen_imap(&cfg, FetchMode::MarkSeen))
            .await
        {
            Ok(Ok(messages)) => {
                tracing::debug!(count = messages.len(), "Fetched unread email");
                Ok(messages)
            }
            Ok(Err(e)) => Err(into_channel_error(e)),
            Err(e) => Err(fetch_failed(format!("IMAP task panicked: {e}"))),
        }
    }

    async fn send(&self, reply: &OutboundReply) -> Result<(), ChannelError> {
        let channel = EmailChannel::new(self.config.clone());
        let reply = reply.clone();
        tokio::task::spawn_blocking(move || channel.send_email(&reply))
            .await
            .map_err(|e| send_failed(format!("SMTP task panicked: {e}")))?
    }

    async fn check(&self) -> Result<ConnectivityReport, ChannelError> {
        let cfg = self.config.clone();
        let unread = tokio::task::spawn_blocking(move || fetch_unseen_imap(&cfg, FetchMode::Peek))
            .await
            .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))?
            .map_err(|e| ChannelError::HealthCheckFailed {
                name: "imap".into(),
                reason: e.to_string(),
            })?;

        let transport = self.smtp_transport()?;
        let outbound_ok = tokio::task::spawn_blocking(move || transport.test_connection())
            .await
            .map_err(|e| send_failed(format!("SMTP task panicked: {e}")))?
            .map_err(|e| ChannelError::HealthCheckFailed {
                name: "smtp".into(),
                reason: e.to_string(),
            })?;

        Ok(ConnectivityReport {
            inbound_ok: true,
            outbound_ok,
            unread,
        })
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Reduce a `From` value to the bare lower-case address.
pub fn normalize_sender(raw: &str) -> String {
    let raw = raw.trim();
    let inner = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if end > start => &raw[start + 1..end],
        _ => raw,
    };
    inner.trim().to_lowercase()
}

/// Wrap a Message-ID in angle brackets if the parser stripped them.
pub fn normalize_message_id(id: &str) -> String {
    let id = id.trim();
    if id.starts_with('<') {
        id.to_string()
    } else {
        format!("<{id}>")
    }
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop quoted reply history (`>` lines and everything after an
/// "On … wrote:" / "Am … schrieb …:" attribution or an original-message separator).
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        let attribution = (trimmed.starts_with("On ") && trimmed.ends_with("wrote:"))
            || (trimmed.starts_with("Am ") && trimmed.contains("schrieb") && trimmed.ends_with(':'));
        let separator = trimmed.starts_with("---")
            && (trimmed.contains("Original Message") || trimmed.contains("Ursprüngliche Nachricht"));
        if attribution || separator {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(normalize_sender)
        .unwrap_or_default()
}

/// Extract readable text from a parsed email, plain text preferred.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

/// Turn raw RFC 822 bytes into an [`InboundMessage`].
pub fn parse_raw_message(raw: &[u8]) -> Option<InboundMessage> {
    let parsed = MessageParser::default().parse(raw)?;
    let correlation_id = parsed
        .message_id()
        .map(normalize_message_id)
        .unwrap_or_else(|| format!("<gen-{}@topic-press>", Uuid::new_v4()));

    Some(InboundMessage {
        sender: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or_default().trim().to_string(),
        body: strip_quoted_text(&extract_text(&parsed)).trim().to_string(),
        correlation_id,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Fetch and flag `\Seen`.
    MarkSeen,
    /// `BODY.PEEK[]`, leaves flags untouched.
    Peek,
}

/// Error type for IMAP fetch operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn read_line(tls: &mut TlsStream) -> Result<String, ImapError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => return Err("IMAP connection closed".into()),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, ImapError> {
    let full = format!("{tag} {cmd}\r\n");
    IoWrite::write_all(tls, full.as_bytes())?;
    IoWrite::flush(tls)?;
    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            break;
        }
    }
    Ok(lines)
}

/// Quote an IMAP string argument, escaping `\` and `"`.
fn imap_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Message bytes of one FETCH response: the `{N}` literal announced at the end
/// of the first line, cut to exactly N bytes so the closing `)` and any
/// trailing `FLAGS (...)` item never reach the parser.
fn fetch_literal(fetch_resp: &[String]) -> Option<Vec<u8>> {
    let (first, rest) = fetch_resp.split_first()?;
    let len: usize = first
        .trim_end()
        .strip_suffix('}')?
        .rsplit_once('{')?
        .1
        .parse()
        .ok()?;
    let mut raw: Vec<u8> = rest.iter().flat_map(|line| line.bytes()).collect();
    if raw.len() < len {
        return None;
    }
    raw.truncate(len);
    Some(raw)
}

/// Keep typed channel errors raised inside the IMAP session.
fn into_channel_error(err: ImapError) -> ChannelError {
    match err.downcast::<ChannelError>() {
        Ok(channel_err) => *channel_err,
        Err(other) => fetch_failed(other.to_string()),
    }
}

/// Fetch unseen emails via raw IMAP over TLS (blocking, run in spawn_blocking).
fn fetch_unseen_imap(config: &EmailConfig, mode: FetchMode) -> Result<Vec<InboundMessage>, ImapError> {
    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
    tcp.set_read_timeout(Some(IO_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.imap_host.clone())?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    let _greeting = read_line(&mut tls)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN {} {}",
            imap_quote(&config.username),
            imap_quote(config.password.expose_secret())
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(ChannelError::AuthFailed {
            name: CHANNEL.into(),
            reason: login_resp.last().map(|l| l.trim().to_string()).unwrap_or_default(),
        }
        .into());
    }

    let _select = send_cmd(&mut tls, "A2", "SELECT \"INBOX\"")?;

    let search_resp = send_cmd(&mut tls, "A3", "SEARCH UNSEEN")?;
    let mut ids: Vec<String> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            ids.extend(line.split_whitespace().skip(2).map(str::to_string));
        }
    }

    let fetch_item = match mode {
        FetchMode::MarkSeen => "RFC822",
        FetchMode::Peek => "BODY.PEEK[]",
    };

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for id in &ids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = send_cmd(&mut tls, &fetch_tag, &format!("FETCH {id} {fetch_item}"))?;

        match fetch_literal(&fetch_resp).and_then(|raw| parse_raw_message(&raw)) {
            Some(message) => results.push(message),
            None => tracing::warn!(id = %id, "Unparseable message skipped"),
        }

        if mode == FetchMode::MarkSeen {
            let store_tag = format!("A{tag_counter}");
            tag_counter += 1;
            let _ = send_cmd(&mut tls, &store_tag, &format!("STORE {id} +FLAGS (\\Seen)"));
        }
    }

    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(results)
}

// ── Tests ───────────────────────────────────────────────────────────
