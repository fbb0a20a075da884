//! Minimal SMTP client for an internal relay: no TLS, no AUTH.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info};

use super::{Notification, Notifier, NotifyError};

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REPLY_LINE: usize = 4096;

type Replies = FramedRead<tokio::io::ReadHalf<TcpStream>, LinesCodec>;

pub struct SmtpNotifier {
    relay: String,
    helo_name: String,
}

impl SmtpNotifier {
    /// `relay` is `host:port`; `helo_name` identifies this machine.
    pub fn new(relay: impl Into<String>, helo_name: impl Into<String>) -> Self {
        Self {
            relay: relay.into(),
            helo_name: helo_name.into(),
        }
    }

    async fn exchange(&self, message: &Notification) -> Result<(), NotifyError> {
        let stream = TcpStream::connect(&self.relay)
            .await
            .map_err(|source| NotifyError::Connect {
                relay: self.relay.clone(),
                source,
            })?;
        let (read, mut write) = tokio::io::split(stream);
        let mut replies = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_REPLY_LINE));

        read_reply(&mut replies, 220, "greeting").await?;
        command(&mut write, &mut replies, &format!("HELO {}", self.helo_name), 250).await?;
        command(&mut write, &mut replies, &format!("MAIL FROM:<{}>", message.sender), 250).await?;
        for rcpt in &message.recipients {
            command(&mut write, &mut replies, &format!("RCPT TO:<{rcpt}>"), 250).await?;
        }
        command(&mut write, &mut replies, "DATA", 354).await?;

        let body = build_message(message);
        write.write_all(body.as_bytes()).await?;
        write.write_all(b".\r\n").await?;
        write.flush().await?;
        read_reply(&mut replies, 250, "end of data").await?;

        // The relay has accepted the message; a failed QUIT changes nothing.
        let _ = command(&mut write, &mut replies, "QUIT", 221).await;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &Notification) -> Result<(), NotifyError> {
        if message.recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        tokio::time::timeout(EXCHANGE_TIMEOUT, self.exchange(message))
            .await
            .map_err(|_| NotifyError::Timeout)??;
        info!(relay = %self.relay, recipients = message.recipients.len(), "report mailed");
        Ok(())
    }
}

async fn command(
    write: &mut WriteHalf<TcpStream>,
    replies: &mut Replies,
    line: &str,
    want: u16,
) -> Result<(), NotifyError> {
    debug!(command = line, "smtp >");
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\r\n").await?;
    write.flush().await?;
    read_reply(replies, want, line).await
}

/// Read one (possibly multi-line) reply and check its code.
async fn read_reply(replies: &mut Replies, want: u16, step: &str) -> Result<(), NotifyError> {
    loop {
        let line = match replies.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(NotifyError::Protocol(e.to_string())),
            None => return Err(NotifyError::Protocol("relay closed the connection".to_string())),
        };
        debug!(reply = %line, "smtp <");
        let code: u16 = line
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| NotifyError::Protocol(format!("malformed reply: {line}")))?;
        // "250-..." continues, "250 ..." ends the reply.
        if line.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        if code != want {
            return Err(NotifyError::Rejected {
                step: step.to_string(),
                reply: line,
            });
        }
        return Ok(());
    }
}

/// Headers plus dot-stuffed HTML body, CRLF line endings.
pub fn build_message(message: &Notification) -> String {
    let mut out = String::new();
    out.push_str(&format!("From: {}\r\n", message.sender));
    out.push_str(&format!("To: {}\r\n", message.recipients.join(", ")));
    out.push_str(&format!("Subject: {}\r\n", message.subject));
    out.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str("Content-Type: text/html; charset=utf-8\r\n");
    out.push_str("\r\n");
    for line in message.html_body.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}
