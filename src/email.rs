//! Message envelopes and their MIME rendering.
//!
//! An envelope is assembled fresh for every send from the immutable
//! [`EnvelopeDefaults`]; nothing about it is shared or mutated across sends.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::domain::SubscriberEmail;

const BASE64_LINE_LENGTH: usize = 76;
const BOUNDARY_TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content: Arc<[u8]>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self::new(name, content))
    }
}

/// Sender, subject, carbon copies and attachments shared by every send.
#[derive(Debug, Clone)]
pub struct EnvelopeDefaults {
    pub from: SubscriberEmail,
    pub subject: String,
    pub cc: Vec<SubscriberEmail>,
    pub attachments: Vec<Attachment>,
}

impl EnvelopeDefaults {
    pub fn envelope_for(&self, recipient: SubscriberEmail, body: Arc<[u8]>) -> MessageEnvelope {
        MessageEnvelope {
            from: self.from.clone(),
            to: vec![recipient],
            cc: self.cc.clone(),
            subject: self.subject.clone(),
            body,
            attachments: self.attachments.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub from: SubscriberEmail,
    pub to: Vec<SubscriberEmail>,
    pub cc: Vec<SubscriberEmail>,
    pub subject: String,
    pub body: Arc<[u8]>,
    pub attachments: Vec<Attachment>,
}

impl MessageEnvelope {
    /// Every address that gets a `RCPT TO`.
    pub fn recipients(&self) -> impl Iterator<Item = &SubscriberEmail> {
        self.to.iter().chain(self.cc.iter())
    }

    /// Renders the DATA payload with a freshly generated boundary.
    pub fn to_mime(&self) -> String {
        self.to_mime_with_boundary(&new_boundary())
    }

    pub fn to_mime_with_boundary(&self, boundary: &str) -> String {
        let html = String::from_utf8_lossy(&self.body);
        let mut out = String::with_capacity(html.len() + 1024);

        write_header(
            &mut out,
            "Date",
            &Utc::now().format("%a, %d %b %Y %H:%M:%S +0000").to_string(),
        );
        write_header(&mut out, "Message-ID", &message_id(boundary, &self.from));
        write_header(&mut out, "From", self.from.as_ref());
        write_header(&mut out, "To", &join_addresses(&self.to));
        if !self.cc.is_empty() {
            write_header(&mut out, "Cc", &join_addresses(&self.cc));
        }
        write_header(&mut out, "Subject", &encode_header_value(&self.subject));
        write_header(&mut out, "MIME-Version", "1.0");
        write_header(
            &mut out,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{boundary}\""),
        );

        out.push_str(&format!("\r\n--{boundary}\r\n"));
        write_header(&mut out, "Content-Type", "text/html; charset=\"utf-8\"");
        write_header(&mut out, "Content-Transfer-Encoding", "quoted-printable");
        out.push_str("\r\n");
        out.push_str(&encode_html(&html));
        out.push_str("\r\n");

        for attachment in &self.attachments {
            out.push_str(&format!("\r\n--{boundary}\r\n"));
            write_attachment(&mut out, attachment);
        }

        out.push_str(&format!("\r\n--{boundary}--\r\n"));
        out
    }
}

/// 7-bit output wrapped at 76 columns; line breaks become CRLF first.
fn encode_html(html: &str) -> String {
    let crlf = html.replace("\r\n", "\n").replace('\n', "\r\n");
    quoted_printable::encode_to_str(crlf.as_bytes())
}

fn message_id(boundary: &str, from: &SubscriberEmail) -> String {
    let token = boundary.trim_start_matches("=_Part_");
    let domain = from
        .as_ref()
        .rsplit_once('@')
        .map_or("localhost", |(_, domain)| domain);
    format!("<{}.{token}@{domain}>", Utc::now().timestamp())
}

/// Random alphanumeric token, unique per message.
pub fn new_boundary() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_TOKEN_LENGTH)
        .map(char::from)
        .collect();
    format!("=_Part_{token}")
}

fn write_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

fn write_attachment(out: &mut String, attachment: &Attachment) {
    let name = attachment.name.replace('"', "");
    write_header(
        out,
        "Content-Type",
        &format!("application/octet-stream; name=\"{name}\""),
    );
    write_header(out, "Content-Transfer-Encoding", "base64");
    write_header(
        out,
        "Content-Disposition",
        &format!("attachment; filename=\"{name}\""),
    );
    write_header(out, "Content-ID", &format!("<{name}>"));
    out.push_str("\r\n");
    let encoded = base64::engine::general_purpose::STANDARD.encode(&attachment.content);
    for line in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(line));
        out.push_str("\r\n");
    }
}

fn join_addresses(addresses: &[SubscriberEmail]) -> String {
    addresses
        .iter()
        .map(|a| a.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
    format!("=?UTF-8?B?{encoded}?=")
}
