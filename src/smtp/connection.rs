use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::TransportError;

/// A parsed, possibly multi-line, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let mut code = None;
        let mut lines = Vec::new();
        for line in raw.lines().filter(|l| !l.is_empty()) {
            let parsed = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| TransportError::Protocol(format!("Malformed reply line `{line}`")))?;
            code = Some(parsed);
            lines.push(line.get(4..).unwrap_or_default().to_string());
        }
        let code = code.ok_or_else(|| TransportError::Protocol("Empty reply".into()))?;
        Ok(Self { code, lines })
    }

    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

enum SmtpStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

impl SmtpStream {
    async fn read_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read_line(buf).await,
            Self::Tls(s) => s.read_line(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.get_mut().write_all(data).await,
            Self::Tls(s) => s.get_mut().write_all(data).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.get_mut().flush().await,
            Self::Tls(s) => s.get_mut().flush().await,
        }
    }
}

/// One SMTP session. Only the dial is bounded by a timeout; a hung server
/// stalls this session alone.
pub struct Connection {
    stream: SmtpStream,
}

impl Connection {
    pub async fn open(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let address = format!("{host}:{port}");
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                address: address.clone(),
            })?
            .map_err(|source| TransportError::Connect {
                address: address.clone(),
                source,
            })?;
        tracing::debug!(%address, "Connected to SMTP server");
        Ok(Self {
            stream: SmtpStream::Plain(BufReader::new(tcp)),
        })
    }

    /// Sends one command line and reads the reply.
    pub async fn command(&mut self, line: &str) -> Result<Reply, TransportError> {
        tracing::debug!("C: {line}");
        self.send_line(line).await
    }

    /// Like [`Connection::command`] but keeps the line out of the logs.
    pub async fn command_secret(&mut self, line: &str) -> Result<Reply, TransportError> {
        tracing::debug!("C: <credentials>");
        self.send_line(line).await
    }

    async fn send_line(&mut self, line: &str) -> Result<Reply, TransportError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        self.read_reply().await
    }

    /// Sends a command and fails unless the reply carries `expected`.
    pub async fn expect(&mut self, line: &str, expected: u16) -> Result<Reply, TransportError> {
        let reply = self.command(line).await?;
        ensure_code(command_name(line), &reply, |code| code == expected)?;
        Ok(reply)
    }

    /// Sends a command and fails unless the reply is 2xx.
    pub async fn expect_positive(&mut self, line: &str) -> Result<Reply, TransportError> {
        let reply = self.command(line).await?;
        ensure_code(command_name(line), &reply, |code| (200..300).contains(&code))?;
        Ok(reply)
    }

    /// Reads lines until the `code<SP>` line that ends a reply.
    pub async fn read_reply(&mut self) -> Result<Reply, TransportError> {
        let mut raw = String::new();
        loop {
            let mut line = String::new();
            let read = self.stream.read_line(&mut line).await?;
            if read == 0 {
                return Err(TransportError::Protocol(
                    "Connection closed by server".into(),
                ));
            }
            tracing::debug!("S: {}", line.trim_end());
            let last = line.as_bytes().get(3).map_or(true, |b| *b != b'-');
            raw.push_str(&line);
            if last {
                break;
            }
        }
        Reply::parse(&raw)
    }

    /// Writes the dot-stuffed payload followed by `CRLF.CRLF` and waits for
    /// the acknowledgement.
    pub async fn send_data(&mut self, payload: &str) -> Result<Reply, TransportError> {
        let stuffed = dot_stuff(payload);
        self.stream.write_all(stuffed.as_bytes()).await?;
        self.stream.write_all(b".\r\n").await?;
        self.stream.flush().await?;
        tracing::debug!(bytes = stuffed.len(), "C: <message body>");
        let reply = self.read_reply().await?;
        ensure_code("DATA", &reply, |code| (200..300).contains(&code))?;
        Ok(reply)
    }

    /// Upgrades the plain session to TLS. Server certificates are not
    /// verified.
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self, TransportError> {
        let tcp = match self.stream {
            SmtpStream::Plain(s) => s.into_inner(),
            SmtpStream::Tls(_) => return Err(TransportError::Tls("Session already uses TLS".into())),
        };
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::Tls(format!("Invalid server name {host}: {e}")))?;

        let tls = TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::Tls(format!("TLS handshake failed: {e}")))?;
        tracing::debug!("TLS session established");

        Ok(Self {
            stream: SmtpStream::Tls(Box::new(BufReader::new(tls))),
        })
    }
}

fn command_name(line: &str) -> &str {
    match line.find(':') {
        Some(colon) if line.starts_with("MAIL") || line.starts_with("RCPT") => &line[..colon],
        _ => line.split_whitespace().next().unwrap_or(line),
    }
}

pub(super) fn ensure_code(
    command: &str,
    reply: &Reply,
    accept: impl Fn(u16) -> bool,
) -> Result<(), TransportError> {
    if accept(reply.code) {
        Ok(())
    } else {
        Err(TransportError::Rejected {
            command: command.to_string(),
            code: reply.code,
            text: reply.text(),
        })
    }
}

/// Normalises line endings to CRLF, doubles leading dots and guarantees a
/// trailing CRLF.
pub fn dot_stuff(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 64);
    let payload = payload.strip_suffix('\n').unwrap_or(payload);
    let payload = payload.strip_suffix('\r').unwrap_or(payload);
    for line in payload.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
