use std::path::Path;
use std::sync::Arc;

use birthday_mailer::configuration::get_configuration;
use birthday_mailer::startup::Application;
use birthday_mailer::telemetry::{get_subscriber, init_subscriber};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_subscriber(subscriber);
    };
});

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SmtpBehaviour {
    Accept,
    RejectRecipients,
}

/// One SMTP session as seen by the server.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    pub commands: Vec<String>,
    pub data: String,
}

impl Transcript {
    pub fn has_command(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command)
    }

    /// The decoded text/html part of the message.
    pub fn html_body(&self) -> String {
        let marker = "Content-Transfer-Encoding: quoted-printable\r\n\r\n";
        let start = self.data.find(marker).expect("No quoted-printable part.") + marker.len();
        let end = start + self.data[start..].find("\r\n--").unwrap_or(self.data.len() - start);
        let decoded = quoted_printable::decode(
            &self.data[start..end],
            quoted_printable::ParseMode::Robust,
        )
        .unwrap();
        String::from_utf8(decoded).unwrap()
    }
}

/// Minimal in-process SMTP server accepting any credentials.
pub struct FakeSmtpServer {
    pub port: u16,
    sessions: Arc<Mutex<Vec<Transcript>>>,
}

impl FakeSmtpServer {
    pub async fn start(behaviour: SmtpBehaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind the fake SMTP server.");
        let port = listener.local_addr().unwrap().port();
        let sessions = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&sessions);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                tokio::spawn(serve(socket, behaviour, recorded));
            }
        });

        Self { port, sessions }
    }

    /// Completed sessions, in the order they ended.
    pub fn sessions(&self) -> Vec<Transcript> {
        self.sessions.lock().clone()
    }
}

/// Speaks SMTP on one connection. The transcript is recorded before the
/// final reply so a caller that saw `221` always finds it.
async fn serve(socket: TcpStream, behaviour: SmtpBehaviour, recorded: Arc<Mutex<Vec<Transcript>>>) {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut transcript = Transcript::default();
    writer.write_all(b"220 fake ESMTP\r\n").await.unwrap();

    let mut in_data = false;
    let mut auth_prompts = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();

        if in_data {
            if line == "." {
                in_data = false;
                writer.write_all(b"250 queued\r\n").await.unwrap();
            } else {
                transcript.data.push_str(&line);
                transcript.data.push_str("\r\n");
            }
            continue;
        }

        transcript.commands.push(line.clone());
        let reply: &[u8] = if auth_prompts == 1 {
            auth_prompts = 2;
            b"334 UGFzc3dvcmQ6\r\n"
        } else if auth_prompts == 2 {
            auth_prompts = 3;
            b"235 authenticated\r\n"
        } else if line.starts_with("EHLO") {
            b"250-fake\r\n250 AUTH LOGIN\r\n"
        } else if line == "AUTH LOGIN" {
            auth_prompts = 1;
            b"334 VXNlcm5hbWU6\r\n"
        } else if line.starts_with("MAIL FROM") {
            b"250 ok\r\n"
        } else if line.starts_with("RCPT TO") {
            match behaviour {
                SmtpBehaviour::Accept => &b"250 ok\r\n"[..],
                SmtpBehaviour::RejectRecipients => &b"550 no such user\r\n"[..],
            }
        } else if line == "DATA" {
            in_data = true;
            b"354 end with <CRLF>.<CRLF>\r\n"
        } else if line == "QUIT" {
            recorded.lock().push(transcript);
            let _ = writer.write_all(b"221 bye\r\n").await;
            return;
        } else {
            b"500 unrecognised\r\n"
        };
        writer.write_all(reply).await.unwrap();
    }
    recorded.lock().push(transcript);
}

pub struct TestApp {
    pub address: String,
    pub smtp: FakeSmtpServer,
    pub api_client: reqwest::Client,
}

impl TestApp {
    pub async fn health_check(&self) -> reqwest::Response {
        self.api_client
            .get(&format!("{}/health_check", &self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_new_subscriber(&self, body: &serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/v1/newSub", &self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_send_mail(&self, body: &serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/v1/sendMail", &self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn delete_subscriber(&self, query: &[(&str, &str)]) -> reqwest::Response {
        self.api_client
            .delete(&format!("{}/v1/deleteSub", &self.address))
            .query(query)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_tracking_image(&self, uid: &str) -> reqwest::Response {
        self.api_client
            .get(&format!("{}/{}", &self.address, uid))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Registers a subscriber and returns the identifier it was given.
    pub async fn register(&self, body: &serde_json::Value) -> String {
        let response = self.post_new_subscriber(body).await;
        assert_eq!(response.status().as_u16(), 200);
        let json: serde_json::Value = response.json().await.unwrap();
        json["id"].as_str().unwrap().to_string()
    }
}

pub fn anna() -> serde_json::Value {
    serde_json::json!({
        "birth_day": "2024-05-10",
        "email": "anna@example.com",
        "firstname": "Anna",
        "lastname": "Ivanova",
    })
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(SmtpBehaviour::Accept).await
}

pub async fn spawn_app_with(behaviour: SmtpBehaviour) -> TestApp {
    Lazy::force(&TRACING);

    let smtp = FakeSmtpServer::start(behaviour).await;

    let configuration = {
        let mut c = get_configuration().expect("Failed to read configuration.");
        c.application.host = "127.0.0.1".into();
        c.application.port = 0;
        c.application.template_path =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("templates/message.html");
        c.application.tracking_image_path = None;
        c.smtp.host = "127.0.0.1".into();
        c.smtp.port = smtp.port;
        c.smtp.tls_enabled = false;
        c.message.attachments = vec![];
        c
    };

    let application = Application::build(configuration)
        .await
        .expect("Failed to build application.");
    let port = application.port();
    tokio::spawn(application.run_until_stopped());

    TestApp {
        address: format!("http://127.0.0.1:{port}"),
        smtp,
        api_client: reqwest::Client::new(),
    }
}
