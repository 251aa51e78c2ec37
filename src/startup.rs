use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::configuration::{MessageSettings, Settings};
use crate::email::{Attachment, EnvelopeDefaults};
use crate::mailing::MailingService;
use crate::routes::{delete_subscriber, health_check, new_subscriber, send_mail, track_open};
use crate::scheduler::CronScheduler;
use crate::smtp::SmtpClient;
use crate::template::TemplateRenderer;
use crate::tracking::TrackingImage;
use crate::AppState;

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    scheduler: Arc<CronScheduler>,
}

impl Application {
    pub async fn build(settings: Settings) -> Result<Self, anyhow::Error> {
        settings
            .smtp
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid SMTP settings.")?;
        let defaults = envelope_defaults(&settings.message).await?;
        let tracking_image =
            TrackingImage::load(settings.application.tracking_image_path.as_deref())
                .await
                .context("Failed to load the tracking image.")?;

        let scheduler = Arc::new(CronScheduler::new(Handle::current()));
        let mailing = MailingService::new(
            scheduler.clone(),
            Arc::new(SmtpClient::new(&settings.smtp)),
            TemplateRenderer::new(
                settings.application.template_path.clone(),
                &settings.application.public_host,
                settings.application.public_port,
            ),
            defaults,
            tracking_image,
        );

        let address = format!(
            "{}:{}",
            settings.application.host, settings.application.port
        );
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {address}."))?;
        let port = listener.local_addr()?.port();
        tracing::info!(%address, port, "Listening");

        Ok(Self {
            port,
            listener,
            router: router(AppState {
                mailing: Arc::new(mailing),
            }),
            scheduler,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until SIGINT or SIGTERM, then stops the scheduler. Sends that
    /// already started are left to finish on their own.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        self.scheduler.shutdown();
        result
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health_check", get(health_check))
        .route("/v1/newSub", post(new_subscriber))
        .route("/v1/sendMail", post(send_mail))
        .route("/v1/deleteSub", delete(delete_subscriber))
        .route("/:uid", get(track_open))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|id| id.to_str().ok())
                    .unwrap_or_default();
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

async fn envelope_defaults(message: &MessageSettings) -> Result<EnvelopeDefaults, anyhow::Error> {
    let from = message
        .sender()
        .map_err(anyhow::Error::msg)
        .context("Invalid sender address.")?;
    let cc = message
        .carbon_copies()
        .map_err(anyhow::Error::msg)
        .context("Invalid carbon copy address.")?;
    let mut attachments = Vec::with_capacity(message.attachments.len());
    for path in &message.attachments {
        let attachment = Attachment::from_path(path)
            .await
            .with_context(|| format!("Failed to read attachment {}.", path.display()))?;
        attachments.push(attachment);
    }
    Ok(EnvelopeDefaults {
        from,
        subject: message.subject.clone(),
        cc,
        attachments,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
