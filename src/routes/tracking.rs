use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::domain::SubscriberId;
use crate::mailing::MailingError;
use crate::AppState;

#[tracing::instrument(name = "Serving the tracking image", skip(state))]
pub async fn track_open(
    state: State<AppState>,
    Path(uid): Path<String>,
) -> Result<Response, MailingError> {
    let id = SubscriberId::parse(&uid).map_err(MailingError::Validation)?;
    state.mailing.record_open_event(id)?;

    let image = state.mailing.tracking_image();
    Ok((
        [(header::CONTENT_TYPE, image.content_type())],
        image.bytes().to_vec(),
    )
        .into_response())
}
