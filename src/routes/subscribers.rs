use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::{NewSubscriber, Recipient, SubscriberId, SubscriberLookup};
use crate::mailing::MailingError;
use crate::AppState;

#[derive(Deserialize, Debug)]
pub struct AddSubscriberBody {
    pub birth_day: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

#[derive(Deserialize, Debug)]
pub struct SendMailBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub birth_day: Option<String>,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

#[derive(Deserialize, Debug)]
pub struct DeleteSubscriberParams {
    pub uid: Option<String>,
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct SubscriberIdResponse {
    pub id: SubscriberId,
}

#[tracing::instrument(name = "Handling a new subscription", skip(state, payload))]
pub async fn new_subscriber(
    state: State<AppState>,
    payload: Result<Json<AddSubscriberBody>, JsonRejection>,
) -> Result<Json<SubscriberIdResponse>, MailingError> {
    let Json(body) = payload.map_err(|e| MailingError::Validation(e.body_text()))?;
    let new_subscriber = NewSubscriber::try_from(body).map_err(MailingError::Validation)?;
    let id = state.mailing.add_subscriber(new_subscriber).await?;
    Ok(Json(SubscriberIdResponse { id }))
}

#[tracing::instrument(name = "Handling an on-demand send", skip(state, payload))]
pub async fn send_mail(
    state: State<AppState>,
    payload: Result<Json<SendMailBody>, JsonRejection>,
) -> Result<Response, MailingError> {
    let Json(body) = payload.map_err(|e| MailingError::Validation(e.body_text()))?;
    let recipient = Recipient::try_from(body).map_err(MailingError::Validation)?;
    state.mailing.send_now(recipient).await?;
    Ok((StatusCode::OK, "message sent").into_response())
}

#[tracing::instrument(name = "Handling an unsubscription", skip(state, params))]
pub async fn delete_subscriber(
    state: State<AppState>,
    params: Result<Query<DeleteSubscriberParams>, QueryRejection>,
) -> Result<Json<SubscriberIdResponse>, MailingError> {
    let Query(params) = params.map_err(|e| MailingError::Validation(e.body_text()))?;
    let lookup = SubscriberLookup::try_from(params).map_err(MailingError::Validation)?;
    let id = state.mailing.remove_subscriber(lookup)?;
    Ok(Json(SubscriberIdResponse { id }))
}
