use std::sync::Arc;

use mailing::MailingService;

pub mod configuration;
pub mod domain;
pub mod email;
pub mod mailing;
pub mod routes;
pub mod scheduler;
pub mod smtp;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod template;
pub mod tracking;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub mailing: Arc<MailingService>,
}
