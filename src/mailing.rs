//! Registration, removal, on-demand sends and open tracking.
//!
//! Every subscriber goes through `Unregistered -> Registered -> Removed`.
//! The store lock is only ever taken for a lookup or a mutation and is never
//! held while rendering or talking to the SMTP server.

use std::sync::Arc;

use crate::domain::{
    NewSubscriber, Recipient, Subscriber, SubscriberEmail, SubscriberId, SubscriberLookup,
};
use crate::email::EnvelopeDefaults;
use crate::scheduler::{Job, JobFuture, Scheduler, SchedulerError, YearlySchedule};
use crate::smtp::{MailTransport, TransportError};
use crate::store::{StoreError, SubscriberStore};
use crate::template::{TemplateError, TemplateRenderer};
use crate::tracking::TrackingImage;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum MailingError {
    #[error("{0}")]
    Validation(String),
    #[error("No subscriber matches the given reference.")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("Failed to render the message body.")]
    Template(#[from] TemplateError),
    #[error("Failed to deliver the message.")]
    Transport(#[from] TransportError),
    #[error("Failed to schedule the yearly delivery.")]
    Scheduling(#[from] SchedulerError),
}

impl std::fmt::Debug for MailingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<StoreError> for MailingError {
    fn from(e: StoreError) -> Self {
        Self::Conflict(e.to_string())
    }
}

pub struct MailingService {
    store: SubscriberStore,
    scheduler: Arc<dyn Scheduler>,
    transport: Arc<dyn MailTransport>,
    renderer: TemplateRenderer,
    defaults: Arc<EnvelopeDefaults>,
    tracking_image: TrackingImage,
}

impl MailingService {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        transport: Arc<dyn MailTransport>,
        renderer: TemplateRenderer,
        defaults: EnvelopeDefaults,
        tracking_image: TrackingImage,
    ) -> Self {
        Self {
            store: SubscriberStore::new(),
            scheduler,
            transport,
            renderer,
            defaults: Arc::new(defaults),
            tracking_image,
        }
    }

    #[tracing::instrument(
        name = "Adding a new subscriber",
        skip(self, new_subscriber),
        fields(
            subscriber_email = %new_subscriber.email,
            subscriber_id = tracing::field::Empty,
        )
    )]
    pub async fn add_subscriber(
        &self,
        new_subscriber: NewSubscriber,
    ) -> Result<SubscriberId, MailingError> {
        if self.store.find_by_email(&new_subscriber.email).is_some() {
            return Err(StoreError::DuplicateEmail(new_subscriber.email).into());
        }

        let id = SubscriberId::new();
        tracing::Span::current().record("subscriber_id", &tracing::field::display(&id));

        let rendered: Arc<[u8]> = self
            .renderer
            .render_for(&new_subscriber.first_name, &new_subscriber.last_name, &id)
            .await?
            .into();
        let schedule = YearlySchedule::from(&new_subscriber.birth_date);
        let job = self.scheduler.schedule(
            &schedule,
            delivery_job(
                Arc::clone(&self.transport),
                Arc::clone(&self.defaults),
                new_subscriber.email.clone(),
                Arc::clone(&rendered),
            ),
        )?;

        let subscriber = Subscriber {
            id,
            first_name: new_subscriber.first_name,
            last_name: new_subscriber.last_name,
            email: new_subscriber.email,
            birth_date: new_subscriber.birth_date,
            job,
            rendered,
        };
        // A concurrent registration may have claimed the email meanwhile.
        if let Err(e) = self.store.insert(subscriber) {
            self.scheduler.cancel(job);
            return Err(e.into());
        }
        tracing::info!(%schedule, %job, "Subscriber registered");
        Ok(id)
    }

    #[tracing::instrument(name = "Removing a subscriber", skip(self))]
    pub fn remove_subscriber(&self, lookup: SubscriberLookup) -> Result<SubscriberId, MailingError> {
        let removed = self
            .store
            .remove(&lookup, |subscriber| self.scheduler.cancel(subscriber.job))
            .ok_or(MailingError::NotFound)?;
        tracing::info!(subscriber_id = %removed.id, "Subscriber removed");
        Ok(removed.id)
    }

    /// Sends the message right away. A registered subscriber gets the body
    /// rendered at registration; anyone else gets a freshly rendered one and
    /// nothing is stored.
    #[tracing::instrument(
        name = "Sending a message now",
        skip(self, recipient),
        fields(subscriber_email = %recipient.email)
    )]
    pub async fn send_now(&self, recipient: Recipient) -> Result<(), MailingError> {
        let (email, body) = match self.store.find(&recipient.lookup()) {
            Some(subscriber) => (subscriber.email, subscriber.rendered),
            None => {
                let body = self
                    .renderer
                    .render_for(
                        &recipient.first_name,
                        &recipient.last_name,
                        &recipient.id.unwrap_or_default(),
                    )
                    .await?;
                (recipient.email, Arc::from(body))
            }
        };

        let envelope = self.defaults.envelope_for(email, body);
        self.transport.send(&envelope).await.map_err(|e| {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "Sending a message now failed"
            );
            MailingError::Transport(e)
        })
    }

    #[tracing::instrument(name = "Recording an open event", skip(self))]
    pub fn record_open_event(&self, id: SubscriberId) -> Result<(), MailingError> {
        let subscriber = self.store.get(&id).ok_or(MailingError::NotFound)?;
        tracing::info!(
            subscriber_id = %subscriber.id,
            subscriber_email = %subscriber.email,
            "Message opened"
        );
        Ok(())
    }

    pub fn tracking_image(&self) -> &TrackingImage {
        &self.tracking_image
    }

    pub fn subscriber(&self, id: &SubscriberId) -> Option<Subscriber> {
        self.store.get(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.store.len()
    }
}

/// Yearly send for one subscriber, built from the snapshot taken at
/// registration. Each fire assembles its own envelope.
fn delivery_job(
    transport: Arc<dyn MailTransport>,
    defaults: Arc<EnvelopeDefaults>,
    email: SubscriberEmail,
    body: Arc<[u8]>,
) -> Job {
    Arc::new(move || -> JobFuture {
        let transport = Arc::clone(&transport);
        let envelope = defaults.envelope_for(email.clone(), Arc::clone(&body));
        Box::pin(async move {
            match transport.send(&envelope).await {
                Ok(()) => tracing::info!(recipient = %envelope.to[0], "Birthday message sent"),
                Err(e) => tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    recipient = %envelope.to[0],
                    "Scheduled birthday delivery failed"
                ),
            }
        })
    })
}
