use std::sync::Arc;

use super::{BirthDate, SubscriberEmail, SubscriberId, SubscriberName};
use crate::scheduler::JobHandle;

/// A registered recipient together with its yearly job and the message body
/// rendered for it at registration time.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub first_name: SubscriberName,
    pub last_name: SubscriberName,
    pub email: SubscriberEmail,
    pub birth_date: BirthDate,
    pub job: JobHandle,
    pub rendered: Arc<[u8]>,
}
