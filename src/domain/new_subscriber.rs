use crate::routes::{AddSubscriberBody, DeleteSubscriberParams, SendMailBody};

use super::{BirthDate, SubscriberEmail, SubscriberId, SubscriberName};

#[derive(Debug)]
pub struct NewSubscriber {
    pub first_name: SubscriberName,
    pub last_name: SubscriberName,
    pub email: SubscriberEmail,
    pub birth_date: BirthDate,
}

impl TryFrom<AddSubscriberBody> for NewSubscriber {
    type Error = String;

    fn try_from(value: AddSubscriberBody) -> Result<Self, Self::Error> {
        let first_name = SubscriberName::parse(value.firstname)?;
        let last_name = SubscriberName::parse(value.lastname)?;
        let email = SubscriberEmail::parse(value.email)?;
        let birth_date = BirthDate::parse(&value.birth_day)?;
        Ok(Self {
            first_name,
            last_name,
            email,
            birth_date,
        })
    }
}

/// Target of an on-demand send. The identifier, when known, takes precedence
/// over the email when looking for an already registered subscriber.
#[derive(Debug)]
pub struct Recipient {
    pub id: Option<SubscriberId>,
    pub first_name: SubscriberName,
    pub last_name: SubscriberName,
    pub email: SubscriberEmail,
}

impl Recipient {
    pub fn lookup(&self) -> SubscriberLookup {
        SubscriberLookup {
            id: self.id,
            email: Some(self.email.clone()),
        }
    }
}

impl TryFrom<SendMailBody> for Recipient {
    type Error = String;

    fn try_from(value: SendMailBody) -> Result<Self, Self::Error> {
        let id = value
            .id
            .as_deref()
            .map(SubscriberId::parse)
            .transpose()?;
        let first_name = SubscriberName::parse(value.firstname)?;
        let last_name = SubscriberName::parse(value.lastname)?;
        let email = SubscriberEmail::parse(value.email)?;
        // Only validated: an on-demand send never schedules anything.
        if let Some(birth_day) = value.birth_day.as_deref().filter(|s| !s.trim().is_empty()) {
            BirthDate::parse(birth_day)?;
        }
        Ok(Self {
            id,
            first_name,
            last_name,
            email,
        })
    }
}

/// Reference to a registered subscriber: by identifier, falling back to a
/// linear scan on email. At least one of the two is always present.
#[derive(Debug, Clone)]
pub struct SubscriberLookup {
    id: Option<SubscriberId>,
    email: Option<SubscriberEmail>,
}

impl SubscriberLookup {
    pub fn parse(id: Option<&str>, email: Option<&str>) -> Result<Self, String> {
        let id = id
            .filter(|s| !s.trim().is_empty())
            .map(SubscriberId::parse)
            .transpose()?;
        let email = email
            .filter(|s| !s.trim().is_empty())
            .map(|s| SubscriberEmail::parse(s.to_string()))
            .transpose()?;
        if id.is_none() && email.is_none() {
            return Err("Either a subscriber identifier or an email is required.".into());
        }
        Ok(Self { id, email })
    }

    pub fn id(&self) -> Option<&SubscriberId> {
        self.id.as_ref()
    }

    pub fn email(&self) -> Option<&SubscriberEmail> {
        self.email.as_ref()
    }
}

impl From<SubscriberId> for SubscriberLookup {
    fn from(id: SubscriberId) -> Self {
        Self {
            id: Some(id),
            email: None,
        }
    }
}

impl From<SubscriberEmail> for SubscriberLookup {
    fn from(email: SubscriberEmail) -> Self {
        Self {
            id: None,
            email: Some(email),
        }
    }
}

impl TryFrom<DeleteSubscriberParams> for SubscriberLookup {
    type Error = String;

    fn try_from(value: DeleteSubscriberParams) -> Result<Self, Self::Error> {
        Self::parse(value.uid.as_deref(), value.email.as_deref())
    }
}
