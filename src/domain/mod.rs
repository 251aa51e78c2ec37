mod birth_date;
mod new_subscriber;
mod subscriber;
mod subscriber_email;
mod subscriber_id;
mod subscriber_name;

pub use birth_date::BirthDate;
pub use new_subscriber::{NewSubscriber, Recipient, SubscriberLookup};
pub use subscriber::Subscriber;
pub use subscriber_email::SubscriberEmail;
pub use subscriber_id::SubscriberId;
pub use subscriber_name::SubscriberName;
