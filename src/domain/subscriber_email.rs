use serde::{de::Visitor, Deserialize, Deserializer, Serialize};
use std::fmt;
use validator::validate_email;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SubscriberEmail(String);

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for SubscriberEmail {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SubscriberEmailVisitor;

        impl<'de> Visitor<'de> for SubscriberEmailVisitor {
            type Value = SubscriberEmail;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a valid email address string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                SubscriberEmail::parse(value.to_string()).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(SubscriberEmailVisitor)
    }
}

impl SubscriberEmail {
    pub fn parse(s: String) -> Result<Self, String> {
        let s = s.trim().to_string();
        if validate_email(&s) {
            Ok(Self(s))
        } else {
            Err(format!("{s} is not a valid email address."))
        }
    }

    /// Addresses are matched case-insensitively when scanning the registry.
    pub fn matches(&self, other: &SubscriberEmail) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}
