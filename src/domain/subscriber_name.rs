use serde::Serialize;
use std::fmt;
use unicode_segmentation::UnicodeSegmentation;

const MAX_GRAPHEMES: usize = 256;
const FORBIDDEN_CHARS: [char; 9] = ['/', '(', ')', '"', '<', '>', '\\', '{', '}'];

/// A first or last name that is safe to place into the HTML template.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SubscriberName(String);

impl AsRef<str> for SubscriberName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SubscriberName {
    pub fn parse(s: String) -> Result<Self, String> {
        let is_empty_or_whitespace = s.trim().is_empty();
        let is_too_long = s.graphemes(true).count() > MAX_GRAPHEMES;
        let contains_forbidden_characters = s.chars().any(|c| FORBIDDEN_CHARS.contains(&c));

        if is_empty_or_whitespace || is_too_long || contains_forbidden_characters {
            Err(format!("{s} is not a valid name."))
        } else {
            Ok(Self(s))
        }
    }
}
