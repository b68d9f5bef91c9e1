use std::{fmt, str::FromStr};

use crate::MailboxError;

/// Caller-visible idempotency key of a mail record
///
/// Generated ids are ULIDs, which sort by creation time, but any non-empty
/// caller-supplied key without whitespace is accepted so upstream systems can
/// reuse their own message ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MailId(String);

impl MailId {
    /// Generate a new unique mail id
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Wrap a caller-supplied key
    ///
    /// # Errors
    /// If the key is empty or contains whitespace
    pub fn parse(key: impl Into<String>) -> Result<Self, MailboxError> {
        let key = key.into();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(MailboxError::InvalidMailId(key));
        }
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Milliseconds since the Unix epoch encoded in a generated id
    ///
    /// Returns `None` for caller-supplied keys that are not ULIDs.
    #[must_use]
    pub fn timestamp_ms(&self) -> Option<u64> {
        ulid::Ulid::from_string(&self.0)
            .ok()
            .map(|id| id.timestamp_ms())
    }
}

impl fmt::Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for MailId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for MailId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(s).map_err(serde::de::Error::custom)
    }
}

/// Routing address of a record: `topic[:tag[:group]]`
///
/// A group without a tag keeps an empty tag slot (`topic::group`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Recipients {
    topic: String,
    tag: Option<String>,
    group: Option<String>,
}

fn check_component(kind: &str, value: &str) -> Result<(), MailboxError> {
    if value.is_empty() {
        return Err(MailboxError::InvalidRecipients(format!("{kind} is empty")));
    }
    if value.contains(':') || value.chars().any(char::is_whitespace) {
        return Err(MailboxError::InvalidRecipients(format!(
            "{kind} '{value}' contains ':' or whitespace"
        )));
    }
    Ok(())
}

impl Recipients {
    /// Build a validated address
    ///
    /// # Errors
    /// If any present component is empty or contains `:` or whitespace
    pub fn new(
        topic: impl Into<String>,
        tag: Option<String>,
        group: Option<String>,
    ) -> Result<Self, MailboxError> {
        let topic = topic.into();
        check_component("topic", &topic)?;
        if let Some(tag) = &tag {
            check_component("tag", tag)?;
        }
        if let Some(group) = &group {
            check_component("group", group)?;
        }
        Ok(Self { topic, tag, group })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }
}

impl fmt::Display for Recipients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic)?;
        match (&self.tag, &self.group) {
            (None, None) => Ok(()),
            (Some(tag), None) => write!(f, ":{tag}"),
            (tag, Some(group)) => write!(f, ":{}:{group}", tag.as_deref().unwrap_or_default()),
        }
    }
}

impl FromStr for Recipients {
    type Err = MailboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let topic = parts.next().unwrap_or_default();
        let tag = parts.next().filter(|t| !t.is_empty()).map(str::to_string);
        let group = parts.next().map(str::to_string);
        Self::new(topic, tag, group)
    }
}

impl serde::Serialize for Recipients {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Recipients {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
