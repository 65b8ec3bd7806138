//! Represents a text note and the request body used to create or edit one.

use super::attachment::Attachment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A text document with its attachment records.
///
/// `id` is assigned by the metadata store on first write and doubles as the
/// partition key. `version` is bumped by the store on every successful
/// replace and is compared on the next one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    pub created_date: DateTime<Utc>,

    /// Unset until the first mutation after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub version: i64,
}

impl Note {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            content: None,
            tags: BTreeMap::new(),
            attachments: Vec::new(),
            created_date: Utc::now(),
            updated_date: None,
            version: 0,
        }
    }

    /// Id of a persisted note. Notes read back from a store always carry one.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    pub fn find_attachment(&self, attachment_id: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.id == attachment_id)
    }

    /// Remove an attachment entry, returning it if it was present.
    pub fn take_attachment(&mut self, attachment_id: &str) -> Option<Attachment> {
        let pos = self.attachments.iter().position(|a| a.id == attachment_id)?;
        Some(self.attachments.remove(pos))
    }

    pub fn touch(&mut self) {
        self.updated_date = Some(Utc::now());
    }

    /// Case-sensitive containment on title or content.
    #[cfg(test)]
    pub fn contains_text(&self, needle: &str) -> bool {
        self.title.contains(needle)
            || self
                .content
                .as_deref()
                .is_some_and(|content| content.contains(needle))
    }
}

/// Body of create and update requests.
///
/// On update all three fields replace the stored ones. `version`, when sent,
/// must match the stored note or the update is rejected as a conflict.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub version: Option<i64>,
}

#[cfg(test)]
impl NoteDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}
