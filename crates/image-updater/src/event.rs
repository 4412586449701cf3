//! Registry push notification payload.

use serde::{Deserialize, Serialize};

/// Action reported by the registry for an image event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    #[default]
    #[serde(rename = "PUSH")]
    Push,
    #[serde(untagged)]
    Other(String),
}

/// Event details as delivered in the `detail` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PushDetail {
    #[serde(default)]
    pub action_type: ActionType,
    pub image_tag: String,
    #[serde(default)]
    pub image_digest: String,
    pub repository_name: String,
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_media_type: Option<String>,
}

/// A registry push notification.
///
/// Read-only once deserialized; every stage of an update borrows it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub account: String,
    pub region: String,
    pub detail: PushDetail,
    #[serde(default, rename = "detail-type")]
    pub detail_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub version: String,
}

impl PushEvent {
    /// Parses an event from a JSON payload.
    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn repository_name(&self) -> &str {
        &self.detail.repository_name
    }

    pub fn image_tag(&self) -> &str {
        &self.detail.image_tag
    }

    pub fn image_digest(&self) -> &str {
        &self.detail.image_digest
    }

    pub fn action_type(&self) -> &ActionType {
        &self.detail.action_type
    }

    /// Non-empty `/`-separated segments of the repository name.
    pub fn repository_segments(&self) -> Vec<&str> {
        split_segments(&self.detail.repository_name)
    }

    /// Registry host for this event, `<account>.<host_template>`, with
    /// `{region}` in the template replaced by the event region.
    pub fn registry_host(&self, host_template: &str) -> String {
        format!(
            "{}.{}",
            self.account,
            host_template.replace("{region}", &self.region)
        )
    }

    /// Fully-qualified image reference without tag.
    pub fn image_uri(&self, host_template: &str) -> String {
        format!(
            "{}/{}",
            self.registry_host(host_template),
            self.detail.repository_name
        )
    }
}

/// Splits a `/`-separated path and drops whitespace-only segments.
pub(crate) fn split_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|segment| !segment.trim().is_empty())
        .collect()
}
