use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Single label attached to a key, in the list form the custom resources use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub tag_key: String,
    #[serde(default)]
    pub tag_value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag_key: key.into(),
            tag_value: value.into(),
        }
    }
}

/// key: tag-mapping
/// Key-unique label set. Equality is set equality; the list form on the wire is
/// always emitted in key order so two mappings with the same pairs serialize the same.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagMapping(BTreeMap<String, String>);

impl TagMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_tags(&self) -> Vec<Tag> {
        self.iter().map(|(k, v)| Tag::new(k, v)).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Vec<Tag>> for TagMapping {
    fn from(tags: Vec<Tag>) -> Self {
        tags.into_iter().map(|t| (t.tag_key, t.tag_value)).collect()
    }
}

impl Serialize for TagMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            seq.serialize_element(&Tag::new(key.as_str(), value.as_str()))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TagMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tags = Option::<Vec<Tag>>::deserialize(deserializer)?;
        Ok(tags.map(TagMapping::from).unwrap_or_default())
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum ConditionType {
    Terminal,
    Recoverable,
    Synced,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Terminal => "Terminal",
            ConditionType::Recoverable => "Recoverable",
            ConditionType::Synced => "Synced",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(type_: ConditionType) -> Self {
        Self {
            type_,
            status: ConditionStatus::Unknown,
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Sets status and message in place; the transition time only moves when the
    /// status actually flips.
    pub fn set(&mut self, status: bool, message: Option<String>) {
        let status = ConditionStatus::from(status);
        if self.status != status {
            self.status = status;
            self.last_transition_time = Some(Utc::now());
        }
        self.message = message;
    }
}

/// key: condition-map
/// At most one condition per type, enforced by the map itself. Serialized as the
/// usual condition list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conditions(BTreeMap<ConditionType, Condition>);

impl Conditions {
    pub fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.get(&type_)
    }

    pub fn get_mut(&mut self, type_: ConditionType) -> Option<&mut Condition> {
        self.0.get_mut(&type_)
    }

    /// Returns the condition of the given type, synthesizing it on first need.
    pub fn ensure(&mut self, type_: ConditionType) -> &mut Condition {
        self.0.entry(type_).or_insert_with(|| Condition::new(type_))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }
}

impl Serialize for Conditions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for condition in self.0.values() {
            seq.serialize_element(condition)?;
        }
        seq.end()
    }
}

/// Condition entry as listed in a stored status. Types written by other tooling
/// are dropped rather than failing the whole status.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListedCondition {
    Known(Condition),
    Other(serde::de::IgnoredAny),
}

impl<'de> Deserialize<'de> for Conditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Option::<Vec<ListedCondition>>::deserialize(deserializer)?.unwrap_or_default();
        Ok(Self(
            list.into_iter()
                .filter_map(|entry| match entry {
                    ListedCondition::Known(condition) => Some((condition.type_, condition)),
                    ListedCondition::Other(_) => None,
                })
                .collect(),
        ))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(
        default,
        rename = "ownerAccountID",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultiRegionKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultiRegionConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_region_key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<MultiRegionKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replica_keys: Vec<MultiRegionKey>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_mapping_serializes_in_key_order() {
        let tags: TagMapping = [("b", "2"), ("a", "1")].into_iter().collect();
        let value = serde_json::to_value(&tags).unwrap();
        assert_eq!(
            value,
            json!([
                {"tagKey": "a", "tagValue": "1"},
                {"tagKey": "b", "tagValue": "2"},
            ])
        );
    }

    #[test]
    fn duplicate_tag_keys_collapse_to_last_value() {
        let tags: TagMapping = serde_json::from_value(json!([
            {"tagKey": "env", "tagValue": "dev"},
            {"tagKey": "env", "tagValue": "prod"},
            {"tagKey": "empty"},
        ]))
        .unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("env"), Some("prod"));
        assert_eq!(tags.get("empty"), Some(""));
    }

    #[test]
    fn null_tag_list_is_empty() {
        let tags: TagMapping = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn duplicate_conditions_collapse_to_one_per_type() {
        let conditions: Conditions = serde_json::from_value(json!([
            {"type": "Recoverable", "status": "True", "message": "throttled"},
            {"type": "Recoverable", "status": "False"},
            {"type": "Terminal", "status": "False"},
        ]))
        .unwrap();
        assert_eq!(conditions.len(), 2);
        let recoverable = conditions.get(ConditionType::Recoverable).unwrap();
        assert_eq!(recoverable.status, ConditionStatus::False);
        assert!(recoverable.message.is_none());
    }

    #[test]
    fn transition_time_moves_only_on_flip() {
        let mut condition = Condition::new(ConditionType::Recoverable);
        condition.set(true, Some("first".into()));
        let first = condition.last_transition_time;
        assert!(first.is_some());

        condition.set(true, Some("second".into()));
        assert_eq!(condition.last_transition_time, first);
        assert_eq!(condition.message.as_deref(), Some("second"));
    }

    #[test]
    fn unknown_condition_types_are_skipped() {
        let status: crate::apis::KeyStatus = serde_json::from_value(json!({
            "keyID": "k1",
            "conditions": [
                {"type": "ACK.ResourceSynced", "status": "True"},
                {"type": "Terminal", "status": "False"},
            ],
        }))
        .unwrap();
        assert_eq!(status.key_id.as_deref(), Some("k1"));
        assert_eq!(status.conditions.len(), 1);
        assert!(status.conditions.get(ConditionType::Terminal).is_some());
    }
}
