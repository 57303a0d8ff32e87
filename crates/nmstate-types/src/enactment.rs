//! Enactment records and their conditions
//!
//! An enactment tracks the outcome of applying one policy on one node. Its
//! three conditions are mutually exclusive: after every completed report
//! exactly one of them has `status == true`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SharedTypeError;

/// Identity of an enactment: one (node, policy) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnactmentKey {
    pub node: String,
    pub policy: String,
}

impl EnactmentKey {
    pub fn new(node: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            policy: policy.into(),
        }
    }
}

impl fmt::Display for EnactmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.policy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Available,
    Failing,
    Progressing,
}

impl ConditionType {
    pub const ALL: [ConditionType; 3] = [
        ConditionType::Available,
        ConditionType::Failing,
        ConditionType::Progressing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Available => "Available",
            ConditionType::Failing => "Failing",
            ConditionType::Progressing => "Progressing",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionType {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(ConditionType::Available),
            "Failing" => Ok(ConditionType::Failing),
            "Progressing" => Ok(ConditionType::Progressing),
            _ => Err(SharedTypeError::InvalidValue {
                field: "condition type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    SuccessfullyConfigured,
    FailedToConfigure,
    ConfigurationProgressing,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::SuccessfullyConfigured => "SuccessfullyConfigured",
            ConditionReason::FailedToConfigure => "FailedToConfigure",
            ConditionReason::ConfigurationProgressing => "ConfigurationProgressing",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: bool,
    pub reason: Option<ConditionReason>,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Condition triple of an enactment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionList(pub Vec<Condition>);

impl ConditionList {
    pub fn find(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// The condition currently holding `status == true`, if exactly one does
    pub fn active(&self) -> Option<ConditionType> {
        let mut active = self.0.iter().filter(|c| c.status);
        match (active.next(), active.next()) {
            (Some(condition), None) => Some(condition.type_),
            _ => None,
        }
    }

    /// Set a single condition. The transition time only moves when the
    /// status actually changes.
    pub fn set(
        &mut self,
        type_: ConditionType,
        status: bool,
        reason: Option<ConditionReason>,
        message: &str,
        now: DateTime<Utc>,
    ) {
        match self.0.iter_mut().find(|c| c.type_ == type_) {
            Some(condition) => {
                if condition.status != status {
                    condition.last_transition_time = now;
                }
                condition.status = status;
                condition.reason = reason;
                condition.message = message.to_string();
            }
            None => self.0.push(Condition {
                type_,
                status,
                reason,
                message: message.to_string(),
                last_transition_time: now,
            }),
        }
    }

    /// Make `active` the only true condition, clearing the other two
    pub fn set_exclusive(
        &mut self,
        active: ConditionType,
        reason: ConditionReason,
        message: &str,
        now: DateTime<Utc>,
    ) {
        for type_ in ConditionType::ALL {
            if type_ == active {
                self.set(type_, true, Some(reason), message, now);
            } else {
                self.set(type_, false, None, "", now);
            }
        }
    }

    pub fn set_progressing(&mut self, message: &str, now: DateTime<Utc>) {
        self.set_exclusive(
            ConditionType::Progressing,
            ConditionReason::ConfigurationProgressing,
            message,
            now,
        );
    }

    pub fn set_failed_to_configure(&mut self, message: &str, now: DateTime<Utc>) {
        self.set_exclusive(
            ConditionType::Failing,
            ConditionReason::FailedToConfigure,
            message,
            now,
        );
    }

    pub fn set_success(&mut self, message: &str, now: DateTime<Utc>) {
        self.set_exclusive(
            ConditionType::Available,
            ConditionReason::SuccessfullyConfigured,
            message,
            now,
        );
    }
}

/// Per (node, policy) record of a configuration attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enactment {
    pub key: EnactmentKey,
    /// Bumped by the store on every successful write
    pub resource_version: u64,
    #[serde(default)]
    pub conditions: ConditionList,
}

impl Enactment {
    pub fn new(key: EnactmentKey) -> Self {
        Self {
            key,
            resource_version: 0,
            conditions: ConditionList::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_exclusive_setters_leave_one_condition_true() {
        let mut conditions = ConditionList::default();

        conditions.set_progressing("Applying desired state", now());
        assert_eq!(conditions.active(), Some(ConditionType::Progressing));
        assert_eq!(conditions.0.len(), 3);

        conditions.set_failed_to_configure("boom", now());
        assert_eq!(conditions.active(), Some(ConditionType::Failing));
        let failing = conditions.find(ConditionType::Failing).unwrap();
        assert_eq!(failing.reason, Some(ConditionReason::FailedToConfigure));
        assert_eq!(failing.message, "boom");

        conditions.set_success("successfully reconciled", now());
        assert_eq!(conditions.active(), Some(ConditionType::Available));
        assert!(!conditions.find(ConditionType::Failing).unwrap().status);
        assert!(!conditions.find(ConditionType::Progressing).unwrap().status);
    }

    #[test]
    fn test_transition_time_moves_only_on_status_change() {
        let mut conditions = ConditionList::default();
        let later = now() + Duration::seconds(30);

        conditions.set_success("first", now());
        conditions.set_success("second", later);

        let available = conditions.find(ConditionType::Available).unwrap();
        assert_eq!(available.last_transition_time, now());
        assert_eq!(available.message, "second");

        conditions.set_progressing("again", later);
        let available = conditions.find(ConditionType::Available).unwrap();
        assert_eq!(available.last_transition_time, later);
    }

    #[test]
    fn test_active_is_none_when_ambiguous() {
        let mut conditions = ConditionList::default();
        assert_eq!(conditions.active(), None);

        conditions.set(ConditionType::Available, true, None, "", now());
        conditions.set(ConditionType::Failing, true, None, "", now());
        assert_eq!(conditions.active(), None);
    }

    #[test]
    fn test_condition_type_parsing() {
        assert_eq!(
            "Failing".parse::<ConditionType>().unwrap(),
            ConditionType::Failing
        );
        assert!("Degraded".parse::<ConditionType>().is_err());
    }

    #[test]
    fn test_enactment_json_shape() {
        let mut enactment = Enactment::new(EnactmentKey::new("node01", "bridge-policy"));
        enactment.conditions.set_success("ok", now());

        let value = serde_json::to_value(&enactment).unwrap();
        assert_eq!(value["resourceVersion"], 0);
        assert_eq!(value["conditions"][0]["type"], "Available");
        assert_eq!(value["conditions"][0]["reason"], "SuccessfullyConfigured");
        assert!(value["conditions"][0]["lastTransitionTime"].is_string());
    }
}
