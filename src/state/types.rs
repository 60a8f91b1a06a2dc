use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// What the external scheduler should do after a tick.
///
/// The engine never inspects this value; it is produced by the state's action
/// and handed back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Call again as soon as possible
    Requeue,
    /// Call again after the given delay
    RequeueAfter(Duration),
    /// Converged, no further reconciliation needed until something changes
    Done,
}

impl Outcome {
    /// Requeue after `seconds`, or immediately when `seconds` is zero.
    pub fn retry(seconds: u64) -> Self {
        if seconds == 0 {
            Outcome::Requeue
        } else {
            Outcome::RequeueAfter(Duration::from_secs(seconds))
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Outcome::Requeue => Some(Duration::ZERO),
            Outcome::RequeueAfter(delay) => Some(*delay),
            Outcome::Done => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }
}

/// Externally persisted progress of the state machine.
///
/// An empty `next_state` means there is no explicit resume point and the
/// machine starts from its initial state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(rename = "nextState", default)]
    pub next_state: String,
    #[serde(
        rename = "stateCompletion",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub state_completion: BTreeMap<String, String>,
}

impl ProgressRecord {
    pub fn new(next_state: impl Into<String>) -> Self {
        Self {
            next_state: next_state.into(),
            state_completion: BTreeMap::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The explicit resume point, if one was recorded.
    pub fn resume_point(&self) -> Option<&str> {
        if self.next_state.is_empty() {
            None
        } else {
            Some(&self.next_state)
        }
    }
}

// Older writers serialize an unset map as `null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_record_wire_shape() {
        let mut record = ProgressRecord::new("DeployWorkload");
        record
            .state_completion
            .insert("CreateService".to_string(), "complete".to_string());

        let json = record.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"nextState":"DeployWorkload","stateCompletion":{"CreateService":"complete"}}"#
        );
        assert_eq!(ProgressRecord::from_json(&json).unwrap(), record);
    }

    #[test]
    fn test_progress_record_tolerates_null_and_missing_fields() {
        let record = ProgressRecord::from_json(r#"{"nextState":"UpdateStatus","stateCompletion":null}"#)
            .unwrap();
        assert_eq!(record.resume_point(), Some("UpdateStatus"));
        assert!(record.state_completion.is_empty());

        let record = ProgressRecord::from_json("{}").unwrap();
        assert_eq!(record.resume_point(), None);
    }

    #[test]
    fn test_progress_record_rejects_garbage() {
        assert!(ProgressRecord::from_json("not json").is_err());
    }

    #[test]
    fn test_outcome_retry() {
        assert_eq!(Outcome::retry(0), Outcome::Requeue);
        assert_eq!(
            Outcome::retry(10).requeue_after(),
            Some(Duration::from_secs(10))
        );
        assert!(Outcome::Done.is_done());
        assert_eq!(Outcome::Done.requeue_after(), None);
    }
}
