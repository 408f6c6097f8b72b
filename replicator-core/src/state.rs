use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Direction, NodeId, ResourceType};

/// Per-resource persisted state, read-modify-written by the scaling engines on every tick.
///
/// The only authoritative read/write path is by [`Self::state_path`] (see SPEC_FULL §11): the
/// source carried two coexisting `ReadState`/`PersistState` signatures, one keyed by a path
/// argument and one keyed by the field below. This implementation exposes only the latter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingState {
    #[serde(default)]
    pub failsafe_mode: bool,
    /// Distinguishes an operator-initiated failsafe toggle (via the CLI) from an automatic trip,
    /// so that flipping the flag through the CLI never fires a duplicate notification.
    #[serde(default)]
    pub failsafe_admin: bool,

    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub scale_in_requests: u64,
    #[serde(default)]
    pub scale_out_requests: u64,

    pub last_scaling_event: Option<DateTime<Utc>>,
    pub last_notification: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,

    pub resource_name: String,
    pub resource_type: ResourceType,
    pub state_path: String,

    #[serde(default)]
    pub eligible_nodes: Vec<NodeId>,
    #[serde(default)]
    pub scaling_direction: Direction,
    pub protected_node: Option<NodeId>,
}

impl ScalingState {
    pub fn new(resource_type: ResourceType, resource_name: impl Into<String>, state_path: impl Into<String>) -> Self {
        Self {
            failsafe_mode: false,
            failsafe_admin: false,
            failure_count: 0,
            scale_in_requests: 0,
            scale_out_requests: 0,
            last_scaling_event: None,
            last_notification: None,
            last_updated: None,
            resource_name: resource_name.into(),
            resource_type,
            state_path: state_path.into(),
            eligible_nodes: Vec::new(),
            scaling_direction: Direction::None,
            protected_node: None,
        }
    }

    /// Advances the consecutive-request counters for `direction` (§4.4 THRESHOLD, §8 invariant
    /// "at most one of scale-in/scale-out is incremented, the other reset to zero").
    ///
    /// Returns the post-increment value of the counter matching `direction`.
    pub fn record_direction(&mut self, direction: Direction) -> u64 {
        if self.scaling_direction != direction {
            self.scale_in_requests = 0;
            self.scale_out_requests = 0;
        }
        self.scaling_direction = direction;

        match direction {
            Direction::Out => {
                self.scale_out_requests += 1;
                self.scale_out_requests
            }
            Direction::In => {
                self.scale_in_requests += 1;
                self.scale_in_requests
            }
            Direction::None => 0,
        }
    }

    /// Resets the counter that was just incremented back to zero, once the scaling threshold has
    /// been reached and the action is about to be executed.
    pub fn reset_threshold_counter(&mut self, direction: Direction) {
        match direction {
            Direction::Out => self.scale_out_requests = 0,
            Direction::In => self.scale_in_requests = 0,
            Direction::None => {}
        }
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        match self.last_scaling_event {
            Some(last) => now < last + cooldown,
            None => false,
        }
    }

    pub fn should_notify(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        match self.last_notification {
            Some(last) => now >= last + cooldown,
            None => true,
        }
    }

    pub fn record_scaling_success(&mut self, now: DateTime<Utc>) {
        self.failure_count = 0;
        self.last_scaling_event = Some(now);
    }

    /// Trips the failsafe when `failure_count` has reached `retry_threshold`. Returns `true` if
    /// the mode flipped from `false` to `true` on this call (the caller uses this to decide
    /// whether a notification is due).
    pub fn maybe_trip_failsafe(&mut self, retry_threshold: u64) -> bool {
        if self.failure_count >= retry_threshold && !self.failsafe_mode {
            self.failsafe_mode = true;
            self.failsafe_admin = false;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ScalingState {
        ScalingState::new(ResourceType::Cluster, "pool-a", "state/nodes/pool-a")
    }

    #[test]
    fn opposing_counter_resets_on_direction_change() {
        let mut s = state();
        assert_eq!(s.record_direction(Direction::Out), 1);
        assert_eq!(s.record_direction(Direction::Out), 2);
        s.scale_in_requests = 5; // pretend a stale value lingered
        assert_eq!(s.record_direction(Direction::In), 1);
        assert_eq!(s.scale_out_requests, 0);
    }

    #[test]
    fn failsafe_trips_exactly_once() {
        let mut s = state();
        s.failure_count = 2;
        assert!(s.maybe_trip_failsafe(2));
        assert!(s.failsafe_mode);
        // Already tripped, no second notification.
        assert!(!s.maybe_trip_failsafe(2));
    }

    #[test]
    fn cooldown_respects_last_scaling_event() {
        let mut s = state();
        let now = Utc::now();
        assert!(!s.is_in_cooldown(now, chrono::Duration::seconds(60)));
        s.last_scaling_event = Some(now);
        assert!(s.is_in_cooldown(now + chrono::Duration::seconds(1), chrono::Duration::seconds(60)));
        assert!(!s.is_in_cooldown(now + chrono::Duration::seconds(61), chrono::Duration::seconds(60)));
    }
}
