use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Direction, GroupName, JobName};

/// Scaling policy for a single task group within a job, decoded from group metadata (see
/// [`crate::metadata`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupScalingPolicy {
    pub job_name: JobName,
    pub group_name: GroupName,

    pub enabled: bool,
    pub min: u64,
    pub max: u64,
    pub cooldown: Duration,
    pub retry_threshold: u64,

    pub scale_out_cpu: f64,
    pub scale_out_mem: f64,
    pub scale_in_cpu: f64,
    pub scale_in_mem: f64,

    pub notification_uid: Option<String>,
}

impl GroupScalingPolicy {
    pub fn state_path(&self) -> String {
        format!("state/jobs/{}/{}", self.job_name, self.group_name)
    }

    /// Direction implied by the average CPU/memory percentage of the group's running allocations,
    /// per §4.7.
    pub fn direction_for(&self, cpu_percent: f64, mem_percent: f64) -> Direction {
        if cpu_percent > self.scale_out_cpu || mem_percent > self.scale_out_mem {
            Direction::Out
        } else if cpu_percent < self.scale_in_cpu && mem_percent < self.scale_in_mem {
            Direction::In
        } else {
            Direction::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> GroupScalingPolicy {
        GroupScalingPolicy {
            job_name: "web".into(),
            group_name: "api".into(),
            enabled: true,
            min: 1,
            max: 5,
            cooldown: Duration::from_secs(60),
            retry_threshold: 3,
            scale_out_cpu: 80.0,
            scale_out_mem: 80.0,
            scale_in_cpu: 20.0,
            scale_in_mem: 20.0,
            notification_uid: None,
        }
    }

    #[rstest]
    #[case(85.0, 50.0, Direction::Out)]
    #[case(50.0, 85.0, Direction::Out)]
    #[case(10.0, 10.0, Direction::In)]
    #[case(10.0, 50.0, Direction::None)]
    #[case(50.0, 50.0, Direction::None)]
    fn direction_matches_table(#[case] cpu: f64, #[case] mem: f64, #[case] expected: Direction) {
        assert_eq!(policy().direction_for(cpu, mem), expected);
    }
}
