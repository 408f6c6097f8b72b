//! Decoders that weakly coerce the string maps the orchestrator hands back as node/job-group
//! metadata into the typed policy structs in [`crate::pool`] and [`crate::job`].
//!
//! Each decoder lists its own required keys, reports which ones are missing or malformed, and
//! applies the coercion rules from SPEC_FULL §9: booleans parse `"true"`/`"false"`,
//! integers/floats are base-10, durations are a plain integer count of seconds.

use std::{collections::HashMap, time::Duration};

use snafu::Snafu;

use crate::{
    job::GroupScalingPolicy,
    pool::WorkerPoolConfig,
    GroupName, JobName, NodeId, PoolName,
};

const KEY_WORKER_POOL: &str = "replicator_worker_pool";
const KEY_REGION: &str = "replicator_region";
const KEY_PROVIDER: &str = "replicator_provider";
const KEY_ENABLED: &str = "replicator_enabled";
const KEY_MIN: &str = "replicator_min";
const KEY_MAX: &str = "replicator_max";
const KEY_COOLDOWN: &str = "replicator_cooldown";
const KEY_FAULT_TOLERANCE: &str = "replicator_node_fault_tolerance";
const KEY_RETRY_THRESHOLD: &str = "replicator_retry_threshold";
const KEY_SCALING_THRESHOLD: &str = "replicator_scaling_threshold";
const KEY_NOTIFICATION_UID: &str = "replicator_notification_uid";

const KEY_SCALEIN_CPU: &str = "replicator_scalein_cpu";
const KEY_SCALEIN_MEM: &str = "replicator_scalein_mem";
const KEY_SCALEOUT_CPU: &str = "replicator_scaleout_cpu";
const KEY_SCALEOUT_MEM: &str = "replicator_scaleout_mem";

const POOL_REQUIRED_KEYS: &[&str] = &[KEY_WORKER_POOL, KEY_REGION, KEY_PROVIDER, KEY_MIN, KEY_MAX];
const GROUP_REQUIRED_KEYS: &[&str] = &[
    KEY_ENABLED,
    KEY_MIN,
    KEY_MAX,
    KEY_SCALEIN_CPU,
    KEY_SCALEIN_MEM,
    KEY_SCALEOUT_CPU,
    KEY_SCALEOUT_MEM,
];

#[derive(Snafu, Debug, PartialEq)]
pub enum Error {
    #[snafu(display(
        "Node {node_id:?} declares some but not all required pool metadata keys; missing: {missing:?}"
    ))]
    PartialPoolMetadata { node_id: NodeId, missing: Vec<String> },

    #[snafu(display("Job {job_name:?} group {group_name:?} declares some but not all required scaling metadata keys; missing: {missing:?}"))]
    PartialGroupMetadata {
        job_name: JobName,
        group_name: GroupName,
        missing: Vec<String>,
    },

    #[snafu(display("Failed to parse metadata key {key:?} with value {value:?} as {expected}"))]
    MalformedValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

fn present_keys<'a>(metadata: &HashMap<String, String>, keys: &'a [&'static str]) -> Vec<&'a str> {
    keys.iter().copied().filter(|k| metadata.contains_key(*k)).collect()
}

fn parse_bool(metadata: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, Error> {
    match metadata.get(key) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => MalformedValueSnafu {
                key: key.to_string(),
                value: v.clone(),
                expected: "\"true\" or \"false\"",
            }
            .fail(),
        },
    }
}

fn parse_u64(metadata: &HashMap<String, String>, key: &str, default: Option<u64>) -> Result<u64, Error> {
    match metadata.get(key) {
        None => default.ok_or_else(|| Error::MalformedValue {
            key: key.to_string(),
            value: String::new(),
            expected: "a present base-10 integer",
        }),
        Some(v) => v.parse::<u64>().map_err(|_| Error::MalformedValue {
            key: key.to_string(),
            value: v.clone(),
            expected: "a base-10 integer",
        }),
    }
}

fn parse_f64(metadata: &HashMap<String, String>, key: &str) -> Result<f64, Error> {
    match metadata.get(key) {
        None => Err(Error::MalformedValue {
            key: key.to_string(),
            value: String::new(),
            expected: "a present floating point percentage",
        }),
        Some(v) => v.parse::<f64>().map_err(|_| Error::MalformedValue {
            key: key.to_string(),
            value: v.clone(),
            expected: "a floating point percentage",
        }),
    }
}

fn parse_duration_secs(metadata: &HashMap<String, String>, key: &str, default_secs: u64) -> Result<Duration, Error> {
    Ok(Duration::from_secs(parse_u64(metadata, key, Some(default_secs))?))
}

fn parse_string(metadata: &HashMap<String, String>, key: &str) -> Result<String, Error> {
    metadata
        .get(key)
        .cloned()
        .ok_or_else(|| Error::MalformedValue {
            key: key.to_string(),
            value: String::new(),
            expected: "a present string",
        })
}

/// Decodes node metadata into a [`WorkerPoolConfig`].
///
/// Returns `Ok(None)` when none of the `replicator_*` pool keys are present at all (silent "no
/// policy"), `Ok(Some(_))` on a fully decoded config, and `Err` when some but not all required
/// keys are present or a present value is malformed — the caller logs this and skips the node for
/// this tick.
pub fn decode_pool_config(node_id: &NodeId, metadata: &HashMap<String, String>) -> Result<Option<WorkerPoolConfig>, Error> {
    let present = present_keys(metadata, POOL_REQUIRED_KEYS);
    if present.is_empty() {
        return Ok(None);
    }
    if present.len() != POOL_REQUIRED_KEYS.len() {
        let missing = POOL_REQUIRED_KEYS
            .iter()
            .filter(|k| !metadata.contains_key(**k))
            .map(|k| k.to_string())
            .collect();
        return PartialPoolMetadataSnafu {
            node_id: node_id.clone(),
            missing,
        }
        .fail();
    }

    Ok(Some(WorkerPoolConfig {
        name: parse_string(metadata, KEY_WORKER_POOL)?,
        region: parse_string(metadata, KEY_REGION)?,
        provider: parse_string(metadata, KEY_PROVIDER)?,
        enabled: parse_bool(metadata, KEY_ENABLED, true)?,
        min: parse_u64(metadata, KEY_MIN, None)?,
        max: parse_u64(metadata, KEY_MAX, None)?,
        fault_tolerance: parse_u64(metadata, KEY_FAULT_TOLERANCE, Some(0))?,
        cooldown: parse_duration_secs(metadata, KEY_COOLDOWN, 300)?,
        retry_threshold: parse_u64(metadata, KEY_RETRY_THRESHOLD, Some(3))?,
        scaling_threshold: parse_u64(metadata, KEY_SCALING_THRESHOLD, Some(3))?,
        notification_uid: metadata.get(KEY_NOTIFICATION_UID).cloned(),
    }))
}

/// Decodes a task group's metadata into a [`GroupScalingPolicy`]. Same "all or nothing, else
/// error" semantics as [`decode_pool_config`].
pub fn decode_group_policy(
    job_name: &JobName,
    group_name: &GroupName,
    metadata: &HashMap<String, String>,
) -> Result<Option<GroupScalingPolicy>, Error> {
    let present = present_keys(metadata, GROUP_REQUIRED_KEYS);
    if present.is_empty() {
        return Ok(None);
    }
    if present.len() != GROUP_REQUIRED_KEYS.len() {
        let missing = GROUP_REQUIRED_KEYS
            .iter()
            .filter(|k| !metadata.contains_key(**k))
            .map(|k| k.to_string())
            .collect();
        return PartialGroupMetadataSnafu {
            job_name: job_name.clone(),
            group_name: group_name.clone(),
            missing,
        }
        .fail();
    }

    Ok(Some(GroupScalingPolicy {
        job_name: job_name.clone(),
        group_name: group_name.clone(),
        enabled: parse_bool(metadata, KEY_ENABLED, true)?,
        min: parse_u64(metadata, KEY_MIN, None)?,
        max: parse_u64(metadata, KEY_MAX, None)?,
        cooldown: parse_duration_secs(metadata, KEY_COOLDOWN, 300)?,
        retry_threshold: parse_u64(metadata, KEY_RETRY_THRESHOLD, Some(3))?,
        scale_out_cpu: parse_f64(metadata, KEY_SCALEOUT_CPU)?,
        scale_out_mem: parse_f64(metadata, KEY_SCALEOUT_MEM)?,
        scale_in_cpu: parse_f64(metadata, KEY_SCALEIN_CPU)?,
        scale_in_mem: parse_f64(metadata, KEY_SCALEIN_MEM)?,
        notification_uid: metadata.get(KEY_NOTIFICATION_UID).cloned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn full_pool_metadata() -> HashMap<String, String> {
        HashMap::from([
            (KEY_WORKER_POOL.to_string(), "web".to_string()),
            (KEY_REGION.to_string(), "us-east-1".to_string()),
            (KEY_PROVIDER.to_string(), "aws".to_string()),
            (KEY_MIN.to_string(), "2".to_string()),
            (KEY_MAX.to_string(), "10".to_string()),
        ])
    }

    #[test]
    fn no_keys_is_silent_none() {
        assert_eq!(decode_pool_config(&"n1".into(), &HashMap::new()), Ok(None));
    }

    #[test]
    fn all_required_keys_decode() {
        let cfg = decode_pool_config(&"n1".into(), &full_pool_metadata())
            .unwrap()
            .unwrap();
        assert_eq!(cfg.name, "web");
        assert_eq!(cfg.min, 2);
        assert_eq!(cfg.max, 10);
        assert_eq!(cfg.cooldown, Duration::from_secs(300));
        assert!(cfg.enabled);
    }

    #[rstest]
    #[case(KEY_WORKER_POOL)]
    #[case(KEY_REGION)]
    #[case(KEY_MIN)]
    fn partial_keys_are_an_error(#[case] key_to_remove: &str) {
        let mut metadata = full_pool_metadata();
        metadata.remove(key_to_remove);
        let err = decode_pool_config(&"n1".into(), &metadata).unwrap_err();
        assert!(matches!(err, Error::PartialPoolMetadata { .. }));
    }

    #[test]
    fn malformed_integer_is_rejected() {
        let mut metadata = full_pool_metadata();
        metadata.insert(KEY_MIN.to_string(), "not-a-number".to_string());
        let err = decode_pool_config(&"n1".into(), &metadata).unwrap_err();
        assert!(matches!(err, Error::MalformedValue { .. }));
    }

    fn full_group_metadata() -> HashMap<String, String> {
        HashMap::from([
            (KEY_ENABLED.to_string(), "true".to_string()),
            (KEY_MIN.to_string(), "1".to_string()),
            (KEY_MAX.to_string(), "5".to_string()),
            (KEY_RETRY_THRESHOLD.to_string(), "3".to_string()),
            (KEY_SCALEOUT_CPU.to_string(), "80".to_string()),
            (KEY_SCALEOUT_MEM.to_string(), "80".to_string()),
            (KEY_SCALEIN_CPU.to_string(), "20".to_string()),
            (KEY_SCALEIN_MEM.to_string(), "20".to_string()),
        ])
    }

    #[test]
    fn group_no_keys_is_silent_none() {
        assert_eq!(
            decode_group_policy(&"job".into(), &"group".into(), &HashMap::new()),
            Ok(None)
        );
    }

    #[test]
    fn group_all_keys_decode() {
        let policy = decode_group_policy(&"job".into(), &"group".into(), &full_group_metadata())
            .unwrap()
            .unwrap();
        assert_eq!(policy.min, 1);
        assert_eq!(policy.scale_out_cpu, 80.0);
    }

    #[test]
    fn group_partial_keys_are_an_error() {
        let mut metadata = full_group_metadata();
        metadata.remove(KEY_SCALEIN_MEM);
        let err = decode_group_policy(&"job".into(), &"group".into(), &metadata).unwrap_err();
        assert!(matches!(err, Error::PartialGroupMetadata { .. }));
    }
}
