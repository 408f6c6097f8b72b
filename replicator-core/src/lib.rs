pub mod capacity;
pub mod config;
pub mod job;
pub mod metadata;
pub mod node;
pub mod pool;
pub mod state;

pub type PoolName = String;
pub type NodeId = String;
pub type JobName = String;
pub type GroupName = String;

/// Which way a resource wants to move on this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    #[default]
    None,
    Out,
    In,
}

impl Direction {
    pub fn is_scaling(self) -> bool {
        self != Direction::None
    }
}

/// The kind of persisted resource a [`state::ScalingState`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Cluster,
    Job,
}
