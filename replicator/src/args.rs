use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Autonomous autoscaler daemon for cluster workload orchestrators.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the autoscaler daemon.
    Agent {
        /// Config file that contains needed information to start replicator.
        #[arg(short, long)]
        config_file: PathBuf,
    },

    /// Set or clear the failsafe circuit breaker for a single resource out-of-band.
    Failsafe {
        /// State-store path of the resource, e.g. `state/nodes/pool-a`.
        #[arg(long = "state-path")]
        state_path: String,

        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long, conflicts_with = "enable")]
        disable: bool,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,

        #[arg(short, long)]
        config_file: PathBuf,
    },

    /// Write example worker-pool / job-group metadata files for a quick start.
    Init {
        #[arg(long = "job-scaling")]
        job_scaling: bool,

        #[arg(long = "cluster-scaling")]
        cluster_scaling: bool,
    },
}
