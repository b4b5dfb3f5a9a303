//! Distributed execution: mesh context, sharded states, distributed gates,
//! checkpoints and the job lifecycle.

pub mod checkpoint;
pub mod config;
pub mod distributed;
pub mod error;
pub mod job;
pub mod mesh;
pub mod partition;
pub mod sharded;

pub use checkpoint::{
    checkpoint_restore, checkpoint_save, delete_generation, latest_consistent_generation,
    list_generations, prune_generations, CheckpointMetadata, Generation,
};
pub use config::JobConfig;
pub use distributed::apply_distributed_gate;
pub use error::{ClusterError, ClusterResult, ErrorKind};
pub use job::{CancelHandle, Job, JobState, RunSummary};
pub use mesh::{init_cluster, init_cluster_with_backend, Context, MeshShape, RankInfo};
pub use partition::{BlockPartition, SitePartition};
pub use sharded::{shard_state, unshard, Shard, ShardKind, ShardedState};
