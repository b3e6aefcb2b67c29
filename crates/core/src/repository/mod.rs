//! Repositories: the generic dual-write layer and the group/card count upkeep.

mod derived_counts;
mod dual_write_repository;

pub(crate) use derived_counts::recompute_group_counts;
pub(crate) use dual_write_repository::send_mirror;
pub use dual_write_repository::{mirror_key, DualWriteRepository, OutboxReplay};
