// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! Remote execution interface.
//!
//! Operations talk to storage nodes exclusively through the [`Executor`]
//! trait: creating and destroying bricks, assembling volumes out of
//! them, and querying backend state during crash recovery. Production
//! builds back this with ssh or a node agent; tests use
//! [`crate::mock::MockExecutor`].

use async_trait::async_trait;

use quarry_core::error::Result;
use quarry_core::{Brick, Durability};

/// Backend view of a volume, as reported by a storage node.
#[derive(Debug, Clone, Default)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Member brick names in `host:path` form.
    pub bricks: Vec<String>,
}

/// Per-brick self-heal backlog for a volume.
#[derive(Debug, Clone, Default)]
pub struct HealStatus {
    /// One entry per brick reporting unhealed files.
    pub bricks: Vec<BrickHeal>,
}

/// Heal backlog of a single brick.
#[derive(Debug, Clone)]
pub struct BrickHeal {
    /// Brick name in `host:path` form.
    pub name: String,
    /// Number of entries still pending heal.
    pub unhealed: u64,
}

impl HealStatus {
    /// True when no entry referencing `brick_name` has pending heals.
    #[must_use]
    pub fn brick_healed(&self, brick_name: &str) -> bool {
        self.bricks.iter().filter(|b| b.name == brick_name).all(|b| b.unhealed == 0)
    }
}

/// Parameters for creating a volume on the backend.
#[derive(Debug, Clone)]
pub struct VolumeRequest {
    /// Volume name.
    pub name: String,
    /// Member brick names in `host:path` form, in set order.
    pub bricks: Vec<String>,
    /// Durability scheme to configure.
    pub durability: Durability,
    /// True when the last brick of each set is an arbiter.
    pub arbiter: bool,
    /// Filesystem gid applied to the volume root.
    pub gid: i64,
}

/// A geo-replication session pairing a local volume with a remote one.
#[derive(Debug, Clone)]
pub struct GeoSession {
    /// Remote cluster host.
    pub remote_host: String,
    /// Remote volume name.
    pub remote_volume: String,
    /// Ssh user for the session, when not root.
    pub user: Option<String>,
}

/// Control actions on an existing geo-replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoAction {
    /// Start replicating.
    Start,
    /// Stop replicating.
    Stop,
    /// Pause a running session.
    Pause,
    /// Resume a paused session.
    Resume,
    /// Tear the session down.
    Delete,
}

impl GeoAction {
    /// Backend command word for the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Delete => "delete",
        }
    }
}

/// Reported state of a geo-replication session.
#[derive(Debug, Clone, Default)]
pub struct GeoStatus {
    /// Per-brick session states as reported by the backend.
    pub entries: Vec<(String, String)>,
}

/// Command interface to a storage node.
///
/// All calls are addressed to a node's management host. Implementations
/// must be safe to call concurrently.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Checks that the node at `host` is alive and serving.
    async fn probe(&self, host: &str) -> Result<()>;

    /// Creates the thin LV and filesystem backing `brick` on its node.
    async fn create_brick(&self, host: &str, brick: &Brick) -> Result<()>;

    /// Destroys the backing storage of `brick`. Returns whether the
    /// space was actually reclaimed on the device.
    async fn destroy_brick(&self, host: &str, brick: &Brick) -> Result<bool>;

    /// Assembles and starts a volume from already-created bricks.
    async fn create_volume(&self, host: &str, req: &VolumeRequest) -> Result<()>;

    /// Adds bricks to a started volume.
    async fn expand_volume(&self, host: &str, volume_name: &str, bricks: &[String]) -> Result<()>;

    /// Stops and deletes a volume. Bricks are destroyed separately.
    async fn delete_volume(&self, host: &str, volume_name: &str) -> Result<()>;

    /// Queries the backend's view of a volume.
    async fn volume_info(&self, host: &str, volume_name: &str) -> Result<VolumeInfo>;

    /// Queries self-heal backlog for a volume.
    async fn heal_status(&self, host: &str, volume_name: &str) -> Result<HealStatus>;

    /// Swaps `old_brick` for `new_brick` in a started volume.
    async fn replace_brick(
        &self,
        host: &str,
        volume_name: &str,
        old_brick: &str,
        new_brick: &str,
    ) -> Result<()>;

    /// Creates a geo-replication session for a volume.
    async fn georep_create(
        &self,
        host: &str,
        volume_name: &str,
        session: &GeoSession,
    ) -> Result<()>;

    /// Applies a control action to a geo-replication session.
    async fn georep_action(
        &self,
        host: &str,
        volume_name: &str,
        session: &GeoSession,
        action: GeoAction,
    ) -> Result<()>;

    /// Queries the state of a geo-replication session.
    async fn georep_status(
        &self,
        host: &str,
        volume_name: &str,
        session: &GeoSession,
    ) -> Result<GeoStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brick_healed() {
        let status = HealStatus {
            bricks: vec![
                BrickHeal { name: "stor-0:/b/one".into(), unhealed: 0 },
                BrickHeal { name: "stor-1:/b/two".into(), unhealed: 3 },
            ],
        };
        assert!(status.brick_healed("stor-0:/b/one"));
        assert!(!status.brick_healed("stor-1:/b/two"));
        // A brick the backend does not report has nothing to heal.
        assert!(status.brick_healed("stor-2:/b/three"));
    }

    #[test]
    fn test_geo_action_words() {
        assert_eq!(GeoAction::Start.as_str(), "start");
        assert_eq!(GeoAction::Delete.as_str(), "delete");
    }
}
