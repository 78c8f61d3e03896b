// Copyright 2026 Quarry Dev
// SPDX-License-Identifier: Apache-2.0

//! In-memory executor for tests.
//!
//! `MockExecutor` models just enough backend state to exercise the
//! operation state machine: volumes created through it are remembered
//! with their brick lists, so `volume_info` answers during cleanup match
//! what the executor was previously told to do. Failures are injected
//! per method name.

use dashmap::DashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use quarry_core::error::{Error, Result};
use quarry_core::Brick;

use crate::executor::{
    Executor, GeoAction, GeoSession, GeoStatus, HealStatus, VolumeInfo, VolumeRequest,
};

/// Executor double recording calls and serving canned state.
#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<String>>,
    fail: DashMap<String, String>,
    volumes: DashMap<String, VolumeInfo>,
    heals: DashMap<String, HealStatus>,
}

impl MockExecutor {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded calls, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// True if any recorded call starts with `prefix`.
    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Makes every future call to `method` fail with `message`.
    pub fn fail(&self, method: &str, message: &str) {
        self.fail.insert(method.to_string(), message.to_string());
    }

    /// Clears a failure injection.
    pub fn clear_fail(&self, method: &str) {
        self.fail.remove(method);
    }

    /// Overrides the backend view of a volume.
    pub fn set_volume_info(&self, info: VolumeInfo) {
        self.volumes.insert(info.name.clone(), info);
    }

    /// Removes a volume from the backend view.
    pub fn forget_volume(&self, name: &str) {
        self.volumes.remove(name);
    }

    /// Sets the heal backlog reported for a volume.
    pub fn set_heal_status(&self, volume_name: &str, status: HealStatus) {
        self.heals.insert(volume_name.to_string(), status);
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check_fail(&self, method: &str) -> Result<()> {
        match self.fail.get(method) {
            Some(msg) => Err(Error::Executor(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn probe(&self, host: &str) -> Result<()> {
        self.record(format!("probe {host}"));
        self.check_fail("probe")
    }

    async fn create_brick(&self, host: &str, brick: &Brick) -> Result<()> {
        self.record(format!("create_brick {host} {}", brick.id));
        self.check_fail("create_brick")
    }

    async fn destroy_brick(&self, host: &str, brick: &Brick) -> Result<bool> {
        self.record(format!("destroy_brick {host} {}", brick.id));
        self.check_fail("destroy_brick")?;
        Ok(true)
    }

    async fn create_volume(&self, host: &str, req: &VolumeRequest) -> Result<()> {
        self.record(format!("create_volume {host} {}", req.name));
        self.check_fail("create_volume")?;
        self.volumes.insert(
            req.name.clone(),
            VolumeInfo { name: req.name.clone(), bricks: req.bricks.clone() },
        );
        Ok(())
    }

    async fn expand_volume(&self, host: &str, volume_name: &str, bricks: &[String]) -> Result<()> {
        self.record(format!("expand_volume {host} {volume_name}"));
        self.check_fail("expand_volume")?;
        match self.volumes.get_mut(volume_name) {
            Some(mut info) => {
                info.bricks.extend(bricks.iter().cloned());
                Ok(())
            }
            None => Err(Error::Executor(format!("volume {volume_name} does not exist"))),
        }
    }

    async fn delete_volume(&self, host: &str, volume_name: &str) -> Result<()> {
        self.record(format!("delete_volume {host} {volume_name}"));
        self.check_fail("delete_volume")?;
        self.volumes.remove(volume_name);
        Ok(())
    }

    async fn volume_info(&self, host: &str, volume_name: &str) -> Result<VolumeInfo> {
        self.record(format!("volume_info {host} {volume_name}"));
        self.check_fail("volume_info")?;
        match self.volumes.get(volume_name) {
            Some(info) => Ok(info.clone()),
            None => Err(Error::Executor(format!("volume {volume_name} does not exist"))),
        }
    }

    async fn heal_status(&self, host: &str, volume_name: &str) -> Result<HealStatus> {
        self.record(format!("heal_status {host} {volume_name}"));
        self.check_fail("heal_status")?;
        Ok(self.heals.get(volume_name).map(|h| h.clone()).unwrap_or_default())
    }

    async fn replace_brick(
        &self,
        host: &str,
        volume_name: &str,
        old_brick: &str,
        new_brick: &str,
    ) -> Result<()> {
        self.record(format!("replace_brick {host} {volume_name} {old_brick} {new_brick}"));
        self.check_fail("replace_brick")?;
        match self.volumes.get_mut(volume_name) {
            Some(mut info) => {
                let Some(slot) = info.bricks.iter().position(|b| b == old_brick) else {
                    return Err(Error::Executor(format!(
                        "brick {old_brick} is not part of {volume_name}"
                    )));
                };
                info.bricks[slot] = new_brick.to_string();
                Ok(())
            }
            None => Err(Error::Executor(format!("volume {volume_name} does not exist"))),
        }
    }

    async fn georep_create(
        &self,
        host: &str,
        volume_name: &str,
        session: &GeoSession,
    ) -> Result<()> {
        self.record(format!(
            "georep_create {host} {volume_name} {}::{}",
            session.remote_host, session.remote_volume
        ));
        self.check_fail("georep_create")
    }

    async fn georep_action(
        &self,
        host: &str,
        volume_name: &str,
        session: &GeoSession,
        action: GeoAction,
    ) -> Result<()> {
        self.record(format!(
            "georep_action {host} {volume_name} {}::{} {}",
            session.remote_host,
            session.remote_volume,
            action.as_str()
        ));
        self.check_fail("georep_action")
    }

    async fn georep_status(
        &self,
        host: &str,
        volume_name: &str,
        session: &GeoSession,
    ) -> Result<GeoStatus> {
        self.record(format!(
            "georep_status {host} {volume_name} {}::{}",
            session.remote_host, session.remote_volume
        ));
        self.check_fail("georep_status")?;
        Ok(GeoStatus::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::Durability;
    use uuid::Uuid;

    fn brick() -> Brick {
        let mut dev = quarry_core::Device::new(Uuid::new_v4(), "/dev/sdb");
        dev.storage_set(100 * quarry_core::types::GB);
        dev.new_brick(quarry_core::types::GB, 1.0, 0, Uuid::new_v4()).unwrap()
    }

    #[tokio::test]
    async fn test_records_calls_and_injects_failures() {
        let exec = MockExecutor::new();
        exec.probe("mgmt-0").await.unwrap();
        assert!(exec.called("probe mgmt-0"));

        exec.fail("probe", "node down");
        let err = exec.probe("mgmt-0").await.unwrap_err();
        assert!(matches!(err, Error::Executor(_)));

        exec.clear_fail("probe");
        exec.probe("mgmt-0").await.unwrap();
        assert_eq!(exec.call_count("probe"), 3);
    }

    #[tokio::test]
    async fn test_volume_lifecycle_tracked() {
        let exec = MockExecutor::new();
        let b1 = brick();
        let b2 = brick();

        let req = VolumeRequest {
            name: "vol_a".into(),
            bricks: vec![b1.brick_name("stor-0"), b2.brick_name("stor-1")],
            durability: Durability::Replicate { replica: 2 },
            arbiter: false,
            gid: 0,
        };
        exec.create_volume("mgmt-0", &req).await.unwrap();

        let info = exec.volume_info("mgmt-0", "vol_a").await.unwrap();
        assert_eq!(info.bricks.len(), 2);

        let b3 = brick();
        exec.replace_brick("mgmt-0", "vol_a", &b1.brick_name("stor-0"), &b3.brick_name("stor-2"))
            .await
            .unwrap();
        let info = exec.volume_info("mgmt-0", "vol_a").await.unwrap();
        assert!(info.bricks.contains(&b3.brick_name("stor-2")));
        assert!(!info.bricks.contains(&b1.brick_name("stor-0")));

        exec.delete_volume("mgmt-0", "vol_a").await.unwrap();
        assert!(exec.volume_info("mgmt-0", "vol_a").await.is_err());
    }
}
