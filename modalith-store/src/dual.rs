// Copyright 2025 Modalith (https://github.com/modalith)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Dual-store façade.
//!
//! Wraps two implementations of each store kind. Reads go to the primary;
//! in `fallback` read mode a primary error (or, with `fallback_on_empty`, an
//! empty primary result) routes the read to the secondary with a structured
//! warning. Writes go to the primary; in `dual` write mode they are repeated
//! on the secondary, whose failures are logged and swallowed — the primary's
//! result is authoritative. No reconciliation is performed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use modalith_core::entities::{
    AbacPolicy, ApiKeyRecord, ChaosPolicy, ChaosRun, DeviceRecord, ModelRecord, OcrConnector,
    PrivacyPolicy, RoleBindings, TrainingJob, WorkflowRun, WorkflowSpec,
};
use serde_json::Value;
use tracing::warn;

use crate::config::{ControlPlaneConfig, ReadMode, WriteMode};
use crate::error::Result;
use crate::interfaces::{
    AbacStore, ApiKeyStore, ChaosStore, ConnectorStore, DataFactoryStore, FleetStore,
    PrivacyStore, RbacStore, StoreBundle, WorkflowStore,
};

/// Read/write arbitration knobs shared by every wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualPolicy {
    pub read_mode: ReadMode,
    pub write_mode: WriteMode,
    pub fallback_on_empty: bool,
}

impl From<&ControlPlaneConfig> for DualPolicy {
    fn from(config: &ControlPlaneConfig) -> Self {
        Self {
            read_mode: config.read_mode,
            write_mode: config.write_mode,
            fallback_on_empty: config.fallback_on_empty,
        }
    }
}

/// Emptiness of a read result, for the `fallback_on_empty` gate.
trait ReadValue {
    fn is_empty_value(&self) -> bool;
    fn size(&self) -> usize;
}

impl<T> ReadValue for Vec<T> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
    fn size(&self) -> usize {
        self.len()
    }
}

impl<K: Ord, V> ReadValue for BTreeMap<K, V> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
    fn size(&self) -> usize {
        self.len()
    }
}

impl<T> ReadValue for Option<T> {
    fn is_empty_value(&self) -> bool {
        self.is_none()
    }
    fn size(&self) -> usize {
        usize::from(self.is_some())
    }
}

fn read_with_fallback<T, P, S>(policy: DualPolicy, label: &str, primary: P, secondary: S) -> Result<T>
where
    T: ReadValue,
    P: FnOnce() -> Result<T>,
    S: FnOnce() -> Result<T>,
{
    let result = match primary() {
        Ok(value) => value,
        Err(err) => {
            if policy.read_mode != ReadMode::Fallback {
                return Err(err);
            }
            warn!(
                control_plane_op = label,
                error = %err,
                "primary control-plane read failed; falling back"
            );
            let fallback = secondary()?;
            warn!(
                control_plane_op = label,
                control_plane_reason = "error",
                "control-plane fallback used"
            );
            return Ok(fallback);
        }
    };
    if policy.fallback_on_empty && result.is_empty_value() {
        let fallback = secondary()?;
        if !fallback.is_empty_value() {
            warn!(
                control_plane_op = label,
                control_plane_reason = "empty_primary",
                control_plane_primary_size = result.size(),
                control_plane_secondary_size = fallback.size(),
                control_plane_mismatch = true,
                "control-plane fallback used"
            );
        }
        return Ok(fallback);
    }
    Ok(result)
}

fn write_dual<T, P, S>(policy: DualPolicy, label: &str, primary: P, secondary: S) -> Result<T>
where
    P: FnOnce() -> Result<T>,
    S: FnOnce() -> Result<()>,
{
    let result = primary()?;
    if policy.write_mode == WriteMode::Dual {
        if let Err(err) = secondary() {
            warn!(
                control_plane_op = label,
                error = %err,
                "secondary control-plane write failed"
            );
        }
    }
    Ok(result)
}

/// Per-item list upsert on the secondary: load, replace by id or append,
/// save. Failures are logged and swallowed.
fn upsert_secondary<T, L, S>(
    policy: DualPolicy,
    label: &str,
    item: &T,
    id_of: impl Fn(&T) -> &str,
    load: L,
    save: S,
) where
    T: Clone,
    L: FnOnce() -> Result<Vec<T>>,
    S: FnOnce(&[T]) -> Result<()>,
{
    if policy.write_mode != WriteMode::Dual {
        return;
    }
    let outcome = (|| -> Result<()> {
        let mut items = load()?;
        let id = id_of(item);
        let mut replaced = false;
        for existing in items.iter_mut() {
            if id_of(existing) == id {
                *existing = item.clone();
                replaced = true;
                break;
            }
        }
        if !replaced {
            items.push(item.clone());
        }
        save(&items)
    })();
    if let Err(err) = outcome {
        warn!(
            control_plane_op = label,
            error = %err,
            "secondary control-plane write failed"
        );
    }
}

pub struct DualRbacStore {
    primary: Arc<dyn RbacStore>,
    secondary: Arc<dyn RbacStore>,
    policy: DualPolicy,
}

impl RbacStore for DualRbacStore {
    fn load_role_bindings(&self) -> Result<RoleBindings> {
        read_with_fallback(
            self.policy,
            "rbac.load_role_bindings",
            || self.primary.load_role_bindings(),
            || self.secondary.load_role_bindings(),
        )
    }

    fn save_role_bindings(&self, bindings: &RoleBindings) -> Result<()> {
        write_dual(
            self.policy,
            "rbac.save_role_bindings",
            || self.primary.save_role_bindings(bindings),
            || self.secondary.save_role_bindings(bindings),
        )
    }
}

pub struct DualAbacStore {
    primary: Arc<dyn AbacStore>,
    secondary: Arc<dyn AbacStore>,
    policy: DualPolicy,
}

impl AbacStore for DualAbacStore {
    fn load_policies(&self) -> Result<Vec<AbacPolicy>> {
        read_with_fallback(
            self.policy,
            "abac.load_policies",
            || self.primary.load_policies(),
            || self.secondary.load_policies(),
        )
    }

    fn save_policies(&self, policies: &[AbacPolicy]) -> Result<()> {
        write_dual(
            self.policy,
            "abac.save_policies",
            || self.primary.save_policies(policies),
            || self.secondary.save_policies(policies),
        )
    }
}

pub struct DualPrivacyStore {
    primary: Arc<dyn PrivacyStore>,
    secondary: Arc<dyn PrivacyStore>,
    policy: DualPolicy,
}

impl PrivacyStore for DualPrivacyStore {
    fn load_policies(&self) -> Result<Vec<PrivacyPolicy>> {
        read_with_fallback(
            self.policy,
            "privacy.load_policies",
            || self.primary.load_policies(),
            || self.secondary.load_policies(),
        )
    }

    fn save_policies(&self, policies: &[PrivacyPolicy]) -> Result<()> {
        write_dual(
            self.policy,
            "privacy.save_policies",
            || self.primary.save_policies(policies),
            || self.secondary.save_policies(policies),
        )
    }

    fn register_policy(&self, policy: PrivacyPolicy) -> Result<PrivacyPolicy> {
        let stored = self.primary.register_policy(policy)?;
        upsert_secondary(
            self.policy,
            "privacy.register_policy",
            &stored,
            |p| &p.id,
            || self.secondary.load_policies(),
            |items| self.secondary.save_policies(items),
        );
        Ok(stored)
    }

    fn update_policy(&self, policy: PrivacyPolicy) -> Result<PrivacyPolicy> {
        let updated = self.primary.update_policy(policy)?;
        upsert_secondary(
            self.policy,
            "privacy.update_policy",
            &updated,
            |p| &p.id,
            || self.secondary.load_policies(),
            |items| self.secondary.save_policies(items),
        );
        Ok(updated)
    }
}

pub struct DualFleetStore {
    primary: Arc<dyn FleetStore>,
    secondary: Arc<dyn FleetStore>,
    policy: DualPolicy,
}

impl DualFleetStore {
    fn mirror_device(&self, label: &str, device: &DeviceRecord) {
        upsert_secondary(
            self.policy,
            label,
            device,
            |d| &d.id,
            || self.secondary.load_devices(),
            |items| self.secondary.save_devices(items),
        );
    }
}

impl FleetStore for DualFleetStore {
    fn load_devices(&self) -> Result<Vec<DeviceRecord>> {
        read_with_fallback(
            self.policy,
            "fleet.load_devices",
            || self.primary.load_devices(),
            || self.secondary.load_devices(),
        )
    }

    fn save_devices(&self, devices: &[DeviceRecord]) -> Result<()> {
        write_dual(
            self.policy,
            "fleet.save_devices",
            || self.primary.save_devices(devices),
            || self.secondary.save_devices(devices),
        )
    }

    fn register_device(&self, device: DeviceRecord) -> Result<DeviceRecord> {
        let stored = self.primary.register_device(device)?;
        self.mirror_device("fleet.register_device", &stored);
        Ok(stored)
    }

    fn update_device(&self, device: DeviceRecord) -> Result<DeviceRecord> {
        let updated = self.primary.update_device(device)?;
        self.mirror_device("fleet.update_device", &updated);
        Ok(updated)
    }

    fn update_device_status(
        &self,
        device_id: &str,
        status: &str,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<Option<DeviceRecord>> {
        let updated = self
            .primary
            .update_device_status(device_id, status, last_seen_at)?;
        if let Some(device) = &updated {
            self.mirror_device("fleet.update_device_status", device);
        }
        Ok(updated)
    }
}

pub struct DualWorkflowStore {
    primary: Arc<dyn WorkflowStore>,
    secondary: Arc<dyn WorkflowStore>,
    policy: DualPolicy,
}

impl WorkflowStore for DualWorkflowStore {
    fn load_workflows(&self) -> Result<Vec<WorkflowSpec>> {
        read_with_fallback(
            self.policy,
            "workflows.load_workflows",
            || self.primary.load_workflows(),
            || self.secondary.load_workflows(),
        )
    }

    fn save_workflows(&self, workflows: &[WorkflowSpec]) -> Result<()> {
        write_dual(
            self.policy,
            "workflows.save_workflows",
            || self.primary.save_workflows(workflows),
            || self.secondary.save_workflows(workflows),
        )
    }

    fn register_workflow(&self, workflow: WorkflowSpec) -> Result<WorkflowSpec> {
        let stored = self.primary.register_workflow(workflow)?;
        upsert_secondary(
            self.policy,
            "workflows.register_workflow",
            &stored,
            |w| &w.id,
            || self.secondary.load_workflows(),
            |items| self.secondary.save_workflows(items),
        );
        Ok(stored)
    }

    fn update_workflow(&self, workflow: WorkflowSpec) -> Result<WorkflowSpec> {
        let updated = self.primary.update_workflow(workflow)?;
        upsert_secondary(
            self.policy,
            "workflows.update_workflow",
            &updated,
            |w| &w.id,
            || self.secondary.load_workflows(),
            |items| self.secondary.save_workflows(items),
        );
        Ok(updated)
    }

    fn load_workflow_runs(&self) -> Result<Vec<WorkflowRun>> {
        read_with_fallback(
            self.policy,
            "workflows.load_workflow_runs",
            || self.primary.load_workflow_runs(),
            || self.secondary.load_workflow_runs(),
        )
    }

    fn save_workflow_runs(&self, runs: &[WorkflowRun]) -> Result<()> {
        write_dual(
            self.policy,
            "workflows.save_workflow_runs",
            || self.primary.save_workflow_runs(runs),
            || self.secondary.save_workflow_runs(runs),
        )
    }

    fn register_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun> {
        let stored = self.primary.register_workflow_run(run)?;
        upsert_secondary(
            self.policy,
            "workflows.register_workflow_run",
            &stored,
            |r| &r.id,
            || self.secondary.load_workflow_runs(),
            |items| self.secondary.save_workflow_runs(items),
        );
        Ok(stored)
    }

    fn update_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun> {
        let updated = self.primary.update_workflow_run(run)?;
        upsert_secondary(
            self.policy,
            "workflows.update_workflow_run",
            &updated,
            |r| &r.id,
            || self.secondary.load_workflow_runs(),
            |items| self.secondary.save_workflow_runs(items),
        );
        Ok(updated)
    }

    fn list_workflow_runs(
        &self,
        workflow_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<WorkflowRun>> {
        read_with_fallback(
            self.policy,
            "workflows.list_workflow_runs",
            || self.primary.list_workflow_runs(workflow_id, limit),
            || self.secondary.list_workflow_runs(workflow_id, limit),
        )
    }
}

pub struct DualDataFactoryStore {
    primary: Arc<dyn DataFactoryStore>,
    secondary: Arc<dyn DataFactoryStore>,
    policy: DualPolicy,
}

impl DualDataFactoryStore {
    fn mirror_job(&self, label: &str, job: &TrainingJob) {
        upsert_secondary(
            self.policy,
            label,
            job,
            |j| &j.id,
            || self.secondary.load_training_jobs(),
            |items| self.secondary.save_training_jobs(items),
        );
    }
}

impl DataFactoryStore for DualDataFactoryStore {
    fn load_models(&self) -> Result<Vec<ModelRecord>> {
        read_with_fallback(
            self.policy,
            "data_factory.load_models",
            || self.primary.load_models(),
            || self.secondary.load_models(),
        )
    }

    fn save_models(&self, models: &[ModelRecord]) -> Result<()> {
        write_dual(
            self.policy,
            "data_factory.save_models",
            || self.primary.save_models(models),
            || self.secondary.save_models(models),
        )
    }

    fn register_model(&self, model: ModelRecord) -> Result<ModelRecord> {
        let stored = self.primary.register_model(model)?;
        upsert_secondary(
            self.policy,
            "data_factory.register_model",
            &stored,
            |m| &m.id,
            || self.secondary.load_models(),
            |items| self.secondary.save_models(items),
        );
        Ok(stored)
    }

    fn update_model(&self, model: ModelRecord) -> Result<ModelRecord> {
        let updated = self.primary.update_model(model)?;
        upsert_secondary(
            self.policy,
            "data_factory.update_model",
            &updated,
            |m| &m.id,
            || self.secondary.load_models(),
            |items| self.secondary.save_models(items),
        );
        Ok(updated)
    }

    fn load_training_jobs(&self) -> Result<Vec<TrainingJob>> {
        read_with_fallback(
            self.policy,
            "data_factory.load_training_jobs",
            || self.primary.load_training_jobs(),
            || self.secondary.load_training_jobs(),
        )
    }

    fn save_training_jobs(&self, jobs: &[TrainingJob]) -> Result<()> {
        write_dual(
            self.policy,
            "data_factory.save_training_jobs",
            || self.primary.save_training_jobs(jobs),
            || self.secondary.save_training_jobs(jobs),
        )
    }

    fn register_training_job(&self, job: TrainingJob) -> Result<TrainingJob> {
        let stored = self.primary.register_training_job(job)?;
        self.mirror_job("data_factory.register_training_job", &stored);
        Ok(stored)
    }

    fn update_training_job(&self, job: TrainingJob) -> Result<TrainingJob> {
        let updated = self.primary.update_training_job(job)?;
        self.mirror_job("data_factory.update_training_job", &updated);
        Ok(updated)
    }

    fn get_training_job(&self, job_id: &str) -> Result<Option<TrainingJob>> {
        read_with_fallback(
            self.policy,
            "data_factory.get_training_job",
            || self.primary.get_training_job(job_id),
            || self.secondary.get_training_job(job_id),
        )
    }

    fn list_training_jobs(
        &self,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TrainingJob>> {
        read_with_fallback(
            self.policy,
            "data_factory.list_training_jobs",
            || self.primary.list_training_jobs(status, limit),
            || self.secondary.list_training_jobs(status, limit),
        )
    }

    fn mark_training_job_running(&self, job_id: &str) -> Result<TrainingJob> {
        let updated = self.primary.mark_training_job_running(job_id)?;
        self.mirror_job("data_factory.mark_training_job_running", &updated);
        Ok(updated)
    }

    fn mark_training_job_completed(
        &self,
        job_id: &str,
        output: Option<BTreeMap<String, Value>>,
        metrics: Option<BTreeMap<String, Value>>,
    ) -> Result<TrainingJob> {
        let updated = self
            .primary
            .mark_training_job_completed(job_id, output, metrics)?;
        self.mirror_job("data_factory.mark_training_job_completed", &updated);
        Ok(updated)
    }

    fn mark_training_job_failed(&self, job_id: &str, error: Option<String>) -> Result<TrainingJob> {
        let updated = self.primary.mark_training_job_failed(job_id, error)?;
        self.mirror_job("data_factory.mark_training_job_failed", &updated);
        Ok(updated)
    }

    fn mark_training_job_canceled(&self, job_id: &str) -> Result<TrainingJob> {
        let updated = self.primary.mark_training_job_canceled(job_id)?;
        self.mirror_job("data_factory.mark_training_job_canceled", &updated);
        Ok(updated)
    }
}

pub struct DualConnectorStore {
    primary: Arc<dyn ConnectorStore>,
    secondary: Arc<dyn ConnectorStore>,
    policy: DualPolicy,
}

impl ConnectorStore for DualConnectorStore {
    fn load_ocr_connectors(&self) -> Result<Vec<OcrConnector>> {
        read_with_fallback(
            self.policy,
            "connectors.load_ocr_connectors",
            || self.primary.load_ocr_connectors(),
            || self.secondary.load_ocr_connectors(),
        )
    }

    fn save_ocr_connectors(&self, connectors: &[OcrConnector]) -> Result<()> {
        write_dual(
            self.policy,
            "connectors.save_ocr_connectors",
            || self.primary.save_ocr_connectors(connectors),
            || self.secondary.save_ocr_connectors(connectors),
        )
    }

    fn register_ocr_connector(&self, connector: OcrConnector) -> Result<OcrConnector> {
        let stored = self.primary.register_ocr_connector(connector)?;
        upsert_secondary(
            self.policy,
            "connectors.register_ocr_connector",
            &stored,
            |c| &c.id,
            || self.secondary.load_ocr_connectors(),
            |items| self.secondary.save_ocr_connectors(items),
        );
        Ok(stored)
    }

    fn update_ocr_connector(&self, connector: OcrConnector) -> Result<OcrConnector> {
        let updated = self.primary.update_ocr_connector(connector)?;
        upsert_secondary(
            self.policy,
            "connectors.update_ocr_connector",
            &updated,
            |c| &c.id,
            || self.secondary.load_ocr_connectors(),
            |items| self.secondary.save_ocr_connectors(items),
        );
        Ok(updated)
    }
}

pub struct DualApiKeyStore {
    primary: Arc<dyn ApiKeyStore>,
    secondary: Arc<dyn ApiKeyStore>,
    policy: DualPolicy,
}

impl ApiKeyStore for DualApiKeyStore {
    fn load_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        read_with_fallback(
            self.policy,
            "api_keys.load_api_keys",
            || self.primary.load_api_keys(),
            || self.secondary.load_api_keys(),
        )
    }

    fn save_api_keys(&self, api_keys: &[ApiKeyRecord]) -> Result<()> {
        write_dual(
            self.policy,
            "api_keys.save_api_keys",
            || self.primary.save_api_keys(api_keys),
            || self.secondary.save_api_keys(api_keys),
        )
    }

    fn register_api_key(&self, api_key: ApiKeyRecord) -> Result<ApiKeyRecord> {
        let stored = self.primary.register_api_key(api_key)?;
        upsert_secondary(
            self.policy,
            "api_keys.register_api_key",
            &stored,
            |k| &k.id,
            || self.secondary.load_api_keys(),
            |items| self.secondary.save_api_keys(items),
        );
        Ok(stored)
    }

    fn update_api_key(&self, api_key: ApiKeyRecord) -> Result<ApiKeyRecord> {
        let updated = self.primary.update_api_key(api_key)?;
        upsert_secondary(
            self.policy,
            "api_keys.update_api_key",
            &updated,
            |k| &k.id,
            || self.secondary.load_api_keys(),
            |items| self.secondary.save_api_keys(items),
        );
        Ok(updated)
    }
}

pub struct DualChaosStore {
    primary: Arc<dyn ChaosStore>,
    secondary: Arc<dyn ChaosStore>,
    policy: DualPolicy,
}

impl ChaosStore for DualChaosStore {
    fn load_chaos_policies(&self) -> Result<Vec<ChaosPolicy>> {
        read_with_fallback(
            self.policy,
            "chaos.load_chaos_policies",
            || self.primary.load_chaos_policies(),
            || self.secondary.load_chaos_policies(),
        )
    }

    fn save_chaos_policies(&self, policies: &[ChaosPolicy]) -> Result<()> {
        write_dual(
            self.policy,
            "chaos.save_chaos_policies",
            || self.primary.save_chaos_policies(policies),
            || self.secondary.save_chaos_policies(policies),
        )
    }

    fn register_chaos_policy(&self, policy: ChaosPolicy) -> Result<ChaosPolicy> {
        let stored = self.primary.register_chaos_policy(policy)?;
        upsert_secondary(
            self.policy,
            "chaos.register_chaos_policy",
            &stored,
            |p| &p.id,
            || self.secondary.load_chaos_policies(),
            |items| self.secondary.save_chaos_policies(items),
        );
        Ok(stored)
    }

    fn load_chaos_runs(&self) -> Result<Vec<ChaosRun>> {
        read_with_fallback(
            self.policy,
            "chaos.load_chaos_runs",
            || self.primary.load_chaos_runs(),
            || self.secondary.load_chaos_runs(),
        )
    }

    fn save_chaos_runs(&self, runs: &[ChaosRun]) -> Result<()> {
        write_dual(
            self.policy,
            "chaos.save_chaos_runs",
            || self.primary.save_chaos_runs(runs),
            || self.secondary.save_chaos_runs(runs),
        )
    }

    fn register_chaos_run(&self, run: ChaosRun) -> Result<ChaosRun> {
        let stored = self.primary.register_chaos_run(run)?;
        upsert_secondary(
            self.policy,
            "chaos.register_chaos_run",
            &stored,
            |r| &r.id,
            || self.secondary.load_chaos_runs(),
            |items| self.secondary.save_chaos_runs(items),
        );
        Ok(stored)
    }
}

/// Compose two full bundles under one arbitration policy.
pub fn dual_bundle(primary: StoreBundle, secondary: StoreBundle, policy: DualPolicy) -> StoreBundle {
    StoreBundle {
        rbac: Arc::new(DualRbacStore {
            primary: primary.rbac,
            secondary: secondary.rbac,
            policy,
        }),
        abac: Arc::new(DualAbacStore {
            primary: primary.abac,
            secondary: secondary.abac,
            policy,
        }),
        privacy: Arc::new(DualPrivacyStore {
            primary: primary.privacy,
            secondary: secondary.privacy,
            policy,
        }),
        fleet: Arc::new(DualFleetStore {
            primary: primary.fleet,
            secondary: secondary.fleet,
            policy,
        }),
        workflows: Arc::new(DualWorkflowStore {
            primary: primary.workflows,
            secondary: secondary.workflows,
            policy,
        }),
        data_factory: Arc::new(DualDataFactoryStore {
            primary: primary.data_factory,
            secondary: secondary.data_factory,
            policy,
        }),
        connectors: Arc::new(DualConnectorStore {
            primary: primary.connectors,
            secondary: secondary.connectors,
            policy,
        }),
        api_keys: Arc::new(DualApiKeyStore {
            primary: primary.api_keys,
            secondary: secondary.api_keys,
            policy,
        }),
        chaos: Arc::new(DualChaosStore {
            primary: primary.chaos,
            secondary: secondary.chaos,
            policy,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Privacy store that counts calls and can be forced to fail or answer
    /// with a fixed list.
    struct ScriptedPrivacy {
        loads: AtomicUsize,
        saves: AtomicUsize,
        load_result: std::sync::Mutex<Option<Vec<PrivacyPolicy>>>,
        fail_writes: bool,
        fail_reads: bool,
    }

    impl ScriptedPrivacy {
        fn answering(policies: Vec<PrivacyPolicy>) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                saves: AtomicUsize::new(0),
                load_result: std::sync::Mutex::new(Some(policies)),
                fail_writes: false,
                fail_reads: false,
            }
        }

        fn failing_reads() -> Self {
            let mut s = Self::answering(vec![]);
            s.fail_reads = true;
            s
        }

        fn failing_writes() -> Self {
            let mut s = Self::answering(vec![]);
            s.fail_writes = true;
            s
        }
    }

    impl PrivacyStore for ScriptedPrivacy {
        fn load_policies(&self) -> Result<Vec<PrivacyPolicy>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(crate::error::StoreError::Backend("read refused".into()));
            }
            Ok(self.load_result.lock().unwrap().clone().unwrap_or_default())
        }

        fn save_policies(&self, policies: &[PrivacyPolicy]) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(crate::error::StoreError::Backend("write refused".into()));
            }
            *self.load_result.lock().unwrap() = Some(policies.to_vec());
            Ok(())
        }

        fn register_policy(&self, policy: PrivacyPolicy) -> Result<PrivacyPolicy> {
            if self.fail_writes {
                return Err(crate::error::StoreError::Backend("write refused".into()));
            }
            let mut items = self.load_result.lock().unwrap().clone().unwrap_or_default();
            items.push(policy.clone());
            *self.load_result.lock().unwrap() = Some(items);
            Ok(policy)
        }

        fn update_policy(&self, policy: PrivacyPolicy) -> Result<PrivacyPolicy> {
            Ok(policy)
        }
    }

    fn dual(
        primary: ScriptedPrivacy,
        secondary: ScriptedPrivacy,
        policy: DualPolicy,
    ) -> (Arc<ScriptedPrivacy>, Arc<ScriptedPrivacy>, DualPrivacyStore) {
        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        let store = DualPrivacyStore {
            primary: primary.clone(),
            secondary: secondary.clone(),
            policy,
        };
        (primary, secondary, store)
    }

    fn fallback_policy() -> DualPolicy {
        DualPolicy {
            read_mode: ReadMode::Fallback,
            write_mode: WriteMode::Dual,
            fallback_on_empty: true,
        }
    }

    #[test]
    fn primary_mode_never_touches_secondary() {
        let (_, secondary, store) = dual(
            ScriptedPrivacy::answering(vec![]),
            ScriptedPrivacy::answering(vec![PrivacyPolicy::new("pii")]),
            DualPolicy {
                read_mode: ReadMode::Primary,
                write_mode: WriteMode::Single,
                fallback_on_empty: false,
            },
        );
        let loaded = store.load_policies().unwrap();
        assert!(loaded.is_empty());
        assert_eq!(secondary.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_empty_primary_skips_secondary_in_fallback_mode() {
        let (_, secondary, store) = dual(
            ScriptedPrivacy::answering(vec![PrivacyPolicy::new("pii")]),
            ScriptedPrivacy::answering(vec![]),
            fallback_policy(),
        );
        let loaded = store.load_policies().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(secondary.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_primary_falls_back_when_enabled() {
        let (_, secondary, store) = dual(
            ScriptedPrivacy::answering(vec![]),
            ScriptedPrivacy::answering(vec![PrivacyPolicy::new("pii")]),
            fallback_policy(),
        );
        let loaded = store.load_policies().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "pii");
        assert_eq!(secondary.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn primary_error_falls_back() {
        let (_, _, store) = dual(
            ScriptedPrivacy::failing_reads(),
            ScriptedPrivacy::answering(vec![PrivacyPolicy::new("pii")]),
            fallback_policy(),
        );
        let loaded = store.load_policies().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn primary_error_propagates_without_fallback_mode() {
        let (_, _, store) = dual(
            ScriptedPrivacy::failing_reads(),
            ScriptedPrivacy::answering(vec![PrivacyPolicy::new("pii")]),
            DualPolicy {
                read_mode: ReadMode::Primary,
                write_mode: WriteMode::Single,
                fallback_on_empty: false,
            },
        );
        assert!(store.load_policies().is_err());
    }

    #[test]
    fn single_write_mode_never_writes_secondary() {
        let (_, secondary, store) = dual(
            ScriptedPrivacy::answering(vec![]),
            ScriptedPrivacy::answering(vec![]),
            DualPolicy {
                read_mode: ReadMode::Primary,
                write_mode: WriteMode::Single,
                fallback_on_empty: false,
            },
        );
        store.save_policies(&[PrivacyPolicy::new("pii")]).unwrap();
        assert_eq!(secondary.saves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn secondary_write_failure_is_swallowed() {
        let (_, _, store) = dual(
            ScriptedPrivacy::answering(vec![]),
            ScriptedPrivacy::failing_writes(),
            fallback_policy(),
        );
        store.save_policies(&[PrivacyPolicy::new("pii")]).unwrap();
        let registered = store.register_policy(PrivacyPolicy::new("faces"));
        assert!(registered.is_ok());
    }

    #[test]
    fn dual_register_mirrors_to_secondary() {
        let (_, secondary, store) = dual(
            ScriptedPrivacy::answering(vec![]),
            ScriptedPrivacy::answering(vec![]),
            fallback_policy(),
        );
        let policy = store.register_policy(PrivacyPolicy::new("pii")).unwrap();
        let mirrored = secondary.load_result.lock().unwrap().clone().unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].id, policy.id);
    }
}
