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

//! Filesystem-JSON control-plane backend.
//!
//! One JSON document per collection under `control/<name>.json`, each shaped
//! `{"updated_at": <iso8601>, "<plural>": [entity, ...]}` and written with
//! temp-file + rename. Intended for single-node and dev deployments.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use modalith_core::entities::{
    self, AbacPolicy, ApiKeyRecord, ChaosPolicy, ChaosRun, DeviceRecord, ModelRecord,
    OcrConnector, PrivacyPolicy, RoleBindings, TrainingJob, WorkflowRun, WorkflowSpec,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::interfaces::{
    AbacStore, ApiKeyStore, ChaosStore, ConnectorStore, DataFactoryStore, FleetStore,
    PrivacyStore, RbacStore, WorkflowStore,
};

pub struct JsonControlStore {
    control_dir: PathBuf,
}

impl JsonControlStore {
    /// `graph_root` is the snapshot/control root; collections live under
    /// `<graph_root>/control/`.
    pub fn open(graph_root: impl AsRef<Path>) -> Result<Self> {
        let control_dir = graph_root.as_ref().join("control");
        fs::create_dir_all(&control_dir)?;
        Ok(Self { control_dir })
    }

    fn collection_path(&self, file: &str) -> PathBuf {
        self.control_dir.join(file)
    }

    fn load_collection<T: DeserializeOwned>(&self, file: &str, key: &str) -> Result<Vec<T>> {
        let path = self.collection_path(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read(&path)?;
        let doc: Value = serde_json::from_slice(&raw)?;
        let items = match doc.get(key) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<T>(item) {
                Ok(value) => out.push(value),
                Err(err) => {
                    warn!(collection = file, error = %err, "skipping malformed entity");
                }
            }
        }
        Ok(out)
    }

    fn save_collection<T: Serialize>(&self, file: &str, key: &str, items: &[T]) -> Result<()> {
        let mut doc = serde_json::Map::new();
        doc.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);
        doc.insert(key.to_string(), serde_json::to_value(items)?);
        let path = self.collection_path(file);
        atomic_write_json(&path, &Value::Object(doc))
    }

    fn upsert<T: Serialize + DeserializeOwned + Clone>(
        &self,
        file: &str,
        key: &str,
        item: T,
        id_of: impl Fn(&T) -> &str,
    ) -> Result<T> {
        let mut items: Vec<T> = self.load_collection(file, key)?;
        let id = id_of(&item).to_string();
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
        self.save_collection(file, key, &items)?;
        Ok(item)
    }
}

fn atomic_write_json(path: &Path, doc: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(doc)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct BindingEntry {
    credential_id: String,
    roles: Vec<String>,
}

impl RbacStore for JsonControlStore {
    fn load_role_bindings(&self) -> Result<RoleBindings> {
        let entries: Vec<BindingEntry> = self.load_collection("rbac_bindings.json", "bindings")?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.credential_id, entry.roles))
            .collect())
    }

    fn save_role_bindings(&self, bindings: &RoleBindings) -> Result<()> {
        let entries: Vec<BindingEntry> = bindings
            .iter()
            .map(|(credential_id, roles)| BindingEntry {
                credential_id: credential_id.clone(),
                roles: roles.clone(),
            })
            .collect();
        self.save_collection("rbac_bindings.json", "bindings", &entries)
    }
}

impl AbacStore for JsonControlStore {
    fn load_policies(&self) -> Result<Vec<AbacPolicy>> {
        self.load_collection("abac_policies.json", "policies")
    }

    fn save_policies(&self, policies: &[AbacPolicy]) -> Result<()> {
        self.save_collection("abac_policies.json", "policies", policies)
    }
}

impl PrivacyStore for JsonControlStore {
    fn load_policies(&self) -> Result<Vec<PrivacyPolicy>> {
        self.load_collection("privacy_policies.json", "policies")
    }

    fn save_policies(&self, policies: &[PrivacyPolicy]) -> Result<()> {
        self.save_collection("privacy_policies.json", "policies", policies)
    }

    fn register_policy(&self, policy: PrivacyPolicy) -> Result<PrivacyPolicy> {
        self.upsert("privacy_policies.json", "policies", policy, |p| &p.id)
    }

    fn update_policy(&self, mut policy: PrivacyPolicy) -> Result<PrivacyPolicy> {
        policy.updated_at = entities::bump_updated_at(policy.updated_at);
        self.upsert("privacy_policies.json", "policies", policy, |p| &p.id)
    }
}

impl FleetStore for JsonControlStore {
    fn load_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.load_collection("devices.json", "devices")
    }

    fn save_devices(&self, devices: &[DeviceRecord]) -> Result<()> {
        self.save_collection("devices.json", "devices", devices)
    }

    fn register_device(&self, device: DeviceRecord) -> Result<DeviceRecord> {
        self.upsert("devices.json", "devices", device, |d| &d.id)
    }

    fn update_device(&self, mut device: DeviceRecord) -> Result<DeviceRecord> {
        device.updated_at = entities::bump_updated_at(device.updated_at);
        self.upsert("devices.json", "devices", device, |d| &d.id)
    }

    fn update_device_status(
        &self,
        device_id: &str,
        status: &str,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<Option<DeviceRecord>> {
        let mut devices = self.load_devices()?;
        let Some(device) = devices.iter_mut().find(|d| d.id == device_id) else {
            return Ok(None);
        };
        device.set_status(status, last_seen_at);
        let updated = device.clone();
        self.save_devices(&devices)?;
        Ok(Some(updated))
    }
}

impl WorkflowStore for JsonControlStore {
    fn load_workflows(&self) -> Result<Vec<WorkflowSpec>> {
        self.load_collection("workflows.json", "workflows")
    }

    fn save_workflows(&self, workflows: &[WorkflowSpec]) -> Result<()> {
        self.save_collection("workflows.json", "workflows", workflows)
    }

    fn register_workflow(&self, workflow: WorkflowSpec) -> Result<WorkflowSpec> {
        self.upsert("workflows.json", "workflows", workflow, |w| &w.id)
    }

    fn update_workflow(&self, mut workflow: WorkflowSpec) -> Result<WorkflowSpec> {
        workflow.updated_at = entities::bump_updated_at(workflow.updated_at);
        self.upsert("workflows.json", "workflows", workflow, |w| &w.id)
    }

    fn load_workflow_runs(&self) -> Result<Vec<WorkflowRun>> {
        self.load_collection("workflow_runs.json", "workflow_runs")
    }

    fn save_workflow_runs(&self, runs: &[WorkflowRun]) -> Result<()> {
        self.save_collection("workflow_runs.json", "workflow_runs", runs)
    }

    fn register_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun> {
        self.upsert("workflow_runs.json", "workflow_runs", run, |r| &r.id)
    }

    fn update_workflow_run(&self, mut run: WorkflowRun) -> Result<WorkflowRun> {
        run.updated_at = entities::bump_updated_at(run.updated_at);
        self.upsert("workflow_runs.json", "workflow_runs", run, |r| &r.id)
    }

    fn list_workflow_runs(
        &self,
        workflow_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<WorkflowRun>> {
        let mut runs = self.load_workflow_runs()?;
        if let Some(workflow_id) = workflow_id {
            runs.retain(|run| run.workflow_id == workflow_id);
        }
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }
}

impl DataFactoryStore for JsonControlStore {
    fn load_models(&self) -> Result<Vec<ModelRecord>> {
        self.load_collection("model_registry.json", "models")
    }

    fn save_models(&self, models: &[ModelRecord]) -> Result<()> {
        self.save_collection("model_registry.json", "models", models)
    }

    fn register_model(&self, model: ModelRecord) -> Result<ModelRecord> {
        self.upsert("model_registry.json", "models", model, |m| &m.id)
    }

    fn update_model(&self, mut model: ModelRecord) -> Result<ModelRecord> {
        model.updated_at = entities::bump_updated_at(model.updated_at);
        self.upsert("model_registry.json", "models", model, |m| &m.id)
    }

    fn load_training_jobs(&self) -> Result<Vec<TrainingJob>> {
        self.load_collection("training_jobs.json", "training_jobs")
    }

    fn save_training_jobs(&self, jobs: &[TrainingJob]) -> Result<()> {
        self.save_collection("training_jobs.json", "training_jobs", jobs)
    }

    fn register_training_job(&self, job: TrainingJob) -> Result<TrainingJob> {
        self.upsert("training_jobs.json", "training_jobs", job, |j| &j.id)
    }

    fn update_training_job(&self, mut job: TrainingJob) -> Result<TrainingJob> {
        job.updated_at = entities::bump_updated_at(job.updated_at);
        self.upsert("training_jobs.json", "training_jobs", job, |j| &j.id)
    }

    fn get_training_job(&self, job_id: &str) -> Result<Option<TrainingJob>> {
        Ok(self
            .load_training_jobs()?
            .into_iter()
            .find(|job| job.id == job_id))
    }

    fn list_training_jobs(
        &self,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TrainingJob>> {
        let mut jobs = self.load_training_jobs()?;
        if let Some(status) = status {
            jobs.retain(|job| job.status == status);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    fn mark_training_job_running(&self, job_id: &str) -> Result<TrainingJob> {
        self.mark_job(job_id, |job| {
            job.mark(entities::data_factory::TRAINING_STATUS_RUNNING)
        })
    }

    fn mark_training_job_completed(
        &self,
        job_id: &str,
        output: Option<BTreeMap<String, Value>>,
        metrics: Option<BTreeMap<String, Value>>,
    ) -> Result<TrainingJob> {
        self.mark_job(job_id, |job| {
            if output.is_some() {
                job.output = output.clone();
            }
            if metrics.is_some() {
                job.metrics = metrics.clone();
            }
            job.mark(entities::data_factory::TRAINING_STATUS_COMPLETED)
        })
    }

    fn mark_training_job_failed(&self, job_id: &str, error: Option<String>) -> Result<TrainingJob> {
        self.mark_job(job_id, |job| {
            job.error = error.clone();
            job.mark(entities::data_factory::TRAINING_STATUS_FAILED)
        })
    }

    fn mark_training_job_canceled(&self, job_id: &str) -> Result<TrainingJob> {
        self.mark_job(job_id, |job| {
            job.mark(entities::data_factory::TRAINING_STATUS_CANCELED)
        })
    }
}

impl JsonControlStore {
    fn mark_job(
        &self,
        job_id: &str,
        mut mutate: impl FnMut(&mut TrainingJob),
    ) -> Result<TrainingJob> {
        let mut jobs = self.load_training_jobs()?;
        let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
            return Err(StoreError::NotFound(format!("training job {job_id}")));
        };
        mutate(job);
        let updated = job.clone();
        self.save_training_jobs(&jobs)?;
        Ok(updated)
    }
}

impl ConnectorStore for JsonControlStore {
    fn load_ocr_connectors(&self) -> Result<Vec<OcrConnector>> {
        self.load_collection("ocr_connectors.json", "ocr_connectors")
    }

    fn save_ocr_connectors(&self, connectors: &[OcrConnector]) -> Result<()> {
        for connector in connectors {
            connector.validate()?;
        }
        self.save_collection("ocr_connectors.json", "ocr_connectors", connectors)
    }

    fn register_ocr_connector(&self, connector: OcrConnector) -> Result<OcrConnector> {
        connector.validate()?;
        self.upsert("ocr_connectors.json", "ocr_connectors", connector, |c| &c.id)
    }

    fn update_ocr_connector(&self, mut connector: OcrConnector) -> Result<OcrConnector> {
        connector.validate()?;
        connector.updated_at = entities::bump_updated_at(connector.updated_at);
        self.upsert("ocr_connectors.json", "ocr_connectors", connector, |c| &c.id)
    }
}

impl ApiKeyStore for JsonControlStore {
    fn load_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        self.load_collection("api_keys.json", "api_keys")
    }

    fn save_api_keys(&self, api_keys: &[ApiKeyRecord]) -> Result<()> {
        self.save_collection("api_keys.json", "api_keys", api_keys)
    }

    fn register_api_key(&self, api_key: ApiKeyRecord) -> Result<ApiKeyRecord> {
        self.upsert("api_keys.json", "api_keys", api_key, |k| &k.id)
    }

    fn update_api_key(&self, mut api_key: ApiKeyRecord) -> Result<ApiKeyRecord> {
        api_key.updated_at = entities::bump_updated_at(api_key.updated_at);
        self.upsert("api_keys.json", "api_keys", api_key, |k| &k.id)
    }
}

impl ChaosStore for JsonControlStore {
    fn load_chaos_policies(&self) -> Result<Vec<ChaosPolicy>> {
        self.load_collection("chaos_policies.json", "chaos_policies")
    }

    fn save_chaos_policies(&self, policies: &[ChaosPolicy]) -> Result<()> {
        for policy in policies {
            policy.validate()?;
        }
        self.save_collection("chaos_policies.json", "chaos_policies", policies)
    }

    fn register_chaos_policy(&self, policy: ChaosPolicy) -> Result<ChaosPolicy> {
        policy.validate()?;
        self.upsert("chaos_policies.json", "chaos_policies", policy, |p| &p.id)
    }

    fn load_chaos_runs(&self) -> Result<Vec<ChaosRun>> {
        self.load_collection("chaos_runs.json", "chaos_runs")
    }

    fn save_chaos_runs(&self, runs: &[ChaosRun]) -> Result<()> {
        self.save_collection("chaos_runs.json", "chaos_runs", runs)
    }

    fn register_chaos_run(&self, run: ChaosRun) -> Result<ChaosRun> {
        self.upsert("chaos_runs.json", "chaos_runs", run, |r| &r.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modalith_core::entities::{ChaosStep, PolicyEffect};
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, JsonControlStore) {
        let dir = TempDir::new().unwrap();
        let store = JsonControlStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn api_keys_round_trip() {
        let (_dir, store) = store();
        let record = ApiKeyRecord::new("ci-key", "deadbeef");
        store.register_api_key(record.clone()).unwrap();

        let loaded = store.load_api_keys().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, record.id);
        assert_eq!(loaded[0].key_hash, "deadbeef");
    }

    #[test]
    fn register_replaces_by_id() {
        let (_dir, store) = store();
        let mut policy = PrivacyPolicy::new("pii");
        store.register_policy(policy.clone()).unwrap();
        policy.enabled = false;
        store.register_policy(policy.clone()).unwrap();

        let loaded = PrivacyStore::load_policies(&store).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[0].enabled);
    }

    #[test]
    fn update_bumps_updated_at() {
        let (_dir, store) = store();
        let policy = PrivacyPolicy::new("pii");
        let registered = store.register_policy(policy).unwrap();
        let updated = store.update_policy(registered.clone()).unwrap();
        assert!(updated.updated_at > registered.updated_at);
    }

    #[test]
    fn rbac_bindings_round_trip() {
        let (_dir, store) = store();
        let mut bindings = RoleBindings::new();
        bindings.insert("key-1".into(), vec!["reader".into()]);
        store.save_role_bindings(&bindings).unwrap();
        assert_eq!(store.load_role_bindings().unwrap(), bindings);
    }

    #[test]
    fn malformed_entity_is_skipped_not_fatal() {
        let (dir, store) = store();
        let policy = AbacPolicy {
            id: "p-1".into(),
            effect: PolicyEffect::Allow,
            conditions: Default::default(),
        };
        AbacStore::save_policies(&store, &[policy]).unwrap();

        // Corrupt one entry in place; the loader should keep the rest.
        let path = dir.path().join("control/abac_policies.json");
        let mut doc: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        doc["policies"]
            .as_array_mut()
            .unwrap()
            .push(json!({"effect": 42}));
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let loaded = AbacStore::load_policies(&store).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "p-1");
    }

    #[test]
    fn workflow_runs_list_orders_desc_with_limit() {
        let (_dir, store) = store();
        let spec = store.register_workflow(WorkflowSpec::new("wf")).unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut run = WorkflowRun::new(&spec.id);
            run.created_at = Utc::now();
            ids.push(store.register_workflow_run(run).unwrap().id);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let listed = store.list_workflow_runs(Some(&spec.id), Some(2)).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ids[2]);
        assert_eq!(listed[1].id, ids[1]);
    }

    #[test]
    fn training_job_lifecycle_marks() {
        let (_dir, store) = store();
        let job = store.register_training_job(TrainingJob::new("model-1")).unwrap();
        let running = store.mark_training_job_running(&job.id).unwrap();
        assert_eq!(running.status, "running");
        let failed = store
            .mark_training_job_failed(&job.id, Some("oom".into()))
            .unwrap();
        assert_eq!(failed.status, "failed");
        assert_eq!(failed.error.as_deref(), Some("oom"));
        assert!(store.get_training_job("missing").unwrap().is_none());
    }

    #[test]
    fn invalid_ocr_connector_is_rejected() {
        let (_dir, store) = store();
        let connector = OcrConnector::new("bad", "gopher://ocr");
        assert!(store.register_ocr_connector(connector).is_err());
        assert!(store.load_ocr_connectors().unwrap().is_empty());
    }

    #[test]
    fn chaos_policy_caps_checked_on_register() {
        let (_dir, store) = store();
        let mut policy = ChaosPolicy::new("drill");
        policy.steps.push(ChaosStep {
            name: "overlong".into(),
            failure_percent: 10.0,
            duration_s: 100_000,
        });
        assert!(store.register_chaos_policy(policy).is_err());
    }

    #[test]
    fn device_status_update_missing_device_is_none() {
        let (_dir, store) = store();
        assert!(store
            .update_device_status("nope", "online", None)
            .unwrap()
            .is_none());
        let device = store.register_device(DeviceRecord::new("cam")).unwrap();
        let updated = store
            .update_device_status(&device.id, "online", Some(Utc::now()))
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, "online");
    }
}
