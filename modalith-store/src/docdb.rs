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

//! Document-DB control-plane backend.
//!
//! One logical document per entity under a named collection, optionally under
//! a configurable collection prefix. All mutations go through `commit`
//! batches capped at [`MAX_BATCH_OPS`] operations. The driver seam is where a
//! vendor document database plugs in; the in-memory driver ships for dev and
//! tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
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

/// Upper bound on operations per committed batch.
pub const MAX_BATCH_OPS: usize = 450;

#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        collection: String,
        id: String,
        doc: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Minimal document-database surface the adaptor is written against.
pub trait DocumentDriver: Send + Sync {
    fn fetch_all(&self, collection: &str) -> Result<Vec<Value>>;

    /// Apply at most [`MAX_BATCH_OPS`] operations atomically per call.
    fn commit(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// Simple equality filter; the default scans `fetch_all`.
    fn fetch_filtered(&self, collection: &str, filters: &[(String, Value)]) -> Result<Vec<Value>> {
        let mut docs = self.fetch_all(collection)?;
        docs.retain(|doc| {
            filters
                .iter()
                .all(|(key, expected)| doc.get(key) == Some(expected))
        });
        Ok(docs)
    }
}

/// DashMap-backed driver for dev deployments and tests.
#[derive(Default)]
pub struct MemoryDriver {
    collections: DashMap<String, BTreeMap<String, Value>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentDriver for MemoryDriver {
    fn fetch_all(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        if ops.len() > MAX_BATCH_OPS {
            return Err(StoreError::Backend(format!(
                "batch of {} exceeds the {MAX_BATCH_OPS}-op commit bound",
                ops.len()
            )));
        }
        for op in ops {
            match op {
                WriteOp::Put {
                    collection,
                    id,
                    doc,
                } => {
                    self.collections.entry(collection).or_default().insert(id, doc);
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(mut docs) = self.collections.get_mut(&collection) {
                        docs.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct DocDbControlStore {
    driver: Arc<dyn DocumentDriver>,
    prefix: String,
}

impl DocDbControlStore {
    pub fn new(driver: Arc<dyn DocumentDriver>, prefix: impl Into<String>) -> Self {
        Self {
            driver,
            prefix: prefix.into(),
        }
    }

    fn collection(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{name}", self.prefix)
        }
    }

    fn commit_batched(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut ops = ops;
        while !ops.is_empty() {
            let rest = ops.split_off(ops.len().min(MAX_BATCH_OPS));
            self.driver.commit(ops)?;
            ops = rest;
        }
        Ok(())
    }

    fn load_all<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let docs = self.driver.fetch_all(&self.collection(name))?;
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<T>(doc) {
                Ok(value) => out.push(value),
                Err(err) => warn!(collection = name, error = %err, "skipping malformed document"),
            }
        }
        Ok(out)
    }

    /// Replace the whole collection: delete ids that disappeared, put the rest.
    fn replace_all<T: Serialize>(
        &self,
        name: &str,
        items: &[T],
        id_of: impl Fn(&T) -> String,
    ) -> Result<()> {
        let collection = self.collection(name);
        let existing: BTreeSet<String> = self
            .driver
            .fetch_all(&collection)?
            .into_iter()
            .filter_map(|doc| doc.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();
        let incoming: BTreeSet<String> = items.iter().map(&id_of).collect();

        let mut ops = Vec::new();
        for gone in existing.difference(&incoming) {
            ops.push(WriteOp::Delete {
                collection: collection.clone(),
                id: gone.clone(),
            });
        }
        for item in items {
            ops.push(WriteOp::Put {
                collection: collection.clone(),
                id: id_of(item),
                doc: serde_json::to_value(item)?,
            });
        }
        self.commit_batched(ops)
    }

    fn put_one<T: Serialize>(&self, name: &str, id: &str, item: &T) -> Result<()> {
        self.commit_batched(vec![WriteOp::Put {
            collection: self.collection(name),
            id: id.to_string(),
            doc: serde_json::to_value(item)?,
        }])
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BindingDoc {
    id: String,
    roles: Vec<String>,
}

impl RbacStore for DocDbControlStore {
    fn load_role_bindings(&self) -> Result<RoleBindings> {
        let docs: Vec<BindingDoc> = self.load_all("rbac_bindings")?;
        Ok(docs.into_iter().map(|doc| (doc.id, doc.roles)).collect())
    }

    fn save_role_bindings(&self, bindings: &RoleBindings) -> Result<()> {
        let docs: Vec<BindingDoc> = bindings
            .iter()
            .map(|(credential_id, roles)| BindingDoc {
                id: credential_id.clone(),
                roles: roles.clone(),
            })
            .collect();
        self.replace_all("rbac_bindings", &docs, |doc| doc.id.clone())
    }
}

impl AbacStore for DocDbControlStore {
    fn load_policies(&self) -> Result<Vec<AbacPolicy>> {
        self.load_all("abac_policies")
    }

    fn save_policies(&self, policies: &[AbacPolicy]) -> Result<()> {
        self.replace_all("abac_policies", policies, |p| p.id.clone())
    }
}

impl PrivacyStore for DocDbControlStore {
    fn load_policies(&self) -> Result<Vec<PrivacyPolicy>> {
        self.load_all("privacy_policies")
    }

    fn save_policies(&self, policies: &[PrivacyPolicy]) -> Result<()> {
        self.replace_all("privacy_policies", policies, |p| p.id.clone())
    }

    fn register_policy(&self, policy: PrivacyPolicy) -> Result<PrivacyPolicy> {
        self.put_one("privacy_policies", &policy.id.clone(), &policy)?;
        Ok(policy)
    }

    fn update_policy(&self, mut policy: PrivacyPolicy) -> Result<PrivacyPolicy> {
        policy.updated_at = entities::bump_updated_at(policy.updated_at);
        self.put_one("privacy_policies", &policy.id.clone(), &policy)?;
        Ok(policy)
    }
}

impl FleetStore for DocDbControlStore {
    fn load_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.load_all("devices")
    }

    fn save_devices(&self, devices: &[DeviceRecord]) -> Result<()> {
        self.replace_all("devices", devices, |d| d.id.clone())
    }

    fn register_device(&self, device: DeviceRecord) -> Result<DeviceRecord> {
        self.put_one("devices", &device.id.clone(), &device)?;
        Ok(device)
    }

    fn update_device(&self, mut device: DeviceRecord) -> Result<DeviceRecord> {
        device.updated_at = entities::bump_updated_at(device.updated_at);
        self.put_one("devices", &device.id.clone(), &device)?;
        Ok(device)
    }

    fn update_device_status(
        &self,
        device_id: &str,
        status: &str,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<Option<DeviceRecord>> {
        let docs = self.driver.fetch_filtered(
            &self.collection("devices"),
            &[("id".to_string(), Value::String(device_id.to_string()))],
        )?;
        let Some(doc) = docs.into_iter().next() else {
            return Ok(None);
        };
        let mut device: DeviceRecord = serde_json::from_value(doc)?;
        device.set_status(status, last_seen_at);
        self.put_one("devices", &device.id.clone(), &device)?;
        Ok(Some(device))
    }
}

impl WorkflowStore for DocDbControlStore {
    fn load_workflows(&self) -> Result<Vec<WorkflowSpec>> {
        self.load_all("workflows")
    }

    fn save_workflows(&self, workflows: &[WorkflowSpec]) -> Result<()> {
        self.replace_all("workflows", workflows, |w| w.id.clone())
    }

    fn register_workflow(&self, workflow: WorkflowSpec) -> Result<WorkflowSpec> {
        self.put_one("workflows", &workflow.id.clone(), &workflow)?;
        Ok(workflow)
    }

    fn update_workflow(&self, mut workflow: WorkflowSpec) -> Result<WorkflowSpec> {
        workflow.updated_at = entities::bump_updated_at(workflow.updated_at);
        self.put_one("workflows", &workflow.id.clone(), &workflow)?;
        Ok(workflow)
    }

    fn load_workflow_runs(&self) -> Result<Vec<WorkflowRun>> {
        self.load_all("workflow_runs")
    }

    fn save_workflow_runs(&self, runs: &[WorkflowRun]) -> Result<()> {
        self.replace_all("workflow_runs", runs, |r| r.id.clone())
    }

    fn register_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun> {
        self.put_one("workflow_runs", &run.id.clone(), &run)?;
        Ok(run)
    }

    fn update_workflow_run(&self, mut run: WorkflowRun) -> Result<WorkflowRun> {
        run.updated_at = entities::bump_updated_at(run.updated_at);
        self.put_one("workflow_runs", &run.id.clone(), &run)?;
        Ok(run)
    }

    fn list_workflow_runs(
        &self,
        workflow_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<WorkflowRun>> {
        let docs = match workflow_id {
            Some(id) => self.driver.fetch_filtered(
                &self.collection("workflow_runs"),
                &[("workflow_id".to_string(), Value::String(id.to_string()))],
            )?,
            None => self.driver.fetch_all(&self.collection("workflow_runs"))?,
        };
        let mut runs: Vec<WorkflowRun> = docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }
}

impl DataFactoryStore for DocDbControlStore {
    fn load_models(&self) -> Result<Vec<ModelRecord>> {
        self.load_all("models")
    }

    fn save_models(&self, models: &[ModelRecord]) -> Result<()> {
        self.replace_all("models", models, |m| m.id.clone())
    }

    fn register_model(&self, model: ModelRecord) -> Result<ModelRecord> {
        self.put_one("models", &model.id.clone(), &model)?;
        Ok(model)
    }

    fn update_model(&self, mut model: ModelRecord) -> Result<ModelRecord> {
        model.updated_at = entities::bump_updated_at(model.updated_at);
        self.put_one("models", &model.id.clone(), &model)?;
        Ok(model)
    }

    fn load_training_jobs(&self) -> Result<Vec<TrainingJob>> {
        self.load_all("training_jobs")
    }

    fn save_training_jobs(&self, jobs: &[TrainingJob]) -> Result<()> {
        self.replace_all("training_jobs", jobs, |j| j.id.clone())
    }

    fn register_training_job(&self, job: TrainingJob) -> Result<TrainingJob> {
        self.put_one("training_jobs", &job.id.clone(), &job)?;
        Ok(job)
    }

    fn update_training_job(&self, mut job: TrainingJob) -> Result<TrainingJob> {
        job.updated_at = entities::bump_updated_at(job.updated_at);
        self.put_one("training_jobs", &job.id.clone(), &job)?;
        Ok(job)
    }

    fn get_training_job(&self, job_id: &str) -> Result<Option<TrainingJob>> {
        let docs = self.driver.fetch_filtered(
            &self.collection("training_jobs"),
            &[("id".to_string(), Value::String(job_id.to_string()))],
        )?;
        match docs.into_iter().next() {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    fn list_training_jobs(
        &self,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TrainingJob>> {
        let docs = match status {
            Some(status) => self.driver.fetch_filtered(
                &self.collection("training_jobs"),
                &[("status".to_string(), Value::String(status.to_string()))],
            )?,
            None => self.driver.fetch_all(&self.collection("training_jobs"))?,
        };
        let mut jobs: Vec<TrainingJob> = docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect();
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

impl DocDbControlStore {
    fn mark_job(
        &self,
        job_id: &str,
        mut mutate: impl FnMut(&mut TrainingJob),
    ) -> Result<TrainingJob> {
        let mut job = self
            .get_training_job(job_id)?
            .ok_or_else(|| StoreError::NotFound(format!("training job {job_id}")))?;
        mutate(&mut job);
        self.put_one("training_jobs", &job.id.clone(), &job)?;
        Ok(job)
    }
}

impl ConnectorStore for DocDbControlStore {
    fn load_ocr_connectors(&self) -> Result<Vec<OcrConnector>> {
        self.load_all("ocr_connectors")
    }

    fn save_ocr_connectors(&self, connectors: &[OcrConnector]) -> Result<()> {
        for connector in connectors {
            connector.validate()?;
        }
        self.replace_all("ocr_connectors", connectors, |c| c.id.clone())
    }

    fn register_ocr_connector(&self, connector: OcrConnector) -> Result<OcrConnector> {
        connector.validate()?;
        self.put_one("ocr_connectors", &connector.id.clone(), &connector)?;
        Ok(connector)
    }

    fn update_ocr_connector(&self, mut connector: OcrConnector) -> Result<OcrConnector> {
        connector.validate()?;
        connector.updated_at = entities::bump_updated_at(connector.updated_at);
        self.put_one("ocr_connectors", &connector.id.clone(), &connector)?;
        Ok(connector)
    }
}

impl ApiKeyStore for DocDbControlStore {
    fn load_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        self.load_all("api_keys")
    }

    fn save_api_keys(&self, api_keys: &[ApiKeyRecord]) -> Result<()> {
        self.replace_all("api_keys", api_keys, |k| k.id.clone())
    }

    fn register_api_key(&self, api_key: ApiKeyRecord) -> Result<ApiKeyRecord> {
        self.put_one("api_keys", &api_key.id.clone(), &api_key)?;
        Ok(api_key)
    }

    fn update_api_key(&self, mut api_key: ApiKeyRecord) -> Result<ApiKeyRecord> {
        api_key.updated_at = entities::bump_updated_at(api_key.updated_at);
        self.put_one("api_keys", &api_key.id.clone(), &api_key)?;
        Ok(api_key)
    }
}

impl ChaosStore for DocDbControlStore {
    fn load_chaos_policies(&self) -> Result<Vec<ChaosPolicy>> {
        self.load_all("chaos_policies")
    }

    fn save_chaos_policies(&self, policies: &[ChaosPolicy]) -> Result<()> {
        for policy in policies {
            policy.validate()?;
        }
        self.replace_all("chaos_policies", policies, |p| p.id.clone())
    }

    fn register_chaos_policy(&self, policy: ChaosPolicy) -> Result<ChaosPolicy> {
        policy.validate()?;
        self.put_one("chaos_policies", &policy.id.clone(), &policy)?;
        Ok(policy)
    }

    fn load_chaos_runs(&self) -> Result<Vec<ChaosRun>> {
        self.load_all("chaos_runs")
    }

    fn save_chaos_runs(&self, runs: &[ChaosRun]) -> Result<()> {
        self.replace_all("chaos_runs", runs, |r| r.id.clone())
    }

    fn register_chaos_run(&self, run: ChaosRun) -> Result<ChaosRun> {
        self.put_one("chaos_runs", &run.id.clone(), &run)?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn store() -> DocDbControlStore {
        DocDbControlStore::new(Arc::new(MemoryDriver::new()), "")
    }

    #[test]
    fn api_keys_round_trip() {
        let store = store();
        let record = ApiKeyRecord::new("ci", "hash");
        store.register_api_key(record.clone()).unwrap();
        let loaded = store.load_api_keys().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, record.id);
    }

    #[test]
    fn prefix_scopes_collections() {
        let driver = Arc::new(MemoryDriver::new());
        let a = DocDbControlStore::new(driver.clone(), "tenant_a");
        let b = DocDbControlStore::new(driver, "tenant_b");
        a.register_api_key(ApiKeyRecord::new("a", "ha")).unwrap();
        assert!(b.load_api_keys().unwrap().is_empty());
        assert_eq!(a.load_api_keys().unwrap().len(), 1);
    }

    #[test]
    fn replace_deletes_removed_entities() {
        let store = store();
        let keep = ApiKeyRecord::new("keep", "h1");
        let drop = ApiKeyRecord::new("drop", "h2");
        store
            .save_api_keys(&[keep.clone(), drop.clone()])
            .unwrap();
        store.save_api_keys(&[keep.clone()]).unwrap();
        let loaded = store.load_api_keys().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, keep.id);
    }

    /// Driver that records the size of every committed batch.
    struct CountingDriver {
        inner: MemoryDriver,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl DocumentDriver for CountingDriver {
        fn fetch_all(&self, collection: &str) -> Result<Vec<Value>> {
            self.inner.fetch_all(collection)
        }

        fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
            self.batch_sizes.lock().unwrap().push(ops.len());
            self.inner.commit(ops)
        }
    }

    #[test]
    fn large_writes_are_chunked_under_the_bound() {
        let driver = Arc::new(CountingDriver {
            inner: MemoryDriver::new(),
            batch_sizes: Mutex::new(Vec::new()),
        });
        let store = DocDbControlStore::new(driver.clone(), "");
        let keys: Vec<ApiKeyRecord> = (0..1000)
            .map(|idx| ApiKeyRecord::new(format!("key-{idx}"), "h"))
            .collect();
        store.save_api_keys(&keys).unwrap();

        let sizes = driver.batch_sizes.lock().unwrap();
        assert!(sizes.iter().all(|&size| size <= MAX_BATCH_OPS));
        assert_eq!(sizes.iter().sum::<usize>(), 1000);
    }

    #[test]
    fn training_jobs_filter_by_status() {
        let store = store();
        let job_a = store.register_training_job(TrainingJob::new("m1")).unwrap();
        store.register_training_job(TrainingJob::new("m2")).unwrap();
        store.mark_training_job_running(&job_a.id).unwrap();

        let running = store.list_training_jobs(Some("running"), None).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, job_a.id);
        let planned = store.list_training_jobs(Some("planned"), None).unwrap();
        assert_eq!(planned.len(), 1);
    }

    #[test]
    fn workflow_runs_order_created_desc() {
        let store = store();
        let spec = store.register_workflow(WorkflowSpec::new("wf")).unwrap();
        let mut last_id = String::new();
        for _ in 0..3 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            last_id = store
                .register_workflow_run(WorkflowRun::new(&spec.id))
                .unwrap()
                .id;
        }
        let runs = store.list_workflow_runs(Some(&spec.id), Some(1)).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, last_id);
    }
}
