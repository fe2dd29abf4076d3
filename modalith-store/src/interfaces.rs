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

//! Store interfaces, one per entity kind.
//!
//! Each kind has a fixed operation set; backends implement every trait and
//! the dual façade wraps any two implementations. Register operations take a
//! fully-constructed record, persist it, and hand it back so callers (and the
//! façade's secondary upsert) see the stored value.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use modalith_core::entities::{
    AbacPolicy, ApiKeyRecord, ChaosPolicy, ChaosRun, DeviceRecord, ModelRecord, OcrConnector,
    PrivacyPolicy, RoleBindings, TrainingJob, WorkflowRun, WorkflowSpec,
};

use crate::error::Result;

pub trait RbacStore: Send + Sync {
    fn load_role_bindings(&self) -> Result<RoleBindings>;
    fn save_role_bindings(&self, bindings: &RoleBindings) -> Result<()>;
}

pub trait AbacStore: Send + Sync {
    fn load_policies(&self) -> Result<Vec<AbacPolicy>>;
    fn save_policies(&self, policies: &[AbacPolicy]) -> Result<()>;
}

pub trait PrivacyStore: Send + Sync {
    fn load_policies(&self) -> Result<Vec<PrivacyPolicy>>;
    fn save_policies(&self, policies: &[PrivacyPolicy]) -> Result<()>;
    fn register_policy(&self, policy: PrivacyPolicy) -> Result<PrivacyPolicy>;
    fn update_policy(&self, policy: PrivacyPolicy) -> Result<PrivacyPolicy>;
}

pub trait FleetStore: Send + Sync {
    fn load_devices(&self) -> Result<Vec<DeviceRecord>>;
    fn save_devices(&self, devices: &[DeviceRecord]) -> Result<()>;
    fn register_device(&self, device: DeviceRecord) -> Result<DeviceRecord>;
    fn update_device(&self, device: DeviceRecord) -> Result<DeviceRecord>;
    fn update_device_status(
        &self,
        device_id: &str,
        status: &str,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<Option<DeviceRecord>>;
}

pub trait WorkflowStore: Send + Sync {
    fn load_workflows(&self) -> Result<Vec<WorkflowSpec>>;
    fn save_workflows(&self, workflows: &[WorkflowSpec]) -> Result<()>;
    fn register_workflow(&self, workflow: WorkflowSpec) -> Result<WorkflowSpec>;
    fn update_workflow(&self, workflow: WorkflowSpec) -> Result<WorkflowSpec>;
    fn load_workflow_runs(&self) -> Result<Vec<WorkflowRun>>;
    fn save_workflow_runs(&self, runs: &[WorkflowRun]) -> Result<()>;
    fn register_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun>;
    fn update_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun>;
    fn list_workflow_runs(
        &self,
        workflow_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<WorkflowRun>>;
}

pub trait DataFactoryStore: Send + Sync {
    fn load_models(&self) -> Result<Vec<ModelRecord>>;
    fn save_models(&self, models: &[ModelRecord]) -> Result<()>;
    fn register_model(&self, model: ModelRecord) -> Result<ModelRecord>;
    fn update_model(&self, model: ModelRecord) -> Result<ModelRecord>;
    fn load_training_jobs(&self) -> Result<Vec<TrainingJob>>;
    fn save_training_jobs(&self, jobs: &[TrainingJob]) -> Result<()>;
    fn register_training_job(&self, job: TrainingJob) -> Result<TrainingJob>;
    fn update_training_job(&self, job: TrainingJob) -> Result<TrainingJob>;
    fn get_training_job(&self, job_id: &str) -> Result<Option<TrainingJob>>;
    fn list_training_jobs(
        &self,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TrainingJob>>;
    fn mark_training_job_running(&self, job_id: &str) -> Result<TrainingJob>;
    fn mark_training_job_completed(
        &self,
        job_id: &str,
        output: Option<BTreeMap<String, serde_json::Value>>,
        metrics: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<TrainingJob>;
    fn mark_training_job_failed(&self, job_id: &str, error: Option<String>) -> Result<TrainingJob>;
    fn mark_training_job_canceled(&self, job_id: &str) -> Result<TrainingJob>;
}

pub trait ConnectorStore: Send + Sync {
    fn load_ocr_connectors(&self) -> Result<Vec<OcrConnector>>;
    fn save_ocr_connectors(&self, connectors: &[OcrConnector]) -> Result<()>;
    fn register_ocr_connector(&self, connector: OcrConnector) -> Result<OcrConnector>;
    fn update_ocr_connector(&self, connector: OcrConnector) -> Result<OcrConnector>;
}

pub trait ApiKeyStore: Send + Sync {
    fn load_api_keys(&self) -> Result<Vec<ApiKeyRecord>>;
    fn save_api_keys(&self, api_keys: &[ApiKeyRecord]) -> Result<()>;
    fn register_api_key(&self, api_key: ApiKeyRecord) -> Result<ApiKeyRecord>;
    fn update_api_key(&self, api_key: ApiKeyRecord) -> Result<ApiKeyRecord>;
}

pub trait ChaosStore: Send + Sync {
    fn load_chaos_policies(&self) -> Result<Vec<ChaosPolicy>>;
    fn save_chaos_policies(&self, policies: &[ChaosPolicy]) -> Result<()>;
    fn register_chaos_policy(&self, policy: ChaosPolicy) -> Result<ChaosPolicy>;
    fn load_chaos_runs(&self) -> Result<Vec<ChaosRun>>;
    fn save_chaos_runs(&self, runs: &[ChaosRun]) -> Result<()>;
    fn register_chaos_run(&self, run: ChaosRun) -> Result<ChaosRun>;
}

/// All store kinds wired to one logical backend (or the dual façade).
#[derive(Clone)]
pub struct StoreBundle {
    pub rbac: Arc<dyn RbacStore>,
    pub abac: Arc<dyn AbacStore>,
    pub privacy: Arc<dyn PrivacyStore>,
    pub fleet: Arc<dyn FleetStore>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub data_factory: Arc<dyn DataFactoryStore>,
    pub connectors: Arc<dyn ConnectorStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub chaos: Arc<dyn ChaosStore>,
}

impl StoreBundle {
    /// Bundle where every kind is served by one backend value.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RbacStore
            + AbacStore
            + PrivacyStore
            + FleetStore
            + WorkflowStore
            + DataFactoryStore
            + ConnectorStore
            + ApiKeyStore
            + ChaosStore
            + 'static,
    {
        Self {
            rbac: backend.clone(),
            abac: backend.clone(),
            privacy: backend.clone(),
            fleet: backend.clone(),
            workflows: backend.clone(),
            data_factory: backend.clone(),
            connectors: backend.clone(),
            api_keys: backend.clone(),
            chaos: backend,
        }
    }
}
