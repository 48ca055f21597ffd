//! Named job methods and the local/queued dispatch paths.
//!
//! A dispatched method runs synchronously in local mode and returns its
//! result. In queued mode the call is serialized onto a work queue and the
//! caller gets nothing back; progress is observed through the task registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use rowforge_auth::PrincipalId;
use rowforge_core::StoreError;

use crate::store::StoreBackend;
use crate::store::services::{HashService, ServiceError};

use super::queue::{WorkItem, WorkQueue};
use super::registry::{JobRegistry, RegistryError, TaskUpdater};
use super::row_job::{CopyTransform, RowJobParams, RowJobRunner, RowTransform};
use super::types::TaskToken;

/// Task type recorded for row jobs.
pub const ROW_JOB_TASK_TYPE: &str = "process";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unknown job method '{0}'")]
    UnknownMethod(String),

    #[error("invalid parameters for '{method}': {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("work item encoding error: {0}")]
    Encode(String),
}

impl From<ServiceError> for DispatchError {
    fn from(value: ServiceError) -> Self {
        DispatchError::Store(value.into())
    }
}

/// Where a dispatched call runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run in the caller's thread and return the result.
    Local,
    /// Enqueue on the named queue for a worker.
    Queued { queue: String },
}

/// Handles a job method runs against.
#[derive(Clone)]
pub struct JobContext {
    pub backend: Arc<dyn StoreBackend>,
    pub tasks: Arc<dyn TaskUpdater>,
}

impl JobContext {
    pub fn new(backend: Arc<dyn StoreBackend>, tasks: Arc<dyn TaskUpdater>) -> Self {
        Self { backend, tasks }
    }
}

/// Job method: parameters in, JSON result out.
pub type JobMethod =
    Box<dyn Fn(&JobContext, &JsonValue) -> Result<JsonValue, DispatchError> + Send + Sync>;

/// Registry of callable job methods by name.
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, JobMethod>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in methods (`copy_job`).
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.register_row_job("copy_job", CopyTransform);
        table
    }

    pub fn register<F>(&mut self, name: impl Into<String>, method: F)
    where
        F: Fn(&JobContext, &JsonValue) -> Result<JsonValue, DispatchError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(method));
    }

    /// Register `transform` as a row job method taking [`RowJobParams`].
    pub fn register_row_job<T>(&mut self, name: impl Into<String>, transform: T)
    where
        T: RowTransform + 'static,
    {
        let name = name.into();
        let method = name.clone();
        self.register(name, move |ctx, params| {
            let params: RowJobParams =
                serde_json::from_value(params.clone()).map_err(|e| DispatchError::InvalidParams {
                    method: method.clone(),
                    reason: e.to_string(),
                })?;
            let summary =
                RowJobRunner::new(ctx.backend.as_ref(), ctx.tasks.as_ref()).run(&params, &transform)?;
            serde_json::to_value(summary).map_err(|e| DispatchError::Encode(e.to_string()))
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn invoke(
        &self,
        ctx: &JobContext,
        method: &str,
        params: &JsonValue,
    ) -> Result<JsonValue, DispatchError> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| DispatchError::UnknownMethod(method.to_string()))?;
        handler(ctx, params)
    }
}

pub struct Dispatcher<H> {
    mode: DispatchMode,
    queue: WorkQueue<H>,
    methods: Arc<MethodTable>,
    context: JobContext,
}

impl<H> Dispatcher<H>
where
    H: HashService,
{
    pub fn new(
        mode: DispatchMode,
        queue: WorkQueue<H>,
        methods: Arc<MethodTable>,
        context: JobContext,
    ) -> Self {
        Self {
            mode,
            queue,
            methods,
            context,
        }
    }

    pub fn mode(&self) -> &DispatchMode {
        &self.mode
    }

    /// Dispatch a call. `Some(result)` only in local mode.
    pub fn call(&self, method: &str, params: JsonValue) -> Result<Option<JsonValue>, DispatchError> {
        self.dispatch(false, method, params)
    }

    /// Like `call`, but a queued item goes to the head of its queue.
    pub fn call_urgent(
        &self,
        method: &str,
        params: JsonValue,
    ) -> Result<Option<JsonValue>, DispatchError> {
        self.dispatch(true, method, params)
    }

    fn dispatch(
        &self,
        urgent: bool,
        method: &str,
        params: JsonValue,
    ) -> Result<Option<JsonValue>, DispatchError> {
        match &self.mode {
            DispatchMode::Local => self
                .methods
                .invoke(&self.context, method, &params)
                .map(Some),
            DispatchMode::Queued { queue } => {
                if !self.methods.contains(method) {
                    return Err(DispatchError::UnknownMethod(method.to_string()));
                }
                self.queue
                    .enqueue(urgent, queue, &WorkItem::new(method, params))?;
                info!(queue = %queue, method = %method, "call queued");
                Ok(None)
            }
        }
    }

    /// Create the task for a row job under the params' token, then dispatch it.
    pub fn submit_row_job<R>(
        &self,
        registry: &JobRegistry<R>,
        owner: &PrincipalId,
        method: &str,
        params: &RowJobParams,
    ) -> Result<TaskToken, DispatchError>
    where
        R: HashService,
    {
        let json = serde_json::to_value(params).map_err(|e| DispatchError::Encode(e.to_string()))?;
        registry.create_task_with_token(
            params.job_token.clone(),
            ROW_JOB_TASK_TYPE,
            owner,
            &json,
            &JsonValue::Null,
        )?;
        self.call(method, json)?;
        Ok(params.job_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::TaskStatus;
    use crate::store::HashMapStore;
    use crate::store::services::InMemoryHashService;
    use rowforge_core::ColumnMap;
    use serde_json::json;

    fn setup(
        mode: DispatchMode,
    ) -> (
        Dispatcher<Arc<InMemoryHashService>>,
        Arc<JobRegistry<Arc<InMemoryHashService>>>,
        Arc<HashMapStore<Arc<InMemoryHashService>>>,
    ) {
        let service = Arc::new(InMemoryHashService::new());
        let backend = Arc::new(HashMapStore::new(service.clone()));
        let registry = Arc::new(JobRegistry::new(service.clone()));
        let context = JobContext::new(backend.clone(), registry.clone());
        let dispatcher = Dispatcher::new(
            mode,
            WorkQueue::new(service),
            Arc::new(MethodTable::with_builtins()),
            context,
        );
        (dispatcher, registry, backend)
    }

    fn seed(backend: &HashMapStore<Arc<InMemoryHashService>>) {
        for key in ["r1", "r2"] {
            backend
                .mutate_row(
                    "images",
                    key.as_bytes(),
                    &ColumnMap::from([(b"data:image".to_vec(), key.as_bytes().to_vec())]),
                )
                .unwrap();
        }
    }

    fn copy_params() -> RowJobParams {
        RowJobParams {
            table: "images".to_string(),
            start_row: b"r".to_vec(),
            stop_row: b"s".to_vec(),
            input_column: b"data:image".to_vec(),
            output_column: b"meta:copy".to_vec(),
            job_token: TaskToken::new(),
        }
    }

    #[test]
    fn local_mode_runs_and_returns_summary() {
        let (dispatcher, registry, backend) = setup(DispatchMode::Local);
        seed(&backend);
        let owner = PrincipalId::from("alice");

        let token = dispatcher
            .submit_row_job(&registry, &owner, "copy_job", &copy_params())
            .unwrap();

        let task = registry.get_task(&token, &owner).unwrap();
        assert_eq!(task.status(), Some(TaskStatus::Completed));
        assert_eq!(task.good_rows(), Some(2));
        assert_eq!(backend.get_column("images", b"r1", b"meta:copy").unwrap(), b"r1".to_vec());

        let result = dispatcher
            .call("copy_job", serde_json::to_value(copy_params()).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(result["good_rows"], json!(2));
    }

    #[test]
    fn queued_mode_enqueues_without_running() {
        let (dispatcher, registry, backend) = setup(DispatchMode::Queued {
            queue: "default".to_string(),
        });
        seed(&backend);
        let owner = PrincipalId::from("alice");

        let token = dispatcher
            .submit_row_job(&registry, &owner, "copy_job", &copy_params())
            .unwrap();

        assert_eq!(
            registry.get_task(&token, &owner).unwrap().status(),
            Some(TaskStatus::Pending)
        );
        assert!(backend.get_column("images", b"r1", b"meta:copy").is_err());
        assert_eq!(dispatcher.queue.len("default").unwrap(), 1);
    }

    #[test]
    fn unknown_method_is_rejected_in_both_modes() {
        for mode in [
            DispatchMode::Local,
            DispatchMode::Queued {
                queue: "default".to_string(),
            },
        ] {
            let (dispatcher, _, _) = setup(mode);
            assert!(matches!(
                dispatcher.call("nope", json!({})),
                Err(DispatchError::UnknownMethod(_))
            ));
        }
    }

    #[test]
    fn bad_params_are_invalid() {
        let (dispatcher, _, _) = setup(DispatchMode::Local);
        assert!(matches!(
            dispatcher.call("copy_job", json!({"table": 1})),
            Err(DispatchError::InvalidParams { .. })
        ));
    }
}
