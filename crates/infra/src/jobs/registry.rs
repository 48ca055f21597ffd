//! Task registry over a hash-map service.
//!
//! Layout:
//! - `lock:<token>`: existence gate, claimed with set-if-absent
//! - `task:<token>`: task fields (hash)
//! - `owner:<owner>`: set of the owner's tokens
//!
//! A task is visible iff its lock exists and its hash is non-empty. Creation
//! claims the lock before anything else is written; deletion removes the lock
//! last, so no reader sees a half-written or half-deleted task.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use rowforge_auth::PrincipalId;
use rowforge_core::{ColumnMap, StoreError};

use crate::store::services::{HashService, ServiceError};

use super::types::{
    FIELD_OWNER, FIELD_PARAMS, FIELD_SECRET_PARAMS, FIELD_START_TIME, FIELD_STATUS, FIELD_TYPE,
    Task, TaskColumns, TaskStatus, TaskToken,
};

const LOCK_PREFIX: &str = "lock:";
const TASK_PREFIX: &str = "task:";
const OWNER_PREFIX: &str = "owner:";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("teardown for task type '{task_type}' failed: {reason}")]
    Teardown { task_type: String, reason: String },

    #[error("invalid task parameters: {0}")]
    Params(String),

    #[error("external job tracker error: {0}")]
    Tracker(String),
}

impl From<ServiceError> for RegistryError {
    fn from(value: ServiceError) -> Self {
        RegistryError::Store(value.into())
    }
}

impl From<RegistryError> for StoreError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::Store(e) => e,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Progress sink used by job runners. No owner check: only trusted job code
/// holds one.
pub trait TaskUpdater: Send + Sync {
    /// Merge `columns` into the task's fields.
    fn update_task(&self, token: &TaskToken, columns: &TaskColumns) -> Result<(), RegistryError>;
}

/// External cleanup run before a task of a given type is deleted.
pub type TeardownHook = Box<dyn Fn(&Task) -> Result<(), String> + Send + Sync>;

fn key(prefix: &str, id: &str) -> Vec<u8> {
    format!("{prefix}{id}").into_bytes()
}

fn to_fields(columns: &TaskColumns) -> Vec<(Vec<u8>, Vec<u8>)> {
    columns
        .iter()
        .map(|(k, v)| (k.clone().into_bytes(), v.clone().into_bytes()))
        .collect()
}

fn from_fields(fields: ColumnMap) -> TaskColumns {
    fields
        .into_iter()
        .map(|(k, v)| {
            (
                String::from_utf8_lossy(&k).into_owned(),
                String::from_utf8_lossy(&v).into_owned(),
            )
        })
        .collect()
}

pub struct JobRegistry<H> {
    service: H,
    teardowns: HashMap<String, TeardownHook>,
}

impl<H> JobRegistry<H>
where
    H: HashService,
{
    pub fn new(service: H) -> Self {
        Self {
            service,
            teardowns: HashMap::new(),
        }
    }

    /// Register a teardown hook for a task type.
    pub fn with_teardown<F>(mut self, task_type: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&Task) -> Result<(), String> + Send + Sync + 'static,
    {
        self.teardowns.insert(task_type.into(), Box::new(hook));
        self
    }

    pub fn service(&self) -> &H {
        &self.service
    }

    /// Create a task under a freshly generated token.
    pub fn create_task(
        &self,
        task_type: &str,
        owner: &PrincipalId,
        params: &JsonValue,
        secret_params: &JsonValue,
    ) -> Result<TaskToken, RegistryError> {
        let token = TaskToken::new();
        self.create_task_with_token(token.clone(), task_type, owner, params, secret_params)?;
        Ok(token)
    }

    /// Create a task under a caller-chosen token; `Conflict` if it is taken.
    pub fn create_task_with_token(
        &self,
        token: TaskToken,
        task_type: &str,
        owner: &PrincipalId,
        params: &JsonValue,
        secret_params: &JsonValue,
    ) -> Result<(), RegistryError> {
        let params = serde_json::to_string(params).map_err(|e| RegistryError::Params(e.to_string()))?;
        let secret =
            serde_json::to_string(secret_params).map_err(|e| RegistryError::Params(e.to_string()))?;

        if !self.service.set_nx(&key(LOCK_PREFIX, token.as_str()), b"")? {
            return Err(StoreError::conflict(format!("task '{token}' already exists")).into());
        }

        let columns = TaskColumns::from([
            (FIELD_OWNER.to_string(), owner.as_str().to_string()),
            (FIELD_TYPE.to_string(), task_type.to_string()),
            (FIELD_PARAMS.to_string(), params),
            (FIELD_SECRET_PARAMS.to_string(), secret),
            (FIELD_START_TIME.to_string(), Utc::now().to_rfc3339()),
            (FIELD_STATUS.to_string(), TaskStatus::Pending.to_string()),
        ]);
        self.service
            .hset_multiple(&key(TASK_PREFIX, token.as_str()), &to_fields(&columns))?;
        self.service
            .sadd(&key(OWNER_PREFIX, owner.as_str()), token.as_str().as_bytes())?;

        info!(token = %token, owner = %owner, task_type = %task_type, "task created");
        Ok(())
    }

    /// Full stored fields, or `None` if the task is not visible.
    fn load(&self, token: &TaskToken) -> Result<Option<Task>, RegistryError> {
        if !self.service.exists(&key(LOCK_PREFIX, token.as_str()))? {
            return Ok(None);
        }
        let fields = self.service.hgetall(&key(TASK_PREFIX, token.as_str()))?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Task {
            token: token.clone(),
            columns: from_fields(fields),
        }))
    }

    fn load_owned(&self, token: &TaskToken, owner: &PrincipalId) -> Result<Task, RegistryError> {
        let task = self.load(token)?.ok_or(StoreError::NotFound)?;
        if task.field(FIELD_OWNER) != Some(owner.as_str()) {
            return Err(StoreError::unauthorized(format!(
                "task '{token}' is not owned by '{owner}'"
            ))
            .into());
        }
        Ok(task)
    }

    /// Public view of a task: private fields are never returned.
    pub fn get_task(&self, token: &TaskToken, owner: &PrincipalId) -> Result<Task, RegistryError> {
        Ok(self.load_owned(token, owner)?.into_public())
    }

    /// The task's private parameters.
    pub fn get_task_secret(
        &self,
        token: &TaskToken,
        owner: &PrincipalId,
    ) -> Result<JsonValue, RegistryError> {
        let task = self.load_owned(token, owner)?;
        let raw = task.field(FIELD_SECRET_PARAMS).unwrap_or("null");
        serde_json::from_str(raw).map_err(|e| RegistryError::Params(e.to_string()))
    }

    /// Type of a visible task, without owner check.
    pub fn task_type(&self, token: &TaskToken) -> Result<Option<String>, RegistryError> {
        Ok(self
            .load(token)?
            .and_then(|t| t.task_type().map(str::to_string)))
    }

    /// Delete a task.
    ///
    /// The type's teardown hook runs first; if it fails nothing is removed and
    /// the delete can be retried.
    pub fn delete_task(&self, token: &TaskToken, owner: &PrincipalId) -> Result<(), RegistryError> {
        let task = self.load_owned(token, owner)?;
        let task_type = task.task_type().unwrap_or_default().to_string();

        if let Some(hook) = self.teardowns.get(&task_type) {
            hook(&task).map_err(|reason| {
                warn!(token = %token, task_type = %task_type, error = %reason, "task teardown failed");
                RegistryError::Teardown {
                    task_type: task_type.clone(),
                    reason,
                }
            })?;
        }

        self.service
            .srem(&key(OWNER_PREFIX, owner.as_str()), token.as_str().as_bytes())?;
        self.service.del(&key(TASK_PREFIX, token.as_str()))?;
        self.service.del(&key(LOCK_PREFIX, token.as_str()))?;

        info!(token = %token, owner = %owner, task_type = %task_type, "task deleted");
        Ok(())
    }

    /// Public views of every task the owner holds; vanished entries are skipped.
    pub fn list_tasks(&self, owner: &PrincipalId) -> Result<Vec<Task>, RegistryError> {
        let members = self.service.smembers(&key(OWNER_PREFIX, owner.as_str()))?;
        let mut out = Vec::with_capacity(members.len());
        for member in members {
            let token = TaskToken::from(String::from_utf8_lossy(&member).into_owned());
            let Some(task) = self.load(&token)? else {
                debug!(token = %token, "skipping vanished task");
                continue;
            };
            if task.field(FIELD_OWNER) != Some(owner.as_str()) {
                continue;
            }
            out.push(task.into_public());
        }
        out.sort_by(|a, b| a.token.cmp(&b.token));
        Ok(out)
    }

    /// Every stored task with all fields (operator view).
    pub fn list_all_tasks(&self) -> Result<Vec<Task>, RegistryError> {
        let mut out = Vec::new();
        for task_key in self.service.keys_with_prefix(TASK_PREFIX.as_bytes())? {
            let fields = self.service.hgetall(&task_key)?;
            if fields.is_empty() {
                continue;
            }
            let token = String::from_utf8_lossy(&task_key[TASK_PREFIX.len()..]).into_owned();
            out.push(Task {
                token: TaskToken::from(token),
                columns: from_fields(fields),
            });
        }
        out.sort_by(|a, b| a.token.cmp(&b.token));
        Ok(out)
    }

    /// Drop everything in the service's database (operator command).
    pub fn destroy(&self) -> Result<(), RegistryError> {
        warn!("destroying every key in the jobs database");
        self.service.flush_all()?;
        Ok(())
    }
}

impl<H> TaskUpdater for JobRegistry<H>
where
    H: HashService,
{
    /// Writes to a task whose lock is gone are dropped, so a job racing a
    /// delete cannot resurrect an invisible task hash. The lock is checked
    /// again after the write; if a delete slipped in between, the hash the
    /// write recreated is removed.
    fn update_task(&self, token: &TaskToken, columns: &TaskColumns) -> Result<(), RegistryError> {
        if columns.is_empty() {
            return Ok(());
        }
        let lock_key = key(LOCK_PREFIX, token.as_str());
        if !self.service.exists(&lock_key)? {
            debug!(token = %token, "update for vanished task dropped");
            return Ok(());
        }
        let task_key = key(TASK_PREFIX, token.as_str());
        self.service.hset_multiple(&task_key, &to_fields(columns))?;
        if !self.service.exists(&lock_key)? {
            debug!(token = %token, "task deleted during update, removing orphaned fields");
            self.service.del(&task_key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::services::{InMemoryHashService, ListEnd};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn registry() -> JobRegistry<InMemoryHashService> {
        JobRegistry::new(InMemoryHashService::new())
    }

    fn alice() -> PrincipalId {
        PrincipalId::from("alice@example.com")
    }

    #[test]
    fn create_then_get_hides_private_params() {
        let reg = registry();
        let token = reg
            .create_task("process", &alice(), &json!({"table": "images"}), &json!({"secret": "s3"}))
            .unwrap();

        let task = reg.get_task(&token, &alice()).unwrap();
        assert_eq!(task.task_type(), Some("process"));
        assert_eq!(task.status(), Some(TaskStatus::Pending));
        assert_eq!(task.params(), Some(json!({"table": "images"})));
        assert!(task.start_time().is_some());
        assert!(task.columns.keys().all(|k| !k.starts_with('_')));

        assert_eq!(
            reg.get_task_secret(&token, &alice()).unwrap(),
            json!({"secret": "s3"})
        );
    }

    #[test]
    fn token_collision_is_conflict() {
        let reg = registry();
        let token = TaskToken::from("fixed");
        reg.create_task_with_token(token.clone(), "crawl", &alice(), &json!({}), &json!({}))
            .unwrap();
        let err = reg
            .create_task_with_token(token, "crawl", &alice(), &json!({}), &json!({}))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Store(StoreError::Conflict(_))));
    }

    #[test]
    fn other_owner_is_unauthorized_and_unknown_is_not_found() {
        let reg = registry();
        let token = reg.create_task("crawl", &alice(), &json!({}), &json!({})).unwrap();
        let bob = PrincipalId::from("bob@example.com");

        assert!(matches!(
            reg.get_task(&token, &bob),
            Err(RegistryError::Store(StoreError::Unauthorized(_)))
        ));
        assert!(matches!(
            reg.delete_task(&token, &bob),
            Err(RegistryError::Store(StoreError::Unauthorized(_)))
        ));
        assert!(matches!(
            reg.get_task(&TaskToken::from("missing"), &alice()),
            Err(RegistryError::Store(StoreError::NotFound))
        ));
    }

    #[test]
    fn delete_removes_task_lock_and_index_entry() {
        let reg = registry();
        let token = reg.create_task("crawl", &alice(), &json!({}), &json!({})).unwrap();
        reg.delete_task(&token, &alice()).unwrap();

        assert!(matches!(
            reg.get_task(&token, &alice()),
            Err(RegistryError::Store(StoreError::NotFound))
        ));
        assert!(reg.list_tasks(&alice()).unwrap().is_empty());
        assert!(!reg.service().exists(format!("lock:{token}").as_bytes()).unwrap());
        assert!(!reg.service().exists(format!("task:{token}").as_bytes()).unwrap());
    }

    #[test]
    fn failed_teardown_leaves_task_in_place() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let reg = registry().with_teardown("annotation", move |_task| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("remote unavailable".to_string())
            } else {
                Ok(())
            }
        });
        let token = reg
            .create_task("annotation", &alice(), &json!({}), &json!({}))
            .unwrap();

        assert!(matches!(
            reg.delete_task(&token, &alice()),
            Err(RegistryError::Teardown { .. })
        ));
        assert!(reg.get_task(&token, &alice()).is_ok());

        reg.delete_task(&token, &alice()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn list_skips_tasks_whose_lock_vanished() {
        let reg = registry();
        let kept = reg.create_task("crawl", &alice(), &json!({}), &json!({})).unwrap();
        let gone = reg.create_task("crawl", &alice(), &json!({}), &json!({})).unwrap();
        reg.service().del(format!("lock:{gone}").as_bytes()).unwrap();

        let listed: Vec<_> = reg
            .list_tasks(&alice())
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(listed, vec![kept]);
    }

    #[test]
    fn update_merges_and_ignores_vanished_tasks() {
        let reg = registry();
        let token = reg.create_task("process", &alice(), &json!({}), &json!({})).unwrap();
        reg.update_task(
            &token,
            &TaskColumns::from([("status".to_string(), "running".to_string())]),
        )
        .unwrap();
        let task = reg.get_task(&token, &alice()).unwrap();
        assert_eq!(task.status(), Some(TaskStatus::Running));
        assert_eq!(task.task_type(), Some("process"));

        let ghost = TaskToken::from("ghost");
        reg.update_task(
            &ghost,
            &TaskColumns::from([("status".to_string(), "running".to_string())]),
        )
        .unwrap();
        assert!(!reg.service().exists(b"task:ghost").unwrap());
    }

    /// Deletes the task's lock the moment its fields are written, standing in
    /// for a `delete_task` that lands between the lock check and the write.
    struct DeleteDuringWrite {
        inner: InMemoryHashService,
    }

    impl HashService for DeleteDuringWrite {
        fn hset_multiple(
            &self,
            key: &[u8],
            fields: &[(Vec<u8>, Vec<u8>)],
        ) -> Result<(), ServiceError> {
            if let Some(token) = key.strip_prefix(TASK_PREFIX.as_bytes()) {
                let lock = [LOCK_PREFIX.as_bytes(), token].concat();
                if self.inner.exists(&lock)? && self.inner.exists(key)? {
                    self.inner.del(&lock)?;
                }
            }
            self.inner.hset_multiple(key, fields)
        }
        fn hgetall(&self, key: &[u8]) -> Result<ColumnMap, ServiceError> {
            self.inner.hgetall(key)
        }
        fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
            self.inner.hkeys(key)
        }
        fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
            self.inner.hget(key, field)
        }
        fn hdel(&self, key: &[u8], field: &[u8]) -> Result<(), ServiceError> {
            self.inner.hdel(key, field)
        }
        fn del(&self, key: &[u8]) -> Result<(), ServiceError> {
            self.inner.del(key)
        }
        fn exists(&self, key: &[u8]) -> Result<bool, ServiceError> {
            self.inner.exists(key)
        }
        fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<bool, ServiceError> {
            self.inner.set_nx(key, value)
        }
        fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
            self.inner.keys_with_prefix(prefix)
        }
        fn sadd(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError> {
            self.inner.sadd(key, member)
        }
        fn srem(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError> {
            self.inner.srem(key, member)
        }
        fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
            self.inner.smembers(key)
        }
        fn push(&self, key: &[u8], value: &[u8], end: ListEnd) -> Result<(), ServiceError> {
            self.inner.push(key, value, end)
        }
        fn blocking_pop(
            &self,
            keys: &[Vec<u8>],
            timeout: Duration,
        ) -> Result<Option<(Vec<u8>, Vec<u8>)>, ServiceError> {
            self.inner.blocking_pop(keys, timeout)
        }
        fn list_len(&self, key: &[u8]) -> Result<usize, ServiceError> {
            self.inner.list_len(key)
        }
        fn flush_all(&self) -> Result<(), ServiceError> {
            self.inner.flush_all()
        }
    }

    #[test]
    fn update_racing_a_delete_leaves_no_orphaned_fields() {
        let reg = JobRegistry::new(DeleteDuringWrite {
            inner: InMemoryHashService::new(),
        });
        let token = reg.create_task("process", &alice(), &json!({}), &json!({})).unwrap();

        reg.update_task(
            &token,
            &TaskColumns::from([("status".to_string(), "running".to_string())]),
        )
        .unwrap();

        assert!(!reg.service().exists(format!("task:{token}").as_bytes()).unwrap());
        assert!(reg.list_all_tasks().unwrap().is_empty());
    }

    #[test]
    fn list_all_and_destroy() {
        let reg = registry();
        reg.create_task("crawl", &alice(), &json!({}), &json!({"k": 1})).unwrap();
        reg.create_task("process", &PrincipalId::from("bob"), &json!({}), &json!({})).unwrap();

        let all = reg.list_all_tasks().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|t| t.field("_params").is_some()));

        reg.destroy().unwrap();
        assert!(reg.list_all_tasks().unwrap().is_empty());
    }
}
