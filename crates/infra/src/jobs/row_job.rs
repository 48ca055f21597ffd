//! Per-row map jobs over a scanned key range.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use rowforge_core::ColumnMap;

use crate::store::{ScanRequest, StoreBackend};

use super::dispatch::DispatchError;
use super::registry::TaskUpdater;
use super::types::{TaskProgress, TaskStatus, TaskToken};

/// Why a single row could not be transformed. Counted, never propagated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("dependency failed: {0}")]
    Dependency(String),
}

/// Transform applied to one row's input column value.
///
/// `Ok(None)` means "no output for this row" and counts as a bad row.
pub trait RowTransform: Send + Sync {
    fn apply(&self, input: &[u8]) -> Result<Option<Vec<u8>>, TransformError>;
}

impl<F> RowTransform for F
where
    F: Fn(&[u8]) -> Result<Option<Vec<u8>>, TransformError> + Send + Sync,
{
    fn apply(&self, input: &[u8]) -> Result<Option<Vec<u8>>, TransformError> {
        self(input)
    }
}

/// Copies the input value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTransform;

impl RowTransform for CopyTransform {
    fn apply(&self, input: &[u8]) -> Result<Option<Vec<u8>>, TransformError> {
        Ok(Some(input.to_vec()))
    }
}

/// Byte fields travel as URL-safe base64 inside JSON work items.
mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        URL_SAFE.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Parameters of a row job as carried in a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowJobParams {
    pub table: String,
    #[serde(with = "b64")]
    pub start_row: Vec<u8>,
    #[serde(with = "b64")]
    pub stop_row: Vec<u8>,
    #[serde(with = "b64")]
    pub input_column: Vec<u8>,
    #[serde(with = "b64")]
    pub output_column: Vec<u8>,
    pub job_token: TaskToken,
}

/// Outcome of a row job. `good_rows`/`bad_rows` are what the task records;
/// the remaining counters split `bad_rows` by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowJobSummary {
    pub good_rows: u64,
    pub bad_rows: u64,
    pub skipped_rows: u64,
    pub malformed_inputs: u64,
    pub dependency_failures: u64,
    pub empty_results: u64,
}

impl RowJobSummary {
    fn record_failure(&mut self, error: &TransformError) {
        self.bad_rows += 1;
        match error {
            TransformError::MalformedInput(_) => self.malformed_inputs += 1,
            TransformError::Dependency(_) => self.dependency_failures += 1,
        }
    }

    fn progress(&self, status: TaskStatus) -> TaskProgress {
        TaskProgress {
            good_rows: self.good_rows,
            bad_rows: self.bad_rows,
            status,
        }
    }
}

pub struct RowJobRunner<'a> {
    backend: &'a dyn StoreBackend,
    tasks: &'a dyn TaskUpdater,
}

impl<'a> RowJobRunner<'a> {
    pub fn new(backend: &'a dyn StoreBackend, tasks: &'a dyn TaskUpdater) -> Self {
        Self { backend, tasks }
    }

    /// Scan `[start_row, stop_row)` for the input column, transform each value
    /// and write the result to the output column.
    ///
    /// Rows lacking the input column are skipped and not counted. Progress is
    /// written after every counted row; the final write marks the task
    /// `completed` even if every row failed. Store failures abort the job and
    /// mark it `failed`.
    pub fn run(
        &self,
        params: &RowJobParams,
        transform: &dyn RowTransform,
    ) -> Result<RowJobSummary, DispatchError> {
        match self.run_rows(params, transform) {
            Ok(summary) => {
                self.tasks.update_task(
                    &params.job_token,
                    &summary.progress(TaskStatus::Completed).to_columns(),
                )?;
                info!(
                    token = %params.job_token,
                    table = %params.table,
                    good_rows = summary.good_rows,
                    bad_rows = summary.bad_rows,
                    "row job completed"
                );
                Ok(summary)
            }
            Err((summary, err)) => {
                warn!(token = %params.job_token, table = %params.table, error = %err, "row job failed");
                // The scan error is what gets reported.
                if let Err(status_err) = self.tasks.update_task(
                    &params.job_token,
                    &summary.progress(TaskStatus::Failed).to_columns(),
                ) {
                    warn!(
                        token = %params.job_token,
                        error = %status_err,
                        "could not record failed status"
                    );
                }
                Err(err)
            }
        }
    }

    fn run_rows(
        &self,
        params: &RowJobParams,
        transform: &dyn RowTransform,
    ) -> Result<RowJobSummary, (RowJobSummary, DispatchError)> {
        let mut summary = RowJobSummary::default();
        let request = ScanRequest::range(params.start_row.clone(), params.stop_row.clone())
            .with_columns([params.input_column.clone()]);
        let rows = self
            .backend
            .scan(&params.table, request)
            .map_err(|e| (summary, DispatchError::from(e)))?;

        for row in rows {
            let (key, columns) = row.map_err(|e| (summary, DispatchError::from(e)))?;
            let Some(input) = columns.get(&params.input_column) else {
                summary.skipped_rows += 1;
                continue;
            };

            match transform.apply(input) {
                Ok(Some(output)) => {
                    let values = ColumnMap::from([(params.output_column.clone(), output)]);
                    self.backend
                        .mutate_row(&params.table, &key, &values)
                        .map_err(|e| (summary, DispatchError::from(e)))?;
                    summary.good_rows += 1;
                }
                Ok(None) => {
                    summary.bad_rows += 1;
                    summary.empty_results += 1;
                }
                Err(e) => summary.record_failure(&e),
            }

            self.tasks
                .update_task(
                    &params.job_token,
                    &summary.progress(TaskStatus::Running).to_columns(),
                )
                .map_err(|e| (summary, DispatchError::from(e)))?;
        }
        Ok(summary)
    }
}
