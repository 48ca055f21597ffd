//! Seam to an external distributed-compute launcher.
//!
//! The launcher itself is opaque: it accepts a job description, returns a
//! handle and exposes a status check. Only "is the job live yet" is acted on.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::row_job::RowJobParams;

pub const ENV_TABLE: &str = "ROWFORGE_TABLE";
pub const ENV_OUTPUT_COLUMN: &str = "ROWFORGE_OUTPUT_COLUMN";
pub const ENV_TASK_TOKEN: &str = "ROWFORGE_TASK_TOKEN";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("launcher rejected job: {0}")]
    Rejected(String),

    #[error("job exited with code {code} before starting")]
    NotStarted { code: i32 },

    #[error("job still not live after {polls} status polls")]
    Timeout { polls: u32 },

    #[error("launcher status check failed: {0}")]
    Probe(String),
}

/// Description of one external job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub input_path: String,
    pub output_path: String,
    /// Reference to the job logic (script or artifact name).
    pub job_logic: String,
    pub env: BTreeMap<String, String>,
    /// Local files shipped alongside the job.
    pub files: Vec<String>,
    pub parallelism: Option<u32>,
}

impl LaunchRequest {
    pub fn new(
        input_path: impl Into<String>,
        output_path: impl Into<String>,
        job_logic: impl Into<String>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            job_logic: job_logic.into(),
            ..Self::default()
        }
    }

    /// Launch description for a row job executed by the external cluster.
    ///
    /// The table doubles as the input path; the output column is base64 encoded
    /// since it is arbitrary bytes.
    pub fn for_row_job(
        params: &RowJobParams,
        output_path: impl Into<String>,
        job_logic: impl Into<String>,
    ) -> Self {
        let mut request = Self::new(params.table.clone(), output_path, job_logic);
        request
            .env
            .insert(ENV_TABLE.to_string(), params.table.clone());
        request.env.insert(
            ENV_OUTPUT_COLUMN.to_string(),
            STANDARD.encode(&params.output_column),
        );
        request
            .env
            .insert(ENV_TASK_TOKEN.to_string(), params.job_token.to_string());
        request
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = Some(parallelism);
        self
    }
}

/// Opaque identifier of a launched job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaunchHandle(pub String);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LaunchStatus {
    Starting,
    Live,
    Exited(i32),
}

pub trait ComputeLauncher: Send + Sync {
    fn launch(&self, request: LaunchRequest) -> Result<LaunchHandle, LaunchError>;

    fn status(&self, handle: &LaunchHandle) -> Result<LaunchStatus, LaunchError>;
}

/// Poll until the job is live.
///
/// A job that exits with code 0 before reporting live is treated as started
/// (it ran to completion). A non-zero exit is `NotStarted`.
pub fn wait_till_started(
    launcher: &dyn ComputeLauncher,
    handle: &LaunchHandle,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<(), LaunchError> {
    for poll in 1..=max_polls {
        match launcher.status(handle)? {
            LaunchStatus::Live | LaunchStatus::Exited(0) => {
                info!(handle = %handle.0, polls = poll, "external job started");
                return Ok(());
            }
            LaunchStatus::Exited(code) => return Err(LaunchError::NotStarted { code }),
            LaunchStatus::Starting => {
                debug!(handle = %handle.0, poll, "external job starting");
                thread::sleep(poll_interval);
            }
        }
    }
    Err(LaunchError::Timeout { polls: max_polls })
}
