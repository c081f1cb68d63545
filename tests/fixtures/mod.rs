//! Shared harness for pipeline integration tests
//!
//! Builds a [`JobPipeline`] wired to an in-process [`MockCoordinator`], with a
//! scratch work root and `sh` as the script interpreter. Script paths are
//! treated as local files unless a test points `script_base_url` somewhere.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use loom_worker::mock::{project_payload, MockCoordinator};
use loom_worker::{JobDescriptor, JobPipeline, LogSink, WorkerConfig};
use tempfile::TempDir;

pub struct Harness {
    pub root: TempDir,
    pub coordinator: Arc<MockCoordinator>,
    pub pipeline: JobPipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Harness with test defaults, then `adjust` applied to the config
    pub fn with_config(adjust: impl FnOnce(&mut WorkerConfig)) -> Self {
        let root = TempDir::new().unwrap();
        let mut config = WorkerConfig {
            work_root: root.path().join("jobs"),
            script_base_url: String::new(),
            ..WorkerConfig::default()
        };
        config.script.interpreter = "sh".to_string();
        adjust(&mut config);

        let coordinator = Arc::new(MockCoordinator::new());
        let pipeline = JobPipeline::new(config, coordinator.clone(), LogSink::new()).unwrap();
        Self {
            root,
            coordinator,
            pipeline,
        }
    }

    pub fn sink(&self) -> &LogSink {
        self.pipeline.sink()
    }

    /// Write a script outside the work root and return its path
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let dir = self.root.path().join("scripts");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    /// Register a claimable job running the local script at `script`
    pub fn add_job(&self, slug: &str, id: &str, script: &Path, dataset_url: Option<&str>) {
        let mut project = project_payload(id, &script.display().to_string());
        project.title = Some(format!("Job {}", id));
        project.kind = Some("training".to_string());
        project.price = Some(10.0);
        project.cloud_link = dataset_url.map(str::to_string);
        self.coordinator.add_job(slug, project);
    }

    /// Register a job whose script body is `body` and claim it
    pub fn claimed_job(&self, id: &str, body: &str) -> JobDescriptor {
        let script = self.write_script(&format!("job-{}.sh", id), body);
        let slug = format!("slug-{}", id);
        self.add_job(&slug, id, &script, None);
        self.pipeline.claim_job(&slug).unwrap()
    }

    /// Workspace directory the pipeline uses for `id`
    pub fn workspace(&self, id: &str) -> PathBuf {
        self.root.path().join("jobs").join(id)
    }
}
