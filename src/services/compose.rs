//! docker compose implementation of [`ServiceController`]

use std::path::PathBuf;
use std::process::Command;

use crate::config::StackPaths;
use crate::error::{StackError, StackResult};

use super::{HealthState, RunState, ServiceController, ServiceState};

/// Drives services through the `docker compose` CLI
#[derive(Debug, Clone)]
pub struct ComposeController {
    docker: String,
    project_dir: PathBuf,
    compose_file: PathBuf,
}

impl ComposeController {
    pub fn new(paths: &StackPaths) -> Self {
        Self {
            docker: "docker".to_string(),
            project_dir: paths.base_dir().clone(),
            compose_file: paths.compose_file(),
        }
    }

    /// Use a different docker binary (e.g. `podman`)
    pub fn with_binary(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    fn compose(&self, args: &[&str], services: &[String]) -> StackResult<String> {
        let output = Command::new(&self.docker)
            .arg("compose")
            .arg("--project-directory")
            .arg(&self.project_dir)
            .arg("-f")
            .arg(&self.compose_file)
            .args(args)
            .args(services)
            .output()
            .map_err(|e| StackError::Service(format!("Failed to run {}: {}", self.docker, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackError::Service(format!(
                "`{} compose {} {}` failed ({}): {}",
                self.docker,
                args.join(" "),
                services.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ServiceController for ComposeController {
    fn query_state(&self, name: &str) -> StackResult<ServiceState> {
        let raw = self.compose(
            &["ps", "--all", "--format", "{{.State}}|{{.Health}}"],
            &[name.to_string()],
        )?;
        Ok(decode_state(&raw))
    }

    fn start(&self, names: &[String]) -> StackResult<()> {
        tracing::info!(services = ?names, "starting services");
        self.compose(&["up", "-d"], names).map(|_| ())
    }

    fn stop(&self, names: &[String]) -> StackResult<()> {
        tracing::info!(services = ?names, "stopping services");
        self.compose(&["stop"], names).map(|_| ())
    }

    fn restart(&self, names: &[String]) -> StackResult<()> {
        tracing::info!(services = ?names, "restarting services");
        self.compose(&["restart"], names).map(|_| ())
    }

    fn recreate(&self, names: &[String]) -> StackResult<()> {
        tracing::info!(services = ?names, "recreating services");
        self.compose(&["up", "-d", "--force-recreate"], names)
            .map(|_| ())
    }

    fn exec_in_service(&self, name: &str, command: &[String]) -> StackResult<String> {
        let mut args = vec!["exec", "-T", name];
        args.extend(command.iter().map(String::as_str));
        self.compose(&args, &[])
    }
}

/// Decode `docker compose ps --format '{{.State}}|{{.Health}}'` output
///
/// No container at all means the service is stopped. Only the first line is
/// considered; a service scaled to several replicas reports its first one.
pub fn decode_state(raw: &str) -> ServiceState {
    let line = match raw.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => line,
        None => return ServiceState::stopped(),
    };

    let (state, health) = line.split_once('|').unwrap_or((line, ""));

    let health_state = match health.trim() {
        "healthy" => HealthState::Healthy,
        "unhealthy" => HealthState::Unhealthy,
        _ => HealthState::None,
    };

    let run_state = match state.trim() {
        "running" if health.trim() == "starting" => RunState::Starting,
        "running" => RunState::Running,
        "restarting" | "created" => RunState::Starting,
        "exited" | "dead" => RunState::Stopped,
        // A paused or half-removed container still holds its files open
        "paused" | "removing" => RunState::Unknown,
        _ => RunState::Unknown,
    };

    ServiceState::new(run_state, health_state)
}
