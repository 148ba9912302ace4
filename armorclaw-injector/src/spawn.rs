//! The worker-spawner seam.
//!
//! The container runtime is an external collaborator: the injector only
//! needs "start this worker with these environment variables" and
//! "kill it". [`ProcessSpawner`] covers plain subprocess workers;
//! container-runtime spawners implement the same trait out of tree.

use async_trait::async_trait;
use tokio::process::Command;

use armorclaw_types::BridgeError;

/// What to run. The secret itself is never part of this; workers only
/// receive the socket path.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Program or image to execute.
    pub image: String,
    /// Arguments.
    pub args: Vec<String>,
}

/// A running worker the injector can terminate or await.
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    /// Terminate the worker immediately.
    async fn kill(&mut self) -> Result<(), BridgeError>;

    /// Wait for natural exit; returns the exit code when known.
    async fn wait(&mut self) -> Result<Option<i32>, BridgeError>;
}

/// Starts workers. `env` carries only non-secret variables; for the
/// handoff, that is the single `ARMORCLAW_SECRET_SOCKET` entry.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Spawn a worker with the given extra environment.
    async fn spawn(
        &self,
        spec: &WorkerSpec,
        env: &[(String, String)],
    ) -> Result<Box<dyn WorkerProcess>, BridgeError>;
}

/// Spawns workers as direct child processes.
pub struct ProcessSpawner {
    _private: (),
}

impl ProcessSpawner {
    /// Create a new process spawner.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for ProcessSpawner {
    fn default() -> Self {
        Self::new()
    }
}

struct ChildProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    async fn kill(&mut self) -> Result<(), BridgeError> {
        self.child
            .kill()
            .await
            .map_err(|e| BridgeError::SessionNotFound(e.to_string()))
    }

    async fn wait(&mut self) -> Result<Option<i32>, BridgeError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| BridgeError::SessionNotFound(e.to_string()))?;
        Ok(status.code())
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(
        &self,
        spec: &WorkerSpec,
        env: &[(String, String)],
    ) -> Result<Box<dyn WorkerProcess>, BridgeError> {
        let mut command = Command::new(&spec.image);
        command.args(&spec.args);
        for (name, value) in env {
            command.env(name, value);
        }
        command.kill_on_drop(true);
        let child = command
            .spawn()
            .map_err(|e| BridgeError::SecretInjectionFailed(format!("spawn: {e}")))?;
        Ok(Box::new(ChildProcess { child }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_spawner_runs_and_waits() {
        let spawner = ProcessSpawner::new();
        let spec = WorkerSpec {
            image: "true".to_string(),
            args: vec![],
        };
        let mut worker = spawner.spawn(&spec, &[]).await.unwrap();
        assert_eq!(worker.wait().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let spawner = ProcessSpawner::new();
        let spec = WorkerSpec {
            image: "/nonexistent/armorclaw-worker".to_string(),
            args: vec![],
        };
        assert!(spawner.spawn(&spec, &[]).await.is_err());
    }
}
