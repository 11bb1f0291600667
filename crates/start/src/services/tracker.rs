//! The companion tracker subprocess.

use std::sync::Arc;

use anyhow::Result;

use super::Subprocess;
use crate::{
    EnvironmentState, ShutdownCoordinator, Trigger,
    process::{CommandConfig, KillSwitch, ProcessSpec, exit_code},
};

/// Default tracker command.
pub const DEFAULT_COMMAND: &str = "yarn";
/// Default tracker arguments.
pub const DEFAULT_ARGS: [&str; 2] = ["run", "start:tracker"];

/// Default command line of the tracker.
pub fn default_command() -> CommandConfig {
    CommandConfig::new(DEFAULT_COMMAND, DEFAULT_ARGS)
}

/// Handle to the running tracker.
#[derive(Debug)]
pub struct TrackerProcess {
    kill: KillSwitch,
}

impl TrackerProcess {
    /// Spawn the tracker and register it with the coordinator.
    ///
    /// Its output is forwarded to the log. When it closes, the coordinator is triggered
    /// with its exit code.
    pub fn spawn(
        command: &CommandConfig,
        env: &EnvironmentState,
        coordinator: &ShutdownCoordinator,
    ) -> Result<Arc<Self>> {
        let (kill, exit) = ProcessSpec::new("tracker", command.clone())
            .exact_env(env.iter())
            .spawn()?;

        let pid = exit.pid();
        let tracker = Arc::new(Self { kill });
        coordinator.register_tracker(tracker.clone())?;

        tracing::info!(command = %command, pid, "Tracker started");

        let on_close = coordinator.clone();
        coordinator.spawn_supervised("tracker", async move {
            let status = exit.wait().await?;
            let code = exit_code(&status);

            tracing::info!(code, "Tracker closed");
            on_close.trigger(Trigger::TrackerClosed(code));

            Ok(())
        });

        Ok(tracker)
    }
}

impl Subprocess for TrackerProcess {
    fn kill(&self) -> Result<()> {
        if !self.kill.fire() {
            tracing::debug!("Tracker kill already requested");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::ServiceContext;

    fn coordinator() -> ShutdownCoordinator {
        ShutdownCoordinator::new(Arc::new(ServiceContext::new()))
    }

    #[tokio::test]
    async fn test_tracker_close_code_becomes_outcome() {
        let coordinator = coordinator();
        let command = CommandConfig::new("/bin/sh", ["-c", "echo tracking; exit 7"]);

        TrackerProcess::spawn(&command, &EnvironmentState::default(), &coordinator).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), coordinator.wait())
            .await
            .unwrap();
        assert_eq!(outcome.into_exit_code().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_killed_tracker_does_not_override_outcome() {
        let coordinator = coordinator();
        let command = CommandConfig::new("sleep", ["30"]);
        let env: EnvironmentState = std::env::vars().collect();

        TrackerProcess::spawn(&command, &env, &coordinator).unwrap();
        coordinator.trigger(Trigger::Exit);

        let outcome = tokio::time::timeout(Duration::from_secs(5), coordinator.wait())
            .await
            .unwrap();
        assert!(matches!(outcome, Trigger::Exit));
    }

    #[tokio::test]
    async fn test_tracker_sees_environment() {
        let coordinator = coordinator();
        let command = CommandConfig::new(
            "/bin/sh",
            ["-c", "test \"$TARGET_NETWORK\" = development && exit 0 || exit 9"],
        );
        let env: EnvironmentState = [("TARGET_NETWORK", "development")].into_iter().collect();

        TrackerProcess::spawn(&command, &env, &coordinator).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), coordinator.wait())
            .await
            .unwrap();
        assert_eq!(outcome.into_exit_code().unwrap(), 0);
    }
}
