use anyhow::{Context, Result};
use optack_abstract::{GeneratorStart, LoadGeneratorConfig};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Time given to freshly spawned generators before checking they stayed up.
const SETTLE: Duration = Duration::from_secs(1);

/// A supervised background traffic process (typically an iperf server or
/// client). The child is killed when the handle is stopped or dropped.
pub struct LoadGenerator {
    name: String,
    log_path: PathBuf,
    child: Child,
}

impl LoadGenerator {
    /// Spawn `config.program` with its output captured in `<log_dir>/<name>.log`.
    pub fn spawn(config: &LoadGeneratorConfig, log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create {}", log_dir.display()))?;
        let log_path = log_dir.join(format!("{}.log", config.name));
        let stdout = File::create(&log_path)
            .with_context(|| format!("Failed to create {}", log_path.display()))?;
        let stderr = stdout.try_clone()?;

        let child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start load generator '{}'", config.name))?;

        info!(
            "Started {} ({} {}) pid={:?}, output in {}",
            config.name,
            config.program,
            config.args.join(" "),
            child.id(),
            log_path.display()
        );
        Ok(Self {
            name: config.name.clone(),
            log_path,
            child,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// `false` once the process has exited on its own.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the process if it is still alive and reap it.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            info!("{} already exited with {}", self.name, status);
            return Ok(());
        }
        self.child
            .kill()
            .await
            .with_context(|| format!("Failed to stop {}", self.name))?;
        info!("Stopped {}", self.name);
        Ok(())
    }
}

/// All load generators of one experiment run.
pub struct TrafficSupervisor {
    log_dir: PathBuf,
    generators: Vec<LoadGenerator>,
    unchecked: usize,
}

impl TrafficSupervisor {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            generators: Vec::new(),
            unchecked: 0,
        }
    }

    /// Launch every configured generator whose start phase is `start`.
    pub fn start_phase(
        &mut self,
        configs: &[LoadGeneratorConfig],
        start: GeneratorStart,
    ) -> Result<()> {
        for config in configs.iter().filter(|c| c.start == start) {
            self.generators.push(LoadGenerator::spawn(config, &self.log_dir)?);
        }
        Ok(())
    }

    /// Give generators launched since the last call a moment to come up and
    /// warn about any that died immediately.
    pub async fn settle(&mut self) {
        let first = self.unchecked;
        self.unchecked = self.generators.len();
        if first == self.unchecked {
            return;
        }

        tokio::time::sleep(SETTLE).await;
        for generator in &mut self.generators[first..] {
            if !generator.is_running() {
                warn!(
                    "{} exited right after start, see {}",
                    generator.name(),
                    generator.log_path().display()
                );
            }
        }
    }

    /// Stop every generator, continuing past individual failures.
    pub async fn stop_all(self) {
        for generator in self.generators {
            let name = generator.name.clone();
            if let Err(e) = generator.stop().await {
                warn!("{}: {:#}", name, e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn scratch(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("optack-traffic-{}-{}", tag, std::process::id()))
    }

    fn generator(
        name: &str,
        program: &str,
        args: &[&str],
        start: GeneratorStart,
    ) -> LoadGeneratorConfig {
        LoadGeneratorConfig {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            start,
        }
    }

    #[tokio::test]
    async fn captures_output_in_named_log() {
        let dir = scratch("output");
        let config = generator("echo", "sh", &["-c", "echo hello"], GeneratorStart::Baseline);
        let mut handle = LoadGenerator::spawn(&config, &dir).unwrap();
        assert_eq!(handle.log_path(), dir.join("echo.log"));

        let status = handle.child.wait().await.unwrap();
        assert!(status.success());
        assert!(!handle.is_running());
        let text = fs::read_to_string(dir.join("echo.log")).unwrap();
        assert_eq!(text.trim(), "hello");

        handle.stop().await.unwrap();
        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn stop_kills_long_running_process() {
        let dir = scratch("kill");
        let config = generator("sleeper", "sleep", &["30"], GeneratorStart::Baseline);
        let mut handle = LoadGenerator::spawn(&config, &dir).unwrap();
        assert!(handle.is_running());
        handle.stop().await.unwrap();
        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn starts_only_matching_phase() {
        let dir = scratch("phase");
        let configs = vec![
            generator("server", "sleep", &["30"], GeneratorStart::Baseline),
            generator("client", "sleep", &["30"], GeneratorStart::Attack),
        ];
        let mut supervisor = TrafficSupervisor::new(&dir);

        supervisor
            .start_phase(&configs, GeneratorStart::Baseline)
            .unwrap();
        supervisor.settle().await;
        assert_eq!(supervisor.generators.len(), 1);
        assert_eq!(supervisor.generators[0].name(), "server");
        assert!(supervisor.generators[0].is_running());

        supervisor
            .start_phase(&configs, GeneratorStart::Attack)
            .unwrap();
        supervisor.settle().await;
        assert_eq!(supervisor.generators.len(), 2);
        assert_eq!(supervisor.unchecked, 2);

        supervisor.stop_all().await;
        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let dir = scratch("missing");
        let config = generator("ghost", "optack-no-such-binary", &[], GeneratorStart::Baseline);
        assert!(LoadGenerator::spawn(&config, &dir).is_err());
        fs::remove_dir_all(dir).ok();
    }
}
