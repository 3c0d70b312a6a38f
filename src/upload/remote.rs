//! Remote file store
//!
//! The pipeline needs three operations: list a directory, create one, and
//! put a file. [`SftpRemote`] implements them as `sftp` batch runs.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{LoggerError, Result};
use crate::link::{CommandRunner, ProcessCommand};

/// Remote side of the upload pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Names of the entries in `dir`
    async fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Create `dir`; an existing directory is not an error
    async fn make_dir(&self, dir: &str) -> Result<()>;

    /// Upload `local` to the remote path `remote`
    async fn put(&self, local: &Path, remote: &str) -> Result<()>;
}

/// `sftp -b -` over the system runner
pub struct SftpRemote {
    config: RemoteConfig,
    runner: Arc<dyn CommandRunner>,
}

impl SftpRemote {
    pub fn new(config: &RemoteConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config: config.clone(),
            runner,
        }
    }

    fn batch(&self, script: String) -> ProcessCommand {
        let mut command = ProcessCommand::new(&self.config.sftp_program).args(["-b", "-"]);
        if let Some(identity) = &self.config.identity_file {
            command = command.args(["-i", identity.as_str()]);
        }
        command
            .args(["-P".to_string(), self.config.port.to_string()])
            .args(["-o", "BatchMode=yes"])
            .arg(format!("{}@{}", self.config.username, self.config.host))
            .stdin(script)
            .timeout(Duration::from_secs(self.config.transfer_timeout_s))
    }

    async fn run_batch(&self, script: String) -> Result<String> {
        let command = self.batch(script);
        let output = self.runner.run(&command).await.map_err(|e| {
            LoggerError::Transfer(format!("{} unreachable: {}", self.config.host, e))
        })?;

        if !output.success {
            return Err(LoggerError::Transfer(format!(
                "sftp to {} failed: {}",
                self.config.host,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Names from `ls -1` output, skipping echoed batch commands
pub fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("sftp>"))
        .filter_map(|line| line.trim_end_matches('/').rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl RemoteStore for SftpRemote {
    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let stdout = self.run_batch(format!("ls -1 \"{}\"\n", dir)).await?;
        Ok(parse_listing(&stdout))
    }

    async fn make_dir(&self, dir: &str) -> Result<()> {
        // A leading '-' lets the batch continue when the directory exists
        self.run_batch(format!("-mkdir \"{}\"\n", dir)).await?;
        debug!("Ensured remote directory {}", dir);
        Ok(())
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        self.run_batch(format!("put \"{}\" \"{}\"\n", local.display(), remote))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::create_valid_config;
    use crate::link::process::mocks::ScriptedRunner;
    use crate::link::CommandOutput;

    fn remote(runner: &ScriptedRunner) -> SftpRemote {
        SftpRemote::new(&create_valid_config().remote, Arc::new(runner.clone()))
    }

    #[test]
    fn test_parse_listing() {
        let output = "sftp> ls -1 \"/data/LakeStation\"\n/data/LakeStation/2025\n/data/LakeStation/2026/\n\n";
        assert_eq!(parse_listing(output), vec!["2025", "2026"]);
        assert_eq!(parse_listing("2026\n"), vec!["2026"]);
        assert!(parse_listing("").is_empty());
    }

    #[tokio::test]
    async fn test_put_runs_batch() {
        let runner = ScriptedRunner::new();
        let remote = remote(&runner);

        remote
            .put(
                Path::new("/var/pending/20260314.csv.gz"),
                "/data/LakeStation/2026/03/20260314.csv.gz",
            )
            .await
            .unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        let line = commands[0].command_line();
        assert!(line.starts_with("sftp -b -"));
        assert!(line.contains("-P 22"));
        assert!(line.ends_with("logger@data.example.org"));
        assert_eq!(
            commands[0].stdin.as_deref(),
            Some("put \"/var/pending/20260314.csv.gz\" \"/data/LakeStation/2026/03/20260314.csv.gz\"\n")
        );
    }

    #[tokio::test]
    async fn test_make_dir_tolerates_existing() {
        let runner = ScriptedRunner::new();
        remote(&runner).make_dir("/data/LakeStation").await.unwrap();
        assert_eq!(
            runner.commands()[0].stdin.as_deref(),
            Some("-mkdir \"/data/LakeStation\"\n")
        );
    }

    #[tokio::test]
    async fn test_failures_are_transfer_errors() {
        let runner = ScriptedRunner::new();
        runner.respond("sftp", CommandOutput::failed("Connection refused"));
        let err = remote(&runner).list("/data").await.unwrap_err();
        assert!(matches!(err, LoggerError::Transfer(msg) if msg.contains("Connection refused")));

        let runner = ScriptedRunner::new();
        runner.unreachable("sftp");
        let err = remote(&runner).put(Path::new("a"), "b").await.unwrap_err();
        assert!(matches!(err, LoggerError::Transfer(_)));
    }
}
