//! Wall clock and network time sync
//!
//! Timestamps and day boundaries come from the wall clock (UTC). Cadence
//! uses tokio's monotonic clock and never reads this one.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use crate::error::{LoggerError, Result};
use crate::link::{CommandRunner, ProcessCommand};

/// Source of UTC wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// The host clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Set the host clock from network time
///
/// `argv` is the configured sync command; an empty command disables sync.
///
/// # Errors
///
/// Returns `SoftFailure` if the tool fails; the caller keeps the current
/// clock.
pub async fn sync_clock(runner: &dyn CommandRunner, use_sudo: bool, argv: &[String]) -> Result<()> {
    let Some(command) = ProcessCommand::from_argv(use_sudo, argv) else {
        debug!("Clock sync disabled");
        return Ok(());
    };

    let output = runner
        .run(&command)
        .await
        .map_err(|e| LoggerError::SoftFailure(format!("clock sync failed: {}", e)))?;

    if !output.success {
        return Err(LoggerError::SoftFailure(format!(
            "clock sync failed: {}",
            output.stderr.trim()
        )));
    }

    info!("System clock synchronised: {}", output.stdout.trim());
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::process::mocks::ScriptedRunner;
    use crate::link::CommandOutput;
    use chrono::TimeZone;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_manual_clock_today() {
        let clock = mocks::ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 59).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
    }

    #[test]
    fn test_manual_clock_read_step() {
        let clock = mocks::ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 59).unwrap());
        clock.set_read_step(chrono::Duration::seconds(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
    }

    #[tokio::test]
    async fn test_sync_runs_configured_command() {
        let runner = ScriptedRunner::new();
        sync_clock(&runner, true, &argv(&["ntpdate", "-u", "pool.ntp.org"]))
            .await
            .unwrap();
        assert_eq!(runner.command_lines(), vec!["sudo ntpdate -u pool.ntp.org"]);
    }

    #[tokio::test]
    async fn test_sync_failure_is_soft() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "ntpdate",
            CommandOutput::failed("no server suitable for synchronization found"),
        );
        let err = sync_clock(&runner, false, &argv(&["ntpdate", "pool.ntp.org"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LoggerError::SoftFailure(_)));
    }

    #[tokio::test]
    async fn test_empty_command_disables_sync() {
        let runner = ScriptedRunner::new();
        sync_clock(&runner, true, &[]).await.unwrap();
        assert!(runner.command_lines().is_empty());
    }
}
