//! # Scheduler Module
//!
//! The top-level control loop.
//!
//! Each iteration:
//!
//! 1. Runs the startup procedure when flagged (first iteration, and the one
//!    after every day rollover)
//! 2. Checks for a UTC date change and rolls the day file over
//! 3. Polls the pulse gauges (every iteration, pulses are not buffered)
//! 4. Takes one sample when the next-sample deadline has passed and no
//!    upload is pending
//! 5. Runs a one-off connectivity test upload once enough samples prove the
//!    pipeline alive
//!
//! Slow work (modem, transfers) only happens in steps 1 and 5. Cadence is
//! kept with monotonic deadlines, so long startups do not make the sampling
//! drift.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::link::CommandRunner;
use crate::modem::ConnectivityManager;
use crate::position::{PositionAcquirer, PositionFix, PositionOutcome};
use crate::sensors::SensorArray;
use crate::storage::{DataStore, DayFile};
use crate::upload::{RelocationPolicy, UploadPipeline};

pub mod clock;

pub use clock::{Clock, SystemClock};

/// Interval between samples
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Mutable cadence state owned by the scheduler
#[derive(Debug, Clone)]
pub struct CadenceState {
    pub initial_startup: bool,
    pub upload_pending: bool,
    pub today: NaiveDate,
    pub next_sample: Instant,
    pub samples_since_startup: u64,
    pub test_upload_done: bool,
}

/// Sampling, rollover and connectivity windows
pub struct SamplingScheduler {
    config: Config,
    modem: ConnectivityManager,
    acquirer: PositionAcquirer,
    pipeline: UploadPipeline,
    sensors: SensorArray,
    store: DataStore,
    clock: Arc<dyn Clock>,
    runner: Arc<dyn CommandRunner>,
    state: CadenceState,
    active: Option<DayFile>,
    position: Option<PositionFix>,
    fix_acquired: bool,
}

impl SamplingScheduler {
    /// Build the scheduler and create the data directories
    ///
    /// # Errors
    ///
    /// Returns `Io` if a data directory cannot be created.
    pub fn new(
        config: Config,
        modem: ConnectivityManager,
        pipeline: UploadPipeline,
        sensors: SensorArray,
        clock: Arc<dyn Clock>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let store = DataStore::new(&config.storage);
        store.ensure_dirs()?;

        let state = CadenceState {
            initial_startup: true,
            // Files queued before a restart go out on the first window
            upload_pending: true,
            today: clock.today(),
            next_sample: Instant::now(),
            samples_since_startup: 0,
            test_upload_done: false,
        };

        Ok(Self {
            acquirer: PositionAcquirer::new(&config.gps),
            config,
            modem,
            pipeline,
            sensors,
            store,
            clock,
            runner,
            state,
            active: None,
            position: None,
            fix_acquired: false,
        })
    }

    pub fn cadence(&self) -> &CadenceState {
        &self.state
    }

    pub fn active_day(&self) -> Option<&DayFile> {
        self.active.as_ref()
    }

    pub fn position(&self) -> Option<PositionFix> {
        self.position
    }

    pub fn modem(&self) -> &ConnectivityManager {
        &self.modem
    }

    /// Run until a fatal hardware error
    pub async fn run(&mut self) -> Result<()> {
        let period = Duration::from_millis(self.config.scheduler.loop_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Sampling loop running every {:?}", period);

        loop {
            interval.tick().await;

            match self.tick().await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!("Fatal hardware failure: {}", e);
                    return Err(e);
                }
                Err(e) => warn!("Loop iteration failed: {}", e),
            }
        }
    }

    /// Best-effort modem power-down before exit
    pub async fn shutdown(&mut self) {
        info!("Shutting down, powering modem off");
        self.modem.power_off().await;
    }

    /// One loop iteration
    pub async fn tick(&mut self) -> Result<()> {
        if self.state.initial_startup {
            self.state.initial_startup = false;
            self.startup().await?;
        }

        let wall = self.clock.now();
        self.rollover_at(wall.date_naive()).await;

        let now = Instant::now();
        self.sensors.poll_pulses(now);

        if now >= self.state.next_sample && !self.state.upload_pending {
            self.state.next_sample += SAMPLE_PERIOD;
            if self.state.next_sample <= now {
                self.state.next_sample = now + SAMPLE_PERIOD;
            }
            self.take_sample(wall)?;
        }

        self.maybe_test_upload().await
    }

    /// Roll the day file over when the UTC date changed
    ///
    /// Returns whether a rollover happened; a second call on the same date
    /// is a no-op.
    pub async fn check_rollover(&mut self) -> bool {
        let today = self.clock.today();
        self.rollover_at(today).await
    }

    async fn rollover_at(&mut self, today: NaiveDate) -> bool {
        if today == self.state.today {
            return false;
        }

        info!(from = %self.state.today, to = %today, "Day rollover");
        self.state.today = today;

        if let Some(day) = self.active.take() {
            if let Err(e) = self.store.move_to_pending(day) {
                warn!("Could not queue finished day file: {}", e);
            }
            tokio::time::sleep(Duration::from_millis(self.config.storage.rollover_settle_ms)).await;
        }

        self.state.upload_pending = true;
        self.state.initial_startup = true;
        true
    }

    /// Connectivity window, header and housekeeping
    ///
    /// Only `FatalHardware` escapes; every other failure is logged and the
    /// dependent work waits for the next window.
    async fn startup(&mut self) -> Result<()> {
        info!("Running startup procedure");

        self.ensure_powered().await?;

        match self.modem.connect().await {
            Ok(()) => {
                if self.state.upload_pending {
                    self.pipeline.run_pending(&self.store).await;
                }
                if let Err(e) = clock::sync_clock(
                    self.runner.as_ref(),
                    self.config.modem.use_sudo,
                    &self.config.scheduler.clock_sync_command,
                )
                .await
                {
                    warn!("Keeping current clock: {}", e);
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("No connection this window, uploads deferred: {}", e),
        }
        self.state.upload_pending = false;
        self.state.today = self.clock.today();

        self.refresh_position().await;

        if let Err(e) = self.open_day_file() {
            warn!("Cannot open day file for {}: {}", self.state.today, e);
        }
        self.state.samples_since_startup = 0;

        if let Err(e) = self.modem.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        self.modem.power_off().await;

        match self.store.relocate_stale(self.state.today) {
            Ok(moved) if !moved.is_empty() => info!("Queued {} stale files", moved.len()),
            Ok(_) => {}
            Err(e) => warn!("Stale file relocation failed: {}", e),
        }
        if let Err(e) = self.store.remove_stale_log() {
            warn!("Could not remove stale process log: {}", e);
        }

        self.state.next_sample = Instant::now();
        info!("Startup complete, sampling into {}", self.state.today);
        Ok(())
    }

    /// Power the modem up unless it already is
    ///
    /// Only `FatalHardware` is returned; anything softer is left for
    /// `connect` to retry.
    async fn ensure_powered(&mut self) -> Result<()> {
        if self.modem.state().is_online() {
            return Ok(());
        }
        match self.modem.power_on().await {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Modem power-on incomplete: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Acquire a fix while connected; otherwise keep or fall back
    async fn refresh_position(&mut self) {
        if !self.config.gps.enabled {
            self.position = None;
            return;
        }
        if self.fix_acquired && !self.config.gps.reacquire_daily {
            return;
        }

        let outcome = match (self.modem.is_connected(), self.modem.link()) {
            (true, Some(link)) => self.acquirer.acquire(link).await,
            _ => {
                debug!("Modem link not available for a fix");
                PositionOutcome::Unavailable
            }
        };

        self.fix_acquired = matches!(outcome, PositionOutcome::Acquired(_));
        let fix = outcome.fix().unwrap_or_else(|| self.acquirer.fallback());
        if !self.fix_acquired {
            info!("Using fallback position {}", fix);
        }
        self.position = Some(fix);
    }

    fn open_day_file(&mut self) -> Result<()> {
        let headings = self.sensors.headings();
        let day = self.store.open_day(
            self.state.today,
            &self.config.site.name,
            self.position.as_ref(),
            &headings,
        )?;
        self.active = Some(day);
        Ok(())
    }

    fn take_sample(&mut self, timestamp: DateTime<Utc>) -> Result<()> {
        if self.active.is_none() {
            self.open_day_file()?;
        }

        let record = self.sensors.sample(timestamp);
        if let Some(day) = &self.active {
            self.store.append(day, &record)?;
        }
        self.state.samples_since_startup += 1;
        Ok(())
    }

    async fn maybe_test_upload(&mut self) -> Result<()> {
        let threshold = self.config.scheduler.test_upload_after_samples;
        if threshold == 0
            || self.state.test_upload_done
            || self.state.samples_since_startup < threshold
        {
            return Ok(());
        }

        self.state.test_upload_done = true;
        info!("{} samples taken, running connectivity test upload", threshold);

        match self.test_upload().await {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Connectivity test upload failed: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn test_upload(&mut self) -> Result<()> {
        let artifact = self
            .store
            .write_test_artifact(&self.config.site.name, self.clock.now())?;

        self.ensure_powered().await?;

        let connected = self.modem.connect().await;
        match &connected {
            Ok(()) => {
                self.pipeline
                    .run_batch(&[artifact], RelocationPolicy::Delete)
                    .await;
            }
            Err(_) => {
                if let Err(e) = std::fs::remove_file(&artifact) {
                    debug!("Could not remove test artifact: {}", e);
                }
            }
        }

        if let Err(e) = self.modem.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        self.modem.power_off().await;
        self.state.next_sample = Instant::now();
        connected
    }
}

#[cfg(test)]
mod tests {
    use super::clock::mocks::ManualClock;
    use super::*;
    use crate::config::tests::create_valid_config;
    use crate::error::LoggerError;
    use crate::link::mocks::MockLinkOpener;
    use crate::link::port_trait::mocks::MockSerialPort;
    use crate::link::process::mocks::ScriptedRunner;
    use crate::link::CommandOutput;
    use crate::modem::power::mocks::MockPower;
    use crate::modem::commands::mode_ack;
    use crate::modem::tests::{healthy_runner, manager_with, mode_output, DEVICE};
    use crate::modem::ModemState;
    use crate::sensors::adc::mocks::MockAnalogInput;
    use crate::sensors::ChannelId;
    use crate::upload::remote::MockRemoteStore;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Harness {
        root: TempDir,
        scheduler: SamplingScheduler,
        clock: ManualClock,
        runner: ScriptedRunner,
        power: MockPower,
        adc: MockAnalogInput,
        puts: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn dir(&self, name: &str) -> PathBuf {
            self.root.path().join(name)
        }

        fn listing(&self, name: &str) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.dir(name))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        }

        fn puts(&self) -> Vec<String> {
            self.puts.lock().unwrap().clone()
        }

        async fn step(&mut self) {
            tokio::time::advance(SAMPLE_PERIOD).await;
            self.clock.advance(chrono::Duration::seconds(1));
            self.scheduler.tick().await.unwrap();
        }
    }

    fn harness_with(runner: ScriptedRunner, adjust: impl FnOnce(&mut Config)) -> Harness {
        let root = TempDir::new().unwrap();
        let mut config = create_valid_config();
        let dir = |name: &str| root.path().join(name).to_string_lossy().to_string();
        config.storage.sampling_dir = dir("sampling");
        config.storage.pending_dir = dir("pending");
        config.storage.uploaded_dir = dir("uploaded");
        config.storage.test_dir = dir("test");
        config.storage.stale_log = Some(dir("datalogger.out"));
        config.storage.rollover_settle_ms = 100;
        config.scheduler.test_upload_after_samples = 0;
        config.gps.max_polls = 3;
        adjust(&mut config);

        let power = MockPower::new();
        let opener = MockLinkOpener::new(MockSerialPort::new());
        let modem = manager_with(&runner, &power, &opener);

        let puts = Arc::new(Mutex::new(Vec::new()));
        let recorded = puts.clone();
        let mut remote = MockRemoteStore::new();
        remote.expect_list().returning(|_| Ok(Vec::new()));
        remote.expect_make_dir().returning(|_| Ok(()));
        remote.expect_put().returning(move |local: &Path, _: &str| {
            recorded
                .lock()
                .unwrap()
                .push(local.file_name().unwrap().to_string_lossy().to_string());
            Ok(())
        });
        let pipeline = UploadPipeline::new(&config, Box::new(remote));

        let adc = MockAnalogInput::new();
        for (i, channel) in config.sensors.channels.iter().enumerate() {
            adc.set_voltage(*channel, 0.5 + i as f64);
        }
        let sensors = SensorArray::new(&config.sensors, Box::new(adc.clone()), Instant::now());

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 50).unwrap());
        let scheduler = SamplingScheduler::new(
            config,
            modem,
            pipeline,
            sensors,
            Arc::new(clock.clone()),
            Arc::new(runner.clone()),
        )
        .unwrap();

        Harness {
            root,
            scheduler,
            clock,
            runner,
            power,
            adc,
            puts,
        }
    }

    fn harness() -> Harness {
        harness_with(healthy_runner(), |_| {})
    }

    fn day_lines(h: &Harness, dir: &str, name: &str) -> Vec<String> {
        fs::read_to_string(h.dir(dir).join(name))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_to_rollover_upload() {
        let mut h = harness();

        // Cold start: header plus first sample
        h.scheduler.tick().await.unwrap();
        assert_eq!(h.listing("sampling"), vec!["20260314.csv"]);
        assert_eq!(h.scheduler.modem().state(), ModemState::PoweredOff);

        for _ in 0..4 {
            h.step().await;
        }

        let lines = day_lines(&h, "sampling", "20260314.csv");
        assert_eq!(lines[0], "Site Name : LakeStation");
        assert!(lines[1].starts_with("Position : "));
        assert!(lines[2].ends_with("Year,Month,Day,Hour,Minute,Second"));
        let samples = &lines[3..];
        assert_eq!(samples.len(), 5);
        assert!(samples[0].ends_with("2026,03,14,23,59,50"));
        assert!(samples[4].ends_with("2026,03,14,23,59,54"));

        // Date change
        h.clock.set(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 1).unwrap());
        tokio::time::advance(SAMPLE_PERIOD).await;
        h.scheduler.tick().await.unwrap();

        assert_eq!(h.listing("pending"), vec!["20260314.csv"]);
        assert!(h.scheduler.cadence().upload_pending);
        assert!(h.scheduler.cadence().initial_startup);
        assert!(h.listing("sampling").is_empty());
        assert!(h.puts().is_empty());

        // Next startup uploads exactly that file
        h.step().await;
        assert_eq!(h.puts(), vec!["20260314.csv.gz"]);
        assert!(!h.scheduler.cadence().upload_pending);
        assert!(h.listing("pending").is_empty());
        assert_eq!(h.listing("uploaded"), vec!["20260314.csv.gz"]);
        assert_eq!(h.listing("sampling"), vec!["20260315.csv"]);

        let lines = day_lines(&h, "sampling", "20260315.csv");
        assert_eq!(lines.iter().filter(|l| l.starts_with("Site Name")).count(), 1);
        assert_eq!(lines.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollover_is_idempotent_within_a_day() {
        let mut h = harness();
        h.scheduler.tick().await.unwrap();

        h.clock.set(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 1).unwrap());
        assert!(h.scheduler.check_rollover().await);
        let pending = h.listing("pending");

        assert!(!h.scheduler.check_rollover().await);
        h.clock.advance(chrono::Duration::hours(5));
        assert!(!h.scheduler.check_rollover().await);

        assert_eq!(h.listing("pending"), pending);
        assert_eq!(h.scheduler.cadence().today, NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sampling_while_upload_pending() {
        let mut h = harness();
        h.scheduler.tick().await.unwrap();

        h.clock.set(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 1).unwrap());
        h.scheduler.check_rollover().await;
        h.scheduler.state.initial_startup = false;

        tokio::time::advance(Duration::from_secs(5)).await;
        h.scheduler.tick().await.unwrap();
        assert!(h.scheduler.active_day().is_none());
        assert_eq!(h.scheduler.cadence().samples_since_startup, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connection_defers_uploads() {
        let runner = ScriptedRunner::new();
        runner.respond("cdc-wdm0 -w", CommandOutput::ok("wwan0\n"));
        runner.respond("--dms-get-operating-mode", mode_output("offline"));
        runner.respond("--dms-set-operating-mode", CommandOutput::ok("ERROR\n"));
        let mut h = harness_with(runner, |_| {});
        fs::write(h.dir("pending").join("20260313.csv"), "old").unwrap();

        h.scheduler.tick().await.unwrap();

        assert!(h.puts().is_empty());
        assert!(!h.scheduler.cadence().upload_pending);
        assert_eq!(h.listing("pending"), vec!["20260313.csv"]);
        assert_eq!(h.runner.count("ntpdate"), 0);

        // Sampling continues with the fallback position
        let lines = day_lines(&h, "sampling", "20260314.csv");
        assert_eq!(lines.len(), 4);
        let fallback = create_valid_config().gps.fallback;
        assert_eq!(lines[1], format!("Position : {}", fallback));
        assert_eq!(h.scheduler.modem().state(), ModemState::PoweredOff);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_interface_keeps_sampling() {
        let runner = ScriptedRunner::new();
        runner.respond("cdc-wdm0 -w", CommandOutput::failed("error: couldn't open the QmiDevice"));
        runner.respond("--dms-get-operating-mode", mode_output("offline"));
        runner.respond("--dms-set-operating-mode", CommandOutput::ok(mode_ack(DEVICE)));
        runner.respond("udhcpc", CommandOutput::ok("lease obtained\n"));
        let mut h = harness_with(runner, |_| {});
        fs::write(h.dir("pending").join("20260313.csv"), "old").unwrap();

        h.scheduler.tick().await.unwrap();

        assert_eq!(h.power.events(), vec!["up", "down"]);
        assert_eq!(h.scheduler.modem().state(), ModemState::PoweredOff);
        assert!(h.puts().is_empty());
        assert_eq!(h.listing("pending"), vec!["20260313.csv"]);
        assert_eq!(h.listing("sampling"), vec!["20260314.csv"]);

        h.step().await;
        h.step().await;
        let lines = day_lines(&h, "sampling", "20260314.csv");
        assert_eq!(lines.len(), 3 + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulses_polled_while_sampling_is_gated() {
        let gauge: ChannelId = "AD10".parse().unwrap();
        let mut h = harness();
        h.adc.set_voltage(gauge, 0.1);
        h.scheduler.tick().await.unwrap();
        assert_eq!(h.scheduler.cadence().samples_since_startup, 1);

        // Inside the sample period: three rising edges, no samples
        let tick = Duration::from_millis(100);
        let reads = h.adc.read_count();
        for volts in [4.5, 0.1, 4.5, 0.1, 4.5] {
            h.adc.set_voltage(gauge, volts);
            tokio::time::advance(tick).await;
            h.scheduler.tick().await.unwrap();
        }
        assert_eq!(h.adc.read_count(), reads + 5);
        assert_eq!(h.scheduler.cadence().samples_since_startup, 1);

        // Upload pending: still polled, a fourth edge
        h.scheduler.state.upload_pending = true;
        for volts in [0.1, 4.5] {
            h.adc.set_voltage(gauge, volts);
            tokio::time::advance(tick).await;
            h.scheduler.tick().await.unwrap();
        }
        assert_eq!(h.adc.read_count(), reads + 7);
        assert_eq!(h.scheduler.cadence().samples_since_startup, 1);

        // Gate open again: the finished window carries every edge
        h.scheduler.state.upload_pending = false;
        h.adc.set_voltage(gauge, 0.1);
        tokio::time::advance(Duration::from_millis(300)).await;
        h.scheduler.tick().await.unwrap();
        assert_eq!(h.scheduler.cadence().samples_since_startup, 2);

        let lines = day_lines(&h, "sampling", "20260314.csv");
        let last: Vec<&str> = lines.last().unwrap().split(',').collect();
        assert_eq!(last[2], format!("{:.4}", 4.0 * 2.4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_reads_wall_clock_once() {
        let mut h = harness();
        h.scheduler.tick().await.unwrap();

        // Every read lands a second later, so a second read in the same
        // tick would already be past midnight
        h.clock.set(Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 59).unwrap());
        h.clock.set_read_step(chrono::Duration::seconds(1));
        tokio::time::advance(SAMPLE_PERIOD).await;
        h.scheduler.tick().await.unwrap();

        let lines = day_lines(&h, "sampling", "20260314.csv");
        assert_eq!(lines.len(), 5);
        assert!(lines[4].ends_with("2026,03,14,23,59,59"));
        assert!(lines.iter().all(|l| !l.contains("2026,03,15")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_power_failure_propagates() {
        let mut h = harness();
        h.power.set_fail_up(true);

        let err = h.scheduler.tick().await.unwrap_err();
        assert!(matches!(err, LoggerError::FatalHardware(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_housekeeping() {
        let mut h = harness();
        fs::write(h.dir("sampling").join("20260312.csv"), "stale").unwrap();
        fs::write(h.dir("datalogger.out"), "crash").unwrap();

        h.scheduler.tick().await.unwrap();

        assert_eq!(h.listing("pending"), vec!["20260312.csv"]);
        assert!(!h.dir("datalogger.out").exists());
        assert_eq!(h.runner.count("ntpdate"), 1);
        assert_eq!(h.power.events(), vec!["up", "down"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_disabled_omits_position() {
        let mut h = harness_with(healthy_runner(), |c| c.gps.enabled = false);
        h.scheduler.tick().await.unwrap();

        let lines = day_lines(&h, "sampling", "20260314.csv");
        assert!(!lines[1].starts_with("Position"));
        assert!(h.scheduler.position().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_test_upload_runs_once() {
        let mut h = harness_with(healthy_runner(), |c| c.scheduler.test_upload_after_samples = 3);
        h.scheduler.tick().await.unwrap();
        h.step().await;
        assert!(h.puts().is_empty());

        h.step().await;
        let puts = h.puts();
        assert_eq!(puts.len(), 1);
        assert!(puts[0].contains("connectivity_test"));
        assert!(h.listing("test").is_empty());

        for _ in 0..5 {
            h.step().await;
        }
        assert_eq!(h.puts().len(), 1);
        assert!(h.scheduler.cadence().test_upload_done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_powers_off() {
        let mut h = harness();
        h.scheduler.tick().await.unwrap();
        h.scheduler.shutdown().await;
        assert_eq!(h.scheduler.modem().state(), ModemState::PoweredOff);
        assert_eq!(h.power.events().last(), Some(&"down"));
    }
}
