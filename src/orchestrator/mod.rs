//! Drives probes over targets × passes × {cold, warm}.

use tracing::{error, info};

use crate::config::RunConfiguration;
use crate::drain::DrainBarrier;
use crate::probe::{ThroughputProbe, WarmLedger};
use crate::report::csv::SampleLog;
use crate::sample::{RunMode, Sample};

pub struct RunOrchestrator<'a> {
    config: &'a RunConfiguration,
    barrier: &'a DrainBarrier,
    sample_log: Option<&'a SampleLog>,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(config: &'a RunConfiguration, barrier: &'a DrainBarrier) -> Self {
        Self {
            config,
            barrier,
            sample_log: None,
        }
    }

    /// Append every sample to `log` as soon as it is produced.
    pub fn with_sample_log(mut self, log: &'a SampleLog) -> Self {
        self.sample_log = Some(log);
        self
    }

    /// Run every pass. Samples come back in the order they were taken.
    ///
    /// Probe failures are recorded and iteration continues; nothing is
    /// retried.
    pub async fn run(&self) -> Vec<Sample> {
        let mut ledger = WarmLedger::open(self.config.ledger_path()).await;
        let mut samples = Vec::new();
        let total_pairs = self.config.passes as usize * self.config.targets.len();
        let mut pairs_done = 0usize;

        for pass in 1..=self.config.passes {
            for target in &self.config.targets {
                info!(pass, passes = self.config.passes, %target, "measuring target");

                for mode in [RunMode::Cold, RunMode::Warm] {
                    let sample = {
                        let mut probe = ThroughputProbe::new(self.config, self.barrier, &mut ledger);
                        probe.run(target, mode).await
                    };
                    self.record(&sample).await;
                    samples.push(sample);
                    self.barrier.gate(&self.config.drain, "between-probes").await;
                }

                pairs_done += 1;
                if pairs_done < total_pairs && !self.config.inter_pass_delay.is_zero() {
                    info!(
                        delay_secs = self.config.inter_pass_delay.as_secs(),
                        "pausing before next target"
                    );
                    tokio::time::sleep(self.config.inter_pass_delay).await;
                }
            }
        }

        let failed = samples.iter().filter(|s| !s.is_ok()).count();
        info!(samples = samples.len(), failed, "run complete");
        samples
    }

    async fn record(&self, sample: &Sample) {
        if let Some(log) = self.sample_log {
            if let Err(e) = log.append(sample).await {
                error!(error = %e, path = %log.path().display(), "failed to append sample");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::drain::table::{ConnectionTable, TcpEntry};
    use std::path::PathBuf;

    struct Quiet;

    #[async_trait::async_trait]
    impl ConnectionTable for Quiet {
        async fn connections(&self) -> anyhow::Result<Vec<TcpEntry>> {
            Ok(Vec::new())
        }
    }

    fn config(dir: &std::path::Path, targets: &[&str], passes: u32) -> RunConfiguration {
        let mut cfg = Config::default();
        cfg.run.targets = targets.iter().map(|t| t.to_string()).collect();
        cfg.run.passes = passes;
        cfg.run.payload_size_bytes = 16 * 1024;
        cfg.run.inter_pass_delay_secs = 0;
        cfg.run.work_dir = dir.join("work");
        cfg.run.share_mount_root = Some(dir.join("mnt"));
        cfg.run.source_host = Some("src01".to_string());
        cfg.drain.enabled = false;
        RunConfiguration::from_config(&cfg).unwrap()
    }

    fn make_share(dir: &std::path::Path, host: &str, pool_files: usize) -> PathBuf {
        let pool = dir.join("mnt").join(host).join("data/SpeedTest/Pool/src01");
        std::fs::create_dir_all(&pool).unwrap();
        for i in 0..pool_files {
            std::fs::write(pool.join(format!("f{i:02}.bin")), vec![1u8; 8 * 1024]).unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_single_pass_single_target_yields_cold_then_warm() {
        let dir = tempfile::TempDir::new().unwrap();
        make_share(dir.path(), "T1", 2);
        let rc = config(dir.path(), &[r"\\T1\data"], 1);
        let barrier = DrainBarrier::new(Box::new(Quiet));

        let samples = RunOrchestrator::new(&rc, &barrier).run().await;

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].mode, RunMode::Cold);
        assert_eq!(samples[1].mode, RunMode::Warm);
        assert!(samples.iter().all(|s| s.server == "T1"));
        assert!(samples.iter().all(|s| s.is_ok()));
        assert!(samples[0].timestamp <= samples[1].timestamp);
    }

    #[tokio::test]
    async fn test_failed_target_does_not_stop_the_run() {
        let dir = tempfile::TempDir::new().unwrap();
        make_share(dir.path(), "good", 4);
        let rc = config(dir.path(), &[r"\\missing\data", r"\\good\data"], 2);
        let barrier = DrainBarrier::new(Box::new(Quiet));

        let samples = RunOrchestrator::new(&rc, &barrier).run().await;

        assert_eq!(samples.len(), 8);
        let servers: Vec<&str> = samples.iter().map(|s| s.server.as_str()).collect();
        assert_eq!(
            servers,
            ["missing", "missing", "good", "good", "missing", "missing", "good", "good"]
        );
        for s in samples.iter().filter(|s| s.server == "missing") {
            assert!(!s.is_ok());
            assert_eq!(s.write_mbps, 0.0);
            assert_eq!(s.read_mbps, 0.0);
        }
        assert!(samples.iter().filter(|s| s.server == "good").all(|s| s.is_ok()));
    }

    #[tokio::test]
    async fn test_samples_stream_to_log() {
        let dir = tempfile::TempDir::new().unwrap();
        make_share(dir.path(), "T1", 2);
        let rc = config(dir.path(), &[r"\\T1\data"], 1);
        let barrier = DrainBarrier::new(Box::new(Quiet));
        let log = SampleLog::open(dir.path().join("reports/SpeedTest.csv"))
            .await
            .unwrap();

        let samples = RunOrchestrator::new(&rc, &barrier)
            .with_sample_log(&log)
            .run()
            .await;

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 1 + samples.len());
        assert!(content.lines().nth(1).unwrap().starts_with("T1,"));
    }
}
