mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{write_aged, FakeMediaTools, RecordingTransport, Scripted};
use tokio_util::sync::CancellationToken;
use vidrelay_core::media::MediaToolkit;
use vidrelay_core::recovery::sidecar_path;
use vidrelay_core::service::UNDELIVERABLE_DIR;
use vidrelay_core::{DeliveryRouter, RecoveryEngine, RelayConfig, RelayService};

fn config(base: &Path) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.paths.watch_dir = base.join("download").to_string_lossy().to_string();
    config.paths.quarantine_dir = base.join("quarantine").to_string_lossy().to_string();
    config.scan.min_size_bytes = 1;
    config.scan.stable_age_seconds = 20;
    config.scan.partial_stable_age_seconds = 60;
    config
}

fn service(config: RelayConfig, bot: Arc<RecordingTransport>) -> (RelayService, Arc<FakeMediaTools>) {
    let tools = FakeMediaTools::new();
    let root = config.paths.resolve_watch_root().unwrap();
    let engine = Arc::new(RecoveryEngine::new(&config).with_executor(tools.clone()));
    let toolkit = MediaToolkit::new(config.recovery.clone(), Some(tools.clone()));
    let router = DeliveryRouter::new(config.delivery.clone(), toolkit).with_lightweight(bot);
    (RelayService::new(config, root, engine, router), tools)
}

#[tokio::test]
async fn one_pass_recovers_then_delivers_stable_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("download");
    write_aged(&root.join("alice/ready.mp4"), 4096, Duration::from_secs(60));
    write_aged(&root.join("alice/fresh.mp4"), 4096, Duration::from_secs(1));
    write_aged(&root.join("bob/cut.mp4.part"), 4096, Duration::from_secs(120));
    let bot = RecordingTransport::accepting("bot");
    let (service, _tools) = service(config(dir.path()), bot.clone());

    let report = service.run_once().await;

    assert_eq!(report.sweep.recovered.len(), 1);
    assert_eq!(report.ready, 1);
    assert_eq!(report.delivered(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(bot.captions(), vec!["#alice ready"]);
    assert!(!root.join("alice/ready.mp4").exists());
    assert!(root.join("alice/fresh.mp4").exists());
    // The recovered file waits for its own quiet period.
    assert!(root.join("bob/cut.mp4").exists());
    assert!(!root.join("bob/cut.mp4.part").exists());
}

#[tokio::test]
async fn repeated_failures_dead_letter_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("download");
    let path = root.join("carol/stuck.mp4");
    write_aged(&path, 4096, Duration::from_secs(60));
    let mut config = config(dir.path());
    config.delivery.max_failed_passes = 2;
    let bot = RecordingTransport::with_default("bot", Scripted::Reject);
    let (service, _tools) = service(config, bot.clone());

    let first = service.run_once().await;
    assert_eq!(first.failed(), 1);
    assert!(first.dead_lettered.is_empty());
    assert!(path.exists());

    let second = service.run_once().await;
    assert_eq!(second.dead_lettered.len(), 1);
    let record = &second.dead_lettered[0];
    assert!(record
        .quarantined_path
        .starts_with(dir.path().join("quarantine").join(UNDELIVERABLE_DIR)));
    assert!(record.quarantined_path.exists());
    assert!(sidecar_path(&record.quarantined_path).exists());
    assert!(!path.exists());
    assert_eq!(bot.count(), 2);

    let third = service.run_once().await;
    assert_eq!(third.ready, 0);
}

#[tokio::test]
async fn dead_lettered_split_artifact_leaves_no_parts_behind() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("download");
    let path = root.join("gina/big.mkv");
    write_aged(&path, 3000, Duration::from_secs(60));
    let mut config = config(dir.path());
    config.delivery.max_failed_passes = 1;
    config.delivery.high_capacity.enabled = true;
    config.delivery.high_capacity.standard_ceiling_bytes = 1000;
    config.delivery.segmentation.enabled = true;
    config.delivery.segmentation.target_bytes = 1000;
    config.delivery.segmentation.min_segment_seconds = 1.0;

    let tools = FakeMediaTools::new();
    tools.probe_returns(1280, 720, 90.0);
    let tdl = RecordingTransport::scripted("tdl", vec![Scripted::Accept], Scripted::Reject);
    let engine = Arc::new(RecoveryEngine::new(&config).with_executor(tools.clone()));
    let toolkit = MediaToolkit::new(config.recovery.clone(), Some(tools.clone()));
    let router = DeliveryRouter::new(config.delivery.clone(), toolkit).with_high_capacity(tdl.clone());
    let service = RelayService::new(config, root.clone(), engine, router);

    let report = service.run_once().await;

    assert_eq!(report.dead_lettered.len(), 1);
    assert_eq!(tdl.count(), 2);
    assert!(!path.exists());
    let leftovers: Vec<_> = std::fs::read_dir(root.join("gina"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "left in watch dir: {leftovers:?}");
}

#[tokio::test]
async fn unlimited_retries_keep_the_artifact_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("download");
    let path = root.join("dave/stuck.mp4");
    write_aged(&path, 4096, Duration::from_secs(60));
    let bot = RecordingTransport::with_default("bot", Scripted::Reject);
    let (service, _tools) = service(config(dir.path()), bot.clone());

    for _ in 0..3 {
        let report = service.run_once().await;
        assert!(report.dead_lettered.is_empty());
    }
    assert!(path.exists());
    assert_eq!(bot.count(), 3);
}

#[tokio::test]
async fn shutdown_runs_a_final_recovery_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("download");
    write_aged(&root.join("erin/late.mp4.part"), 4096, Duration::from_secs(120));
    let bot = RecordingTransport::accepting("bot");
    let (service, tools) = service(config(dir.path()), bot.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let sweep = service.run(cancel).await;

    assert_eq!(sweep.recovered.len(), 1);
    assert_eq!(tools.operations(), vec!["copy-remux"]);
    assert_eq!(bot.count(), 0);
    assert!(root.join("erin/late.mp4").exists());
}

#[tokio::test]
async fn quarantine_inside_the_watch_root_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("download");
    let mut config = config(dir.path());
    config.paths.quarantine_dir = root.join("quarantine").to_string_lossy().to_string();
    write_aged(&root.join("quarantine/held.mp4"), 4096, Duration::from_secs(600));
    let bot = RecordingTransport::accepting("bot");
    let (service, _tools) = service(config, bot.clone());

    let report = service.run_once().await;

    assert_eq!(report.ready, 0);
    assert_eq!(bot.count(), 0);
}
