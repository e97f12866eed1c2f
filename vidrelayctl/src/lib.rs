pub mod commands;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vidrelay_core::acquisition::AcquisitionJob;
use vidrelay_core::fsutil::human_size;
use vidrelay_core::recovery::sidecar_path;
use vidrelay_core::{
    load_relay_config, AcquisitionScheduler, Artifact, ArtifactState, BrowserLocatorSource,
    DeliveryReport, DeliveryRouter, FileLocatorSource, LocatorSource, PassReport,
    ReadinessScanner, RecoveryEngine, RecoveryError, RelayConfig, RelayService, SchedulerReport,
    SweepReport,
};

pub use commands::{CollectArgs, RecoverArgs, ScanArgs, SendArgs, WatchArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vidrelay_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Service(#[from] vidrelay_core::ServiceError),
    #[error(transparent)]
    Transport(#[from] vidrelay_core::TransportError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error(transparent)]
    Delivery(#[from] vidrelay_core::DeliveryError),
    #[error(transparent)]
    Discovery(#[from] vidrelay_core::DiscoveryError),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("delivery failed for {0}")]
    DeliveryFailed(PathBuf),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "vidrelay: recuperação e entrega de gravações", long_about = None)]
pub struct Cli {
    /// Caminho do vidrelay.toml
    #[arg(long, default_value = "configs/vidrelay.toml")]
    pub config: PathBuf,
    /// Diretório observado (substitui paths.watch_dir)
    #[arg(long)]
    pub watch_dir: Option<PathBuf>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Observa o diretório e entrega arquivos prontos
    Watch(WatchArgs),
    /// Recupera downloads parciais
    Recover(RecoverArgs),
    /// Lista arquivos prontos para entrega
    Scan(ScanArgs),
    /// Entrega um arquivo imediatamente
    Send(SendArgs),
    /// Baixa streams remotos com concorrência limitada
    Collect(CollectArgs),
    /// Gera scripts de autocompletar
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "vidrelayctl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    let _guard = logging::init_logging(
        Path::new(&context.config.paths.log_dir),
        &context.config.logging,
    )?;
    if !context.from_file {
        warn!(path = %context.config_path.display(), "config file not found; using defaults");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(context.execute(&cli.command, cli.format))
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            trigger.cancel();
        }
    });
    token
}

#[derive(Debug)]
struct AppContext {
    config: RelayConfig,
    config_path: PathBuf,
    from_file: bool,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        Self::load(cli, |key| std::env::var(key).ok())
    }

    fn load<F>(cli: &Cli, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_file = cli.config.exists();
        let mut config = if from_file {
            load_relay_config(&cli.config)?
        } else {
            RelayConfig::default()
        };
        config.apply_env_with(lookup)?;
        if let Some(dir) = &cli.watch_dir {
            config.paths.watch_dir = dir.to_string_lossy().to_string();
        }
        Ok(Self {
            config,
            config_path: cli.config.clone(),
            from_file,
        })
    }

    async fn execute(&self, command: &Commands, format: OutputFormat) -> Result<()> {
        match command {
            Commands::Watch(args) => self.watch(args, format).await,
            Commands::Recover(args) => render(&self.recover(args).await?, format),
            Commands::Scan(args) => render(&self.scan(args)?, format),
            Commands::Send(args) => {
                let report = self.send(args).await?;
                render(&report, format)?;
                if !report.delivered() {
                    return Err(AppError::DeliveryFailed(report.path));
                }
                Ok(())
            }
            Commands::Collect(args) => {
                if args.dry_run {
                    render(&self.plan(args).await?, format)
                } else {
                    render(&self.collect(args).await?, format)
                }
            }
            Commands::Completions { .. } => Ok(()),
        }
    }

    /// Delivery commands cannot run without a usable transport.
    fn delivery_config(&self) -> Result<RelayConfig> {
        let config = self.config.clone();
        if let Err(err) = config.validate() {
            error!(error = %err, "delivery configuration rejected");
            return Err(err.into());
        }
        Ok(config)
    }

    async fn watch(&self, args: &WatchArgs, format: OutputFormat) -> Result<()> {
        let mut config = self.delivery_config()?;
        if let Some(interval) = args.interval {
            config.scan.poll_interval_seconds = interval.max(1);
        }
        let service = RelayService::from_config(config, None)?;
        if args.once {
            render(&service.run_once().await, format)
        } else {
            let sweep = service.run(cancel_on_ctrl_c()).await;
            render(&sweep, format)
        }
    }

    async fn recover(&self, args: &RecoverArgs) -> Result<SweepReport> {
        let engine = RecoveryEngine::new(&self.config);
        let Some(path) = &args.path else {
            let root = self.watch_root()?;
            return Ok(engine.sweep(&root).await);
        };
        let mut report = SweepReport::default();
        match engine.recover(path).await {
            Ok(recovered) => report.recovered.push(recovered),
            Err(RecoveryError::Quarantined { destination, .. }) => {
                let raw = std::fs::read(sidecar_path(&destination))?;
                report.quarantined.push(serde_json::from_slice(&raw)?);
            }
            Err(err) => return Err(err.into()),
        }
        Ok(report)
    }

    fn scan(&self, args: &ScanArgs) -> Result<ScanListing> {
        let root = self.watch_root()?;
        let ready = ReadinessScanner::new(&self.config).scan(&root);
        let partials = if args.partials {
            RecoveryEngine::new(&self.config).find_partials(&root).0
        } else {
            Vec::new()
        };
        Ok(ScanListing {
            root,
            ready,
            partials,
        })
    }

    async fn send(&self, args: &SendArgs) -> Result<DeliveryReport> {
        let mut config = self.delivery_config()?;
        if args.keep {
            config.delivery.delete_after_delivery = false;
        }
        let router = DeliveryRouter::from_config(&config, None)?;
        let mut artifact = Artifact::from_path(&args.path, ArtifactState::Ready)?;
        Ok(router.send(&mut artifact).await?)
    }

    async fn gather_locators(&self, args: &CollectArgs) -> Result<Vec<String>> {
        let mut locators = args.urls.clone();
        if let Some(file) = &args.urls_file {
            locators.extend(FileLocatorSource::new(file).locators().await?);
        }
        if args.discover {
            let source = BrowserLocatorSource::new(self.config.discovery.clone());
            locators.extend(source.locators().await?);
        }
        if locators.is_empty() {
            return Err(AppError::MissingResource(
                "nenhuma URL informada (use URL, --urls-file ou --discover)".to_string(),
            ));
        }
        Ok(locators)
    }

    fn download_dir(&self, args: &CollectArgs) -> Result<PathBuf> {
        if let Some(dir) = &args.download_dir {
            return Ok(dir.clone());
        }
        match &self.config.acquisition.download_dir {
            Some(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
            _ => self.watch_root(),
        }
    }

    async fn plan(&self, args: &CollectArgs) -> Result<JobPlan> {
        let locators = self.gather_locators(args).await?;
        let scheduler = AcquisitionScheduler::from_config(&self.config, self.download_dir(args)?);
        let (jobs, duplicates_skipped) = scheduler.plan_jobs(&locators);
        Ok(JobPlan {
            jobs,
            duplicates_skipped,
        })
    }

    /// Runs the scheduler, then sweeps whatever partials the run left behind.
    async fn collect(&self, args: &CollectArgs) -> Result<CollectReport> {
        let locators = self.gather_locators(args).await?;
        let max_active = args
            .max_active
            .unwrap_or(self.config.acquisition.max_active);
        let download_dir = self.download_dir(args)?;
        let engine = Arc::new(RecoveryEngine::new(&self.config));
        let scheduler = AcquisitionScheduler::from_config(&self.config, &download_dir)
            .with_recovery(Arc::clone(&engine));
        let run = scheduler
            .run_until(locators, max_active, cancel_on_ctrl_c())
            .await;
        let sweep = if download_dir.is_dir() {
            engine.sweep(&download_dir).await
        } else {
            SweepReport::default()
        };
        Ok(CollectReport { run, sweep })
    }

    fn watch_root(&self) -> Result<PathBuf> {
        Ok(self.config.paths.resolve_watch_root()?)
    }
}

#[derive(Debug, Serialize)]
pub struct ScanListing {
    pub root: PathBuf,
    pub ready: Vec<Artifact>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partials: Vec<Artifact>,
}

#[derive(Debug, Serialize)]
pub struct CollectReport {
    pub run: SchedulerReport,
    pub sweep: SweepReport,
}

#[derive(Debug, Serialize)]
pub struct JobPlan {
    pub jobs: Vec<AcquisitionJob>,
    pub duplicates_skipped: usize,
}

impl DisplayFallback for ScanListing {
    fn display(&self) -> String {
        let mut lines = vec![format!("Diretório: {}", self.root.display())];
        if self.ready.is_empty() {
            lines.push("Nenhum arquivo pronto".to_string());
        }
        for artifact in &self.ready {
            lines.push(format!(
                "  - {} ({})",
                artifact.path.display(),
                human_size(artifact.size)
            ));
        }
        if !self.partials.is_empty() {
            lines.push("Parciais:".to_string());
            for artifact in &self.partials {
                lines.push(format!(
                    "  - {} ({})",
                    artifact.path.display(),
                    human_size(artifact.size)
                ));
            }
        }
        lines.join("\n")
    }
}

impl DisplayFallback for SweepReport {
    fn display(&self) -> String {
        if self.is_empty() {
            return "Nenhum parcial pendente".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.recovered {
            lines.push(format!(
                "[ok] {} -> {} ({})",
                entry.source.display(),
                entry.artifact.path.display(),
                entry.tier
            ));
        }
        for record in &self.quarantined {
            lines.push(format!(
                "[quarentena] {} -> {}",
                record.original_path.display(),
                record.quarantined_path.display()
            ));
        }
        for failure in &self.failed {
            lines.push(format!("[erro] {failure}"));
        }
        if self.skipped > 0 {
            lines.push(format!("{} parcial(is) ainda em escrita", self.skipped));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for DeliveryReport {
    fn display(&self) -> String {
        let mut lines = vec![match self.delivered_via {
            Some(tier) => format!(
                "{} ({}) entregue via {tier}",
                self.path.display(),
                human_size(self.size)
            ),
            None => format!(
                "{} ({}) não entregue",
                self.path.display(),
                human_size(self.size)
            ),
        }];
        for attempt in &self.attempts {
            lines.push(format!(
                "  - {}: {:?} {}",
                attempt.tier, attempt.outcome, attempt.detail
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for PassReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Passada {}: prontos={} entregues={} falhas={} recuperados={} quarentena={}",
            self.pass_id,
            self.ready,
            self.delivered(),
            self.failed(),
            self.sweep.recovered.len(),
            self.sweep.quarantined.len()
        )];
        for delivery in &self.deliveries {
            lines.push(delivery.display());
        }
        for record in &self.dead_lettered {
            lines.push(format!(
                "[não entregável] {}",
                record.quarantined_path.display()
            ));
        }
        if self.interrupted {
            lines.push("Interrompida antes do fim".to_string());
        }
        lines.join("\n")
    }
}

impl DisplayFallback for SchedulerReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "queued={} running={} done={} error={} total={} (pico {})",
            self.counts.queued,
            self.counts.running,
            self.counts.done,
            self.counts.error,
            self.counts.total,
            self.peak_active
        )];
        for job in &self.jobs {
            let detail = job
                .error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default();
            lines.push(format!(
                "#{} {:?} {}{}",
                job.id,
                job.status,
                job.locator,
                detail
            ));
        }
        if self.cancelled {
            lines.push("Execução cancelada".to_string());
        }
        lines.join("\n")
    }
}

impl DisplayFallback for CollectReport {
    fn display(&self) -> String {
        let mut text = self.run.display();
        if !self.sweep.is_empty() {
            text.push('\n');
            text.push_str(&self.sweep.display());
        }
        text
    }
}

impl DisplayFallback for JobPlan {
    fn display(&self) -> String {
        if self.jobs.is_empty() {
            return "Nenhum job planejado".to_string();
        }
        let mut lines: Vec<String> = self
            .jobs
            .iter()
            .map(|job| format!("#{} {} -> {}", job.id, job.locator, job.target.display()))
            .collect();
        if self.duplicates_skipped > 0 {
            lines.push(format!("{} duplicada(s) ignorada(s)", self.duplicates_skipped));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn cli_for(config: PathBuf, watch_dir: Option<PathBuf>, command: Commands) -> Cli {
        Cli {
            config,
            watch_dir,
            format: OutputFormat::Json,
            command,
        }
    }

    fn prepare_test_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let watch = temp.path().join("download");
        std::fs::create_dir_all(&watch).unwrap();
        let cli = cli_for(
            PathBuf::from("../configs/vidrelay.toml"),
            Some(watch),
            Commands::Scan(ScanArgs::default()),
        );
        let mut context = AppContext::load(&cli, |_| None).unwrap();
        context.config.paths.quarantine_dir = temp
            .path()
            .join("quarantine")
            .to_string_lossy()
            .to_string();
        context.config.scan.min_size_bytes = 1;
        (temp, context)
    }

    fn write_aged(path: &Path, age: Duration) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"payload").unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn collect_arguments_parse() {
        let cli = Cli::try_parse_from([
            "vidrelayctl",
            "--format",
            "json",
            "collect",
            "-m",
            "4",
            "--urls-file",
            "urls.txt",
            "https://site.example/alice/",
        ])
        .unwrap();
        let Commands::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        assert_eq!(args.max_active, Some(4));
        assert_eq!(args.urls, vec!["https://site.example/alice/"]);
        assert_eq!(args.urls_file, Some(PathBuf::from("urls.txt")));
    }

    #[test]
    fn context_loads_fixture_and_overlays() {
        let cli = cli_for(
            PathBuf::from("../configs/vidrelay.toml"),
            Some(PathBuf::from("/srv/incoming")),
            Commands::Scan(ScanArgs::default()),
        );
        let context = AppContext::load(&cli, |key| {
            (key == "STABLE_AGE").then(|| "45".to_string())
        })
        .unwrap();
        assert!(context.from_file);
        assert_eq!(context.config.scan.stable_age_seconds, 45);
        assert_eq!(context.config.paths.watch_dir, "/srv/incoming");
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let cli = cli_for(
            temp.path().join("absent.toml"),
            None,
            Commands::Scan(ScanArgs::default()),
        );
        let context = AppContext::load(&cli, |_| None).unwrap();
        assert!(!context.from_file);
        assert_eq!(context.config.acquisition.max_active, 8);
    }

    #[test]
    fn delivery_commands_require_credentials() {
        let (_temp, context) = prepare_test_context();
        assert!(matches!(
            context.delivery_config(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn scan_lists_ready_and_partial_files() {
        let (temp, context) = prepare_test_context();
        let watch = temp.path().join("download");
        write_aged(&watch.join("alice/done.mp4"), Duration::from_secs(120));
        write_aged(&watch.join("alice/cut.mp4.part"), Duration::from_secs(120));

        let listing = context
            .scan(&ScanArgs { partials: true })
            .unwrap();

        assert_eq!(listing.ready.len(), 1);
        assert_eq!(listing.ready[0].file_name(), "done.mp4");
        assert_eq!(listing.partials.len(), 1);
        assert!(listing.display().contains("Parciais:"));
    }

    #[tokio::test]
    async fn locators_merge_arguments_and_file() {
        let (temp, context) = prepare_test_context();
        let list = temp.path().join("urls.txt");
        std::fs::write(&list, "# salas\nhttps://site.example/bob/\n").unwrap();
        let args = CollectArgs {
            urls: vec!["https://site.example/alice/".into()],
            urls_file: Some(list),
            ..CollectArgs::default()
        };

        let locators = context.gather_locators(&args).await.unwrap();

        assert_eq!(
            locators,
            vec!["https://site.example/alice/", "https://site.example/bob/"]
        );
    }

    #[tokio::test]
    async fn collect_without_locators_is_an_error() {
        let (_temp, context) = prepare_test_context();
        let err = context
            .gather_locators(&CollectArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingResource(_)));
    }

    #[tokio::test]
    async fn dry_run_plans_jobs_without_running() {
        let (temp, context) = prepare_test_context();
        let args = CollectArgs {
            urls: vec![
                "https://site.example/alice/".into(),
                "https://site.example/alice/".into(),
            ],
            download_dir: Some(temp.path().join("incoming")),
            dry_run: true,
            ..CollectArgs::default()
        };

        let plan = context.plan(&args).await.unwrap();

        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.duplicates_skipped, 1);
        assert!(plan.jobs[0]
            .target
            .starts_with(temp.path().join("incoming").join("alice")));
        assert!(!temp.path().join("incoming").exists());
    }

    #[test]
    fn empty_sweep_has_friendly_text() {
        assert_eq!(SweepReport::default().display(), "Nenhum parcial pendente");
    }
}
