use std::path::PathBuf;

use clap::Args;

/// Run the recover, scan and deliver loop over the watch directory.
#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,
    /// Override the poll interval in seconds
    #[arg(long)]
    pub interval: Option<u64>,
}

/// Repair stalled partial downloads.
#[derive(Args, Debug, Clone, Default)]
pub struct RecoverArgs {
    /// Recover this partial instead of sweeping the watch directory
    #[arg(long)]
    pub path: Option<PathBuf>,
}

/// List artifacts that are ready for delivery.
#[derive(Args, Debug, Clone, Default)]
pub struct ScanArgs {
    /// Also list partials waiting for recovery
    #[arg(long)]
    pub partials: bool,
}

/// Deliver one file right away, skipping the stability check.
#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// File to deliver
    pub path: PathBuf,
    /// Keep the file after a successful delivery
    #[arg(long)]
    pub keep: bool,
}
