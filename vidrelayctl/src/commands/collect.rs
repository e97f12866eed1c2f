use std::path::PathBuf;

use clap::Args;

/// Acquire remote streams into the download directory.
#[derive(Args, Debug, Clone, Default)]
pub struct CollectArgs {
    /// Locators to acquire
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,
    /// File with one locator per line
    #[arg(long)]
    pub urls_file: Option<PathBuf>,
    /// Collect locators from the configured listing page
    #[arg(long)]
    pub discover: bool,
    /// Maximum number of simultaneous acquisitions
    #[arg(short = 'm', long)]
    pub max_active: Option<usize>,
    /// Directory downloads are written to
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
    /// Plan the jobs without running them
    #[arg(long)]
    pub dry_run: bool,
}
