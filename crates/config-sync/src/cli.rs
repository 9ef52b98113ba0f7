use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "config-sync",
    version,
    about = "Mirrors the remote camera settings into the local settings file"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/config-sync.toml")]
    pub(crate) config: PathBuf,
    #[arg(long)]
    pub(crate) settings_path: Option<PathBuf>,
    #[arg(long)]
    pub(crate) store_root: Option<PathBuf>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
