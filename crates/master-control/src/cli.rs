use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "master-control",
    version,
    about = "Supervises the feeder's camera and sync services"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/master-control.toml")]
    pub(crate) config: PathBuf,
    #[arg(long)]
    pub(crate) store_root: Option<PathBuf>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
