use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "motion-capture",
    version,
    about = "Captures stills while the motion sensor is active and uploads them"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/motion-capture.toml")]
    pub(crate) config: PathBuf,
    #[arg(long)]
    pub(crate) store_root: Option<PathBuf>,
    #[arg(long)]
    pub(crate) queue_dir: Option<PathBuf>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
