use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "camera-server",
    version,
    about = "Streams the feeder camera over TCP and takes snapshots on request"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/camera-server.toml")]
    pub(crate) config: PathBuf,
    #[arg(long)]
    pub(crate) listen_addr: Option<String>,
    #[arg(long)]
    pub(crate) store_root: Option<PathBuf>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
