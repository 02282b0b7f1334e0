use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::Secret;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(long, env = "DOWNLOAD_FROM", help = "Remote source templates, whitespace separated")]
    pub download_from: String,
    #[clap(long, env = "DOWNLOAD_TO", help = "Local destination directories, whitespace separated")]
    pub download_to: String,
    #[clap(long, env = "DOWNLOAD_CRON", default_value = "*/10 * * * *", help = "Sync cadence")]
    pub download_cron: String,
    #[clap(long, env = "DELETE_CRON", default_value = "1 */1 * * *", help = "Retention cadence")]
    pub delete_cron: String,
    #[clap(
        long,
        env = "DELETE_OLDER_THAN",
        default_value_t = 48,
        help = "Delete files older than this many hours"
    )]
    pub delete_older_than: u64,
    #[clap(
        long,
        env = "PARTIAL_OLDER_THAN",
        default_value_t = 4,
        help = "Delete unfinished rsync files older than this many hours"
    )]
    pub partial_older_than: u64,
    #[clap(long, env = "RSYNC_PASSWORD", hide_env_values = true, help = "Password for the rsync daemon")]
    pub rsync_password: Secret,
    #[clap(long, env = "POD_NAME", help = "Pod identity, <deployment>-<replicaset hash>-<pod hash>")]
    pub pod_name: String,
    #[clap(long, env = "STAND_NAME", help = "Stand (environment) name")]
    pub stand_name: String,
    #[clap(long, env = "RSYNC_PATH", default_value = "rsync", help = "Transfer tool to run")]
    pub rsync_path: PathBuf,
    #[clap(
        long,
        env = "STATE_DIR",
        default_value = "/tmp",
        help = "Directory for local exclude files and temporary downloads"
    )]
    pub state_dir: PathBuf,
    #[clap(
        long,
        env = "EXCLUDE_MODULE",
        default_value = "exclude-files",
        help = "rsync module holding the exclude files"
    )]
    pub exclude_module: String,
    #[clap(long, env = "EXCLUDE_MAX_BYTES", default_value_t = 9_437_184)]
    pub exclude_max_bytes: u64,
    #[clap(long, env = "EXCLUDE_TAIL_LINES", default_value_t = 20_000)]
    pub exclude_tail_lines: usize,
    #[clap(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080", help = "Prometheus listener")]
    pub metrics_addr: SocketAddr,
    #[clap(long, env = "LOG_DIR", help = "Also write a daily rolling log file here")]
    pub log_dir: Option<PathBuf>,
}
