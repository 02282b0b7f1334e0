use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::exclude::ExcludeLimits;
use crate::naming::{exclude_file_name, remote_exclude_path};
use crate::retention::RetentionTarget;
use crate::template::expand_date_variants;
use crate::util::{collapse_dots, dir_with_separator};

/// A value that must never show up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl FromStr for Secret {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Secret(s.to_string()))
    }
}

/// One (source, destination) pair after date-variant expansion.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SyncPair {
    /// Remote source, possibly with date tokens and wildcards.
    pub source_template: String,
    /// Absolute destination with a trailing `/`.
    pub dest_dir: String,
    pub exclude_file_name: String,
    /// Where the exclude file lives on the rsync server.
    pub remote_exclude_path: String,
}

impl SyncPair {
    /// Local copy of this pair's exclude file under `state_dir`.
    pub fn local_exclude_path(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(&self.exclude_file_name)
    }
}

/// Validated configuration the service runs with.
#[derive(Debug, Clone)]
pub struct Config {
    pub pairs: Vec<SyncPair>,
    pub retention: Vec<RetentionTarget>,
    pub download_cron: String,
    pub delete_cron: String,
    pub stand_name: String,
    pub pod_name: String,
    pub rsync_path: PathBuf,
    pub rsync_password: Secret,
    pub state_dir: PathBuf,
    pub limits: ExcludeLimits,
    pub metrics_addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Config, ConfigError> {
        let sources: Vec<String> = cli.download_from.split_whitespace().map(str::to_string).collect();
        let destinations = cli
            .download_to
            .split_whitespace()
            .map(absolute_dir)
            .collect::<Result<Vec<_>, _>>()?;

        if sources.is_empty() {
            return Err(ConfigError::NoPairs);
        }
        if sources.len() != destinations.len() {
            return Err(ConfigError::PairCountMismatch {
                sources: sources.len(),
                destinations: destinations.len(),
            });
        }

        let pairs = build_pairs(
            sources.into_iter().zip(destinations).collect(),
            &cli.pod_name,
            &cli.stand_name,
            &cli.exclude_module,
        )?;
        let retention = retention_targets(&pairs, cli.delete_older_than, cli.partial_older_than);

        Ok(Config {
            pairs,
            retention,
            download_cron: cli.download_cron,
            delete_cron: cli.delete_cron,
            stand_name: cli.stand_name,
            pod_name: cli.pod_name,
            rsync_path: cli.rsync_path,
            rsync_password: cli.rsync_password,
            state_dir: cli.state_dir,
            limits: ExcludeLimits { max_bytes: cli.exclude_max_bytes, tail_lines: cli.exclude_tail_lines },
            metrics_addr: cli.metrics_addr,
            log_dir: cli.log_dir,
        })
    }

    /// Locate the transfer tool on `PATH` (or accept an explicit path).
    pub fn resolve_transfer_tool(&self) -> Result<PathBuf, ConfigError> {
        which::which(&self.rsync_path)
            .map_err(|_| ConfigError::TransferToolMissing(self.rsync_path.display().to_string()))
    }

    pub fn pairs_json(&self) -> String {
        match serde_json::to_string_pretty(&self.pairs) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to serialise pairs: {}", e);
                "[]".to_string()
            }
        }
    }
}

fn absolute_dir(raw: &str) -> Result<String, ConfigError> {
    let abs = std::path::absolute(Path::new(raw))
        .map_err(|source| ConfigError::InvalidDestination { path: raw.to_string(), source })?;
    Ok(dir_with_separator(&collapse_dots(&abs).to_string_lossy()))
}

/// Expand date variants, derive exclude names and reject two pairs sharing
/// one exclude file.
pub fn build_pairs(
    configured: Vec<(String, String)>,
    pod_name: &str,
    stand_name: &str,
    exclude_module: &str,
) -> Result<Vec<SyncPair>, ConfigError> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut pairs = Vec::new();
    for (index, (source_template, dest_dir)) in expand_date_variants(configured).into_iter().enumerate() {
        let name = exclude_file_name(pod_name, stand_name, &source_template, &dest_dir)?;
        if let Some(first) = seen.insert(name.clone(), index) {
            return Err(ConfigError::DuplicateExcludeName { name, first, second: index });
        }
        let remote = remote_exclude_path(&source_template, exclude_module, &name)?;
        pairs.push(SyncPair {
            source_template,
            dest_dir,
            exclude_file_name: name,
            remote_exclude_path: remote,
        });
    }
    Ok(pairs)
}

/// One retention target per distinct destination, first-seen order.
pub fn retention_targets(pairs: &[SyncPair], complete_hours: u64, partial_hours: u64) -> Vec<RetentionTarget> {
    let mut targets: Vec<RetentionTarget> = Vec::new();
    for pair in pairs {
        let dir = PathBuf::from(&pair.dest_dir);
        if targets.iter().any(|t| t.dir == dir) {
            continue;
        }
        targets.push(RetentionTarget::new(dir, complete_hours, partial_hours));
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NamingError;
    use clap::Parser;

    const POD: &str = "myapp-5448486d5c-qjpvq";

    fn cli(from: &str, to: &str) -> Cli {
        Cli::try_parse_from([
            "pullsync",
            "--download-from",
            from,
            "--download-to",
            to,
            "--rsync-password",
            "hunter2",
            "--pod-name",
            POD,
            "--stand-name",
            "dev25",
        ])
        .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let config = Config::from_cli(cli("rsync://u@h/share/a/*.csv", "/out")).unwrap();
        assert_eq!(config.download_cron, "*/10 * * * *");
        assert_eq!(config.delete_cron, "1 */1 * * *");
        assert_eq!(config.limits, ExcludeLimits::default());
        assert_eq!(config.state_dir, PathBuf::from("/tmp"));
        assert_eq!(config.metrics_addr.port(), 8080);
        assert_eq!(config.pairs[0].dest_dir, "/out/");
        assert_eq!(config.pairs[0].remote_exclude_path, format!("rsync://u@h/exclude-files/{}", config.pairs[0].exclude_file_name));
        assert_eq!(config.retention[0].max_age_complete.as_secs(), 48 * 3600);
        assert_eq!(config.retention[0].max_age_partial.as_secs(), 4 * 3600);
    }

    #[test]
    fn parent_components_in_destinations_are_collapsed() {
        let config = Config::from_cli(cli("rsync://u@h/s/a/* rsync://u@h/s/b/*", "/data/../out /out/./")).unwrap();
        assert_eq!(config.pairs[0].dest_dir, "/out/");
        assert_eq!(config.pairs[1].dest_dir, "/out/");
        assert_eq!(config.retention.len(), 1);
    }

    #[test]
    fn dotted_hosts_and_ports_are_accepted() {
        for host in ["rsync.example.com", "10.0.0.5", "host:873"] {
            let pairs = build_pairs(
                vec![(format!("rsync://user@{host}/share/shops/F*"), "/out/".into())],
                POD,
                "dev",
                "exclude-files",
            )
            .unwrap();
            assert_eq!(
                pairs[0].remote_exclude_path,
                format!("rsync://user@{host}/exclude-files/myapp_shops_F-dev_out_-excludeFile")
            );
        }
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let config = Config::from_cli(cli("rsync://u@h/share/a/*.csv", "/out")).unwrap();
        assert_eq!(config.rsync_password.expose(), "hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn mismatched_lists_are_rejected() {
        let err = Config::from_cli(cli("rsync://u@h/s/a/* rsync://u@h/s/b/*", "/out")).unwrap_err();
        assert!(matches!(err, ConfigError::PairCountMismatch { sources: 2, destinations: 1 }));
    }

    #[test]
    fn empty_sources_are_rejected() {
        assert!(matches!(Config::from_cli(cli("  ", "  ")), Err(ConfigError::NoPairs)));
    }

    #[test]
    fn today_pairs_are_doubled_and_share_retention() {
        let config = Config::from_cli(cli("rsync://u@h/share/shops/F_TODAY_*", "/in")).unwrap();
        assert_eq!(config.pairs.len(), 2);
        assert_eq!(config.pairs[1].source_template, "rsync://u@h/share/shops/F_TO-DAY_*");
        assert_eq!(config.pairs[0].dest_dir, config.pairs[1].dest_dir);
        assert_ne!(config.pairs[0].exclude_file_name, config.pairs[1].exclude_file_name);
        assert_eq!(config.retention.len(), 1);
    }

    #[test]
    fn shared_exclude_name_is_fatal() {
        let err = build_pairs(
            vec![
                ("rsync://u@h/share/a/*.csv".into(), "/out/".into()),
                ("rsync://u@other/share/a/*.csv".into(), "/out/".into()),
            ],
            POD,
            "dev",
            "exclude-files",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateExcludeName { first: 0, second: 1, .. }));
    }

    #[test]
    fn bad_pod_name_is_fatal() {
        let err = build_pairs(vec![("rsync://u@h/s/a/*".into(), "/o/".into())], "nohash", "dev", "x")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Naming(NamingError::PodName(_))));
    }

    #[test]
    fn non_digit_age_is_rejected_by_the_parser() {
        let parsed = Cli::try_parse_from([
            "pullsync",
            "--download-from",
            "a",
            "--download-to",
            "b",
            "--rsync-password",
            "p",
            "--pod-name",
            POD,
            "--stand-name",
            "s",
            "--delete-older-than",
            "2d",
        ]);
        assert!(parsed.is_err());
    }
}
