//! Gauges reported per sync pair.
//!
//! Jobs talk to a [`MetricsSink`]; the binary installs a Prometheus exporter
//! behind the `metrics` facade and hands out a [`PrometheusSink`].

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::fsops::DirStats;
use crate::transfer::{TransferAttempt, TransferDirection};

/// Every per-pair gauge the service exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gauge {
    /// Unix time of the oldest file in the destination.
    OldestFile,
    /// Unix time of the newest entry in the destination.
    NewestFile,
    FileCount,
    DownloadStartTime,
    DownloadStopTime,
    DownloadExitCode,
    UploadExcludeStartTime,
    UploadExcludeStopTime,
    UploadExcludeExitCode,
}

impl Gauge {
    pub const ALL: [Gauge; 9] = [
        Gauge::OldestFile,
        Gauge::NewestFile,
        Gauge::FileCount,
        Gauge::DownloadStartTime,
        Gauge::DownloadStopTime,
        Gauge::DownloadExitCode,
        Gauge::UploadExcludeStartTime,
        Gauge::UploadExcludeStopTime,
        Gauge::UploadExcludeExitCode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Gauge::OldestFile => "pullsync_folder_max_modified_file_lifetime",
            Gauge::NewestFile => "pullsync_folder_min_modified_file_lifetime",
            Gauge::FileCount => "pullsync_folder_file_count",
            Gauge::DownloadStartTime => "pullsync_rsync_download_start_time",
            Gauge::DownloadStopTime => "pullsync_rsync_download_stop_time",
            Gauge::DownloadExitCode => "pullsync_rsync_download_exit_code",
            Gauge::UploadExcludeStartTime => "pullsync_rsync_upload_exclude_file_start_time",
            Gauge::UploadExcludeStopTime => "pullsync_rsync_upload_exclude_file_stop_time",
            Gauge::UploadExcludeExitCode => "pullsync_rsync_upload_exclude_file_exit_code",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Gauge::OldestFile => "Unix time of the oldest file in the destination folder.",
            Gauge::NewestFile => "Unix time of the newest file in the destination folder.",
            Gauge::FileCount => "How many files are in the destination folder.",
            Gauge::DownloadStartTime => "Rsync start time (pulling payload).",
            Gauge::DownloadStopTime => "Rsync stop time (pulling payload).",
            Gauge::DownloadExitCode => "Rsync exit code (pulling payload).",
            Gauge::UploadExcludeStartTime => "Rsync start time (uploading exclude file).",
            Gauge::UploadExcludeStopTime => "Rsync stop time (uploading exclude file).",
            Gauge::UploadExcludeExitCode => "Rsync exit code (uploading exclude file).",
        }
    }
}

pub const INFO_GAUGE: &str = "pullsync_info";

/// Label set attached to every per-pair gauge.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PairLabels {
    /// Destination directory of the pair.
    pub path: String,
    pub stand_name: String,
    pub pod_name: String,
}

/// Flat set-gauge interface used by the jobs.
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, gauge: Gauge, labels: &PairLabels, value: f64);
}

/// Record the bounds and exit code of a transfer. Exclude pulls have no gauges.
pub fn report_attempt(sink: &dyn MetricsSink, labels: &PairLabels, attempt: &TransferAttempt) {
    let (start, stop, exit) = match attempt.direction {
        TransferDirection::PullPayload => {
            (Gauge::DownloadStartTime, Gauge::DownloadStopTime, Gauge::DownloadExitCode)
        }
        TransferDirection::PushExclude => (
            Gauge::UploadExcludeStartTime,
            Gauge::UploadExcludeStopTime,
            Gauge::UploadExcludeExitCode,
        ),
        TransferDirection::PullExclude => return,
    };
    sink.set_gauge(start, labels, attempt.start_time as f64);
    sink.set_gauge(stop, labels, attempt.stop_time as f64);
    sink.set_gauge(exit, labels, attempt.exit_code.0 as f64);
}

pub fn report_dir_stats(sink: &dyn MetricsSink, labels: &PairLabels, stats: &DirStats) {
    sink.set_gauge(Gauge::OldestFile, labels, stats.oldest as f64);
    sink.set_gauge(Gauge::NewestFile, labels, stats.newest as f64);
    sink.set_gauge(Gauge::FileCount, labels, stats.count as f64);
}

/// Sink backed by the global `metrics` recorder.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn set_gauge(&self, gauge: Gauge, labels: &PairLabels, value: f64) {
        ::metrics::gauge!(
            gauge.name(),
            "path" => labels.path.clone(),
            "stand_name" => labels.stand_name.clone(),
            "pod_name" => labels.pod_name.clone()
        )
        .set(value);
    }
}

/// Install the Prometheus recorder with its own HTTP listener serving
/// `/metrics`, and register help texts.
pub fn install_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to start metrics exporter on {}: {}", addr, e))?;
    for gauge in Gauge::ALL {
        ::metrics::describe_gauge!(gauge.name(), gauge.help());
    }
    ::metrics::describe_gauge!(INFO_GAUGE, "Information about the pullsync version.");
    tracing::info!("metrics are served on http://{}/metrics", addr);
    Ok(())
}

pub fn set_info(version: &str, stand_name: &str, pod_name: &str) {
    ::metrics::gauge!(
        INFO_GAUGE,
        "version" => version.to_string(),
        "stand_name" => stand_name.to_string(),
        "pod_name" => pod_name.to_string()
    )
    .set(1.0);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Keeps the last value of every gauge per label set.
    #[derive(Default)]
    pub struct RecordingSink {
        pub values: Mutex<HashMap<(Gauge, PairLabels), f64>>,
    }

    impl RecordingSink {
        pub fn get(&self, gauge: Gauge, labels: &PairLabels) -> Option<f64> {
            self.values.lock().unwrap().get(&(gauge, labels.clone())).copied()
        }
    }

    impl MetricsSink for RecordingSink {
        fn set_gauge(&self, gauge: Gauge, labels: &PairLabels, value: f64) {
            self.values.lock().unwrap().insert((gauge, labels.clone()), value);
        }
    }
}
