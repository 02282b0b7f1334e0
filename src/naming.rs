//! Exclude file naming.
//!
//! Each running instance owns a disjoint set of exclude files on the remote
//! side, keyed by its deployment name, stand and the shape of the pair.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::NamingError;
use crate::util::slashes_to_underscores;

// `<deployment>-<replicaset hash>-<pod hash>`
static POD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)-[a-z0-9]{8,10}-[a-z0-9]{5}$").expect("valid pod name pattern"));

// group 2 is the shortest `/dir/file` tail after the host part
static REMOTE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(rsync.+@.+)(/[a-z].+/.+$)").expect("valid remote path pattern"));

// everything up to the first `/` after the user part; the host may carry dots or a port
static HOST_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rsync.*?@[^/]+/").expect("valid host prefix pattern"));

/// Deployment name: the pod identity without its replica-set and pod hashes.
pub fn deployment_name(pod_name: &str) -> Result<&str, NamingError> {
    POD_NAME_RE
        .captures(pod_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| NamingError::PodName(pod_name.to_string()))
}

/// `{deployment}{remote subpath}-{stand}{destination}-excludeFile`, with
/// slashes turned into underscores and wildcards dropped from the subpath.
pub fn exclude_file_name(
    pod_name: &str,
    stand_name: &str,
    source_template: &str,
    dest_dir: &str,
) -> Result<String, NamingError> {
    let deployment = deployment_name(pod_name)?;
    let remote_subpath = REMOTE_PATH_RE
        .captures(source_template)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str())
        .ok_or_else(|| NamingError::RemotePath(source_template.to_string()))?;

    let remote_part = slashes_to_underscores(remote_subpath).replace('*', "");
    let dest_part = slashes_to_underscores(dest_dir);
    Ok(format!("{deployment}{remote_part}-{stand_name}{dest_part}-excludeFile"))
}

/// Location of the exclude snapshot on the rsync server: the source's
/// `rsync…@host/` prefix, then the exclude module and file name.
pub fn remote_exclude_path(
    source_template: &str,
    exclude_module: &str,
    exclude_file_name: &str,
) -> Result<String, NamingError> {
    let prefix = HOST_PREFIX_RE
        .find(source_template)
        .map(|m| m.as_str())
        .ok_or_else(|| NamingError::HostPrefix(source_template.to_string()))?;
    let module = exclude_module.trim_matches('/');
    Ok(format!("{prefix}{module}/{exclude_file_name}"))
}
