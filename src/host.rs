//! SSH hosts and the racks they live in.
//!
//! A host list is a plain text file with one host name per line. Every host
//! name encodes its rack as `<prefix>-rack<RackID>-<suffix>`, and hosts are
//! grouped into one bucket per rack before rack-exclusive scheduling.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use itertools::Itertools;

use crate::error::{HostFileError, HostParseError};

const RACK_MARKER: &str = "-rack";

/// Identifier of a rack, the failure domain a host belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RackId(String);

impl RackId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RackId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reads the host list at `path`.
///
/// Lines are trimmed and blank lines are skipped. The order of the file is kept.
pub fn read_hosts(path: &Path) -> Result<Vec<String>, HostFileError> {
    if !path.is_file() {
        return Err(HostFileError::NotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path).map_err(|source| HostFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let hosts: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    tracing::debug!("Hosts detected in {}: {:?}", path.display(), hosts);
    Ok(hosts)
}

/// Derives the rack of `host`.
///
/// The marker is searched in the short name (before the first `.`) first, and in the full
/// name when the short name doesn't carry one. The rack id runs up to the next `-` or `.`.
pub fn rack_id(host: &str) -> Result<RackId, HostParseError> {
    let short = host.split('.').next().unwrap_or(host);
    let after_marker = short
        .find(RACK_MARKER)
        .map(|i| &short[i + RACK_MARKER.len()..])
        .or_else(|| {
            host.find(RACK_MARKER)
                .map(|i| &host[i + RACK_MARKER.len()..])
        })
        .ok_or_else(|| HostParseError::MissingRackMarker(host.to_string()))?;
    let id = after_marker
        .split(&['-', '.'][..])
        .next()
        .unwrap_or_default();
    if id.is_empty() {
        return Err(HostParseError::EmptyRackId(host.to_string()));
    }
    Ok(RackId(id.to_string()))
}

/// Hosts grouped by rack, in host-list order within each rack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RackBuckets {
    buckets: BTreeMap<RackId, Vec<String>>,
}

impl RackBuckets {
    /// Groups `hosts` by rack. The first host without a valid rack aborts the build.
    pub fn build<I, S>(hosts: I) -> Result<Self, HostParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut buckets: BTreeMap<RackId, Vec<String>> = BTreeMap::new();
        for host in hosts {
            let host = host.into();
            let rack = rack_id(&host)?;
            buckets.entry(rack).or_default().push(host);
        }
        Ok(Self { buckets })
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of racks with at least one host.
    pub fn num_racks(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of hosts over all racks.
    pub fn total_hosts(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Size of the largest rack, or 0 when there are no hosts.
    pub fn largest_bucket(&self) -> usize {
        self.buckets.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn bucket(&self, rack: &RackId) -> Option<&[String]> {
        self.buckets.get(rack).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RackId, &[String])> {
        self.buckets.iter().map(|(rack, hosts)| (rack, hosts.as_slice()))
    }

    /// Removes the most recently appended host of `rack`.
    pub(crate) fn take_one(&mut self, rack: &RackId) -> Option<String> {
        self.buckets.get_mut(rack).and_then(Vec::pop)
    }
}

impl fmt::Display for RackBuckets {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let racks = self
            .buckets
            .iter()
            .map(|(rack, hosts)| format!("rack{}={}", rack, hosts.len()))
            .join(", ");
        write!(f, "[{}]", racks)
    }
}
