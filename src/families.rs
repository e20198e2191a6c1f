// src/families.rs

//! Scan families and the ordering rules between them.
//!
//! Analyzers produce inputs for scanners, and enrichers consume scanner
//! output. When both ends of such a pair are configured, the consumer is
//! made to run after the producer even if the config does not say so.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::dag::TaskName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanFamily {
    Sbom,
    Vulnerabilities,
    Secrets,
    Rootkits,
    Malware,
    Misconfiguration,
    InfoFinder,
    Plugins,
    Exploits,
}

impl ScanFamily {
    pub const ALL: [ScanFamily; 9] = [
        ScanFamily::Sbom,
        ScanFamily::Vulnerabilities,
        ScanFamily::Secrets,
        ScanFamily::Rootkits,
        ScanFamily::Malware,
        ScanFamily::Misconfiguration,
        ScanFamily::InfoFinder,
        ScanFamily::Plugins,
        ScanFamily::Exploits,
    ];

    /// Families whose output this family can consume.
    ///
    /// Vulnerability scanning may read the SBOM; exploit enrichment reads
    /// vulnerability findings.
    pub fn consumes(self) -> &'static [ScanFamily] {
        match self {
            ScanFamily::Vulnerabilities => &[ScanFamily::Sbom],
            ScanFamily::Exploits => &[ScanFamily::Vulnerabilities],
            _ => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanFamily::Sbom => "sbom",
            ScanFamily::Vulnerabilities => "vulnerabilities",
            ScanFamily::Secrets => "secrets",
            ScanFamily::Rootkits => "rootkits",
            ScanFamily::Malware => "malware",
            ScanFamily::Misconfiguration => "misconfiguration",
            ScanFamily::InfoFinder => "infofinder",
            ScanFamily::Plugins => "plugins",
            ScanFamily::Exploits => "exploits",
        }
    }
}

impl fmt::Display for ScanFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the implicit dependencies between family-tagged tasks.
///
/// Returns, for each task whose family consumes another configured family,
/// the names of the producing tasks. Tasks without implicit dependencies are
/// absent from the map.
pub fn implicit_dependencies<'a, I>(tagged: I) -> BTreeMap<TaskName, Vec<TaskName>>
where
    I: IntoIterator<Item = (&'a str, ScanFamily)>,
{
    let tagged: Vec<(&str, ScanFamily)> = tagged.into_iter().collect();

    let mut implicit: BTreeMap<TaskName, Vec<TaskName>> = BTreeMap::new();

    for (task, family) in tagged.iter() {
        for upstream in family.consumes() {
            for (producer, _) in tagged.iter().filter(|(_, f)| f == upstream) {
                implicit
                    .entry(task.to_string())
                    .or_default()
                    .push(producer.to_string());
            }
        }
    }

    implicit
}
