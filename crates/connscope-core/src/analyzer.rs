use std::collections::HashSet;
use std::fmt::Write as _;

use crate::classify;
use crate::config::Config;
use crate::detect;
use crate::dimensions::*;
use crate::models::*;
use crate::threatintel::{ReputationLookup, ThreatIntelAnalyzer};

/// Drives the dimension analyzers and the anomaly detector over a
/// materialized record set.
#[derive(Debug, Clone, Default)]
pub struct LogAnalyzer {
    threat_intel_enabled: bool,
}

/// Non-empty values of each field, extracted once per run.
struct Columns<'a> {
    timestamps: Vec<&'a str>,
    processes: Vec<&'a str>,
    users: Vec<&'a str>,
    ips: Vec<&'a str>,
    ports: Vec<&'a str>,
    protocols: Vec<&'a str>,
    domains: Vec<&'a str>,
}

impl<'a> Columns<'a> {
    fn extract(records: &'a [Record]) -> Self {
        let column = |field| records.iter().filter_map(|r| r.get(field)).collect::<Vec<_>>();
        Self {
            timestamps: column(RecordField::Timestamp),
            processes: column(RecordField::Process),
            users: column(RecordField::User),
            ips: column(RecordField::DestIp),
            ports: column(RecordField::DestPort),
            protocols: column(RecordField::Protocol),
            domains: records.iter().map(|r| r.text(RecordField::Domain)).collect(),
        }
    }
}

fn unique(values: &[&str]) -> u64 {
    values.iter().collect::<HashSet<_>>().len() as u64
}

impl LogAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            threat_intel_enabled: config.threat_intel.enabled,
        }
    }

    pub fn with_threat_intel(mut self, enabled: bool) -> Self {
        self.threat_intel_enabled = enabled;
        self
    }

    pub fn threat_intel_enabled(&self) -> bool {
        self.threat_intel_enabled
    }

    pub fn analyze(&self, records: &[Record]) -> AnalysisResult {
        if records.is_empty() {
            tracing::info!("no records to analyze");
            return AnalysisResult::default();
        }
        tracing::info!(records = records.len(), "analysis started");

        let cols = Columns::extract(records);

        // Time and port feed the detector; the rest are independent.
        let ((time, ports), ((processes, users), (ips, (protocols, domains)))) = rayon::join(
            || {
                rayon::join(
                    || analyze_time(&cols.timestamps),
                    || analyze_ports(&cols.ports),
                )
            },
            || {
                rayon::join(
                    || {
                        rayon::join(
                            || analyze_processes(&cols.processes, records),
                            || analyze_users(&cols.users),
                        )
                    },
                    || {
                        rayon::join(
                            || analyze_ips(&cols.ips),
                            || {
                                rayon::join(
                                    || analyze_protocols(&cols.protocols),
                                    || analyze_domains(&cols.domains),
                                )
                            },
                        )
                    },
                )
            },
        );

        let anomalies = detect::run_detection(records, &time, &ports);
        let risk = detect::assess(&anomalies);

        let result = AnalysisResult {
            summary: AnalysisSummary {
                total_count: records.len() as u64,
                unique_ips: unique(&cols.ips),
                unique_users: unique(&cols.users),
                unique_processes: unique(&cols.processes),
            },
            time_analysis: time,
            process_analysis: processes,
            user_analysis: users,
            ip_analysis: ips,
            port_analysis: ports,
            protocol_analysis: protocols,
            domain_analysis: domains,
            anomalies,
            risk,
            threat_intel: None,
        };

        tracing::info!(risk = %result.risk.level, score = result.risk.score, "analysis complete");
        result
    }

    /// Runs [`LogAnalyzer::analyze`], then overlays reputation verdicts for
    /// the distinct external destinations when threat intel is enabled.
    pub async fn analyze_with_threat_intel<L>(&self, records: &[Record], lookup: &L) -> AnalysisResult
    where
        L: ReputationLookup + Sync,
    {
        let mut result = self.analyze(records);
        if !self.threat_intel_enabled {
            return result;
        }

        let ips = external_ips(records);
        if ips.is_empty() {
            return result;
        }
        tracing::info!(count = ips.len(), "querying reputation for external addresses");
        result.threat_intel = Some(ThreatIntelAnalyzer::new(lookup).analyze_ips(&ips).await);
        result
    }
}

/// Distinct external destination addresses in first-seen order.
pub fn external_ips(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| r.get(RecordField::DestIp))
        .filter(|ip| classify::is_external(ip) && seen.insert(*ip))
        .map(String::from)
        .collect()
}

/// Plain-text digest printed at the end of a run.
pub fn summary_text(result: &AnalysisResult) -> String {
    let mut out = String::new();
    let s = &result.summary;
    let _ = writeln!(out, "Total connections: {}", s.total_count);
    let _ = writeln!(out, "Unique IPs: {}", s.unique_ips);
    let _ = writeln!(out, "Unique users: {}", s.unique_users);
    let _ = writeln!(out, "Unique processes: {}", s.unique_processes);

    let range = &result.time_analysis.time_range;
    if let (Some(start), Some(end)) = (&range.start_str, &range.end_str) {
        let _ = writeln!(out, "Time range: {start} ~ {end}");
    }

    let p = &result.protocol_analysis;
    let _ = writeln!(out, "TCP connections: {} ({:.1}%)", p.tcp_count, p.tcp_percentage);
    let _ = writeln!(out, "UDP connections: {} ({:.1}%)", p.udp_count, p.udp_percentage);

    let ip = &result.ip_analysis;
    let _ = writeln!(out, "Internal IPs: {} ({:.1}%)", ip.internal_count, ip.internal_percentage);
    let _ = writeln!(out, "External IPs: {} ({:.1}%)", ip.external_count, ip.external_percentage);

    let a = &result.anomalies;
    let _ = writeln!(out, "Off-hours connections: {}", a.abnormal_time_count);
    let _ = writeln!(out, "High-risk port connections: {}", a.high_risk_port_connections.len());
    let _ = write!(out, "Suspicious processes: {}", a.suspicious_process_ips.len());
    out
}
