use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::classify;
use crate::config::ThreatIntelSection;
use crate::models::*;

const ABUSEIPDB_CHECK_URL: &str = "https://api.abuseipdb.com/api/v2/check";
pub const MAX_RANGE_HOSTS: usize = 256;
const RANGE_QUERY_PAUSE: Duration = Duration::from_millis(100);

/// Per-address reputation source.
pub trait ReputationLookup {
    fn check_ip(&self, ip: &str) -> impl Future<Output = ReputationVerdict> + Send;
}

fn now_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

impl ReputationVerdict {
    pub fn ok(ip: impl Into<String>, data: ReputationData) -> Self {
        Self {
            ip: ip.into(),
            success: true,
            data: Some(data),
            error: None,
            query_time: now_iso(),
        }
    }

    pub fn failed(ip: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            query_time: now_iso(),
        }
    }
}

// ---------------------------------------------------------------------------
// AbuseIPDB
// ---------------------------------------------------------------------------

pub struct AbuseIpDbClient {
    http: reqwest::Client,
    api_key: Option<String>,
    enabled: bool,
    max_age_days: u32,
    verbose: bool,
}

impl AbuseIpDbClient {
    pub fn new(settings: &ThreatIntelSection) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("cannot build HTTP client")?;
        Ok(Self {
            http,
            api_key: settings.abuseipdb_api_key.clone().filter(|k| !k.is_empty()),
            enabled: settings.enabled,
            max_age_days: settings.max_age_days,
            verbose: settings.verbose,
        })
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.has_key()
    }

    async fn query(&self, ip: &str, key: &str) -> Result<ReputationData> {
        let max_age = self.max_age_days.to_string();
        let resp = self
            .http
            .get(ABUSEIPDB_CHECK_URL)
            .header("Key", key)
            .header("Accept", "application/json")
            .query(&[
                ("ipAddress", ip),
                ("maxAgeInDays", max_age.as_str()),
                ("verbose", if self.verbose { "true" } else { "false" }),
            ])
            .send()
            .await
            .context("request failed")?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("AbuseIPDB error ({}): {}", status, text);
        }
        let json: serde_json::Value = serde_json::from_str(&text).context("invalid AbuseIPDB response")?;
        Ok(parse_abuseipdb(&json["data"]))
    }

    /// Looks up every host address of `cidr`, at most [`MAX_RANGE_HOSTS`].
    pub async fn check_ip_range(&self, cidr: &str) -> Vec<ReputationVerdict> {
        if self.api_key.is_none() {
            return vec![ReputationVerdict::failed(cidr, "No AbuseIPDB API key configured")];
        }
        let hosts = match expand_cidr(cidr, MAX_RANGE_HOSTS) {
            Ok(hosts) => hosts,
            Err(e) => return vec![ReputationVerdict::failed(cidr, format!("Invalid IP range: {e:#}"))],
        };

        let mut verdicts = Vec::with_capacity(hosts.len());
        for (i, host) in hosts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(RANGE_QUERY_PAUSE).await;
            }
            verdicts.push(self.check_ip(&host.to_string()).await);
        }
        verdicts
    }
}

impl ReputationLookup for AbuseIpDbClient {
    async fn check_ip(&self, ip: &str) -> ReputationVerdict {
        let Some(key) = self.api_key.as_deref() else {
            return ReputationVerdict::failed(ip, "No AbuseIPDB API key configured");
        };
        if classify::parse_ip(ip).is_none() {
            return ReputationVerdict::failed(ip, format!("Invalid IP address: {ip}"));
        }
        match self.query(ip, key).await {
            Ok(data) => {
                tracing::debug!(ip, score = data.confidence_score, "reputation lookup");
                ReputationVerdict::ok(ip, data)
            }
            Err(e) => {
                tracing::warn!(ip, error = %e, "reputation lookup failed");
                ReputationVerdict::failed(ip, format!("Request failed: {e:#}"))
            }
        }
    }
}

/// Reads the `data` object of a `/check` response. Missing fields default.
pub fn parse_abuseipdb(data: &serde_json::Value) -> ReputationData {
    let text = |k: &str| data[k].as_str().map(String::from);
    ReputationData {
        confidence_score: data["abuseConfidenceScore"].as_u64().unwrap_or(0).min(100) as u8,
        threat_types: data["threatTypes"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        country: text("countryName").or_else(|| text("countryCode")),
        total_reports: data["totalReports"].as_u64().unwrap_or(0),
        first_reported: text("firstReported"),
        last_reported: text("lastReportedAt").or_else(|| text("lastReported")),
    }
}

// ---------------------------------------------------------------------------
// CIDR expansion
// ---------------------------------------------------------------------------

/// Host addresses of a network in ascending order, truncated to `limit`.
///
/// IPv4 networks shorter than /31 exclude the network and broadcast
/// addresses; IPv6 networks shorter than /127 exclude the subnet-router
/// anycast address. A bare address expands to itself.
pub fn expand_cidr(cidr: &str, limit: usize) -> Result<Vec<IpAddr>> {
    let (addr, prefix) = match cidr.trim().split_once('/') {
        Some((a, p)) => (a, Some(p.parse::<u32>().with_context(|| format!("bad prefix in {cidr}"))?)),
        None => (cidr.trim(), None),
    };
    let addr = classify::parse_ip(addr).with_context(|| format!("bad address in {cidr}"))?;

    match addr {
        IpAddr::V4(v4) => {
            let prefix = prefix.unwrap_or(32);
            anyhow::ensure!(prefix <= 32, "prefix /{prefix} too long for IPv4");
            let host_bits = 32 - prefix;
            let mask = if prefix == 0 { 0 } else { u32::MAX << host_bits };
            let network = u32::from(v4) & mask;
            let size = 1u64 << host_bits;
            let (first, count) = if host_bits >= 2 { (1, size - 2) } else { (0, size) };
            Ok((0..count.min(limit as u64))
                .map(|i| IpAddr::V4(Ipv4Addr::from(network + (first + i) as u32)))
                .collect())
        }
        IpAddr::V6(v6) => {
            let prefix = prefix.unwrap_or(128);
            anyhow::ensure!(prefix <= 128, "prefix /{prefix} too long for IPv6");
            let host_bits = 128 - prefix;
            let mask = if prefix == 0 { 0 } else { u128::MAX << host_bits };
            let network = u128::from(v6) & mask;
            let first: u128 = if host_bits >= 2 { 1 } else { 0 };
            let available: u128 = if host_bits >= 128 {
                u128::MAX
            } else {
                (1u128 << host_bits) - first
            };
            let count = available.min(limit as u128);
            Ok((0..count)
                .map(|i| IpAddr::V6(Ipv6Addr::from(network + first + i)))
                .collect())
        }
    }
}

// ---------------------------------------------------------------------------
// Overlay
// ---------------------------------------------------------------------------

pub fn classify_score(score: u8) -> ReputationClass {
    match score {
        80.. => ReputationClass::Malicious,
        30.. => ReputationClass::Suspicious,
        _ => ReputationClass::Clean,
    }
}

/// Ratio tiers over everything queried, failures included.
pub fn threat_risk_level(malicious: u64, suspicious: u64, queried: u64) -> RiskLevel {
    let denom = queried.max(1) as f64;
    let malicious_ratio = malicious as f64 / denom;
    let suspicious_ratio = suspicious as f64 / denom;
    if malicious_ratio > 0.10 || suspicious_ratio > 0.30 {
        RiskLevel::High
    } else if malicious_ratio > 0.05 || suspicious_ratio > 0.15 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

impl ThreatIntelReport {
    pub fn record(&mut self, verdict: ReputationVerdict) {
        self.query_count += 1;
        let data = match (verdict.success, verdict.data) {
            (true, Some(data)) => data,
            _ => {
                self.errors.push(LookupFailure {
                    ip: verdict.ip,
                    error: verdict.error.unwrap_or_else(|| "unknown error".into()),
                });
                return;
            }
        };

        let class = classify_score(data.confidence_score);
        if class == ReputationClass::Clean {
            self.clean_ips.push(CleanIp {
                ip: verdict.ip,
                confidence_score: data.confidence_score,
            });
            return;
        }

        let default_label = match class {
            ReputationClass::Malicious => "Malicious Activity",
            _ => "Suspicious Activity",
        };
        let flagged = FlaggedIp {
            ip: verdict.ip,
            threat_type: if data.threat_types.is_empty() {
                default_label.to_string()
            } else {
                data.threat_types.join(", ")
            },
            confidence_score: data.confidence_score,
            country: data.country.unwrap_or_else(|| "Unknown".into()),
            total_reports: data.total_reports,
            first_reported: data.first_reported.unwrap_or_else(|| "Unknown".into()),
            last_reported: data.last_reported.unwrap_or_else(|| "Unknown".into()),
        };
        match class {
            ReputationClass::Malicious => self.malicious_ips.push(flagged),
            _ => self.suspicious_ips.push(flagged),
        }
    }

    pub fn from_verdicts(verdicts: impl IntoIterator<Item = ReputationVerdict>) -> Self {
        let mut report = Self::default();
        for v in verdicts {
            report.record(v);
        }
        report.finish();
        report
    }

    pub fn finish(&mut self) {
        let malicious = self.malicious_ips.len() as u64;
        let suspicious = self.suspicious_ips.len() as u64;
        self.summary = ThreatIntelSummary {
            total_queried: self.query_count,
            malicious_count: malicious,
            suspicious_count: suspicious,
            clean_count: self.clean_ips.len() as u64,
            error_count: self.errors.len() as u64,
            malicious_percentage: crate::stats::percentage(malicious, self.query_count),
            risk_level: threat_risk_level(malicious, suspicious, self.query_count),
        };
    }
}

pub struct ThreatIntelAnalyzer<'a, L> {
    lookup: &'a L,
}

impl<'a, L: ReputationLookup + Sync> ThreatIntelAnalyzer<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    /// Queries each external address in order; internal and unparseable
    /// addresses are skipped without counting as queries.
    pub async fn analyze_ips(&self, ips: &[String]) -> ThreatIntelReport {
        let mut report = ThreatIntelReport::default();
        for ip in ips {
            if !classify::is_external(ip) {
                tracing::debug!(ip = %ip, "skipping non-external address");
                continue;
            }
            report.record(self.lookup.check_ip(ip).await);
        }
        report.finish();
        tracing::info!(
            queried = report.query_count,
            malicious = report.summary.malicious_count,
            suspicious = report.summary.suspicious_count,
            "threat intel complete"
        );
        report
    }
}
