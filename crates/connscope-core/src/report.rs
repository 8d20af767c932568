use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};

use crate::models::*;

const TITLE: &str = "Network Connection Analysis Report";
const HIGH_RISK_SHOWN: usize = 10;
const SUSPICIOUS_SHOWN: usize = 5;
const PRIVILEGED_SHOWN: usize = 5;
const LOOKUP_ERRORS_SHOWN: usize = 5;

/// Input file shown in the report metadata block.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub size_bytes: u64,
}

impl SourceFile {
    pub fn from_path(path: &Path) -> Self {
        Self {
            name: path.display().to_string(),
            size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        }
    }
}

fn risk_marker(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "🟢",
        RiskLevel::Medium => "🟡",
        RiskLevel::High => "🔴",
    }
}

/// Thousands separators for counts, `12,345`.
fn grouped(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Renders an [`AnalysisResult`] as a Markdown document.
pub struct MarkdownReporter {
    generated_at: NaiveDateTime,
}

impl Default for MarkdownReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownReporter {
    pub fn new() -> Self {
        Self {
            generated_at: Local::now().naive_local(),
        }
    }

    pub fn at(generated_at: NaiveDateTime) -> Self {
        Self { generated_at }
    }

    pub fn file_name(&self) -> String {
        format!("network_analysis_report_{}.md", self.generated_at.format("%Y%m%d_%H%M%S"))
    }

    pub fn render(&self, result: &AnalysisResult, ai_analysis: Option<&str>, sources: &[SourceFile]) -> String {
        let mut md = String::new();
        md.push_str(&format!("# {}\n\n---\n\n", TITLE));
        self.metadata(&mut md, sources);
        summary(&mut md, result);
        basic_statistics(&mut md, result);
        time_section(&mut md, &result.time_analysis);
        process_section(&mut md, &result.process_analysis);
        ip_section(&mut md, result);
        port_section(&mut md, result);
        user_section(&mut md, &result.user_analysis);
        if let Some(text) = ai_analysis.filter(|t| !t.trim().is_empty()) {
            md.push_str("## AI Security Analysis\n\n");
            md.push_str(text.trim());
            md.push_str("\n\n---\n\n");
        }
        if let Some(ti) = &result.threat_intel {
            threat_intel_section(&mut md, ti);
        }
        anomaly_section(&mut md, &result.anomalies);
        appendix(&mut md, &result.port_analysis);
        md.push_str("---\n\n");
        md.push_str("*Generated automatically by connscope*\n\n");
        md.push_str(&format!("*Generated at: {}*\n", self.generated_at.format("%Y-%m-%d %H:%M:%S")));
        md
    }

    /// Writes `content` under `dir` using [`MarkdownReporter::file_name`].
    pub fn write(&self, dir: &Path, content: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, content).with_context(|| format!("cannot write {}", path.display()))?;
        tracing::info!(path = %path.display(), "report written");
        Ok(path)
    }

    fn metadata(&self, md: &mut String, sources: &[SourceFile]) {
        md.push_str(&format!("- Generated: {}\n", self.generated_at.format("%Y-%m-%d %H:%M:%S")));
        for source in sources {
            md.push_str(&format!("- Source file: {}\n", source.name));
            md.push_str(&format!(
                "- File size: {:.2} MB\n",
                source.size_bytes as f64 / (1024.0 * 1024.0)
            ));
        }
        md.push_str("\n---\n\n");
    }
}

fn summary(md: &mut String, result: &AnalysisResult) {
    let s = &result.summary;
    let a = &result.anomalies;
    md.push_str("## Executive Summary\n\n");
    md.push_str(&format!("- Total connections: **{}**\n", grouped(s.total_count)));
    md.push_str(&format!("- Unique IP addresses: **{}**\n", grouped(s.unique_ips)));
    md.push_str(&format!("- Unique users: **{}**\n", s.unique_users));
    md.push_str(&format!("- Unique processes: **{}**\n", s.unique_processes));
    md.push_str(&format!(
        "\n**Risk assessment: {} {} risk** (score {})\n\n",
        risk_marker(result.risk.level),
        result.risk.level,
        result.risk.score
    ));

    let mut findings = Vec::new();
    if !a.high_risk_port_connections.is_empty() {
        findings.push(format!("{} high-risk port connections", a.high_risk_port_connections.len()));
    }
    if a.abnormal_time_count > 0 {
        findings.push(format!("{} connections at abnormal times", a.abnormal_time_count));
    }
    if !a.suspicious_process_ips.is_empty() {
        findings.push(format!(
            "{} processes contacting many external IPs",
            a.suspicious_process_ips.len()
        ));
    }
    if !findings.is_empty() {
        md.push_str("### Key Findings\n\n");
        for f in findings {
            md.push_str(&format!("- {}\n", f));
        }
        md.push('\n');
    }
    md.push_str("---\n\n");
}

fn basic_statistics(md: &mut String, result: &AnalysisResult) {
    let p = &result.protocol_analysis;
    let ip = &result.ip_analysis;
    let d = &result.domain_analysis;
    md.push_str("## Basic Statistics\n\n### Protocols\n\n");
    md.push_str(&format!("- TCP: **{}** ({:.1}%)\n", grouped(p.tcp_count), p.tcp_percentage));
    md.push_str(&format!("- UDP: **{}** ({:.1}%)\n", grouped(p.udp_count), p.udp_percentage));
    md.push_str("\n### IP Addresses\n\n");
    md.push_str(&format!("- Internal: **{}** ({:.1}%)\n", grouped(ip.internal_count), ip.internal_percentage));
    md.push_str(&format!("- External: **{}** ({:.1}%)\n", grouped(ip.external_count), ip.external_percentage));
    md.push_str("\n### Domains\n\n");
    md.push_str(&format!("- Connections with a domain: **{}**\n", grouped(d.non_empty_count)));
    md.push_str(&format!("- Unique domains: **{}**\n", d.unique_count));
    md.push_str("\n---\n\n");
}

fn time_section(md: &mut String, t: &TimeAnalysis) {
    md.push_str("## Time Distribution\n\n");
    if let (Some(start), Some(end)) = (&t.time_range.start_str, &t.time_range.end_str) {
        md.push_str("### Time Range\n\n");
        md.push_str(&format!("- Start: {}\n", start));
        md.push_str(&format!("- End: {}\n", end));
        md.push_str(&format!("- Duration: {:.2} hours\n\n", t.time_range.duration_hours));
    }
    md.push_str("### Activity\n\n");
    md.push_str(&format!("- Peak hour: {}:00 ({} connections)\n", t.peak_hour.0, t.peak_hour.1));

    if !t.period_distribution.is_empty() {
        md.push_str("\n#### By Period\n\n");
        for period in DayPeriod::ALL {
            let count = t
                .period_distribution
                .iter()
                .find(|(p, _)| *p == period)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            if count > 0 {
                md.push_str(&format!("  - {}: {} connections\n", period, count));
            }
        }
    }
    if t.abnormal_time_count > 0 {
        md.push_str(&format!(
            "\n⚠️ **{}** connections at abnormal times ({:.1}%)\n",
            t.abnormal_time_count, t.abnormal_time_percentage
        ));
    }
    if t.fallback_count > 0 {
        md.push_str(&format!(
            "\nℹ️ {} timestamps could not be parsed and were counted at report time\n",
            t.fallback_count
        ));
    }
    md.push_str("\n---\n\n");
}

fn process_section(md: &mut String, p: &ProcessAnalysis) {
    md.push_str("## Process Behavior\n\n### Process Types\n\n");
    md.push_str(&format!(
        "- System processes: **{}** ({:.1}%)\n",
        grouped(p.system_process_count),
        p.system_percentage
    ));
    md.push_str(&format!(
        "- Application processes: **{}** ({:.1}%)\n",
        grouped(p.application_process_count),
        p.application_percentage
    ));
    if !p.top_processes.is_empty() {
        md.push_str("\n### Top Processes\n\n");
        for (process, count) in &p.top_processes {
            md.push_str(&format!("- **{}**: {} connections\n", process_name(process), count));
        }
    }
    if !p.privileged_external_connections.is_empty() {
        md.push_str("\n### Privileged Processes Reaching External IPs\n\n");
        for (process, count) in p.privileged_external_connections.iter().take(PRIVILEGED_SHOWN) {
            md.push_str(&format!("- **{}**: {} external connections\n", process_name(process), count));
        }
    }
    md.push_str("\n---\n\n");
}

fn ip_section(md: &mut String, result: &AnalysisResult) {
    md.push_str("## IP Access\n\n");
    if !result.ip_analysis.top_ips.is_empty() {
        md.push_str("### Top Destination IPs\n\n");
        for (ip, count) in &result.ip_analysis.top_ips {
            match result.malicious_entry(ip) {
                Some(threat) => md.push_str(&format!(
                    "- **{}** ⚠️: {} connections - *threat type: {}*\n",
                    ip, count, threat.threat_type
                )),
                None => md.push_str(&format!("- **{}**: {} connections\n", ip, count)),
            }
        }
    }
    md.push_str("\n---\n\n");
}

fn port_section(md: &mut String, result: &AnalysisResult) {
    let p = &result.port_analysis;
    md.push_str("## Ports\n\n");
    if p.high_risk_port_count > 0 {
        md.push_str("### High-Risk Ports\n\n");
        md.push_str(&format!(
            "- High-risk port connections: **{}** ({:.1}%)\n\n",
            grouped(p.high_risk_port_count),
            p.high_risk_port_percentage
        ));
    }
    if !p.port_details.is_empty() {
        md.push_str("### Top Ports\n\n");
        for d in &p.port_details {
            let service = d.high_risk_service.as_deref().unwrap_or(&d.service);
            let mark = if d.is_high_risk { " ⚠️" } else { "" };
            md.push_str(&format!("- Port **{}** ({}){}: {} connections\n", d.port, service, mark, d.count));
        }
    }
    let uncommon = result.anomalies.uncommon_ports_count;
    if uncommon > 0 {
        md.push_str(&format!("\nℹ️ **{}** uncommon ports contacted\n", uncommon));
    }
    md.push_str("\n---\n\n");
}

fn user_section(md: &mut String, u: &UserAnalysis) {
    md.push_str("## Users\n\n### Privileged Accounts\n\n");
    md.push_str(&format!(
        "- Privileged account connections: **{}** ({:.1}%)\n",
        grouped(u.privileged_count),
        u.privileged_percentage
    ));
    if !u.top_users.is_empty() {
        md.push_str("\n### Top Users\n\n");
        for (user, count) in &u.top_users {
            md.push_str(&format!("- **{}**: {} connections\n", user, count));
        }
    }
    md.push_str("\n---\n\n");
}

fn threat_intel_section(md: &mut String, ti: &ThreatIntelReport) {
    let s = &ti.summary;
    md.push_str("## 🚨 Threat Intelligence\n\n### Overview\n\n");
    md.push_str(&format!("- Queried IPs: **{}**\n", s.total_queried));
    md.push_str(&format!(
        "- Malicious: **{}** ({:.1}%)\n",
        s.malicious_count, s.malicious_percentage
    ));
    md.push_str(&format!("- Suspicious: **{}**\n", s.suspicious_count));
    md.push_str(&format!("- Clean: **{}**\n", s.clean_count));
    md.push_str(&format!(
        "\n**Overall risk: {} {}**\n\n",
        risk_marker(s.risk_level),
        s.risk_level
    ));

    if !ti.malicious_ips.is_empty() {
        md.push_str("### 🔴 Malicious IPs\n\n");
        for t in &ti.malicious_ips {
            flagged_entry(md, t);
            md.push_str(&format!("  - First reported: {}\n", t.first_reported));
            md.push_str(&format!("  - Last reported: {}\n\n", t.last_reported));
        }
    }
    if !ti.suspicious_ips.is_empty() {
        md.push_str("### 🟡 Suspicious IPs\n\n");
        for t in &ti.suspicious_ips {
            flagged_entry(md, t);
            md.push('\n');
        }
    }
    if !ti.errors.is_empty() {
        md.push_str("### ❌ Lookup Errors\n\n");
        for e in ti.errors.iter().take(LOOKUP_ERRORS_SHOWN) {
            md.push_str(&format!("- IP: {}\n  - Error: {}\n", e.ip, e.error));
        }
        md.push('\n');
    }
    md.push_str("---\n\n");
}

fn flagged_entry(md: &mut String, t: &FlaggedIp) {
    md.push_str(&format!("- **{}**\n", t.ip));
    md.push_str(&format!("  - Threat type: {}\n", t.threat_type));
    md.push_str(&format!("  - Confidence: {}/100\n", t.confidence_score));
    md.push_str(&format!("  - Country: {}\n", t.country));
    md.push_str(&format!("  - Reports: {}\n", t.total_reports));
}

fn anomaly_section(md: &mut String, a: &AnomalyFindings) {
    md.push_str("## Anomalies\n\n");
    if !a.high_risk_port_connections.is_empty() {
        md.push_str("### High-Risk Port Connections\n\n");
        for c in a.high_risk_port_connections.iter().take(HIGH_RISK_SHOWN) {
            md.push_str(&format!(
                "- {} -> {}:{} ({})\n",
                process_name(&c.process),
                c.dest_ip,
                c.dest_port,
                c.service
            ));
        }
        if a.high_risk_port_connections.len() > HIGH_RISK_SHOWN {
            md.push_str(&format!(
                "- ... {} more\n",
                a.high_risk_port_connections.len() - HIGH_RISK_SHOWN
            ));
        }
        md.push('\n');
    }
    if !a.suspicious_process_ips.is_empty() {
        md.push_str("### Suspicious Processes (many external IPs)\n\n");
        for s in a.suspicious_process_ips.iter().take(SUSPICIOUS_SHOWN) {
            md.push_str(&format!(
                "- **{}**: {} distinct external IPs\n",
                process_name(&s.process),
                s.external_ip_count
            ));
        }
        md.push('\n');
    }
    if !a.abnormal_time_connections.is_empty() {
        md.push_str("### Abnormal-Time Samples\n\n");
        for c in &a.abnormal_time_connections {
            md.push_str(&format!(
                "- {} {} -> {}:{}\n",
                c.timestamp,
                process_name(&c.process),
                c.dest_ip,
                c.dest_port
            ));
        }
        md.push('\n');
    }
    md.push_str("---\n\n");
}

fn appendix(md: &mut String, p: &PortAnalysis) {
    md.push_str("## Appendix\n\n");
    if !p.port_details.is_empty() {
        md.push_str("### Port Statistics\n\n");
        for d in &p.port_details {
            md.push_str(&format!("- {} ({}): {}\n", d.port, d.service, d.count));
        }
        md.push('\n');
    }
}
