use anyhow::Result;
use connscope_core::models::*;

use crate::provider::{AiClient, ChatMessage};

const SYSTEM_PROMPT: &str = r#"You are a network security analyst reviewing outbound connection logs collected from Windows endpoints. Your job is to:

1. Identify abnormal connection patterns
2. Assess the overall security risk level
3. Point out potentially malicious or suspicious behavior
4. Give concrete, actionable remediation advice

Be concise and specific. Use bullet points for findings."#;

/// Up to `n` entries of a ranked list as `name (count)` pairs.
fn ranked<T: std::fmt::Display>(list: &[(T, u64)], n: usize) -> String {
    list.iter()
        .take(n)
        .map(|(v, c)| format!("{} ({})", v, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders the analysis result as the user prompt for the model.
pub fn build_prompt(result: &AnalysisResult) -> String {
    let mut out = String::new();
    out.push_str("Analyze the following network connection statistics and assess their security.\n\n");

    let s = &result.summary;
    out.push_str("## Basic statistics\n");
    out.push_str(&format!("- Total connections: {}\n", s.total_count));
    out.push_str(&format!("- Unique destination IPs: {}\n", s.unique_ips));
    out.push_str(&format!("- Unique users: {}\n", s.unique_users));
    out.push_str(&format!("- Unique processes: {}\n\n", s.unique_processes));

    let t = &result.time_analysis;
    if let (Some(start), Some(end)) = (&t.time_range.start_str, &t.time_range.end_str) {
        out.push_str("## Time\n");
        out.push_str(&format!("- Range: {} ~ {}\n", start, end));
        out.push_str(&format!("- Duration: {:.1} hours\n", t.time_range.duration_hours));
        out.push_str(&format!(
            "- Off-hours connections: {} ({:.1}%)\n\n",
            t.abnormal_time_count, t.abnormal_time_percentage
        ));
    }

    let p = &result.process_analysis;
    out.push_str("## Processes\n");
    out.push_str(&format!("- System processes: {:.1}%\n", p.system_percentage));
    let top: Vec<(&str, u64)> = p
        .top_processes
        .iter()
        .take(5)
        .map(|(path, c)| (process_name(path), *c))
        .collect();
    out.push_str(&format!("- Top processes: {}\n\n", ranked(&top, 5)));

    let ip = &result.ip_analysis;
    out.push_str("## Destination IPs\n");
    out.push_str(&format!(
        "- Internal: {} ({:.1}%), external: {} ({:.1}%)\n",
        ip.internal_count, ip.internal_percentage, ip.external_count, ip.external_percentage
    ));
    out.push_str(&format!("- Top IPs: {}\n\n", ranked(&ip.top_ips, 5)));

    let port = &result.port_analysis;
    out.push_str("## Ports\n");
    out.push_str(&format!(
        "- High-risk port connections: {} ({:.1}%)\n",
        port.high_risk_port_count, port.high_risk_port_percentage
    ));
    let ports: Vec<String> = port
        .port_details
        .iter()
        .take(5)
        .map(|d| format!("{}/{} ({})", d.port, d.service, d.count))
        .collect();
    out.push_str(&format!("- Top ports: {}\n\n", ports.join(", ")));

    let u = &result.user_analysis;
    out.push_str("## Users\n");
    out.push_str(&format!("- Privileged account connections: {}\n", u.privileged_count));
    out.push_str(&format!("- Top users: {}\n\n", ranked(&u.top_users, 5)));

    let a = &result.anomalies;
    out.push_str("## Anomalies\n");
    out.push_str(&format!("- High-risk port connections: {}\n", a.high_risk_port_connections.len()));
    out.push_str(&format!("- Processes contacting many external IPs: {}\n", a.suspicious_process_ips.len()));
    for sp in a.suspicious_process_ips.iter().take(3) {
        out.push_str(&format!(
            "  - {}: {} external IPs\n",
            process_name(&sp.process),
            sp.external_ip_count
        ));
    }

    out.push_str("\nPlease provide:\n");
    out.push_str("1. An overall risk assessment (low/medium/high)\n");
    out.push_str("2. The main security issues found\n");
    out.push_str("3. Concrete remediation advice\n");
    out.push_str("4. Points that need further attention\n");
    out
}

pub struct LogCopilot {
    client: AiClient,
}

impl LogCopilot {
    pub fn new(client: AiClient) -> Self {
        Self { client }
    }

    pub async fn analyze(&self, result: &AnalysisResult) -> Result<String> {
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(build_prompt(result))];
        tracing::info!(
            provider = %self.client.config().provider,
            model = %self.client.config().model,
            "requesting AI analysis"
        );
        self.client.chat(&messages).await
    }
}
