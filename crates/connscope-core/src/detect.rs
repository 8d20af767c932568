use std::collections::{HashMap, HashSet};

use crate::classify;
use crate::models::*;

const ABNORMAL_SAMPLE_LIMIT: usize = 10;
const UNCOMMON_PORT_LIMIT: usize = 10;
const FAN_OUT_THRESHOLD: usize = 5;
const FAN_OUT_SAMPLE_LIMIT: usize = 10;

/// Run the closed set of anomaly rules over a record set.
///
/// Reuses the abnormal timestamps from the time analyzer and the port
/// distribution from the port analyzer rather than recomputing them.
pub fn run_detection(
    records: &[Record],
    time: &TimeAnalysis,
    ports: &PortAnalysis,
) -> AnomalyFindings {
    let mut findings = AnomalyFindings {
        abnormal_time_count: time.abnormal_time_count,
        ..Default::default()
    };

    detect_off_hours_and_high_risk(&mut findings, records, &time.abnormal_timestamps);
    detect_uncommon_ports(&mut findings, &ports.distribution);
    detect_process_fan_out(&mut findings, records);

    tracing::info!(
        abnormal = findings.abnormal_time_count,
        high_risk = findings.high_risk_port_connections.len(),
        uncommon_ports = findings.uncommon_ports_count,
        suspicious = findings.suspicious_process_ips.len(),
        "detection complete"
    );
    findings
}

fn detect_off_hours_and_high_risk(
    findings: &mut AnomalyFindings,
    records: &[Record],
    abnormal_timestamps: &[String],
) {
    let abnormal: HashSet<&str> = abnormal_timestamps.iter().map(String::as_str).collect();

    for r in records {
        let timestamp = r.text(RecordField::Timestamp);
        let port = r.text(RecordField::DestPort);

        if findings.abnormal_time_connections.len() < ABNORMAL_SAMPLE_LIMIT
            && abnormal.contains(timestamp)
        {
            findings.abnormal_time_connections.push(ConnectionSample {
                timestamp: timestamp.to_string(),
                process: r.text(RecordField::Process).to_string(),
                dest_ip: r.text(RecordField::DestIp).to_string(),
                dest_port: port.to_string(),
            });
        }

        if let Some(service) = classify::high_risk_service(port) {
            findings.high_risk_port_connections.push(HighRiskConnection {
                timestamp: timestamp.to_string(),
                process: r.text(RecordField::Process).to_string(),
                dest_ip: r.text(RecordField::DestIp).to_string(),
                dest_port: port.to_string(),
                service: service.to_string(),
            });
        }
    }
}

fn detect_uncommon_ports(findings: &mut AnomalyFindings, distribution: &[(String, u64)]) {
    let mut uncommon: Vec<&(String, u64)> = distribution
        .iter()
        .filter(|(port, _)| {
            !port.is_empty()
                && classify::classify_port(port) == classify::PortCategory::Unknown
        })
        .collect();

    findings.uncommon_ports_count = uncommon.len() as u64;
    uncommon.sort_by(|a, b| b.1.cmp(&a.1));
    findings.uncommon_ports = uncommon
        .into_iter()
        .take(UNCOMMON_PORT_LIMIT)
        .map(|(port, _)| port.clone())
        .collect();
}

fn detect_process_fan_out(findings: &mut AnomalyFindings, records: &[Record]) {
    // Processes and their IPs both kept in first-seen order.
    let mut order: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut index: HashMap<&str, (usize, HashSet<&str>)> = HashMap::new();

    for r in records {
        let (Some(process), Some(ip)) = (r.get(RecordField::Process), r.get(RecordField::DestIp)) else {
            continue;
        };
        if !classify::is_external(ip) {
            continue;
        }
        let (slot, seen) = index.entry(process).or_insert_with(|| {
            order.push((process, Vec::new()));
            (order.len() - 1, HashSet::new())
        });
        if seen.insert(ip) {
            order[*slot].1.push(ip);
        }
    }

    let mut suspicious: Vec<SuspiciousProcess> = order
        .into_iter()
        .filter(|(_, ips)| ips.len() > FAN_OUT_THRESHOLD)
        .map(|(process, ips)| SuspiciousProcess {
            process: process.to_string(),
            external_ip_count: ips.len() as u64,
            external_ips: ips.iter().take(FAN_OUT_SAMPLE_LIMIT).map(|s| s.to_string()).collect(),
        })
        .collect();
    suspicious.sort_by(|a, b| b.external_ip_count.cmp(&a.external_ip_count));

    for s in &suspicious {
        tracing::debug!(process = %s.process, ips = s.external_ip_count, "external fan-out");
    }
    findings.suspicious_process_ips = suspicious;
}

// ---------------------------------------------------------------------------
// Risk scoring
// ---------------------------------------------------------------------------

fn tiered(count: u64, high_cut: u64) -> u8 {
    if count > high_cut {
        2
    } else if count > 0 {
        1
    } else {
        0
    }
}

/// Additive three-rule score; 4 and up is high, 2 and up medium.
pub fn score_risk(high_risk_connections: u64, abnormal_time: u64, suspicious_processes: u64) -> RiskAssessment {
    let score = tiered(high_risk_connections, 5)
        + tiered(abnormal_time, 50)
        + tiered(suspicious_processes, 2);
    let level = match score {
        s if s >= 4 => RiskLevel::High,
        s if s >= 2 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    };
    RiskAssessment { score, level }
}

pub fn assess(findings: &AnomalyFindings) -> RiskAssessment {
    score_risk(
        findings.high_risk_port_connections.len() as u64,
        findings.abnormal_time_count,
        findings.suspicious_process_ips.len() as u64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{analyze_ports, analyze_time};

    fn rec(ts: &str, process: &str, ip: &str, port: &str) -> Record {
        Record {
            timestamp: Some(ts.into()),
            process: Some(process.into()),
            dest_ip: Some(ip.into()),
            dest_port: Some(port.into()),
            ..Default::default()
        }
    }

    fn detect(records: &[Record]) -> AnomalyFindings {
        let ts: Vec<&str> = records.iter().filter_map(|r| r.get(RecordField::Timestamp)).collect();
        let ports: Vec<&str> = records.iter().filter_map(|r| r.get(RecordField::DestPort)).collect();
        run_detection(records, &analyze_time(&ts), &analyze_ports(&ports))
    }

    #[test]
    fn test_score_risk_examples() {
        assert_eq!(score_risk(6, 0, 0), RiskAssessment { score: 2, level: RiskLevel::Medium });
        assert_eq!(score_risk(6, 51, 3), RiskAssessment { score: 6, level: RiskLevel::High });
        assert_eq!(score_risk(0, 0, 0), RiskAssessment { score: 0, level: RiskLevel::Low });
        assert_eq!(score_risk(1, 1, 0).level, RiskLevel::Medium);
        assert_eq!(score_risk(5, 50, 2), RiskAssessment { score: 3, level: RiskLevel::Medium });
        assert_eq!(score_risk(1, 1, 1).level, RiskLevel::Medium);
        assert_eq!(score_risk(6, 1, 1).level, RiskLevel::High);
    }

    #[test]
    fn test_abnormal_samples_capped() {
        let records: Vec<Record> = (0..15)
            .map(|i| rec(&format!("2024-01-08T23:{:02}:00", i), "a.exe", "8.8.8.8", "443"))
            .collect();
        let f = detect(&records);
        assert_eq!(f.abnormal_time_count, 15);
        assert_eq!(f.abnormal_time_connections.len(), 10);
        assert_eq!(f.abnormal_time_connections[0].timestamp, "2024-01-08T23:00:00");
    }

    #[test]
    fn test_every_high_risk_connection_kept() {
        let records: Vec<Record> = (0..25)
            .map(|_| rec("2024-01-08T10:00:00", "a.exe", "10.0.0.5", "445"))
            .collect();
        let f = detect(&records);
        assert_eq!(f.high_risk_port_connections.len(), 25);
        assert_eq!(f.high_risk_port_connections[0].service, "SMB");
        assert!(f.uncommon_ports.is_empty());
    }

    #[test]
    fn test_uncommon_ports_ranked() {
        let mut records = vec![rec("2024-01-08T10:00:00", "a.exe", "8.8.8.8", "9001")];
        for _ in 0..3 {
            records.push(rec("2024-01-08T10:00:00", "a.exe", "8.8.8.8", "7777"));
        }
        records.push(rec("2024-01-08T10:00:00", "a.exe", "8.8.8.8", "443"));
        records.push(rec("2024-01-08T10:00:00", "a.exe", "8.8.8.8", "135"));
        let f = detect(&records);
        assert_eq!(f.uncommon_ports_count, 2);
        assert_eq!(f.uncommon_ports, vec!["7777".to_string(), "9001".to_string()]);
    }

    #[test]
    fn test_fan_out_threshold_is_strict() {
        let mut records = Vec::new();
        for i in 0..5 {
            records.push(rec("2024-01-08T10:00:00", "five.exe", &format!("8.8.8.{i}"), "443"));
        }
        for i in 0..12 {
            records.push(rec("2024-01-08T10:00:00", "twelve.exe", &format!("1.1.1.{i}"), "443"));
            records.push(rec("2024-01-08T10:00:00", "twelve.exe", "192.168.0.1", "443"));
        }
        for i in 0..6 {
            records.push(rec("2024-01-08T10:00:00", "six.exe", &format!("9.9.9.{i}"), "443"));
        }
        let f = detect(&records);
        assert_eq!(f.suspicious_process_ips.len(), 2);
        let top = &f.suspicious_process_ips[0];
        assert_eq!(top.process, "twelve.exe");
        assert_eq!(top.external_ip_count, 12);
        assert_eq!(top.external_ips.len(), 10);
        assert_eq!(top.external_ips[0], "1.1.1.0");
        assert_eq!(f.suspicious_process_ips[1].external_ip_count, 6);
    }
}
