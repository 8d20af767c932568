//! Per-dimension summaries over a materialized record set.
//!
//! Every analyzer takes the pre-extracted values of its own field and, where
//! it correlates fields, the full record slice. None of them allocate into or
//! retain references to their input.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::classify;
use crate::models::*;
use crate::stats::{percentage, Distribution};
use crate::timestamp::{format_timestamp, parse_timestamp};

pub const TOP_PROCESSES: usize = 10;
pub const TOP_USERS: usize = 10;
pub const TOP_IPS: usize = 20;
pub const TOP_PORTS: usize = 20;
pub const TOP_DOMAINS: usize = 10;
pub const TOP_PRIVILEGED: usize = 10;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub fn analyze_time(timestamps: &[&str]) -> TimeAnalysis {
    let parsed: Vec<_> = timestamps.iter().map(|ts| parse_timestamp(ts)).collect();
    let walls: Vec<NaiveDateTime> = parsed.iter().map(|p| p.wall).collect();
    let fallback_count = parsed.iter().filter(|p| p.fallback).count() as u64;

    let hours = Distribution::from_values(walls.iter().map(|dt| dt.hour()));
    let dates = Distribution::from_values(walls.iter().map(|dt| {
        format!("{:04}-{:02}-{:02}", dt.year(), dt.month(), dt.day())
    }));
    let periods = Distribution::from_values(walls.iter().map(|dt| classify::period_of_day(dt.hour())));

    let abnormal_timestamps: Vec<String> = timestamps
        .iter()
        .zip(&walls)
        .filter(|(_, dt)| classify::is_abnormal_time(dt))
        .map(|(ts, _)| ts.to_string())
        .collect();
    let abnormal_time_count = abnormal_timestamps.len() as u64;

    let peak_hour = hours.most_common().map(|(h, c)| (*h, c)).unwrap_or((0, 0));

    if fallback_count > 0 {
        tracing::warn!(fallback_count, "timestamps replaced with current time");
    }

    TimeAnalysis {
        time_range: time_range(&walls),
        hour_distribution: hours.into_entries(),
        date_distribution: dates.into_entries(),
        period_distribution: periods.into_entries(),
        peak_hour,
        abnormal_time_count,
        abnormal_time_percentage: percentage(abnormal_time_count, timestamps.len() as u64),
        fallback_count,
        abnormal_timestamps,
    }
}

fn time_range(walls: &[NaiveDateTime]) -> TimeRange {
    let (Some(start), Some(end)) = (walls.iter().min(), walls.iter().max()) else {
        return TimeRange::default();
    };
    let seconds = (*end - *start).num_milliseconds() as f64 / 1000.0;
    TimeRange {
        start: Some(*start),
        end: Some(*end),
        start_str: Some(format_timestamp(start)),
        end_str: Some(format_timestamp(end)),
        duration_seconds: seconds,
        duration_hours: seconds / 3600.0,
        duration_days: seconds / 86400.0,
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

pub fn analyze_processes(processes: &[&str], records: &[Record]) -> ProcessAnalysis {
    let total = processes.len() as u64;
    let dist = Distribution::from_values(processes.iter().copied());
    let system = processes.iter().filter(|p| classify::is_system_process(p)).count() as u64;
    let application = total - system;

    let privileged: Distribution<&str> = records
        .iter()
        .filter(|r| classify::has_privileged_marker(r.text(RecordField::User)))
        .filter_map(|r| {
            let process = r.get(RecordField::Process)?;
            let ip = r.get(RecordField::DestIp)?;
            classify::is_external(ip).then_some(process)
        })
        .collect();

    ProcessAnalysis {
        total,
        unique_count: dist.unique(),
        top_processes: dist.top_n_owned(TOP_PROCESSES),
        system_process_count: system,
        application_process_count: application,
        system_percentage: percentage(system, total),
        application_percentage: percentage(application, total),
        privileged_external_connections: privileged.top_n_owned(TOP_PRIVILEGED),
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

pub fn analyze_users(users: &[&str]) -> UserAnalysis {
    let total = users.len() as u64;
    let dist = Distribution::from_values(users.iter().copied());
    let privileged_count = dist
        .iter()
        .filter(|(user, _)| classify::is_privileged_account(user))
        .map(|(_, count)| count)
        .sum();

    UserAnalysis {
        total,
        unique_count: dist.unique(),
        top_users: dist.top_n_owned(TOP_USERS),
        privileged_count,
        privileged_percentage: percentage(privileged_count, total),
    }
}

// ---------------------------------------------------------------------------
// IP
// ---------------------------------------------------------------------------

pub fn analyze_ips(ips: &[&str]) -> IpAnalysis {
    let total = ips.len() as u64;
    let dist = Distribution::from_values(ips.iter().copied());

    let mut summary = IpAnalysis {
        total,
        unique_count: dist.unique(),
        top_ips: dist.top_n_owned(TOP_IPS),
        ..Default::default()
    };

    for ip in ips {
        match classify::parse_ip(ip) {
            Some(std::net::IpAddr::V4(_)) => summary.ipv4_count += 1,
            Some(std::net::IpAddr::V6(_)) => summary.ipv6_count += 1,
            None => {}
        }
        match classify::classify_ip(ip) {
            IpCategory::Internal | IpCategory::Loopback => summary.internal_count += 1,
            IpCategory::External => summary.external_count += 1,
            IpCategory::Multicast | IpCategory::Unknown => {}
        }
    }
    summary.internal_percentage = percentage(summary.internal_count, total);
    summary.external_percentage = percentage(summary.external_count, total);
    summary
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

pub fn analyze_ports(ports: &[&str]) -> PortAnalysis {
    let total = ports.len() as u64;
    let dist = Distribution::from_values(ports.iter().copied());
    let top_ports = dist.top_n_owned(TOP_PORTS);

    let port_details = top_ports
        .iter()
        .map(|(port, count)| PortDetail {
            port: port.clone(),
            count: *count,
            service: classify::port_service(port).to_string(),
            is_high_risk: classify::is_high_risk_port(port),
            high_risk_service: classify::high_risk_service(port).map(String::from),
        })
        .collect();

    let common_port_count: u64 = dist
        .iter()
        .filter(|(port, _)| classify::is_common_port(port))
        .map(|(_, count)| count)
        .sum();
    let high_risk_port_count: u64 = classify::HIGH_RISK_PORTS.iter().map(|(p, _)| dist.get(p)).sum();

    PortAnalysis {
        total,
        unique_count: dist.unique(),
        top_ports,
        distribution: dist.to_owned_entries(),
        port_details,
        common_port_count,
        common_port_percentage: percentage(common_port_count, total),
        high_risk_port_count,
        high_risk_port_percentage: percentage(high_risk_port_count, total),
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

pub fn analyze_protocols(protocols: &[&str]) -> ProtocolAnalysis {
    let total = protocols.len() as u64;
    let dist = Distribution::from_values(protocols.iter().copied());
    let tcp_count = dist.get(&"tcp");
    let udp_count = dist.get(&"udp");

    ProtocolAnalysis {
        total,
        distribution: dist.to_owned_entries(),
        tcp_count,
        udp_count,
        tcp_percentage: percentage(tcp_count, total),
        udp_percentage: percentage(udp_count, total),
    }
}

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// Takes the domain column including blanks so the empty share is visible.
pub fn analyze_domains(domains: &[&str]) -> DomainAnalysis {
    let total = domains.len() as u64;
    let dist = Distribution::non_empty(domains.iter().copied());
    let non_empty_count = dist.total();

    if non_empty_count == 0 {
        return DomainAnalysis {
            total,
            empty_count: total,
            ..Default::default()
        };
    }

    DomainAnalysis {
        total,
        non_empty_count,
        empty_count: total - non_empty_count,
        unique_count: dist.unique(),
        top_domains: dist.top_n_owned(TOP_DOMAINS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(user: &str, process: &str, ip: &str) -> Record {
        Record {
            user: Some(user.into()),
            process: Some(process.into()),
            dest_ip: Some(ip.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_time_analysis() {
        let ts = [
            "2024-01-08T10:00:00",
            "2024-01-08T10:30:00",
            "2024-01-08T23:00:00",
            "2024-01-06T11:00:00",
        ];
        let t = analyze_time(&ts);
        assert_eq!(t.peak_hour, (10, 2));
        assert_eq!(t.abnormal_time_count, 2);
        assert_eq!(t.abnormal_timestamps, vec!["2024-01-08T23:00:00", "2024-01-06T11:00:00"]);
        assert!((t.abnormal_time_percentage - 50.0).abs() < 1e-9);
        assert_eq!(t.time_range.start_str.as_deref(), Some("2024-01-06 11:00:00"));
        assert_eq!(t.time_range.end_str.as_deref(), Some("2024-01-08 23:00:00"));
        assert!((t.time_range.duration_hours - 60.0).abs() < 1e-9);
        assert_eq!(t.date_distribution[0], ("2024-01-08".to_string(), 3));
        assert_eq!(t.fallback_count, 0);
    }

    #[test]
    fn test_peak_hour_tie_prefers_first_seen() {
        let ts = ["2024-01-08T14:00:00", "2024-01-08T09:00:00", "2024-01-08T09:10:00", "2024-01-08T14:20:00"];
        assert_eq!(analyze_time(&ts).peak_hour, (14, 2));
    }

    #[test]
    fn test_time_analysis_empty() {
        let t = analyze_time(&[]);
        assert_eq!(t.peak_hour, (0, 0));
        assert_eq!(t.abnormal_time_count, 0);
        assert_eq!(t.abnormal_time_percentage, 0.0);
        assert!(t.time_range.start.is_none());
    }

    #[test]
    fn test_unparseable_timestamp_counts_as_fallback() {
        let t = analyze_time(&["not a time", "2024-01-08T10:00:00"]);
        assert_eq!(t.fallback_count, 1);
        let hours: u64 = t.hour_distribution.iter().map(|(_, c)| c).sum();
        assert_eq!(hours, 2);
    }

    #[test]
    fn test_process_analysis() {
        let procs = [
            r"C:\Windows\System32\svchost.exe",
            r"C:\Program Files\app.exe",
            r"C:\Windows\System32\svchost.exe",
        ];
        let records = vec![
            rec("NT AUTHORITY\\SYSTEM", procs[0], "8.8.8.8"),
            rec("alice", procs[1], "1.1.1.1"),
            rec("NT AUTHORITY\\SYSTEM", procs[2], "192.168.1.1"),
        ];
        let p = analyze_processes(&procs, &records);
        assert_eq!(p.total, 3);
        assert_eq!(p.unique_count, 2);
        assert_eq!(p.system_process_count, 2);
        assert_eq!(p.application_process_count, 1);
        assert_eq!(
            p.privileged_external_connections,
            vec![(procs[0].to_string(), 1)]
        );
    }

    #[test]
    fn test_user_analysis_counts_privileged_variants() {
        let users = ["SYSTEM", "NT AUTHORITY\\LOCAL SERVICE", "bob", "bob", "system"];
        let u = analyze_users(&users);
        assert_eq!(u.privileged_count, 2);
        assert_eq!(u.top_users[0], ("bob".to_string(), 2));
        assert!((u.privileged_percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_ip_analysis() {
        let ips = ["10.0.0.1", "127.0.0.1", "8.8.8.8", "2606:4700::1111", "bogus", "224.0.0.1"];
        let a = analyze_ips(&ips);
        assert_eq!(a.total, 6);
        assert_eq!(a.ipv4_count, 4);
        assert_eq!(a.ipv6_count, 1);
        assert_eq!(a.internal_count, 2);
        assert_eq!(a.external_count, 2);
        assert!(a.internal_percentage + a.external_percentage <= 100.0);
    }

    #[test]
    fn test_ip_analysis_scoped_ipv6() {
        let ips = ["fe80::1%eth0", "fe80::abcd%12", "2606:4700::1111%2", "::1", "fe80::1%"];
        let a = analyze_ips(&ips);
        assert_eq!(a.total, 5);
        assert_eq!(a.ipv6_count, 5);
        assert_eq!(a.ipv4_count, 0);
        assert_eq!(a.internal_count, 4);
        assert_eq!(a.external_count, 1);
        assert_eq!(a.unique_count, 5);
    }

    #[test]
    fn test_port_analysis() {
        let ports = ["443", "445", "443", "50000", "80"];
        let p = analyze_ports(&ports);
        assert_eq!(p.common_port_count, 3);
        assert_eq!(p.high_risk_port_count, 1);
        assert_eq!(p.port_details[0].port, "443");
        assert_eq!(p.port_details[0].service, "HTTPS");
        let smb = p.port_details.iter().find(|d| d.port == "445").unwrap();
        assert!(smb.is_high_risk);
        assert_eq!(smb.high_risk_service.as_deref(), Some("SMB"));
        assert_eq!(smb.service, "unknown");
    }

    #[test]
    fn test_port_details_limited_to_top_ports() {
        let owned: Vec<String> = (1000..1030).map(|p| p.to_string()).collect();
        let ports: Vec<&str> = owned.iter().map(String::as_str).collect();
        let p = analyze_ports(&ports);
        assert_eq!(p.port_details.len(), TOP_PORTS);
        assert_eq!(p.distribution.len(), 30);
    }

    #[test]
    fn test_protocol_analysis_is_case_sensitive() {
        let p = analyze_protocols(&["tcp", "udp", "TCP", "tcp", "icmp"]);
        assert_eq!(p.tcp_count, 2);
        assert_eq!(p.udp_count, 1);
        assert!((p.tcp_percentage - 40.0).abs() < 1e-9);
        assert_eq!(p.distribution.len(), 4);
    }

    #[test]
    fn test_domain_analysis() {
        let d = analyze_domains(&["a.com", "", "b.com", "a.com"]);
        assert_eq!(d.total, 4);
        assert_eq!(d.non_empty_count, 3);
        assert_eq!(d.empty_count, 1);
        assert_eq!(d.unique_count, 2);

        let d = analyze_domains(&["", ""]);
        assert_eq!(d.non_empty_count, 0);
        assert_eq!(d.empty_count, 2);
        assert!(d.top_domains.is_empty());
    }
}
