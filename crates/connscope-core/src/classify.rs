use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};

use crate::models::{DayPeriod, IpCategory};

// ---------------------------------------------------------------------------
// Static tables
// ---------------------------------------------------------------------------

pub const COMMON_PORTS: &[(&str, &str)] = &[
    ("80", "HTTP"),
    ("443", "HTTPS"),
    ("53", "DNS"),
    ("22", "SSH"),
    ("21", "FTP"),
    ("25", "SMTP"),
    ("110", "POP3"),
    ("143", "IMAP"),
    ("3306", "MySQL"),
    ("3389", "RDP"),
    ("1433", "MSSQL"),
    ("5432", "PostgreSQL"),
    ("6379", "Redis"),
    ("27017", "MongoDB"),
    ("8080", "HTTP-Alt"),
    ("8000", "HTTP-Dev"),
];

pub const HIGH_RISK_PORTS: &[(&str, &str)] = &[
    ("445", "SMB"),
    ("135", "RPC"),
    ("139", "NetBIOS"),
    ("23", "Telnet"),
    ("161", "SNMP"),
    ("69", "TFTP"),
];

/// Bare and `NT AUTHORITY\`-qualified built-in service accounts.
pub const PRIVILEGED_ACCOUNTS: &[&str] = &[
    "SYSTEM",
    "NT AUTHORITY\\SYSTEM",
    "NETWORK SERVICE",
    "NT AUTHORITY\\NETWORK SERVICE",
    "LOCAL SERVICE",
    "NT AUTHORITY\\LOCAL SERVICE",
];

const PRIVILEGED_MARKERS: &[&str] = &["SYSTEM", "NETWORK SERVICE", "LOCAL SERVICE"];

pub const UNKNOWN_SERVICE: &str = "unknown";

// ---------------------------------------------------------------------------
// IP addresses
// ---------------------------------------------------------------------------

/// Parses an address the way the log producer writes it: anything with a
/// `:` is IPv6 (an interface scope suffix is dropped), everything else IPv4.
pub fn parse_ip(ip: &str) -> Option<IpAddr> {
    if ip.contains(':') {
        let addr = ip.split('%').next().unwrap_or(ip);
        addr.parse::<Ipv6Addr>().ok().map(IpAddr::V6)
    } else {
        ip.parse::<Ipv4Addr>().ok().map(IpAddr::V4)
    }
}

pub fn classify_ip(ip: &str) -> IpCategory {
    match parse_ip(ip) {
        Some(addr) => classify_addr(&addr),
        None => IpCategory::Unknown,
    }
}

pub fn classify_addr(addr: &IpAddr) -> IpCategory {
    if addr.is_loopback() {
        IpCategory::Loopback
    } else if is_private(addr) {
        IpCategory::Internal
    } else if addr.is_multicast() {
        IpCategory::Multicast
    } else {
        IpCategory::External
    }
}

pub fn is_internal(ip: &str) -> bool {
    matches!(classify_ip(ip), IpCategory::Internal | IpCategory::Loopback)
}

pub fn is_external(ip: &str) -> bool {
    classify_ip(ip) == IpCategory::External
}

pub fn is_private(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn in_v4(addr: &Ipv4Addr, net: [u8; 4], prefix: u32) -> bool {
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    (u32::from(*addr) & mask) == (u32::from(Ipv4Addr::from(net)) & mask)
}

fn in_v6(addr: &Ipv6Addr, net: [u16; 8], prefix: u32) -> bool {
    let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
    (u128::from(*addr) & mask) == (u128::from(Ipv6Addr::from(net)) & mask)
}

// IANA special-purpose ranges treated as non-routable. 100.64.0.0/10 (CGNAT)
// is not included.
const PRIVATE_V4: &[([u8; 4], u32)] = &[
    ([0, 0, 0, 0], 8),
    ([10, 0, 0, 0], 8),
    ([127, 0, 0, 0], 8),
    ([169, 254, 0, 0], 16),
    ([172, 16, 0, 0], 12),
    ([192, 0, 0, 0], 29),
    ([192, 0, 0, 170], 31),
    ([192, 0, 2, 0], 24),
    ([192, 168, 0, 0], 16),
    ([198, 18, 0, 0], 15),
    ([198, 51, 100, 0], 24),
    ([203, 0, 113, 0], 24),
    ([240, 0, 0, 0], 4),
    ([255, 255, 255, 255], 32),
];

const PRIVATE_V6: &[([u16; 8], u32)] = &[
    ([0, 0, 0, 0, 0, 0, 0, 1], 128),
    ([0, 0, 0, 0, 0, 0, 0, 0], 128),
    ([0x100, 0, 0, 0, 0, 0, 0, 0], 64),
    ([0x2001, 0, 0, 0, 0, 0, 0, 0], 23),
    ([0x2001, 0xdb8, 0, 0, 0, 0, 0, 0], 32),
    ([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7),
    ([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10),
];

fn is_private_v4(addr: &Ipv4Addr) -> bool {
    PRIVATE_V4.iter().any(|(net, prefix)| in_v4(addr, *net, *prefix))
}

fn is_private_v6(addr: &Ipv6Addr) -> bool {
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    PRIVATE_V6.iter().any(|(net, prefix)| in_v6(addr, *net, *prefix))
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCategory {
    Named(&'static str),
    HighRisk(&'static str),
    Unknown,
}

fn lookup(table: &'static [(&'static str, &'static str)], port: &str) -> Option<&'static str> {
    table.iter().find(|(p, _)| *p == port).map(|(_, s)| *s)
}

/// Ports are matched as raw strings; `"0443"` is not `"443"`.
pub fn classify_port(port: &str) -> PortCategory {
    if port.is_empty() {
        return PortCategory::Unknown;
    }
    if let Some(s) = lookup(COMMON_PORTS, port) {
        PortCategory::Named(s)
    } else if let Some(s) = lookup(HIGH_RISK_PORTS, port) {
        PortCategory::HighRisk(s)
    } else {
        PortCategory::Unknown
    }
}

/// Well-known service name, or `"unknown"`. High-risk ports have no
/// well-known name; see [`high_risk_service`].
pub fn port_service(port: &str) -> &'static str {
    match classify_port(port) {
        PortCategory::Named(s) => s,
        _ => UNKNOWN_SERVICE,
    }
}

pub fn is_common_port(port: &str) -> bool {
    matches!(classify_port(port), PortCategory::Named(_))
}

pub fn is_high_risk_port(port: &str) -> bool {
    matches!(classify_port(port), PortCategory::HighRisk(_))
}

pub fn high_risk_service(port: &str) -> Option<&'static str> {
    match classify_port(port) {
        PortCategory::HighRisk(s) => Some(s),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Time of day
// ---------------------------------------------------------------------------

pub fn period_of_day(hour: u32) -> DayPeriod {
    match hour {
        0..=5 => DayPeriod::Dawn,
        6..=11 => DayPeriod::Morning,
        12..=17 => DayPeriod::Afternoon,
        18..=21 => DayPeriod::Evening,
        _ => DayPeriod::LateNight,
    }
}

pub fn is_night(hour: u32) -> bool {
    hour >= 22 || hour < 6
}

pub fn is_weekend(dt: &NaiveDateTime) -> bool {
    matches!(dt.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Night hours any day, or office hours falling on a weekend.
pub fn is_abnormal_time(dt: &NaiveDateTime) -> bool {
    let hour = dt.hour();
    is_night(hour) || (is_weekend(dt) && (9..18).contains(&hour))
}

// ---------------------------------------------------------------------------
// Processes and accounts
// ---------------------------------------------------------------------------

pub fn is_system_process(path: &str) -> bool {
    path.contains("Windows") || path.to_lowercase().contains("system32")
}

/// Substring test used when correlating a user with external traffic.
pub fn has_privileged_marker(user: &str) -> bool {
    PRIVILEGED_MARKERS.iter().any(|m| user.contains(m))
}

/// Exact match against [`PRIVILEGED_ACCOUNTS`].
pub fn is_privileged_account(user: &str) -> bool {
    PRIVILEGED_ACCOUNTS.contains(&user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_classify_ip_categories() {
        assert_eq!(classify_ip("192.168.1.10"), IpCategory::Internal);
        assert_eq!(classify_ip("10.0.0.1"), IpCategory::Internal);
        assert_eq!(classify_ip("172.20.3.4"), IpCategory::Internal);
        assert_eq!(classify_ip("127.0.0.1"), IpCategory::Loopback);
        assert_eq!(classify_ip("::1"), IpCategory::Loopback);
        assert_eq!(classify_ip("224.0.0.251"), IpCategory::Multicast);
        assert_eq!(classify_ip("ff02::1"), IpCategory::Multicast);
        assert_eq!(classify_ip("8.8.8.8"), IpCategory::External);
        assert_eq!(classify_ip("2606:4700::1111"), IpCategory::External);
        assert_eq!(classify_ip("fe80::1"), IpCategory::Internal);
        assert_eq!(classify_ip("fd12:3456::1"), IpCategory::Internal);
    }

    #[test]
    fn test_cgnat_is_external() {
        assert_eq!(classify_ip("100.64.1.1"), IpCategory::External);
    }

    #[test]
    fn test_ipv4_mapped_follows_embedded_address() {
        assert_eq!(classify_ip("::ffff:192.168.0.1"), IpCategory::Internal);
        assert_eq!(classify_ip("::ffff:8.8.8.8"), IpCategory::External);
    }

    #[test]
    fn test_classify_ip_is_total() {
        for input in ["", "not-an-ip", "999.1.1.1", "1.2.3", ":::", "01.2.3.4", "fe80::1%eth0"] {
            let cat = classify_ip(input);
            assert!(!(is_internal(input) && is_external(input)), "{input} -> {cat:?}");
        }
        assert_eq!(classify_ip("garbage"), IpCategory::Unknown);
        assert!(!is_internal("garbage"));
        assert!(!is_external("garbage"));
    }

    #[test]
    fn test_port_tables_are_disjoint() {
        for (port, _) in HIGH_RISK_PORTS {
            assert!(lookup(COMMON_PORTS, port).is_none());
        }
    }

    #[test]
    fn test_classify_port() {
        assert_eq!(classify_port("443"), PortCategory::Named("HTTPS"));
        assert_eq!(classify_port("445"), PortCategory::HighRisk("SMB"));
        assert_eq!(classify_port("51234"), PortCategory::Unknown);
        assert_eq!(classify_port(""), PortCategory::Unknown);
        assert_eq!(port_service("445"), UNKNOWN_SERVICE);
        assert_eq!(high_risk_service("23"), Some("Telnet"));
        assert!(!is_high_risk_port(""));
    }

    #[test]
    fn test_period_of_day_covers_every_hour() {
        assert_eq!(period_of_day(0), DayPeriod::Dawn);
        assert_eq!(period_of_day(5), DayPeriod::Dawn);
        assert_eq!(period_of_day(6), DayPeriod::Morning);
        assert_eq!(period_of_day(12), DayPeriod::Afternoon);
        assert_eq!(period_of_day(18), DayPeriod::Evening);
        assert_eq!(period_of_day(21), DayPeriod::Evening);
        assert_eq!(period_of_day(22), DayPeriod::LateNight);
        assert_eq!(period_of_day(23), DayPeriod::LateNight);
    }

    #[test]
    fn test_abnormal_time_rules() {
        // 2024-01-06 is a Saturday.
        assert!(is_abnormal_time(&at(2024, 1, 6, 23, 30)));
        assert!(is_abnormal_time(&at(2024, 1, 6, 10, 0)));
        assert!(!is_abnormal_time(&at(2024, 1, 6, 19, 0)));
        // Monday
        assert!(!is_abnormal_time(&at(2024, 1, 8, 10, 0)));
        assert!(is_abnormal_time(&at(2024, 1, 8, 3, 0)));
        assert!(!is_abnormal_time(&at(2024, 1, 8, 21, 59)));
    }

    #[test]
    fn test_weekend_office_hours_edges() {
        // 2024-01-07 is a Sunday.
        assert!(!is_abnormal_time(&at(2024, 1, 7, 8, 59)));
        assert!(is_abnormal_time(&at(2024, 1, 7, 9, 0)));
        assert!(is_abnormal_time(&at(2024, 1, 7, 17, 59)));
        assert!(!is_abnormal_time(&at(2024, 1, 7, 18, 0)));
        assert!(is_abnormal_time(&at(2024, 1, 7, 22, 0)));
        // Saturday edges
        assert!(is_abnormal_time(&at(2024, 1, 6, 9, 0)));
        assert!(is_abnormal_time(&at(2024, 1, 6, 17, 0)));
        assert!(!is_abnormal_time(&at(2024, 1, 6, 18, 0)));
        // Friday office hours are normal
        assert!(!is_abnormal_time(&at(2024, 1, 5, 17, 0)));
    }

    #[test]
    fn test_system_process() {
        assert!(is_system_process(r"C:\Windows\System32\svchost.exe"));
        assert!(is_system_process(r"D:\tools\SYSTEM32\x.exe"));
        assert!(!is_system_process(r"C:\Program Files\Google\chrome.exe"));
    }

    #[test]
    fn test_privileged_accounts() {
        assert!(is_privileged_account("NT AUTHORITY\\SYSTEM"));
        assert!(!is_privileged_account("nt authority\\system"));
        assert!(has_privileged_marker("NT AUTHORITY\\NETWORK SERVICE"));
        assert!(!has_privileged_marker("alice"));
    }
}
