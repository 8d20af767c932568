use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Record: one connection event, the only input the engine accepts
// ---------------------------------------------------------------------------

/// A single connection-log entry as decoded from one JSONL line.
///
/// Every field is optional. Unknown keys in the source object are ignored.
/// Numbers are kept as their decimal text so that `dest_port: 443` and
/// `dest_port: "443"` compare equal downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dest_ip: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dest_port: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    Timestamp,
    Process,
    CommandLine,
    User,
    DestIp,
    DestPort,
    Protocol,
    Domain,
    Source,
}

impl RecordField {
    pub const ALL: [RecordField; 9] = [
        RecordField::Timestamp,
        RecordField::Process,
        RecordField::CommandLine,
        RecordField::User,
        RecordField::DestIp,
        RecordField::DestPort,
        RecordField::Protocol,
        RecordField::Domain,
        RecordField::Source,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            RecordField::Timestamp => "timestamp",
            RecordField::Process => "process",
            RecordField::CommandLine => "command_line",
            RecordField::User => "user",
            RecordField::DestIp => "dest_ip",
            RecordField::DestPort => "dest_port",
            RecordField::Protocol => "protocol",
            RecordField::Domain => "domain",
            RecordField::Source => "source",
        }
    }
}

impl Record {
    /// The field's value, or `None` when it is absent or empty.
    pub fn get(&self, field: RecordField) -> Option<&str> {
        let value = match field {
            RecordField::Timestamp => &self.timestamp,
            RecordField::Process => &self.process,
            RecordField::CommandLine => &self.command_line,
            RecordField::User => &self.user,
            RecordField::DestIp => &self.dest_ip,
            RecordField::DestPort => &self.dest_port,
            RecordField::Protocol => &self.protocol,
            RecordField::Domain => &self.domain,
            RecordField::Source => &self.source,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Like [`Record::get`] but yields `""` for missing values.
    pub fn text(&self, field: RecordField) -> &str {
        self.get(field).unwrap_or("")
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Classification outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IpCategory {
    Internal,
    External,
    Loopback,
    Multicast,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DayPeriod {
    Dawn,
    Morning,
    Afternoon,
    Evening,
    LateNight,
}

impl DayPeriod {
    pub const ALL: [DayPeriod; 5] = [
        DayPeriod::Dawn,
        DayPeriod::Morning,
        DayPeriod::Afternoon,
        DayPeriod::Evening,
        DayPeriod::LateNight,
    ];
}

impl std::fmt::Display for DayPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dawn => write!(f, "dawn (00-06)"),
            Self::Morning => write!(f, "morning (06-12)"),
            Self::Afternoon => write!(f, "afternoon (12-18)"),
            Self::Evening => write!(f, "evening (18-22)"),
            Self::LateNight => write!(f, "late night (22-24)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// ---------------------------------------------------------------------------
// Dimension summaries
// ---------------------------------------------------------------------------

/// `(value, count)` pairs, count descending, ties in first-seen order.
pub type RankedList<T> = Vec<(T, u64)>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_count: u64,
    pub unique_ips: u64,
    pub unique_users: u64,
    pub unique_processes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub start_str: Option<String>,
    pub end_str: Option<String>,
    pub duration_seconds: f64,
    pub duration_hours: f64,
    pub duration_days: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeAnalysis {
    pub time_range: TimeRange,
    pub hour_distribution: Vec<(u32, u64)>,
    pub date_distribution: Vec<(String, u64)>,
    pub period_distribution: Vec<(DayPeriod, u64)>,
    pub peak_hour: (u32, u64),
    pub abnormal_time_count: u64,
    pub abnormal_time_percentage: f64,
    /// Timestamps that could not be parsed and were read as "now".
    pub fallback_count: u64,
    /// Raw abnormal timestamps in input order; consumed by the detector.
    #[serde(skip)]
    pub abnormal_timestamps: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessAnalysis {
    pub total: u64,
    pub unique_count: u64,
    pub top_processes: RankedList<String>,
    pub system_process_count: u64,
    pub application_process_count: u64,
    pub system_percentage: f64,
    pub application_percentage: f64,
    pub privileged_external_connections: RankedList<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAnalysis {
    pub total: u64,
    pub unique_count: u64,
    pub top_users: RankedList<String>,
    pub privileged_count: u64,
    pub privileged_percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpAnalysis {
    pub total: u64,
    pub unique_count: u64,
    pub top_ips: RankedList<String>,
    pub ipv4_count: u64,
    pub ipv6_count: u64,
    pub internal_count: u64,
    pub external_count: u64,
    pub internal_percentage: f64,
    pub external_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortDetail {
    pub port: String,
    pub count: u64,
    pub service: String,
    pub is_high_risk: bool,
    pub high_risk_service: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortAnalysis {
    pub total: u64,
    pub unique_count: u64,
    pub top_ports: RankedList<String>,
    /// Full port distribution in first-seen order.
    pub distribution: Vec<(String, u64)>,
    pub port_details: Vec<PortDetail>,
    pub common_port_count: u64,
    pub common_port_percentage: f64,
    pub high_risk_port_count: u64,
    pub high_risk_port_percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolAnalysis {
    pub total: u64,
    pub distribution: Vec<(String, u64)>,
    pub tcp_count: u64,
    pub udp_count: u64,
    pub tcp_percentage: f64,
    pub udp_percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainAnalysis {
    pub total: u64,
    pub non_empty_count: u64,
    pub empty_count: u64,
    pub unique_count: u64,
    pub top_domains: RankedList<String>,
}

// ---------------------------------------------------------------------------
// Anomalies and risk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSample {
    pub timestamp: String,
    pub process: String,
    pub dest_ip: String,
    pub dest_port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HighRiskConnection {
    pub timestamp: String,
    pub process: String,
    pub dest_ip: String,
    pub dest_port: String,
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuspiciousProcess {
    pub process: String,
    pub external_ip_count: u64,
    /// At most ten of the distinct addresses, first-seen order.
    pub external_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyFindings {
    pub abnormal_time_connections: Vec<ConnectionSample>,
    pub abnormal_time_count: u64,
    pub high_risk_port_connections: Vec<HighRiskConnection>,
    pub suspicious_process_ips: Vec<SuspiciousProcess>,
    pub uncommon_ports_count: u64,
    pub uncommon_ports: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
}

// ---------------------------------------------------------------------------
// Reputation overlay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReputationData {
    pub confidence_score: u8,
    pub threat_types: Vec<String>,
    pub country: Option<String>,
    pub total_reports: u64,
    pub first_reported: Option<String>,
    pub last_reported: Option<String>,
}

/// Outcome of looking up one address with a reputation provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReputationVerdict {
    pub ip: String,
    pub success: bool,
    pub data: Option<ReputationData>,
    pub error: Option<String>,
    pub query_time: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReputationClass {
    Malicious,
    Suspicious,
    Clean,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlaggedIp {
    pub ip: String,
    pub threat_type: String,
    pub confidence_score: u8,
    pub country: String,
    pub total_reports: u64,
    pub first_reported: String,
    pub last_reported: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanIp {
    pub ip: String,
    pub confidence_score: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupFailure {
    pub ip: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatIntelSummary {
    pub total_queried: u64,
    pub malicious_count: u64,
    pub suspicious_count: u64,
    pub clean_count: u64,
    pub error_count: u64,
    pub malicious_percentage: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatIntelReport {
    pub query_count: u64,
    pub malicious_ips: Vec<FlaggedIp>,
    pub suspicious_ips: Vec<FlaggedIp>,
    pub clean_ips: Vec<CleanIp>,
    pub errors: Vec<LookupFailure>,
    pub summary: ThreatIntelSummary,
}

// ---------------------------------------------------------------------------
// AnalysisResult: top-level container, primary API contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: AnalysisSummary,
    pub time_analysis: TimeAnalysis,
    pub process_analysis: ProcessAnalysis,
    pub user_analysis: UserAnalysis,
    pub ip_analysis: IpAnalysis,
    pub port_analysis: PortAnalysis,
    pub protocol_analysis: ProtocolAnalysis,
    pub domain_analysis: DomainAnalysis,
    pub anomalies: AnomalyFindings,
    pub risk: RiskAssessment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_intel: Option<ThreatIntelReport>,
}

impl AnalysisResult {
    /// Looks up `ip` in the malicious list of the reputation overlay.
    pub fn malicious_entry(&self, ip: &str) -> Option<&FlaggedIp> {
        self.threat_intel
            .as_ref()
            .and_then(|ti| ti.malicious_ips.iter().find(|m| m.ip == ip))
    }
}

/// Last path component of a Windows or POSIX process path.
pub fn process_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ignores_unknown_fields() {
        let rec: Record = serde_json::from_str(
            r#"{"dest_ip":"8.8.8.8","dest_port":53,"pid":1234,"domain":null,"extra":{"a":1}}"#,
        )
        .unwrap();
        assert_eq!(rec.dest_ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(rec.dest_port.as_deref(), Some("53"));
        assert_eq!(rec.domain, None);
        assert_eq!(rec.get(RecordField::Timestamp), None);
    }

    #[test]
    fn test_only_strings_and_numbers_are_kept() {
        let rec: Record = serde_json::from_str(
            r#"{"dest_port":443.0,"protocol":true,"user":false,"source":["a"],"process":"x.exe"}"#,
        )
        .unwrap();
        assert_eq!(rec.dest_port.as_deref(), Some("443.0"));
        assert_eq!(rec.protocol, None);
        assert_eq!(rec.user, None);
        assert_eq!(rec.source, None);
        assert_eq!(rec.process.as_deref(), Some("x.exe"));
    }

    #[test]
    fn test_empty_string_reads_as_missing() {
        let rec = Record {
            user: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(rec.get(RecordField::User), None);
        assert_eq!(rec.text(RecordField::User), "");
    }

    #[test]
    fn test_process_name() {
        assert_eq!(process_name(r"C:\Windows\System32\svchost.exe"), "svchost.exe");
        assert_eq!(process_name("/usr/bin/curl"), "curl");
        assert_eq!(process_name("chrome.exe"), "chrome.exe");
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(RiskLevel::default(), RiskLevel::Low);
    }
}
