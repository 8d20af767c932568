use std::path::Path;

use anyhow::Result;
use clap::{ArgGroup, Args};

use connscope_core::config::Config;
use connscope_core::models::{ReputationClass, ReputationVerdict, ThreatIntelReport};
use connscope_core::threatintel::{classify_score, AbuseIpDbClient, ReputationLookup, MAX_RANGE_HOSTS};

#[derive(Args)]
#[command(group(ArgGroup::new("target").required(true).args(["ip", "range"])))]
pub struct IntelArgs {
    /// Single address to check
    #[arg(long)]
    pub ip: Option<String>,

    /// CIDR range to check (at most 256 hosts are queried)
    #[arg(long)]
    pub range: Option<String>,

    /// AbuseIPDB API key (overrides config and ABUSEIPDB_API_KEY)
    #[arg(long)]
    pub abuseipdb_key: Option<String>,

    /// Print raw verdicts as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn run(args: IntelArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(key) = args.abuseipdb_key.clone() {
        config.threat_intel.abuseipdb_api_key = Some(key);
    }

    let client = AbuseIpDbClient::new(&config.threat_intel)?;
    if !client.has_key() {
        anyhow::bail!("no AbuseIPDB API key configured. Set ABUSEIPDB_API_KEY or pass --abuseipdb-key");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let verdicts = if let Some(ref ip) = args.ip {
        println!("  {} {}", console::style("checking").cyan().bold(), ip);
        vec![rt.block_on(client.check_ip(ip))]
    } else if let Some(ref range) = args.range {
        println!(
            "  {} {} (up to {} hosts)",
            console::style("checking range").cyan().bold(),
            range,
            MAX_RANGE_HOSTS,
        );
        rt.block_on(client.check_ip_range(range))
    } else {
        Vec::new()
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verdicts)?);
        return Ok(());
    }

    println!();
    for verdict in &verdicts {
        print_verdict(verdict);
    }

    if verdicts.len() > 1 {
        let report = ThreatIntelReport::from_verdicts(verdicts);
        let s = &report.summary;
        println!();
        println!(
            "  {} {} queried, {} malicious, {} suspicious, {} clean, {} errors (risk: {})",
            console::style("summary:").white().bold(),
            s.total_queried,
            console::style(s.malicious_count).red().bold(),
            console::style(s.suspicious_count).yellow(),
            s.clean_count,
            s.error_count,
            s.risk_level,
        );
    }
    Ok(())
}

fn print_verdict(verdict: &ReputationVerdict) {
    match (&verdict.data, &verdict.error) {
        (Some(data), _) => {
            let label = match classify_score(data.confidence_score) {
                ReputationClass::Malicious => console::style("MALICIOUS").red().bold(),
                ReputationClass::Suspicious => console::style("SUSPICIOUS").yellow().bold(),
                ReputationClass::Clean => console::style("clean").green(),
            };
            println!(
                "  {:<40} {} score={} reports={} country={}",
                verdict.ip,
                label,
                data.confidence_score,
                data.total_reports,
                data.country.as_deref().unwrap_or("-"),
            );
            if !data.threat_types.is_empty() {
                println!("  {:<40} types: {}", "", data.threat_types.join(", "));
            }
        }
        (None, error) => {
            println!(
                "  {:<40} {} {}",
                verdict.ip,
                console::style("error").red(),
                error.as_deref().unwrap_or("unknown error"),
            );
        }
    }
}
