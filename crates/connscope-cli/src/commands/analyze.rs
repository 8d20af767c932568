use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use connscope_ai::{AiClient, AiConfig, AiProvider, LogCopilot};
use connscope_core::analyzer::{summary_text, LogAnalyzer};
use connscope_core::config::Config;
use connscope_core::ingest::{FileScanner, JsonlParser};
use connscope_core::models::AnalysisResult;
use connscope_core::report::{MarkdownReporter, SourceFile};
use connscope_core::threatintel::AbuseIpDbClient;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// JSONL file, or a directory searched recursively for *.jsonl
    pub path: PathBuf,

    /// Report output directory (overrides config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// AI provider: zhipu, qwen, kimi or openai (overrides config)
    #[arg(short, long)]
    pub model: Option<AiProvider>,

    /// Model name sent to the provider (overrides config)
    #[arg(long)]
    pub ai_model: Option<String>,

    /// Skip files larger than this many megabytes (overrides config)
    #[arg(long, value_parser = parse_size_mb)]
    pub max_size: Option<f64>,

    /// Skip the AI analysis step
    #[arg(long, default_value_t = false)]
    pub no_ai: bool,

    /// Skip AbuseIPDB lookups even when enabled in config
    #[arg(long, default_value_t = false)]
    pub no_threat_intel: bool,

    /// AbuseIPDB API key (enables threat intel for this run)
    #[arg(long)]
    pub abuseipdb_key: Option<String>,

    /// Also write the full analysis result as JSON next to the report
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

fn parse_size_mb(s: &str) -> Result<f64, String> {
    let mb: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if mb.is_finite() && mb > 0.0 {
        Ok(mb)
    } else {
        Err(format!("size must be a positive number of megabytes, got {s}"))
    }
}

/// Folds command-line overrides into the loaded config.
fn apply_args(config: &mut Config, args: &AnalyzeArgs) {
    if let Some(ref out) = args.output {
        config.output_dir = out.clone();
    }
    if let Some(provider) = args.model {
        if config.ai.provider.parse::<AiProvider>().ok() != Some(provider) {
            // Model and endpoint are provider-specific.
            config.ai.model = None;
            config.ai.api_base = None;
        }
        config.ai.provider = provider.to_string();
    }
    if let Some(ref model) = args.ai_model {
        config.ai.model = Some(model.clone());
    }
    if let Some(mb) = args.max_size {
        config.max_file_size_mb = mb;
    }
    if let Some(ref key) = args.abuseipdb_key {
        config.threat_intel.abuseipdb_api_key = Some(key.clone());
        config.threat_intel.enabled = true;
    }
    if args.no_threat_intel {
        config.threat_intel.enabled = false;
    }
}

pub fn run(args: AnalyzeArgs, config_path: Option<&Path>) -> Result<()> {
    let started = Instant::now();
    let mut config = Config::load(config_path)?;
    apply_args(&mut config, &args);

    // 1. Locate input files
    println!(
        "  {} {}",
        console::style("[1/4] scanning").cyan().bold(),
        args.path.display(),
    );

    let scanner = FileScanner::new();
    let files = scanner
        .scan(&args.path)
        .with_context(|| format!("failed to scan {}", args.path.display()))?;
    let files = scanner.filter_by_size(files, config.max_file_size_bytes());
    if files.is_empty() {
        anyhow::bail!("no .jsonl files to analyze under {}", args.path.display());
    }
    println!(
        "        {} file(s) within the {} MB limit",
        console::style(files.len()).green().bold(),
        config.max_file_size_mb,
    );

    // 2. Parse
    println!("  {}", console::style("[2/4] parsing").cyan().bold());

    let outcome = JsonlParser::from_config(&config).parse_files(&files);
    println!(
        "        {} records, {} errors",
        console::style(outcome.records.len()).green().bold(),
        outcome.errors.len(),
    );
    if !outcome.errors.is_empty() {
        for line in outcome.error_summary(5).lines() {
            println!("        {}", console::style(line).yellow());
        }
    }
    if outcome.records.is_empty() {
        println!(
            "  {} no valid records found",
            console::style("warning:").yellow().bold(),
        );
        return Ok(());
    }

    // 3. Analyze, with the reputation overlay when available
    println!("  {}", console::style("[3/4] analyzing").cyan().bold());

    let rt = tokio::runtime::Runtime::new()?;
    let intel = AbuseIpDbClient::new(&config.threat_intel)?;
    if config.threat_intel.enabled && !intel.has_key() {
        println!(
            "        {} threat intel enabled but no AbuseIPDB key set; skipping lookups",
            console::style("note:").yellow().bold(),
        );
    }
    let analyzer = LogAnalyzer::from_config(&config).with_threat_intel(intel.is_enabled());
    let result = rt.block_on(analyzer.analyze_with_threat_intel(&outcome.records, &intel));

    println!(
        "        risk: {} (score {})",
        console::style(result.risk.level).bold(),
        result.risk.score,
    );
    if let Some(ref ti) = result.threat_intel {
        println!(
            "        threat intel: {} queried, {} malicious, {} suspicious, {} errors",
            ti.query_count,
            console::style(ti.summary.malicious_count).red().bold(),
            console::style(ti.summary.suspicious_count).yellow(),
            ti.summary.error_count,
        );
    }

    // 4. AI review
    let ai_analysis = if args.no_ai {
        println!("  {}", console::style("[4/4] AI analysis skipped").dim());
        None
    } else {
        println!("  {}", console::style("[4/4] AI analysis").cyan().bold());
        rt.block_on(run_ai(&config, &result))
    };

    // Report
    let reporter = MarkdownReporter::new();
    let sources: Vec<SourceFile> = files.iter().map(|f| SourceFile::from_path(f)).collect();
    let markdown = reporter.render(&result, ai_analysis.as_deref(), &sources);
    let report_path = reporter.write(&config.output_dir, &markdown)?;

    let json_path = if args.json {
        let path = report_path.with_extension("json");
        let json = serde_json::to_string_pretty(&result).context("failed to serialize analysis result")?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    println!();
    println!(
        "  {} {}",
        console::style("report ->").green().bold(),
        report_path.display(),
    );
    if let Some(path) = json_path {
        println!(
            "  {} {}",
            console::style("json   ->").green().bold(),
            path.display(),
        );
    }
    println!();
    for line in summary_text(&result).lines() {
        println!("  {}", line);
    }
    println!();
    println!(
        "  {} {:.1}s",
        console::style("completed in").white().bold(),
        started.elapsed().as_secs_f64(),
    );

    Ok(())
}

/// AI failures are reported and swallowed; the report is written without
/// an AI section.
async fn run_ai(config: &Config, result: &AnalysisResult) -> Option<String> {
    let client = match AiConfig::from_section(&config.ai).and_then(AiClient::new) {
        Ok(client) => client,
        Err(e) => {
            println!(
                "        {} {e:#}",
                console::style("AI unavailable:").yellow().bold(),
            );
            return None;
        }
    };
    if !client.has_key() {
        println!(
            "        {} no AI API key configured (set AI_API_KEY); skipping",
            console::style("note:").yellow().bold(),
        );
        return None;
    }

    match LogCopilot::new(client).analyze(result).await {
        Ok(text) => {
            println!("        {}", console::style("AI analysis complete").green());
            Some(text)
        }
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "AI analysis failed");
            println!(
                "        {} {e:#}",
                console::style("AI analysis failed:").yellow().bold(),
            );
            None
        }
    }
}
