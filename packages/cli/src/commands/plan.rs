use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::json;
use trellis_common::DefDescriptor;
use trellis_loader::{DefinitionRequests, PlannedUri, TrustBucket, UriPlanner};
use trellis_runtime::RuntimeConfig;

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Descriptors to request (`ns:name` or `markup://ns:name`), optionally tagged `=uid`
    #[arg(required = true)]
    pub descriptors: Vec<String>,

    /// Directory containing trellis.config.json (defaults to current directory)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Print the planned requests as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn plan(args: PlanArgs, cwd: &str) -> Result<()> {
    let config = RuntimeConfig::load(args.config.as_deref().unwrap_or(cwd))?;
    let requests = parse_requests(&args.descriptors)?;
    let planner = UriPlanner::new(config.loader);
    let planned = planner.plan(&requests);
    tracing::debug!(requests = requests.len(), uris = planned.len(), "planned definition requests");

    if args.json {
        let output: Vec<serde_json::Value> = planned.iter().map(to_json).collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "🔗 Planning definition requests...".bright_blue().bold());
    println!(
        "   {} descriptors, descriptor budget {} characters",
        requests.len(),
        planner.max_length()
    );
    println!();

    for uri in &planned {
        let bucket = match uri.bucket {
            TrustBucket::Restricted => "restricted".yellow(),
            TrustBucket::Unrestricted => "unrestricted".green(),
        };
        println!("  {} [{}] {}", "✓".green(), bucket, uri.uri);
        for descriptor in &uri.descriptors {
            println!("      {}", descriptor.to_string().dimmed());
        }
    }

    println!();
    println!("{} {} request(s)", "Planned".green().bold(), planned.len());
    Ok(())
}

fn to_json(uri: &PlannedUri) -> serde_json::Value {
    json!({
        "uri": uri.uri,
        "token": uri.token,
        "cacheable": uri.cacheable,
        "restricted": uri.bucket == TrustBucket::Restricted,
        "descriptors": uri.descriptors.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
    })
}

/// Parses `descriptor[=uid]` arguments
fn parse_requests(raw: &[String]) -> Result<DefinitionRequests> {
    let mut requests = DefinitionRequests::new();
    for entry in raw {
        let (descriptor, uid) = match entry.split_once('=') {
            Some((descriptor, uid)) => (descriptor, Some(uid.to_string())),
            None => (entry.as_str(), None),
        };
        requests.insert(DefDescriptor::parse(descriptor)?, uid);
    }
    Ok(requests)
}
