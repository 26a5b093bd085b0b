use anyhow::Result;
use crossterm::style::{self, Stylize};
use imgscope::Config;
use imgscope::inspector::SkopeoInspector;
use serde_json::json;

/// Check that the configured inspector binary runs, and report its version.
pub async fn run(config: &Config, json: bool) -> Result<()> {
    let inspector = SkopeoInspector::new(config.inspector_cmd.clone(), config.inspect_timeout);
    let version = inspector.version().await;

    if json {
        let report = match &version {
            Ok(v) => json!({
                "inspector": inspector.command(),
                "available": true,
                "version": v,
            }),
            Err(e) => json!({
                "inspector": inspector.command(),
                "available": false,
                "error": e.to_string(),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &version {
            Ok(v) => println!(
                "{} {} {}",
                "✔".green(),
                style::style(inspector.command()).bold(),
                v.as_str().dim()
            ),
            Err(e) => println!(
                "{} {} {}",
                "✘".red(),
                style::style(inspector.command()).bold(),
                e.to_string().dim()
            ),
        }
        println!(
            "  {} {}",
            "Cache".dim(),
            format!("{} (ttl {}s)", config.cache_type, config.cache_ttl.as_secs())
        );
        println!(
            "  {} {}",
            "Auth".dim(),
            if config.api_key.is_some() { "api_key required" } else { "open" }
        );
    }

    if let Err(e) = version {
        anyhow::bail!("inspector '{}' is not runnable: {e}", inspector.command());
    }
    Ok(())
}
