use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::style::{self, Stylize};
use imgscope::cache::CacheType;
use imgscope::{ApiError, Config, Endpoint, ImageReference, ImageService};
use serde_json::Value;

use crate::progress::Spinner;

/// Resolve one image without the HTTP layer and print what the
/// `/image-info` endpoint would return.
pub async fn run(config: Config, image: &str, json: bool) -> Result<()> {
    let reference = ImageReference::parse(image).context("Invalid image reference")?;
    let config = Config {
        cache_type: CacheType::Null,
        ..config
    };
    let service = ImageService::from_config(Arc::new(config));
    let access = service.config().access(None, None, None);

    let spinner = Spinner::start(format!("Inspecting {reference} ..."), json);
    let payload = match service
        .resolve(Endpoint::ImageInfo, &reference, &access)
        .await
    {
        Ok(payload) => {
            spinner.finish(format!("Inspected {reference}"));
            payload
        }
        Err(e) => {
            spinner.fail(format!("Could not inspect {reference}"));
            return Err(describe(e));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_summary(&reference, &payload);
    }
    Ok(())
}

fn describe(e: ApiError) -> anyhow::Error {
    let detail = match &e {
        ApiError::AuthOrNotFound { detail, .. } | ApiError::ToolFailure { detail, .. } => {
            Some(detail.clone())
        }
        _ => None,
    };
    match detail {
        Some(detail) => anyhow::anyhow!("{e}\n  {detail}"),
        None => e.into(),
    }
}

fn print_summary(reference: &ImageReference, payload: &Value) {
    let bytes = |key: &str| payload.get(key).and_then(Value::as_u64);

    println!("{}", style::style(reference).bold());
    if let Some(arch) = payload
        .pointer("/raw_data/Architecture")
        .and_then(Value::as_str)
    {
        println!("  {} {arch}", "arch:".dim());
    }
    if let Some(compressed) = bytes("compressed_size") {
        println!(
            "  {} {} ({compressed} bytes)",
            "compressed:".dim(),
            format_bytes(compressed)
        );
    }
    if let Some(size) = bytes("uncompressed_size") {
        println!("  {} {}", "uncompressed:".dim(), format_bytes(size));
    } else if let Some(size) = bytes("estimated_uncompressed_size") {
        println!(
            "  {} ~{} {}",
            "uncompressed:".dim(),
            format_bytes(size),
            "(estimated)".yellow()
        );
    }

    let ports: Vec<&str> = payload
        .get("exposed_ports")
        .and_then(Value::as_array)
        .map(|ports| ports.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if ports.is_empty() {
        println!("  {} {}", "ports:".dim(), "none".dim());
    } else {
        println!("  {} {}", "ports:".dim(), ports.join(", "));
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return if size.fract() < 0.05 {
                format!("{:.0} {unit}", size)
            } else {
                format!("{:.1} {unit}", size)
            };
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}
