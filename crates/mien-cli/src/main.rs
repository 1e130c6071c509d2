use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mien_core::types::{FaceRegion, TrainAnnotation};

// D-Bus proxy for the daemon. `#[zbus::proxy]` generates the async
// `MienProxy` used below.
#[zbus::proxy(
    interface = "org.freedesktop.Mien1",
    default_service = "org.freedesktop.Mien1",
    default_path = "/org/freedesktop/Mien1"
)]
trait Mien {
    async fn train(&self, image: &[u8], annotations: &str) -> zbus::Result<String>;
    async fn recognize(&self, image: &[u8], regions: &str) -> zbus::Result<String>;
    async fn clear(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "mien", about = "Mien face recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Teach the daemon labeled faces from an image
    Train {
        /// Path to the image file
        image: PathBuf,
        /// Labeled region, LABEL:X,Y,W,H (repeatable)
        #[arg(short, long = "annotation", value_name = "LABEL:X,Y,W,H", required = true)]
        annotations: Vec<String>,
    },
    /// Rank enrolled identities for regions of an image
    Recognize {
        /// Path to the image file
        image: PathBuf,
        /// Face region, X,Y,W,H (repeatable; whole frame when omitted)
        #[arg(short, long = "region", value_name = "X,Y,W,H")]
        regions: Vec<String>,
    },
    /// Drop every enrolled face
    Clear,
    /// Show daemon status
    Status,
}

/// Parse "X,Y,W,H" into a region.
fn parse_region_spec(spec: &str) -> Result<FaceRegion> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() != 4 {
        bail!("expected X,Y,W,H, got '{spec}'");
    }
    let mut values = [0u32; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .with_context(|| format!("bad region coordinate '{part}' in '{spec}'"))?;
    }
    Ok(FaceRegion {
        x: values[0],
        y: values[1],
        width: values[2],
        height: values[3],
    })
}

/// Parse "LABEL:X,Y,W,H" into a training annotation.
fn parse_annotation_spec(spec: &str) -> Result<TrainAnnotation> {
    let (label, region) = spec
        .split_once(':')
        .with_context(|| format!("expected LABEL:X,Y,W,H, got '{spec}'"))?;
    if label.is_empty() {
        bail!("label must be non-empty in '{spec}'");
    }
    Ok(TrainAnnotation {
        label: label.to_string(),
        region: parse_region_spec(region)?,
    })
}

/// Re-indent a JSON response for the terminal.
fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned bad JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::system()
        .await
        .context("connecting to the system bus — is miend running?")?;
    let proxy = MienProxy::new(&conn).await?;

    match cli.command {
        Commands::Train { image, annotations } => {
            let annotations = annotations
                .iter()
                .map(|spec| parse_annotation_spec(spec))
                .collect::<Result<Vec<_>>>()?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;

            let response = proxy
                .train(&bytes, &serde_json::to_string(&annotations)?)
                .await?;
            print_json(&response)?;
        }
        Commands::Recognize { image, regions } => {
            let regions = regions
                .iter()
                .map(|spec| parse_region_spec(spec))
                .collect::<Result<Vec<_>>>()?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;

            let response = proxy
                .recognize(&bytes, &serde_json::to_string(&regions)?)
                .await?;
            print_json(&response)?;
        }
        Commands::Clear => {
            proxy.clear().await?;
            println!("face store cleared");
        }
        Commands::Status => {
            let response = proxy.status().await?;
            print_json(&response)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_spec_parses() {
        let region = parse_region_spec("10,20,30,40").unwrap();
        assert_eq!(
            region,
            FaceRegion { x: 10, y: 20, width: 30, height: 40 }
        );
    }

    #[test]
    fn region_spec_allows_spaces() {
        assert!(parse_region_spec("1, 2, 3, 4").is_ok());
    }

    #[test]
    fn region_spec_rejects_wrong_arity() {
        assert!(parse_region_spec("1,2,3").is_err());
        assert!(parse_region_spec("1,2,3,4,5").is_err());
    }

    #[test]
    fn region_spec_rejects_non_numeric() {
        assert!(parse_region_spec("a,2,3,4").is_err());
    }

    #[test]
    fn annotation_spec_parses() {
        let annotation = parse_annotation_spec("alice:10,20,30,40").unwrap();
        assert_eq!(annotation.label, "alice");
        assert_eq!(annotation.region.height, 40);
    }

    #[test]
    fn annotation_spec_rejects_missing_label() {
        assert!(parse_annotation_spec("10,20,30,40").is_err());
        assert!(parse_annotation_spec(":10,20,30,40").is_err());
    }

    #[test]
    fn cli_args_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
