use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facewatch_core::{annotate, BoundingBox, FaceReport, Frame, GalleryManifest, Identification, MatchResult};
use facewatch_hw::Camera;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[zbus::proxy(
    interface = "org.facewatch.Identify1",
    default_service = "org.facewatch.Identify1",
    default_path = "/org/facewatch/Identify1"
)]
trait Identify {
    async fn process_frame(&self, image: &[u8]) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<Vec<String>>;
}

#[derive(Parser)]
#[command(name = "facewatch", about = "Facewatch face identification CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify faces in an image file via the daemon
    Identify {
        image: PathBuf,
        /// Write a copy of the image with face boxes drawn on it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List gallery identities loaded by the daemon
    Identities,
    /// Show daemon status
    Status,
    /// Inspect a gallery manifest without contacting the daemon
    Gallery {
        manifest: PathBuf,
        /// Fail if any reference image is missing
        #[arg(long)]
        check: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Identify { image, output } => {
            let bytes = std::fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;
            let proxy = connect(cli.system).await?;
            let reply = proxy.process_frame(&bytes).await?;
            let faces = parse_faces(&reply)?;

            if faces.is_empty() {
                println!("No faces found");
            }
            for (i, face) in faces.iter().enumerate() {
                println!("{}", describe(i, face));
            }

            if let Some(output) = output {
                write_annotated(&image, &faces, &output)?;
                println!("Annotated image written to {}", output.display());
            }
        }
        Commands::Identities => {
            let proxy = connect(cli.system).await?;
            let labels = proxy.list_identities().await?;
            if labels.is_empty() {
                println!("No identities loaded");
            }
            for label in labels {
                println!("{label}");
            }
        }
        Commands::Status => {
            let proxy = connect(cli.system).await?;
            let status = proxy.status().await?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Gallery { manifest, check } => {
            let manifest = GalleryManifest::load(&manifest)?;
            for set in &manifest.identities {
                println!("{} ({} reference images)", set.label, set.images.len());
            }
            let missing = manifest.missing_images();
            for (label, path) in &missing {
                println!("missing: {label}: {}", path.display());
            }
            if check && !missing.is_empty() {
                bail!("{} reference image(s) missing", missing.len());
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

async fn connect(system: bool) -> Result<IdentifyProxy<'static>> {
    let builder = if system {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let conn = builder
        .method_timeout(Duration::from_secs(30))
        .build()
        .await
        .context("failed to connect to D-Bus")?;
    IdentifyProxy::new(&conn)
        .await
        .context("facewatchd is not reachable")
}

fn parse_faces(reply: &str) -> Result<Vec<FaceReport>> {
    let mut value: serde_json::Value = serde_json::from_str(reply).context("malformed daemon reply")?;
    Ok(serde_json::from_value(value["faces"].take())?)
}

fn describe(index: usize, face: &FaceReport) -> String {
    let distance = if face.distance.is_finite() {
        format!("{:.3}", face.distance)
    } else {
        "-".to_string()
    };
    format!(
        "#{index}  {:<16} distance {distance}  box ({}, {})-({}, {})",
        face.label, face.x1, face.y1, face.x2, face.y2
    )
}

fn to_match_result(face: &FaceReport) -> MatchResult {
    let label = (face.label != facewatch_core::UNKNOWN_LABEL).then(|| face.label.clone());
    MatchResult {
        bbox: BoundingBox::new(face.x1, face.y1, face.x2, face.y2),
        identification: Identification {
            label,
            distance: face.distance,
        },
    }
}

fn write_annotated(source: &Path, faces: &[FaceReport], output: &Path) -> Result<()> {
    let image = image::open(source).with_context(|| format!("failed to decode {}", source.display()))?;
    let mut frame = Frame::from_rgb_image(image.to_rgb8());
    let results: Vec<MatchResult> = faces.iter().map(to_match_result).collect();
    annotate::annotate(&mut frame, &results);
    frame
        .to_rgb_image()
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_faces_with_unknown_and_null_distance() {
        let reply = r#"{"faces":[
            {"x1":1,"y1":2,"x2":30,"y2":40,"label":"alice","distance":0.42},
            {"x1":50,"y1":2,"x2":90,"y2":40,"label":"Unknown","distance":null}
        ]}"#;
        let faces = parse_faces(reply).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].label, "alice");
        assert_eq!(faces[1].distance, f32::INFINITY);

        assert!(to_match_result(&faces[0]).is_known());
        assert!(!to_match_result(&faces[1]).is_known());
        assert!(describe(1, &faces[1]).contains("distance -"));
    }

    #[test]
    fn test_parse_faces_rejects_garbage() {
        assert!(parse_faces("not json").is_err());
    }
}
