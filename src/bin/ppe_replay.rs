//! ppe-replay - Replay recorded detector outputs through the ensemble engine.
//!
//! The input is a JSON object mapping each model id to a list of frames,
//! each frame a list of `[class_index, confidence, x1, y1, x2, y2]` boxes.
//! A model whose frame is `null` fails on that frame. One payload is printed
//! per frame, as a JSON line.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use ppe_ensemble::{
    Detector, DetectorError, DetectorRegistry, Engine, EngineConfig, Frame, FrameRecord,
    FrameSource, RawBox,
};

type RecordedBox = (usize, f32, f32, f32, f32, f32);

#[derive(Parser, Debug)]
#[command(
    name = "ppe-replay",
    about = "Replay recorded detections through the PPE ensemble engine"
)]
struct Args {
    /// Recorded detections (JSON)
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long, env = "PPE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Treat frames as camera frames instead of uploads
    #[arg(long)]
    camera: bool,

    /// Force ensemble mode on or off for every frame
    #[arg(long, value_name = "BOOL")]
    ensemble: Option<bool>,

    /// Print the storage record instead of the API payload
    #[arg(long)]
    records: bool,

    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

/// Serves one recorded frame per call.
struct ReplayDetector {
    frames: VecDeque<Option<Vec<RawBox>>>,
}

impl Detector for ReplayDetector {
    fn infer(&mut self, _frame: &Frame<'_>) -> Result<Vec<RawBox>, DetectorError> {
        match self.frames.pop_front() {
            Some(Some(boxes)) => Ok(boxes),
            Some(None) => Err(DetectorError::Inference("recorded failure".into())),
            None => Err(DetectorError::Inference("no recorded frames left".into())),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = EngineConfig::load_from(args.config.as_deref())
        .context("failed to load engine configuration")?;

    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let recorded: BTreeMap<String, Vec<Option<Vec<RecordedBox>>>> =
        serde_json::from_str(&raw).context("invalid replay file")?;
    if recorded.is_empty() {
        bail!("replay file lists no models");
    }
    let frame_count = recorded.values().map(Vec::len).max().unwrap_or(0);

    let mut registry = DetectorRegistry::new();
    for (model, frames) in recorded {
        let frames = frames
            .into_iter()
            .map(|f| f.map(|boxes| boxes.into_iter().map(RawBox::from).collect()))
            .collect();
        registry.register(model, ReplayDetector { frames });
    }

    let engine = Engine::new(registry, config).context("invalid engine configuration")?;
    let source = if args.camera {
        FrameSource::Camera
    } else {
        FrameSource::Upload
    };
    let ensemble_mode = engine.ensemble_mode_for(source, args.ensemble);
    log::info!(
        "replaying {} frame(s), ensemble mode {}",
        frame_count,
        ensemble_mode
    );

    let frame = Frame::new(&[], 0, 0);
    for _ in 0..frame_count {
        let payload = engine.process(&frame, ensemble_mode);
        let line = if args.records {
            match FrameRecord::from_payload(&payload)? {
                Some(record) => to_json(&record, args.pretty)?,
                None => continue,
            }
        } else {
            to_json(&payload, args.pretty)?
        };
        println!("{line}");
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}
