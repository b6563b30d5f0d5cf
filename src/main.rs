use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::ValueType,
};

use sign_recognizer::{
    config::{DEFAULT_MAX_PAYLOAD_SIZE, ModelConfig, ServerConfig},
    pipeline::{DetectorConfig, Orientation, Rotation},
    server, startup,
    types::Frame,
};

#[derive(Parser, Debug)]
#[command(name = "sign-recognizer", version, about = "Sign language letter recognition service")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,

    /// Log level (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long, global = true, env = "SIGN_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default).
    Serve(ServeArgs),
    /// Recognize the sign in one or more image files.
    Predict(PredictArgs),
    /// Print the inputs and outputs of an ONNX model.
    ModelInfo {
        #[arg(default_value = "asl_model.onnx")]
        path: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct ModelArgs {
    /// ONNX classifier taking 63 normalized landmark values.
    #[arg(long, env = "SIGN_CLASSIFIER_MODEL", default_value = "asl_model.onnx")]
    classifier_model: PathBuf,

    /// Label file (.json array or one label per line). Defaults to A-Z.
    #[arg(long, env = "SIGN_LABELS")]
    labels: Option<PathBuf>,

    /// Directory holding the hand detector models.
    #[arg(long, env = "SIGN_MODELS_DIR", default_value = "models")]
    models_dir: PathBuf,

    /// Never download missing detector models.
    #[arg(long, env = "SIGN_OFFLINE")]
    offline: bool,

    #[arg(long, env = "SIGN_MIN_DETECTION_CONFIDENCE", default_value_t = 0.5)]
    min_detection_confidence: f32,

    /// Number of ranked predictions returned per request.
    #[arg(long, env = "SIGN_TOP_K", default_value_t = 3, value_parser = parse_top_k)]
    top_k: usize,

    /// ONNX Runtime intra-op threads per session.
    #[arg(long, env = "SIGN_INTRA_THREADS", default_value_t = 2)]
    intra_threads: usize,
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    #[arg(long, env = "SIGN_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "SIGN_PORT", default_value_t = 8000)]
    port: u16,

    #[command(flatten)]
    model: ModelArgs,

    /// Clockwise rotation applied to incoming frames (0, 90, 180 or 270).
    #[arg(long, env = "SIGN_ROTATE", default_value = "90", value_parser = parse_rotation)]
    rotate: Rotation,

    /// Do not mirror incoming frames after rotating them.
    #[arg(long, env = "SIGN_NO_MIRROR")]
    no_mirror: bool,

    /// Maximum request body size in bytes.
    #[arg(long, env = "SIGN_MAX_PAYLOAD_SIZE", default_value_t = DEFAULT_MAX_PAYLOAD_SIZE)]
    max_payload_size: usize,

    /// Allowed CORS origin; repeat for several. Any origin when omitted.
    #[arg(long = "cors-allowed-origins", env = "SIGN_CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
    cors_allowed_origins: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct PredictArgs {
    #[arg(required = true)]
    images: Vec<PathBuf>,

    #[command(flatten)]
    model: ModelArgs,

    /// Clockwise rotation applied before detection. Files are upright by default.
    #[arg(long, default_value = "0", value_parser = parse_rotation)]
    rotate: Rotation,

    #[arg(long)]
    mirror: bool,
}

fn parse_rotation(value: &str) -> Result<Rotation, String> {
    value
        .parse::<u16>()
        .ok()
        .and_then(Rotation::from_degrees)
        .ok_or_else(|| format!("rotation must be 0, 90, 180 or 270, got '{value}'"))
}

fn parse_top_k(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(k) if k >= 1 => Ok(k),
        _ => Err(format!("top-k must be a positive integer, got '{value}'")),
    }
}

impl ModelArgs {
    fn into_config(self, orientation: Orientation) -> ModelConfig {
        ModelConfig {
            classifier_model: self.classifier_model,
            labels: self.labels,
            models_dir: self.models_dir,
            offline: self.offline,
            detector: DetectorConfig {
                min_detection_confidence: self.min_detection_confidence,
                intra_threads: self.intra_threads,
            },
            orientation,
            top_k: self.top_k,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match cli.command.unwrap_or(Command::Serve(cli.serve)) {
        Command::Serve(args) => run_server(args),
        Command::Predict(args) => run_predict(args),
        Command::ModelInfo { path } => print_model_info(&path),
    }
}

fn run_server(args: ServeArgs) -> Result<()> {
    let orientation = Orientation {
        rotation: args.rotate,
        mirror: !args.no_mirror,
    };
    let model_config = args.model.into_config(orientation);
    let server_config = ServerConfig {
        host: args.host,
        port: args.port,
        max_payload_size: args.max_payload_size,
        cors_allowed_origins: args.cors_allowed_origins,
    };

    // Models are loaded (and possibly downloaded) before any request is accepted.
    let recognizer = Arc::new(startup::build_recognizer(&model_config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(server::serve(server_config, recognizer))?;
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    let orientation = Orientation {
        rotation: args.rotate,
        mirror: args.mirror,
    };
    let model_config = args.model.into_config(orientation);
    let recognizer = startup::build_recognizer(&model_config)?;

    for path in &args.images {
        let image = image::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_rgba8();
        let frame = Frame::from_rgba_image(orientation.apply(image));

        let started = Instant::now();
        let result = recognizer.recognize_frame(&frame);
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(Some(classification)) => {
                let top = classification
                    .top
                    .iter()
                    .map(|p| format!("{} {:.3}", p.label, p.confidence))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "{}: {} ({:.3}) [{}] in {:.1} ms",
                    path.display(),
                    classification.best.label,
                    classification.best.confidence,
                    top,
                    elapsed
                );
            }
            Ok(None) => println!("{}: no hand detected ({:.1} ms)", path.display(), elapsed),
            Err(err) => eprintln!("{}: {err}", path.display()),
        }
    }

    Ok(())
}

fn print_model_info(model_path: &Path) -> Result<()> {
    println!("Loading model: {}", model_path.display());
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load {}", model_path.display()))?;

    println!("Inputs:");
    for (idx, input) in session.inputs.iter().enumerate() {
        println!("  {}: name=\"{}\" type={:?}", idx, input.name, input.input_type);
        if let ValueType::Tensor { shape, .. } = &input.input_type {
            println!("     shape={:?}", shape);
        }
    }

    println!("Outputs:");
    for (idx, output) in session.outputs.iter().enumerate() {
        println!("  {}: name=\"{}\" type={:?}", idx, output.name, output.output_type);
        if let ValueType::Tensor { shape, .. } = &output.output_type {
            println!("     shape={:?}", shape);
        }
    }

    Ok(())
}
