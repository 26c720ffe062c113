use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use video_wi::config::Config;
use video_wi::init;
use video_wi::parser::{StepOrder, parse_ordered};
use video_wi::pipeline;
use video_wi::{logi, logw};

/// Turns recorded procedures into illustrated work-instruction documents.
#[derive(Parser)]
#[command(name = "video-wi")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate work instructions with frames from procedure videos")]
struct Cli {
    /// Path to the JSON config
    #[arg(short, long, env = "VIDEO_WI_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every video in videos/ that has no document in output/ yet
    Batch,

    /// Build the document for a single video
    Run {
        /// Video file
        #[arg(short, long)]
        video: PathBuf,

        /// Use an existing draft instead of asking the model
        #[arg(short, long)]
        draft: Option<PathBuf>,

        /// Prompt override read from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Output .docx (defaults to output/<video name>.docx)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the steps a draft would produce
    Steps {
        /// Draft text file
        #[arg(short, long)]
        draft: PathBuf,

        /// Sort by time instead of order of appearance
        #[arg(long)]
        chronological: bool,
    },
}

fn default_output(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "work_instructions".to_string());
    PathBuf::from(init::OUTPUT_DIR).join(format!("{}.docx", stem))
}

async fn run_single(
    mut cfg: Config,
    video: PathBuf,
    draft: Option<PathBuf>,
    prompt_file: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<()> {
    if let Some(path) = prompt_file {
        cfg.prompt = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read prompt: {}", path.display()))?;
    }

    if !init::check_ffmpeg(&cfg.ffmpeg_bin).await {
        logw(format!(
            "{} not runnable; frames will be missing from the document",
            cfg.ffmpeg_bin.display()
        ));
    }

    let out = out.unwrap_or_else(|| default_output(&video));
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let text = match draft {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read draft: {}", path.display()))?,
        None => {
            cfg.validate_remote()?;
            let client = reqwest::Client::new();
            let generator = video_wi::api::vertex::VertexClient::new(client.clone(), cfg.clone());
            let uri = video_wi::api::storage::upload_video(&client, &cfg, &video).await?;
            video_wi::api::DraftGenerator::generate(&generator, &uri, &cfg.prompt).await?
        }
    };

    let extractor = pipeline::frame_extractor(&cfg);
    let assembly = pipeline::build_from_draft(&cfg, &video, text, extractor, &out).await?;
    if assembly.is_partial() {
        logw(format!(
            "{} frame(s) missing from {}",
            assembly.missing_images.len(),
            out.display()
        ));
    }
    Ok(())
}

async fn list_steps(draft: PathBuf, chronological: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(&draft)
        .await
        .with_context(|| format!("Failed to read draft: {}", draft.display()))?;
    let order = if chronological {
        StepOrder::Chronological
    } else {
        StepOrder::Appearance
    };

    let steps = parse_ordered(&text, order);
    if steps.is_empty() {
        logw("No timestamp markers found".to_string());
        return Ok(());
    }
    for (i, step) in steps.iter().enumerate() {
        println!("{:>3}. [{}] {}", i + 1, step.timestamp, step.label_text);
        if let Some(hazard) = &step.hazard_text {
            println!("     hazard: {}", hazard);
        }
        for detail in &step.details {
            println!("     {}", detail);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config).await?;

    match cli.command {
        Commands::Batch => {
            init::ensure_directories().await?;
            if !init::check_ffmpeg(&cfg.ffmpeg_bin).await {
                eprintln!("[WARNING] FFmpeg not found. Please install FFmpeg or set ffmpeg_bin.");
            }
            let processed = pipeline::run_generation(&cfg).await?;
            logi(format!("Batch finished with {} document(s)", processed));
        }
        Commands::Run {
            video,
            draft,
            prompt_file,
            out,
        } => run_single(cfg, video, draft, prompt_file, out).await?,
        Commands::Steps {
            draft,
            chronological,
        } => list_steps(draft, chronological).await?,
    }
    Ok(())
}
