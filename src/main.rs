use anyhow::Result;
use clap::Parser;
use log::warn;
use mintcall::commands::{self, AnalyzeOptions, GenerateOptions};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// mintcall - resilient client for image analysis and generation APIs
///
/// Calls vision and text-to-image providers with timeouts, retries with
/// exponential backoff and fallback across a chain of providers.
///
/// Credentials are read from the environment variables named in the
/// configuration (OPENROUTER_API_KEY and HUGGINGFACE_API_KEY by default).
///
/// Examples:
///   mintcall analyze --image avatar.png
///   mintcall generate --prompt "a lighthouse at dusk" --variations 3
#[derive(Parser, Debug)]
#[command(author, version = env!("MINTCALL_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to <config dir>/mintcall/config.json)
    #[arg(
        long = "config",
        short = 'c',
        env = "MINTCALL_CONFIG",
        value_name = "PATH",
        global = true
    )]
    pub config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Describe an image with a vision model
    Analyze(AnalyzeArgs),

    /// Generate images from a text prompt
    Generate(GenerateArgs),

    /// List configured providers and chains
    Providers,

    /// Check which providers are reachable
    Check,
}

#[derive(clap::Args, Debug)]
pub struct AnalyzeArgs {
    /// Image file to analyze (png, jpg, webp or gif)
    #[arg(long, short = 'i', value_name = "PATH")]
    pub image: PathBuf,

    /// Question or instruction for the model
    #[arg(long, short = 'p')]
    pub prompt: Option<String>,

    /// Provider chain to use instead of the default for analysis
    #[arg(long, value_name = "NAME")]
    pub chain: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    /// What to draw
    #[arg(long, short = 'p')]
    pub prompt: String,

    /// What to avoid
    #[arg(long, short = 'n')]
    pub negative: Option<String>,

    #[arg(long, default_value_t = 512)]
    pub width: u32,

    #[arg(long, default_value_t = 512)]
    pub height: u32,

    /// Sampling steps
    #[arg(long, default_value_t = 30)]
    pub steps: u32,

    /// Fixed seed; random when omitted
    #[arg(long)]
    pub seed: Option<i64>,

    /// Number of images to generate concurrently
    #[arg(long, default_value_t = 1)]
    pub variations: u32,

    /// Reference image to transform instead of generating from scratch
    #[arg(long, value_name = "PATH")]
    pub init_image: Option<PathBuf>,

    /// How far the result may drift from --init-image (0.0 to 1.0)
    #[arg(long, requires = "init_image")]
    pub denoise: Option<f64>,

    /// Output file; numbered when more than one image is produced
    #[arg(long, short = 'o', value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Provider chain to use instead of the default for generation
    #[arg(long, value_name = "NAME")]
    pub chain: Option<String>,
}

impl From<AnalyzeArgs> for AnalyzeOptions {
    fn from(args: AnalyzeArgs) -> Self {
        AnalyzeOptions {
            image: args.image,
            prompt: args.prompt,
            chain: args.chain,
        }
    }
}

impl From<GenerateArgs> for GenerateOptions {
    fn from(args: GenerateArgs) -> Self {
        GenerateOptions {
            negative_prompt: args.negative,
            width: args.width,
            height: args.height,
            steps: args.steps,
            seed: args.seed,
            variations: args.variations,
            init_image: args.init_image,
            denoising_strength: args.denoise,
            out: args.out,
            chain: args.chain,
            ..GenerateOptions::new(args.prompt)
        }
    }
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight requests");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = mintcall::runtime::RealRuntime;
    let config = cli.config.as_deref();

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match cli.command {
        Commands::Analyze(args) => {
            commands::analyze(runtime, config, args.into(), cancel).await?
        }
        Commands::Generate(args) => {
            commands::generate(runtime, config, args.into(), cancel).await?
        }
        Commands::Providers => commands::providers(runtime, config)?,
        Commands::Check => commands::check(runtime, config, cancel).await?,
    }
    Ok(())
}
