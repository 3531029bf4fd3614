use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "genpipe", version, about = "Crash-safe batch image generation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate and upload every pending prompt (default)
    Run(RunArgs),

    /// Print job counts for the configured theme
    Stats,

    /// Show how many prompts the theme produces, with a few samples
    Prompts {
        /// Number of random samples to print
        #[arg(long, default_value_t = 5)]
        sample: usize,
    },

    /// Convert string `id` attributes of uploaded entities to integers
    FixIds {
        /// Apply without asking for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Single-stage mode: upload inline instead of in a separate worker
    #[arg(long)]
    pub legacy: bool,

    /// Generate only, even when UPLOAD_ENABLED is set
    #[arg(long)]
    pub no_upload: bool,
}

impl Cli {
    /// The selected command, defaulting to `run`.
    pub fn command(self) -> Commands {
        self.command
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }
}
