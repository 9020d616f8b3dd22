//! CLI entry point for tagtpl

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagtpl::{Bindings, EngineConfig, RequestInputs, Template};

#[derive(Parser)]
#[command(name = "tagtpl")]
#[command(version = "0.1.0")]
#[command(about = "A tag-based template compiler with two-tier caching", long_about = None)]
struct Cli {
    /// Directory containing template sources
    #[arg(long, global = true, default_value = "./templates")]
    template_dir: PathBuf,

    /// Directory for compiled artifacts
    #[arg(long, global = true, default_value = "./templates_c")]
    compile_dir: PathBuf,

    /// Directory for cfgload config resources
    #[arg(long, global = true, default_value = "./config")]
    config_dir: PathBuf,

    /// Directory for rendered-output artifacts
    #[arg(long, global = true, default_value = "./cache")]
    cache_dir: PathBuf,

    /// Rendered-output lifetime in seconds
    #[arg(long, global = true, default_value = "60")]
    lifetime: u64,

    /// Enable page-level (rendered-output) caching
    #[arg(long, global = true)]
    cache: bool,

    /// Debug mode: force recompilation and bypass caches, verbose output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template to stdout
    #[command(alias = "r")]
    Render {
        /// Template name, relative to the template directory
        template: String,

        /// JSON file with variable bindings (an object)
        #[arg(short, long)]
        vars: Option<PathBuf>,

        /// Rendered-cache discriminator
        #[arg(long)]
        cache_id: Option<String>,
    },

    /// Clear rendered-cache artifacts
    Clean {
        /// Template whose artifacts to clear (all templates when omitted)
        template: Option<String>,

        /// Rendered-cache discriminator
        #[arg(long)]
        cache_id: Option<String>,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        "tagtpl=debug,info"
    } else {
        "tagtpl=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = EngineConfig {
        template_dir: cli.template_dir,
        compile_dir: cli.compile_dir,
        config_dir: cli.config_dir,
        cache_dir: cli.cache_dir,
        cache_lifetime: cli.lifetime,
        page_cache: cli.cache,
        debug: cli.debug,
        ..EngineConfig::default()
    };

    match cli.command {
        Commands::Render {
            template,
            vars,
            cache_id,
        } => {
            let mut engine = Template::new(config, RequestInputs::default());
            if let Some(path) = vars {
                let text = fs::read_to_string(&path)?;
                let bindings: Bindings = serde_json::from_str(&text)?;
                engine.assign_map(bindings);
            }
            tracing::info!("Rendering {}", template);
            let output = engine.render(&template, cache_id.as_deref())?;
            print!("{output}");
        }

        Commands::Clean { template, cache_id } => {
            let engine = Template::new(config, RequestInputs::default());
            match template {
                Some(template) => {
                    engine.clear_cache(&template, cache_id.as_deref())?;
                    println!("Cleared rendered cache for {template}");
                }
                None => {
                    engine.clear_all_cache()?;
                    println!("Cleared rendered cache");
                }
            }
        }

        Commands::Version => {
            println!("tagtpl version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
