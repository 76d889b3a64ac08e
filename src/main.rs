use std::sync::Arc;

use clap::{Parser, Subcommand};
use mdpulse::client::{EventTransport, HttpTransport, LiveUpdateClient};
use mdpulse::{EventRouter, Settings, log_event};

#[derive(Parser)]
#[command(name = "mdpulse")]
#[command(about = "Live-update stream for a local Markdown workspace")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// Run the watch server
    Serve {
        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Connect to a running server and log domain refreshes
    Follow {
        /// Stream endpoint URL (defaults to the configured server)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)?;
            println!("Created configuration at {}", path.display());
        }

        Commands::Config => {
            let settings = Settings::load().map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Serve { bind } => {
            let settings = Settings::load().map_err(|e| anyhow::anyhow!(e))?;
            mdpulse::server::serve(settings, bind).await?;
        }

        Commands::Follow { url } => {
            let settings = Settings::load().map_err(|e| anyhow::anyhow!(e))?;
            mdpulse::logging::init_with_config(&settings.logging);

            let url = url.unwrap_or_else(|| settings.events_url());
            let router = EventRouter::new(
                settings.docs_root(),
                settings.tasks_root(),
                settings.refresh_intervals(),
                || log_event!("refresh", "documents"),
                || log_event!("refresh", "tasks"),
                || log_event!("refresh", "directory-tree"),
            );

            log_event!("follow", "subscribing", "{url}");
            let transport: Arc<dyn EventTransport> = Arc::new(HttpTransport::new(url));
            let client = LiveUpdateClient::connect(transport, router, settings.reconnect_policy());

            tokio::signal::ctrl_c().await?;
            client.shutdown();
        }
    }

    Ok(())
}
