use clap::{Parser, Subcommand};
use managed_vpn::{trigger, Config};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "managed-vpn")]
#[command(about = "Keeps the default VPN profile in sync with device-management restrictions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the current managed policy once
    ///
    /// Intended to be run by the device-management agent whenever the
    /// restrictions change.
    Reconcile,
    /// Poll the managed policy and apply every change until Ctrl+C
    Watch,
    /// Show the current default profile
    Status,
    /// Generate default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Reconcile => {
            let config = Config::discover()?;
            let result = trigger::handle_policy_changed(&config);
            if let Ok(outcome) = &result {
                println!("Default profile: {}", outcome);
            }
            // Failures were already logged by the trigger
            let code = trigger::exit_code(&result);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Watch => {
            let config = Config::discover()?;
            if let Err(e) = trigger::watch(&config).await {
                error!("Watch failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let config = Config::discover()?;
            let reconciler = trigger::build_reconciler(&config);
            match reconciler.saved_profile() {
                Ok(Some(profile)) => {
                    println!("Default profile: {}", profile.display_name());
                    if let Some(id) = &profile.id {
                        println!("  Id: {}", id);
                    }
                    println!("  Type: {}", profile.vpn_type);
                    println!("  Gateway: {}", profile.gateway.as_deref().unwrap_or("-"));
                    println!("  Username: {}", profile.username.as_deref().unwrap_or("-"));
                    println!(
                        "  Password: {}",
                        if profile.password.is_some() { "set" } else { "-" }
                    );
                }
                Ok(None) => println!("Default profile: none"),
                Err(e) => {
                    error!("Error reading profile store: {}", e);
                    std::process::exit(1);
                }
            }
            match reconciler.profiles().list() {
                Ok(profiles) => println!("Stored profiles: {}", profiles.len()),
                Err(e) => error!("Error listing profiles: {}", e),
            }
            println!("Managed policy: {}", config.policy.path.display());
        }
        Commands::Init => {
            info!("Generating default config...");
            let config = Config::default();
            let path = std::path::PathBuf::from(managed_vpn::config::LOCAL_CONFIG_FILE);
            config.save(&path)?;
            println!("Created default config: {}", path.display());
        }
    }

    Ok(())
}
