//! Authgate -- OAuth2 authorization-code session manager.
//!
//! Command-line shell around the library:
//!   - `login` prints the identity provider authorization URL
//!   - `complete <url>` runs the flow against the provider's return URL
//!   - `status` reports the stored session's state
//!   - `fetch [url]` calls the protected API with the session token
//!   - `logout` clears the session and prints the provider logout URL

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use url::Url;

use authgate::api::ApiClient;
use authgate::auth::{AuthFlowController, FlowOutcome};
use authgate::config::Config;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

enum Command {
    Status,
    Login,
    Complete { redirect_url: String },
    Fetch { url: Option<String> },
    Logout,
}

struct CliArgs {
    config_path: PathBuf,
    command: Command,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("authgate.toml");
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("authgate {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "status" => command = Some(Command::Status),
            "login" => command = Some(Command::Login),
            "complete" => {
                let Some(redirect_url) = args.next() else {
                    eprintln!("Error: complete requires the return URL as argument");
                    std::process::exit(1);
                };
                command = Some(Command::Complete { redirect_url });
            }
            "fetch" => command = Some(Command::Fetch { url: args.next() }),
            "logout" => command = Some(Command::Logout),
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    let Some(command) = command else {
        print_usage();
        std::process::exit(1);
    };

    CliArgs {
        config_path,
        command,
    }
}

fn print_usage() {
    println!(
        "\
authgate {version} -- OAuth2 authorization-code session manager

USAGE:
    authgate [OPTIONS] <COMMAND>

COMMANDS:
    login              Print the identity provider authorization URL
    complete <URL>     Complete the flow with the provider's return URL
    status             Show the stored session's state
    fetch [URL]        Call the protected API with the session token
    logout             Clear the session and print the logout URL

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: authgate.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    AUTHGATE_CONFIG        Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("authgate={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_args();

    // Allow AUTHGATE_CONFIG env var as alternative to --config flag
    let config_path = std::env::var("AUTHGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    let config = Config::load(&config_path)?;
    init_tracing(&config);
    config.validate()?;

    let config = Arc::new(config);
    let (controller, mut refresh_rx) = AuthFlowController::from_config(config.clone());

    match cli.command {
        Command::Status => {
            let status = controller.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Login => {
            println!("{}", controller.login_url());
        }
        Command::Complete { redirect_url } => {
            let url = Url::parse(&redirect_url)?;
            match controller.initialize(&url).await? {
                FlowOutcome::Authenticated {
                    session,
                    cleaned_url,
                } => {
                    println!("Authenticated (expires at {})", session.expires_at);
                    if let Some(cleaned) = cleaned_url {
                        println!("Cleaned URL: {cleaned}");
                    }
                    // Report whether the proactive refresh already fired
                    // (short-lived tokens land inside the 5-minute buffer).
                    if refresh_rx.try_recv().is_ok() {
                        println!("Session expires soon, re-authenticate at:");
                        println!("{}", controller.login_url());
                    }
                }
                FlowOutcome::LoginRedirect { url } => {
                    println!("Not authenticated, log in at:");
                    println!("{url}");
                }
            }
        }
        Command::Fetch { url } => {
            let target = url.unwrap_or_else(|| config.api.data_url.clone());
            if target.is_empty() {
                anyhow::bail!("No URL given and api.data_url is not configured");
            }

            let Some(session) = controller.storage().load()? else {
                anyhow::bail!("No stored session; run `authgate login` first");
            };

            let client = ApiClient::new();
            match client.fetch_json(&target, &session).await {
                Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
                Err(authgate::AuthError::NotAuthenticated(reason)) => {
                    eprintln!("Re-authentication required ({reason}), log in at:");
                    println!("{}", controller.login_url());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Logout => {
            let url = controller.logout()?;
            println!("Logged out locally. Complete upstream logout at:");
            println!("{url}");
        }
    }

    Ok(())
}
