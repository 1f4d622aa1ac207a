//! Twitch Session CLI - sign in to Twitch from the terminal
//!
//! This binary wraps the session core library:
//! - Sign in through the Twitch authorization page (browser or pasted URL)
//! - Restore and validate the persisted session
//! - Revoke the token and sign out

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use twitch_session_core::auth::{self, Authorizer, LoopbackAuthorizer, PasteAuthorizer};
use twitch_session_core::config::{self, SessionConfig};
use twitch_session_core::{AuthorizationRequest, RestoreOutcome, SessionManager};

#[derive(Parser)]
#[command(name = "twitch-session")]
#[command(author = "Twitch Session Team")]
#[command(version)]
#[command(about = "Sign in to Twitch and manage the persisted session")]
#[command(long_about = "
twitch-session signs you in to Twitch using the OAuth implicit grant flow
and keeps the session in the platform keychain (or a private file).

Quick start:
  1. Configure:  export TWITCH_CLIENT_ID=<your client id>
  2. Sign in:    twitch-session login
  3. Check:      twitch-session status

On a machine without a browser, use: twitch-session login --paste
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with a Twitch account
    #[command(alias = "signin")]
    Login {
        /// Paste the redirected URL instead of catching it on localhost
        #[arg(short, long)]
        paste: bool,

        /// Sign out of the current session first
        #[arg(long)]
        force: bool,
    },

    /// Revoke the token and remove the persisted session
    #[command(alias = "signout")]
    Logout,

    /// Validate the persisted session and show the signed-in user
    Status,

    /// Print an authorization URL without waiting for the redirect
    Url,

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("twitch_session={},twitch_session_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Login { paste, force } => cmd_login(&cli, paste, force).await,
        Commands::Logout => cmd_logout(&cli).await,
        Commands::Status => cmd_status(&cli).await,
        Commands::Url => cmd_url(&cli),
        Commands::Config => cmd_config(&cli),
    }
}

/// Build a session manager and run the startup restore.
async fn open_session(
    config: SessionConfig,
    authorizer: Arc<dyn Authorizer>,
) -> Result<(SessionManager, RestoreOutcome)> {
    let store = auth::default_store()?;
    tracing::debug!("Session storage: {}", store.describe());

    let (session, restored) = SessionManager::start(config, store, authorizer).await;
    if !matches!(restored, RestoreOutcome::Restored(_)) {
        tracing::debug!("Startup restore: {}", restore_label(&restored));
    }
    Ok((session, restored))
}

/// Authorizer for commands that never start an interactive sign-in.
fn idle_authorizer() -> Arc<dyn Authorizer> {
    Arc::new(PasteAuthorizer)
}

fn restore_label(outcome: &RestoreOutcome) -> &'static str {
    match outcome {
        RestoreOutcome::NoSession => "no_session",
        RestoreOutcome::Restored(_) => "restored",
        RestoreOutcome::Mismatch => "mismatch",
        RestoreOutcome::Invalidated => "invalidated",
    }
}

async fn cmd_login(cli: &Cli, paste: bool, force: bool) -> Result<()> {
    let config = config::load_session_config()?;

    let authorizer: Arc<dyn Authorizer> = if paste {
        Arc::new(PasteAuthorizer)
    } else {
        let format = cli.format;
        Arc::new(LoopbackAuthorizer::new(&config).with_url_callback(move |url| match format {
            OutputFormat::Text => {
                println!();
                println!("Opening the Twitch sign-in page. If it does not open, visit:\n\n{}\n", url);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "awaiting_authorization",
                        "authorize_url": url,
                    })
                );
            }
        }))
    };

    let (session, _restored) = open_session(config, authorizer).await?;

    if let Some(user) = session.user() {
        if !force {
            match cli.format {
                OutputFormat::Text => {
                    println!("Already signed in as {} ({})", user.display_name, user.login);
                    println!("Use 'twitch-session login --force' to switch accounts.");
                }
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "status": "already_signed_in",
                            "user": user,
                        })
                    );
                }
            }
            return Ok(());
        }
        session.sign_out().await?;
    }

    if let OutputFormat::Text = cli.format {
        println!("Starting Twitch sign-in...");
    }

    let user = session.sign_in().await?;

    match cli.format {
        OutputFormat::Text => {
            println!();
            println!("Signed in as {} ({})", user.display_name, user.login);
            if let Some(email) = &user.email {
                println!("Email: {}", email);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "signed_in",
                    "user": user,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_logout(cli: &Cli) -> Result<()> {
    let config = config::load_session_config()?;
    let (session, restored) = open_session(config, idle_authorizer()).await?;

    if let RestoreOutcome::NoSession = restored {
        match cli.format {
            OutputFormat::Text => println!("Not signed in."),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "status": "not_signed_in" }));
            }
        }
        return Ok(());
    }

    let user = session.user();
    // Also revokes and clears a persisted session that was not restored
    session.sign_out().await?;

    match cli.format {
        OutputFormat::Text => match &user {
            Some(user) => println!("Signed out {}", user.display_name),
            None => println!("Removed stored session"),
        },
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "signed_out",
                    "user": user,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let config = config::load_session_config()?;
    let (session, restored) = open_session(config, idle_authorizer()).await?;

    match cli.format {
        OutputFormat::Text => {
            match &restored {
                RestoreOutcome::Restored(user) => {
                    println!("Status:  Signed in");
                    println!("User:    {} ({})", user.display_name, user.login);
                    println!("User ID: {}", user.id);
                    println!("Email:   {}", user.email.as_deref().unwrap_or("-"));
                }
                RestoreOutcome::NoSession => {
                    println!("Status: Not signed in");
                    println!();
                    println!("Run 'twitch-session login' to sign in.");
                }
                RestoreOutcome::Mismatch => {
                    println!("Status: Not signed in (stored token belongs to another account)");
                    println!();
                    println!("Run 'twitch-session login --force' to sign in again.");
                }
                RestoreOutcome::Invalidated => {
                    println!("Status: Not signed in (stored session expired and was removed)");
                    println!();
                    println!("Run 'twitch-session login' to sign in.");
                }
            }
            println!();
            println!("Storage: {}", auth::get_storage_info());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "authenticated": session.is_authenticated(),
                    "restore": restore_label(&restored),
                    "user": session.user(),
                    "storage_info": auth::get_storage_info(),
                })
            );
        }
    }

    Ok(())
}

fn cmd_url(cli: &Cli) -> Result<()> {
    let config = config::load_session_config()?;
    let request = AuthorizationRequest::new(&config);

    match cli.format {
        OutputFormat::Text => {
            println!("{}", request.url);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "authorize_url": request.url,
                    "state": request.state,
                    "redirect_uri": request.redirect_uri,
                })
            );
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config_path = config::get_config_file_path_string();
    let session_config = config::load_session_config();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:     {}", config_path);
            match &session_config {
                Ok(c) => {
                    println!("Client ID:       {} (from {})", c.client_id, c.source);
                    println!("Redirect URI:    {}", c.redirect_uri);
                    println!("Scopes:          {}", c.scope_param());
                    println!("Force verify:    {}", c.force_verify);
                    println!("Verify state:    {}", c.verify_state);
                    println!("Authorize URL:   {}", c.endpoints.authorize_url);
                    println!("Users URL:       {}", c.endpoints.users_url);
                }
                Err(e) => println!("Client ID:       not configured ({})", e),
            }
            println!("Session storage: {}", auth::get_storage_info());
            println!();
            println!("Environment variables:");
            println!("  TWITCH_CLIENT_ID    - Application client id");
            println!("  TWITCH_REDIRECT_URI - Override the redirect URI");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            let settings = session_config.as_ref().ok().map(|c| {
                serde_json::json!({
                    "client_id": c.client_id,
                    "client_id_source": c.source.to_string(),
                    "redirect_uri": c.redirect_uri,
                    "scopes": c.scopes,
                    "force_verify": c.force_verify,
                    "verify_state": c.verify_state,
                    "callback_timeout_secs": c.callback_timeout_secs,
                    "authorize_url": c.endpoints.authorize_url,
                    "revoke_url": c.endpoints.revoke_url,
                    "validate_url": c.endpoints.validate_url,
                    "users_url": c.endpoints.users_url,
                })
            });
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "settings": settings,
                    "error": session_config.as_ref().err().map(|e| e.to_string()),
                    "session_storage": auth::get_storage_info(),
                })
            );
        }
    }

    Ok(())
}
