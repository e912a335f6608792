//! sysPass CLI - team password manager
//!
//! Run `syspass --help` for usage information.

use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use syspass::acl::{Permission, Principal};
use syspass::auth::parse_expiration;
use syspass::config::{Config, LogFormat};
use syspass::install::{InstallRequest, Installer};
use syspass::search::AccountSearchFilter;
use syspass::server::SyspassApp;
use syspass::users::UserRequest;
use syspass::web::WebServer;
use syspass::ItemSearch;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    name = "syspass",
    about = "Team password manager - shared accounts behind per-account ACLs",
    version
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault with an admin user
    Install {
        /// Admin login
        #[arg(long, default_value = "admin")]
        admin: String,

        /// Admin display name
        #[arg(long, default_value = "")]
        name: String,

        /// Vault file (defaults to the configured path)
        #[arg(long)]
        vault: Option<PathBuf>,
    },

    /// Record an application upgrade in the vault
    Upgrade,

    /// Start the web UI and JSON API
    Serve {
        /// Address to bind to (defaults to the configured address)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Search accounts
    Search {
        /// Search text, with optional user:, group:, tag:, file:, expired:, is:, not: filters
        query: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Work with a single account
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage API tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Inspect and unlock failed-attempt tracks
    Track {
        #[command(subcommand)]
        command: TrackCommands,
    },

    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// Change the master password, re-encrypting every stored password
    Masterpass,

    /// Export categories, clients, tags and accounts as JSON
    Export {
        /// Output file
        path: PathBuf,

        /// Encrypt the export with a password (prompted)
        #[arg(short, long)]
        encrypt: bool,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Show account details (without the password)
    Show { id: u64 },
    /// Print the decrypted password
    Password { id: u64 },
    /// Delete an account
    Delete { id: u64 },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user (password is prompted)
    Add {
        login: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        email: Option<String>,

        /// Main group name
        #[arg(short, long, default_value = "Admins")]
        group: String,

        /// Profile name
        #[arg(short, long, default_value = "Standard")]
        profile: String,

        /// Application administrator
        #[arg(long)]
        admin: bool,
    },

    /// List users
    List {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Disable (or with --enable, re-enable) a user
    Disable {
        login: String,

        #[arg(long)]
        enable: bool,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Create an API token
    Create {
        /// Token name
        name: String,

        /// Login of the user the token acts as
        #[arg(short, long)]
        user: String,

        /// Allowed actions (comma-separated, e.g. account_view,account_view_pass)
        #[arg(short, long)]
        actions: String,

        /// Expiration (e.g., 30d, 12h, 1w)
        #[arg(short, long)]
        expires: Option<String>,
    },

    /// List API tokens
    List {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Revoke an API token
    Revoke { id: u64 },
}

#[derive(Subcommand)]
enum TrackCommands {
    /// List recorded failures
    List,
    /// Unlock one track
    Unlock { id: u64 },
    /// Remove every track
    Clear,
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List plugins
    List,
    /// Enable a plugin
    Enable { name: String },
    /// Disable a plugin
    Disable { name: String },
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if cli.config.is_some() {
        Config::load(&config_path).await?
    } else if config_path.exists() {
        Config::load(&config_path).await.unwrap_or_default()
    } else {
        Config::default()
    };

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Install { admin, name, vault } => {
            install(config, config_path, admin, name, vault).await?;
        }
        Commands::Upgrade => {
            let app = open_app(config).await?;
            if app.upgrade.run(&Principal::system()).await? {
                println!("Upgraded to {}", env!("CARGO_PKG_VERSION"));
            } else {
                println!("Already up to date");
            }
        }
        Commands::Serve { bind } => {
            let app = Arc::new(open_app(config).await?);
            WebServer::new(app, bind)
                .run()
                .await
                .map_err(|e| e.to_string())?;
        }
        Commands::Search { query, format } => {
            let app = open_app(config).await?;
            search(&app, query, format)?;
        }
        Commands::Account { command } => {
            let app = open_app(config).await?;
            account_command(&app, command).await?;
        }
        Commands::User { command } => {
            let app = open_app(config).await?;
            user_command(&app, command).await?;
        }
        Commands::Token { command } => {
            let app = open_app(config).await?;
            token_command(&app, command).await?;
        }
        Commands::Track { command } => {
            let app = open_app(config).await?;
            track_command(&app, command).await?;
        }
        Commands::Plugin { command } => {
            let app = open_app(config).await?;
            plugin_command(&app, command).await?;
        }
        Commands::Masterpass => {
            change_master_password(config).await?;
        }
        Commands::Export { path, encrypt } => {
            let app = open_app(config).await?;
            let password = if encrypt {
                Some(prompt_new_password("Export password")?)
            } else {
                None
            };
            let count = app
                .export
                .export(&Principal::system(), &path, password.as_ref(), None)
                .await?;
            println!("Exported {} accounts to {}", count, path.display());
        }
    }

    Ok(())
}

/// Setup logging: -v flags win over the configured level
fn init_logging(config: &Config, verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str())),
        1 => EnvFilter::from_default_env().add_directive(Level::DEBUG.into()),
        _ => EnvFilter::from_default_env().add_directive(Level::TRACE.into()),
    };

    let json = config.logging.format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

/// Get the master password from environment or prompt
fn get_master_password() -> CliResult<SecretString> {
    // Check environment variable first
    if let Ok(password) = std::env::var("SYSPASS_MASTER_PASSWORD") {
        return Ok(SecretString::from(password));
    }

    prompt("Master password")
}

fn prompt(label: &str) -> CliResult<SecretString> {
    eprint!("{}: ", label);
    io::stderr().flush()?;
    let password = rpassword::read_password()?;
    Ok(SecretString::from(password))
}

/// Prompt twice and compare
fn prompt_new_password(label: &str) -> CliResult<SecretString> {
    let password = prompt(label)?;
    let confirm = prompt("Confirm")?;
    if password.expose_secret() != confirm.expose_secret() {
        return Err("Passwords do not match".into());
    }
    Ok(password)
}

async fn open_app(config: Config) -> CliResult<SyspassApp> {
    let master = get_master_password()?;
    Ok(SyspassApp::open(config, &master).await?)
}

async fn install(
    config: Config,
    config_path: PathBuf,
    admin: String,
    name: String,
    vault: Option<PathBuf>,
) -> CliResult {
    let vault_path = vault.unwrap_or_else(|| config.storage.path.clone());
    let write_config = !config_path.exists();

    println!("--- sysPass installation ---");
    let admin_password = prompt_new_password(&format!("Password for '{}'", admin))?;
    let master_password = match std::env::var("SYSPASS_MASTER_PASSWORD") {
        Ok(password) => SecretString::from(password),
        Err(_) => prompt_new_password("Master password")?,
    };

    let installation = Installer::new(config.security.min_password_length)
        .run(InstallRequest {
            admin_login: admin.clone(),
            admin_name: name,
            admin_password,
            master_password,
            vault_path: vault_path.clone(),
            config_path: write_config.then(|| config_path.clone()),
        })
        .await?;

    info!(admin_id = installation.admin_id, "Vault created");
    println!("\nVault created at {}", vault_path.display());
    if write_config {
        println!("Configuration written to {}", config_path.display());
    }
    println!("\nNext steps:");
    println!("1. Set SYSPASS_MASTER_PASSWORD or you'll be prompted");
    println!("2. Start the web UI: syspass serve");
    println!("3. Log in as '{}'", admin);
    Ok(())
}

fn search(app: &SyspassApp, query: String, format: String) -> CliResult {
    let filter = AccountSearchFilter {
        query,
        limit: Some(0),
        ..Default::default()
    };
    let result = app.search.search(&Principal::system(), &filter);

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            if result.items.is_empty() {
                println!("No accounts found");
                return Ok(());
            }
            println!(
                "{:<6} {:<25} {:<20} {:<20} {:<20} {}",
                "ID", "NAME", "CLIENT", "CATEGORY", "LOGIN", "URL"
            );
            println!("{}", "-".repeat(110));
            for item in result.items {
                println!(
                    "{:<6} {:<25} {:<20} {:<20} {:<20} {}",
                    item.id, item.name, item.client, item.category, item.login, item.url
                );
            }
            println!("\n{} accounts", result.total);
        }
    }
    Ok(())
}

async fn account_command(app: &SyspassApp, command: AccountCommands) -> CliResult {
    let system = Principal::system();
    match command {
        AccountCommands::Show { id } => {
            let account = app.accounts.view(&system, id).await?;
            println!("Name:      {}", account.name);
            println!("Client:    {}", account.client);
            println!("Category:  {}", account.category);
            println!("Login:     {}", account.login);
            println!("URL:       {}", account.url);
            println!("Tags:      {}", account.tags.join(", "));
            println!("Owner:     {}", account.owner);
            println!("Group:     {}", account.main_group);
            if let Some(expires) = account.password_expires_at {
                println!("Expires:   {}", expires.format("%Y-%m-%d"));
            }
            if !account.notes.is_empty() {
                println!("Notes:\n{}", account.notes);
            }
        }
        AccountCommands::Password { id } => {
            let password = app.accounts.view_password(&system, id).await?;
            println!("{}", password.password);
        }
        AccountCommands::Delete { id } => {
            app.accounts.delete(&system, id).await?;
            println!("Account {} deleted", id);
        }
    }
    Ok(())
}

async fn user_command(app: &SyspassApp, command: UserCommands) -> CliResult {
    let system = Principal::system();
    match command {
        UserCommands::Add {
            login,
            name,
            email,
            group,
            profile,
            admin,
        } => {
            let group_id = app
                .groups
                .all()
                .into_iter()
                .find(|g| g.name.eq_ignore_ascii_case(&group))
                .map(|g| g.id)
                .ok_or_else(|| format!("Unknown group '{}'", group))?;
            let profile_id = app
                .profiles
                .get_by_name(&profile)
                .map(|p| p.id)
                .ok_or_else(|| format!("Unknown profile '{}'", profile))?;
            let password = prompt_new_password(&format!("Password for '{}'", login))?;

            let id = app
                .users
                .create(
                    &system,
                    UserRequest {
                        name: name.unwrap_or_else(|| login.clone()),
                        login: login.clone(),
                        email,
                        group_id,
                        profile_id,
                        password: Some(password.expose_secret().to_string()),
                        is_admin_app: admin,
                        ..Default::default()
                    },
                )
                .await?;
            println!("User '{}' created (id {})", login, id);
        }
        UserCommands::List { format } => {
            let users = app.users.search(&system, &ItemSearch::all())?.items;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&users)?),
                _ => {
                    println!(
                        "{:<6} {:<20} {:<25} {:<8} {:<9} {}",
                        "ID", "LOGIN", "NAME", "ADMIN", "DISABLED", "LAST LOGIN"
                    );
                    println!("{}", "-".repeat(90));
                    for user in users {
                        let last_login = user
                            .last_login
                            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "Never".to_string());
                        println!(
                            "{:<6} {:<20} {:<25} {:<8} {:<9} {}",
                            user.id,
                            user.login,
                            user.name,
                            if user.is_admin_app { "yes" } else { "" },
                            if user.is_disabled { "yes" } else { "" },
                            last_login
                        );
                    }
                }
            }
        }
        UserCommands::Disable { login, enable } => {
            let user = app
                .users
                .get_by_login(&login)
                .ok_or_else(|| format!("Unknown user '{}'", login))?;
            app.users.set_disabled(&system, user.id, !enable).await?;
            println!("User '{}' {}", login, if enable { "enabled" } else { "disabled" });
        }
    }
    Ok(())
}

async fn token_command(app: &SyspassApp, command: TokenCommands) -> CliResult {
    let system = Principal::system();
    match command {
        TokenCommands::Create {
            name,
            user,
            actions,
            expires,
        } => {
            let owner = app
                .users
                .get_by_login(&user)
                .ok_or_else(|| format!("Unknown user '{}'", user))?;
            let actions = Permission::parse_many(&actions)?;
            let expires_in = match expires {
                Some(e) => parse_expiration(&e)?,
                None => None,
            };

            let (token, stored) = app
                .tokens
                .create(&system, owner.id, &name, actions, expires_in)
                .await?;

            println!("API token created (id {})", stored.id);
            println!("\nToken: {}", token);
            println!("\nIMPORTANT: Save this token now. It cannot be retrieved later.");
        }
        TokenCommands::List { format } => {
            let tokens = app.tokens.list(&system)?;
            if tokens.is_empty() {
                println!("No API tokens found");
                return Ok(());
            }
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&tokens)?),
                _ => {
                    println!(
                        "{:<6} {:<20} {:<15} {:<12} {:<20} {}",
                        "ID", "NAME", "USER", "PREFIX", "EXPIRES", "LAST USED"
                    );
                    println!("{}", "-".repeat(95));
                    for token in tokens {
                        let expires = token
                            .expires_at
                            .map(|e| e.format("%Y-%m-%d").to_string())
                            .unwrap_or_else(|| "Never".to_string());
                        let last_used = token
                            .last_used
                            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "Never".to_string());
                        println!(
                            "{:<6} {:<20} {:<15} {:<12} {:<20} {}",
                            token.id,
                            token.name,
                            token.user_login,
                            format!("{}...", token.token_prefix),
                            expires,
                            last_used
                        );
                    }
                }
            }
        }
        TokenCommands::Revoke { id } => {
            app.tokens.revoke(&system, id).await?;
            println!("API token {} revoked", id);
        }
    }
    Ok(())
}

async fn track_command(app: &SyspassApp, command: TrackCommands) -> CliResult {
    let system = Principal::system();
    match command {
        TrackCommands::List => {
            let tracks = app.tracks.list(&system, &ItemSearch::all())?.items;
            if tracks.is_empty() {
                println!("No tracks recorded");
                return Ok(());
            }
            println!("{:<6} {:<20} {:<10} {:<40} {}", "ID", "TIME", "SOURCE", "IP", "STATE");
            println!("{}", "-".repeat(90));
            for track in tracks {
                println!(
                    "{:<6} {:<20} {:<10} {:<40} {}",
                    track.id,
                    track.time.format("%Y-%m-%d %H:%M:%S"),
                    track.source,
                    track.ip,
                    if track.is_unlocked() { "unlocked" } else { "active" }
                );
            }
        }
        TrackCommands::Unlock { id } => {
            app.tracks.unlock(&system, id).await?;
            println!("Track {} unlocked", id);
        }
        TrackCommands::Clear => {
            let removed = app.tracks.clear(&system).await?;
            println!("{} tracks removed", removed);
        }
    }
    Ok(())
}

async fn plugin_command(app: &SyspassApp, command: PluginCommands) -> CliResult {
    let system = Principal::system();
    match command {
        PluginCommands::List => {
            let plugins = app.plugins.list(&system)?;
            println!("{:<25} {:<10} {}", "NAME", "VERSION", "STATE");
            println!("{}", "-".repeat(50));
            for plugin in plugins {
                let state = match (plugin.available, plugin.enabled) {
                    (false, _) => "unavailable",
                    (true, true) => "enabled",
                    (true, false) => "disabled",
                };
                println!("{:<25} {:<10} {}", plugin.name, plugin.version, state);
            }
        }
        PluginCommands::Enable { name } => {
            app.plugins.enable(&system, &name).await?;
            println!("Plugin '{}' enabled", name);
        }
        PluginCommands::Disable { name } => {
            app.plugins.disable(&system, &name).await?;
            println!("Plugin '{}' disabled", name);
        }
    }
    Ok(())
}

async fn change_master_password(config: Config) -> CliResult {
    let current = get_master_password()?;
    let app = SyspassApp::open(config, &current).await?;
    let new = prompt_new_password("New master password")?;

    let count = app
        .masterpass
        .change(&Principal::system(), &current, &new, None)
        .await?;
    println!("Master password changed, {} passwords re-encrypted", count);
    println!("Remember to update SYSPASS_MASTER_PASSWORD if you use it.");
    Ok(())
}
