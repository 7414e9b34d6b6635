//! Zeke CLI binary: chat and code actions from the command line, OAuth
//! sign-in, routing control, and the daemon (`zeke serve`).
//!
//! Exit codes: 0 success, 1 generic failure, 2 invalid usage, 3 auth
//! failure, 4 provider unavailable, 5 budget exceeded.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cli::{auth_cmd, chat_cmd, config_cmd, info_cmd, local::LocalBackend};
use zeke::chat::Intent;
use zeke::ZekeResult;

#[derive(Parser, Debug)]
#[command(name = "zeke")]
#[command(about = "Zeke — AI coding companion over many LLM providers")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Read JSON-RPC requests on stdin, write responses on stdout
    #[arg(long)]
    rpc: bool,

    /// Machine-readable JSON output for informational commands
    #[arg(long, global = true)]
    json: bool,

    /// Skip the OS keyring and use the credentials file
    #[arg(long, global = true)]
    no_keyring: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One chat turn with the smart router
    Chat {
        prompt: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        stream: bool,
    },
    /// Ask a question (chat without streaming)
    Ask { question: String },
    /// Explain a source file
    Explain {
        file: PathBuf,
        #[arg(long)]
        stream: bool,
    },
    /// Find and fix bugs in a file
    Fix {
        file: PathBuf,
        #[arg(long)]
        stream: bool,
    },
    /// Generate tests for a file
    Test {
        file: PathBuf,
        #[arg(long)]
        stream: bool,
    },
    /// Apply an instruction to a file (diff preview, backup, atomic write)
    Edit {
        file: PathBuf,
        instruction: String,
        /// Show the diff without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Refactoring advice for the current project
    Refactor { instruction: String },
    /// Generate a function or a test from a description
    Generate {
        /// What to generate: function | test
        what: String,
        desc: String,
    },
    /// Analyze a project directory
    Analyze {
        #[arg(default_value = ".")]
        path: String,
    },
    /// Probe providers, refresh the model catalog, check the database
    Doctor,
    /// Run the daemon (JSON-RPC socket + WebSocket)
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Authentication: OAuth flows and API keys
    Auth {
        #[command(subcommand)]
        cmd: AuthCommand,
    },
    /// Provider inspection
    Provider {
        #[command(subcommand)]
        cmd: ProviderCommand,
    },
    /// Routing control
    Router {
        #[command(subcommand)]
        cmd: RouterCommand,
    },
    /// Model catalog
    Model {
        #[command(subcommand)]
        cmd: ModelCommand,
    },
    /// Configuration file
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Sign in to Anthropic Claude Max (PKCE)
    Claude,
    /// Sign in to GitHub Copilot (device code)
    Copilot,
    /// Store an API key
    SetKey { provider: String, value: String },
    /// Print a stored API key
    GetKey { provider: String },
    /// Show stored credentials (metadata only)
    Status,
    /// Remove all credentials for a provider
    Logout { provider: String },
    /// List stored credential identifiers
    List,
    /// Probe a provider with its stored credential
    Test { provider: String },
}

#[derive(Subcommand, Debug)]
enum ProviderCommand {
    List,
    Status,
    Test { provider: String },
}

#[derive(Subcommand, Debug)]
enum RouterCommand {
    Status,
    /// Set the routing mode: direct | proxy | auto
    Switch { mode: String },
    Test,
    /// One chat turn, forcing the router path (same as `zeke chat`)
    Chat { prompt: String },
}

#[derive(Subcommand, Debug)]
enum ModelCommand {
    List,
    /// Recommend crates/models for a stated need
    Recommend { need: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Show,
    Edit,
    Validate,
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    // Env precedence: process env > project .env > zeke.toml [env].
    if let Err(e) = env_config::load_and_apply(None) {
        eprintln!("warning: config load failed: {e}");
    }

    let args = Args::parse();
    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            // Red error line, matching the documented exit-code table.
            eprintln!("\x1b[31merror: {e}\x1b[0m");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> ZekeResult<()> {
    if args.rpc {
        env_config::init_tracing();
        let backend = LocalBackend::initialize(args.no_keyring).await?;
        return serve::run_stdio_rpc(backend.state).await;
    }

    let Some(cmd) = args.cmd else {
        use clap::CommandFactory;
        Args::command().print_help().ok();
        return Ok(());
    };

    // The daemon logs to file as well; one-shot commands to stderr only.
    let _guard = match &cmd {
        Command::Serve { .. } => {
            let dir = env_config::state_dir()
                .map_err(|e| zeke::ZekeError::InvalidArgument(format!("state dir: {e}")))?;
            Some(env_config::init_tracing_with_file(&dir.join("logs"))?)
        }
        _ => {
            env_config::init_tracing();
            None
        }
    };

    // Pure-filesystem commands need no backend.
    match &cmd {
        Command::Config { cmd } => {
            return match cmd {
                ConfigCommand::Show => config_cmd::show(),
                ConfigCommand::Edit => config_cmd::edit(),
                ConfigCommand::Validate => config_cmd::validate(),
                ConfigCommand::Set { key, value } => config_cmd::set(key, value),
            };
        }
        Command::Router {
            cmd: RouterCommand::Switch { mode },
        } => return info_cmd::router_switch(mode),
        _ => {}
    }

    let mut backend = LocalBackend::initialize(args.no_keyring).await?;

    match cmd {
        Command::Chat {
            prompt,
            provider,
            model,
            stream,
        } => {
            chat_cmd::chat(
                &mut backend,
                &prompt,
                Intent::Code,
                provider.as_deref(),
                model.as_deref(),
                stream,
                args.json,
            )
            .await
        }
        Command::Ask { question } => {
            chat_cmd::chat(
                &mut backend,
                &question,
                Intent::Explain,
                None,
                None,
                false,
                args.json,
            )
            .await
        }
        Command::Explain { file, stream } => chat_cmd::explain(&mut backend, &file, stream).await,
        Command::Fix { file, stream } => chat_cmd::fix(&mut backend, &file, stream).await,
        Command::Test { file, stream } => chat_cmd::test(&mut backend, &file, stream).await,
        Command::Edit {
            file,
            instruction,
            dry_run,
        } => chat_cmd::edit(&mut backend, &file, &instruction, dry_run).await,
        Command::Refactor { instruction } => {
            chat_cmd::refactor(&mut backend, &instruction).await
        }
        Command::Generate { what, desc } => {
            chat_cmd::generate(&mut backend, &what, &desc).await
        }
        Command::Analyze { path } => info_cmd::analyze(&backend, &path, args.json).await,
        Command::Doctor => info_cmd::doctor(&backend).await,
        Command::Serve { port } => {
            serve::run_serve(backend.state.clone(), serve::ServeOptions { port }).await
        }
        Command::Auth { cmd } => match cmd {
            AuthCommand::Claude => auth_cmd::login_claude(&backend).await,
            AuthCommand::Copilot => auth_cmd::login_copilot(&backend).await,
            AuthCommand::SetKey { provider, value } => {
                auth_cmd::set_key(&backend, &provider, &value).await
            }
            AuthCommand::GetKey { provider } => auth_cmd::get_key(&backend, &provider).await,
            AuthCommand::Status => auth_cmd::status(&backend, args.json).await,
            AuthCommand::Logout { provider } => auth_cmd::logout(&backend, &provider).await,
            AuthCommand::List => auth_cmd::list(&backend).await,
            AuthCommand::Test { provider } => auth_cmd::test(&backend, &provider).await,
        },
        Command::Provider { cmd } => match cmd {
            ProviderCommand::List => info_cmd::provider_list(&backend, args.json).await,
            ProviderCommand::Status => info_cmd::provider_status(&backend, args.json).await,
            ProviderCommand::Test { provider } => {
                info_cmd::provider_test(&backend, &provider).await
            }
        },
        Command::Router { cmd } => match cmd {
            RouterCommand::Status => info_cmd::router_status(&backend, args.json).await,
            RouterCommand::Switch { mode } => info_cmd::router_switch(&mode),
            RouterCommand::Test => info_cmd::router_test(&backend).await,
            RouterCommand::Chat { prompt } => {
                chat_cmd::chat(&mut backend, &prompt, Intent::Code, None, None, false, args.json)
                    .await
            }
        },
        Command::Model { cmd } => match cmd {
            ModelCommand::List => info_cmd::model_list(&backend, args.json).await,
            ModelCommand::Recommend { need } => {
                info_cmd::model_recommend(&backend, &need).await
            }
        },
        Command::Config { .. } => unreachable!("handled before backend construction"),
    }
}
