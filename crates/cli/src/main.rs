use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "memex")]
#[command(about = "memex CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: MEMEX_CONFIG_PATH or ~/.memex/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the service: bridge listener, chat-platform client, digest scheduler and HTTP API.
    Serve {
        /// Config file path (default: MEMEX_CONFIG_PATH or ~/.memex/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 8000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Route a message and print the reply without delivering it. Without TEXT, reads
    /// messages interactively until /exit.
    Ask {
        text: Option<String>,

        /// Config file path (default: MEMEX_CONFIG_PATH or ~/.memex/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the daily digest once and deliver it.
    Digest {
        /// Config file path (default: MEMEX_CONFIG_PATH or ~/.memex/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Print the digest instead of delivering it.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("memex {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("service failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { text, config }) => {
            if let Err(e) = run_ask(config, text).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Digest { config, dry_run }) => {
            if let Err(e) = run_digest(config, dry_run).await {
                log::error!("digest failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(memex::config::default_config_path);
    let dir = memex::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = memex::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!(
        "starting service on {}:{} (config {})",
        config.server.bind,
        config.server.port,
        path.display()
    );
    memex::service::run_service(config).await
}

async fn run_ask(
    config_path: Option<std::path::PathBuf>,
    text: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = memex::config::load_config(config_path)?;
    if let Some(text) = text {
        println!("{}", memex::service::ask_once(&config, &text).await?.trim());
        return Ok(());
    }

    let services = memex::service::Services::build(&config)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        let draft = services.router.route(input).await;
        println!("< {}", draft.text.trim());
    }
    Ok(())
}

async fn run_digest(config_path: Option<std::path::PathBuf>, dry_run: bool) -> anyhow::Result<()> {
    let (config, _) = memex::config::load_config(config_path)?;
    let text = memex::service::digest_once(&config, dry_run).await?;
    println!("{}", text);
    Ok(())
}
