//! Student management protocol CLI binary.
//!
//! # Commands
//!
//! - `server` - Start the session server with an operator console
//! - `request` - Send one request to a running server and print the response

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use sms::{
    client::NoReconnect,
    services::InMemoryStore,
    ClientSession, Config, Console, Message, Server, Services, VERSION,
};
use tokio::io::BufReader;

#[derive(Parser)]
#[command(name = "sms")]
#[command(version = VERSION)]
#[command(about = "Student management client/server session protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the session server
    Server {
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Config file (default: user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// TOML seed file for the in-memory store (default: demo data)
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Sessions served concurrently
        #[arg(long)]
        max_sessions: Option<usize>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Send a single request and print the response
    Request {
        /// Action name (e.g. GET_ALL_COURSES)
        #[arg(short, long)]
        action: String,

        /// Log in first with this username
        #[arg(short, long)]
        username: Option<String>,

        /// Password for --username
        #[arg(long)]
        password: Option<String>,

        /// Payload entries as key=value (values parsed as JSON when possible)
        #[arg(short, long = "data", value_parser = parse_data)]
        data: Vec<(String, Value)>,

        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Response timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            host,
            config,
            seed,
            max_sessions,
            verbose,
        } => cmd_server(port, host, config, seed, max_sessions, verbose),
        Commands::Request {
            action,
            username,
            password,
            data,
            host,
            port,
            timeout,
            verbose,
        } => cmd_request(action, username, password, data, host, port, timeout, verbose),
    }
}

fn init_logging(verbose: bool, default_level: &str) {
    let log_level = if verbose { "debug" } else { default_level };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?.merge(Config::from_env()),
        None => Config::load()?,
    };
    Ok(config)
}

fn cmd_server(
    port: Option<u16>,
    host: Option<String>,
    config: Option<PathBuf>,
    seed: Option<PathBuf>,
    max_sessions: Option<usize>,
    verbose: bool,
) -> anyhow::Result<()> {
    init_logging(verbose, "info");

    let mut config = load_config(config)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(max) = max_sessions {
        config.server.max_sessions = max;
    }
    let server_config = config.to_server_config()?;

    let services = match seed {
        Some(path) => Services::from_store(Arc::new(InMemoryStore::from_seed_file(path)?)),
        None => Services::in_memory(),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        let server = Server::start_with(server_config, services).await?;
        print_banner(&server);

        let console = Console::new(
            server.clone(),
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        );
        tokio::select! {
            res = console.run() => res?,
            res = tokio::signal::ctrl_c() => {
                res?;
                tracing::info!("Interrupt received");
            },
            () = server.stopped() => {},
        }

        server.stop().await;
        println!("Server stopped successfully.");
        Ok::<_, anyhow::Error>(())
    });

    // stdin reads park a blocking thread that never returns on its own
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

fn print_banner(server: &Server) {
    let rule = "=".repeat(60);
    println!("{rule}");
    println!("Student Management Server v{VERSION}");
    println!("Listening on: {}", server.local_addr());
    println!("{rule}");
    println!("Type 'help' for commands or 'stop' to shut down.\n");
}

#[allow(clippy::too_many_arguments)]
fn cmd_request(
    action: String,
    username: Option<String>,
    password: Option<String>,
    data: Vec<(String, Value)>,
    host: Option<String>,
    port: Option<u16>,
    timeout: Option<u64>,
    verbose: bool,
) -> anyhow::Result<()> {
    init_logging(verbose, "warn");

    let mut config = Config::load()?;
    if let Some(host) = host {
        config.client.host = host;
    }
    if let Some(port) = port {
        config.client.port = port;
    }
    if let Some(secs) = timeout {
        config.client.request_timeout_secs = secs;
    }
    let client_config = config.to_client_config();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let session = ClientSession::with_config(client_config);
        session.set_backoff(Arc::new(NoReconnect));

        if !session.connect(&config.client.host, config.client.port).await {
            anyhow::bail!(
                "Cannot connect to {}:{}",
                config.client.host,
                config.client.port
            );
        }

        if let Some(username) = username {
            let login = session
                .login(&username, password.as_deref().unwrap_or_default())
                .await;
            if !login.success {
                session.disconnect().await;
                anyhow::bail!("Login failed: {}", login.message);
            }
        }

        let mut request = Message::request(&action);
        for (key, value) in data {
            request.insert(&key, value);
        }

        let response = session
            .send_request_and_wait(request, client_config.request_timeout)
            .await;
        session.disconnect().await;

        println!("{}", serde_json::to_string_pretty(&response)?);
        if !response.success {
            anyhow::bail!("{}", response.message);
        }
        Ok(())
    })
}

fn parse_data(entry: &str) -> Result<(String, Value), String> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{entry}'"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
