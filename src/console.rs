//! Operator console for a running server.
//!
//! Reads one command per line and writes human-readable output:
//!
//! | Command            | Effect                                    |
//! |--------------------|-------------------------------------------|
//! | `status`           | running flag, port, connected clients     |
//! | `clients`          | numbered client listing                   |
//! | `stats`            | full [`ServerStats`](crate::server::ServerStats) |
//! | `broadcast [text]` | BROADCAST notification to every session   |
//! | `stop`/`quit`/`exit` | leave the console                       |
//! | `help`             | command list                              |

use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::server::Server;

/// Console prompt
pub const PROMPT: &str = "sms-server> ";

const HELP: &str = "\
status    - Show current server status
clients   - List all connected clients
stats     - Show detailed server statistics
broadcast - Send a message to all connected clients
stop      - Stop the server and exit
help      - Show this help message
";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Show status
    Status,
    /// List clients
    Clients,
    /// Show statistics
    Stats,
    /// Broadcast; `None` prompts for the text
    Broadcast(Option<String>),
    /// Leave the console
    Stop,
    /// Show help
    Help,
    /// Blank line
    Empty,
    /// Anything else
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one input line. Command words are case-insensitive.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_lowercase().as_str() {
            "" => Self::Empty,
            "status" => Self::Status,
            "clients" => Self::Clients,
            "stats" => Self::Stats,
            "broadcast" => Self::Broadcast((!rest.is_empty()).then(|| rest.to_string())),
            "stop" | "quit" | "exit" => Self::Stop,
            "help" => Self::Help,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl FromStr for ConsoleCommand {
    type Err = std::convert::Infallible;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(line))
    }
}

/// Line-oriented console bound to a server.
#[derive(Debug)]
pub struct Console<R, W> {
    server: Server,
    input: R,
    output: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a console reading `input` and writing `output`
    pub fn new(server: Server, input: R, output: W) -> Self {
        Self { server, input, output }
    }

    /// Serve commands until `stop` or end of input. Does not stop the server.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.write(PROMPT).await?;
            let Some(line) = self.read_line().await? else {
                tracing::debug!("Console input closed");
                return Ok(());
            };

            let command = ConsoleCommand::parse(&line);
            if command == ConsoleCommand::Stop {
                self.write("Shutting down server...\n").await?;
                return Ok(());
            }
            self.execute(command).await?;
        }
    }

    /// Run a single command
    pub async fn execute(&mut self, command: ConsoleCommand) -> Result<()> {
        match command {
            ConsoleCommand::Status => {
                let stats = self.server.stats();
                let out = format!(
                    "\n--- Server Status ---\nRunning: {}\nPort: {}\nConnected Clients: {}\n\n",
                    stats.running, stats.port, stats.connected_clients
                );
                self.write(&out).await
            },
            ConsoleCommand::Clients => {
                let clients = self.server.clients();
                let mut out = String::from("\n--- Connected Clients ---\n");
                if clients.is_empty() {
                    out.push_str("No clients connected.\n");
                }
                for (i, client) in clients.iter().enumerate() {
                    out.push_str(&format!("{}. {}\n", i + 1, client));
                }
                out.push('\n');
                self.write(&out).await
            },
            ConsoleCommand::Stats => {
                let out = format!("\n--- Server Statistics ---\n{}\n\n", self.server.stats());
                self.write(&out).await
            },
            ConsoleCommand::Broadcast(text) => {
                let text = match text {
                    Some(text) => text,
                    None => {
                        self.write("Enter message to broadcast: ").await?;
                        self.read_line().await?.unwrap_or_default()
                    },
                };
                let text = text.trim();
                if text.is_empty() {
                    return self.write("Message cannot be empty.\n").await;
                }
                let delivered = self.server.broadcast(text).await;
                self.write(&format!("Message broadcasted to {delivered} client(s).\n")).await
            },
            ConsoleCommand::Help => self.write(&format!("\n--- Available Commands ---\n{HELP}\n")).await,
            ConsoleCommand::Unknown(word) => {
                self.write(&format!("Unknown command: {word}. Type 'help' for available commands.\n"))
                    .await
            },
            ConsoleCommand::Stop | ConsoleCommand::Empty => Ok(()),
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::actions;
    use crate::server::ServerConfig;
    use crate::services::Services;
    use crate::transport::Transport;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        assert_eq!("status".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Status);
        assert_eq!("  CLIENTS ".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Clients);
        assert_eq!("quit".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Stop);
        assert_eq!("exit".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Stop);
        assert_eq!("".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Empty);
        assert_eq!(
            "broadcast hello  all".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Broadcast(Some("hello  all".into()))
        );
        assert_eq!(
            "broadcast".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Broadcast(None)
        );
        assert_eq!(
            "reboot now".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Unknown("reboot".into())
        );
    }

    async fn server() -> Server {
        Server::start_with(ServerConfig::default().with_port(0), Services::in_memory())
            .await
            .unwrap()
    }

    async fn run_script(server: &Server, script: &str) -> String {
        let mut output = Vec::new();
        Console::new(server.clone(), script.as_bytes(), &mut output)
            .run()
            .await
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test]
    async fn test_status_and_stop() {
        let server = server().await;
        let out = run_script(&server, "status\nhelp\nfrobnicate\nstop\nstatus\n").await;

        assert!(out.starts_with(PROMPT));
        assert!(out.contains("Running: true"));
        assert!(out.contains("Connected Clients: 0"));
        assert!(out.contains("broadcast - Send a message"));
        assert!(out.contains("Unknown command: frobnicate"));
        assert!(out.ends_with("Shutting down server...\n"));
        assert_eq!(out.matches("--- Server Status ---").count(), 1);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_eof_ends_console() {
        let server = server().await;
        let out = run_script(&server, "clients\n").await;
        assert!(out.contains("No clients connected."));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_broadcast_prompts_for_text() {
        let server = server().await;
        let client = Transport::open("127.0.0.1", server.local_addr().port()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.connected_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let out = run_script(&server, "broadcast\nclass cancelled\nbroadcast   \n\nstop\n").await;
        assert!(out.contains("Enter message to broadcast: "));
        assert!(out.contains("Message broadcasted to 1 client(s)."));
        assert!(out.contains("Message cannot be empty."));

        let note = client.receive().await.unwrap().unwrap();
        assert_eq!(note.action, actions::BROADCAST);
        assert_eq!(note.message, "class cancelled");

        server.stop().await;
    }
}
