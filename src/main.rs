//! basex-client - runs commands against a BaseX server.
//!
//! Each positional argument is one command. Results go to stdout and the
//! server info to stderr; the first failing command ends the run.

use anyhow::Context;
use basex_client::{Client, Config};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Parse configuration and the commands from command-line arguments.
///
/// Defaults come from the `BASEX_*` environment variables.
fn from_args() -> (Config, Vec<String>) {
    let mut config = Config::from_env();
    let args: Vec<String> = std::env::args().collect();
    let mut commands = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            flag @ ("--host" | "-h" | "--port" | "-p" | "--user" | "-u" | "--password" | "-P") => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires a value", flag);
                    std::process::exit(1);
                };
                match flag {
                    "--host" | "-h" => config.host = value.clone(),
                    "--port" | "-p" => {
                        config.port = value.parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                    }
                    "--user" | "-u" => config.username = value.clone(),
                    _ => config.password = value.clone(),
                }
                i += 2;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("basex-client version {}", basex_client::VERSION);
                std::process::exit(0);
            }
            _ => {
                commands.push(args[i].clone());
                i += 1;
            }
        }
    }

    if commands.is_empty() {
        print_help();
        std::process::exit(1);
    }
    (config, commands)
}

fn print_help() {
    println!(
        r#"
basex-client - Run commands on a BaseX server

USAGE:
    basex-client [OPTIONS] <COMMAND>...

OPTIONS:
    -h, --host <HOST>            Server host (default: localhost, env: BASEX_HOST)
    -p, --port <PORT>            Server port (default: 1984, env: BASEX_PORT)
    -u, --user <USER>            User name (default: admin, env: BASEX_USER)
    -P, --password <PASSWORD>    Password (default: admin, env: BASEX_PASSWORD)
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    basex-client "xquery 1 to 10"
    basex-client -p 1985 list
    basex-client "open factbook" "xquery count(//country)"
    RUST_LOG=debug basex-client info
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, commands) = from_args();

    // logs go to stderr so stdout carries only the result
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    debug!(address = %config.address(), user = %config.username, "Starting");
    let client = Client::connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.address()))?;

    for command in &commands {
        let output = client
            .execute(command.as_str())
            .await
            .with_context(|| format!("command failed: {}", command))?;

        println!("{}", output.result);
        if !output.info.is_empty() {
            eprintln!("{}", output.info);
        }
    }
    Ok(())
}
