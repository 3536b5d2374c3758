mod config;
mod constants;
mod core_access;
mod core_cli;
mod core_error;
mod core_ftpcommand;
mod core_ftpreply;
mod core_network;
mod session;

use std::io::Write;

use clap::Parser;
use env_logger::{Builder, Env};
use log::{error, info, warn};

use crate::config::{FileConfig, ProxyConfig};
use crate::constants::{EX_OK, EX_USAGE};
use crate::core_cli::Cli;
use crate::core_error::ProxyError;
use crate::session::SessionEnd;

#[tokio::main]
async fn main() {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Logger is not up yet; clap renders its own message.
            let _ = e.print();
            std::process::exit(EX_USAGE);
        }
    };

    // Initialize the logger with a custom format
    let default_level = match args.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            writeln!(
                buf,
                "[{}] [{}] {}",
                timestamp,
                record.level(),
                record.args()
            )
        })
        .init();

    if args.user.is_some() || args.group.is_some() {
        warn!("-u/-g ignored: run the proxy under the target user instead");
    }
    if args.reverse_lookup {
        warn!("-r ignored: log lines use numeric addresses");
    }

    // The session is the process: classify its outcome into the exit
    // status so the launcher can tell failure classes apart.
    let code = match run(&args).await {
        Ok(SessionEnd::BothClosed) => {
            info!("session complete");
            EX_OK
        }
        Ok(SessionEnd::IdleTimeout) => {
            info!("session ended by idle timeout");
            EX_OK
        }
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(args: &Cli) -> Result<SessionEnd, ProxyError> {
    let file = if args.config.is_empty() {
        FileConfig::default()
    } else {
        FileConfig::load(&args.config).map_err(|e| ProxyError::Config(format!("{e:#}")))?
    };
    let config = ProxyConfig::build(args, &file)?;
    core_network::network::run_session(config).await
}
