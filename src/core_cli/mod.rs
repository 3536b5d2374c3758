use clap::Parser;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "rouilleproxy",
    about = "A transparent FTP application proxy written in Rust."
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "")]
    pub config: String,

    /// Bind address for proxy-owned sockets
    #[arg(short = 'a')]
    pub address: Option<String>,

    /// Restrict to anonymous logins only
    #[arg(short = 'A')]
    pub anonymous_only: bool,

    /// Debug verbosity (0 = info, 1 = debug, 2+ = trace)
    #[arg(short = 'D', default_value_t = 0)]
    pub debug: u8,

    /// Lower bound of the backchannel port range
    #[arg(short = 'm')]
    pub port_min: Option<u16>,

    /// Upper bound of the backchannel port range
    #[arg(short = 'M')]
    pub port_max: Option<u16>,

    /// NAT-passthrough mode: forward PORT/PASV/EPRT/EPSV unmodified
    #[arg(short = 'n')]
    pub nat_passthrough: bool,

    /// Reverse-proxy to a fixed server, addr[:port]
    #[arg(short = 'R')]
    pub reverse_target: Option<String>,

    /// Use reverse DNS names in log lines (accepted for compatibility,
    /// log lines stay numeric)
    #[arg(short = 'r')]
    pub reverse_lookup: bool,

    /// Source address for outbound data connections
    #[arg(short = 'S')]
    pub source_address: Option<String>,

    /// Idle timeout in seconds, 0 disables the timeout
    #[arg(short = 't')]
    pub timeout: Option<u64>,

    /// Run as this user (accepted for compatibility, privilege handling
    /// is the launcher's)
    #[arg(short = 'u')]
    pub user: Option<String>,

    /// Run as this group (accepted for compatibility, privilege handling
    /// is the launcher's)
    #[arg(short = 'g')]
    pub group: Option<String>,

    /// Log transfer statistics at info level
    #[arg(short = 'V')]
    pub verbose: bool,

    /// Check peers against the configured access lists
    #[arg(short = 'w')]
    pub access_check: bool,
}
