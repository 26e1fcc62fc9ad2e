mod commands;
mod config;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;

/// Ops CLI on top of the `tunnelkit` library: establishes an authenticated SSH session
/// and multiplexes forward/reverse TCP tunnels over it.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to an sshd host and run forward and/or reverse tunnels until Ctrl-C.
    Tunnel(TunnelArgs),
    /// Print this client's public key(s) in authorized-keys form.
    Keys(KeysArgs),
    /// Generate a TOTP secret and print its enrollment URL and QR code.
    OtpEnroll,
}

#[derive(clap::Args)]
struct TunnelArgs {
    /// Remote username to authenticate as.
    #[clap(long, env = "TUNNELKIT_USER")]
    user: String,

    /// Path to a private key usable for public-key authentication.
    #[clap(long, env = "TUNNELKIT_IDENTITY")]
    identity: Option<PathBuf>,

    /// Passphrase, used for password auth and for the password-prompt branch of
    /// keyboard-interactive auth (§4.C).
    #[clap(long, env = "TUNNELKIT_PASSWORD")]
    password: Option<String>,

    /// `otpauth://totp/...` URL driving the google-authenticator-code keyboard
    /// interactive challenge.
    #[clap(long, env = "TUNNELKIT_TOTP_URL")]
    totp_url: Option<String>,

    /// sshd hostname.
    #[clap(long)]
    host: String,

    /// sshd port.
    #[clap(long, default_value_t = 22)]
    port: u16,

    /// Path to the host-key trust store (JSON Lines, `.json` extension required).
    #[clap(long, default_value = "trust.json")]
    trust_store: PathBuf,

    /// Add the server's key to the trust store on first contact.
    #[clap(long = "new")]
    add_if_not_known: bool,

    /// Trust a newly-added key immediately instead of requiring a second run (§4.B
    /// step 5).
    #[clap(long)]
    oneshot: bool,

    /// Idle timeout applied to every tunneled channel, in milliseconds. 0 disables it.
    #[clap(long, default_value_t = 0)]
    idle_timeout_ms: u64,

    /// Forward tunnel spec: `LOCAL_BIND_ADDR:REMOTE_HOST:REMOTE_PORT`. Repeatable.
    #[clap(long = "forward", value_name = "LOCAL:HOST:PORT")]
    forwards: Vec<String>,

    /// Reverse tunnel spec: `REMOTE_BIND_ADDR:REMOTE_BIND_PORT::LOCAL_HOST:LOCAL_PORT`
    /// (note the double colon separating the remote and local halves). Repeatable.
    #[clap(long = "reverse", value_name = "RADDR:RPORT::LHOST:LPORT")]
    reverses: Vec<String>,
}

#[derive(clap::Args)]
struct KeysArgs {
    /// Path to the private key to derive the public key from.
    #[clap(long, env = "TUNNELKIT_IDENTITY")]
    identity: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tunnel(args) => run_tunnel(args).await,
        Commands::Keys(args) => commands::keys::command(&args.identity),
        Commands::OtpEnroll => commands::otp::command(),
    }
}

async fn run_tunnel(args: TunnelArgs) -> Result<()> {
    let config = Config {
        user: args.user,
        identity: args.identity,
        password: args.password.map(Into::into),
        totp_url: args.totp_url.map(Into::into),
        sshd_host: args.host,
        sshd_port: args.port,
        trust_store_path: args.trust_store,
        add_if_not_known: args.add_if_not_known,
        allow_oneshot: args.oneshot,
        idle_timeout: Duration::from_millis(args.idle_timeout_ms),
    };

    commands::tunnel::command(config, args.forwards, args.reverses).await
}
