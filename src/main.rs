//! Thin CLI wrapper over [`tubular::Dispatcher`]. Argument parsing,
//! configuration-file loading, and Prometheus exposition are external
//! collaborators' concern (§1); this binary exists to exercise the
//! library end-to-end, not to be the operator-facing daemon.

use std::os::fd::{FromRawFd, OwnedFd};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tubular::dispatcher::Dispatcher;
use tubular::kernel::aya_backed::AyaMapSet;
use tubular::{Binding, Label, Prefix, Protocol};

#[derive(Parser, Debug)]
#[command(name = "tubular", about = "Socket dispatcher control plane")]
struct Cli {
    /// Network namespace to operate in.
    #[arg(long, default_value = "/proc/self/ns/net")]
    netns: PathBuf,

    /// Root directory for pinned state.
    #[arg(long, default_value = "/sys/fs/bpf")]
    state_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, pin, and attach the classifier for this namespace.
    Create,
    /// Tear down the classifier and every pinned object.
    Unload,
    /// Swap in a freshly built classifier program without dropping state.
    Upgrade,
    /// Add a steering rule.
    Bind {
        label: String,
        protocol: ProtocolArg,
        prefix: String,
        #[arg(default_value_t = 0)]
        port: u16,
    },
    /// Remove a steering rule.
    Unbind {
        label: String,
        protocol: ProtocolArg,
        prefix: String,
        #[arg(default_value_t = 0)]
        port: u16,
    },
    /// List every stored binding.
    ListBindings,
    /// List every destination record.
    ListDestinations,
    /// Register the calling process's inherited fd 3 under `label`.
    RegisterSocket { label: String },
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum ProtocolArg {
    Tcp,
    Udp,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Tcp => Protocol::Tcp,
            ProtocolArg::Udp => Protocol::Udp,
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::Targets::new().with_target("tubular", tracing::Level::INFO))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Create => {
            Dispatcher::<AyaMapSet>::create(&cli.netns, &cli.state_root)
                .context("creating dispatcher state")?;
            tracing::info!("dispatcher created");
        }
        Command::Unload => {
            Dispatcher::<AyaMapSet>::unload(&cli.netns, &cli.state_root)
                .context("unloading dispatcher state")?;
            tracing::info!("dispatcher unloaded");
        }
        Command::Upgrade => {
            Dispatcher::<AyaMapSet>::upgrade(&cli.netns, &cli.state_root)
                .context("upgrading classifier program")?;
            tracing::info!("classifier upgraded");
        }
        Command::Bind { label, protocol, prefix, port } => {
            let mut dispatcher = open_writable(&cli)?;
            let binding = parse_binding(label, protocol, prefix, port)?;
            dispatcher.add_binding(&binding).context("adding binding")?;
            tracing::info!(%binding, "binding added");
        }
        Command::Unbind { label, protocol, prefix, port } => {
            let mut dispatcher = open_writable(&cli)?;
            let binding = parse_binding(label, protocol, prefix, port)?;
            dispatcher.remove_binding(&binding).context("removing binding")?;
            tracing::info!(%binding, "binding removed");
        }
        Command::ListBindings => {
            let mut dispatcher = open_read_only(&cli)?;
            for binding in dispatcher.list_bindings().context("listing bindings")? {
                println!("{binding}");
            }
        }
        Command::ListDestinations => {
            let mut dispatcher = open_read_only(&cli)?;
            for (destination, record) in dispatcher.list_destinations().context("listing destinations")? {
                println!(
                    "{destination} id={} refcount={} socket={}",
                    record.id, record.refcount, record.socket_installed
                );
            }
        }
        Command::RegisterSocket { label } => {
            let mut dispatcher = open_writable(&cli)?;
            // fd 3 is the systemd socket-activation base; the caller
            // supplies the label out-of-band (§6).
            let fd = unsafe { OwnedFd::from_raw_fd(3) };
            let label = Label::new(label).context("invalid label")?;
            let created = dispatcher.register_socket(fd, label).context("registering socket")?;
            tracing::info!(created, "socket registered");
        }
    }

    Ok(())
}

fn open_writable(cli: &Cli) -> eyre::Result<Dispatcher<AyaMapSet>> {
    Dispatcher::<AyaMapSet>::open(&cli.netns, &cli.state_root, false).context("opening dispatcher state")
}

fn open_read_only(cli: &Cli) -> eyre::Result<Dispatcher<AyaMapSet>> {
    Dispatcher::<AyaMapSet>::open(&cli.netns, &cli.state_root, true).context("opening dispatcher state")
}

fn parse_binding(label: String, protocol: ProtocolArg, prefix: String, port: u16) -> eyre::Result<Binding> {
    let (ip, len) = prefix
        .split_once('/')
        .context("prefix must be in CIDR form, e.g. 10.0.0.0/8")?;
    let ip = ip.parse().context("invalid IP address")?;
    let len: u8 = len.parse().context("invalid prefix length")?;
    let prefix = Prefix::new(ip, len)?;
    let label = Label::new(label)?;
    Ok(Binding::new(label, protocol.into(), prefix, port))
}
