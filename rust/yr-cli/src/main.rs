//! `yr` — multi-role daemon binary. One subcommand per spec §2 component
//! (`ms`, `ls`, `fa`, `ds`, `gs`), each its own module under
//! `src/commands/*.rs` with one verb ("run") per noun, since each role here
//! is a long-running daemon rather than a one-shot CLI operation.

mod commands;
mod shutdown;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "yr", version, about = "Yuanrong-style FaaS scheduling control plane")]
struct Cli {
    /// Address this daemon listens on (recorded, not bound — transport is
    /// out of this core's scope per spec §1).
    #[arg(long, global = true, default_value = "127.0.0.1:0")]
    address: String,

    /// Path to a TOML config file (spec §6.3); falls back to defaults and
    /// `YR_*` env overrides when absent.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    /// OTLP collector endpoint; when unset, tracing stays local (stdout).
    #[arg(long, global = true)]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Metadata Store: KV + lease + watch (spec §4.1).
    Ms,
    /// Local Scheduler (spec §4.4), optionally with a co-located Function
    /// Agent, Group Controller and Bundle Manager.
    Ls {
        /// Address of this LS's parent Domain Scheduler, if any.
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        metastore: String,
    },
    /// Function Agent (spec §4.5).
    Fa {
        #[arg(long)]
        local_scheduler: String,
    },
    /// Domain Scheduler (spec §4.7).
    Ds {
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        metastore: String,
    },
    /// Global Scheduler (spec §4.6).
    Gs {
        #[arg(long)]
        metastore: String,
        /// Whether this instance starts as the active leader; in a real
        /// deployment this is driven by an external election signal
        /// (spec §4.6) and flipped at runtime, not fixed at startup.
        #[arg(long, default_value_t = true)]
        leader: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    yr_otel::init_tracing("yr-cli", cli.otlp_endpoint.as_deref())
        .map_err(|err| anyhow::anyhow!("failed to initialize tracing: {err}"))?;
    let config = yr_config::load_config(cli.config.as_deref())?;

    match cli.role {
        Role::Ms => commands::ms::run(cli.address, config).await,
        Role::Ls { parent, metastore } => {
            commands::ls::run(cli.address, parent, metastore, config).await
        }
        Role::Fa { local_scheduler } => commands::fa::run(cli.address, local_scheduler, config).await,
        Role::Ds { parent, metastore } => {
            commands::ds::run(cli.address, parent, metastore, config).await
        }
        Role::Gs { metastore, leader } => commands::gs::run(cli.address, metastore, leader, config).await,
    }
}
