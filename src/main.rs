use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use wecom_bridge::ai::HttpAiClient;
use wecom_bridge::config::Config;
use wecom_bridge::crypto::WecomCrypto;
use wecom_bridge::dedup::MemoryDedupStore;
use wecom_bridge::dispatch::CallbackDispatcher;
use wecom_bridge::gateway;
use wecom_bridge::handlers::{implemented_actions, AiGroup, CommandGroup, OpsGroup, UtilGroup};
use wecom_bridge::ledger::{NoopLedger, ProcessingLedger, SqliteLedger};
use wecom_bridge::ops;
use wecom_bridge::outbound::{ReplySender, WecomSender};
use wecom_bridge::registry::CommandRegistry;

#[derive(Parser)]
#[command(name = "wecom-bridge", version, about = "WeChat Work callback bridge")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "wecom-bridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the inbound callback gateway.
    Gateway,
    /// Run the host-automation remote-procedure server.
    Ops,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Gateway => run_gateway(config).await,
        Commands::Ops => ops::run_ops(config.ops).await,
    }
}

async fn run_gateway(config: Config) -> Result<()> {
    let crypto = WecomCrypto::new(&config.wecom.token, &config.wecom.encoding_aes_key)
        .context("invalid wecom callback credentials")?;

    let sender: Arc<dyn ReplySender> = Arc::new(WecomSender::new(config.wecom.clone()));
    let ai_client = Arc::new(HttpAiClient::new(config.ai.clone()));

    let groups: Vec<Arc<dyn CommandGroup>> = vec![
        Arc::new(AiGroup::new(
            ai_client,
            Arc::clone(&sender),
            config.ai.clone(),
        )),
        Arc::new(OpsGroup::new(Arc::clone(&sender))),
        Arc::new(UtilGroup::new(Arc::clone(&sender))),
    ];

    // Fails fast if a configured keyword rule names a missing action.
    let registry = CommandRegistry::new(
        config.wecom.admin_users.clone(),
        config.wecom.keyword_rules.clone(),
        implemented_actions(&groups),
    )
    .context("command registry validation failed")?;

    let ledger: Arc<dyn ProcessingLedger> = match &config.ledger.db_path {
        Some(path) => Arc::new(SqliteLedger::new(path.clone())?),
        None => Arc::new(NoopLedger),
    };

    let dispatcher = CallbackDispatcher::new(
        crypto,
        registry,
        groups,
        Arc::new(MemoryDedupStore::new(config.gateway.dedup_max_keys)),
        ledger,
        sender,
        config.wecom.agent_id.clone(),
        Duration::from_secs(config.gateway.dedup_ttl_secs),
    );

    gateway::run_gateway(
        &config.gateway.host,
        config.gateway.port,
        Arc::new(dispatcher),
    )
    .await
}
