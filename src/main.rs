use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vertex_gateway::auth::EnvTokenProvider;
use vertex_gateway::billing::{
    InMemoryQuotaLedger, InMemoryTopUpStore, LogUsageSink, QuotaLedger, StripeCheckout, TopUpRequester, TopUpStore,
    WebhookProcessor,
};
use vertex_gateway::{build_router, AppState, CacheRatioTable, GatewayConfig, ModelRouter, Relay, RelayLog};

#[derive(Parser)]
#[command(
    name = "vertex-gateway",
    about = "API-translation gateway: OpenAI and Claude wire formats in, Google Vertex AI out",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Region setting: `global`, a region name, or a JSON map by model (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// Relay log file path
    #[arg(long, default_value = "vertex-gateway.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vertex_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in vertex_gateway::config::config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref region) = cli.region {
        config.vertex.region = region.clone();
    }

    let relay_log = RelayLog::open(&cli.log_file)?;
    relay_log.compact()?;
    let credentials = config.resolve_credentials()?;

    let cache_ratios = match config.billing.cache_ratio_file {
        Some(ref path) => CacheRatioTable::load(path)?,
        None => CacheRatioTable::default(),
    };
    let router = Arc::new(ModelRouter::new(
        config.router.default_model.clone(),
        chrono::Duration::hours(config.router.retention_hours),
    ));

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let orders: Arc<dyn TopUpStore> = Arc::new(InMemoryTopUpStore::default());
    let ledger: Arc<dyn QuotaLedger> = Arc::new(InMemoryQuotaLedger::default());
    let webhook = config.resolve_webhook_secret().map(|secret| {
        WebhookProcessor::new(
            secret,
            config.billing.signature_tolerance_secs,
            orders.clone(),
            ledger.clone(),
        )
    });
    let mut topup = TopUpRequester::new(orders, config.billing.min_topup, config.billing.server_address.clone());
    if let Some(secret_key) = config.resolve_stripe_secret_key() {
        topup = topup.with_checkout(
            Arc::new(StripeCheckout::new(client.clone(), secret_key)),
            config.billing.stripe_price_id.clone(),
        );
    }
    let admin_token = config.resolve_admin_token();

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           vertex-gateway v{}                ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Project:   {}", credentials.project_id);
    info!("  Region:    {}", if config.vertex.region.is_empty() { "global" } else { &config.vertex.region });
    info!("  Default:   {} ({} mode for unknown models)", config.router.default_model, config.vertex.default_mode);
    info!("  Port:      {}", config.port);
    info!("  Webhook:   {}", if webhook.is_some() { "enabled" } else { "disabled" });
    info!("  Admin:     {}", if admin_token.is_some() { "token required" } else { "open" });
    info!("  Log file:  {}", cli.log_file.display());

    relay_log.info(
        "startup",
        format!(
            "Starting vertex-gateway project={} port={}",
            credentials.project_id, config.port
        ),
    );

    let relay = Relay::new(
        client,
        credentials,
        Arc::new(EnvTokenProvider::new(config.vertex.access_token_env.clone())),
        config.compat.clone(),
        Arc::new(LogUsageSink::new(Some(relay_log.clone()))),
    )
    .with_endpoint_override(config.vertex.endpoint_override.clone())
    .with_relay_log(relay_log.clone());

    let sweep_router = router.clone();
    let sweep_every = std::time::Duration::from_secs(config.router.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_router.sweep_expired(chrono::Utc::now());
            // keep the file no larger than the in-memory ring
            if let Err(e) = relay_log.compact() {
                tracing::warn!(error = %e, "relay log compaction failed");
            }
        }
    });

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        relay,
        router,
        cache_ratios: Arc::new(cache_ratios),
        topup,
        webhook,
        admin_token,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  OpenAI clients:  OPENAI_BASE_URL=http://localhost:{}/v1", port);
    info!("  Claude clients:  ANTHROPIC_BASE_URL=http://localhost:{}", port);
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
