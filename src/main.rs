use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use vaultledger::datasource::{
    CachedChainData, FallbackPriceSource, HttpPriceSource, StoredChainData, StoredPriceSource,
};
use vaultledger::{
    api, config::Config, db::init_db, ChainDataProvider, Compiler, Orchestrator, PriceSource,
    Repository,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));

    let stored_prices: Arc<dyn PriceSource> = Arc::new(StoredPriceSource::new(repo.clone()));
    let prices: Arc<dyn PriceSource> = match &config.price_api_url {
        Some(url) => Arc::new(FallbackPriceSource::new(
            stored_prices,
            Arc::new(HttpPriceSource::new(url.clone())),
        )),
        None => stored_prices,
    };
    let chain: Arc<dyn ChainDataProvider> = Arc::new(CachedChainData::new(
        StoredChainData::new(repo.clone()),
        config.vault_cache_capacity,
    ));

    let compiler = Compiler::new(repo.clone(), chain, prices, config.compile_settings())
        .with_rewarders(config.rewarders.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        compiler,
        repo.clone(),
        config.networks.clone(),
        Duration::from_secs(config.run_interval_secs),
    ));
    tokio::spawn(orchestrator.run_forever());

    // Create router
    let app = api::create_router(api::AppState::new(repo, config));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
