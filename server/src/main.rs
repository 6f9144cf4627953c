use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;

use chathub_server::auth::jwt;
use chathub_server::chat::render::MessageTemplate;
use chathub_server::config::{generate_config_template, Config};
use chathub_server::db::{self, SqliteStore};
use chathub_server::hub::HubHandle;
use chathub_server::routes;
use chathub_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chathub_server=info,tower_http=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Chat hub server v{} starting", env!("CARGO_PKG_VERSION"));

    config.hub.validate()?;

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;
    let store = Arc::new(SqliteStore::new(db));

    // Session key shared with the admin panel
    let jwt_secret = jwt::load_or_generate_jwt_secret(config.jwt_secret.as_deref(), &config.data_dir)?;

    // The template is read-only from here on; load it before the dispatcher starts
    let template = MessageTemplate::load(config.message_template.as_deref().map(Path::new))?;
    let hub = HubHandle::spawn(Arc::new(template));

    let app_state = AppState {
        store,
        hub,
        hub_config: config.hub.clone(),
        jwt_secret: Arc::new(jwt_secret),
    };

    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
