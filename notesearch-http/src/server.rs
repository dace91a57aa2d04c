use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notesearch::index::{AlgoliaClient, KeyRing, MemoryIndex, SearchIndex};
use notesearch::{IndexSyncTrigger, NoteStore, RetryPolicy, RuntimeConfig, ScopedKeyIssuer};

use crate::auth::{authenticate_index_request, require_identity, EmulatorAuth};
use crate::handlers::{
    create_note, get_object, get_search_key, health, note_created, put_object, query_index,
    AppState, EmulatorState,
};
use crate::identity::{IdentityVerifier, GOOGLE_JWKS_URL};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_CONFIG_PATH: &str = ".runtimeconfig.json";
const EMULATOR_APP_ID: &str = "notesearch-local";

/// The in-process index served under `/1/indexes`.
pub struct Emulator {
    pub auth: Arc<EmulatorAuth>,
    pub state: Arc<EmulatorState>,
}

impl Emulator {
    pub fn new(app_id: impl Into<String>, keys: KeyRing, index: Arc<MemoryIndex>) -> Self {
        Emulator {
            auth: Arc::new(EmulatorAuth {
                app_id: app_id.into(),
                keys,
            }),
            state: Arc::new(EmulatorState { index }),
        }
    }
}

pub fn build_app_state(config: &RuntimeConfig, index: Option<Arc<dyn SearchIndex>>) -> AppState {
    AppState {
        issuer: ScopedKeyIssuer::new(config.algolia.clone()).with_validity(config.key_validity),
        sync_trigger: index.map(IndexSyncTrigger::new),
        notes: NoteStore::new(),
        retry_policy: RetryPolicy::default(),
        trigger_secret: config.trigger_secret.clone(),
        start_time: std::time::Instant::now(),
    }
}

pub fn build_router(
    state: Arc<AppState>,
    verifier: Arc<IdentityVerifier>,
    emulator: Option<Emulator>,
) -> Router {
    let identity_gated = Router::new()
        .route("/getSearchKey", get(get_search_key))
        .route("/notes", post(create_note))
        .route_layer(middleware::from_fn_with_state(verifier, require_identity));

    let public = Router::new()
        .route("/health", get(health))
        .route("/triggers/notes/:noteId/created", post(note_created));

    let app = identity_gated.merge(public).with_state(state);

    let app = match emulator {
        Some(emulator) => {
            let index_routes = Router::new()
                .route("/1/indexes/:indexName/query", post(query_index))
                .route(
                    "/1/indexes/:indexName/:objectID",
                    get(get_object).put(put_object),
                )
                .route_layer(middleware::from_fn_with_state(
                    emulator.auth,
                    authenticate_index_request,
                ))
                .with_state(emulator.state);
            app.merge(index_routes)
        }
        None => app,
    };

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive().max_age(std::time::Duration::from_secs(86400)))
}

/// Chooses how ID tokens are verified. A dev secret selects HS256 and is
/// refused in production; otherwise the provider JWKS is used and a project
/// id is required.
pub fn identity_verifier_from_env(env_mode: &str) -> Result<IdentityVerifier, String> {
    let project_id = std::env::var("NOTESEARCH_PROJECT_ID")
        .ok()
        .filter(|p| !p.trim().is_empty());
    let dev_secret = std::env::var("NOTESEARCH_DEV_JWT_SECRET")
        .ok()
        .filter(|s| !s.is_empty());

    match (dev_secret, project_id) {
        (Some(_), _) if env_mode == "production" => {
            Err("NOTESEARCH_DEV_JWT_SECRET cannot be used in production mode".to_string())
        }
        (Some(secret), project_id) => {
            tracing::warn!("Verifying ID tokens with the development HS256 secret");
            Ok(IdentityVerifier::shared_secret(project_id, secret.as_bytes()))
        }
        (None, Some(project_id)) => {
            let jwks_url =
                std::env::var("NOTESEARCH_JWKS_URL").unwrap_or_else(|_| GOOGLE_JWKS_URL.into());
            Ok(IdentityVerifier::jwks(project_id, jwks_url))
        }
        (None, None) => Err(
            "NOTESEARCH_PROJECT_ID is required to verify ID tokens (or set NOTESEARCH_DEV_JWT_SECRET for local development)"
                .to_string(),
        ),
    }
}

/// Production deliveries must prove they come from the hosting runtime.
pub fn require_trigger_secret(env_mode: &str, config: &RuntimeConfig) -> Result<(), String> {
    let configured = config
        .trigger_secret
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    if env_mode == "production" && !configured {
        return Err("NOTESEARCH_TRIGGER_SECRET is required in production mode".to_string());
    }
    if !configured {
        tracing::warn!("Trigger endpoint accepts unauthenticated deliveries");
    }
    Ok(())
}

fn generate_hex_key() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Fills in whatever the emulator needs that the config lacks.
fn emulator_credentials(config: &mut RuntimeConfig) -> bool {
    let mut generated = false;
    if config.algolia.require_app_id().is_err() {
        config.algolia.app_id = Some(EMULATOR_APP_ID.to_string());
    }
    if config.algolia.require_api_key().is_err() {
        config.algolia.api_key = Some(format!("ns_admin_{}", generate_hex_key()));
        generated = true;
    }
    if config.algolia.require_search_key().is_err() {
        config.algolia.search_key = Some(format!("ns_search_{}", generate_hex_key()));
        generated = true;
    }
    generated
}

pub async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let startup_start = std::time::Instant::now();

    let env_mode = std::env::var("NOTESEARCH_ENV").unwrap_or_else(|_| "development".into());
    let emulate_index = std::env::var("NOTESEARCH_EMULATE_INDEX")
        .ok()
        .filter(|v| v == "1")
        .is_some();
    if emulate_index && env_mode == "production" {
        return Err("--emulate-index cannot be used in production mode".into());
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_addr =
        std::env::var("NOTESEARCH_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let config_path = PathBuf::from(
        std::env::var("NOTESEARCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    let mut config = RuntimeConfig::load(&config_path);
    let verifier = Arc::new(identity_verifier_from_env(&env_mode)?);
    require_trigger_secret(&env_mode, &config)?;

    let (index, emulator, generated_keys): (Option<Arc<dyn SearchIndex>>, _, _) = if emulate_index
    {
        let generated = emulator_credentials(&mut config);
        let memory = Arc::new(MemoryIndex::new());
        let keys = KeyRing::new(
            config.algolia.require_api_key()?,
            config.algolia.require_search_key()?,
        );
        let emulator = Emulator::new(config.algolia.require_app_id()?, keys, memory.clone());
        (
            Some(memory as Arc<dyn SearchIndex>),
            Some(emulator),
            generated,
        )
    } else {
        let missing = config.missing_settings();
        if !missing.is_empty() {
            tracing::error!(
                missing = ?missing,
                "Search index is not fully configured; affected requests will fail"
            );
        }
        let index = match AlgoliaClient::admin(&config.algolia) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn SearchIndex>),
            Err(e) => {
                tracing::error!("Note mirroring disabled: {}", e);
                None
            }
        };
        (index, None, false)
    };

    let state = Arc::new(build_app_state(&config, index));
    let app = build_router(state, verifier, emulator);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, env = %env_mode, emulate_index, "notesearch listening");

    print_startup_banner(
        &local_addr.to_string(),
        emulate_index,
        generated_keys.then_some(&config),
        startup_start.elapsed().as_millis(),
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn print_startup_banner(
    bind_addr: &str,
    emulate_index: bool,
    generated: Option<&RuntimeConfig>,
    startup_ms: u128,
) {
    use colored::Colorize;

    let url = format!("http://{}", bind_addr);
    let version = format!("v{}", env!("CARGO_PKG_VERSION"));
    let timing = format!("ready in {}ms", startup_ms);

    println!();
    println!(
        "  {} {}  {}",
        "notesearch".bold().bright_green(),
        version.as_str().dimmed(),
        timing.as_str().dimmed(),
    );
    println!();
    println!("  {}  Local:       {}", "➜".green(), url.as_str().cyan());
    let key_url = format!("{}/getSearchKey", url);
    println!("  {}  Search key:  {}", "➜".green(), key_url.as_str().cyan());

    if emulate_index {
        println!(
            "  {}  Index:       {} (set {}={})",
            "➜".green(),
            "emulated in-process".yellow(),
            "ALGOLIA_HOST".cyan(),
            url
        );
    }
    if let Some(config) = generated {
        println!();
        println!("  {}  Generated emulator keys (not persisted):", "🔑".bold());
        println!(
            "     app id:     {}",
            config.algolia.app_id.as_deref().unwrap_or_default().cyan()
        );
        println!(
            "     admin key:  {}",
            config.algolia.api_key.as_deref().unwrap_or_default().cyan()
        );
        println!(
            "     search key: {}",
            config.algolia.search_key.as_deref().unwrap_or_default().cyan()
        );
    }
    println!();
}
