use colabri_note::config::Config;
use colabri_note::db::memstore::MemoryNoteStore;
use colabri_note::db::pgstore::PgNoteStore;
use colabri_note::db::NoteStore;
use colabri_note::routes::create_app;
use colabri_note::ws::Collab;
use colabri_note::AppState;
use colabri_note::auth::IdentityProvider;
use std::net::SocketAddr;
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "colabri_note=debug,tower_http=debug,info".into()
        }))
        .init();

    info!("Starting server...");

    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let store: Arc<dyn NoteStore> = match &config.db_url {
        Some(db_url) => match PgNoteStore::connect(db_url).await {
            Ok(store) => {
                info!("Database initialized successfully");
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                return;
            }
        },
        None => {
            warn!("No database URL configured - notes are kept in memory only");
            Arc::new(MemoryNoteStore::new())
        }
    };

    if config.auth_jwt_secret.is_none() {
        warn!("No JWT secret configured - all connections are anonymous");
    }

    let collab = Collab::start(store, config.collab_settings());
    let state = Arc::new(AppState {
        coordinator: collab.coordinator().clone(),
        identity: IdentityProvider::new(config.auth_jwt_secret.clone()),
    });
    let app = create_app(state, &config.cors_origin_list());

    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            return;
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 Note websocket available at ws://{}/ws/:note_id", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await;
    if let Err(e) = served {
        error!("Server error: {}", e);
    }

    collab.shutdown().await;
}
