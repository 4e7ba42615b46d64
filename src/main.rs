#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use confab_server::api::MgmtState;
use confab_server::config::Config;
use confab_server::storage::object_store::S3ObjectStore;
use confab_server::storage::{self, StoreBundle};
use confab_server::telemetry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    confab_server::setup_panic_hook();

    let boot_span = tracing::info_span!("boot_server");
    let (api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, _shutdown_rx) = async {
        // Phase 1: Infrastructure (pool, migrations, object storage, signals)
        let pool = storage::init_pool(&config.database_url).await?;
        confab_server::run_migrations(&pool).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        confab_server::spawn_signal_handler(shutdown_tx.clone());

        let objects = Arc::new(S3ObjectStore::new(&config.storage).await);

        // Phase 2: Component wiring
        let stores = StoreBundle::postgres(pool.clone());
        let services = confab_server::api::ServiceContainer::build(
            &config,
            stores,
            objects,
            Some(pool),
            shutdown_rx.clone(),
        );

        // Phase 3: Listeners and routers
        let mgmt_app =
            confab_server::api::mgmt_router(MgmtState { health_service: services.health_service.clone() });
        let app_router = confab_server::api::app_router(config.clone(), services, shutdown_rx.clone());

        let api_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let mgmt_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.mgmt_port).parse()?;

        tracing::info!(address = %api_addr, "listening");
        tracing::info!(address = %mgmt_addr, "management server listening");

        let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
        let mgmt_listener = tokio::net::TcpListener::bind(mgmt_addr).await?;

        Ok::<
            (
                tokio::net::TcpListener,
                tokio::net::TcpListener,
                axum::Router,
                axum::Router,
                watch::Sender<bool>,
                watch::Receiver<bool>,
            ),
            anyhow::Error,
        >((api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, shutdown_rx))
    }
    .instrument(boot_span)
    .await?;

    // Phase 4: Serve until shutdown
    let mut api_rx = shutdown_tx.subscribe();
    let api_server = axum::serve(api_listener, app_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = api_rx.wait_for(|&s| s).await;
        });

    let mut mgmt_rx = shutdown_tx.subscribe();
    let mgmt_server = axum::serve(mgmt_listener, mgmt_app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = mgmt_rx.wait_for(|&s| s).await;
        });

    if let Err(e) = tokio::try_join!(api_server, mgmt_server) {
        tracing::error!(error = %e, "Server error");
    }

    // Phase 5: Signal background tasks (sweepers, GC, sessions) and give
    // them a bounded window to observe the flag before the process exits.
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(std::time::Duration::from_millis(
        config.server.shutdown_timeout_secs.min(2) * 100,
    ))
    .await;
    tracing::info!("Background tasks signalled to stop.");

    telemetry_guard.shutdown();
    Ok(())
}
