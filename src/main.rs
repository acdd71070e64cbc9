use std::{net::SocketAddr, sync::Arc};

use tekton_mcp::{
    build_app,
    cache::{key::PIPELINE_RUN_KIND, EventHandler, ResourceRegistry, Synchronizer},
    config::Config,
    kube::{
        client::{KubeClient, TektonResource},
        models::TektonObject,
        watch::{Backoff, Watcher},
    },
    logging,
    mcp::surface::ResourceSurface,
    AppState,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    logging::init_logging(config.log_format);

    let kube = Arc::new(KubeClient::new(&config.kube)?);
    let registry = ResourceRegistry::new_shared();
    let surface = Arc::new(ResourceSurface::new());
    let synchronizer: Arc<dyn EventHandler<TektonObject>> = Arc::new(Synchronizer::<TektonObject>::new(
        PIPELINE_RUN_KIND,
        Arc::clone(&registry),
        surface.clone(),
    ));

    let shutdown = CancellationToken::new();
    let watcher = Watcher::new(
        kube.clone(),
        TektonResource::PipelineRuns,
        config.watch_namespace.clone(),
    )
    .with_backoff(Backoff {
        max_retries: config.watch_max_retries,
        ..Backoff::default()
    });

    // A watcher that gives up takes the server down with it.
    let watch_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let result = watcher.run(synchronizer, shutdown.clone()).await;
            if let Err(err) = &result {
                error!(error = %err, "pipeline run watch failed, shutting down");
            }
            shutdown.cancel();
            result
        }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown signal received");
                    shutdown.cancel();
                }
                Err(err) => warn!(error = %err, "failed to listen for shutdown signal"),
            }
        }
    });

    let bind_socket = config.bind_socket()?;
    let state = AppState::new(
        config.api_token.clone(),
        config.allowed_cidr,
        config.trusted_proxies.clone(),
        kube,
        registry,
        surface,
    );
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        api_server = %config.kube.api_server,
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        "server starting"
    );

    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
    .await?;

    shutdown.cancel();
    watch_task.await??;
    info!("server stopped");
    Ok(())
}
