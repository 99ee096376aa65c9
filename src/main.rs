use std::{net::SocketAddr, sync::Arc};

use tokio::signal;
use tracing::{error, info, warn};

use order_payments as api;
use api::repositories::{InMemoryOrderRepository, OrderRepository, SeaOrmOrderRepository};
use api::services::orders::{OrderService, OrderSettings};
use api::services::payment_gateway::PaymentGateway;
use api::services::payment_webhooks::PaymentWebhookService;
use api::services::stripe_gateway::StripeGateway;
use api::webhooks::WebhookVerifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Order storage
    let (repository, db): (Arc<dyn OrderRepository>, Option<Arc<_>>) = if cfg
        .uses_in_memory_storage()
    {
        warn!("Using in-memory order storage; orders are lost on restart");
        let repository: Arc<dyn OrderRepository> = Arc::new(InMemoryOrderRepository::new());
        (repository, None)
    } else {
        let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
        if cfg.auto_migrate {
            api::db::run_migrations(&db_pool).await.map_err(|e| {
                error!("Failed running migrations: {}", e);
                e
            })?;
        }
        let db_arc = Arc::new(db_pool);
        let repository: Arc<dyn OrderRepository> =
            Arc::new(SeaOrmOrderRepository::new(db_arc.clone()));
        (repository, Some(db_arc))
    };

    // Payment gateway
    if !cfg.payment_provider.eq_ignore_ascii_case("stripe") {
        return Err(format!("unsupported payment provider '{}'", cfg.payment_provider).into());
    }
    let verifier = match cfg.payment_webhook_secret.clone() {
        Some(secret) => Some(WebhookVerifier::new(
            secret,
            std::time::Duration::from_secs(cfg.payment_webhook_tolerance_secs),
        )),
        None => {
            warn!("payment_webhook_secret not set; every payment webhook will be rejected");
            None
        }
    };
    let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(
        cfg.payment_api_base.clone(),
        cfg.payment_secret_key.clone().unwrap_or_default(),
        verifier,
    )?);

    // Compose shared app state
    let app_state = api::AppState {
        config: cfg.clone(),
        orders: Arc::new(OrderService::new(
            repository.clone(),
            gateway.clone(),
            OrderSettings::from(&cfg),
        )),
        webhooks: Arc::new(PaymentWebhookService::new(repository, gateway)),
        db,
    };

    let app = api::build_router(app_state);

    // Bind and serve
    let host: std::net::IpAddr = cfg.host.parse()?;
    let addr = SocketAddr::from((host, cfg.port));
    info!("order-payments listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
