//! Startup ordering and signal-driven graceful shutdown.
//!
//! Fixed sequence: database (with migrations) → API-key auto-mint → TXT
//! store and TLS global state → HTTP + API listeners → DNS (UDP + TCP,
//! bind errors fatal) → HTTPS (manual pair or ACME config) → ACME issuance
//! → wait for SIGINT/SIGTERM. Shutdown gives every server 30 s and closes
//! the database last.

use crate::acme::{
    acme_server_config, init_crypto_provider, manual_server_config, AcmeManager, CertSlots,
    CertStore, Http01Challenges, TxtStore,
};
use crate::auth;
use crate::config::{Config, SharedConfig, TlsMode};
use crate::db::Db;
use crate::error::Error;
use crate::plugins::{DefaultResponsePlugin, Pipeline, StoragePlugin};
use crate::server::{api, dns, http};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Run the server until a termination signal arrives.
pub async fn run(config: Config) -> Result<(), Error> {
    config.validate()?;
    let config: SharedConfig = Arc::new(config);

    let db = Db::open(&config.db_path).await?;
    mint_api_key_if_missing(&db).await?;

    let tls_mode = config.tls_mode();
    let txt_store = Arc::new(TxtStore::new());
    let http01 = Arc::new(Http01Challenges::new());
    let cert_slots = Arc::new(CertSlots::new());
    // Process-wide TLS state must be settled before any listener accepts.
    init_crypto_provider();

    let mut pipeline = Pipeline::new();
    pipeline.set_store(Arc::new(db.clone()));
    pipeline.register(Arc::new(StoragePlugin::new(db.clone())));
    pipeline.register(Arc::new(DefaultResponsePlugin::new(&config.public_ip)));
    let pipeline = Arc::new(pipeline);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // HTTP capture listener.
    let http_router = http::router(http::CaptureState {
        config: config.clone(),
        pipeline: pipeline.clone(),
        http01: http01.clone(),
        tls: false,
    });
    let http_addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let http_task = tokio::spawn(serve_plain(
        "http",
        http_addr,
        http_router,
        shutdown_rx.clone(),
    ));

    // REST API listener.
    let api_router = api::router(api::ApiState {
        config: config.clone(),
        db: db.clone(),
        pipeline: pipeline.clone(),
    });
    let api_addr: SocketAddr = ([0, 0, 0, 0], config.api_port).into();
    let api_task = tokio::spawn(serve_plain("api", api_addr, api_router, shutdown_rx.clone()));

    // DNS listener. Binding happens here so port conflicts abort startup.
    let dns_handler = dns::Handler::new(
        config.clone(),
        db.clone(),
        txt_store.clone(),
        pipeline.clone(),
    );
    let mut dns_server = dns::new(config.clone(), dns_handler).await?;
    info!(port = config.dns_port, "dns server listening (udp+tcp)");
    let dns_task = tokio::spawn(async move {
        if let Err(err) = dns_server.block_until_done().await {
            error!(error = %err, "dns server error");
        }
    });

    // HTTPS listener plus, in ACME mode, the issuance/renewal loop.
    let https_handle = axum_server::Handle::new();
    let mut https_task = None;
    let mut acme_task = None;
    match tls_mode {
        TlsMode::Acme => {
            let manager = Arc::new(AcmeManager::new(
                &config.domain,
                config.acme_email.clone(),
                &config.public_ip,
                config.acme_staging,
                CertStore::new(db.clone()),
                txt_store.clone(),
                http01.clone(),
                cert_slots.clone(),
            ));

            let https_router = http::router(http::CaptureState {
                config: config.clone(),
                pipeline: pipeline.clone(),
                http01: http01.clone(),
                tls: true,
            });
            let tls_config = acme_server_config(cert_slots.clone(), &config.public_ip);
            https_task = Some(tokio::spawn(serve_tls(
                "https",
                ([0, 0, 0, 0], config.https_port).into(),
                https_router,
                tls_config,
                https_handle.clone(),
            )));

            info!(domain = %config.domain, staging = config.acme_staging,
                "starting acme certificate management");
            acme_task = Some(tokio::spawn(manager.run()));
        }
        TlsMode::Manual => {
            let (cert_path, key_path) = match (&config.tls_cert, &config.tls_key) {
                (Some(cert), Some(key)) => (cert.clone(), key.clone()),
                _ => unreachable!("manual tls mode implies both paths"),
            };
            let tls_config = manual_server_config(&cert_path, &key_path)?;
            let https_router = http::router(http::CaptureState {
                config: config.clone(),
                pipeline: pipeline.clone(),
                http01: http01.clone(),
                tls: true,
            });
            https_task = Some(tokio::spawn(serve_tls(
                "https",
                ([0, 0, 0, 0], config.https_port).into(),
                https_router,
                tls_config,
                https_handle.clone(),
            )));
        }
        TlsMode::Disabled => {
            info!("https disabled: no-acme specified without manual certificates");
        }
    }

    wait_for_signal().await;
    info!("shutting down");

    let _ = shutdown_tx.send(true);
    https_handle.graceful_shutdown(Some(SHUTDOWN_DEADLINE));

    let drain = async {
        let _ = http_task.await;
        let _ = api_task.await;
        if let Some(task) = https_task {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        warn!("listeners did not drain before deadline");
    }

    if let Some(task) = acme_task {
        task.abort();
    }
    dns_task.abort();

    db.close().await;
    info!("goodbye");
    Ok(())
}

/// First process start auto-mints an API key and shows its display form
/// once. It is never recoverable afterwards.
async fn mint_api_key_if_missing(db: &Db) -> Result<(), Error> {
    if db.count_api_keys().await? > 0 {
        return Ok(());
    }
    let key = auth::generate_api_key();
    db.create_api_key(&key.prefix, &key.hash).await?;
    println!("=============================================================");
    println!("API KEY CREATED (save this, it will not be shown again):");
    println!("{}", key.display);
    println!("=============================================================");
    Ok(())
}

async fn serve_plain(
    name: &'static str,
    addr: SocketAddr,
    router: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(server = name, %addr, error = %err, "listener failed to bind");
            return;
        }
    };
    info!(server = name, %addr, "listening");

    let serve = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });

    if let Err(err) = serve.await {
        error!(server = name, error = %err, "server error");
    }
}

async fn serve_tls(
    name: &'static str,
    addr: SocketAddr,
    router: axum::Router,
    tls_config: Arc<rustls::ServerConfig>,
    handle: axum_server::Handle,
) {
    info!(server = name, %addr, "listening");
    let rustls_config = axum_server::tls_rustls::RustlsConfig::from_config(tls_config);
    let result = axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await;
    if let Err(err) = result {
        error!(server = name, error = %err, "server error");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    error!(error = %err, "failed to install sigterm handler");
                    ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
