use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Context};
use psos::{
    logging::init_logging,
    network::{
        banner::{self, BannerInfo},
        mqtt::{tls, MqttConnector},
        proxy::{ProxyConnector, ProxyServer},
        uplink, AlwaysOnline, ConnectionManager, Connector,
    },
    pubsub::{Registry, Router},
    services::Services,
    supervisor::{ProcessReset, ResetHandler, Supervisor, RESET_EXIT_CODE},
    Settings,
};
use tokio::select;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::load().context("failed to load settings")?);
    let logging = init_logging(settings.logging.clone()).map_err(|e| anyhow!(e))?;

    let (uplink, end) = uplink();
    let registry = Arc::new(Registry::new(uplink.clone()));
    let router = Router::new(registry.clone(), uplink).with_local_prefix(settings.router.local_prefix.clone());

    let connector: Arc<dyn Connector> = match &settings.broker.via_proxy {
        Some(address) => Arc::new(ProxyConnector::new(
            address.clone(),
            settings.broker.client_id.clone(),
            settings.io_timeout(),
        )),
        None => {
            let mut connector = MqttConnector::new(settings.mqtt_options());
            if let Some(ca) = &settings.broker.ca_cert {
                connector = connector.with_tls(tls::connector_from_file(Path::new(ca))?);
            }
            Arc::new(connector)
        }
    };

    let proxy = if settings.proxy.enabled {
        let server = ProxyServer::bind(settings.proxy_server_config(), router.clone())
            .await
            .with_context(|| format!("failed to bind proxy server on {}", settings.proxy.listen))?;
        let addr = server.local_addr()?.to_string();
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Proxy server failed");
            }
        });
        Some((addr, shutdown))
    } else {
        None
    };

    let endpoint = connector.endpoint();
    banner::print_banner(&BannerInfo {
        client_id: &settings.broker.client_id,
        broker: &endpoint,
        proxy: proxy.as_ref().map(|(addr, _)| addr.as_str()),
        local_prefix: router.local_prefix(),
    });

    let mut reset = ProcessReset::new();
    if let Some(log_file) = settings.services.reset.as_ref().and_then(|r| r.log_file.as_ref()) {
        reset = reset.with_log_file(log_file);
    }
    let reset = Arc::new(reset);
    let handler: Arc<dyn ResetHandler> = reset.clone();

    let services = Services::new(router.clone(), handler.clone(), settings.clone());
    let tasks = services.spawn_configured();

    let manager = ConnectionManager::new(
        settings.connection_config(),
        connector,
        Arc::new(AlwaysOnline),
        registry,
        end,
    );
    banner::print_startup_log(router.state().as_str());

    let supervisor = Supervisor::new(handler);
    let outcome = select! {
        request = supervisor.run(manager) => request,
        request = reset.wait() => Some(request),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            None
        }
    };

    if let Some((_, shutdown)) = &proxy {
        shutdown.shutdown();
    }
    for task in tasks {
        task.abort();
    }

    match outcome {
        Some(request) => {
            error!(reason = %request.reason, exit_code = RESET_EXIT_CODE, "Exiting for reset");
            logging.shutdown_async().await;
            std::process::exit(RESET_EXIT_CODE);
        }
        None => {
            info!("PSOS stopped");
            logging.shutdown_async().await;
            Ok(())
        }
    }
}
