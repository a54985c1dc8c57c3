use std::sync::Arc;

use anyhow::{Error, Result};
use notification_service::{
    api::run_api_server,
    clients::{
        broker::MessageBroker, email::SendGridProvider, health::HealthChecker,
        rbmq::RabbitMqClient, task_api::TaskApiClient,
    },
    config::Config,
    dispatcher::{Dispatcher, DispatcherConfig, DispatcherWorker},
    handlers::{
        HandlerRegistry,
        email::{EmailSettings, register_email_handler},
    },
    producer::{GraduationSchedule, GraduationWorker},
    publisher::NotificationPublisher,
    utils::shutdown_signal,
};
use tokio::{sync::watch, task::JoinSet};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(&config);

    info!("Configuration validated. Starting notification service");

    // The only failure allowed to stop the process: no broker at startup.
    let rabbitmq = Arc::new(RabbitMqClient::connect(&config).await?);
    let broker: Arc<dyn MessageBroker> = rabbitmq.clone();

    let task_api = Arc::new(TaskApiClient::new(&config)?);
    let provider = Arc::new(SendGridProvider::new(&config)?);

    let mut registry = HandlerRegistry::new();
    register_email_handler(&mut registry, provider, EmailSettings::from_config(&config));
    let dispatcher = Dispatcher::new(Arc::new(registry));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let health_checker = HealthChecker::new(rabbitmq.clone(), task_api.clone());
    let api_shutdown = shutdown_rx.clone();
    let server_port = config.server_port;
    tokio::spawn(async move {
        if let Err(e) = run_api_server(server_port, health_checker, api_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    let mut workers = JoinSet::new();

    for id in 0..config.worker_concurrency {
        let worker = DispatcherWorker::new(
            id,
            broker.clone(),
            dispatcher.clone(),
            DispatcherConfig::from_config(&config),
        );
        let shutdown = shutdown_rx.clone();

        workers.spawn(async move {
            worker.run(shutdown).await;
        });
    }

    if config.graduation_worker_enabled {
        let worker = GraduationWorker::new(
            task_api,
            NotificationPublisher::new(broker.clone(), config.notification_queue_name.clone()),
            GraduationSchedule::from_config(&config),
        );
        let shutdown = shutdown_rx.clone();

        workers.spawn(async move {
            worker.run(shutdown).await;
        });
    } else {
        info!("Graduation worker disabled for this replica");
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Worker task panicked");
        }
    }

    info!("Notification service stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}
