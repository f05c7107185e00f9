use powermeter_exporter::{
    api,
    serial::{SerialConfig, SerialConnector},
    ApiManager, Config, MeterMetrics, MqttManager, SmlManager,
};
use tokio::task::JoinHandle;
use std::{sync::Arc, time::Duration};
use log::{error, info};


#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = Config::load();

    // Initialize logging, the debug switch of the config wins over the env
    let default_filter = match &config {
        Ok(c) if c.debug => "debug".to_string(),
        _ => std::env::var("PM_LOG_LEVEL").unwrap_or("info".to_string()),
    };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let metrics = Arc::new(MeterMetrics::new(&config.meter.name));
    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    // MQTT is optional, without it readings only go to the metrics endpoint
    let mqtt_sender = match &config.mqtt {
        Some(mqtt_config) => {
            let (mut mqtt, tx) = MqttManager::new(mqtt_config, metrics.clone());
            threads.push(tokio::spawn(async move {
                mqtt.start_thread().await;
            }));
            Some(tx)
        }
        None => {
            info!("No MQTT configured");
            None
        }
    };

    // Exactly one worker owns the serial connection
    let connector = SerialConnector::new(SerialConfig::new(&config.meter.device));
    let mut sml = SmlManager::new(connector, &config.meter, metrics.clone(), mqtt_sender);
    threads.push(tokio::spawn(async move {
        if let Err(e) = sml.start_thread().await {
            error!("Unable to start reading the meter: {}", e);
            std::process::exit(1);
        }
    }));

    let stale_after = api::stale_after(config.meter.interval);
    let api = ApiManager::new(config.httpd.port, metrics.clone(), stale_after);
    threads.push(tokio::spawn(async move {
        if let Err(e) = api.start_thread().await {
            error!("HTTP server failed: {}", e);
        }
    }));

    info!("All modules started, now waiting for a signal to exit");
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        if threads.iter().any(|task| task.is_finished()) {
            error!("A module stopped, shutting down");
            for task in threads.iter_mut() {
                task.abort();
            }
            break;
        }
    }
    std::process::exit(1);
}
