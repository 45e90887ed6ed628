use cti_live::{Config, Handlers, RealtimeClient, UpdateKind};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let config = Config::from_env()
        .map_err(|err| {
            println!("Invalid config: {}", err);
            std::process::exit(1);
        })
        .unwrap();

    let handlers = Handlers::new()
        .on_feed_update(|data| {
            let count = data
                .get("recent_indicators")
                .and_then(|v| v.as_array())
                .map(Vec::len)
                .unwrap_or_default();
            println!("feed update, {} recent indicators", count);
            Ok(())
        })
        .on_report_update(|data| {
            println!("report update: {}", data);
            Ok(())
        })
        .on_new_indicator(|indicator, timestamp| {
            println!(
                "new indicator at {}: {}",
                timestamp.unwrap_or("unknown time"),
                indicator
            );
            Ok(())
        })
        .on_status(|status| println!("[{}] {}", status.severity(), status))
        .on_error(|err| println!("error: {}", err));

    let client = RealtimeClient::from_config(&config, handlers).unwrap();

    client.init();
    client.request_update(UpdateKind::Feed);
    client.request_update(UpdateKind::Report);

    tokio::signal::ctrl_c().await.unwrap();

    client.shutdown().await;
}
