use hive_harness::{drive, Hive, HiveSettings, DEFAULT_ENDPOINT};
use hive_lib::HiveLayout;
use log::{error, info, warn};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod workdir;

use workdir::WorkdirError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let relays: u32 = std::env::var("HIVE_RELAYS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()?;
    let clients: u32 = std::env::var("HIVE_CLIENTS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()?;
    let workdir = PathBuf::from(
        std::env::var("HIVE_WORKDIR").unwrap_or_else(|_| "/tmp/lokinet_hive".to_string()),
    );
    let netid = std::env::var("HIVE_NETID").unwrap_or_else(|_| "hive".to_string());
    let assume_yes = std::env::var("HIVE_ASSUME_YES").is_ok_and(|v| !v.is_empty() && v != "0");
    let settings: HiveSettings = match std::env::var("HIVE_SETTINGS") {
        Ok(json) => serde_json::from_str(&json)?,
        Err(_) => HiveSettings::default(),
    };

    let stdin = std::io::stdin();
    match workdir::clear(&workdir, assume_yes, &mut stdin.lock(), &mut std::io::stdout()) {
        Ok(true) => info!("removed previous run at {}", workdir.display()),
        Ok(false) => {}
        Err(e @ (WorkdirError::OutsideTmp(_) | WorkdirError::Declined(_))) => warn!("{}", e),
        Err(e) => return Err(e.into()),
    }

    let hive = Hive::new(settings);
    if let Err(e) = hive.populate(&HiveLayout::new(&workdir), relays, clients, &netid) {
        eprintln!("invalid hive configuration: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = hive.start_all().await {
        eprintln!("failed to start hive: {}", e);
        hive.stop_all().await;
        std::process::exit(1);
    }

    let mut endpoints = Vec::new();
    hive.for_each_router(|instance| {
        if !instance.is_client() {
            return;
        }
        match instance.create_endpoint(DEFAULT_ENDPOINT) {
            Ok(address) => endpoints.push((instance.clone(), address)),
            Err(e) => warn!("[{}] no default endpoint: {}", instance.id(), e),
        }
    });

    // Every client greets the next one, the last wraps around to the first.
    let targets = endpoints.iter().map(|(_, address)| address).cycle().skip(1);
    for ((client, _), to) in endpoints.iter().zip(targets) {
        let greeting = format!("hello from {}", client.id());
        if !client.try_send_packet(DEFAULT_ENDPOINT, to, greeting.as_bytes()) {
            warn!("[{}] greeting to {} was not delivered", client.id(), to);
        }
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => error!("cannot listen for interrupt: {}", e),
        }
        trigger.cancel();
    });

    let report = drive(&hive, cancel, |event| match serde_json::to_string(event) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("cannot encode event {}: {}", event, e),
    })
    .await;

    if report.is_clean() {
        info!("all {} instance(s) stopped", report.stopped.len());
    } else {
        warn!(
            "{} instance(s) abandoned during shutdown: {:?}",
            report.abandoned.len(),
            report.abandoned
        );
    }
    Ok(())
}
