#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

mod common;

use common::*;
use hive_harness::{Hive, HiveError, DEFAULT_ENDPOINT};
use hive_lib::{Config, ConfigError, Descriptor, EventKind, InstanceId, KeyMaterial, Role};
use hive_node::{InstanceError, InstanceState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_five_relays_three_clients() {
    let dir = TempDir::new().expect("tempdir");
    let hive = simulated_hive(&dir, 5, 3);
    assert_eq!(hive.len(), 8);

    hive.start_all().await.expect("Failed to start hive");
    assert_eq!(hive.running_count(), 8);

    let mut addresses = Vec::new();
    let mut relay_refusals = 0;
    hive.for_each_router(|instance| match instance.create_endpoint(DEFAULT_ENDPOINT) {
        Ok(address) => addresses.push(address),
        Err(InstanceError::RelayHasNoEndpoint(_)) => relay_refusals += 1,
        Err(e) => panic!("unexpected endpoint error: {e}"),
    });
    assert_eq!(addresses.len(), 3);
    assert_eq!(relay_refusals, 5);
    assert_eq!(hive.transport().registered_addresses().len(), 3);

    let report = hive.stop_all().await;
    assert_eq!(report.stopped.len(), 8);
    assert!(report.is_clean());

    let mut events = Vec::new();
    while let Some(event) = hive.next_event().await {
        events.push(event);
    }
    assert_eq!(hive.next_event().await, None);
    assert_eq!(count(&events, "Started"), 8);
    assert_eq!(count(&events, "EndpointReady"), 3);
    assert_eq!(count(&events, "Stopped"), 8);

    // Per producer: gapless sequences starting at zero, Started before Stopped.
    let mut by_instance: BTreeMap<InstanceId, Vec<_>> = BTreeMap::new();
    for event in &events {
        by_instance.entry(event.instance).or_default().push(event);
    }
    assert_eq!(by_instance.len(), 8);
    for (instance, events) in by_instance {
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        let expected: Vec<u64> = (0..events.len() as u64).collect();
        assert_eq!(sequences, expected, "sequences of {instance}");
        assert_eq!(events.first().map(|e| e.kind.name()), Some("BootstrapComplete"));
        assert_eq!(events.last().map(|e| &e.kind), Some(&EventKind::Stopped));
    }
}

#[tokio::test]
async fn test_seed_descriptor_exists_before_others_start() {
    let dir = TempDir::new().expect("tempdir");
    let seed_path = layout(&dir).seed_descriptor();
    let log: SeedLog = Arc::default();
    let recorder = log.clone();
    let hive = scripted_hive(&dir, 3, 2, move |_| ScriptedEngine {
        seed_seen: Some((seed_path.clone(), recorder.clone())),
        ..Default::default()
    });

    hive.start_all().await.expect("Failed to start hive");

    let log = log.lock().expect("seed log").clone();
    assert_eq!(log.len(), 5);
    for (instance, seen) in log {
        if instance == InstanceId::relay(1) {
            assert!(!seen, "seed found a descriptor before writing it");
        } else {
            assert!(seen, "{instance} started before the seed descriptor existed");
        }
    }
    hive.stop_all().await;
}

#[tokio::test]
async fn test_missing_descriptor_fails_bootstrap() {
    let dir = TempDir::new().expect("tempdir");
    let hive = scripted_hive(&dir, 2, 1, |config| ScriptedEngine {
        skip_descriptor: config.id() == InstanceId::relay(1),
        ..Default::default()
    });

    let err = hive.start_all().await.expect_err("bootstrap should fail");
    match err {
        HiveError::BootstrapFailed { seed, path, .. } => {
            assert_eq!(seed, InstanceId::relay(1));
            assert_eq!(path, layout(&dir).seed_descriptor());
        }
        other => panic!("unexpected error: {other}"),
    }

    let seed = hive.seed().expect("seed");
    assert_eq!(seed.state(), InstanceState::Stopped);
    for id in [InstanceId::relay(2), InstanceId::client(1)] {
        let instance = hive.instance(id).expect("instance");
        assert_eq!(instance.state(), InstanceState::Created, "{id} was started");
    }
}

#[tokio::test]
async fn test_failed_start_rolls_back_everyone() {
    let dir = TempDir::new().expect("tempdir");
    let hive = scripted_hive(&dir, 3, 3, |config| ScriptedEngine {
        fail_start: config.id() == InstanceId::client(2),
        ..Default::default()
    });

    let err = hive.start_all().await.expect_err("start-all should fail");
    assert!(
        matches!(err, HiveError::InstanceStart { instance, .. } if instance == InstanceId::client(2)),
        "unexpected error: {err}"
    );
    assert_eq!(hive.running_count(), 0);
    assert_eq!(
        hive.instance(InstanceId::client(2)).map(|i| i.state()),
        Some(InstanceState::Failed)
    );
    assert_eq!(
        hive.seed().map(|i| i.state()),
        Some(InstanceState::Stopped)
    );
}

#[tokio::test]
async fn test_stop_all_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let hive = simulated_hive(&dir, 2, 1);
    hive.start_all().await.expect("Failed to start hive");

    let first = hive.stop_all().await;
    assert_eq!(first.stopped.len(), 3);
    let second = hive.stop_all().await;
    assert!(second.stopped.is_empty() && second.abandoned.is_empty());

    let events = shut_down_and_drain(&hive).await;
    assert_eq!(count(&events, "Stopped"), 3);

    let layout = layout(&dir);
    assert!(matches!(
        hive.add_client(Config::client(&layout, 9, "hive-test")),
        Err(HiveError::ShutDown)
    ));
    assert!(matches!(hive.start_all().await, Err(HiveError::ShutDown)));
}

#[tokio::test]
async fn test_hung_instance_is_abandoned() {
    let dir = TempDir::new().expect("tempdir");
    let hive = scripted_hive(&dir, 2, 1, |config| ScriptedEngine {
        hang_stop: config.id() == InstanceId::relay(2),
        ..Default::default()
    });
    hive.start_all().await.expect("Failed to start hive");

    let report = hive.stop_all().await;
    assert_eq!(report.abandoned, vec![InstanceId::relay(2)]);
    assert_eq!(report.stopped.len(), 2);
    assert!(!report.is_clean());
    assert_eq!(
        hive.instance(InstanceId::relay(2)).map(|i| i.state()),
        Some(InstanceState::Failed)
    );
}

#[tokio::test]
async fn test_registration_rejects_bad_configs() {
    let dir = TempDir::new().expect("tempdir");
    let layout = layout(&dir);
    let hive = Hive::new(fast_settings());

    hive.add_router(Config::relay(&layout, 1, "hive-test"))
        .expect("Failed to add seed");
    assert!(matches!(
        hive.add_router(Config::relay(&layout, 1, "hive-test")),
        Err(HiveError::Config(ConfigError::DuplicateIndex(_)))
    ));
    assert!(matches!(
        hive.add_router(Config::client(&layout, 1, "hive-test")),
        Err(HiveError::Config(ConfigError::RoleMismatch { .. }))
    ));

    let mut shared = Config::relay(&layout, 2, "hive-test");
    shared.identity_keyfile = layout.relay_dir(1).join("identity.key");
    assert!(matches!(
        hive.add_router(shared),
        Err(HiveError::Config(ConfigError::PathCollision { owner, .. })) if owner == InstanceId::relay(1)
    ));

    let mut relative = Config::client(&layout, 1, "hive-test");
    relative.pidfile = "hive.pid".into();
    assert!(matches!(
        hive.add_client(relative),
        Err(HiveError::Config(ConfigError::InvalidPath { .. }))
    ));

    // Same index, different role.
    hive.add_client(Config::client(&layout, 1, "hive-test"))
        .expect("client-1 should coexist with relay-1");
    assert_eq!(hive.len(), 2);
}

#[tokio::test]
async fn test_start_all_checks_seed_and_anchors() {
    let dir = TempDir::new().expect("tempdir");
    let layout = layout(&dir);

    let empty = Hive::new(fast_settings());
    empty.start_all().await.expect("empty hive starts trivially");

    let clients_only = Hive::new(fast_settings());
    clients_only
        .add_client(Config::client(&layout, 1, "hive-test"))
        .expect("Failed to add client");
    assert!(matches!(
        clients_only.start_all().await,
        Err(HiveError::Config(ConfigError::NoSeed))
    ));

    let orphaned = Hive::new(fast_settings());
    orphaned
        .add_router(Config::relay(&layout, 1, "hive-test"))
        .expect("Failed to add seed");
    let mut client = Config::client(&layout, 1, "hive-test");
    client.bootstrap.clear();
    orphaned.add_client(client).expect("Failed to add client");
    assert!(matches!(
        orphaned.start_all().await,
        Err(HiveError::Config(ConfigError::MissingAnchor { instance, .. })) if instance == InstanceId::client(1)
    ));
    assert_eq!(orphaned.running_count(), 0);
}

#[tokio::test]
async fn test_restart_instance() {
    let dir = TempDir::new().expect("tempdir");
    let hive = simulated_hive(&dir, 2, 1);
    hive.start_all().await.expect("Failed to start hive");

    let client = InstanceId::client(1);
    hive.restart_instance(client).await.expect("Failed to restart");
    assert!(hive.instance(client).is_some_and(|i| i.is_running()));

    assert!(matches!(
        hive.restart_instance(InstanceId::client(7)).await,
        Err(HiveError::UnknownInstance(_))
    ));

    let events = shut_down_and_drain(&hive).await;
    let kinds: Vec<&str> = events
        .iter()
        .filter(|e| e.instance == client)
        .map(|e| e.kind.name())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "BootstrapComplete",
            "Started",
            "Stopped",
            "BootstrapComplete",
            "Started",
            "Stopped"
        ]
    );
}

#[tokio::test]
async fn test_for_each_router_tolerates_reentry() {
    let dir = TempDir::new().expect("tempdir");
    let hive = simulated_hive(&dir, 2, 1);
    let layout = layout(&dir);

    let mut visited = Vec::new();
    hive.for_each_router(|instance| {
        visited.push(instance.id());
        assert!(hive.instance(instance.id()).is_some());
        if instance.id() == InstanceId::relay(1) {
            hive.add_client(Config::client(&layout, 2, "hive-test"))
                .expect("Failed to add from inside iteration");
        }
    });

    assert_eq!(visited.len(), 3);
    assert_eq!(hive.len(), 4);
    assert_eq!(hive.clients().len(), 2);
}

#[tokio::test]
async fn test_lone_seed_starts_and_stops() {
    let dir = TempDir::new().expect("tempdir");
    let hive = simulated_hive(&dir, 1, 0);

    hive.start_all().await.expect("Failed to start lone seed");
    assert_eq!(hive.running_count(), 1);

    let report = hive.stop_all().await;
    assert_eq!(report.stopped, vec![InstanceId::relay(1)]);

    let mut kinds = Vec::new();
    while let Some(event) = hive.next_event().await {
        assert_eq!(event.instance, InstanceId::relay(1));
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::BootstrapComplete { anchors: 0 },
            EventKind::Started,
            EventKind::Stopped
        ]
    );
}

#[tokio::test]
async fn test_descriptor_from_previous_run_is_not_trusted() {
    let dir = TempDir::new().expect("tempdir");
    let seed_path = layout(&dir).seed_descriptor();
    let keys = KeyMaterial::generate();
    Descriptor::sign(&keys, None, "hive-test", Role::Relay, "127.0.0.1:30001".parse().unwrap())
        .expect("Signing failed")
        .write(&seed_path)
        .expect("Failed to write old descriptor");

    let hive = scripted_hive(&dir, 2, 1, |config| ScriptedEngine {
        skip_descriptor: config.id() == InstanceId::relay(1),
        ..Default::default()
    });

    let err = hive.start_all().await.expect_err("bootstrap should fail");
    assert!(
        matches!(err, HiveError::BootstrapFailed { .. }),
        "unexpected error: {err}"
    );
    assert!(!seed_path.exists());
    for id in [InstanceId::relay(2), InstanceId::client(1)] {
        assert_eq!(
            hive.instance(id).map(|i| i.state()),
            Some(InstanceState::Created),
            "{id} was started"
        );
    }
}

#[tokio::test]
async fn test_seed_start_timeout() {
    let dir = TempDir::new().expect("tempdir");
    let mut settings = fast_settings();
    settings.seed_start_timeout = Duration::from_millis(200);
    let hive = scripted_hive_with(settings, &dir, 2, 1, |config| ScriptedEngine {
        hang_start: config.id() == InstanceId::relay(1),
        ..Default::default()
    });

    let err = hive.start_all().await.expect_err("seed should time out");
    match err {
        HiveError::BootstrapTimeout { seed, waited } => {
            assert_eq!(seed, InstanceId::relay(1));
            assert_eq!(waited, Duration::from_millis(200));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        hive.seed().map(|i| i.state()),
        Some(InstanceState::Failed)
    );
    assert_eq!(
        hive.instance(InstanceId::client(1)).map(|i| i.state()),
        Some(InstanceState::Created)
    );
}

#[tokio::test]
async fn test_phase_two_timeout_abandons_and_rolls_back() {
    let dir = TempDir::new().expect("tempdir");
    let mut settings = fast_settings();
    settings.start_timeout = Duration::from_millis(200);
    let hive = scripted_hive_with(settings, &dir, 2, 2, |config| ScriptedEngine {
        hang_start: config.id() == InstanceId::client(2),
        ..Default::default()
    });

    let err = hive.start_all().await.expect_err("client-2 should time out");
    assert!(
        matches!(err, HiveError::StartTimeout { instance, .. } if instance == InstanceId::client(2)),
        "unexpected error: {err}"
    );
    assert_eq!(
        hive.instance(InstanceId::client(2)).map(|i| i.state()),
        Some(InstanceState::Failed)
    );
    assert_eq!(
        hive.seed().map(|i| i.state()),
        Some(InstanceState::Stopped)
    );
    assert_eq!(hive.running_count(), 0);
}

