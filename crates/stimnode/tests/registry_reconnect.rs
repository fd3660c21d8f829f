//! Registry reconciliation: healthy streams are kept, failed ones replaced.

mod common;

use std::sync::Arc;

use boothconf::DevicesConfig;
use boothproto::{DeviceKind, DeviceRequirement};
use common::{drain, Journal, ScriptedOpener};
use pretty_assertions::assert_eq;
use stimnode::{DeviceRegistry, LoopbackOpener, OperatorFeed, OutletHub, StreamStatus};

fn requirements() -> Vec<DeviceRequirement> {
    vec![
        DeviceRequirement::new("Marker", DeviceKind::Marker),
        DeviceRequirement::new("Microphone", DeviceKind::Microphone),
    ]
}

fn outlet_ids(registry: &DeviceRegistry) -> Vec<(String, String)> {
    registry
        .snapshot()
        .into_iter()
        .map(|info| (info.name, info.outlet_id))
        .collect()
}

#[test]
fn test_prepare_opens_one_stream_per_requirement() {
    let journal = Journal::default();
    let feed = OperatorFeed::new();
    let mut rx = feed.subscribe();
    let mut registry = DeviceRegistry::new(Arc::new(ScriptedOpener::new(&journal)), feed);

    let names = registry.prepare(&requirements());

    assert_eq!(names, vec!["Marker", "Microphone"]);
    assert_eq!(registry.status("Marker"), Some(StreamStatus::Streaming));
    let announced: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter(|l| l.starts_with("-OUTLETID-:"))
        .collect();
    assert_eq!(
        announced,
        vec!["-OUTLETID-:Marker:Marker-0", "-OUTLETID-:Microphone:Microphone-1"]
    );
}

#[test]
fn test_reconnect_with_all_healthy_changes_nothing() {
    let journal = Journal::default();
    let mut registry = DeviceRegistry::new(
        Arc::new(ScriptedOpener::new(&journal)),
        OperatorFeed::new(),
    );
    registry.prepare(&requirements());
    let before = outlet_ids(&registry);

    assert_eq!(registry.reconnect(), 0);
    registry.prepare(&requirements());

    assert_eq!(outlet_ids(&registry), before);
    assert_eq!(journal.count("open:Marker"), 1);
    assert_eq!(journal.count("open:Microphone"), 1);
}

#[test]
fn test_reconnect_replaces_only_the_failed_entry() {
    let journal = Journal::default();
    let opener = Arc::new(ScriptedOpener::new(&journal));
    let mut registry = DeviceRegistry::new(opener.clone(), OperatorFeed::new());
    registry.prepare(&requirements());
    let marker_id = registry.outlet_id("Marker");
    let mic_id = registry.outlet_id("Microphone");

    opener.fail("Microphone");
    assert!(registry.is_unusable("Microphone"));
    assert_eq!(registry.reconnect(), 1);

    assert_eq!(registry.outlet_id("Marker"), marker_id);
    assert_ne!(registry.outlet_id("Microphone"), mic_id);
    assert_eq!(registry.status("Microphone"), Some(StreamStatus::Streaming));
    assert_eq!(journal.count("stop:Microphone"), 1);
    assert_eq!(journal.count("stop:Marker"), 0);
}

#[test]
fn test_prepare_reconciles_failed_entries() {
    let journal = Journal::default();
    let opener = Arc::new(ScriptedOpener::new(&journal));
    let mut registry = DeviceRegistry::new(opener.clone(), OperatorFeed::new());
    registry.prepare(&requirements());
    let marker_id = registry.outlet_id("Marker");

    opener.fail("Marker");
    registry.prepare(&requirements());

    assert_ne!(registry.outlet_id("Marker"), marker_id);
    assert_eq!(journal.count("open:Microphone"), 1);
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_unopenable_device_is_kept_in_error() {
    let journal = Journal::default();
    let feed = OperatorFeed::new();
    let mut rx = feed.subscribe();
    let mut registry = DeviceRegistry::new(
        Arc::new(ScriptedOpener::new(&journal).with_broken("Microphone")),
        feed,
    );

    registry.prepare(&requirements());

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.status("Microphone"), Some(StreamStatus::Error));
    assert!(drain(&mut rx)
        .iter()
        .any(|l| l.starts_with("Device Microphone failed to open")));

    // Still broken, so every reconnect retries it.
    assert_eq!(registry.reconnect(), 1);
    assert_eq!(registry.status("Microphone"), Some(StreamStatus::Error));
}

#[test]
fn test_close_twice_is_safe() {
    let journal = Journal::default();
    let mut registry = DeviceRegistry::new(
        Arc::new(ScriptedOpener::new(&journal)),
        OperatorFeed::new(),
    );
    registry.prepare(&requirements());

    assert_eq!(registry.close(), 2);
    assert_eq!(registry.close(), 0);
    assert!(registry.is_empty());
    assert_eq!(journal.count("stop:Marker"), 1);
}

#[test]
fn test_close_releases_every_outlet() {
    let hub = OutletHub::new();
    let mut registry = DeviceRegistry::new(
        Arc::new(LoopbackOpener::new(
            Arc::new(hub.clone()),
            DevicesConfig::default(),
        )),
        OperatorFeed::new(),
    );

    for _ in 0..3 {
        registry.prepare(&requirements());
        assert_eq!(hub.len(), 2);
        for info in registry.snapshot() {
            assert!(hub.is_open(&info.outlet_id));
        }
        registry.close();
        assert!(hub.is_empty());
    }
}
