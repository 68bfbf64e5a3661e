use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::config::ServerConfig;
use crate::services::connection::{connect, disconnect, identify};
use crate::services::registry::Direction;
use crate::state::test_helpers::drain;

fn identified(room: &mut Room, nickname: &str) -> (SessionId, mpsc::Receiver<Frame>) {
    let config = ServerConfig::default();
    let (tx, mut rx) = mpsc::channel(32);
    let id = connect(room, tx, &config).id;
    identify(room, id, nickname, &config).unwrap();
    drain(&mut rx);
    (id, rx)
}

fn data(value: serde_json::Value) -> Data {
    value
        .as_object()
        .expect("object")
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// =============================================================================
// parse_delta
// =============================================================================

#[test]
fn parse_full_delta() {
    let delta = parse_delta(&data(json!({
        "position": {"top": 12, "left": -4},
        "direction": "left",
        "isWalking": true,
        "animationFrame": 5
    })))
    .unwrap();

    assert_eq!(delta.position, Some(Position { top: 12, left: -4 }));
    assert_eq!(delta.direction, Some(Direction::Left));
    assert_eq!(delta.is_walking, Some(true));
    assert_eq!(delta.animation_frame, Some(5));
}

#[test]
fn parse_accepts_legacy_frame_key_and_ignores_unrelated_fields() {
    let delta = parse_delta(&data(json!({"frame": 2, "nickname": "Hijack", "id": "x"}))).unwrap();
    assert_eq!(delta, PresenceDelta { animation_frame: Some(2), ..PresenceDelta::default() });
}

#[test]
fn parse_treats_null_as_absent() {
    let delta = parse_delta(&data(json!({"direction": null, "isWalking": false}))).unwrap();
    assert_eq!(delta, PresenceDelta { is_walking: Some(false), ..PresenceDelta::default() });
}

#[test]
fn parse_rejects_bad_shapes() {
    for payload in [
        json!({"position": {"top": 1.5, "left": 2}}),
        json!({"position": {"top": 1}}),
        json!({"direction": "sideways"}),
        json!({"direction": 3}),
        json!({"isWalking": "yes"}),
        json!({"animationFrame": -1}),
    ] {
        assert!(
            matches!(parse_delta(&data(payload.clone())), Err(MovementError::MalformedPayload(_))),
            "expected malformed: {payload}"
        );
    }
}

// =============================================================================
// apply_movement
// =============================================================================

#[test]
fn movement_broadcasts_full_state_to_peers_but_not_sender() {
    let mut room = Room::new();
    let (a, mut rx_a) = identified(&mut room, "Fox");
    let (_b, mut rx_b) = identified(&mut room, "Owl");
    let (_c, mut rx_c) = identified(&mut room, "Cat");
    drain(&mut rx_a);
    drain(&mut rx_b);

    let delta = PresenceDelta { is_walking: Some(true), ..PresenceDelta::default() };
    assert_eq!(apply_movement(&mut room, a, &delta).unwrap(), 2);

    for rx in [&mut rx_b, &mut rx_c] {
        let frames = drain(rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].syscall, "presence:moved");
        assert_eq!(frames[0].data.get("id").and_then(|v| v.as_str()), Some(a.to_string().as_str()));
        assert_eq!(frames[0].data.get("nickname").and_then(|v| v.as_str()), Some("Fox"));
        assert_eq!(frames[0].data.get("isWalking").and_then(serde_json::Value::as_bool), Some(true));
        assert_eq!(frames[0].data["position"], json!({"top": 300, "left": 400}));
    }
    assert!(drain(&mut rx_a).is_empty());
}

#[test]
fn movements_from_one_sender_arrive_in_order() {
    let mut room = Room::new();
    let (a, _rx_a) = identified(&mut room, "Fox");
    let (_b, mut rx_b) = identified(&mut room, "Owl");

    for frame in 1..=5 {
        let delta = PresenceDelta { animation_frame: Some(frame), ..PresenceDelta::default() };
        apply_movement(&mut room, a, &delta).unwrap();
    }

    let frames: Vec<u64> = drain(&mut rx_b)
        .iter()
        .filter_map(|f| f.data.get("animationFrame").and_then(serde_json::Value::as_u64))
        .collect();
    assert_eq!(frames, vec![1, 2, 3, 4, 5]);
}

#[test]
fn empty_delta_broadcasts_nothing() {
    let mut room = Room::new();
    let (a, _rx_a) = identified(&mut room, "Fox");
    let (_b, mut rx_b) = identified(&mut room, "Owl");

    assert_eq!(apply_movement(&mut room, a, &PresenceDelta::default()).unwrap(), 0);
    assert!(drain(&mut rx_b).is_empty());
}

#[test]
fn movement_before_identify_is_unknown_session() {
    let mut room = Room::new();
    let config = ServerConfig::default();
    let (tx, _rx) = mpsc::channel(8);
    let lurker = connect(&mut room, tx, &config).id;
    let (_b, mut rx_b) = identified(&mut room, "Owl");

    let delta = PresenceDelta { is_walking: Some(true), ..PresenceDelta::default() };
    assert!(matches!(apply_movement(&mut room, lurker, &delta), Err(MovementError::UnknownSession(_))));
    assert!(!room.registry.get(&lurker).unwrap().is_walking);
    assert!(drain(&mut rx_b).is_empty());
}

#[test]
fn movement_after_disconnect_is_dropped_without_broadcast() {
    let mut room = Room::new();
    let (a, _rx_a) = identified(&mut room, "Fox");
    let (_b, mut rx_b) = identified(&mut room, "Owl");

    disconnect(&mut room, a);
    assert_eq!(drain(&mut rx_b).len(), 1, "only presence:left");

    let delta = PresenceDelta { is_walking: Some(true), ..PresenceDelta::default() };
    assert!(matches!(apply_movement(&mut room, a, &delta), Err(MovementError::UnknownSession(_))));
    assert!(drain(&mut rx_b).is_empty());
    assert!(room.registry.get(&a).is_none());
}
