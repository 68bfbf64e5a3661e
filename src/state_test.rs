use super::*;
use crate::frame::Data;
use crate::services::registry::PresenceState;
use test_helpers::{assert_no_frame, recv_frame};
use uuid::Uuid;

fn room_with_clients(n: usize) -> (Room, Vec<(SessionId, mpsc::Receiver<Frame>)>) {
    let mut room = Room::new();
    let mut clients = Vec::new();
    for _ in 0..n {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        room.clients.insert(id, tx);
        room.registry
            .insert(PresenceState::spawn(id, "Guest_1", crate::config::DEFAULT_SPAWN));
        clients.push((id, rx));
    }
    (room, clients)
}

#[test]
fn room_new_is_empty() {
    let room = Room::new();
    assert!(room.registry.is_empty());
    assert!(room.clients.is_empty());
    assert!(room.invitations.is_empty());
}

#[tokio::test]
async fn broadcast_sends_to_all_except_excluded_client() {
    let (room, mut clients) = room_with_clients(3);
    let excluded = clients[1].0;

    let frame = Frame::request("presence:moved", Data::new());
    assert_eq!(room.broadcast(&frame, Some(excluded)), 2);

    let recv_a = recv_frame(&mut clients[0].1).await;
    let recv_c = recv_frame(&mut clients[2].1).await;
    assert_eq!(recv_a.syscall, "presence:moved");
    assert_eq!(recv_c.syscall, "presence:moved");
    assert_no_frame(&mut clients[1].1).await;
}

#[tokio::test]
async fn broadcast_without_exclusion_reaches_everyone() {
    let (room, mut clients) = room_with_clients(2);
    let frame = Frame::request("presence:left", Data::new());
    assert_eq!(room.broadcast(&frame, None), 2);
    for (_, rx) in &mut clients {
        assert_eq!(recv_frame(rx).await.syscall, "presence:left");
    }
}

#[tokio::test]
async fn broadcast_skips_closed_channels() {
    let (room, mut clients) = room_with_clients(2);
    let (_, closed_rx) = clients.remove(0);
    drop(closed_rx);

    let frame = Frame::request("presence:moved", Data::new());
    assert_eq!(room.broadcast(&frame, None), 1);
    assert_eq!(recv_frame(&mut clients[0].1).await.syscall, "presence:moved");
}

#[tokio::test]
async fn send_to_unknown_or_closed_client_returns_false() {
    let (room, mut clients) = room_with_clients(1);
    assert!(!room.send_to(&Uuid::new_v4(), Frame::request("focus:start", Data::new())));

    let (id, rx) = clients.remove(0);
    drop(rx);
    assert!(!room.send_to(&id, Frame::request("focus:start", Data::new())));
}

#[tokio::test]
async fn send_to_full_queue_drops_frame() {
    let mut room = Room::new();
    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(1);
    room.clients.insert(id, tx);

    assert!(room.send_to(&id, Frame::request("presence:moved", Data::new())));
    assert!(!room.send_to(&id, Frame::request("presence:moved", Data::new())));
    recv_frame(&mut rx).await;
    assert_no_frame(&mut rx).await;
}

#[test]
fn is_online_requires_registry_entry_and_channel() {
    let (mut room, clients) = room_with_clients(1);
    let id = clients[0].0;
    assert!(room.is_online(&id));

    room.registry.remove(&id);
    assert!(!room.is_online(&id));
}
