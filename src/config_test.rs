use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn empty_environment_uses_defaults() {
    let cfg = ServerConfig::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(cfg, ServerConfig::default());
    assert_eq!(cfg.port, 3001);
    assert_eq!(cfg.spawn, Position { top: 300, left: 400 });
}

#[test]
fn overrides_are_applied() {
    let cfg = ServerConfig::from_lookup(lookup_from(&[
        ("PORT", "8080"),
        ("CLIENT_CHANNEL_CAPACITY", "16"),
        ("INVITE_TTL_SECS", "5"),
        ("MAX_FOCUS_MINUTES", "60"),
        ("MAX_NICKNAME_LEN", "12"),
        ("SPAWN_TOP", "-10"),
        ("SPAWN_LEFT", " 20 "),
    ]))
    .unwrap();

    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.client_channel_capacity, 16);
    assert_eq!(cfg.invite_ttl, Duration::from_secs(5));
    assert_eq!(cfg.max_focus_minutes, 60);
    assert_eq!(cfg.max_nickname_len, 12);
    assert_eq!(cfg.spawn, Position { top: -10, left: 20 });
}

#[test]
fn invalid_port_is_an_error() {
    let err = ServerConfig::from_lookup(lookup_from(&[("PORT", "not-a-port")])).unwrap_err();
    assert!(err.to_string().contains("PORT"));
}

#[test]
fn invalid_optional_values_fall_back_to_defaults() {
    let cfg = ServerConfig::from_lookup(lookup_from(&[
        ("INVITE_TTL_SECS", "soon"),
        ("MAX_FOCUS_MINUTES", "-3"),
    ]))
    .unwrap();
    assert_eq!(cfg.invite_ttl, Duration::from_secs(DEFAULT_INVITE_TTL_SECS));
    assert_eq!(cfg.max_focus_minutes, DEFAULT_MAX_FOCUS_MINUTES);
}

#[test]
fn zero_capacity_is_clamped_to_one() {
    let cfg = ServerConfig::from_lookup(lookup_from(&[("CLIENT_CHANNEL_CAPACITY", "0")])).unwrap();
    assert_eq!(cfg.client_channel_capacity, 1);
}
