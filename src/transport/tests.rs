use super::*;
use crate::config::TransportConfig;

fn config() -> TransportConfig {
    TransportConfig {
        host: "127.0.0.1".into(),
        port: 0,
        enable_stream_fallback: true,
        handshake_timeout_ms: 50,
        keep_alive_interval_ms: 1000,
        max_retries: 3,
    }
}

fn endpoint() -> Endpoint {
    Endpoint {
        host: "127.0.0.1".into(),
        datagram_port: 7900,
        stream_port: 7901,
    }
}

#[test]
fn envelope_validates_required_fields() {
    let value = serde_json::json!({
        "channel": "c",
        "data": {},
        "timestamp": 1,
        "messageId": "abc",
    });
    assert!(Envelope::validate(&value).is_ok());

    let missing = serde_json::json!({ "channel": "c" });
    assert!(Envelope::validate(&missing).is_err());
}

#[tokio::test]
async fn initializes_in_datagram_mode_by_default() {
    let transport = ChannelTransport::new(config());
    transport.initialize(endpoint()).await.unwrap();
    assert_eq!(transport.mode().await, Some(TransportMode::Datagram));
}

#[tokio::test]
async fn falls_back_to_stream_when_datagram_unreachable() {
    let transport = ChannelTransport::new(config());
    transport.simulate_datagram_unreachable(true);
    transport.initialize(endpoint()).await.unwrap();
    assert_eq!(transport.mode().await, Some(TransportMode::Stream));
}

#[tokio::test]
async fn fails_when_datagram_unreachable_and_fallback_disabled() {
    let mut cfg = config();
    cfg.enable_stream_fallback = false;
    let transport = ChannelTransport::new(cfg);
    transport.simulate_datagram_unreachable(true);
    assert!(transport.initialize(endpoint()).await.is_err());
}

#[tokio::test]
async fn send_delivers_to_subscribed_channel() {
    let transport = ChannelTransport::new(config());
    transport.initialize(endpoint()).await.unwrap();
    let mut rx = transport.subscribe("tasks").await.unwrap();
    transport.send("tasks", serde_json::json!({"hello": "world"})).await.unwrap();
    let envelope = rx.recv().await.unwrap();
    assert_eq!(envelope.channel, "tasks");
    assert_eq!(envelope.data, serde_json::json!({"hello": "world"}));
}

#[tokio::test]
async fn send_before_initialize_fails() {
    let transport = ChannelTransport::new(config());
    let result = transport.send("tasks", serde_json::json!({})).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn average_latency_reports_samples() {
    let transport = ChannelTransport::new(config());
    transport.initialize(endpoint()).await.unwrap();
    transport.send("c", serde_json::json!(1)).await.unwrap();
    assert!(transport.average_latency_ms().await.is_some());
}

#[tokio::test]
async fn keep_alive_reconnects_after_simulated_peer_death() {
    let mut cfg = config();
    cfg.keep_alive_interval_ms = 10;
    let transport = ChannelTransport::new(cfg);
    transport.initialize(endpoint()).await.unwrap();
    assert_eq!(transport.mode().await, Some(TransportMode::Datagram));

    transport.simulate_peer_dead(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!transport.is_peer_dead());
    assert!(transport.send("c", serde_json::json!(1)).await.is_ok());
}

#[tokio::test]
async fn keep_alive_gives_up_after_exhausting_reconnect_retries() {
    let mut cfg = config();
    cfg.keep_alive_interval_ms = 10;
    cfg.handshake_timeout_ms = 5;
    cfg.max_retries = 2;
    let transport = ChannelTransport::new(cfg);
    transport.initialize(endpoint()).await.unwrap();

    transport.simulate_datagram_unreachable(true);
    transport.simulate_peer_dead(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(transport.send("c", serde_json::json!(1)).await.is_err());
}

#[test]
fn backoff_caps_at_max_and_exhausts_after_max_retries() {
    let mut backoff = ReconnectBackoff::new(100, 1000, 3);
    assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
    assert_eq!(backoff.next_delay(), None);
}

#[test]
fn backoff_reset_allows_further_attempts() {
    let mut backoff = ReconnectBackoff::new(50, 200, 1);
    assert!(backoff.next_delay().is_some());
    assert!(backoff.next_delay().is_none());
    backoff.reset();
    assert!(backoff.next_delay().is_some());
}
