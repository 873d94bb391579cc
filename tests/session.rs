mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use bookoo_bridge::device::decoder::BookooDecoder;
use bookoo_bridge::device::types::{ConnectionState, DeviceEvent};
use bookoo_bridge::error::{DeviceError, SetupError};
use bookoo_bridge::{Scale, ScaleConfig};

use common::{eventually, test_config, wait_for_event, weight_frame, MockTransport, ADDRESS};

#[tokio::test]
async fn weight_is_retained_across_disconnect_and_refreshed_after_reconnect() {
    let mock = MockTransport::default();
    let scale = Scale::new(test_config(), mock.clone(), BookooDecoder).unwrap();
    let mut events = scale.subscribe();

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Connected);
    wait_for_event(&mut events, DeviceEvent::ConnectionChanged(true)).await;

    mock.push_frame(weight_frame(18.5));
    wait_for_event(&mut events, DeviceEvent::StateChanged).await;

    let snapshot = scale.snapshot();
    assert!(snapshot.connected);
    assert_eq!(snapshot.state.weight, Some(18.5));
    assert_eq!(snapshot.state.buzzer_level, Some(3));

    // the scale goes away and is not found on the first reconnect attempt
    mock.fail_next_connect(DeviceError::DeviceNotFound { address: ADDRESS.to_string() });
    mock.close_stream();

    for _ in 0..200 {
        scale.refresh().await;
        if scale.connection_state() == ConnectionState::Disconnected {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);
    wait_for_event(&mut events, DeviceEvent::ConnectionChanged(false)).await;

    let snapshot = scale.snapshot();
    assert!(!snapshot.connected);
    assert_eq!(snapshot.state.weight, Some(18.5));
    assert_eq!(mock.connects(), 2);

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Connected);
    assert!(scale.snapshot().connected);
    assert_eq!(mock.connects(), 3);

    mock.push_frame(weight_frame(20.25));
    wait_for_event(&mut events, DeviceEvent::StateChanged).await;
    assert_eq!(scale.snapshot().state.weight, Some(20.25));
}

#[tokio::test]
async fn connect_failures_are_absorbed_and_retried() {
    let mock = MockTransport::default();
    mock.fail_next_connect(DeviceError::DeviceNotFound { address: ADDRESS.to_string() });
    mock.fail_next_connect(DeviceError::Transport(String::from("le-connection-abort-by-local")));
    let scale = Scale::new(test_config(), mock.clone(), BookooDecoder).unwrap();

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);
    assert!(!scale.snapshot().connected);

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Connected);
    assert!(scale.snapshot().connected);
    assert_eq!(mock.connects(), 3);
}

#[tokio::test]
async fn slow_connect_times_out() {
    let mock = MockTransport::default();
    mock.set_connect_delay(Duration::from_secs(5));
    let config = ScaleConfig { connect_timeout: Duration::from_millis(50), ..test_config() };
    let scale = Scale::new(config, mock.clone(), BookooDecoder).unwrap();

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);
    assert!(!scale.snapshot().connected);
}

#[tokio::test]
async fn tick_during_connect_attempt_is_a_no_op() {
    let mock = MockTransport::default();
    mock.set_connect_delay(Duration::from_millis(200));
    let scale = Arc::new(Scale::new(test_config(), mock.clone(), BookooDecoder).unwrap());

    let first = tokio::spawn({
        let scale = scale.clone();
        async move { scale.refresh().await }
    });

    sleep(Duration::from_millis(50)).await;
    assert_eq!(scale.connection_state(), ConnectionState::Connecting);
    scale.refresh().await;

    first.await.unwrap();
    assert_eq!(mock.connects(), 1);
    assert_eq!(scale.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_ending_the_session() {
    let mock = MockTransport::default();
    let scale = Scale::new(test_config(), mock.clone(), BookooDecoder).unwrap();
    let mut events = scale.subscribe();
    scale.refresh().await;

    mock.push_frame(vec![0x03, 0x0B, 0x00]);
    let mut corrupt = weight_frame(99.0);
    corrupt[19] ^= 0x01;
    mock.push_frame(corrupt);
    mock.push_frame(weight_frame(7.5));

    wait_for_event(&mut events, DeviceEvent::StateChanged).await;
    assert_eq!(scale.snapshot().state.weight, Some(7.5));

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Connected);
    assert_eq!(mock.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn polling_reconnects_on_the_configured_interval() {
    let mock = MockTransport::default();
    mock.fail_next_connect(DeviceError::Timeout);
    let scale = Scale::setup(test_config(), mock.clone(), BookooDecoder).unwrap();
    let mut events = scale.subscribe();

    // first tick fires right away and fails
    wait_for_event(&mut events, DeviceEvent::Refresh).await;
    assert_eq!(mock.connects(), 1);
    assert!(!scale.snapshot().connected);

    sleep(Duration::from_secs(5)).await;
    wait_for_event(&mut events, DeviceEvent::Refresh).await;
    assert_eq!(mock.connects(), 2);
    assert!(scale.snapshot().connected);

    // connected ticks leave the session alone
    sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.connects(), 2);

    scale.shutdown().await;
}

#[tokio::test]
async fn shutdown_disconnects_and_keeps_last_readings() {
    let mock = MockTransport::default();
    let scale = Scale::setup(test_config(), mock.clone(), BookooDecoder).unwrap();
    let mut events = scale.subscribe();

    eventually(|| scale.snapshot().connected).await;
    mock.push_frame(weight_frame(42.0));
    wait_for_event(&mut events, DeviceEvent::StateChanged).await;

    scale.shutdown().await;

    assert_eq!(mock.disconnects(), 1);
    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);
    let snapshot = scale.snapshot();
    assert!(!snapshot.connected);
    assert_eq!(snapshot.state.weight, Some(42.0));

    // nothing reconnects after shutdown
    scale.refresh().await;
    assert_eq!(mock.connects(), 1);
}

#[tokio::test]
async fn link_lost_with_open_stream_is_detected_and_reconnected() {
    let mock = MockTransport::default();
    let scale = Scale::new(test_config(), mock.clone(), BookooDecoder).unwrap();
    let mut events = scale.subscribe();

    scale.refresh().await;
    mock.push_frame(weight_frame(12.0));
    wait_for_event(&mut events, DeviceEvent::StateChanged).await;

    // healthy link: the tick leaves the session alone
    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Connected);
    assert_eq!(mock.connects(), 1);

    mock.fail_next_connect(DeviceError::DeviceNotFound { address: ADDRESS.to_string() });
    mock.drop_link();

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);
    wait_for_event(&mut events, DeviceEvent::ConnectionChanged(false)).await;
    assert_eq!(mock.disconnects(), 1);
    let snapshot = scale.snapshot();
    assert!(!snapshot.connected);
    assert_eq!(snapshot.state.weight, Some(12.0));

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Connected);
    assert!(scale.snapshot().connected);
    assert_eq!(mock.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_link_check_counts_as_lost() {
    let mock = MockTransport::default();
    let scale = Scale::new(test_config(), mock.clone(), BookooDecoder).unwrap();

    scale.refresh().await;
    assert_eq!(scale.connection_state(), ConnectionState::Connected);

    mock.fail_next_connect(DeviceError::Timeout);
    mock.set_health_delay(Duration::from_secs(60));
    scale.refresh().await;

    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);
    assert!(!scale.snapshot().connected);
    assert_eq!(mock.disconnects(), 1);
}

#[tokio::test]
async fn state_stays_connected_during_link_check() {
    let mock = MockTransport::default();
    let scale = Arc::new(Scale::new(test_config(), mock.clone(), BookooDecoder).unwrap());
    scale.refresh().await;

    mock.set_health_delay(Duration::from_millis(200));
    let check = tokio::spawn({
        let scale = scale.clone();
        async move { scale.refresh().await }
    });

    sleep(Duration::from_millis(50)).await;
    assert_eq!(scale.connection_state(), ConnectionState::Connected);

    check.await.unwrap();
    assert_eq!(scale.connection_state(), ConnectionState::Connected);
    assert_eq!(mock.connects(), 1);
}

#[tokio::test]
async fn shutdown_during_connect_releases_the_link() {
    let mock = MockTransport::default();
    mock.set_connect_delay(Duration::from_millis(300));
    let scale = Scale::setup(test_config(), mock.clone(), BookooDecoder).unwrap();
    let mut events = scale.subscribe();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(scale.connection_state(), ConnectionState::Connecting);

    scale.shutdown().await;

    assert_eq!(mock.connects(), 1);
    assert_eq!(mock.disconnects(), 1);
    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);
    assert!(!scale.snapshot().connected);

    scale.refresh().await;
    assert_eq!(mock.connects(), 1);

    // the session never came up, so observers never saw it go up or down
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, DeviceEvent::ConnectionChanged(_)), "{:?}", event);
    }
}

#[tokio::test]
async fn shutdown_while_disconnected_emits_no_connection_change() {
    let scale = Scale::new(test_config(), MockTransport::default(), BookooDecoder).unwrap();
    let mut events = scale.subscribe();

    scale.shutdown().await;

    assert_eq!(scale.connection_state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err());
}

#[test]
fn zero_poll_interval_is_rejected() {
    let config = ScaleConfig { poll_interval: Duration::ZERO, ..test_config() };
    let result = Scale::new(config, MockTransport::default(), BookooDecoder);
    assert!(matches!(result, Err(SetupError::InvalidPollInterval)));
}

#[test]
fn unsupported_models_are_rejected() {
    let config = ScaleConfig { is_valid_scale: false, ..test_config() };
    let result = Scale::new(config, MockTransport::default(), BookooDecoder);
    assert!(matches!(result, Err(SetupError::UnsupportedDevice { .. })));
}
