use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::message::{Method, StatusCode};
use crate::transaction::mock::{self, RecordingUser};
use crate::transaction::{State, TransactionUser, TsxEventKind, TsxSettings};
use crate::transport::mock::CaptureTransport;

#[tokio::test]
async fn test_send_enters_calling() {
    let endpoint = mock::default_endpoint().await;
    let transport = CaptureTransport::unreliable();
    let mut request = mock::outgoing_request_on(Method::Options, transport.clone());

    let tsx = endpoint.new_uac_tsx(None, &mut request).unwrap();
    assert_eq!(tsx.state(), State::Null);

    tsx.send_request(request).await.unwrap();

    assert_eq!(tsx.state(), State::Calling);
    assert_eq!(transport.sent_count(), 1);
    assert!(tsx.last_tx().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_retransmission_intervals_double_up_to_t2() {
    let endpoint = mock::default_endpoint().await;
    let mut request = mock::outgoing_request(Method::Options);

    let tsx = endpoint.new_uac_tsx(None, &mut request).unwrap();
    tsx.send_request(request).await.unwrap();

    assert!(tsx.retrans_count() == 0);

    // For the default values of T1 and T2, this results in
    // intervals of 500 ms, 1 s, 2 s, 4 s, 4 s, 4 s, etc.
    time::sleep(Duration::from_millis(500 + 1)).await;
    assert!(tsx.retrans_count() == 1);

    time::sleep(Duration::from_secs(1) + Duration::from_millis(1)).await;
    assert!(tsx.retrans_count() == 2);

    time::sleep(Duration::from_secs(2) + Duration::from_millis(1)).await;
    assert!(tsx.retrans_count() == 3);

    time::sleep(Duration::from_secs(4) + Duration::from_millis(1)).await;
    assert!(tsx.retrans_count() == 4);

    time::sleep(Duration::from_secs(4) + Duration::from_millis(1)).await;
    assert!(tsx.retrans_count() == 5);

    time::sleep(Duration::from_secs(4) + Duration::from_millis(1)).await;
    assert!(tsx.retrans_count() == 6);

    assert_eq!(tsx.state(), State::Calling);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_lossy_request_times_out() {
    let t1 = Duration::from_millis(100);
    let settings = TsxSettings {
        t1,
        t2: Duration::from_secs(4),
        timeout: 64 * t1,
        ..Default::default()
    };
    let endpoint = mock::endpoint_with_settings(settings).await;
    let tu = RecordingUser::new();
    let transport = CaptureTransport::unreliable();
    let mut request = mock::outgoing_request_on(Method::Options, transport.clone());

    let tsx = endpoint
        .new_uac_tsx(Some(tu.clone() as Arc<dyn TransactionUser>), &mut request)
        .unwrap();
    let start = time::Instant::now();
    tsx.send_request(request).await.unwrap();

    // Every answer is lost; retransmissions land at 100, 300, 700,
    // 1500, 3100 and 6300 ms.
    for (instant, count) in [(101, 1), (301, 2), (701, 3), (1501, 4), (3101, 5), (6301, 6)] {
        time::sleep_until(start + Duration::from_millis(instant)).await;
        assert_eq!(tsx.retrans_count(), count, "at {} ms", instant);
    }

    // 64*T1 from the first send the transaction gives up.
    time::sleep_until(start + Duration::from_millis(6402)).await;

    assert_eq!(tsx.last_status_code(), Some(StatusCode::REQUEST_TIMEOUT));
    assert_eq!(tsx.state(), State::Destroyed);
    assert_eq!(transport.sent_count(), 7);
    assert!(endpoint.transaction_layer().unwrap().is_empty());

    let events = tu.events();
    assert_matches!(
        events.last(),
        Some((TsxEventKind::Timer, State::Terminated, State::Destroyed))
    );
    assert!(
        events
            .iter()
            .any(|(kind, prev, _)| *kind == TsxEventKind::Timer
                && *prev == State::Calling)
    );
}

#[tokio::test(start_paused = true)]
async fn test_invite_answered_with_200() {
    let endpoint = mock::default_endpoint().await;
    let tu = RecordingUser::new();
    let transport = CaptureTransport::unreliable();
    let mut request = mock::outgoing_request_on(Method::Invite, transport.clone());

    let tsx = endpoint
        .new_uac_tsx(Some(tu.clone() as Arc<dyn TransactionUser>), &mut request)
        .unwrap();
    tsx.send_request(request).await.unwrap();

    let trying = mock::incoming_response(StatusCode::TRYING, Method::Invite);
    tsx.recv_response(&trying).await.unwrap();
    assert_eq!(tsx.state(), State::Proceeding);

    let ok = mock::incoming_response(StatusCode::OK, Method::Invite);
    tsx.recv_response(&ok).await.unwrap();

    // The ACK for a 2xx belongs to the dialog: only the INVITE went
    // out, and the transmitted request stays available until the
    // transaction is reclaimed.
    assert_eq!(tsx.state(), State::Terminated);
    assert_eq!(transport.sent_count(), 1);
    assert!(tsx.last_tx().is_some());
    assert_eq!(tu.responses(), vec![StatusCode::TRYING, StatusCode::OK]);

    time::sleep(Duration::from_millis(1)).await;

    assert_eq!(tsx.state(), State::Destroyed);
    assert!(tsx.last_tx().is_none());
    assert!(endpoint.transaction_layer().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invite_rejection_is_acked() {
    let endpoint = mock::default_endpoint().await;
    let tu = RecordingUser::new();
    let transport = CaptureTransport::unreliable();
    let mut request = mock::outgoing_request_on(Method::Invite, transport.clone());

    let tsx = endpoint
        .new_uac_tsx(Some(tu.clone() as Arc<dyn TransactionUser>), &mut request)
        .unwrap();
    tsx.send_request(request).await.unwrap();

    let busy = mock::incoming_response(StatusCode::BUSY_HERE, Method::Invite);
    tsx.recv_response(&busy).await.unwrap();

    assert_eq!(tsx.state(), State::Completed);
    assert_eq!(tsx.last_status_code(), Some(StatusCode::BUSY_HERE));

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].starts_with(b"ACK "));

    // A retransmitted final answer re-triggers the ACK without
    // another TU callback.
    let events_before = tu.events().len();
    tsx.recv_response(&busy).await.unwrap();

    assert_eq!(transport.sent_count(), 3);
    assert!(transport.last_sent().unwrap().starts_with(b"ACK "));
    assert_eq!(tu.responses(), vec![StatusCode::BUSY_HERE]);
    assert_eq!(tu.events().len(), events_before);

    // Timer D reclaims the transaction.
    time::sleep(Duration::from_secs(32) + Duration::from_millis(2)).await;

    assert_eq!(tsx.state(), State::Destroyed);
    assert!(endpoint.transaction_layer().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_non_invite_final_arms_timer_k() {
    let endpoint = mock::default_endpoint().await;
    let mut request = mock::outgoing_request(Method::Options);

    let tsx = endpoint.new_uac_tsx(None, &mut request).unwrap();
    tsx.send_request(request).await.unwrap();

    let ok = mock::incoming_response(StatusCode::OK, Method::Options);
    tsx.recv_response(&ok).await.unwrap();

    assert_eq!(tsx.state(), State::Completed);

    time::sleep(Duration::from_secs(5) + Duration::from_millis(1)).await;

    assert_eq!(tsx.state(), State::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn test_reliable_transport_skips_retransmissions() {
    let endpoint = mock::default_endpoint().await;
    let transport = CaptureTransport::reliable();
    let mut request = mock::outgoing_request_on(Method::Options, transport.clone());

    let tsx = endpoint.new_uac_tsx(None, &mut request).unwrap();
    tsx.send_request(request).await.unwrap();

    time::sleep(Duration::from_secs(2)).await;

    // No timer E on a reliable transport.
    assert_eq!(tsx.retrans_count(), 0);
    assert_eq!(transport.sent_count(), 1);
    assert_eq!(tsx.state(), State::Calling);

    let ok = mock::incoming_response(StatusCode::OK, Method::Options);
    tsx.recv_response(&ok).await.unwrap();

    // Timer K is zero when the transport is reliable.
    time::sleep(Duration::from_millis(1)).await;
    assert_eq!(tsx.state(), State::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_is_idempotent() {
    let endpoint = mock::default_endpoint().await;
    let tu = RecordingUser::new();
    let mut request = mock::outgoing_request(Method::Invite);

    let tsx = endpoint
        .new_uac_tsx(Some(tu.clone() as Arc<dyn TransactionUser>), &mut request)
        .unwrap();
    tsx.send_request(request).await.unwrap();

    tsx.terminate(StatusCode::REQUEST_TERMINATED).await.unwrap();
    assert_eq!(tsx.state(), State::Terminated);
    assert_eq!(tsx.last_status_code(), Some(StatusCode::REQUEST_TERMINATED));

    // Terminating again changes nothing.
    tsx.terminate(StatusCode::REQUEST_TERMINATED).await.unwrap();
    assert_eq!(tsx.state(), State::Terminated);

    time::sleep(Duration::from_millis(1)).await;
    assert_eq!(tsx.state(), State::Destroyed);

    // Even after destruction the call stays a no-op success.
    tsx.terminate(StatusCode::REQUEST_TERMINATED).await.unwrap();

    // Every notification past the terminate names Terminated or
    // Destroyed.
    let terminate_at = tu
        .events()
        .iter()
        .position(|(kind, _, _)| *kind == TsxEventKind::User)
        .unwrap();
    for (_, _, state) in &tu.events()[terminate_at..] {
        assert!(matches!(state, State::Terminated | State::Destroyed));
    }
}

#[tokio::test]
async fn test_terminate_requires_final_code() {
    let endpoint = mock::default_endpoint().await;
    let mut request = mock::outgoing_request(Method::Options);

    let tsx = endpoint.new_uac_tsx(None, &mut request).unwrap();
    tsx.send_request(request).await.unwrap();

    let err = tsx.terminate(StatusCode::RINGING).await.unwrap_err();
    assert_matches!(err, crate::Error::InvalidOperation(_));
    assert_eq!(tsx.state(), State::Calling);
}
