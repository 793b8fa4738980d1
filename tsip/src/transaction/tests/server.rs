use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::message::{Method, StatusCode};
use crate::transaction::mock::{self, RecordingUser};
use crate::transaction::{State, TransactionUser, TsxEventKind, TsxSettings};
use crate::transport::mock::CaptureTransport;

#[tokio::test]
async fn test_request_enters_trying() {
    let endpoint = mock::default_endpoint().await;
    let mut request = mock::request(Method::Register);

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    assert_eq!(tsx.state(), State::Null);

    tsx.recv_request(&request).await.unwrap();

    assert_eq!(tsx.state(), State::Trying);
    assert!(request.transaction().is_some());
}

#[tokio::test]
async fn test_retransmission_in_trying_is_absorbed() {
    let endpoint = mock::default_endpoint().await;
    let transport = CaptureTransport::unreliable();
    let mut request = mock::request_on(Method::Options, transport.clone());

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    tsx.recv_request(&request).await.unwrap();

    // The TU produced no response yet, so there is nothing to repeat.
    tsx.recv_request(&request).await.unwrap();

    assert_eq!(tsx.state(), State::Trying);
    assert_eq!(tsx.retrans_count(), 0);
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn test_provisional_responses_keep_proceeding() {
    let endpoint = mock::default_endpoint().await;
    let mut request = mock::request(Method::Invite);

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::TRYING, Method::Invite))
        .await
        .unwrap();

    assert!(tsx.last_status_code().unwrap() == StatusCode::TRYING);
    assert!(tsx.state() == State::Proceeding);

    tsx.respond(mock::response(StatusCode::RINGING, Method::Invite))
        .await
        .unwrap();

    assert!(tsx.last_status_code().unwrap() == StatusCode::RINGING);
    assert!(tsx.state() == State::Proceeding);
}

#[tokio::test]
async fn test_retransmission_repeats_last_response() {
    let endpoint = mock::default_endpoint().await;
    let transport = CaptureTransport::unreliable();
    let mut request = mock::request_on(Method::Options, transport.clone());

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::TRYING, Method::Options))
        .await
        .unwrap();
    assert_eq!(transport.sent_count(), 1);

    tsx.recv_request(&request).await.unwrap();

    assert_eq!(tsx.retrans_count(), 1);
    assert_eq!(transport.sent_count(), 2);
    assert_eq!(tsx.state(), State::Proceeding);
}

#[tokio::test(start_paused = true)]
async fn test_non_invite_final_arms_timer_j() {
    let endpoint = mock::default_endpoint().await;
    let transport = CaptureTransport::unreliable();
    let mut request = mock::request_on(Method::Options, transport.clone());

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::OK, Method::Options))
        .await
        .unwrap();

    assert_eq!(tsx.state(), State::Completed);

    // A retransmitted request still gets the stored answer.
    tsx.recv_request(&request).await.unwrap();
    assert_eq!(tsx.retrans_count(), 1);
    assert_eq!(transport.sent_count(), 2);

    time::sleep(Duration::from_millis(500) * 64 + Duration::from_millis(1)).await;

    assert_eq!(tsx.state(), State::Destroyed);
    assert!(endpoint.transaction_layer().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_non_invite_final_over_reliable_terminates_at_once() {
    let endpoint = mock::default_endpoint().await;
    let transport = CaptureTransport::reliable();
    let mut request = mock::request_on(Method::Options, transport.clone());

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::OK, Method::Options))
        .await
        .unwrap();

    // Timer J is zero on a reliable transport.
    time::sleep(Duration::from_millis(1)).await;

    assert_eq!(tsx.state(), State::Destroyed);
}

#[tokio::test]
async fn test_invite_2xx_owned_by_tu_terminates() {
    let endpoint = mock::default_endpoint().await;
    let tu = RecordingUser::new();
    let mut request = mock::request(Method::Invite);

    let tsx = endpoint
        .new_uas_tsx(Some(tu.clone() as Arc<dyn TransactionUser>), &mut request)
        .unwrap();
    tsx.set_retransmit_2xx(false);
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::RINGING, Method::Invite))
        .await
        .unwrap();
    assert_eq!(tsx.state(), State::Proceeding);

    tsx.respond(mock::response(StatusCode::OK, Method::Invite))
        .await
        .unwrap();

    // The TU retransmits the 2xx itself; the transaction is done.
    assert_eq!(tsx.state(), State::Terminated);
    assert_matches!(
        tu.events().last(),
        Some((TsxEventKind::TxMsg, State::Proceeding, State::Terminated))
    );
}

#[tokio::test(start_paused = true)]
async fn test_invite_2xx_retransmitted_by_transaction() {
    let endpoint = mock::default_endpoint().await;
    let transport = CaptureTransport::unreliable();
    let mut request = mock::request_on(Method::Invite, transport.clone());

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::OK, Method::Invite))
        .await
        .unwrap();

    assert_eq!(tsx.state(), State::Completed);

    time::sleep(Duration::from_millis(500 + 1)).await;
    assert_eq!(tsx.retrans_count(), 1);

    time::sleep(Duration::from_secs(1) + Duration::from_millis(1)).await;
    assert_eq!(tsx.retrans_count(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_invite_error_response_full_lifecycle() {
    let t1 = Duration::from_millis(500);
    let endpoint = mock::default_endpoint().await;
    let tu = RecordingUser::new();
    let transport = CaptureTransport::unreliable();
    let mut request = mock::request_on(Method::Invite, transport.clone());

    let tsx = endpoint
        .new_uas_tsx(Some(tu.clone() as Arc<dyn TransactionUser>), &mut request)
        .unwrap();
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::NOT_FOUND, Method::Invite))
        .await
        .unwrap();

    assert_eq!(tsx.state(), State::Completed);
    assert_eq!(transport.sent_count(), 1);

    // Timer G doubles T1 up to T2.
    time::sleep(t1 + Duration::from_millis(1)).await;
    assert_eq!(tsx.retrans_count(), 1);

    time::sleep(t1 * 2 + Duration::from_millis(1)).await;
    assert_eq!(tsx.retrans_count(), 2);

    time::sleep(t1 * 4 + Duration::from_millis(1)).await;
    assert_eq!(tsx.retrans_count(), 3);

    // The ACK stops the retransmissions and arms timer I.
    let ack = mock::request(Method::Ack);
    tsx.recv_request(&ack).await.unwrap();

    assert_eq!(tsx.state(), State::Confirmed);

    let count = tsx.retrans_count();
    time::sleep(Duration::from_secs(4)).await;
    assert_eq!(tsx.retrans_count(), count);

    // Timer I runs at T4.
    time::sleep(Duration::from_secs(1) + Duration::from_millis(1)).await;

    assert_eq!(tsx.state(), State::Destroyed);
    assert!(endpoint.transaction_layer().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timer_h_fires_when_ack_never_arrives() {
    let endpoint = mock::default_endpoint().await;
    let transport = CaptureTransport::unreliable();
    let mut request = mock::request_on(Method::Invite, transport.clone());

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::BUSY_HERE, Method::Invite))
        .await
        .unwrap();

    time::sleep(Duration::from_millis(500) * 64 + Duration::from_millis(2)).await;

    assert_eq!(tsx.last_status_code(), Some(StatusCode::REQUEST_TIMEOUT));
    assert_eq!(tsx.state(), State::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn test_settings_scale_server_timers() {
    let t1 = Duration::from_millis(50);
    let settings = TsxSettings {
        t1,
        timeout: 64 * t1,
        ..Default::default()
    };
    let endpoint = mock::endpoint_with_settings(settings).await;
    let mut request = mock::request(Method::Options);

    let tsx = endpoint.new_uas_tsx(None, &mut request).unwrap();
    tsx.recv_request(&request).await.unwrap();

    tsx.respond(mock::response(StatusCode::OK, Method::Options))
        .await
        .unwrap();

    time::sleep(64 * t1 + Duration::from_millis(1)).await;

    assert_eq!(tsx.state(), State::Destroyed);
}
