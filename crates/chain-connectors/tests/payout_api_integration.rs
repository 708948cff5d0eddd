//! Integration tests for the payout provider client.

use std::time::Duration;

use chain_connectors::credentials::ProviderCredentials;
use chain_connectors::payout_api::PayoutApiClient;
use chain_connectors::{ChainError, PayoutExecutor};
use rust_decimal_macros::dec;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> PayoutApiClient {
    PayoutApiClient::new(ProviderCredentials::new(server.uri(), "test-key")).unwrap()
}

#[tokio::test]
async fn successful_payout_returns_provider_reference() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payouts"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_json(serde_json::json!({
            "destination": "0xdeadbeef",
            "amount": "25.50000000",
            "currency": "USDC"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "reference": "po_8811"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = client_for(&server)
        .execute_payout("0xdeadbeef", dec!(25.50000000), "USDC")
        .await
        .unwrap();
    assert_eq!(receipt.provider_ref, "po_8811");
}

#[tokio::test]
async fn declined_payout_surfaces_provider_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payouts"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "code": "insufficient_float",
            "message": "provider balance too low"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .execute_payout("0xdeadbeef", dec!(10), "USDC")
        .await
        .unwrap_err();
    match err {
        ChainError::Api { code, message } => {
            assert_eq!(code, "insufficient_float");
            assert_eq!(message, "provider balance too low");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_key_maps_to_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payouts"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "code": "forbidden",
            "message": "key lacks payout scope"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .execute_payout("0xdeadbeef", dec!(10), "USDC")
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Authentication(_)), "got {err:?}");
}

#[tokio::test]
async fn slow_provider_times_out_as_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payouts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "reference": "po_late" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = PayoutApiClient::new(
        ProviderCredentials::new(server.uri(), "test-key")
            .with_timeout(Duration::from_millis(200)),
    )
    .unwrap();
    let err = client
        .execute_payout("0xdeadbeef", dec!(10), "USDC")
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Network(_)), "got {err:?}");
}
