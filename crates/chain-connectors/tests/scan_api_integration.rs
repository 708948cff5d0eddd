//! Integration tests for the scan provider client, using wiremock so the
//! full HTTP path (auth header, status mapping, payload parsing) is covered.

use chain_connectors::credentials::ProviderCredentials;
use chain_connectors::scan_api::ScanApiClient;
use chain_connectors::{ChainError, ChainVerifier, VerificationReport, VerificationStatus};
use rust_decimal_macros::dec;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ScanApiClient {
    ScanApiClient::new(ProviderCredentials::new(server.uri(), "test-key")).unwrap()
}

#[tokio::test]
async fn confirmed_transaction_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions/0xabc123"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "confirmed",
            "confirmations": 12,
            "amount": "1.50000000",
            "block_number": 812_331
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = client_for(&server)
        .verify_transaction("0xabc123")
        .await
        .unwrap();
    assert_eq!(
        report,
        VerificationReport {
            status: VerificationStatus::Confirmed,
            confirmations: 12,
            amount: dec!(1.50000000),
            block_number: Some(812_331),
        }
    );
}

#[tokio::test]
async fn pending_transaction_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions/0xfeed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "pending",
            "confirmations": 2,
            "amount": "0.25000000",
            "block_number": null
        })))
        .mount(&server)
        .await;

    let report = client_for(&server).verify_transaction("0xfeed").await.unwrap();
    assert_eq!(report.status, VerificationStatus::Pending);
    assert_eq!(report.confirmations, 2);
    assert_eq!(report.block_number, None);
}

#[tokio::test]
async fn unknown_hash_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions/0xmissing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "code": "tx_not_found",
            "message": "no such transaction"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .verify_transaction("0xmissing")
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn bad_key_maps_to_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions/0xabc"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "code": "bad_key",
            "message": "API key invalid"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .verify_transaction("0xabc")
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Authentication(_)), "got {err:?}");
}

#[tokio::test]
async fn throttling_maps_to_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions/0xabc"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "code": "rate_limited",
            "message": "slow down"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .verify_transaction("0xabc")
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::RateLimit(_)), "got {err:?}");
}

#[tokio::test]
async fn malformed_payload_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions/0xabc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "unexpected": true })),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .verify_transaction("0xabc")
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::InvalidResponse(_)), "got {err:?}");
}
