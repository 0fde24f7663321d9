//! End-to-end authorization flow tests against a mocked remote layer.
//!
//! The redirect is simulated by constructing the callback URL a provider
//! would navigate back to; the pre- and post-redirect halves share nothing
//! but the transaction store.

use std::sync::Arc;

use serde_json::json;
use switchboard::config::RpcConfig;
use switchboard::flow::{FlowError, OAuthFlowController, FlowPhase, ResumeFailure, ResumeOutcome};
use switchboard::pkce;
use switchboard::rpc::HttpRpcClient;
use switchboard::transaction::{TransactionStatus, TransactionStore};
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT: &str = "https://app.example.com/oauth/callback";

struct Harness {
    server: MockServer,
    store: Arc<TransactionStore>,
    flow: OAuthFlowController,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let base = Url::parse(&server.uri()).unwrap();
    let rpc = Arc::new(
        HttpRpcClient::with_base(&base, &RpcConfig::default(), Uuid::new_v4()).unwrap(),
    );
    let store = Arc::new(TransactionStore::new());
    let flow = OAuthFlowController::new(
        rpc,
        Arc::clone(&store),
        Url::parse(REDIRECT).unwrap(),
    );
    Harness { server, store, flow }
}

async fn mount_start(server: &MockServer, state: &str, verifier: Option<&str>) {
    let mut body = json!({
        "success": true,
        "authorizationUrl": "https://provider.example.com/oauth/authorize?client_id=cid",
        "state": state,
    });
    if let Some(verifier) = verifier {
        body["codeVerifier"] = json!(verifier);
    }
    Mock::given(method("POST"))
        .and(path("/rpc/start-authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

fn callback(query: &str) -> Url {
    Url::parse(&format!("{REDIRECT}?{query}")).unwrap()
}

#[tokio::test]
async fn full_flow_connects_end_to_end() {
    let h = harness().await;
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    mount_start(&h.server, "state-S", Some(verifier)).await;
    Mock::given(method("POST"))
        .and(path("/rpc/exchange-authorization"))
        .and(body_partial_json(json!({
            "code": "abc",
            "state": "state-S",
            "codeVerifier": verifier,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "connectorId": Uuid::new_v4(),
            "connectorName": "GitHub",
            "scopes": ["repo", "read:org"],
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let connector_id = Uuid::new_v4();
    let started = h.flow.start(connector_id).await.unwrap();
    assert_eq!(started.state, "state-S");
    assert_eq!(h.store.state().as_deref(), Some("state-S"));
    assert!(h.store.verifier().is_some());
    assert_eq!(h.flow.phase(), FlowPhase::AwaitingRedirect);

    // ... full-page navigation away and back ...
    let outcome = h.flow.resume(&callback("code=abc&state=state-S")).await;

    match outcome {
        ResumeOutcome::Connected {
            connector_name,
            scopes,
            cleaned_url,
            ..
        } => {
            assert_eq!(connector_name, "GitHub");
            assert_eq!(scopes, vec!["repo", "read:org"]);
            assert_eq!(cleaned_url.as_str(), REDIRECT);
        }
        other => panic!("expected Connected, got {other:?}"),
    }
    assert!(!h.store.has_pending());
    assert_eq!(h.flow.phase(), FlowPhase::Connected);
    assert_eq!(
        h.store.last_transaction().unwrap().status,
        TransactionStatus::Completed
    );
}

#[tokio::test]
async fn state_mismatch_is_silently_discarded() {
    let h = harness().await;
    mount_start(&h.server, "state-S", Some("verifier-material-aaaaaaaaaaaaaaaaaaaaaaa")).await;
    // The exchange RPC must never be called.
    Mock::given(method("POST"))
        .and(path("/rpc/exchange-authorization"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    h.flow.start(Uuid::new_v4()).await.unwrap();
    let outcome = h.flow.resume(&callback("code=abc&state=WRONG")).await;

    match outcome {
        ResumeOutcome::Ignored { cleaned_url } => {
            assert_eq!(cleaned_url.as_str(), REDIRECT);
        }
        other => panic!("expected Ignored, got {other:?}"),
    }
    assert!(!h.store.has_pending());
}

#[tokio::test]
async fn second_start_supersedes_first() {
    let h = harness().await;
    mount_start(&h.server, "state-one", Some("first-verifier-aaaaaaaaaaaaaaaaaaaaaaaaaaa")).await;
    mount_start(&h.server, "state-two", Some("second-verifier-aaaaaaaaaaaaaaaaaaaaaaaaaa")).await;
    Mock::given(method("POST"))
        .and(path("/rpc/exchange-authorization"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    h.flow.start(Uuid::new_v4()).await.unwrap();
    h.flow.start(Uuid::new_v4()).await.unwrap();

    // Exactly one nonce in storage: the second.
    assert_eq!(h.store.state().as_deref(), Some("state-two"));

    // A callback for the superseded attempt is rejected.
    let outcome = h.flow.resume(&callback("code=abc&state=state-one")).await;
    assert!(matches!(outcome, ResumeOutcome::Ignored { .. }));
    assert!(!h.store.has_pending());
}

#[tokio::test]
async fn provider_error_is_surfaced_without_exchange() {
    let h = harness().await;
    mount_start(&h.server, "state-S", Some("verifier-material-aaaaaaaaaaaaaaaaaaaaaaa")).await;
    Mock::given(method("POST"))
        .and(path("/rpc/exchange-authorization"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    h.flow.start(Uuid::new_v4()).await.unwrap();
    let outcome = h
        .flow
        .resume(&callback(
            "state=state-S&error=access_denied&error_description=User%20denied%20access",
        ))
        .await;

    match outcome {
        ResumeOutcome::Failed { failure, .. } => match failure {
            ResumeFailure::ProviderDenied { error, description } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("User denied access"));
            }
            other => panic!("expected ProviderDenied, got {other:?}"),
        },
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!h.store.has_pending());
}

#[tokio::test]
async fn missing_verifier_resolves_as_session_expiry() {
    let h = harness().await;
    mount_start(&h.server, "state-S", Some("verifier-material-aaaaaaaaaaaaaaaaaaaaaaa")).await;
    Mock::given(method("POST"))
        .and(path("/rpc/exchange-authorization"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    h.flow.start(Uuid::new_v4()).await.unwrap();
    // Another tab (or a timeout) cleared the verifier key.
    h.store.clear_verifier();

    let outcome = h.flow.resume(&callback("code=abc&state=state-S")).await;
    match outcome {
        ResumeOutcome::Failed { failure, .. } => {
            assert_eq!(failure, ResumeFailure::SessionExpired);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!h.store.has_pending());
}

#[tokio::test]
async fn exchange_failure_clears_storage_and_surfaces() {
    let h = harness().await;
    mount_start(&h.server, "state-S", Some("verifier-material-aaaaaaaaaaaaaaaaaaaaaaa")).await;
    Mock::given(method("POST"))
        .and(path("/rpc/exchange-authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "invalid_grant",
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    h.flow.start(Uuid::new_v4()).await.unwrap();
    let outcome = h.flow.resume(&callback("code=abc&state=state-S")).await;

    match outcome {
        ResumeOutcome::Failed { failure, .. } => match failure {
            ResumeFailure::ExchangeFailed { message } => {
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("expected ExchangeFailed, got {other:?}"),
        },
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!h.store.has_pending());
    assert_eq!(
        h.store.last_transaction().unwrap().status,
        TransactionStatus::Failed
    );
}

#[tokio::test]
async fn non_callback_urls_are_ignored_without_clearing() {
    let h = harness().await;
    mount_start(&h.server, "state-S", Some("verifier-material-aaaaaaaaaaaaaaaaaaaaaaa")).await;

    h.flow.start(Uuid::new_v4()).await.unwrap();
    let outcome = h
        .flow
        .resume(&Url::parse("https://app.example.com/connectors?tab=all").unwrap())
        .await;

    assert!(matches!(outcome, ResumeOutcome::NotACallback));
    // The pending attempt survives a page load that is not a callback.
    assert!(h.store.has_pending());
}

#[tokio::test]
async fn client_generates_verifier_when_remote_omits_it() {
    let h = harness().await;
    mount_start(&h.server, "state-S", None).await;

    let started = h.flow.start(Uuid::new_v4()).await.unwrap();

    let challenge = started
        .authorize_url
        .query_pairs()
        .find(|(k, _)| k == "code_challenge")
        .map(|(_, v)| v.into_owned())
        .expect("authorize URL should carry a challenge");
    let method_param = started
        .authorize_url
        .query_pairs()
        .find(|(k, _)| k == "code_challenge_method")
        .map(|(_, v)| v.into_owned());
    assert_eq!(method_param.as_deref(), Some("S256"));

    let verifier = h.store.verifier().expect("verifier stored");
    assert_eq!(pkce::derive_challenge(&verifier), challenge);
}

#[tokio::test]
async fn start_rejects_mismatched_challenge() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/rpc/start-authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "authorizationUrl":
                "https://provider.example.com/oauth/authorize?code_challenge=not-the-right-one",
            "state": "state-S",
            "codeVerifier": "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk",
        })))
        .mount(&h.server)
        .await;

    let err = h.flow.start(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, FlowError::ChallengeMismatch));
    assert!(!h.store.has_pending());
}
