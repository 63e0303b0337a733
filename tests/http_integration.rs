//! Integration tests for the operation poller and the lifecycle engine using wiremock
//!
//! Every test runs against a mock Resource Manager with millisecond poll
//! intervals, so the full create/read/update/delete paths execute quickly.

use armctl::azure::auth::AzureCredentials;
use armctl::azure::client::ArmClient;
use armctl::azure::http::ArmHttpClient;
use armctl::error::ArmError;
use armctl::lro::{send_and_wait, PollerOptions};
use armctl::resource::{get_data_source, get_resource, Attributes, ResourceState, Scope};
use armctl::timeouts::{OperationContext, OperationKind, TimeoutOverrides};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUB: &str = "00000000-0000-0000-0000-000000000000";
const RG_PATH: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/acctestRG-1";
const VNET_PATH: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/acctestRG-1/providers/Microsoft.Network/virtualNetworks/acctestvnet";
const SUBNET_PATH: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/acctestRG-1/providers/Microsoft.Network/virtualNetworks/acctestvnet/subnets/internal";
const REGISTRY_PATH: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/acctestRG-1/providers/Microsoft.ContainerRegistry/registries/acctestcr1";

fn client(server: &MockServer) -> ArmClient {
    let http = ArmHttpClient::new()
        .unwrap()
        .with_retry_policy(1, Duration::from_millis(5));

    ArmClient::new(AzureCredentials::from_static_token("test-token"), SUB, &server.uri())
        .unwrap()
        .with_http(http)
        .with_poller_options(PollerOptions {
            default_interval: Duration::from_millis(10),
            max_transient_retries: 2,
        })
}

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

fn not_found(code: &str) -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error": {"code": code, "message": "The requested resource could not be found."}
    }))
}

fn rg_body() -> Value {
    json!({
        "id": RG_PATH,
        "name": "acctestRG-1",
        "location": "westeurope",
        "tags": {"env": "test"},
        "properties": {"provisioningState": "Succeeded"}
    })
}

fn ctx(kind: OperationKind, timeout: Duration) -> OperationContext {
    OperationContext::new(kind, "Test Object \"x\"", timeout, CancellationToken::new())
}

/// Token acquisition against a mock authority
mod auth_tests {
    use super::*;
    use armctl::azure::auth::{ClientSecretProvider, TokenProvider};
    use std::sync::Arc;
    use wiremock::matchers::body_string_contains;

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=app-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "fresh-token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ClientSecretProvider::with_authority(
            &server.uri(),
            "https://management.azure.com/.default",
            "tenant-1",
            "app-1",
            "secret",
        )
        .unwrap();

        let token = tokio_test::assert_ok!(provider.fetch_token().await);
        assert_eq!(token.token, "fresh-token");
        assert!(token.expires_at.is_some());
    }

    /// The credentials holder caches what the provider hands out
    #[tokio::test]
    async fn test_credentials_cache_fetched_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "expires_in": 3599,
                "access_token": "cached-token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ClientSecretProvider::with_authority(
            &server.uri(),
            "https://management.azure.com/.default",
            "tenant-1",
            "app-1",
            "secret",
        )
        .unwrap();
        let credentials = AzureCredentials::new(Arc::new(provider));

        assert_eq!(tokio_test::assert_ok!(credentials.get_token().await), "cached-token");
        assert_eq!(tokio_test::assert_ok!(credentials.get_token().await), "cached-token");
    }

    #[tokio::test]
    async fn test_rejected_credentials_do_not_leak_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided. secret=hunter2"
            })))
            .mount(&server)
            .await;

        let provider = ClientSecretProvider::with_authority(
            &server.uri(),
            "https://management.azure.com/.default",
            "tenant-1",
            "app-1",
            "hunter2",
        )
        .unwrap();

        let err = tokio_test::assert_err!(provider.fetch_token().await);
        assert!(matches!(err, ArmError::Auth(_)));
        assert!(!err.to_string().contains("hunter2"));
    }
}

/// Tests of the operation poller on its own
mod poller_tests {
    use super::*;

    /// InProgress twice, then Succeeded: three polls and a final GET of the resource
    #[tokio::test]
    async fn test_async_operation_polls_until_succeeded() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op1", server.uri());

        Mock::given(method("PUT"))
            .and(path(RG_PATH))
            .and(bearer_token("test-token"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", op_url.as_str())
                    .set_body_json(json!({"properties": {"provisioningState": "Accepted"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(rg_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client.url(RG_PATH, "2022-09-01");
        let body = json!({"location": "westeurope"});

        let result = send_and_wait(
            &client,
            &ctx(OperationKind::Create, Duration::from_secs(10)),
            Method::PUT,
            &url,
            Some(&body),
        )
        .await
        .expect("operation should succeed");

        assert_eq!(result.unwrap()["name"], "acctestRG-1");
    }

    /// A Failed status surfaces the operation's error code and message verbatim
    #[tokio::test]
    async fn test_failed_operation_reports_error() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op2", server.uri());

        Mock::given(method("PUT"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(201).insert_header("Azure-AsyncOperation", op_url.as_str()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": {"code": "LocationNotAvailableForResourceGroup", "message": "The provided location 'mars' is not available."}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client.url(RG_PATH, "2022-09-01");

        let err = send_and_wait(
            &client,
            &ctx(OperationKind::Create, Duration::from_secs(10)),
            Method::PUT,
            &url,
            Some(&json!({})),
        )
        .await
        .unwrap_err();

        match err.root() {
            ArmError::OperationFailed { status, code, message } => {
                assert_eq!(status, "Failed");
                assert_eq!(code, "LocationNotAvailableForResourceGroup");
                assert!(message.contains("'mars' is not available"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// An operation that never finishes ends with a timeout at the deadline,
    /// even when the service asks for a longer Retry-After
    #[tokio::test]
    async fn test_never_terminating_operation_times_out() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op3", server.uri());

        Mock::given(method("DELETE"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(202).insert_header("Azure-AsyncOperation", op_url.as_str()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Retry-After", "60")
                    .set_body_json(json!({"status": "InProgress"})),
            )
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client.url(RG_PATH, "2022-09-01");

        let started = std::time::Instant::now();
        let err = send_and_wait(
            &client,
            &ctx(OperationKind::Delete, Duration::from_millis(200)),
            Method::DELETE,
            &url,
            None,
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout(), "expected a timeout, got {err:?}");
        assert!(err.to_string().contains("timed out waiting for deleting"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "returned early after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "overran the deadline: {elapsed:?}");
    }

    /// Cancelling the token stops the wait
    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op4", server.uri());

        Mock::given(method("PUT"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(201).insert_header("Azure-AsyncOperation", op_url.as_str()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client.url(RG_PATH, "2022-09-01");
        let cancel = CancellationToken::new();
        let ctx = OperationContext::new(
            OperationKind::Create,
            "Resource Group \"acctestRG-1\"",
            Duration::from_secs(30),
            cancel.clone(),
        );

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let err = send_and_wait(&client, &ctx, Method::PUT, &url, Some(&json!({})))
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err.root(), ArmError::Cancelled(_)), "{err:?}");
    }

    /// Location polling: 202 keeps polling, 200 completes with the body
    #[tokio::test]
    async fn test_location_header_polling() {
        let server = MockServer::start().await;
        let location = format!("{}/operationResults/op5", server.uri());

        Mock::given(method("POST"))
            .and(path("/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/acctestRG-1/exportTemplate"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Location", location.as_str())
                    .insert_header("Retry-After", "0"),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operationResults/op5"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operationResults/op5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"template": {"resources": []}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client.url(&format!("{RG_PATH}/exportTemplate"), "2022-09-01");

        let result = send_and_wait(
            &client,
            &ctx(OperationKind::Read, Duration::from_secs(10)),
            Method::POST,
            &url,
            Some(&json!({"resources": ["*"]})),
        )
        .await
        .unwrap();

        assert_eq!(result.unwrap()["template"]["resources"], json!([]));
    }

    /// Transient poll failures are retried; the operation still completes
    #[tokio::test]
    async fn test_transient_poll_failure_is_retried() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op6", server.uri());

        Mock::given(method("DELETE"))
            .and(path(VNET_PATH))
            .respond_with(ResponseTemplate::new(202).insert_header("Azure-AsyncOperation", op_url.as_str()))
            .mount(&server)
            .await;

        // The HTTP layer retries once itself, so two 503s reach the poller as one failure
        Mock::given(method("GET"))
            .and(path("/operations/op6"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client.url(VNET_PATH, "2023-09-01");

        let result = send_and_wait(
            &client,
            &ctx(OperationKind::Delete, Duration::from_secs(10)),
            Method::DELETE,
            &url,
            None,
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    /// DELETE answered with 404 is success
    #[tokio::test]
    async fn test_delete_of_missing_object_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path(VNET_PATH))
            .respond_with(not_found("ResourceNotFound"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let url = client.url(VNET_PATH, "2023-09-01");

        let result = send_and_wait(
            &client,
            &ctx(OperationKind::Delete, Duration::from_secs(10)),
            Method::DELETE,
            &url,
            None,
        )
        .await;
        assert!(matches!(result, Ok(None)));
    }
}

/// Tests of the generic lifecycle engine through registered resource types
mod lifecycle_tests {
    use super::*;

    fn scope<'a>(client: &'a ArmClient, cancel: &'a CancellationToken, timeouts: &'a TimeoutOverrides) -> Scope<'a> {
        Scope {
            client,
            cancel,
            timeouts,
        }
    }

    fn rg_state() -> ResourceState {
        ResourceState {
            resource_type: "azurerm_resource_group".to_string(),
            id: RG_PATH.to_string(),
            schema_version: 0,
            attributes: attrs(json!({"name": "acctestRG-1", "location": "westeurope", "tags": {}})),
            timeouts: TimeoutOverrides::default(),
        }
    }

    /// Create checks for an existing object, creates, then reads back
    #[tokio::test]
    async fn test_create_resource_group() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(not_found("ResourceGroupNotFound"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(RG_PATH))
            .and(query_param("api-version", "2022-09-01"))
            .respond_with(ResponseTemplate::new(201).set_body_json(rg_body()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(rg_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_resource_group").unwrap();

        let state = resource
            .create(
                &scope(&client, &cancel, &timeouts),
                &attrs(json!({"name": "acctestRG-1", "location": "West Europe", "tags": {"env": "test"}})),
            )
            .await
            .unwrap();

        assert_eq!(state.id, RG_PATH);
        assert_eq!(state.attributes["location"], "westeurope");
        assert_eq!(state.attributes["tags"], json!({"env": "test"}));
        assert!(!state.attributes.contains_key("properties"));
    }

    /// An existing object must be imported, not created over
    #[tokio::test]
    async fn test_create_existing_requires_import() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(rg_body()))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_resource_group").unwrap();

        let err = resource
            .create(
                &scope(&client, &cancel, &timeouts),
                &attrs(json!({"name": "acctestRG-1", "location": "westeurope"})),
            )
            .await
            .unwrap_err();

        match err {
            ArmError::RequiresImport { resource_type, id } => {
                assert_eq!(resource_type, "azurerm_resource_group");
                assert_eq!(id, RG_PATH);
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Invalid configuration fails before any request is sent
    #[tokio::test]
    async fn test_validation_happens_before_network_calls() {
        let server = MockServer::start().await;

        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_container_registry").unwrap();

        let err = resource
            .create(
                &scope(&client, &cancel, &timeouts),
                &attrs(json!({
                    "name": "acctestcr1",
                    "resource_group_name": "acctestRG-1",
                    "location": "westeurope",
                    "sku": "Standard",
                    "zone_redundancy_enabled": true
                })),
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err, ArmError::Validation { ref field, .. } if field == "zone_redundancy_enabled"),
            "{err:?}"
        );
    }

    /// A registry name taken elsewhere is reported against `name`
    #[tokio::test]
    async fn test_registry_name_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(REGISTRY_PATH))
            .respond_with(not_found("ResourceNotFound"))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(
                "/subscriptions/00000000-0000-0000-0000-000000000000/providers/Microsoft.ContainerRegistry/checkNameAvailability",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nameAvailable": false,
                "reason": "AlreadyExists",
                "message": "The registry acctestcr1 is already in use."
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(REGISTRY_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_container_registry").unwrap();

        let err = resource
            .create(
                &scope(&client, &cancel, &timeouts),
                &attrs(json!({
                    "name": "acctestcr1",
                    "resource_group_name": "acctestRG-1",
                    "location": "westeurope",
                    "sku": "Basic"
                })),
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err.root(), ArmError::Validation { field, message } if field == "name" && message.contains("already in use")),
            "{err:?}"
        );
    }

    /// Read of an object deleted out of band clears state
    #[tokio::test]
    async fn test_read_missing_object_clears_state() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(not_found("ResourceGroupNotFound"))
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_resource_group").unwrap();

        let refreshed = resource
            .read(&scope(&client, &cancel, &timeouts), &rg_state())
            .await
            .unwrap();
        assert!(refreshed.is_none());
    }

    /// Other read failures are errors and carry the object description
    #[tokio::test]
    async fn test_read_forbidden_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "AuthorizationFailed", "message": "The client does not have authorization."}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_resource_group").unwrap();

        let err = resource
            .read(&scope(&client, &cancel, &timeouts), &rg_state())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("retrieving Resource Group \"acctestRG-1\""), "{message}");
        assert!(message.contains("AuthorizationFailed"), "{message}");
    }

    /// Tag changes go out as a PATCH; force-new changes are refused
    #[tokio::test]
    async fn test_update_tags_and_reject_force_new() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(rg_body()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(rg_body()))
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_resource_group").unwrap();
        let scope = scope(&client, &cancel, &timeouts);

        let updated = resource
            .update(
                &scope,
                &rg_state(),
                &attrs(json!({"name": "acctestRG-1", "location": "westeurope", "tags": {"env": "test"}})),
            )
            .await
            .unwrap();
        assert_eq!(updated.attributes["tags"], json!({"env": "test"}));

        let err = resource
            .update(
                &scope,
                &rg_state(),
                &attrs(json!({"name": "acctestRG-1", "location": "northeurope"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Validation { ref field, .. } if field == "location"));
    }

    /// Delete of an object that is already gone succeeds
    #[tokio::test]
    async fn test_delete_missing_virtual_network() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path(VNET_PATH))
            .respond_with(not_found("ResourceNotFound"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_virtual_network").unwrap();

        let state = ResourceState {
            resource_type: "azurerm_virtual_network".to_string(),
            id: VNET_PATH.to_string(),
            schema_version: 1,
            attributes: Attributes::new(),
            timeouts: TimeoutOverrides::default(),
        };

        resource
            .delete(&scope(&client, &cancel, &timeouts), &state)
            .await
            .expect("deleting a missing object should succeed");
    }

    /// A resource group that still holds resources is not deleted
    #[tokio::test]
    async fn test_non_empty_resource_group_is_kept() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("{RG_PATH}/resources")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": VNET_PATH, "type": "Microsoft.Network/virtualNetworks"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_resource_group").unwrap();

        let err = resource
            .delete(&scope(&client, &cancel, &timeouts), &rg_state())
            .await
            .unwrap_err();

        match err.root() {
            ArmError::ResourceGroupNotEmpty { resources } => assert_eq!(resources, &vec![VNET_PATH.to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Subnet delete waits until the subnet is reported gone twice in a row
    #[tokio::test]
    async fn test_subnet_delete_waits_until_gone() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "internal"})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(SUBNET_PATH))
            .respond_with(not_found("NotFound"))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_subnet").unwrap();

        let state = ResourceState {
            resource_type: "azurerm_subnet".to_string(),
            id: SUBNET_PATH.to_string(),
            schema_version: 0,
            attributes: Attributes::new(),
            timeouts: TimeoutOverrides::default(),
        };

        resource
            .delete(&scope(&client, &cancel, &timeouts), &state)
            .await
            .unwrap();
    }

    /// Per-resource timeout overrides bound the whole create
    #[tokio::test]
    async fn test_create_timeout_override() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/slow", server.uri());

        Mock::given(method("GET"))
            .and(path(VNET_PATH))
            .respond_with(not_found("ResourceNotFound"))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(VNET_PATH))
            .respond_with(ResponseTemplate::new(201).insert_header("Azure-AsyncOperation", op_url.as_str()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides {
            create: Some("300ms".to_string()),
            ..Default::default()
        };
        let resource = get_resource("azurerm_virtual_network").unwrap();

        let err = resource
            .create(
                &scope(&client, &cancel, &timeouts),
                &attrs(json!({
                    "name": "acctestvnet",
                    "resource_group_name": "acctestRG-1",
                    "location": "westeurope",
                    "address_space": ["10.0.0.0/16"]
                })),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout(), "{err:?}");
        assert!(err.to_string().contains("creating Virtual Network \"acctestvnet\""));
    }

    /// Import validates the ID against the resource type before any request
    #[tokio::test]
    async fn test_import_rejects_wrong_type() {
        let server = MockServer::start().await;
        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_container_registry").unwrap();

        let err = resource
            .import(&scope(&client, &cancel, &timeouts), VNET_PATH)
            .await
            .unwrap_err();

        assert!(matches!(err, ArmError::ResourceId(_)), "{err:?}");
        assert!(err.to_string().contains("registries/{registryName}"));
    }

    /// Import of a registry reads credentials when the admin user is enabled
    #[tokio::test]
    async fn test_import_registry_with_admin_user() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(REGISTRY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": REGISTRY_PATH,
                "name": "acctestcr1",
                "location": "westeurope",
                "sku": {"name": "Premium"},
                "properties": {
                    "loginServer": "acctestcr1.azurecr.io",
                    "adminUserEnabled": true,
                    "publicNetworkAccess": "Enabled",
                    "zoneRedundancy": "Enabled"
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("{REGISTRY_PATH}/listCredentials")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "username": "acctestcr1",
                "passwords": [{"name": "password", "value": "s3cret"}, {"name": "password2", "value": "other"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let resource = get_resource("azurerm_container_registry").unwrap();

        // Lower-case type segments are accepted
        let input = REGISTRY_PATH.replace("resourceGroups", "resourcegroups");
        let state = resource
            .import(&scope(&client, &cancel, &timeouts), &input)
            .await
            .unwrap();

        assert_eq!(state.id, REGISTRY_PATH);
        assert_eq!(state.schema_version, 1);
        assert_eq!(state.attributes["zone_redundancy_enabled"], true);
        assert_eq!(state.attributes["admin_username"], "acctestcr1");
        assert_eq!(state.attributes["admin_password"], "s3cret");
    }

    /// Data sources fail on a missing object instead of returning nothing
    #[tokio::test]
    async fn test_data_source_missing_object_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(not_found("ResourceGroupNotFound"))
            .mount(&server)
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let timeouts = TimeoutOverrides::default();
        let source = get_data_source("azurerm_resource_group").unwrap();

        let err = source
            .read(&scope(&client, &cancel, &timeouts), &attrs(json!({"name": "acctestRG-1"})))
            .await
            .unwrap_err();

        assert!(matches!(err, ArmError::NotFound(_)), "{err:?}");
    }
}

/// Plan, apply and destroy against a mock service with a state file
mod plan_tests {
    use super::*;
    use armctl::manifest::Manifest;
    use armctl::plan::{Action, Engine, Workspace};
    use armctl::resource::StateStore;

    const MANIFEST: &str = r#"
resources:
  - address: main
    type: azurerm_resource_group
    attributes:
      name: acctestRG-1
      location: westeurope
      tags:
        env: test
"#;

    #[tokio::test]
    async fn test_apply_then_destroy() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(not_found("ResourceGroupNotFound"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(rg_body()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(rg_body()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("{RG_PATH}/resources")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");

        let client = client(&server);
        let cancel = CancellationToken::new();
        let engine = Engine::new(&client, &cancel, 2);
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let mut workspace = Workspace::load(state_path.clone()).unwrap();

        let plan = engine.plan(&manifest, &workspace.state).await.unwrap();
        assert_eq!(plan.changes[0].action, Action::Create);

        engine.apply(&manifest, &plan, &mut workspace).await.unwrap();

        let saved = StateStore::load(&state_path).unwrap();
        assert_eq!(saved.addresses(), vec!["main"]);
        assert_eq!(saved.get("main").unwrap().id, RG_PATH);

        // Nothing left to do once applied
        engine.refresh(&mut workspace).await.unwrap();
        let plan = engine.plan(&manifest, &workspace.state).await.unwrap();
        assert!(!plan.has_changes(), "{plan}");

        assert_eq!(engine.destroy(&mut workspace).await.unwrap(), 1);
        assert!(StateStore::load(&state_path).unwrap().is_empty());
    }
}
