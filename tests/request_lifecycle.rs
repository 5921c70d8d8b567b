//! Building, dispatching, reading and closing requests.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use print_egress::error::TransportCause;
use print_egress::http::{ClientSettings, RequestExecutor, SharedClient};
use print_egress::routing::{
    AccessRule, AddressMatcher, CredentialRule, EgressPolicy, LocalMatcher, ProxyRule, ProxyTarget, RoutePlanner,
    StaticResolver,
};
use print_egress::{FetchError, RouteError};
use reqwest::Method;

mod common;
use common::{start_mock_backend, start_mock_server, MockResponse};

fn executor_with(settings: ClientSettings, policy: Option<Arc<EgressPolicy>>) -> RequestExecutor {
    RequestExecutor::new(Arc::new(SharedClient::new(settings)), policy)
}

fn executor() -> RequestExecutor {
    executor_with(ClientSettings::default(), None)
}

#[tokio::test]
async fn stale_content_length_is_replaced() {
    let origin = start_mock_backend("stored").await;
    let mut request = executor()
        .request(Method::POST, &origin.url("/print/create"))
        .unwrap()
        .header("Content-Length", "999")
        .unwrap()
        .header("Transfer-Encoding", "chunked")
        .unwrap();
    request.body_mut().extend_from_slice(b"0123456789");
    request.execute().await.unwrap();

    let received = &origin.requests()[0];
    assert_eq!(received.header("content-length"), Some("10"));
    assert_eq!(received.header_count("content-length"), 1);
    assert_eq!(received.header("transfer-encoding"), None);
    assert_eq!(received.body, b"0123456789");
}

#[tokio::test]
async fn response_exposes_status_and_multi_valued_headers() {
    let origin = start_mock_server(|_| {
        MockResponse::status(404)
            .with_header("X-Layer", "roads")
            .with_header("x-layer", "rivers")
            .with_body("missing")
    })
    .await;

    let response = executor().get(&origin.url("/a")).unwrap().execute().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.status_text(), "Not Found");
    let layers: Vec<_> = response.headers().get_all("X-LAYER").iter().collect();
    assert_eq!(layers, vec!["roads", "rivers"]);
}

#[tokio::test]
async fn status_text_keeps_the_servers_reason_phrase() {
    let origin = start_mock_server(|r| match r.target() {
        "/warming" => MockResponse::status(503).with_reason("Tile Cache Warming"),
        _ => MockResponse::status(503),
    })
    .await;

    let response = executor().get(&origin.url("/warming")).unwrap().execute().await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.status_text(), "Tile Cache Warming");

    let response = executor().get(&origin.url("/plain")).unwrap().execute().await.unwrap();
    assert_eq!(response.status_text(), "Service Unavailable");
}

#[tokio::test]
async fn body_is_opened_once_and_cached() {
    let origin = start_mock_backend("0123456789abcdef").await;
    let mut response = executor().get(&origin.url("/")).unwrap().execute().await.unwrap();

    let first = response.body().read_to_end().await.unwrap();
    assert_eq!(&first[..], b"0123456789abcdef");
    // Same, exhausted stream; nothing is fetched again.
    let second = response.body().read_to_end().await.unwrap();
    assert!(second.is_empty());
    assert_eq!(origin.request_count(), 1);
}

#[tokio::test]
async fn empty_response_body_is_an_empty_stream() {
    let origin = start_mock_server(|_| MockResponse::ok("")).await;
    let mut response = executor().get(&origin.url("/")).unwrap().execute().await.unwrap();
    assert_eq!(response.body().next_chunk().await.unwrap(), None);
}

#[tokio::test]
async fn close_is_idempotent_and_releases_the_connection() {
    let origin = start_mock_backend("payload").await;
    let client = Arc::new(SharedClient::new(ClientSettings::default()));
    let executor = RequestExecutor::new(client.clone(), None);
    let capacity = client.limiter().available();

    let mut response = executor.get(&origin.url("/")).unwrap().execute().await.unwrap();
    assert_eq!(client.limiter().available(), capacity - 1);
    assert!(!response.is_closed());

    response.close();
    response.close();
    assert!(response.is_closed());
    assert_eq!(client.limiter().available(), capacity);

    // Reading after close yields nothing rather than failing.
    assert!(response.bytes().await.unwrap().is_empty());
    response.close();
}

#[tokio::test]
async fn dropping_an_unread_response_releases_the_connection() {
    let origin = start_mock_backend("never read").await;
    let client = Arc::new(SharedClient::new(ClientSettings::default()));
    let executor = RequestExecutor::new(client.clone(), None);
    let capacity = client.limiter().available();

    let response = executor.get(&origin.url("/")).unwrap().execute().await.unwrap();
    drop(response);
    assert_eq!(client.limiter().available(), capacity);
}

#[tokio::test]
async fn pool_acquisition_times_out_while_connections_are_held() {
    let origin = start_mock_backend("x").await;
    let settings = ClientSettings {
        max_connections_total: 1,
        max_connections_per_route: 1,
        connection_request_timeout: Some(Duration::from_millis(100)),
        ..ClientSettings::default()
    };
    let executor = executor_with(settings, None);

    let held = executor.get(&origin.url("/1")).unwrap().execute().await.unwrap();
    let err = executor.get(&origin.url("/2")).unwrap().execute().await.unwrap_err();
    match err {
        FetchError::Transport {
            source: TransportCause::PoolTimeout(_),
            ..
        } => {}
        other => panic!("expected pool timeout, got {:?}", other),
    }
    assert_eq!(origin.request_count(), 1);

    drop(held);
    executor.get(&origin.url("/3")).unwrap().execute().await.unwrap();
    assert_eq!(origin.request_count(), 2);
}

#[tokio::test]
async fn slow_response_times_out() {
    let origin = start_mock_server(|_| MockResponse::ok("late").with_delay(Duration::from_millis(500))).await;
    let settings = ClientSettings {
        response_timeout: Some(Duration::from_millis(100)),
        ..ClientSettings::default()
    };

    let err = executor_with(settings, None)
        .get(&origin.url("/"))
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::Transport {
            source: TransportCause::ResponseTimeout(_),
            ..
        }
    ));
}

#[tokio::test]
async fn malformed_targets_fail_before_dispatch() {
    for url in ["", "http://", "relative/path", "data:text/plain,hi"] {
        let err = executor().get(url).unwrap_err();
        assert!(matches!(err, FetchError::MalformedTarget { .. }), "{}", url);
    }
}

#[tokio::test]
async fn access_list_denies_unlisted_targets() {
    let origin = start_mock_backend("secret").await;
    let policy = EgressPolicy::default().with_access(vec![AccessRule {
        matcher: AddressMatcher::new(Ipv4Addr::new(10, 0, 0, 0))
            .with_mask(Ipv4Addr::new(255, 0, 0, 0))
            .into(),
        reject: false,
    }]);
    let executor = executor_with(ClientSettings::default(), Some(Arc::new(policy)));

    let err = executor.get(&origin.url("/")).unwrap().execute().await.unwrap_err();
    assert!(matches!(err, FetchError::Denied { .. }));
    assert_eq!(origin.request_count(), 0);
}

#[tokio::test]
async fn access_list_reject_rule_wins_when_first() {
    let origin = start_mock_backend("secret").await;
    let policy = EgressPolicy::default().with_access(vec![
        AccessRule {
            matcher: LocalMatcher::new().with_port(Some(origin.port())).into(),
            reject: true,
        },
        AccessRule {
            matcher: LocalMatcher::new().into(),
            reject: false,
        },
    ]);
    let executor = executor_with(ClientSettings::default(), Some(Arc::new(policy)));

    assert!(matches!(
        executor.get(&origin.url("/")).unwrap().execute().await,
        Err(FetchError::Denied { .. })
    ));
}

fn executor_resolving(resolver: StaticResolver, policy: EgressPolicy) -> RequestExecutor {
    let planner = RoutePlanner::new(Arc::new(resolver));
    let client = SharedClient::with_planner(ClientSettings::default(), planner);
    RequestExecutor::new(Arc::new(client), Some(Arc::new(policy)))
}

#[tokio::test]
async fn unresolvable_host_under_a_policy_is_a_transport_error() {
    let policy = EgressPolicy::new(vec![ProxyRule {
        matcher: AddressMatcher::new(Ipv4Addr::new(10, 0, 0, 1)).into(),
        target: ProxyTarget::new("127.0.0.1", 3128, "http"),
    }]);
    let executor = executor_resolving(StaticResolver::new(), policy);

    let err = executor.get("http://tiles.unknown.test/0/0/0.png").unwrap().execute().await.unwrap_err();
    match err {
        FetchError::Transport {
            source: TransportCause::Route(RouteError::Resolution(_)),
            ..
        } => {}
        other => panic!("expected resolution failure, got {:?}", other),
    }
}

#[tokio::test]
async fn direct_connection_goes_to_the_addresses_the_policy_checked() {
    let origin = start_mock_backend("planned").await;
    // The name only exists in the planner's table; the system resolver cannot
    // answer it, so the request succeeds only if the planned address is used.
    let resolver = StaticResolver::new().with("tiles.print.test", [IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    let policy = EgressPolicy::default().with_access(vec![AccessRule {
        matcher: AddressMatcher::new(Ipv4Addr::LOCALHOST).into(),
        reject: false,
    }]);
    let executor = executor_resolving(resolver, policy);

    let url = format!("http://tiles.print.test:{}/wms", origin.port());
    let mut response = executor.get(&url).unwrap().execute().await.unwrap();
    assert_eq!(&response.bytes().await.unwrap()[..], b"planned");

    let host = format!("tiles.print.test:{}", origin.port());
    assert_eq!(origin.requests()[0].header("host"), Some(host.as_str()));
}

fn challenge(request: &common::RecordedRequest) -> MockResponse {
    match request.header("authorization") {
        Some(_) => MockResponse::ok("authorized"),
        None => MockResponse::status(401).with_header("WWW-Authenticate", "Basic realm=\"geoserver\""),
    }
}

#[tokio::test]
async fn basic_challenge_is_answered_with_matching_credentials() {
    let origin = start_mock_server(challenge).await;
    let policy = EgressPolicy::default().with_credentials(vec![CredentialRule {
        matcher: AddressMatcher::new(Ipv4Addr::LOCALHOST).into(),
        username: "svc".into(),
        password: "secret".into(),
    }]);
    let executor = executor_with(ClientSettings::default(), Some(Arc::new(policy)));

    let mut response = executor.get(&origin.url("/wms")).unwrap().execute().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(&response.bytes().await.unwrap()[..], b"authorized");

    let requests = origin.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("authorization"), None);
    assert_eq!(requests[1].header("authorization"), Some("Basic c3ZjOnNlY3JldA=="));
}

#[tokio::test]
async fn challenge_without_matching_credentials_is_returned() {
    let origin = start_mock_server(challenge).await;
    let policy = EgressPolicy::default().with_credentials(vec![CredentialRule {
        matcher: AddressMatcher::new(Ipv4Addr::new(10, 1, 1, 1)).into(),
        username: "svc".into(),
        password: "secret".into(),
    }]);
    let executor = executor_with(ClientSettings::default(), Some(Arc::new(policy)));

    let response = executor.get(&origin.url("/wms")).unwrap().execute().await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(origin.request_count(), 1);
}
