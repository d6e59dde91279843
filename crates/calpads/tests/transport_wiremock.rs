//! Drives the reqwest backend through the login → OAuth → landing chain
//! against a local mock server.

use calpads::{AuthState, CalpadsClient, ClientConfig, Credentials};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_PAGE: &str = r#"
<html><body>
<form method="post" action="/Account/Login">
  <input type="hidden" id="ReturnUrl" name="ReturnUrl" value="/connect/authorize/callback" />
  <input name="Username" type="text" />
  <input name="Password" type="password" />
  <input name="__RequestVerificationToken" type="hidden" value="csrf-wire" />
</form>
</body></html>
"#;

const INTERSTITIAL: &str = r#"
<html><body onload="document.forms[0].submit()">
<form method="post" action="/signin-oidc">
  <input type="hidden" name="code" value="c0de" />
  <input type="hidden" name="state" value="st4te" />
</form>
</body></html>
"#;

const HOME_PAGE: &str = r#"<html><body><a href="/Account/Logout">Sign out</a></body></html>"#;

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(body)
}

fn redirect(to: &str) -> ResponseTemplate {
    ResponseTemplate::new(302).insert_header("location", to)
}

/// The host root bounces to the login form exactly once.
async fn mount_login_chain(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(redirect("/Account/Login?ReturnUrl=%2F"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(HOME_PAGE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Account/Login"))
        .respond_with(html(LOGIN_PAGE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/connect/authorize/callback"))
        .respond_with(html(INTERSTITIAL))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/signin-oidc"))
        .and(body_string_contains("code=c0de"))
        .respond_with(redirect("/"))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig {
        host: server.uri(),
        timeout_secs: 10,
        ..ClientConfig::default()
    }
}

async fn post_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .count()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_replays_login_and_consent() {
    let server = MockServer::start().await;
    mount_login_chain(&server).await;
    Mock::given(method("POST"))
        .and(path("/Account/Login"))
        .and(body_string_contains("Username=jdoe"))
        .and(body_string_contains("__RequestVerificationToken=csrf-wire"))
        .and(body_string_contains("AgreementConfirmed=True"))
        .respond_with(redirect("/connect/authorize/callback"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/FileSubmission/GetJobs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"Data":[{"JobID":501,"JobStatus":"Ready for Review","RejectedRecords":0}],"Total":1}"#),
        )
        .mount(&server)
        .await;

    let config = config_for(&server);
    let (connected, state, job) = tokio::task::spawn_blocking(move || {
        let mut client = CalpadsClient::connect(config, Credentials::new("jdoe", "s3cret")).unwrap();
        let jobs = client.jobs("0123456").unwrap();
        let job = jobs.latest().map(|j| j.job_id.clone());
        (client.is_connected(), client.auth_state(), job)
    })
    .await
    .unwrap();

    assert!(connected);
    assert_eq!(state, AuthState::Authenticated);
    assert_eq!(job.as_deref(), Some("501"));
    assert_eq!(post_count(&server).await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_credentials_leave_client_disconnected() {
    let server = MockServer::start().await;
    mount_login_chain(&server).await;
    Mock::given(method("POST"))
        .and(path("/Account/Login"))
        .respond_with(html(LOGIN_PAGE))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let connected = tokio::task::spawn_blocking(move || {
        CalpadsClient::connect(config, Credentials::new("jdoe", "wrong"))
            .unwrap()
            .is_connected()
    })
    .await
    .unwrap();

    assert!(!connected);
    assert_eq!(post_count(&server).await, 1);
}
