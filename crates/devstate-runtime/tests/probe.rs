//! Readiness prober tests against real commands and an in-process HTTP server.

use devstate_runtime::{AliasTable, PollFailure, ReadinessProber};
use devstate_schema::{PollPolicy, ProbeTarget};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Response, Server, StatusCode};

struct HealthServer {
    url: String,
    server: Arc<Server>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl HealthServer {
    /// `/health` answers 200, `/down` answers 503, everything else 404.
    fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind test server"));
        let port = server.server_addr().to_ip().expect("ip addr").port();
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                let code: u16 = match request.url() {
                    "/health" => 200,
                    "/down" => 503,
                    _ => 404,
                };
                let _ = request.respond(Response::from_string("body").with_status_code(StatusCode(code)));
            }
        });
        Self {
            url: format!("http://127.0.0.1:{port}"),
            server,
            handle: Some(handle),
        }
    }
}

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn prober() -> ReadinessProber {
    ReadinessProber::new(AliasTable::new(), std::env::temp_dir())
}

fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/health")
}

fn fast_policy(max_retries: u32) -> PollPolicy {
    PollPolicy {
        max_retries,
        retry_interval: Duration::ZERO,
        successful_retries_required: 1,
        max_time: Duration::from_secs(30),
    }
}

#[test]
fn endpoint_ok_is_ready() {
    let server = HealthServer::start();
    let result = prober().check_now(&ProbeTarget::Endpoint(format!("{}/health", server.url)));
    assert!(result.ready, "{}", result.detail);
    assert_eq!(result.detail, "HTTP 200");
}

#[test]
fn endpoint_error_status_is_not_ready() {
    let server = HealthServer::start();
    let result = prober().check_now(&ProbeTarget::Endpoint(format!("{}/down", server.url)));
    assert!(!result.ready);
    assert_eq!(result.detail, "HTTP 503");
}

#[test]
fn refused_connection_is_not_ready() {
    let result = prober().check_now(&ProbeTarget::Endpoint(closed_port_url()));
    assert!(!result.ready);
}

#[test]
fn wait_on_endpoint_succeeds() {
    let server = HealthServer::start();
    let outcome = prober().wait_until_ready(
        &ProbeTarget::Endpoint(format!("{}/health", server.url)),
        &fast_policy(3),
        |_| {},
    );
    assert!(outcome.ready());
    assert_eq!(outcome.attempts, 1);
}

#[test]
fn wait_on_dead_endpoint_exhausts_retries() {
    let outcome = prober().wait_until_ready(
        &ProbeTarget::Endpoint(closed_port_url()),
        &fast_policy(2),
        |_| {},
    );
    assert_eq!(
        outcome.failure,
        Some(PollFailure::RetriesExhausted { attempts: 2 })
    );
}

#[cfg(unix)]
#[test]
fn command_probe_uses_exit_code_and_patterns() {
    let p = prober();
    assert!(p.check_now(&ProbeTarget::Command("true".to_owned())).ready);
    assert!(!p.check_now(&ProbeTarget::Command("false".to_owned())).ready);
    let refused = p.check_now(&ProbeTarget::Command(
        "echo 'connection refused'".to_owned(),
    ));
    assert!(!refused.ready);
    assert!(refused.detail.contains("connection refused"));
}

#[cfg(unix)]
#[test]
fn command_wait_becomes_ready_once_file_appears() {
    let dir = tempfile::tempdir().unwrap();
    let flag = dir.path().join("flag");
    let counter = dir.path().join("count");
    // Creates the flag on the second invocation.
    let script = format!(
        "echo x >> {c}; [ $(wc -l < {c}) -ge 2 ] && touch {f}; test -f {f}",
        c = counter.display(),
        f = flag.display()
    );
    let mut attempts = Vec::new();
    let outcome = prober().wait_until_ready(
        &ProbeTarget::Command(script),
        &fast_policy(5),
        |a| attempts.push(a.ready),
    );
    assert!(outcome.ready(), "{}", outcome.last_detail);
    assert_eq!(attempts, vec![false, true]);
}
