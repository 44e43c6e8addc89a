//! End-to-end scenarios against local mock servers.
//!
//! Covers the global facade, proxy tunnelling (HTTP `CONNECT` and SOCKS5)
//! through small in-process proxies, uploads and downloads.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Once;
use std::sync::mpsc;
use std::thread;

use fluent_http::{ClientBuilder, HttpError, ProxyConfig, Settings};
use httpmock::Method::HEAD;
use httpmock::prelude::*;

static INIT: Once = Once::new();

fn init_global() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("fluent_http=debug")
            .with_test_writer()
            .try_init()
            .ok();
        fluent_http::init_global(Settings::for_testing().with_user_agent("integration/1.0"))
            .unwrap();
    });
}

/// Copy bytes both ways until either side closes.
fn pipe(client: impl Read + Send + 'static, client_out: TcpStream, upstream: TcpStream) {
    let mut upstream_in = upstream.try_clone().unwrap();
    let mut client_out = client_out;
    thread::spawn(move || io::copy(&mut upstream_in, &mut client_out).ok());

    let mut client = client;
    let mut upstream = upstream;
    io::copy(&mut client, &mut upstream).ok();
}

/// Minimal HTTP proxy accepting one `CONNECT` tunnel; reports the request head.
fn spawn_connect_proxy() -> (SocketAddr, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut client, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(client.try_clone().unwrap());

        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        let target = head.split_whitespace().nth(1).unwrap().to_owned();
        tx.send(head).unwrap();

        let upstream = TcpStream::connect(target).unwrap();
        client
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .unwrap();
        pipe(reader, client, upstream);
    });

    (addr, rx)
}

/// Minimal forwarding proxy answering one request itself; reports the request head.
fn spawn_forward_proxy(reply: &'static str) -> (SocketAddr, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut client, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(client.try_clone().unwrap());

        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        tx.send(head).unwrap();

        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
            reply.len()
        );
        client.write_all(response.as_bytes()).unwrap();
    });

    (addr, rx)
}

/// Minimal SOCKS5 proxy (no authentication) accepting one connection;
/// reports the address type and the destination host it was asked for.
fn spawn_socks5_proxy() -> (SocketAddr, mpsc::Receiver<(u8, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut client, _) = listener.accept().unwrap();

        let mut greeting = [0_u8; 2];
        client.read_exact(&mut greeting).unwrap();
        let mut methods = vec![0_u8; usize::from(greeting[1])];
        client.read_exact(&mut methods).unwrap();
        client.write_all(&[0x05, 0x00]).unwrap();

        let mut request = [0_u8; 4];
        client.read_exact(&mut request).unwrap();
        let atyp = request[3];
        let host = match atyp {
            0x01 => {
                let mut ip = [0_u8; 4];
                client.read_exact(&mut ip).unwrap();
                std::net::Ipv4Addr::from(ip).to_string()
            }
            0x03 => {
                let mut len = [0_u8; 1];
                client.read_exact(&mut len).unwrap();
                let mut name = vec![0_u8; usize::from(len[0])];
                client.read_exact(&mut name).unwrap();
                String::from_utf8(name).unwrap()
            }
            other => panic!("unexpected address type {other}"),
        };
        let mut port = [0_u8; 2];
        client.read_exact(&mut port).unwrap();
        let port = u16::from_be_bytes(port);
        tx.send((atyp, host.clone())).unwrap();

        let upstream = TcpStream::connect((host.as_str(), port)).unwrap();
        client
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .unwrap();
        let client_out = client.try_clone().unwrap();
        pipe(client, client_out, upstream);
    });

    (addr, rx)
}

#[test]
fn global_facade_uses_global_settings() {
    init_global();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/hello")
            .header("user-agent", "integration/1.0");
        then.status(200).body("hi");
    });

    assert_eq!(fluent_http::get(&server.url("/hello")).text().unwrap(), "hi");
    mock.assert();

    let err = fluent_http::init_global(Settings::default()).unwrap_err();
    assert!(matches!(err, HttpError::SettingsAlreadyInitialized));
}

#[test]
fn global_facade_verbs() {
    init_global();

    let server = MockServer::start();
    let put = server.mock(|when, then| {
        when.method(PUT).path("/item").body(r#"{"n":1}"#);
        then.status(204);
    });
    let delete = server.mock(|when, then| {
        when.method(DELETE).path("/item");
        then.status(204);
    });
    let head = server.mock(|when, then| {
        when.method(HEAD).path("/item");
        then.status(200).header("x-item-version", "7");
    });

    let mut request = fluent_http::put(&server.url("/item")).json(&serde_json::json!({"n": 1}));
    assert_eq!(request.execute().unwrap().status().as_u16(), 204);

    let mut request = fluent_http::delete(&server.url("/item"));
    assert_eq!(request.execute().unwrap().status().as_u16(), 204);

    let mut request = fluent_http::head(&server.url("/item"));
    let response = request.execute().unwrap();
    assert_eq!(response.headers()["x-item-version"], "7");
    assert!(response.bytes().unwrap().is_empty());

    put.assert();
    delete.assert();
    head.assert();
}

#[test]
fn request_tunnels_through_http_proxy_with_credentials() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/via-proxy");
        then.status(200).body("tunnelled");
    });

    let (proxy_addr, connect_head) = spawn_connect_proxy();
    let client = ClientBuilder::with_settings(Settings::for_testing())
        .proxy(ProxyConfig::Custom(format!("http://user:pa%20ss@{proxy_addr}")))
        .build()
        .unwrap();

    let text = client.get(&server.url("/via-proxy")).text().unwrap();
    assert_eq!(text, "tunnelled");
    mock.assert();

    let head = connect_head.recv().unwrap();
    assert!(
        head.starts_with(&format!("CONNECT {} ", server.address())),
        "got {head}"
    );
    assert!(
        head.to_ascii_lowercase()
            .contains("proxy-authorization: basic dxnlcjpwysbzcw=="),
        "got {head}"
    );
}

#[test]
fn plain_http_request_is_forwarded_by_http_proxy() {
    let (proxy_addr, forwarded_head) = spawn_forward_proxy("forwarded");
    let client = ClientBuilder::with_settings(Settings::for_testing())
        .proxy(ProxyConfig::Custom(format!("http://user:secret@{proxy_addr}")))
        .build()
        .unwrap();

    let text = client.get("http://origin.test/resource?x=1").text().unwrap();
    assert_eq!(text, "forwarded");

    let head = forwarded_head.recv().unwrap();
    assert!(
        head.starts_with("GET http://origin.test/resource?x=1 HTTP/1.1\r\n"),
        "got {head}"
    );
    let lower = head.to_ascii_lowercase();
    assert!(
        lower.contains("proxy-authorization: basic dxnlcjpzzwnyzxq="),
        "got {head}"
    );
    assert!(lower.contains("host: origin.test\r\n"), "got {head}");
}

#[test]
fn request_goes_through_socks5h_proxy_with_remote_dns() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/via-socks");
        then.status(200).body("socks");
    });

    let (proxy_addr, destination) = spawn_socks5_proxy();
    let client = ClientBuilder::with_settings(Settings::for_testing())
        .proxy(ProxyConfig::Custom(format!("socks5h://{proxy_addr}")))
        .build()
        .unwrap();

    let url = format!("http://localhost:{}/via-socks", server.port());
    assert_eq!(client.get(&url).text().unwrap(), "socks");
    mock.assert();

    let (atyp, host) = destination.recv().unwrap();
    assert_eq!(atyp, 0x03, "socks5h sends the host name");
    assert_eq!(host, "localhost");
}

#[test]
fn upload_and_download_round_trip() {
    init_global();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, "meeting notes").unwrap();

    let server = MockServer::start();
    let upload = server.mock(|when, then| {
        when.method(POST)
            .path("/files")
            .query_param("folder", "inbox")
            .header("cookie", "session=abc")
            .body_includes("name=\"owner\"\r\n\r\nada\r\n")
            .body_includes("filename=\"notes.txt\"")
            .body_includes("meeting notes");
        then.status(201)
            .header("content-type", "application/json")
            .body(r#"{"id":"f-1"}"#);
    });
    let download = server.mock(|when, then| {
        when.method(GET).path("/files/f-1");
        then.status(200)
            .header("content-type", "text/plain")
            .header("content-disposition", "attachment; filename=\"notes-copy.txt\"")
            .body("meeting notes");
    });

    let created = fluent_http::post(&server.url("/files"))
        .query_param("folder", "inbox")
        .add_cookie(("session", "abc"))
        .add_form_fields([("owner", "ada")])
        .attach_file("file", &source, "")
        .json_map()
        .unwrap();
    assert_eq!(created["id"], "f-1");

    let out = tempfile::tempdir().unwrap();
    let saved = fluent_http::get(&server.url("/files/f-1"))
        .to_file(out.path(), None)
        .unwrap();
    assert_eq!(saved, out.path().join("notes-copy.txt"));
    assert_eq!(std::fs::read_to_string(saved).unwrap(), "meeting notes");

    upload.assert();
    download.assert();
}

#[test]
fn json_from_non_json_endpoint_is_content_type_mismatch() {
    init_global();

    let server = MockServer::start();
    let _m = server.mock(|when, then| {
        when.method(GET).path("/page");
        then.status(200)
            .header("content-type", "text/html")
            .body("<p>hello</p>");
    });

    let err = fluent_http::get(&server.url("/page"))
        .json_map()
        .unwrap_err();
    assert!(
        matches!(
            err,
            HttpError::ContentTypeMismatch { ref message, .. } if message == "<p>hello</p>"
        ),
        "got {err:?}"
    );
}

#[test]
fn missing_url_surfaces_lack_url() {
    let err = fluent_http::get("").execute().unwrap_err();
    assert!(matches!(err, HttpError::LackUrl), "got {err:?}");
}

#[test]
fn decode_content_is_usable_from_crate_root() {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"zlib labelled as deflate").unwrap();
    let raw = bytes::Bytes::from(encoder.finish().unwrap());

    let decoded = fluent_http::decode_content(Some("deflate"), &raw, None).unwrap();
    assert_eq!(decoded, "zlib labelled as deflate");

    let passthrough = fluent_http::decode_content(Some("br"), &raw, None).unwrap();
    assert_eq!(passthrough, raw);
}
