/*
 * client.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of tcphttp, an HTTP/1.1 client over raw TCP and TLS sockets.
 *
 * tcphttp is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tcphttp is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tcphttp.  If not, see <http://www.gnu.org/licenses/>.
 */

//! End-to-end tests for `HttpClient` against in-process origin and proxy servers:
//! connection reuse, close handling, body framing, cookies, CONNECT tunnelling, TLS
//! verification, and failure cleanup.
//!
//! Run with:
//!   cargo test -p tcphttp_core --test client

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use url::Url;

use common::{
    init_tracing, ok_response, start_origin, start_proxy, start_tls_origin, start_tls_proxy,
    tls_fixture,
};
use tcphttp_core::http::PoolKey;
use tcphttp_core::{ClientConfig, HttpClient, HttpError, Method, Request};

fn url(port: u16, path: &str) -> Url {
    Url::parse(&format!("http://127.0.0.1:{}{}", port, path)).unwrap()
}

fn key(port: u16) -> PoolKey {
    PoolKey::new("http", "127.0.0.1", port)
}

#[tokio::test]
async fn keep_alive_reuses_one_connection() {
    init_tracing();
    let origin = start_origin(|n, _| ok_response(&format!("reply {}", n))).await;
    let client = HttpClient::new(ClientConfig::default());

    for n in 0..3 {
        let mut req = Request::get(url(origin.port, "/ping"));
        let resp = client.send_request(&mut req).await.unwrap();
        assert_eq!(resp.code, 200);
        assert_eq!(resp.text(), format!("reply {}", n));
    }
    assert_eq!(origin.connection_count(), 1);
    assert!(client.pool().is_idle(&key(origin.port)));
}

#[tokio::test]
async fn connection_close_request_removes_pool_entry() {
    let origin = start_origin(|_, _| ok_response("bye")).await;
    let client = HttpClient::new(ClientConfig::default());

    let mut req = Request::get(url(origin.port, "/"));
    req.add_header("Connection", "close");
    let resp = client.send_request(&mut req).await.unwrap();
    assert_eq!(resp.text(), "bye");
    assert!(!client.pool().contains(&key(origin.port)));

    let mut req = Request::get(url(origin.port, "/"));
    client.send_request(&mut req).await.unwrap();
    assert_eq!(origin.connection_count(), 2);
}

#[tokio::test]
async fn server_close_header_retires_connection() {
    let origin = start_origin(|_, _| {
        b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok".to_vec()
    })
    .await;
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::get(url(origin.port, "/"));
    let resp = client.send_request(&mut req).await.unwrap();
    assert_eq!(resp.text(), "ok");
    assert!(resp.wants_close());
    assert!(!client.pool().contains(&key(origin.port)));
}

#[tokio::test]
async fn chunked_body_is_decoded() {
    let origin = start_origin(|_, _| {
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n6;note=x\r\n world\r\n0\r\nX-Checksum: 42\r\n\r\n"
            .to_vec()
    })
    .await;
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::get(url(origin.port, "/stream"));
    let resp = client.send_request(&mut req).await.unwrap();
    assert_eq!(resp.text(), "hello world");
    assert_eq!(resp.header("x-checksum"), Some("42"));
    assert!(client.pool().is_idle(&key(origin.port)));
}

#[tokio::test]
async fn no_content_response_has_empty_body() {
    let origin = start_origin(|_, _| b"HTTP/1.1 204 No Content\r\n\r\n".to_vec()).await;
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::new(url(origin.port, "/item"), Method::Delete);
    let resp = client.send_request(&mut req).await.unwrap();
    assert_eq!(resp.code, 204);
    assert!(resp.body.is_empty());
}

#[tokio::test]
async fn post_body_and_host_header_are_sent() {
    let origin = start_origin(|_, _| ok_response("stored")).await;
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::new(url(origin.port, "/submit?x=1"), Method::Post);
    req.set_content("hi", "text/plain");
    client.send_request(&mut req).await.unwrap();

    let sent = &origin.requests()[0];
    assert!(
        sent.starts_with(&format!(
            "POST http://127.0.0.1:{}/submit?x=1 HTTP/1.1\r\n",
            origin.port
        )),
        "{}",
        sent
    );
    assert!(sent.contains(&format!("Host: 127.0.0.1:{}\r\n", origin.port)));
    assert!(sent.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    assert!(sent.contains("Content-Length: 2\r\n"));
    assert!(sent.ends_with("\r\n\r\nhi"));
}

#[tokio::test]
async fn set_cookie_is_sent_back() {
    let origin = start_origin(|n, _| {
        if n == 0 {
            b"HTTP/1.1 200 OK\r\nSet-Cookie: sid=abc; Path=/\r\nSet-Cookie: lang=en\r\nContent-Length: 0\r\n\r\n"
                .to_vec()
        } else {
            ok_response("")
        }
    })
    .await;
    let client = HttpClient::new(ClientConfig::default());

    let mut first = Request::get(url(origin.port, "/login"));
    client.send_request(&mut first).await.unwrap();
    assert_eq!(client.all_cookies().len(), 2);

    let mut second = Request::get(url(origin.port, "/account"));
    client.send_request(&mut second).await.unwrap();
    let sent = &origin.requests()[1];
    let cookie_line = sent
        .lines()
        .find(|l| l.starts_with("Cookie: "))
        .unwrap_or_else(|| panic!("no Cookie header in {}", sent));
    assert!(cookie_line.contains("sid=abc"));
    assert!(cookie_line.contains("lang=en"));
}

#[tokio::test]
async fn cookie_container_can_be_disabled() {
    let origin = start_origin(|_, _| {
        b"HTTP/1.1 200 OK\r\nSet-Cookie: sid=abc\r\nContent-Length: 0\r\n\r\n".to_vec()
    })
    .await;
    let config = ClientConfig {
        cookie_container: false,
        ..ClientConfig::default()
    };
    let client = HttpClient::new(config);
    for _ in 0..2 {
        let mut req = Request::get(url(origin.port, "/"));
        client.send_request(&mut req).await.unwrap();
    }
    assert!(client.all_cookies().is_empty());
    assert!(origin.requests().iter().all(|r| !r.contains("Cookie:")));
}

#[tokio::test]
async fn concurrent_requests_share_one_connection() {
    let origin = start_origin(|n, _| ok_response(&n.to_string())).await;
    let client = Arc::new(HttpClient::new(ClientConfig::default()));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let client = client.clone();
        let port = origin.port;
        tasks.push(tokio::spawn(async move {
            let mut req = Request::get(url(port, "/"));
            client.send_request(&mut req).await.map(|r| r.code)
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 200);
    }
    assert_eq!(origin.connection_count(), 1);
    assert_eq!(origin.requests().len(), 4);
}

#[tokio::test]
async fn connect_leaves_idle_connection_for_next_request() {
    let origin = start_origin(|_, _| ok_response("hi")).await;
    let client = HttpClient::new(ClientConfig::default());
    assert!(client.connect(&url(origin.port, "/")).await.unwrap());
    assert!(client.pool().is_idle(&key(origin.port)));

    let mut req = Request::get(url(origin.port, "/"));
    client.send_request(&mut req).await.unwrap();
    assert_eq!(origin.connection_count(), 1);
}

#[tokio::test]
async fn unsupported_scheme_is_protocol_error() {
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::get(Url::parse("ftp://127.0.0.1/file").unwrap());
    assert!(matches!(
        client.send_request(&mut req).await,
        Err(HttpError::Protocol(_))
    ));
    assert!(matches!(
        client.connect(&Url::parse("ftp://127.0.0.1/").unwrap()).await,
        Err(HttpError::Protocol(_))
    ));
}

#[tokio::test]
async fn refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::get(url(port, "/"));
    let err = client.send_request(&mut req).await.unwrap_err();
    assert!(matches!(err, HttpError::Transport { .. }), "{}", err);
}

#[tokio::test]
async fn truncated_response_removes_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        common::read_request(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
            .await
            .unwrap();
    });
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::get(url(port, "/"));
    let err = client.send_request(&mut req).await.unwrap_err();
    assert!(err.is_transport(), "{}", err);
    assert!(!client.pool().contains(&key(port)));
}

#[tokio::test]
async fn request_timeout_closes_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        common::read_request(&mut socket).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    let config = ClientConfig {
        request_timeout_secs: Some(1),
        ..ClientConfig::default()
    };
    let client = HttpClient::new(config);
    let mut req = Request::get(url(port, "/slow"));
    let err = client.send_request(&mut req).await.unwrap_err();
    assert!(matches!(err, HttpError::Timeout(_)), "{}", err);
    assert!(!client.pool().contains(&key(port)));
}

#[tokio::test]
async fn malformed_response_is_parse_error() {
    let origin = start_origin(|_, _| b"HTTP/1.1 200 OK\r\nbroken header\r\n\r\n".to_vec()).await;
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::get(url(origin.port, "/"));
    assert!(matches!(
        client.send_request(&mut req).await,
        Err(HttpError::Parse(_))
    ));
    assert!(!client.pool().is_idle(&key(origin.port)));
}

#[tokio::test]
async fn dispose_closes_pooled_connections() {
    let origin = start_origin(|_, _| ok_response("x")).await;
    let client = HttpClient::new(ClientConfig::default());
    let mut req = Request::get(url(origin.port, "/"));
    client.send_request(&mut req).await.unwrap();
    assert_eq!(client.pool().len(), 1);
    client.dispose().await;
    assert!(client.pool().is_empty());
}

#[tokio::test]
async fn request_through_connect_proxy() {
    init_tracing();
    let proxy = start_proxy("HTTP/1.1 200 Connection Established\r\n\r\n", |_, _| {
        ok_response("tunnelled")
    })
    .await;
    let client = HttpClient::new(ClientConfig::default().with_proxy("127.0.0.1", proxy.port));

    let target = Url::parse("http://origin.test:8080/path").unwrap();
    for _ in 0..2 {
        let mut req = Request::get(target.clone());
        let resp = client.send_request(&mut req).await.unwrap();
        assert_eq!(resp.text(), "tunnelled");
    }
    assert_eq!(proxy.connection_count(), 1);
    let seen = proxy.requests();
    assert_eq!(
        seen[0],
        "CONNECT origin.test:8080 HTTP/1.1\r\nHost: origin.test:8080\r\n\r\n"
    );
    assert!(seen[1].starts_with("GET http://origin.test:8080/path HTTP/1.1\r\n"));
    assert!(seen[1].contains("Host: origin.test:8080\r\n"));
    assert_eq!(seen.len(), 3);
}

#[tokio::test]
async fn proxy_refusal_is_tunnel_error() {
    let proxy = start_proxy("HTTP/1.1 403 Forbidden\r\n\r\n", |_, _| ok_response("")).await;
    let client = HttpClient::new(ClientConfig::default().with_proxy("127.0.0.1", proxy.port));
    let mut req = Request::get(Url::parse("https://origin.test/").unwrap());
    let err = client.send_request(&mut req).await.unwrap_err();
    assert!(matches!(err, HttpError::ProxyTunnel(_)), "{}", err);
}

#[tokio::test]
async fn https_request_verifies_origin_certificate() {
    init_tracing();
    let fixture = tls_fixture(&["localhost"]);
    let origin = start_tls_origin(fixture.acceptor, |_, _| ok_response("secure")).await;
    let client = HttpClient::with_tls_roots(ClientConfig::default(), fixture.roots).unwrap();

    let target = Url::parse(&format!("https://localhost:{}/", origin.port)).unwrap();
    for _ in 0..2 {
        let mut req = Request::get(target.clone());
        let resp = client.send_request(&mut req).await.unwrap();
        assert_eq!(resp.text(), "secure");
    }
    assert_eq!(origin.connection_count(), 1);
}

#[tokio::test]
async fn direct_tls_name_mismatch_is_rejected() {
    let fixture = tls_fixture(&["localhost"]);
    let origin = start_tls_origin(fixture.acceptor, |_, _| ok_response("secure")).await;
    let client = HttpClient::with_tls_roots(ClientConfig::default(), fixture.roots).unwrap();

    // The certificate names localhost, not the IP address.
    let mut req = Request::get(Url::parse(&format!("https://127.0.0.1:{}/", origin.port)).unwrap());
    let err = client.send_request(&mut req).await.unwrap_err();
    assert!(matches!(err, HttpError::Transport { .. }), "{}", err);
    assert!(origin.requests().is_empty());
}

#[tokio::test]
async fn tunnelled_tls_accepts_name_mismatch() {
    init_tracing();
    let fixture = tls_fixture(&["localhost"]);
    let proxy = start_tls_proxy(fixture.acceptor, |_, _| ok_response("tunnelled tls")).await;
    let client = HttpClient::with_tls_roots(
        ClientConfig::default().with_proxy("127.0.0.1", proxy.port),
        fixture.roots,
    )
    .unwrap();

    let mut req = Request::get(Url::parse("https://origin.test/data").unwrap());
    let resp = client.send_request(&mut req).await.unwrap();
    assert_eq!(resp.text(), "tunnelled tls");
    let seen = proxy.requests();
    assert_eq!(
        seen[0],
        "CONNECT origin.test:443 HTTP/1.1\r\nHost: origin.test:443\r\n\r\n"
    );
    assert!(seen[1].starts_with("GET https://origin.test/data HTTP/1.1\r\n"));
}

#[tokio::test]
async fn tunnelled_tls_still_checks_the_chain() {
    let served = tls_fixture(&["origin.test"]);
    let trusted = tls_fixture(&["origin.test"]);
    let proxy = start_tls_proxy(served.acceptor, |_, _| ok_response("")).await;
    let client = HttpClient::with_tls_roots(
        ClientConfig::default().with_proxy("127.0.0.1", proxy.port),
        trusted.roots,
    )
    .unwrap();

    let mut req = Request::get(Url::parse("https://origin.test/").unwrap());
    let err = client.send_request(&mut req).await.unwrap_err();
    assert!(matches!(err, HttpError::Transport { .. }), "{}", err);
    assert_eq!(proxy.requests().len(), 1);
}
