#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

/// Two channels, three programmes (two on c1, listed out of order).
pub const SCENARIO_A: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE tv SYSTEM "xmltv.dtd">
<tv generator-info-name="fixture">
  <channel id="c1">
    <display-name>Channel One</display-name>
    <display-name>One HD</display-name>
    <icon src="http://example.com/c1.png"/>
  </channel>
  <channel id="c2">
    <display-name>Channel Two</display-name>
  </channel>
  <programme start="20240101130000 +0000" stop="20240101140000 +0000" channel="c1">
    <title lang="en">Afternoon &amp; Tea</title>
    <desc>Second on c1</desc>
    <category>Talk</category>
  </programme>
  <programme start="20240101120000 +0000" stop="20240101130000 +0000" channel="c1">
    <title>Lunch News</title>
  </programme>
  <programme start="20240101120000 +0100" stop="20240101123000 +0100" channel="c2">
    <title>Only on c2</title>
  </programme>
</tv>
"#;

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Serve the fixture routes on an ephemeral port.
///
/// - `/plain.xml`: the document as-is
/// - `/encoded.xml`: gzip body with `Content-Encoding: gzip`
/// - `/guide.xml.gz`: gzip body, only the extension says so
/// - `/corrupt.xml.gz`: gzip header followed by an invalid deflate stream
/// - `/slow-headers.xml`: responds after 5 seconds
/// - `/stalled.xml`: sends the start of the document, then stalls
/// - `/delayed.xml`: responds after 400ms
/// - anything else: 404
pub async fn spawn_server(document: &'static str) -> SocketAddr {
    let compressed = Bytes::from(gzip(document.as_bytes()));
    let encoded = compressed.clone();

    let app = Router::new()
        .route(
            "/plain.xml",
            get(move || async move { ([(header::CONTENT_TYPE, "application/xml")], document) }),
        )
        .route(
            "/encoded.xml",
            get(move || async move {
                (
                    [
                        (header::CONTENT_TYPE, "application/xml"),
                        (header::CONTENT_ENCODING, "gzip"),
                    ],
                    encoded,
                )
            }),
        )
        .route(
            "/guide.xml.gz",
            get(move || async move {
                ([(header::CONTENT_TYPE, "application/octet-stream")], compressed)
            }),
        )
        .route(
            "/corrupt.xml.gz",
            get(|| async {
                // Valid header, then a deflate block with the reserved block type.
                let mut body = vec![0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff, 0x07];
                body.extend_from_slice(&[0u8; 64]);
                body
            }),
        )
        .route(
            "/slow-headers.xml",
            get(move || async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                document
            }),
        )
        .route(
            "/stalled.xml",
            get(|| async {
                let head = futures::stream::once(async {
                    Ok::<_, std::io::Error>(Bytes::from_static(b"<tv><channel id=\"x\">"))
                });
                let tail = futures::stream::once(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, std::io::Error>(Bytes::from_static(b"</channel></tv>"))
                });
                Body::from_stream(futures::StreamExt::chain(head, tail))
            }),
        )
        .route(
            "/delayed.xml",
            get(move || async move {
                tokio::time::sleep(Duration::from_millis(400)).await;
                document
            }),
        )
        .fallback(|| async { (StatusCode::NOT_FOUND, "not found").into_response() });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
