//! End-to-end exercises of the message channel against a live HTTP server:
//! the privileged proxy fetch, upstream error propagation, and the
//! restricted-side fetch policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use snapstitch::inline;
use snapstitch::page::fetch::{HttpPageFetch, ImageProxyFetcher};
use snapstitch::platform::{NoopCapture, NoopHost, StaticPermissions};
use snapstitch::privileged::{Backends, Background, BackgroundHandle};
use snapstitch::test_utils::{FailingPageFetch, FakeSurface};
use snapstitch::Error;

use image::{Rgba, RgbaImage};
use tiny_http::{Header, Response, Server};

fn spawn_background() -> BackgroundHandle {
    Background::new(Backends {
        capture: Arc::new(NoopCapture),
        permissions: Arc::new(StaticPermissions::denying()),
        host: Arc::new(NoopHost::new()),
    })
    .expect("register handlers")
    .spawn()
}

/// Serve one request with the given PNG body, returning the server URL.
fn serve_png_once(png: Vec<u8>) -> String {
    let server = Server::http("127.0.0.1:0").expect("bind test server");
    let addr = server.server_addr();
    std::thread::spawn(move || {
        if let Ok(request) = server.recv() {
            let response = Response::from_data(png).with_header(
                Header::from_bytes(&b"Content-Type"[..], &b"image/png"[..]).unwrap(),
            );
            let _ = request.respond(response);
        }
    });
    format!("http://{}/tile.png", addr)
}

#[tokio::test(flavor = "multi_thread")]
async fn proxied_fetch_returns_inline_image_data() {
    let mut img = RgbaImage::new(2, 2);
    img.put_pixel(1, 1, Rgba([40, 50, 60, 255]));
    let url = serve_png_once(inline::encode_png(&img).unwrap());

    let background = spawn_background();
    let sender = background.connect(1);

    let data = sender.fetch_image(&url).await.expect("proxied fetch");
    assert!(data.starts_with("data:image/png;base64,"));
    let back = inline::decode_image(&data).expect("decodable payload");
    assert_eq!(back.dimensions(), (2, 2));
    assert_eq!(back.get_pixel(1, 1), &Rgba([40, 50, 60, 255]));
}

#[tokio::test(flavor = "multi_thread")]
async fn proxied_fetch_carries_the_upstream_status() {
    let server = Server::http("127.0.0.1:0").expect("bind test server");
    let addr = server.server_addr();
    std::thread::spawn(move || {
        if let Ok(request) = server.recv() {
            let _ = request.respond(Response::from_string("gone").with_status_code(404));
        }
    });

    let background = spawn_background();
    let sender = background.connect(1);

    let err = sender
        .fetch_image(&format!("http://{}/missing.png", addr))
        .await
        .expect_err("404 must fail the fetch");
    match err {
        Error::Response { status_code, .. } => assert_eq!(status_code, Some(404)),
        other => panic!("expected a response error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn proxied_fetch_rejects_unparseable_urls() {
    let background = spawn_background();
    let sender = background.connect(1);

    let err = sender
        .fetch_image("not a url at all")
        .await
        .expect_err("invalid url must fail");
    match err {
        Error::Response { message, .. } => assert!(message.contains("invalid url")),
        other => panic!("expected a response error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn show_options_reaches_the_host_backend() {
    let host = Arc::new(NoopHost::new());
    let background = Background::new(Backends {
        capture: Arc::new(NoopCapture),
        permissions: Arc::new(StaticPermissions::denying()),
        host: host.clone(),
    })
    .expect("register handlers")
    .spawn();

    background.connect(1).show_options().await.expect("routed");
    assert_eq!(host.options_opened(), 1);
}

/// A server that accepts the request but never answers must not hang the
/// capture: the configured timeout fails the fetch and the image resolves
/// to `None`.
#[tokio::test(flavor = "multi_thread")]
async fn stalled_direct_fetch_times_out_instead_of_hanging() {
    let server = Server::http("127.0.0.1:0").expect("bind test server");
    let addr = server.server_addr();
    std::thread::spawn(move || {
        if let Ok(request) = server.recv() {
            std::thread::sleep(Duration::from_secs(5));
            let _ = request.respond(Response::from_string("too late"));
        }
    });

    // The broad grant is held, so the fetcher takes the direct path.
    let background = Background::new(Backends {
        capture: Arc::new(NoopCapture),
        permissions: Arc::new(StaticPermissions::with_origins(&["*://*/"])),
        host: Arc::new(NoopHost::new()),
    })
    .expect("register handlers")
    .spawn();

    let fetcher = ImageProxyFetcher::new(
        background.connect(1),
        Arc::new(HttpPageFetch::new()),
        Arc::new(FakeSurface::new()),
        Some(Duration::from_millis(200)),
    );

    let started = Instant::now();
    let data = fetcher
        .fetch_image(&format!("http://{}/stalled.png", addr))
        .await;
    assert_eq!(data, None);
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "fetch did not respect the timeout"
    );
}

/// Without the broad host grant, the restricted fetcher must relay through
/// the privileged side even when its own fetch capability exists (here it
/// fails outright, so only the relay path can produce data).
#[tokio::test(flavor = "multi_thread")]
async fn image_fetch_without_the_grant_relays_to_the_privileged_side() {
    let img = RgbaImage::from_pixel(1, 1, Rgba([7, 8, 9, 255]));
    let url = serve_png_once(inline::encode_png(&img).unwrap());

    let background = spawn_background();
    let surface = Arc::new(FakeSurface::new());
    let fetcher = ImageProxyFetcher::new(
        background.connect(1),
        Arc::new(FailingPageFetch),
        surface.clone(),
        None,
    );

    let data = fetcher.fetch_image(&url).await.expect("relayed fetch");
    let back = inline::decode_image(&data).expect("decodable payload");
    assert_eq!(back.get_pixel(0, 0), &Rgba([7, 8, 9, 255]));
    // The relay path never raises the permission upsell.
    assert_eq!(surface.permission_warnings(), 0);
}
