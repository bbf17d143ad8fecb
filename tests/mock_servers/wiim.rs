//! Mock WiiM / LinkPlay device
//!
//! Serves `/httpapi.asp?command=...`, an SSDP description document and the
//! image paths the artwork resolver probes.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// What the mock is currently "playing"
#[derive(Debug, Clone, Default)]
pub struct MockTrack {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub album_art_uri: String,
}

#[derive(Default)]
struct MockWiimState {
    track: MockTrack,
    status: String,
    /// Answer status commands with plain text instead of JSON
    not_an_api: bool,
    /// `(artist, title)` pairs that `/albumart` has a cover for
    covers: Vec<(String, String)>,
    serve_nowplaying_jpg: bool,
    next_calls: u32,
    fail_next: u32,
    art_requests: u32,
}

/// Mock WiiM device
pub struct MockWiimDevice {
    addr: SocketAddr,
    state: Arc<RwLock<MockWiimState>>,
    handle: JoinHandle<()>,
}

impl MockWiimDevice {
    /// Start a mock device on a random port
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockWiimState {
            status: "stop".to_string(),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/httpapi.asp", get(handle_command))
            .route("/description.xml", get(handle_description))
            .route("/albumart", get(handle_albumart))
            .route("/nowplaying.jpg", get(handle_nowplaying_jpg))
            .route("/cover.png", get(handle_cover))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Get the server address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn play(&self, artist: &str, title: &str, album: &str) {
        let mut state = self.state.write().await;
        state.track = MockTrack {
            artist: artist.to_string(),
            title: title.to_string(),
            album: album.to_string(),
            album_art_uri: String::new(),
        };
        state.status = "play".to_string();
    }

    pub async fn set_album_art_uri(&self, uri: &str) {
        self.state.write().await.track.album_art_uri = uri.to_string();
    }

    pub async fn set_status(&self, status: &str) {
        self.state.write().await.status = status.to_string();
    }

    pub async fn set_not_an_api(&self, value: bool) {
        self.state.write().await.not_an_api = value;
    }

    pub async fn add_cover(&self, artist: &str, title: &str) {
        self.state
            .write()
            .await
            .covers
            .push((artist.to_string(), title.to_string()));
    }

    pub async fn serve_nowplaying_jpg(&self, value: bool) {
        self.state.write().await.serve_nowplaying_jpg = value;
    }

    /// Make the next `n` skip commands fail with 500
    pub async fn fail_next(&self, n: u32) {
        self.state.write().await.fail_next = n;
    }

    pub async fn next_calls(&self) -> u32 {
        self.state.read().await.next_calls
    }

    /// Requests to any image path
    pub async fn art_requests(&self) -> u32 {
        self.state.read().await.art_requests
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
    }
}

/// Small solid PNG
pub fn png(color: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb(color)));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn png_response(color: [u8; 3]) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], png(color)).into_response()
}

async fn handle_command(
    State(state): State<Arc<RwLock<MockWiimState>>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let command = params.get("command").map(String::as_str).unwrap_or("");
    let mut state = state.write().await;

    if state.not_an_api {
        return (StatusCode::OK, "<html>router login</html>").into_response();
    }

    match command {
        "getMetaInfo" => Json(json!({
            "metaData": {
                "album": state.track.album,
                "title": state.track.title,
                "artist": state.track.artist,
                "albumArtURI": state.track.album_art_uri,
                "sampleRate": "44100",
                "bitDepth": "16"
            }
        }))
        .into_response(),
        "getPlayerStatus" => Json(json!({
            "type": "0",
            "ch": "0",
            "mode": "31",
            "status": state.status,
            "vol": "35"
        }))
        .into_response(),
        "setPlayerCmd:next" => {
            state.next_calls += 1;
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return (StatusCode::INTERNAL_SERVER_ERROR, "busy").into_response();
            }
            (StatusCode::OK, "OK").into_response()
        }
        _ => (StatusCode::OK, "unknown command").into_response(),
    }
}

async fn handle_description() -> Response {
    (
        [(header::CONTENT_TYPE, "text/xml")],
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>WiiM Pro</friendlyName>
    <manufacturer>Linkplay Technology Inc.</manufacturer>
  </device>
</root>"#,
    )
        .into_response()
}

async fn handle_albumart(
    State(state): State<Arc<RwLock<MockWiimState>>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.write().await;
    state.art_requests += 1;

    let artist = params.get("artist").cloned().unwrap_or_default();
    let track = params.get("track").cloned().unwrap_or_default();
    if state.covers.contains(&(artist, track)) {
        png_response([200, 30, 30])
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn handle_nowplaying_jpg(State(state): State<Arc<RwLock<MockWiimState>>>) -> Response {
    let mut state = state.write().await;
    state.art_requests += 1;

    if state.serve_nowplaying_jpg {
        png_response([30, 200, 30])
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn handle_cover(State(state): State<Arc<RwLock<MockWiimState>>>) -> Response {
    state.write().await.art_requests += 1;
    png_response([30, 30, 200])
}
