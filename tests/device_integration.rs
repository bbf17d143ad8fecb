//! Device client and discovery integration tests
//!
//! Runs the reqwest client, prober and discovery against a mock WiiM device
//! on localhost.

mod mock_servers;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use mock_servers::MockWiimDevice;
use now_playing_screen::config::DeviceConfig;
use now_playing_screen::device::{
    CandidateProber, DeviceApi, Discovery, Endpoint, EndpointCache, LocationSource,
    PlaybackState, Scheme, WiimClient,
};

fn client() -> Arc<WiimClient> {
    Arc::new(WiimClient::new(&DeviceConfig::default()).unwrap())
}

fn endpoint_of(device: &MockWiimDevice) -> Endpoint {
    Endpoint::parse(&device.base_url()).unwrap()
}

/// Address on localhost that nothing listens on
async fn dead_endpoint() -> Endpoint {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Endpoint::new(Scheme::Http, "127.0.0.1", port)
}

struct FixedLocations(Vec<String>);

#[async_trait]
impl LocationSource for FixedLocations {
    async fn discover_locations(&self, _timeout: Duration) -> Vec<String> {
        self.0.clone()
    }
}

#[tokio::test]
async fn test_now_playing_merges_both_commands() {
    let device = MockWiimDevice::start().await;
    device
        .play("Massive Attack", "Unfinished Sympathy", "Blue Lines")
        .await;
    device
        .set_album_art_uri(&format!("{}/cover.png", device.base_url()))
        .await;

    let record = client().now_playing(&endpoint_of(&device)).await;

    assert_eq!(record.artist.as_deref(), Some("Massive Attack"));
    assert_eq!(record.title.as_deref(), Some("Unfinished Sympathy"));
    assert_eq!(record.album.as_deref(), Some("Blue Lines"));
    assert_eq!(record.state, Some(PlaybackState::Playing));
    assert!(record.album_art_uri.is_some());

    device.stop().await;
}

#[tokio::test]
async fn test_now_playing_drops_relative_art_uri() {
    let device = MockWiimDevice::start().await;
    device.play("Low", "Lullaby", "").await;
    device.set_album_art_uri("/data/AlbumArt.jpg").await;

    let record = client().now_playing(&endpoint_of(&device)).await;

    assert!(record.album_art_uri.is_none());
    assert!(record.album.is_none(), "empty album is absent");

    device.stop().await;
}

#[tokio::test]
async fn test_unreachable_device_gives_empty_record() {
    let record = client().now_playing(&dead_endpoint().await).await;
    assert!(record.is_empty());
}

#[tokio::test]
async fn test_probe_requires_json() {
    let device = MockWiimDevice::start().await;
    let api = client();
    let endpoint = endpoint_of(&device);

    assert!(api.probe(&endpoint).await);

    device.set_not_an_api(true).await;
    assert!(!api.probe(&endpoint).await);

    device.stop().await;
}

#[tokio::test]
async fn test_prober_falls_back_to_plain_http() {
    let device = MockWiimDevice::start().await;
    let port = device.addr().port();
    let prober = CandidateProber::new(client());
    let mut cache = EndpointCache::new();

    // The guess says https, the device only speaks http on that port
    let guess = Endpoint::new(Scheme::Https, "127.0.0.1", port);
    let found = prober.validate(&guess, &mut cache).await;

    let expected = Endpoint::new(Scheme::Http, "127.0.0.1", port);
    assert_eq!(found, Some(expected.clone()));
    assert_eq!(cache.all(), &[expected]);

    device.stop().await;
}

#[tokio::test]
async fn test_fetch_image_checks_status_and_content_type() {
    let device = MockWiimDevice::start().await;
    let api = client();
    device.add_cover("Low", "Lullaby").await;

    let hit = api
        .fetch_image(&format!(
            "{}/albumart?artist=Low&track=Lullaby",
            device.base_url()
        ))
        .await;
    assert!(hit.is_some_and(|bytes| image::load_from_memory(&bytes).is_ok()));

    let miss = api
        .fetch_image(&format!("{}/albumart?artist=Low&track=Words", device.base_url()))
        .await;
    assert!(miss.is_none());

    // 200, but JSON
    let not_image = api
        .fetch_image(&format!(
            "{}/httpapi.asp?command=getPlayerStatus",
            device.base_url()
        ))
        .await;
    assert!(not_image.is_none());

    device.stop().await;
}

#[tokio::test]
async fn test_next_track() {
    let device = MockWiimDevice::start().await;
    let api = client();
    let endpoint = endpoint_of(&device);

    api.next_track(&endpoint).await.unwrap();
    assert_eq!(device.next_calls().await, 1);

    device.fail_next(1).await;
    assert!(api.next_track(&endpoint).await.is_err());

    device.stop().await;
}

#[tokio::test]
async fn test_discovery_validates_described_locations() {
    let device = MockWiimDevice::start().await;
    let api = client();
    let dead = dead_endpoint().await;

    let locations = Arc::new(FixedLocations(vec![
        format!("{}/description.xml", device.base_url()),
        format!("{}/description.xml", device.base_url()),
        format!("{}/description.xml", dead),
    ]));
    let discovery = Discovery::new(
        api.clone(),
        Some(locations),
        Duration::from_secs(1),
        None,
    );

    let mut cache = EndpointCache::new();
    let found = cache.warmup(&discovery).await;

    assert_eq!(found, vec![endpoint_of(&device)]);
    assert!(cache.is_warmed());

    // Second warmup reuses the cache
    device.set_not_an_api(true).await;
    assert_eq!(cache.warmup(&discovery).await, vec![endpoint_of(&device)]);

    device.stop().await;
}
