//! Headless presentation
//!
//! Keeps the album/detail/hidden state, drives the backlight, and renders the
//! current artwork as a square PNG (plus a JSON sidecar with the text) for
//! the process that paints the screen.

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{Artwork, Backlight, Presentation, TrackText};
use crate::config::DisplayConfig;
use crate::error::StartupError;
use crate::timer::CancellableTimer;

#[derive(Debug, Default)]
struct ViewState {
    showing: bool,
    details_visible: bool,
    text: Option<TrackText>,
}

#[derive(Serialize)]
struct Sidecar<'a> {
    title: &'a str,
    artist: &'a str,
    album: &'a str,
    detail: String,
    placeholder: bool,
}

pub struct HeadlessDisplay {
    view: Arc<RwLock<ViewState>>,
    backlight: Arc<dyn Backlight>,
    auto_hide: CancellableTimer,
    output: Option<PathBuf>,
    size: u32,
    show_details: bool,
    details_timeout: Option<Duration>,
    show_artist_and_album: bool,
}

impl HeadlessDisplay {
    pub fn new(config: &DisplayConfig, backlight: Arc<dyn Backlight>) -> Result<Self, StartupError> {
        if let Some(output) = &config.output_path {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StartupError::DisplaySetup(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        if config.size == 0 {
            return Err(StartupError::DisplaySetup("display size must be > 0".into()));
        }

        Ok(Self {
            view: Arc::new(RwLock::new(ViewState::default())),
            backlight,
            auto_hide: CancellableTimer::new(),
            output: config.output_path.clone(),
            size: config.size,
            show_details: config.show_details,
            details_timeout: config.details_timeout(),
            show_artist_and_album: config.show_artist_and_album,
        })
    }

    pub async fn details_visible(&self) -> bool {
        self.view.read().await.details_visible
    }

    pub async fn current_text(&self) -> Option<TrackText> {
        self.view.read().await.text.clone()
    }

    async fn show(&self, details: bool, timeout: Option<Duration>) {
        {
            let mut view = self.view.write().await;
            view.showing = true;
            view.details_visible = details;
        }

        if details {
            if let Some(timeout) = timeout {
                let view = self.view.clone();
                self.auto_hide.arm(timeout, async move {
                    view.write().await.details_visible = false;
                    tracing::debug!("Detail view timed out");
                });
            }
        }

        self.backlight.set_power(true);
    }

    async fn write_output(&self, artwork: &Artwork, text: &TrackText) {
        let Some(output) = self.output.clone() else {
            return;
        };

        let sidecar = Sidecar {
            title: &text.title,
            artist: &text.artist,
            album: &text.album,
            detail: if self.show_artist_and_album {
                text.detail_line()
            } else {
                String::new()
            },
            placeholder: artwork.is_placeholder(),
        };
        let sidecar = match serde_json::to_vec_pretty(&sidecar) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to encode track text: {}", e);
                return;
            }
        };

        let artwork = artwork.clone();
        let size = self.size;
        let result = tokio::task::spawn_blocking(move || {
            let image = render_artwork(&artwork, size);
            write_atomic_png(&output, &image)?;
            std::fs::write(output.with_extension("json"), sidecar)?;
            anyhow::Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to write artwork output: {}", e),
            Err(e) => tracing::warn!("Artwork render task failed: {}", e),
        }
    }
}

#[async_trait]
impl Presentation for HeadlessDisplay {
    async fn update(&self, artwork: Artwork, text: TrackText) {
        tracing::info!(
            "Now showing: {} [{}]{}",
            text.title,
            text.detail_line(),
            if artwork.is_placeholder() { " (no artwork)" } else { "" }
        );

        self.write_output(&artwork, &text).await;
        self.view.write().await.text = Some(text);
        self.show(self.show_details, self.details_timeout).await;
    }

    async fn show_details(&self, timeout: Option<Duration>) {
        self.show(true, timeout).await;
    }

    async fn hide_album(&self) {
        self.auto_hide.cancel();
        {
            let mut view = self.view.write().await;
            view.showing = false;
            view.details_visible = false;
        }
        self.backlight.set_power(false);
        tracing::debug!("Album hidden");
    }

    async fn is_showing(&self) -> bool {
        self.view.read().await.showing
    }
}

/// Decode and square the artwork; undecodable images become the placeholder
pub fn render_artwork(artwork: &Artwork, size: u32) -> DynamicImage {
    match artwork {
        Artwork::Image(bytes) => match image::load_from_memory(bytes) {
            Ok(img) => img.resize_exact(size, size, FilterType::Lanczos3),
            Err(e) => {
                tracing::warn!("Artwork could not be decoded, using placeholder: {}", e);
                placeholder(size)
            }
        },
        Artwork::Placeholder => placeholder(size),
    }
}

fn placeholder(size: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::new(size, size))
}

/// Write to a temp file and rename so the screen never reads half a PNG
fn write_atomic_png(path: &Path, image: &DynamicImage) -> anyhow::Result<()> {
    let tmp = path.with_extension("png.tmp");
    image.save_with_format(&tmp, ImageFormat::Png)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
