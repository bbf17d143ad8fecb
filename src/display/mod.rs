//! Presentation and backlight collaborators
//!
//! The poll loop and gesture handling only talk to these traits. The shipped
//! implementation is [`HeadlessDisplay`], which renders the artwork to a PNG
//! for the screen process and drives the backlight.

pub mod backlight;
pub mod headless;

pub use backlight::{Backlight, NullBacklight, SysfsBacklight};
pub use headless::HeadlessDisplay;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::device::PlaybackRecord;

/// Resolved artwork handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artwork {
    /// Encoded image bytes (JPEG, PNG, ...) as served by the device
    Image(Vec<u8>),
    /// Nothing was found; render a black square
    Placeholder,
}

impl Artwork {
    pub fn from_lookup(image: Option<Vec<u8>>) -> Self {
        match image {
            Some(bytes) if !bytes.is_empty() => Artwork::Image(bytes),
            _ => Artwork::Placeholder,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Artwork::Placeholder)
    }
}

/// Text fields shown next to the artwork
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackText {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl TrackText {
    pub fn from_record(record: &PlaybackRecord) -> Self {
        Self {
            title: record.title.clone().unwrap_or_default(),
            artist: record.artist.clone().unwrap_or_default(),
            album: record.album.clone().unwrap_or_default(),
        }
    }

    /// "artist • album", leaving out an artist that just repeats the title
    pub fn detail_line(&self) -> String {
        let artist = (!self.artist.is_empty() && self.artist != self.title)
            .then_some(self.artist.as_str());
        let album = (!self.album.is_empty()).then_some(self.album.as_str());

        [artist, album]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" • ")
    }
}

#[async_trait]
pub trait Presentation: Send + Sync {
    /// Replace the artwork and text, then show the album
    async fn update(&self, artwork: Artwork, text: TrackText);

    /// Show the detail view, auto-hiding after `timeout` if given
    async fn show_details(&self, timeout: Option<Duration>);

    async fn hide_album(&self);

    async fn is_showing(&self) -> bool;
}
