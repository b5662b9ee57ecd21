//! Card layout: the page elements floating over the backdrop.
//!
//! Cards are placed in logical pixels relative to the top of the page. Each
//! frame the host converts them to device pixels relative to the visible
//! canvas, which is what the solver's obstacle registry consumes.

use std::path::Path;

use flowfield::ObstacleRect;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CardLayout {
    pub cards: Vec<ObstacleRect>,
    /// Blank space below the last card, logical pixels.
    #[serde(default)]
    pub bottom_margin: f32,
}

impl CardLayout {
    /// Column of cards used when no layout file is configured.
    pub fn demo() -> Self {
        let cards = (0..6)
            .map(|i| {
                let column = (i % 2) as f32;
                ObstacleRect {
                    id: format!("card-{i}"),
                    left: 160.0 + column * 520.0,
                    top: 120.0 + (i / 2) as f32 * 420.0,
                    width: 420.0,
                    height: 260.0,
                }
            })
            .collect();
        Self {
            cards,
            bottom_margin: 120.0,
        }
    }

    /// Load a layout from JSON file
    pub fn load_json(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        let layout = serde_json::from_str(&json)?;
        Ok(layout)
    }

    /// Height of the page in logical pixels.
    pub fn page_height(&self) -> f32 {
        let bottom = self
            .cards
            .iter()
            .map(|c| c.top + c.height)
            .fold(0.0_f32, f32::max);
        bottom + self.bottom_margin
    }

    /// Largest scroll offset that keeps the page covering a viewport of
    /// `viewport_height` logical pixels.
    pub fn max_scroll(&self, viewport_height: f32) -> f32 {
        (self.page_height() - viewport_height).max(0.0)
    }

    /// Cards in device pixels relative to the canvas, given the window scale
    /// factor and the scroll offset (logical pixels).
    pub fn obstacles(&self, scale_factor: f32, scroll: f32) -> Vec<ObstacleRect> {
        self.cards
            .iter()
            .map(|c| ObstacleRect {
                id: c.id.clone(),
                left: c.left * scale_factor,
                top: (c.top - scroll) * scale_factor,
                width: c.width * scale_factor,
                height: c.height * scale_factor,
            })
            .collect()
    }
}

/// Vertical scroll position of the page.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Scroll {
    offset: f32,
}

impl Scroll {
    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Move by `delta` logical pixels, clamped to `[0, max]`.
    pub fn scroll_by(&mut self, delta: f32, max: f32) {
        self.offset = (self.offset + delta).clamp(0.0, max.max(0.0));
    }

    /// Re-clamp after the viewport changed.
    pub fn clamp(&mut self, max: f32) {
        self.scroll_by(0.0, max);
    }
}
