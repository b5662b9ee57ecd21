//! Obstacle registry.
//!
//! The host reports the rectangles covering the canvas once per frame, in
//! device pixels. The registry keys them by their stable id, keeps the
//! previous position of each, and derives the per-frame velocity the
//! rasterizer injects into the fluid.

use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::field::GridSize;
use crate::params::ObstacleInstance;

/// A rectangle reported by the host, in device pixels relative to the canvas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleRect {
    pub id: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Tracked obstacle in normalized canvas coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Obstacle {
    pub position: Vec2,
    pub size: Vec2,
    pub previous: Vec2,
}

impl Obstacle {
    fn new(position: Vec2, size: Vec2) -> Self {
        // First sighting: no history, so no motion.
        Self {
            position,
            size,
            previous: position,
        }
    }

    /// Velocity in canvas lengths per second.
    ///
    /// Each axis is zeroed independently when its speed exceeds `max_speed`
    /// (layout reflow, first frame after a jump); both are zeroed when `dt` is 0.
    pub fn velocity(&self, dt: f32, max_speed: f32) -> Vec2 {
        if dt <= 0.0 {
            return Vec2::ZERO;
        }
        let raw = (self.position - self.previous) / dt;
        let clamp_axis = |v: f32| if v.is_finite() && v.abs() <= max_speed { v } else { 0.0 };
        Vec2::new(clamp_axis(raw.x), clamp_axis(raw.y))
    }
}

#[derive(Default)]
pub struct ObstacleRegistry {
    obstacles: BTreeMap<String, Obstacle>,
}

impl ObstacleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Obstacle> {
        self.obstacles.get(id)
    }

    pub fn clear(&mut self) {
        self.obstacles.clear();
    }

    /// Apply this frame's snapshot.
    ///
    /// New ids are inserted at rest, known ids shift their current position
    /// into `previous`, ids missing from the snapshot are removed.
    pub fn sync(&mut self, snapshot: &[ObstacleRect], canvas_width: u32, canvas_height: u32) {
        if canvas_width == 0 || canvas_height == 0 {
            self.obstacles.clear();
            return;
        }
        let canvas = Vec2::new(canvas_width as f32, canvas_height as f32);

        // An id listed twice in one snapshot takes its last rectangle.
        let latest: BTreeMap<&str, &ObstacleRect> =
            snapshot.iter().map(|rect| (rect.id.as_str(), rect)).collect();

        let before = self.obstacles.len();
        self.obstacles.retain(|id, _| latest.contains_key(id.as_str()));
        let removed = before - self.obstacles.len();

        let mut inserted = 0;
        for rect in latest.into_values() {
            let position = Vec2::new(rect.left, rect.top) / canvas;
            let size = Vec2::new(rect.width, rect.height) / canvas;
            match self.obstacles.get_mut(&rect.id) {
                Some(obstacle) => {
                    obstacle.previous = obstacle.position;
                    obstacle.position = position;
                    obstacle.size = size;
                }
                None => {
                    self.obstacles.insert(rect.id.clone(), Obstacle::new(position, size));
                    inserted += 1;
                }
            }
        }

        if inserted > 0 || removed > 0 {
            log::debug!(
                "obstacles: +{} -{} ({} tracked)",
                inserted,
                removed,
                self.obstacles.len()
            );
        }
    }

    /// Build the instance list for the rasterizer, velocity in texels/second.
    pub fn instances(&self, dt: f32, max_speed: f32, grid: GridSize) -> Vec<ObstacleInstance> {
        let texels = Vec2::new(grid.width as f32, grid.height as f32);
        self.obstacles
            .values()
            .map(|obstacle| {
                let velocity = obstacle.velocity(dt, max_speed) * texels;
                ObstacleInstance::new(
                    [obstacle.position.x, obstacle.position.y, obstacle.size.x, obstacle.size.y],
                    velocity.to_array(),
                )
            })
            .collect()
    }
}
