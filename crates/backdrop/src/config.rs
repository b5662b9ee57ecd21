//! Desktop host configuration.

use std::path::PathBuf;

use flowfield::SolverConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackdropConfig {
    pub title: String,
    /// Initial window size in logical pixels.
    pub window_width: u32,
    pub window_height: u32,
    /// Card layout file. Relative paths resolve against the working directory.
    pub layout_path: Option<PathBuf>,
    /// Logical pixels scrolled per wheel line or arrow key press.
    pub scroll_step: f32,
    /// Frames between field statistics log lines; 0 disables them.
    pub stats_interval: u64,
    pub solver: SolverConfig,
}

impl Default for BackdropConfig {
    fn default() -> Self {
        Self {
            title: "Fluid Backdrop".to_string(),
            window_width: 1280,
            window_height: 800,
            layout_path: Some(PathBuf::from("crates/backdrop/assets/layout.json")),
            scroll_step: 48.0,
            stats_interval: 0,
            solver: SolverConfig::default(),
        }
    }
}

impl BackdropConfig {
    /// Save configuration to JSON file
    pub fn save_json(&self, path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn load_json(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_solver_section_is_partial() {
        let config: BackdropConfig =
            serde_json::from_str(r#"{ "scroll_step": 10.0, "solver": { "pressure_iterations": 40 } }"#).unwrap();
        assert_eq!(config.scroll_step, 10.0);
        assert_eq!(config.solver.pressure_iterations, 40);
        assert_eq!(config.solver.viscosity, SolverConfig::default().viscosity);
        assert_eq!(config.title, BackdropConfig::default().title);
    }

    #[test]
    fn test_save_then_load_file() {
        let path = std::env::temp_dir().join(format!("backdrop_config_{}.json", std::process::id()));
        let mut config = BackdropConfig::default();
        config.stats_interval = 120;
        config.layout_path = None;
        config.save_json(&path).unwrap();

        let loaded = BackdropConfig::load_json(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
