use std::path::PathBuf;
use std::time::Duration;

use bevy::prelude::*;
use serde::Deserialize;

use crate::display::DisplayBounds;

/// Tuning knobs for the behavior engine. Defaults are the hand-tuned values
/// the mascot has always shipped with.
#[derive(Resource, Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehaviorConfig {
    pub tick_ms: u64,
    pub message_ms: u64,
    pub jump_frames: u32,
    pub jump_height: f32,
    pub floor_offset: f32,
    pub sprite_width: f32,
    pub jump_chance: f64,
    pub reverse_chance: f64,
    pub accessory_chance: f64,
    pub walk_speed: f32,
    pub walk_speed_spread: f32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 33,
            message_ms: 2000,
            jump_frames: 60,
            jump_height: 120.0,
            floor_offset: 200.0,
            sprite_width: 200.0,
            jump_chance: 0.007,
            reverse_chance: 0.002,
            accessory_chance: 0.0003,
            walk_speed: 4.0,
            walk_speed_spread: 1.5,
        }
    }
}

impl BehaviorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn message_window(&self) -> Duration {
        Duration::from_millis(self.message_ms)
    }

    /// Initial walk speed for a fresh mascot given one uniform sample in [0, 1).
    pub fn initial_walk_speed(&self, sample: f64) -> f32 {
        let speed = self.walk_speed + (sample as f32 - 0.5) * self.walk_speed_spread;
        speed.max(f32::EPSILON)
    }
}

/// File names of the mascot sprites, relative to the assets dir.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpriteFiles {
    pub walk: Vec<String>,
    pub idle: String,
    pub message: String,
}

impl Default for SpriteFiles {
    fn default() -> Self {
        Self {
            walk: vec![
                "out01.png".to_string(),
                "out02.png".to_string(),
                "out03.png".to_string(),
            ],
            idle: "out01.png".to_string(),
            message: "message.png".to_string(),
        }
    }
}

#[derive(Deserialize, Default)]
pub struct StartupConfig {
    pub assets_dir: Option<String>,
    pub accessories: Option<String>,
    pub socket_dir: Option<String>,
    pub sprite_size: Option<f32>,
    pub bounds: Option<DisplayBounds>,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub sprites: SpriteFiles,
}

/// Fully resolved settings after env overrides have been applied.
#[derive(Resource, Clone, Debug)]
pub struct MascotSettings {
    pub assets_dir: PathBuf,
    pub accessories_path: PathBuf,
    pub socket_dir: PathBuf,
    pub sprite_size: f32,
    pub bounds_override: Option<DisplayBounds>,
    pub sprites: SpriteFiles,
}

const DEFAULT_ACCESSORIES: &str = "accessories.json";

pub fn load_startup_config() -> StartupConfig {
    let path = env_override("GOPHER_CONFIG").unwrap_or_else(|| "gopher.json".to_string());
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<StartupConfig>(&contents) {
            Ok(cfg) => {
                println!("[Gopher] Loaded startup config from {}", path);
                cfg
            }
            Err(e) => {
                eprintln!("[Gopher] Failed to parse {}: {}", path, e);
                StartupConfig::default()
            }
        },
        Err(_) => StartupConfig::default(),
    }
}

impl StartupConfig {
    /// Split into the behavior tuning and the resolved settings. Env vars
    /// override values from the file.
    pub fn resolve(self) -> (BehaviorConfig, MascotSettings) {
        let assets_dir = env_override("GOPHER_ASSETS_DIR")
            .or(self.assets_dir)
            .unwrap_or_else(|| "assets".to_string());
        let accessories = env_override("GOPHER_ACCESSORIES")
            .or(self.accessories)
            .unwrap_or_else(|| DEFAULT_ACCESSORIES.to_string());
        let socket_dir = env_override("GOPHER_SOCKET_DIR")
            .or(self.socket_dir)
            .map(PathBuf::from)
            .unwrap_or_else(crate::endpoint::default_namespace_dir);

        let assets_dir = PathBuf::from(assets_dir);
        let accessories_path = assets_dir.join(accessories);
        let settings = MascotSettings {
            assets_dir,
            accessories_path,
            socket_dir,
            sprite_size: self.sprite_size.unwrap_or(self.behavior.sprite_width),
            bounds_override: self.bounds,
            sprites: self.sprites,
        };
        (self.behavior, settings)
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}
