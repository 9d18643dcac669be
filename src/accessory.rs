use std::path::Path;

use bevy::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use crate::config::MascotSettings;

pub const CATALOG_VERSION: u32 = 1;

/// Loads the accessory catalog before anything that needs it starts.
pub struct AccessoryPlugin;

impl Plugin for AccessoryPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<AccessoryCatalog>()
            .add_systems(PreStartup, load_catalog);
    }
}

fn load_catalog(mut commands: Commands, settings: Res<MascotSettings>) {
    commands.insert_resource(AccessoryCatalog::load_or_empty(&settings.accessories_path));
}

/// 1-based position in the catalog. Index 0 on the wire means "no accessory",
/// so it never has an `AccessoryId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessoryId(u32);

impl AccessoryId {
    pub fn index(self) -> u32 {
        self.0
    }

    fn slot(self) -> usize {
        self.0 as usize - 1
    }
}

/// Overlay transform for one animation frame, in sprite pixels.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct LayoutFrame {
    #[serde(rename = "x")]
    pub offset_x: f32,
    #[serde(rename = "y")]
    pub offset_y: f32,
    #[serde(rename = "rotation", default)]
    pub rotation_degrees: f32,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Accessory {
    pub name: String,
    #[serde(rename = "image")]
    pub image_ref: String,
    pub layout: Vec<LayoutFrame>,
}

impl Accessory {
    /// Layout for an animation frame; wraps when the table is shorter than
    /// the animation.
    pub fn frame(&self, frame: usize) -> LayoutFrame {
        self.layout[frame % self.layout.len()]
    }

    fn problem(&self) -> Option<&'static str> {
        if self.name.trim().is_empty() {
            return Some("empty name");
        }
        if self.image_ref.trim().is_empty() {
            return Some("empty image reference");
        }
        if self.layout.is_empty() {
            return Some("empty layout");
        }
        let finite = self.layout.iter().all(|f| {
            f.offset_x.is_finite() && f.offset_y.is_finite() && f.rotation_degrees.is_finite()
        });
        if !finite {
            return Some("non-finite layout value");
        }
        None
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    version: u32,
    #[serde(default)]
    accessories: Vec<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported catalog version {0}")]
    Version(u32),
}

/// Immutable list of accessories, shared by the engine (index bounds) and
/// the render surface (overlay transforms).
#[derive(Resource, Clone, Debug, Default, PartialEq)]
pub struct AccessoryCatalog {
    entries: Vec<Accessory>,
}

impl AccessoryCatalog {
    pub fn new(entries: Vec<Accessory>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AccessoryId, &Accessory)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, a)| (AccessoryId(i as u32 + 1), a))
    }

    /// Map a wire index to an accessory. Zero, negative and out-of-range
    /// indices all mean "no accessory".
    pub fn resolve(&self, index: i64) -> Option<AccessoryId> {
        if index >= 1 && (index as u64) <= self.entries.len() as u64 {
            Some(AccessoryId(index as u32))
        } else {
            None
        }
    }

    pub fn get(&self, id: AccessoryId) -> Option<&Accessory> {
        self.entries.get(id.slot())
    }

    pub fn parse(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        if file.version != CATALOG_VERSION {
            return Err(CatalogError::Version(file.version));
        }
        let mut entries = Vec::with_capacity(file.accessories.len());
        for (i, raw) in file.accessories.into_iter().enumerate() {
            match serde_json::from_value::<Accessory>(raw) {
                Ok(accessory) => match accessory.problem() {
                    None => entries.push(accessory),
                    Some(problem) => {
                        warn!("[Gopher accessories] Skipping entry {}: {}", i, problem)
                    }
                },
                Err(e) => warn!("[Gopher accessories] Skipping entry {}: {}", i, e),
            }
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load the catalog or fall back to an empty one. The mascot runs either way.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(catalog) => {
                info!(
                    "[Gopher accessories] Loaded {} accessories from {}",
                    catalog.len(),
                    path.display()
                );
                catalog
            }
            Err(e) => {
                warn!(
                    "[Gopher accessories] {}: {}; continuing without accessories",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}
