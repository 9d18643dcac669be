use bevy::prelude::*;

use crate::accessory::{AccessoryCatalog, AccessoryId};
use crate::config::MascotSettings;

pub struct SpritePlugin;

impl Plugin for SpritePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<MascotSprites>()
            .add_systems(Startup, init_sprites);
    }
}

/// Image handles for the mascot, its message bubble and every catalog accessory.
#[derive(Resource, Default)]
pub struct MascotSprites {
    pub walk: Vec<Handle<Image>>,
    pub idle: Handle<Image>,
    pub message: Handle<Image>,
    accessories: Vec<Handle<Image>>,
}

impl MascotSprites {
    pub fn walk_frame(&self, frame: usize) -> Handle<Image> {
        if self.walk.is_empty() {
            return self.idle.clone();
        }
        self.walk[frame % self.walk.len()].clone()
    }

    pub fn accessory(&self, id: AccessoryId) -> Option<&Handle<Image>> {
        self.accessories.get(id.index() as usize - 1)
    }
}

/// Catalog image references resolve against the assets dir like the sprites do.
pub fn init_sprites(
    asset_server: Res<AssetServer>,
    settings: Res<MascotSettings>,
    catalog: Res<AccessoryCatalog>,
    mut sprites: ResMut<MascotSprites>,
) {
    let files = &settings.sprites;
    sprites.walk = files
        .walk
        .iter()
        .map(|name| asset_server.load(name.clone()))
        .collect();
    sprites.idle = asset_server.load(files.idle.clone());
    sprites.message = asset_server.load(files.message.clone());
    sprites.accessories = catalog
        .iter()
        .map(|(_, accessory)| asset_server.load(accessory.image_ref.clone()))
        .collect();

    info!(
        "[Gopher sprites] {} walk frames, {} accessory images from {}",
        sprites.walk.len(),
        sprites.accessories.len(),
        settings.assets_dir.display()
    );
}
