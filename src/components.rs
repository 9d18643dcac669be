use bevy::prelude::*;

/// True when running without a window (`--headless`).
#[derive(Resource, Clone, Copy, Default)]
pub struct HeadlessMode(pub bool);

/// The gopher sprite itself
#[derive(Component)]
pub struct MascotSprite;

/// Accessory drawn on top of the gopher
#[derive(Component)]
pub struct AccessoryOverlay;

/// Speech bubble shown instead of the gopher while a message is active
#[derive(Component)]
pub struct MessageBubble;

/// Text inside the speech bubble
#[derive(Component)]
pub struct MessageText;
