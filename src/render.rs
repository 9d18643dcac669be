//! Render surface: turns engine notifications into what the mascot window shows.
//!
//! The surface keeps its own copy of the visible state (`RenderView`), fed only
//! by `Notification` events, and derives every frame from it plus the clock.
//! Nothing here feeds back into the behavior engine.

use std::f32::consts::PI;
use std::time::Duration;

use bevy::prelude::*;
use bevy::text::TextBounds;

use crate::accessory::{AccessoryCatalog, AccessoryId};
use crate::behavior::Notification;
use crate::components::{AccessoryOverlay, MascotSprite, MessageBubble, MessageText};
use crate::config::MascotSettings;
use crate::sprites::{init_sprites, MascotSprites};

/// Time each walk frame stays on screen.
const WALK_FRAME_MS: u128 = 100;
/// Peak height of the walking bob, in pixels.
const BOB_PX: f32 = 4.0;
const MESSAGE_FONT_SIZE: f32 = 16.0;

pub struct RenderPlugin;

impl Plugin for RenderPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RenderView>()
            .add_systems(Startup, spawn_scene.after(init_sprites))
            .add_systems(Update, (apply_notifications, draw_frame).chain());
    }
}

#[derive(Resource, Clone, Debug, PartialEq)]
pub struct RenderView {
    pub flipped: bool,
    pub walking: bool,
    pub message: Option<String>,
    pub accessory: Option<AccessoryId>,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            flipped: false,
            walking: true,
            message: None,
            accessory: None,
        }
    }
}

impl RenderView {
    pub fn apply(&mut self, notification: &Notification) {
        match notification {
            Notification::Flipped(flipped) => self.flipped = *flipped,
            Notification::Walking(walking) => self.walking = *walking,
            Notification::Message(message) => self.message = message.clone(),
            Notification::Accessory(accessory) => self.accessory = *accessory,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpriteChoice {
    Walk(usize),
    Idle,
}

/// Accessory transform relative to the mascot sprite, in image pixels (y down).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccessoryPlacement {
    pub id: AccessoryId,
    pub offset: Vec2,
    pub rotation_degrees: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FramePlan {
    Mascot {
        sprite: SpriteChoice,
        flip_x: bool,
        bob: f32,
        accessory: Option<AccessoryPlacement>,
    },
    /// The bubble replaces the whole scene while a message is up.
    Message { text: String },
}

pub fn plan_frame(
    view: &RenderView,
    elapsed: Duration,
    walk_frames: usize,
    catalog: &AccessoryCatalog,
) -> FramePlan {
    if let Some(text) = &view.message {
        return FramePlan::Message { text: text.clone() };
    }

    let (sprite, layout_frame, bob) = if view.walking && walk_frames > 0 {
        let ms = elapsed.as_millis();
        let frame = ((ms / WALK_FRAME_MS) % walk_frames as u128) as usize;
        let cycle_ms = (WALK_FRAME_MS * walk_frames as u128) as f32;
        let phase = (ms % cycle_ms as u128) as f32 / cycle_ms;
        (SpriteChoice::Walk(frame), frame, (phase * PI).sin().abs() * BOB_PX)
    } else {
        (SpriteChoice::Idle, 0, 0.0)
    };

    let accessory = view.accessory.and_then(|id| {
        let layout = catalog.get(id)?.frame(layout_frame);
        let mirror = if view.flipped { -1.0 } else { 1.0 };
        Some(AccessoryPlacement {
            id,
            offset: Vec2::new(layout.offset_x * mirror, layout.offset_y),
            rotation_degrees: layout.rotation_degrees * mirror,
        })
    });

    FramePlan::Mascot {
        sprite,
        flip_x: view.flipped,
        bob,
        accessory,
    }
}

fn spawn_scene(mut commands: Commands, sprites: Res<MascotSprites>, settings: Res<MascotSettings>) {
    let size = Vec2::splat(settings.sprite_size);
    commands.spawn(Camera2d);
    commands.spawn((
        MascotSprite,
        Sprite {
            image: sprites.idle.clone(),
            custom_size: Some(size),
            ..default()
        },
        Transform::default(),
    ));
    commands.spawn((
        AccessoryOverlay,
        Sprite::default(),
        Transform::from_xyz(0.0, 0.0, 1.0),
        Visibility::Hidden,
    ));
    commands
        .spawn((
            MessageBubble,
            Sprite {
                image: sprites.message.clone(),
                custom_size: Some(size),
                ..default()
            },
            Transform::from_xyz(0.0, 0.0, 2.0),
            Visibility::Hidden,
        ))
        .with_children(|bubble| {
            bubble.spawn((
                MessageText,
                Text2d::new(""),
                TextFont {
                    font_size: MESSAGE_FONT_SIZE,
                    ..default()
                },
                TextColor(Color::BLACK),
                TextBounds::new_horizontal(size.x * 0.8),
                Transform::from_xyz(0.0, size.y * 0.1, 1.0),
            ));
        });
}

fn apply_notifications(mut events: EventReader<Notification>, mut view: ResMut<RenderView>) {
    for notification in events.read() {
        view.apply(notification);
    }
}

type MascotQuery<'w, 's> = Query<
    'w,
    's,
    (&'static mut Sprite, &'static mut Transform, &'static mut Visibility),
    (With<MascotSprite>, Without<AccessoryOverlay>, Without<MessageBubble>),
>;

type OverlayQuery<'w, 's> = Query<
    'w,
    's,
    (&'static mut Sprite, &'static mut Transform, &'static mut Visibility),
    (With<AccessoryOverlay>, Without<MascotSprite>, Without<MessageBubble>),
>;

type BubbleQuery<'w, 's> = Query<
    'w,
    's,
    &'static mut Visibility,
    (With<MessageBubble>, Without<MascotSprite>, Without<AccessoryOverlay>),
>;

fn draw_frame(
    time: Res<Time>,
    view: Res<RenderView>,
    sprites: Res<MascotSprites>,
    catalog: Res<AccessoryCatalog>,
    mut mascot: MascotQuery,
    mut overlay: OverlayQuery,
    mut bubble: BubbleQuery,
    mut text: Query<&mut Text2d, With<MessageText>>,
) {
    let (Ok((mut body, mut body_tf, mut body_vis)), Ok((mut acc, mut acc_tf, mut acc_vis))) =
        (mascot.get_single_mut(), overlay.get_single_mut())
    else {
        return;
    };
    let Ok(mut bubble_vis) = bubble.get_single_mut() else {
        return;
    };

    match plan_frame(&view, time.elapsed(), sprites.walk.len(), &catalog) {
        FramePlan::Message { text: message } => {
            *body_vis = Visibility::Hidden;
            *acc_vis = Visibility::Hidden;
            *bubble_vis = Visibility::Visible;
            if let Ok(mut text) = text.get_single_mut() {
                if text.0 != message {
                    text.0 = message;
                }
            }
        }
        FramePlan::Mascot {
            sprite,
            flip_x,
            bob,
            accessory,
        } => {
            *bubble_vis = Visibility::Hidden;
            *body_vis = Visibility::Visible;
            let image = match sprite {
                SpriteChoice::Walk(frame) => sprites.walk_frame(frame),
                SpriteChoice::Idle => sprites.idle.clone(),
            };
            if body.image != image {
                body.image = image;
            }
            body.flip_x = flip_x;
            body_tf.translation.y = bob;

            let handle = accessory.and_then(|p| sprites.accessory(p.id).map(|h| (p, h)));
            match handle {
                Some((placement, image)) => {
                    *acc_vis = Visibility::Visible;
                    if acc.image != *image {
                        acc.image = image.clone();
                    }
                    acc.flip_x = flip_x;
                    acc_tf.translation.x = placement.offset.x;
                    acc_tf.translation.y = bob - placement.offset.y;
                    acc_tf.rotation =
                        Quat::from_rotation_z(-placement.rotation_degrees.to_radians());
                }
                None => *acc_vis = Visibility::Hidden,
            }
        }
    }
}
