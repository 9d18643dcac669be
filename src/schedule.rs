use std::time::Duration;

use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use crossbeam_channel::Receiver;

use crate::accessory::AccessoryCatalog;
use crate::behavior::{BehaviorEngine, Notification, RandomSource, SimulationState};
use crate::config::BehaviorConfig;
use crate::display::{capture_display_bounds, DisplayBounds, DisplaySurface, HeadlessDisplay};
use crate::protocol::Command;

pub struct BehaviorPlugin;

impl Plugin for BehaviorPlugin {
    fn build(&self, app: &mut App) {
        let interval = app
            .world()
            .get_resource::<BehaviorConfig>()
            .map(BehaviorConfig::tick_interval)
            .unwrap_or_else(|| BehaviorConfig::default().tick_interval());

        app.add_event::<Notification>()
            .insert_resource(TickSchedule::new(interval))
            .init_resource::<PublishedState>()
            .add_systems(
                Update,
                (capture_display_bounds, init_engine, run_behavior_tick).chain(),
            )
            .add_systems(PostUpdate, trace_published_state)
            .add_systems(Last, cancel_tick_on_exit);
    }
}

/// Handle to the pending one-shot tick. Each firing re-arms it from zero, so
/// lateness under load accumulates instead of being caught up.
#[derive(Resource)]
pub struct TickSchedule {
    pending: Option<Timer>,
}

impl TickSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            pending: Some(Timer::new(interval, TimerMode::Once)),
        }
    }

    #[cfg(test)]
    pub fn is_live(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            info!("[Gopher] Behavior tick cancelled");
        }
    }

    /// Advance the pending timer; true when it fired this call.
    pub fn poll(&mut self, delta: Duration) -> bool {
        let Some(timer) = self.pending.as_mut() else {
            return false;
        };
        timer.tick(delta);
        if timer.finished() {
            timer.reset();
            true
        } else {
            false
        }
    }
}

#[derive(Resource)]
pub struct Mascot(pub BehaviorEngine);

#[derive(Resource)]
pub struct MascotRng(pub Box<dyn RandomSource + Send + Sync>);

/// Consumer end of the command queue filled by the channel thread.
#[derive(Resource)]
pub struct CommandInbox(pub Receiver<Command>);

/// Last state the engine published. Overwritten every tick; readers get a copy.
#[derive(Resource, Default)]
pub struct PublishedState {
    latest: Option<SimulationState>,
    version: u64,
}

impl PublishedState {
    pub fn publish(&mut self, state: SimulationState) {
        self.latest = Some(state);
        self.version = self.version.wrapping_add(1);
    }

    pub fn latest(&self) -> Option<&SimulationState> {
        self.latest.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

fn init_engine(
    mut commands: Commands,
    mascot: Option<Res<Mascot>>,
    bounds: Option<Res<DisplayBounds>>,
    config: Res<BehaviorConfig>,
    mut rng: ResMut<MascotRng>,
    mut published: ResMut<PublishedState>,
) {
    if mascot.is_some() {
        return;
    }
    let Some(bounds) = bounds else {
        return;
    };
    let engine = BehaviorEngine::new(*bounds, config.clone(), &mut rng.0);
    info!(
        "[Gopher] Mascot ready at ({}, {}), walk speed {:.2}",
        engine.state().x,
        engine.state().y,
        engine.state().walk_speed
    );
    published.publish(engine.state().clone());
    commands.insert_resource(Mascot(engine));
}

#[allow(clippy::too_many_arguments)]
fn run_behavior_tick(
    time: Res<Time>,
    mut schedule: ResMut<TickSchedule>,
    mascot: Option<ResMut<Mascot>>,
    mut inbox: ResMut<CommandInbox>,
    mut rng: ResMut<MascotRng>,
    catalog: Res<AccessoryCatalog>,
    mut notifications: EventWriter<Notification>,
    mut published: ResMut<PublishedState>,
    bounds: Option<Res<DisplayBounds>>,
    mut windows: Query<&mut Window, With<PrimaryWindow>>,
    headless_display: Option<ResMut<HeadlessDisplay>>,
) {
    let Some(mut mascot) = mascot else {
        return;
    };
    if !schedule.poll(time.delta()) {
        return;
    }

    let outcome = mascot
        .0
        .tick(time.elapsed(), &mut inbox.0, &mut rng.0, &catalog);
    if outcome.suppressed {
        return;
    }
    notifications.send_batch(outcome.notifications);

    if let Some(logical) = outcome.position {
        let pos = bounds.map_or(logical, |b| b.to_physical(logical));
        if let Ok(mut window) = windows.get_single_mut() {
            window.set_position(pos.x, pos.y);
        } else if let Some(mut display) = headless_display {
            display.set_position(pos.x, pos.y);
        }
    }
    published.publish(mascot.0.state().clone());
}

fn trace_published_state(published: Res<PublishedState>) {
    if !published.is_changed() {
        return;
    }
    if let Some(state) = published.latest() {
        trace!(
            version = published.version(),
            x = state.x,
            y = state.y,
            "mascot state published"
        );
    }
}

fn cancel_tick_on_exit(mut exits: EventReader<AppExit>, mut schedule: ResMut<TickSchedule>) {
    if exits.read().next().is_some() {
        schedule.cancel();
    }
}

impl<R: RandomSource + ?Sized> RandomSource for Box<R> {
    fn next_f64(&mut self) -> f64 {
        (**self).next_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::{Accessory, LayoutFrame};
    use crate::behavior::ScriptedRandom;

    #[derive(Resource, Default)]
    struct Collected(Vec<Notification>);

    fn collect(mut reader: EventReader<Notification>, mut collected: ResMut<Collected>) {
        collected.0.extend(reader.read().cloned());
    }

    fn catalog() -> AccessoryCatalog {
        let frame = LayoutFrame {
            offset_x: 0.0,
            offset_y: 0.0,
            rotation_degrees: 0.0,
        };
        AccessoryCatalog::new(vec![
            Accessory {
                name: "cap".into(),
                image_ref: "cap.png".into(),
                layout: vec![frame],
            },
            Accessory {
                name: "bow".into(),
                image_ref: "bow.png".into(),
                layout: vec![frame],
            },
        ])
    }

    fn setup_tick_app(receiver: Receiver<Command>) -> App {
        let mut app = App::new();
        app.insert_resource(Time::<()>::default())
            .insert_resource(BehaviorConfig::default())
            .insert_resource(DisplayBounds::default())
            .insert_resource(MascotRng(Box::new(ScriptedRandom::new(&[0.5]))))
            .insert_resource(CommandInbox(receiver))
            .insert_resource(catalog())
            .insert_resource(HeadlessDisplay::default())
            .insert_resource(TickSchedule::new(Duration::from_millis(33)))
            .init_resource::<PublishedState>()
            .init_resource::<Collected>()
            .add_event::<Notification>()
            .add_systems(Update, (init_engine, run_behavior_tick, collect).chain());
        app
    }

    fn advance(app: &mut App, ms: u64) {
        app.world_mut()
            .resource_mut::<Time>()
            .advance_by(Duration::from_millis(ms));
        app.update();
    }

    #[test]
    fn one_shot_drops_overshoot() {
        let mut schedule = TickSchedule::new(Duration::from_millis(33));
        assert!(!schedule.poll(Duration::from_millis(20)));
        assert!(schedule.poll(Duration::from_millis(30)));
        // 17ms of lateness is not carried into the next period
        assert!(!schedule.poll(Duration::from_millis(20)));
        assert!(schedule.poll(Duration::from_millis(13)));
    }

    #[test]
    fn cancelled_schedule_never_fires() {
        let mut schedule = TickSchedule::new(Duration::from_millis(33));
        schedule.cancel();
        assert!(!schedule.is_live());
        assert!(!schedule.poll(Duration::from_secs(10)));
    }

    #[test]
    fn each_tick_drains_one_queued_command() {
        let (sender, receiver) = crossbeam_channel::unbounded::<Command>();
        let mut app = setup_tick_app(receiver);
        for index in [1, 2, 0] {
            sender
                .send(Command::SetAccessory { index })
                .expect("queue command");
        }

        advance(&mut app, 10);
        assert_eq!(sender.len(), 3);
        assert!(app.world().resource::<Collected>().0.is_empty());

        advance(&mut app, 23);
        assert_eq!(sender.len(), 2);
        advance(&mut app, 33);
        assert_eq!(sender.len(), 1);
        advance(&mut app, 33);
        assert_eq!(sender.len(), 0);

        let cat = catalog();
        assert_eq!(
            app.world().resource::<Collected>().0,
            vec![
                Notification::Accessory(cat.resolve(1)),
                Notification::Accessory(cat.resolve(2)),
                Notification::Accessory(None),
            ]
        );
    }

    #[test]
    fn tick_pushes_position_and_publishes_state() {
        let (_sender, receiver) = crossbeam_channel::unbounded::<Command>();
        let mut app = setup_tick_app(receiver);
        advance(&mut app, 0);
        let initial = app.world().resource::<PublishedState>().version();
        assert_eq!(initial, 1);

        advance(&mut app, 33);
        let display = app.world().resource::<HeadlessDisplay>();
        assert_eq!(display.position, Some(IVec2::new(4, 880)));
        let published = app.world().resource::<PublishedState>();
        assert_eq!(published.version(), 2);
        assert_eq!(published.latest().map(|s| s.x), Some(4.0));
    }

    #[test]
    fn pushed_position_is_scaled_to_physical_pixels() {
        let (_sender, receiver) = crossbeam_channel::unbounded::<Command>();
        let mut app = setup_tick_app(receiver);
        app.insert_resource(DisplayBounds {
            scale_factor: 2.0,
            ..default()
        });
        advance(&mut app, 0);
        advance(&mut app, 33);
        let display = app.world().resource::<HeadlessDisplay>();
        assert_eq!(display.position, Some(IVec2::new(8, 1760)));
        let published = app.world().resource::<PublishedState>();
        assert_eq!(published.latest().map(|s| s.y), Some(880.0));
    }

    #[test]
    fn exit_cancels_pending_tick() {
        let (_sender, receiver) = crossbeam_channel::unbounded::<Command>();
        let mut app = setup_tick_app(receiver);
        app.add_systems(Last, cancel_tick_on_exit);
        app.world_mut().send_event(AppExit::Success);
        app.update();
        assert!(!app.world().resource::<TickSchedule>().is_live());

        advance(&mut app, 100);
        assert_eq!(app.world().resource::<HeadlessDisplay>().pushes, 0);
    }
}
