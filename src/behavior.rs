//! Autonomous walk/jump state machine.
//!
//! The engine owns the only mutable [`SimulationState`]. Each call to
//! [`BehaviorEngine::tick`] advances it by one step and reports what changed
//! as [`Notification`]s plus the position to push to the display. Everything
//! random goes through a [`RandomSource`] so tests can script it.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::time::Duration;

use bevy::prelude::*;
use rand::rngs::SmallRng;
use rand::Rng as _;

use crate::accessory::{AccessoryCatalog, AccessoryId};
use crate::config::BehaviorConfig;
use crate::display::DisplayBounds;
use crate::protocol::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> f32 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpPhase {
    Grounded,
    Jumping,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimulationState {
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub jump_phase: JumpPhase,
    pub jump_frame_count: u32,
    pub walk_speed: f32,
    pub active_message: Option<String>,
    /// Time (since engine start) at which the active message stops suppressing movement.
    pub message_expiry: Option<Duration>,
    pub active_accessory: Option<AccessoryId>,
}

/// State changes pushed to the render surface.
#[derive(Event, Clone, Debug, PartialEq)]
pub enum Notification {
    Flipped(bool),
    Walking(bool),
    Message(Option<String>),
    Accessory(Option<AccessoryId>),
}

#[derive(Debug, Default, PartialEq)]
pub struct TickOutcome {
    pub notifications: Vec<Notification>,
    /// Window position for the display surface; `None` on suppressed ticks.
    pub position: Option<IVec2>,
    pub suppressed: bool,
}

/// Uniform samples in [0, 1).
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;
}

impl RandomSource for SmallRng {
    fn next_f64(&mut self) -> f64 {
        self.gen()
    }
}

/// Pending commands, drained one at a time.
pub trait CommandQueue {
    fn pop(&mut self) -> Option<Command>;
}

impl CommandQueue for VecDeque<Command> {
    fn pop(&mut self) -> Option<Command> {
        self.pop_front()
    }
}

impl CommandQueue for crossbeam_channel::Receiver<Command> {
    fn pop(&mut self) -> Option<Command> {
        self.try_recv().ok()
    }
}

/// Height above the floor at a given frame of a jump. Zero at both ends,
/// peaks at the midpoint.
pub fn jump_offset(frame: u32, jump_frames: u32, height: f32) -> f32 {
    let t = frame as f32 / jump_frames.max(1) as f32;
    (t * PI).sin() * height
}

pub struct BehaviorEngine {
    state: SimulationState,
    bounds: DisplayBounds,
    config: BehaviorConfig,
}

impl BehaviorEngine {
    pub fn new(bounds: DisplayBounds, config: BehaviorConfig, rng: &mut impl RandomSource) -> Self {
        let walk_speed = config.initial_walk_speed(rng.next_f64());
        let state = SimulationState {
            x: bounds.left(),
            y: bounds.bottom() - config.floor_offset,
            direction: Direction::Forward,
            jump_phase: JumpPhase::Grounded,
            jump_frame_count: 0,
            walk_speed,
            active_message: None,
            message_expiry: None,
            active_accessory: None,
        };
        Self {
            state,
            bounds,
            config,
        }
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    fn floor(&self) -> f32 {
        self.bounds.bottom() - self.config.floor_offset
    }

    fn right_wall(&self) -> f32 {
        (self.bounds.right() - self.config.sprite_width).max(self.bounds.left())
    }

    pub fn tick(
        &mut self,
        now: Duration,
        queue: &mut impl CommandQueue,
        rng: &mut impl RandomSource,
        catalog: &AccessoryCatalog,
    ) -> TickOutcome {
        let mut out = TickOutcome::default();

        if let Some(expiry) = self.state.message_expiry {
            if now < expiry {
                out.suppressed = true;
                return out;
            }
            self.state.message_expiry = None;
            self.state.active_message = None;
            out.notifications.push(Notification::Message(None));
        }

        let mut dx = self.state.walk_speed * self.state.direction.sign();

        match self.state.jump_phase {
            JumpPhase::Grounded => {
                if let Some(command) = queue.pop() {
                    self.apply(command, now, catalog, &mut out);
                } else if rng.next_f64() < self.config.jump_chance {
                    self.start_jump(&mut out);
                }
            }
            JumpPhase::Jumping => {
                self.state.jump_frame_count += 1;
                if self.state.jump_frame_count > self.config.jump_frames {
                    self.state.jump_phase = JumpPhase::Grounded;
                    self.state.y = self.floor();
                    out.notifications.push(Notification::Walking(true));
                } else {
                    dx /= 2.0;
                    self.state.y = self.floor()
                        - jump_offset(
                            self.state.jump_frame_count,
                            self.config.jump_frames,
                            self.config.jump_height,
                        );
                }
            }
        }

        self.state.x += dx;
        self.maybe_reverse(rng, &mut out);

        if !catalog.is_empty() && rng.next_f64() < self.config.accessory_chance {
            let slots = catalog.len() as f64 + 1.0;
            let pick = ((rng.next_f64() * slots).floor() as i64).min(catalog.len() as i64);
            let id = catalog.resolve(pick);
            self.state.active_accessory = id;
            out.notifications.push(Notification::Accessory(id));
        }

        out.position = Some(IVec2::new(self.state.x as i32, self.state.y as i32));
        out
    }

    fn maybe_reverse(&mut self, rng: &mut impl RandomSource, out: &mut TickOutcome) {
        let left = self.bounds.left();
        let right = self.right_wall();

        match self.state.direction {
            Direction::Forward => {
                if self.state.x >= right || self.roll_reverse(rng) {
                    self.state.x = self.state.x.clamp(left, right);
                    self.state.direction = Direction::Backward;
                    out.notifications.push(Notification::Flipped(true));
                }
            }
            Direction::Backward => {
                if self.state.x <= left || self.roll_reverse(rng) {
                    self.state.x = self.state.x.clamp(left, right);
                    self.state.direction = Direction::Forward;
                    out.notifications.push(Notification::Flipped(false));
                }
            }
        }
    }

    /// Small per-tick chance of turning around mid-screen. Never mid-air.
    fn roll_reverse(&self, rng: &mut impl RandomSource) -> bool {
        self.state.jump_phase == JumpPhase::Grounded
            && rng.next_f64() < self.config.reverse_chance
    }

    fn start_jump(&mut self, out: &mut TickOutcome) {
        self.state.jump_phase = JumpPhase::Jumping;
        self.state.jump_frame_count = 0;
        out.notifications.push(Notification::Walking(false));
    }

    fn apply(
        &mut self,
        command: Command,
        now: Duration,
        catalog: &AccessoryCatalog,
        out: &mut TickOutcome,
    ) {
        debug!(?command, "applying queued command");
        match command {
            Command::Jump => self.start_jump(out),
            Command::ShowMessage { text } => {
                self.state.message_expiry = Some(now + self.config.message_window());
                self.state.active_message = Some(text.clone());
                out.notifications.push(Notification::Message(Some(text)));
            }
            Command::SetAccessory { index } => {
                let id = catalog.resolve(index);
                self.state.active_accessory = id;
                out.notifications.push(Notification::Accessory(id));
            }
        }
    }
}

/// Replays a fixed list of samples, then keeps answering `fallback`.
#[cfg(test)]
pub(crate) struct ScriptedRandom {
    samples: VecDeque<f64>,
    fallback: f64,
    pub draws: usize,
}

#[cfg(test)]
impl ScriptedRandom {
    pub(crate) fn new(samples: &[f64]) -> Self {
        Self {
            samples: samples.iter().copied().collect(),
            fallback: 0.99,
            draws: 0,
        }
    }
}

#[cfg(test)]
impl RandomSource for ScriptedRandom {
    fn next_f64(&mut self) -> f64 {
        self.draws += 1;
        self.samples.pop_front().unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::{Accessory, LayoutFrame};
    use rand::SeedableRng;

    const TICK: Duration = Duration::from_millis(33);

    fn bounds() -> DisplayBounds {
        DisplayBounds {
            x: 0.0,
            y: 0.0,
            width: 1000.0,
            height: 800.0,
            scale_factor: 1.0,
        }
    }

    fn engine() -> BehaviorEngine {
        BehaviorEngine::new(bounds(), BehaviorConfig::default(), &mut ScriptedRandom::new(&[0.5]))
    }

    fn catalog(n: usize) -> AccessoryCatalog {
        AccessoryCatalog::new(
            (0..n)
                .map(|i| Accessory {
                    name: format!("acc{i}"),
                    image_ref: format!("acc{i}.png"),
                    layout: vec![LayoutFrame {
                        offset_x: 0.0,
                        offset_y: 0.0,
                        rotation_degrees: 0.0,
                    }],
                })
                .collect(),
        )
    }

    fn quiet() -> ScriptedRandom {
        ScriptedRandom::new(&[])
    }

    #[test]
    fn starts_on_the_floor_at_the_left_edge() {
        let engine = engine();
        let s = engine.state();
        assert_eq!(s.x, 0.0);
        assert_eq!(s.y, 600.0);
        assert_eq!(s.direction, Direction::Forward);
        assert_eq!(s.jump_phase, JumpPhase::Grounded);
        assert!((s.walk_speed - 4.0).abs() < 1e-6);
    }

    #[test]
    fn jump_parabola_is_symmetric() {
        for k in 0..=60 {
            let a = jump_offset(k, 60, 120.0);
            let b = jump_offset(60 - k, 60, 120.0);
            assert!((a - b).abs() < 1e-3, "frame {k}: {a} vs {b}");
        }
        assert!((jump_offset(30, 60, 120.0) - 120.0).abs() < 1e-4);
        assert_eq!(jump_offset(0, 60, 120.0), 0.0);
        assert!(jump_offset(60, 60, 120.0).abs() < 1e-3);
    }

    #[test]
    fn walks_forward_at_walk_speed() {
        let mut engine = engine();
        let mut queue = VecDeque::new();
        let out = engine.tick(TICK, &mut queue, &mut quiet(), &catalog(0));
        assert!(out.notifications.is_empty());
        assert_eq!(engine.state().x, 4.0);
        assert_eq!(out.position, Some(IVec2::new(4, 600)));
    }

    #[test]
    fn jump_command_runs_full_hop_and_lands() {
        let mut engine = engine();
        let mut queue = VecDeque::from([Command::Jump]);
        let cat = catalog(0);
        let out = engine.tick(TICK, &mut queue, &mut quiet(), &cat);
        assert_eq!(out.notifications, vec![Notification::Walking(false)]);
        assert_eq!(engine.state().jump_phase, JumpPhase::Jumping);
        assert_eq!(engine.state().y, 600.0);

        for k in 1..=60u32 {
            let x_before = engine.state().x;
            let out = engine.tick(TICK, &mut queue, &mut quiet(), &cat);
            assert!(out.notifications.is_empty(), "frame {k}");
            assert_eq!(engine.state().jump_frame_count, k);
            let expected = 600.0 - jump_offset(k, 60, 120.0);
            assert!((engine.state().y - expected).abs() < 1e-3);
            assert!((engine.state().x - x_before - 2.0).abs() < 1e-5);
        }

        let out = engine.tick(TICK, &mut queue, &mut quiet(), &cat);
        assert_eq!(out.notifications, vec![Notification::Walking(true)]);
        assert_eq!(engine.state().jump_phase, JumpPhase::Grounded);
        assert_eq!(engine.state().y, 600.0);
    }

    #[test]
    fn spontaneous_jump_uses_jump_chance() {
        let mut engine = engine();
        let mut rng = ScriptedRandom::new(&[0.0069]);
        let out = engine.tick(TICK, &mut VecDeque::new(), &mut rng, &catalog(0));
        assert_eq!(out.notifications, vec![Notification::Walking(false)]);

        let mut engine = self::engine();
        let mut rng = ScriptedRandom::new(&[0.007]);
        let out = engine.tick(TICK, &mut VecDeque::new(), &mut rng, &catalog(0));
        assert!(out.notifications.is_empty());
    }

    #[test]
    fn message_suppresses_everything_until_window_elapses() {
        let mut engine = engine();
        let cat = catalog(0);
        let mut queue = VecDeque::from([
            Command::ShowMessage {
                text: "hello".to_string(),
            },
            Command::Jump,
        ]);
        let posted = Duration::from_millis(1000);
        let out = engine.tick(posted, &mut queue, &mut quiet(), &cat);
        assert_eq!(
            out.notifications,
            vec![Notification::Message(Some("hello".to_string()))]
        );
        let frozen = engine.state().clone();

        let mut now = posted;
        while now + TICK < posted + Duration::from_millis(2000) {
            now += TICK;
            let mut rng = ScriptedRandom::new(&[0.0, 0.0, 0.0]);
            let out = engine.tick(now, &mut queue, &mut rng, &cat);
            assert!(out.suppressed);
            assert!(out.position.is_none());
            assert!(out.notifications.is_empty());
            assert_eq!(rng.draws, 0);
            assert_eq!(engine.state(), &frozen);
            assert_eq!(queue.len(), 1);
        }

        let out = engine.tick(posted + Duration::from_millis(2000), &mut queue, &mut quiet(), &cat);
        assert!(!out.suppressed);
        assert_eq!(
            out.notifications,
            vec![Notification::Message(None), Notification::Walking(false)]
        );
        assert!(engine.state().active_message.is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn drains_at_most_one_command_per_tick() {
        let mut engine = engine();
        let cat = catalog(3);
        let mut queue: VecDeque<Command> = (1..=3)
            .map(|index| Command::SetAccessory { index })
            .collect();
        for remaining in [2, 1, 0] {
            let out = engine.tick(TICK, &mut queue, &mut quiet(), &cat);
            assert_eq!(queue.len(), remaining);
            assert_eq!(out.notifications.len(), 1);
        }
        assert_eq!(engine.state().active_accessory, cat.resolve(3));
    }

    #[test]
    fn jumping_defers_queued_commands() {
        let mut engine = engine();
        let cat = catalog(0);
        let mut queue = VecDeque::from([Command::Jump, Command::Jump]);
        engine.tick(TICK, &mut queue, &mut quiet(), &cat);
        for _ in 0..60 {
            engine.tick(TICK, &mut queue, &mut quiet(), &cat);
            assert_eq!(queue.len(), 1);
        }
        engine.tick(TICK, &mut queue, &mut quiet(), &cat);
        assert_eq!(queue.len(), 1);
        engine.tick(TICK, &mut queue, &mut quiet(), &cat);
        assert!(queue.is_empty());
    }

    #[test]
    fn out_of_range_accessory_matches_none() {
        let cat = catalog(2);
        let mut a = engine();
        let mut b = engine();
        let out_a = a.tick(
            TICK,
            &mut VecDeque::from([Command::SetAccessory { index: 99 }]),
            &mut quiet(),
            &cat,
        );
        let out_b = b.tick(
            TICK,
            &mut VecDeque::from([Command::SetAccessory { index: 0 }]),
            &mut quiet(),
            &cat,
        );
        assert_eq!(out_a, out_b);
        assert_eq!(a.state(), b.state());
        assert_eq!(out_a.notifications, vec![Notification::Accessory(None)]);
    }

    #[test]
    fn reverses_at_right_wall_without_overshooting() {
        let mut engine = engine();
        engine.state.x = 798.0;
        let out = engine.tick(TICK, &mut VecDeque::new(), &mut quiet(), &catalog(0));
        assert_eq!(out.notifications, vec![Notification::Flipped(true)]);
        assert_eq!(engine.state().direction, Direction::Backward);
        assert_eq!(engine.state().x, 800.0);
    }

    #[test]
    fn reverses_at_left_wall() {
        let mut engine = engine();
        engine.state.direction = Direction::Backward;
        engine.state.x = 2.0;
        let out = engine.tick(TICK, &mut VecDeque::new(), &mut quiet(), &catalog(0));
        assert_eq!(out.notifications, vec![Notification::Flipped(false)]);
        assert_eq!(engine.state().x, 0.0);
    }

    #[test]
    fn spontaneous_reversal_only_when_grounded() {
        let mut engine = engine();
        engine.state.x = 400.0;
        // no jump, then reversal roll
        let mut rng = ScriptedRandom::new(&[0.5, 0.001]);
        let out = engine.tick(TICK, &mut VecDeque::new(), &mut rng, &catalog(0));
        assert_eq!(out.notifications, vec![Notification::Flipped(true)]);

        let mut engine = self::engine();
        engine.state.x = 400.0;
        engine.tick(TICK, &mut VecDeque::from([Command::Jump]), &mut quiet(), &catalog(0));
        let mut rng = ScriptedRandom::new(&[0.0, 0.0]);
        let out = engine.tick(TICK, &mut VecDeque::new(), &mut rng, &catalog(0));
        assert!(out.notifications.is_empty());
        assert_eq!(rng.draws, 0);
        assert_eq!(engine.state().direction, Direction::Forward);
    }

    #[test]
    fn random_accessory_pick_covers_none_and_catalog() {
        let cat = catalog(2);
        let mut engine = engine();
        // no jump, no reversal, accessory roll hits, pick lands in slot 2
        let mut rng = ScriptedRandom::new(&[0.9, 0.9, 0.0001, 0.7]);
        let out = engine.tick(TICK, &mut VecDeque::new(), &mut rng, &cat);
        assert_eq!(out.notifications, vec![Notification::Accessory(cat.resolve(2))]);

        let mut rng = ScriptedRandom::new(&[0.9, 0.9, 0.0001, 0.1]);
        let out = engine.tick(TICK, &mut VecDeque::new(), &mut rng, &cat);
        assert_eq!(out.notifications, vec![Notification::Accessory(None)]);
        assert_eq!(engine.state().active_accessory, None);
    }

    #[test]
    fn empty_catalog_never_rolls_for_accessories() {
        let mut engine = engine();
        let mut rng = quiet();
        engine.tick(TICK, &mut VecDeque::new(), &mut rng, &catalog(0));
        // jump roll + reversal roll only
        assert_eq!(rng.draws, 2);
    }

    #[test]
    fn motion_stays_within_bounds() {
        let b = DisplayBounds {
            x: -300.0,
            y: 0.0,
            width: 700.0,
            height: 500.0,
            scale_factor: 1.0,
        };
        let mut rng = SmallRng::seed_from_u64(7);
        let mut engine = BehaviorEngine::new(b, BehaviorConfig::default(), &mut rng);
        let cat = catalog(2);
        let mut queue = VecDeque::new();
        for i in 0..20_000u32 {
            if i % 500 == 0 {
                queue.push_back(Command::Jump);
            }
            engine.tick(TICK * i, &mut queue, &mut rng, &cat);
            let x = engine.state().x;
            assert!(x >= b.left() && x <= b.right() - 200.0, "tick {i}: x = {x}");
        }
    }
}
