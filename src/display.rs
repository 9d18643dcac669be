use bevy::prelude::*;
use bevy::window::{Monitor, PrimaryMonitor, WindowPosition};
use serde::Deserialize;

/// Usable screen rectangle, captured once at startup, in logical pixels (the
/// same unit as the sprite size and the behavior constants).
/// `scale_factor` converts to the physical pixels window positions use.
#[derive(Resource, Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct DisplayBounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "unit_scale")]
    pub scale_factor: f32,
}

fn unit_scale() -> f32 {
    1.0
}

impl DisplayBounds {
    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn from_monitor(monitor: &Monitor) -> Self {
        let scale = monitor.scale_factor as f32;
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        Self {
            x: monitor.physical_position.x as f32 / scale,
            y: monitor.physical_position.y as f32 / scale,
            width: monitor.physical_width as f32 / scale,
            height: monitor.physical_height as f32 / scale,
            scale_factor: scale,
        }
    }

    /// Logical position from the engine to the physical one the window takes.
    pub fn to_physical(&self, logical: IVec2) -> IVec2 {
        (logical.as_vec2() * self.scale_factor).as_ivec2()
    }
}

impl Default for DisplayBounds {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1920.0,
            height: 1080.0,
            scale_factor: 1.0,
        }
    }
}

/// Where the mascot window lives. Accepts positions, reports nothing back.
pub trait DisplaySurface {
    fn set_position(&mut self, x: i32, y: i32);
}

impl DisplaySurface for Window {
    fn set_position(&mut self, x: i32, y: i32) {
        let target = WindowPosition::At(IVec2::new(x, y));
        if self.position != target {
            self.position = target;
        }
    }
}

/// Stand-in surface for `--headless`: remembers the last pushed position.
#[derive(Resource, Default, Debug)]
pub struct HeadlessDisplay {
    pub position: Option<IVec2>,
    pub pushes: u64,
}

impl DisplaySurface for HeadlessDisplay {
    fn set_position(&mut self, x: i32, y: i32) {
        self.position = Some(IVec2::new(x, y));
        self.pushes += 1;
    }
}

/// Bounds the engine will use, chosen once: explicit config override, else
/// the primary monitor as soon as the windowing backend reports it.
pub fn capture_display_bounds(
    mut commands: Commands,
    existing: Option<Res<DisplayBounds>>,
    settings: Res<crate::config::MascotSettings>,
    headless: Res<crate::components::HeadlessMode>,
    monitors: Query<&Monitor, With<PrimaryMonitor>>,
) {
    if existing.is_some() {
        return;
    }
    let bounds = if let Some(bounds) = settings.bounds_override {
        bounds
    } else if headless.0 {
        DisplayBounds::default()
    } else if let Ok(monitor) = monitors.get_single() {
        DisplayBounds::from_monitor(monitor)
    } else {
        return;
    };
    info!(
        "[Gopher] Display bounds {}x{} at ({}, {})",
        bounds.width, bounds.height, bounds.x, bounds.y
    );
    commands.insert_resource(bounds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_follow_origin() {
        let b = DisplayBounds {
            x: 100.0,
            y: 20.0,
            width: 800.0,
            height: 600.0,
            scale_factor: 1.0,
        };
        assert_eq!(b.left(), 100.0);
        assert_eq!(b.right(), 900.0);
        assert_eq!(b.bottom(), 620.0);
    }

    #[test]
    fn hidpi_monitor_yields_logical_bounds() {
        let monitor = Monitor {
            name: None,
            physical_height: 2160,
            physical_width: 3840,
            physical_position: IVec2::new(3840, 0),
            refresh_rate_millihertz: None,
            scale_factor: 2.0,
            video_modes: Vec::new(),
        };
        let b = DisplayBounds::from_monitor(&monitor);
        assert_eq!((b.x, b.width, b.height), (1920.0, 1920.0, 1080.0));
        // a 200px sprite on the right wall lands 400 physical px from the edge
        let wall = IVec2::new((b.right() - 200.0) as i32, (b.bottom() - 200.0) as i32);
        assert_eq!(b.to_physical(wall), IVec2::new(7280, 1760));
    }

    #[test]
    fn bounds_override_defaults_to_unit_scale() {
        let b: DisplayBounds =
            serde_json::from_str(r#"{"x": 0, "y": 0, "width": 1280, "height": 720}"#).unwrap();
        assert_eq!(b.scale_factor, 1.0);
        assert_eq!(b.to_physical(IVec2::new(10, 20)), IVec2::new(10, 20));
    }

    #[test]
    fn headless_display_records_pushes() {
        let mut display = HeadlessDisplay::default();
        display.set_position(5, 7);
        display.set_position(6, 7);
        assert_eq!(display.position, Some(IVec2::new(6, 7)));
        assert_eq!(display.pushes, 2);
    }

    #[test]
    fn window_position_is_absolute() {
        let mut window = Window::default();
        window.set_position(40, 300);
        assert_eq!(window.position, WindowPosition::At(IVec2::new(40, 300)));
    }
}
