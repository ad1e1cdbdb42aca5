use config_model::ScreenGeometry;

use crate::orientation::Orientation;

/// The UI host that owns the physical screen.
pub trait DisplayHost: Send + Sync {
    /// Current screen size in pixels, `None` when no screen is attached.
    fn geometry(&self) -> Option<ScreenGeometry>;

    fn orientation(&self) -> Option<Orientation> {
        self.geometry()
            .map(|g| Orientation::from_geometry(g.width, g.height))
    }
}

/// Headless host reporting the geometry from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDisplay {
    geometry: Option<ScreenGeometry>,
}

impl FixedDisplay {
    pub fn new(geometry: Option<ScreenGeometry>) -> Self {
        Self { geometry }
    }
}

impl DisplayHost for FixedDisplay {
    fn geometry(&self) -> Option<ScreenGeometry> {
        self.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_follows_geometry() {
        let tall = FixedDisplay::new(Some(ScreenGeometry {
            width: 1080,
            height: 1920,
        }));
        assert_eq!(tall.orientation(), Some(Orientation::Portrait));
        assert_eq!(FixedDisplay::default().orientation(), None);
    }
}
