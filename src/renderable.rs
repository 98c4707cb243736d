//! The panel capability and the registry of known panels.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use embedded_graphics::prelude::Size;
use tracing::{debug, info, warn};

use crate::error::DisplayError;
use crate::frame::Frame;
use crate::image_loader::{load_frame_with_exif_rotation, load_sorted_image_paths};
use crate::panels::ImagePanel;

/// A panel: produces one frame on demand, with no input from the caller.
pub trait Renderable: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self) -> anyhow::Result<Frame>;

    /// How often the panel must be drawn again while on screen. `None` keeps
    /// the display's refresh interval; animated panels return something
    /// shorter.
    fn refresh_interval(&self) -> Option<Duration> {
        None
    }
}

/// Render `renderable`, turning errors, panics and wrongly sized frames into
/// [`DisplayError::RenderFailure`].
pub fn render_checked(renderable: &dyn Renderable, size: Size) -> Result<Frame, DisplayError> {
    let name = renderable.name();
    let frame = match panic::catch_unwind(AssertUnwindSafe(|| renderable.render())) {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => return Err(DisplayError::render(name, format!("{e:#}"))),
        Err(_) => return Err(DisplayError::render(name, "panicked while rendering")),
    };
    if frame.width() != size.width || frame.height() != size.height {
        return Err(DisplayError::render(
            name,
            format!(
                "produced {}x{} frame, display is {}x{}",
                frame.width(),
                frame.height(),
                size.width,
                size.height
            ),
        ));
    }
    Ok(frame)
}

/// Named panels available to the rotation, in registration order.
pub struct RenderableRegistry {
    size: Size,
    entries: Vec<Arc<dyn Renderable>>,
}

impl RenderableRegistry {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            entries: Vec::new(),
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Validate and add a panel. The candidate must have a non-empty, unused
    /// name and must render a frame of the display size right now.
    pub fn register(&mut self, candidate: Arc<dyn Renderable>) -> Result<(), DisplayError> {
        let name = candidate.name().trim().to_string();
        let reject = |reason: String| DisplayError::PluginRejected {
            name: name.clone(),
            reason,
        };
        if name.is_empty() {
            return Err(reject("name is empty".into()));
        }
        if self.get(&name).is_some() {
            return Err(reject("a panel with this name is already registered".into()));
        }
        render_checked(candidate.as_ref(), self.size).map_err(|e| reject(e.to_string()))?;

        debug!(panel = %name, "registered panel");
        self.entries.push(candidate);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Renderable>> {
        self.entries.iter().find(|r| r.name() == name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|r| r.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Renderable>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load every image in `dir` as an [`ImagePanel`] named after its file
    /// stem. Unreadable images and rejected panels are skipped with a warning.
    /// Returns the number of panels added.
    pub fn discover_plugins(&mut self, dir: &Path) -> usize {
        let paths = match load_sorted_image_paths(dir) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "no panel plugins loaded");
                return 0;
            }
        };

        let mut added = 0;
        for path in paths {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let frame = match load_frame_with_exif_rotation(&path, self.size) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{e:#}"), "skipping plugin image");
                    continue;
                }
            };
            match self.register(Arc::new(ImagePanel::new(name, frame))) {
                Ok(()) => added += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "skipping plugin"),
            }
        }
        info!(dir = %dir.display(), count = added, "loaded panel plugins");
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DISPLAY_HEIGHT, DISPLAY_WIDTH};

    struct Fixed(&'static str, u32, u32);

    impl Renderable for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn render(&self) -> anyhow::Result<Frame> {
            Ok(Frame::new(self.1, self.2))
        }
    }

    struct Failing;

    impl Renderable for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn render(&self) -> anyhow::Result<Frame> {
            anyhow::bail!("sensor offline")
        }
    }

    struct Panicking;

    impl Renderable for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn render(&self) -> anyhow::Result<Frame> {
            panic!("plugin bug")
        }
    }

    fn panel_size() -> Size {
        Size::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }

    #[test]
    fn test_render_checked_reports_errors() {
        let err = render_checked(&Failing, panel_size()).unwrap_err();
        assert!(matches!(err, DisplayError::RenderFailure { ref panel, .. } if panel == "failing"));
        assert!(err.to_string().contains("sensor offline"));
    }

    #[test]
    fn test_render_checked_contains_panics() {
        let err = render_checked(&Panicking, panel_size()).unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn test_render_checked_rejects_wrong_size() {
        let err = render_checked(&Fixed("small", 10, 10), panel_size()).unwrap_err();
        assert!(err.to_string().contains("10x10"));
    }

    #[test]
    fn test_register_validates_candidates() {
        let mut registry = RenderableRegistry::new(panel_size());
        registry
            .register(Arc::new(Fixed("ok", DISPLAY_WIDTH, DISPLAY_HEIGHT)))
            .expect("valid panel");
        assert!(registry.register(Arc::new(Fixed("ok", DISPLAY_WIDTH, DISPLAY_HEIGHT))).is_err());
        assert!(registry.register(Arc::new(Fixed("  ", DISPLAY_WIDTH, DISPLAY_HEIGHT))).is_err());
        assert!(registry.register(Arc::new(Fixed("tiny", 1, 1))).is_err());
        assert!(registry.register(Arc::new(Failing)).is_err());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["ok"]);
        assert!(registry.get("ok").is_some());
    }

    #[test]
    fn test_discover_missing_dir_is_not_fatal() {
        let mut registry = RenderableRegistry::new(panel_size());
        assert_eq!(registry.discover_plugins(Path::new("/nonexistent/plugins")), 0);
        assert!(registry.is_empty());
    }
}
