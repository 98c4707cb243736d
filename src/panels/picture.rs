use crate::frame::Frame;
use crate::renderable::Renderable;

/// A static image: splash banners and directory-discovered plugins.
pub struct ImagePanel {
    name: String,
    frame: Frame,
}

impl ImagePanel {
    pub fn new(name: impl Into<String>, frame: Frame) -> Self {
        Self {
            name: name.into(),
            frame,
        }
    }
}

impl Renderable for ImagePanel {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self) -> anyhow::Result<Frame> {
        Ok(self.frame.clone())
    }
}
