//! Status display controller for the Enviro+ 160x80 LCD.
//!
//! Producers talk to a [`DisplayManager`]; a single worker thread ticks the
//! [`scheduler::Scheduler`], renders panels and writes frames to a
//! [`sink::FrameSink`].

pub mod commands;
pub mod config;
pub mod constants;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod image_loader;
pub mod input;
pub mod manager;
pub mod overlay;
pub mod panels;
pub mod queue;
pub mod renderable;
pub mod scheduler;
pub mod sensors;
pub mod sink;
pub mod state;
pub mod transition;

pub use commands::{CommandHandler, DisplayCommand};
pub use config::DisplayConfig;
pub use error::{DisplayError, SinkError};
pub use frame::Frame;
pub use manager::DisplayManager;
pub use overlay::Severity;
pub use queue::{DisplayItem, ItemDuration, ItemHandle, Priority, RotationMode};
pub use renderable::{Renderable, RenderableRegistry};
pub use state::{Phase, StatusSnapshot};
