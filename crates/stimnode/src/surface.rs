//! Presentation surfaces.
//!
//! Stimulus rendering is owned by the tasks. The engine only needs a surface
//! to hand them and a few session screens (welcome, paused, finished).

use std::io::Write;

use anyhow::Result;
use tracing::info;

use crate::error::FatalError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Welcome,
    Paused,
    Finished,
    Text(String),
}

impl Screen {
    pub fn text(&self) -> &str {
        match self {
            Screen::Welcome => "Welcome! The session will begin shortly.",
            Screen::Paused => "Session Paused",
            Screen::Finished => "Thank you for participating.",
            Screen::Text(text) => text,
        }
    }
}

pub trait Surface: Send {
    fn name(&self) -> &str;
    fn show(&mut self, screen: &Screen) -> Result<()>;
}

/// Writes screens as text to a terminal or any writer.
pub struct ConsoleSurface {
    out: Box<dyn Write + Send>,
}

impl ConsoleSurface {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }
}

impl Surface for ConsoleSurface {
    fn name(&self) -> &str {
        "console"
    }

    fn show(&mut self, screen: &Screen) -> Result<()> {
        writeln!(self.out, "=== {} ===", screen.text())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Logs screens instead of drawing them.
#[derive(Debug, Default)]
pub struct HeadlessSurface;

impl Surface for HeadlessSurface {
    fn name(&self) -> &str {
        "headless"
    }

    fn show(&mut self, screen: &Screen) -> Result<()> {
        info!(target: "surface", "{}", screen.text());
        Ok(())
    }
}

/// Create the surface named in config.
pub fn create(name: &str) -> Result<Box<dyn Surface>, FatalError> {
    match name {
        "console" => Ok(Box::new(ConsoleSurface::stdout())),
        "headless" => Ok(Box::new(HeadlessSurface)),
        other => Err(FatalError::Surface(format!("unknown surface backend {:?}", other))),
    }
}
