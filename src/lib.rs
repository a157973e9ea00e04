pub mod audio;
pub mod config;
pub mod error;
pub mod ui;

pub use audio::{LooperCommand, LooperEngine, LooperNotification, SessionView};
pub use config::LooperConfig;
pub use error::LooperError;
pub use ui::TerminalUI;
