pub mod backend;
pub mod bridge;
pub mod config;
pub mod console;
pub mod dialogs;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod ui_state;

pub use error::HostError;
