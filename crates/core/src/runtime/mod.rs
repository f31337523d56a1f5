pub mod control;
mod scheduler;
mod shutdown;

pub use control::{ControlChannel, ControlExit};
pub use scheduler::{RunReport, Runtime};
pub use shutdown::ShutdownGuard;
