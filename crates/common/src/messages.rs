//! Control messages for transport tasks.

/// Commands that can be sent to a running transport task.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    /// Graceful shutdown
    Shutdown,
}
