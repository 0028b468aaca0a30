/// Capabilities the embedding host shell offers the controller.
pub trait HostShell: Send + Sync {
    /// Leave the terminal view, e.g. after the session turned out not to exist.
    fn navigate_back(&self);
    /// Bring up the host's on-screen keyboard for the terminal.
    fn request_keyboard(&self);
}

/// Host with no navigation or keyboard affordances.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostShell for NullHost {
    fn navigate_back(&self) {}

    fn request_keyboard(&self) {}
}
