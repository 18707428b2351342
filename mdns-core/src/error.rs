use std::fmt::Display;

/// Errors surfaced by the core to its owning FSM or to the façade.
///
/// Malformed packets are dropped silently at the interface (RFC 6762 puts no
/// burden on a responder to report every garbled datagram it ignores) and
/// never reach this type.
#[derive(Debug)]
pub enum CoreError {
    /// A send failed for a reason other than `EMSGSIZE` (which is handled by
    /// packet splitting and never escalates). Fatal: the owning interface
    /// stops.
    Send(std::io::Error),
    /// Binding or joining the multicast group failed.
    Bind(std::io::Error),
    /// The interface specifier did not resolve to a known OS interface.
    UnknownInterface(String),
    /// A unique record set could not be claimed after the rename budget was
    /// exhausted.
    ProbeExhausted { name: String },
}

impl Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(err) => write!(f, "send failed: {err}"),
            Self::Bind(err) => write!(f, "bind failed: {err}"),
            Self::UnknownInterface(name) => write!(f, "unknown interface: {name}"),
            Self::ProbeExhausted { name } => {
                write!(f, "could not claim a unique name for {name} after rename budget exhausted")
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Send(value)
    }
}
