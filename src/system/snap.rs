//! Snap package descriptions and store metadata.

/// A snap on a given channel, with interface connections to set up
/// after installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snap {
    pub name: String,
    pub channel: String,
    pub connections: Vec<String>,
}

impl Snap {
    pub fn new(name: &str, channel: &str) -> Self {
        Self {
            name: name.to_string(),
            channel: channel.to_string(),
            connections: Vec::new(),
        }
    }

    pub fn with_connections(mut self, connections: &[&str]) -> Self {
        self.connections = connections.iter().map(ToString::to_string).collect();
        self
    }

    /// Parse the shorthand form `name/track/risk`, e.g.
    /// `charmcraft/latest/edge`. A bare name has no channel pin.
    pub fn from_shorthand(shorthand: &str) -> Self {
        match shorthand.split_once('/') {
            Some((name, channel)) => Self::new(name, channel),
            None => Self::new(shorthand, ""),
        }
    }
}

/// Information about a snap as reported by the snapd API: whether it is
/// installed, which channel it tracks, and whether the tip of the
/// requested channel uses classic confinement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapInfo {
    pub installed: bool,
    pub classic: bool,
    pub tracking_channel: String,
}
