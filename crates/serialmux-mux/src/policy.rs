use std::fmt;
use std::str::FromStr;

/// How bytes on the physical link map to channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Policy {
    /// A single channel; bytes pass through unframed.
    Raw,
    /// Every channel; bytes carry address+length frames.
    #[default]
    Framed,
}

impl Policy {
    /// Channels that exist under this policy.
    pub fn channel_count(self) -> usize {
        match self {
            Policy::Raw => 1,
            Policy::Framed => serialmux_frame::CHANNEL_COUNT,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Raw => f.write_str("raw"),
            Policy::Framed => f.write_str("framed"),
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Policy::Raw),
            "framed" => Ok(Policy::Framed),
            other => Err(format!("unknown policy '{other}' (expected raw or framed)")),
        }
    }
}
