/*!
 * Transfer units: the flat work list produced by tree expansion
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer direction relative to the local side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "Upload"),
            Direction::Download => write!(f, "Download"),
        }
    }
}

/// One file or directory scheduled for transfer
///
/// Container units always precede their descendants in the queue, so the
/// worker creates a directory before writing into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferUnit {
    pub source: String,
    pub destination: String,
    pub is_container: bool,
    pub display_name: String,
    pub direction: Direction,
}

impl TransferUnit {
    pub fn file(
        source: impl Into<String>,
        destination: impl Into<String>,
        display_name: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            is_container: false,
            display_name: display_name.into(),
            direction,
        }
    }

    pub fn container(
        source: impl Into<String>,
        destination: impl Into<String>,
        display_name: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            is_container: true,
            ..Self::file(source, destination, display_name, direction)
        }
    }

    /// Key used for transfer-log matching
    pub fn pair(&self) -> (&str, &str) {
        (&self.source, &self.destination)
    }

    /// Local path of this unit (source for uploads, destination for downloads)
    pub fn local_path(&self) -> &str {
        match self.direction {
            Direction::Upload => &self.source,
            Direction::Download => &self.destination,
        }
    }

    /// Remote path of this unit
    pub fn remote_path(&self) -> &str {
        match self.direction {
            Direction::Upload => &self.destination,
            Direction::Download => &self.source,
        }
    }
}
