// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A named stereo output bus with its own pair of backend ports.
pub struct Submix {
    name: String,
    auto_connect: bool,
    orphaned: AtomicBool,
    port_names: [Arc<str>; 2],
}

impl Submix {
    /// Creates a new submix that is auto-connected to the main outputs.
    pub fn new(name: &str) -> Submix {
        Submix::with_auto_connect(name, true)
    }

    pub fn with_auto_connect(name: &str, auto_connect: bool) -> Submix {
        Submix {
            name: name.to_string(),
            auto_connect,
            orphaned: AtomicBool::new(false),
            port_names: [
                Arc::from(format!("{}_L", name)),
                Arc::from(format!("{}_R", name)),
            ],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the backend should connect this submix to the main stereo outputs.
    pub fn auto_connect(&self) -> bool {
        self.auto_connect
    }

    /// An orphaned submix is no longer referenced by the active kit.
    pub fn is_orphaned(&self) -> bool {
        self.orphaned.load(Ordering::Acquire)
    }

    pub fn set_orphaned(&self, orphaned: bool) {
        self.orphaned.store(orphaned, Ordering::Release);
    }

    /// The left and right port names, `<name>_L` and `<name>_R`.
    pub fn port_names(&self) -> &[Arc<str>; 2] {
        &self.port_names
    }
}

impl fmt::Display for Submix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.port_names[0], self.port_names[1])
    }
}

impl fmt::Debug for Submix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submix")
            .field("name", &self.name)
            .field("auto_connect", &self.auto_connect)
            .field("orphaned", &self.is_orphaned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_names() {
        let submix = Submix::new("toms");
        assert_eq!(&*submix.port_names()[0], "toms_L");
        assert_eq!(&*submix.port_names()[1], "toms_R");
        assert!(submix.auto_connect());
        assert!(!submix.is_orphaned());
    }

    #[test]
    fn test_orphaned_flag() {
        let submix = Submix::with_auto_connect("overheads", false);
        submix.set_orphaned(true);
        assert!(submix.is_orphaned());
        submix.set_orphaned(false);
        assert!(!submix.is_orphaned());
        assert!(!submix.auto_connect());
    }
}
