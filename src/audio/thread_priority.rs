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
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

const DEFAULT_PRIORITY: u8 = 70;

/// Raises the priority of the calling audio thread, at most once.
///
/// `SDDM_THREAD_PRIORITY` (0-99) overrides the priority and
/// `SDDM_DISABLE_RT_AUDIO` skips SCHED_FIFO on unix.
pub(crate) struct AudioThreadPriority {
    priority: u8,
    realtime: bool,
    applied: bool,
}

impl AudioThreadPriority {
    pub(crate) fn from_env() -> AudioThreadPriority {
        AudioThreadPriority {
            priority: parse_priority(std::env::var("SDDM_THREAD_PRIORITY").ok().as_deref()),
            realtime: !env_flag("SDDM_DISABLE_RT_AUDIO"),
            applied: false,
        }
    }

    /// Applies the priority to the current thread the first time it is called.
    pub(crate) fn apply(&mut self) {
        if self.applied {
            return;
        }
        self.applied = true;

        let priority = ThreadPriorityValue::try_from(self.priority)
            .map(ThreadPriority::Crossplatform)
            .unwrap_or(ThreadPriority::Max);
        if let Err(e) = set_current_thread_priority(priority) {
            warn!(error = ?e, "Failed to raise audio thread priority");
        }

        #[cfg(unix)]
        if self.realtime {
            use thread_priority::unix::{
                set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
                ThreadSchedulePolicy,
            };
            match set_thread_priority_and_policy(
                thread_native_id(),
                priority,
                ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
            ) {
                Ok(()) => info!("Enabled SCHED_FIFO for audio thread"),
                Err(e) => warn!(error = %e, "Failed to set SCHED_FIFO for audio thread"),
            }
        }
    }
}

fn parse_priority(value: Option<&str>) -> u8 {
    value
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_PRIORITY)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority(Some("42")), 42);
        assert_eq!(parse_priority(Some("100")), DEFAULT_PRIORITY);
        assert_eq!(parse_priority(Some("loud")), DEFAULT_PRIORITY);
        assert_eq!(parse_priority(None), DEFAULT_PRIORITY);
    }
}
