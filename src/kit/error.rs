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
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("unsupported sample file {0}, only .wav is supported")]
    Unsupported(PathBuf),

    #[error("unable to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("sample {0} has no channels")]
    NoChannels(PathBuf),

    #[error("channel length mismatch: left has {left} frames, right has {right}")]
    ChannelMismatch { left: usize, right: usize },

    #[error("unable to resample {path} from {source_rate}Hz to {target_rate}Hz")]
    Resample {
        path: PathBuf,
        source_rate: u32,
        target_rate: u32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum KitError {
    #[error("unable to read kit {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse kit {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("unable to serialize kit: {0}")]
    Serialize(#[source] serde_yml::Error),

    #[error("note {0} is out of range (0-127)")]
    InvalidNote(u32),

    #[error("velocity range {lo}-{hi} is invalid (expected 0 <= lo <= hi <= 127)")]
    InvalidVelocityRange { lo: u32, hi: u32 },

    #[error("instrument name must not be empty (note {0})")]
    MissingName(u8),

    #[error("kit loading was aborted")]
    Aborted,

    #[error(transparent)]
    Sample(#[from] SampleError),
}
