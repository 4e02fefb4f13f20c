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

//! Decoded, fully in-memory stereo sample data.
//!
//! Samples are decoded once when a kit is loaded so that the audio thread never
//! touches the filesystem.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::WavReader;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, info};

use super::error::SampleError;

/// Input block size for the sinc resampler.
const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Options applied while decoding a sample file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleLoadOptions {
    /// Truncates the sample to this many frames.
    pub max_frames: Option<usize>,
    /// Resamples the data to this rate if the file differs.
    pub target_sample_rate: Option<u32>,
}

/// A decoded stereo sample. Mono files are duplicated into both channels.
#[derive(Clone)]
pub struct Sample {
    path: PathBuf,
    sample_rate: u32,
    data_l: Vec<f32>,
    data_r: Vec<f32>,
}

impl Sample {
    /// Creates a sample from already decoded channel data.
    pub fn from_channels(
        path: impl Into<PathBuf>,
        sample_rate: u32,
        left: Vec<f32>,
        right: Vec<f32>,
    ) -> Result<Sample, SampleError> {
        if left.len() != right.len() {
            return Err(SampleError::ChannelMismatch {
                left: left.len(),
                right: right.len(),
            });
        }

        Ok(Sample {
            path: path.into(),
            sample_rate,
            data_l: left,
            data_r: right,
        })
    }

    /// Creates a sample with identical data in both channels.
    pub fn from_mono(path: impl Into<PathBuf>, sample_rate: u32, data: Vec<f32>) -> Sample {
        Sample {
            path: path.into(),
            sample_rate,
            data_l: data.clone(),
            data_r: data,
        }
    }

    /// Decodes the WAV file at the given path.
    pub fn load(path: &Path, options: SampleLoadOptions) -> Result<Sample, SampleError> {
        let is_wav = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if !is_wav {
            return Err(SampleError::Unsupported(path.to_path_buf()));
        }

        let decode_err = |source: hound::Error| SampleError::Decode {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = WavReader::open(path).map_err(decode_err)?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels);
        if channels == 0 {
            return Err(SampleError::NoChannels(path.to_path_buf()));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(decode_err)?
            }
        };

        let mut frames = interleaved.len() / channels;
        if let Some(max_frames) = options.max_frames {
            frames = frames.min(max_frames);
        }

        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in interleaved.chunks_exact(channels).take(frames) {
            left.push(frame[0]);
            // Anything past the first two channels is ignored.
            right.push(if channels > 1 { frame[1] } else { frame[0] });
        }

        let mut sample_rate = spec.sample_rate;
        if let Some(target) = options.target_sample_rate {
            if target != sample_rate && target > 0 {
                debug!(
                    path = ?path,
                    source_rate = sample_rate,
                    target_rate = target,
                    "Transcoding sample"
                );
                let transcoded =
                    transcode([&left, &right], sample_rate, target).map_err(|_e| {
                        SampleError::Resample {
                            path: path.to_path_buf(),
                            source_rate: sample_rate,
                            target_rate: target,
                        }
                    })?;
                [left, right] = transcoded;
                sample_rate = target;
            }
        }

        let sample = Sample {
            path: path.to_path_buf(),
            sample_rate,
            data_l: left,
            data_r: right,
        };

        info!(
            path = ?path,
            channels,
            sample_rate,
            frames = sample.frames(),
            duration_ms = sample.duration().as_millis(),
            "Sample loaded"
        );

        Ok(sample)
    }

    /// The file this sample was decoded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The number of frames in each channel.
    pub fn frames(&self) -> usize {
        self.data_l.len()
    }

    pub fn left(&self) -> &[f32] {
        &self.data_l
    }

    pub fn right(&self) -> &[f32] {
        &self.data_r
    }

    /// The playback length at the sample's own rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        (self.data_l.len() + self.data_r.len()) * std::mem::size_of::<f32>()
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("path", &self.path)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Resamples a stereo pair with a band-limited sinc filter. The output is
/// aligned with the input (the filter delay is removed) and holds
/// `ceil(frames * target / source)` frames.
fn transcode(
    channels: [&[f32]; 2],
    source_rate: u32,
    target_rate: u32,
) -> Result<[Vec<f32>; 2], Box<dyn std::error::Error>> {
    let frames = channels[0].len();
    let ratio = target_rate as f64 / source_rate as f64;
    let target_frames = (frames as f64 * ratio).ceil() as usize;
    if frames == 0 {
        return Ok([Vec::new(), Vec::new()]);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK_SIZE, 2)?;
    let delay = resampler.output_delay();

    let mut output = [
        Vec::with_capacity(target_frames + delay),
        Vec::with_capacity(target_frames + delay),
    ];
    let mut pos = 0;
    while pos + resampler.input_frames_next() <= frames {
        let end = pos + resampler.input_frames_next();
        let input = [&channels[0][pos..end], &channels[1][pos..end]];
        append(&mut output, resampler.process(&input[..], None)?);
        pos = end;
    }
    if pos < frames {
        let input = [&channels[0][pos..], &channels[1][pos..]];
        append(&mut output, resampler.process_partial(Some(&input[..]), None)?);
    }

    // Flush the filter tail until the delayed output covers every frame.
    let mut produced = output[0].len();
    while produced < target_frames + delay {
        let flushed = append(
            &mut output,
            resampler.process_partial(None::<&[&[f32]]>, None)?,
        );
        if flushed == 0 {
            break;
        }
        produced += flushed;
    }

    for channel in output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.resize(target_frames, 0.0);
    }
    Ok(output)
}

/// Appends a resampler chunk and returns how many frames it held.
fn append(output: &mut [Vec<f32>; 2], chunk: Vec<Vec<f32>>) -> usize {
    let frames = chunk.first().map_or(0, Vec::len);
    for (out, data) in output.iter_mut().zip(chunk) {
        out.extend(data);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_wav;

    #[test]
    fn test_from_channels_rejects_mismatch() {
        let result = Sample::from_channels("x.wav", 44100, vec![0.0; 4], vec![0.0; 3]);
        assert!(matches!(
            result,
            Err(SampleError::ChannelMismatch { left: 4, right: 3 })
        ));
    }

    #[test]
    fn test_load_mono_duplicates_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, &[vec![0.5f32, -0.25, 0.125]], 44100).unwrap();

        let sample = Sample::load(&path, SampleLoadOptions::default()).unwrap();
        assert_eq!(sample.frames(), 3);
        assert_eq!(sample.left(), &[0.5, -0.25, 0.125]);
        assert_eq!(sample.left(), sample.right());
        assert_eq!(sample.sample_rate(), 44100);
    }

    #[test]
    fn test_load_stereo_splits_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, &[vec![1.0f32, 0.5], vec![-1.0f32, -0.5]], 48000).unwrap();

        let sample = Sample::load(&path, SampleLoadOptions::default()).unwrap();
        assert_eq!(sample.left(), &[1.0, 0.5]);
        assert_eq!(sample.right(), &[-1.0, -0.5]);
    }

    #[test]
    fn test_load_int_scales_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("int.wav");
        write_wav(&path, &[vec![i16::MIN, 0, 16384]], 44100).unwrap();

        let sample = Sample::load(&path, SampleLoadOptions::default()).unwrap();
        assert_eq!(sample.left()[0], -1.0);
        assert_eq!(sample.left()[1], 0.0);
        assert_eq!(sample.left()[2], 0.5);
    }

    #[test]
    fn test_load_truncates_to_max_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_wav(&path, &[vec![0.1f32; 100]], 44100).unwrap();

        let options = SampleLoadOptions {
            max_frames: Some(10),
            ..Default::default()
        };
        let sample = Sample::load(&path, options).unwrap();
        assert_eq!(sample.frames(), 10);
        assert_eq!(sample.right().len(), 10);
    }

    #[test]
    fn test_load_resamples_to_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate.wav");
        write_wav(&path, &[vec![0.2f32; 4410]], 44100).unwrap();

        let options = SampleLoadOptions {
            target_sample_rate: Some(48000),
            ..Default::default()
        };
        let sample = Sample::load(&path, options).unwrap();
        let expected = (4410.0_f64 * 48000.0 / 44100.0).ceil() as usize;
        assert_eq!(sample.frames(), expected);
        assert_eq!(sample.right().len(), expected);
        assert_eq!(sample.sample_rate(), 48000);
        // Away from the edges a constant signal passes through unchanged.
        let middle = sample.left()[expected / 2];
        assert!((middle - 0.2).abs() < 0.01, "middle sample was {}", middle);
    }

    fn rms(data: &[f32]) -> f32 {
        (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt()
    }

    fn sine(frequency: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn test_transcode_removes_content_above_nyquist() {
        let input = sine(18000.0, 48000, 48000);
        assert!(rms(&input) > 0.3);

        let [left, right] = transcode([&input, &input], 48000, 22050).unwrap();
        assert_eq!(left.len(), 22050);
        // Skip the edges where the filter sees the implicit silence around the sample.
        let rms = rms(&left[1024..left.len() - 1024]);
        assert!(rms < 0.05, "aliased rms was {}", rms);
        assert_eq!(left, right);
    }

    #[test]
    fn test_transcode_keeps_content_below_nyquist() {
        let input = sine(1000.0, 48000, 48000);
        let [left, _] = transcode([&input, &input], 48000, 44100).unwrap();
        assert_eq!(left.len(), 44100);
        let rms = rms(&left[1024..left.len() - 1024]);
        assert!((rms - 0.3536).abs() < 0.02, "rms was {}", rms);
    }

    #[test]
    fn test_transcode_empty() {
        let [left, right] = transcode([&[], &[]], 44100, 48000).unwrap();
        assert!(left.is_empty() && right.is_empty());
    }

    #[test]
    fn test_load_rejects_other_extensions() {
        let result = Sample::load(Path::new("kick.flac"), SampleLoadOptions::default());
        assert!(matches!(result, Err(SampleError::Unsupported(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Sample::load(&dir.path().join("nope.wav"), SampleLoadOptions::default());
        assert!(matches!(result, Err(SampleError::Decode { .. })));
    }
}
