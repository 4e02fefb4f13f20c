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

//! Mixing notes into a stereo buffer pair.

use crate::audio::{BufferResponse, Destination};
use crate::kit::{Instrument, InstrumentLayer, Note};

/// Per-cycle values shared by every note in a buffer.
#[derive(Clone, Copy, Debug)]
pub(super) struct MixParams {
    /// The active kit's gain factor.
    pub kit_gain: f32,
    /// Frames at the end of each sample that are never played.
    pub sample_end_gap: u32,
    /// Only soloed instruments are audible.
    pub solo_active: bool,
}

/// The left and right gain of an instrument.
pub(super) fn volumes(instrument: &Instrument, kit_gain: f32) -> (f32, f32) {
    let level = instrument.level() as f32;
    let pan = instrument.pan() as f32;
    (
        (level - pan) / 100.0 * kit_gain,
        (level + pan) / 100.0 * kit_gain,
    )
}

/// Adds the contribution unless the sum would exceed unity magnitude, in which
/// case the contribution is dropped for this frame.
fn accumulate(out: &mut f32, contribution: f32) {
    let sum = *out + contribution;
    if sum.abs() <= 1.0 {
        *out = sum;
    }
}

/// Mixes one note into the response if it belongs there. Mixing never fails:
/// notes that can no longer play are cancelled instead.
pub(super) fn mix_note(note: &mut Note, response: &mut BufferResponse<'_>, params: MixParams) {
    if note.is_finished() {
        return;
    }
    let Some(instrument) = note.instrument() else {
        note.cancel();
        return;
    };
    if instrument.is_muted() || instrument.is_auto_muted() {
        note.cancel();
        return;
    }
    if params.solo_active && !instrument.is_soloed() {
        return;
    }
    let routed = match response.request().destination() {
        Destination::Main => !instrument.in_submix(),
        Destination::Submix(submix) => instrument.routes_to(submix),
    };
    if !routed {
        return;
    }
    let Some(sample) = instrument
        .layer(note.layer())
        .and_then(InstrumentLayer::sample)
    else {
        note.cancel();
        return;
    };

    let (volume_l, volume_r) = volumes(&instrument, params.kit_gain);
    let step = instrument.step();
    let frames = sample.frames();
    let (left, right) = (sample.left(), sample.right());
    let end = frames as f32 - params.sample_end_gap as f32;

    let mut peak_l = 0f32;
    let mut peak_r = 0f32;
    let mut ended = false;
    for i in 0..response.frames() {
        let index = note.sample_position as usize;
        if index >= frames {
            ended = true;
            break;
        }

        let l = left[index] * volume_l;
        let r = right[index] * volume_r;
        accumulate(&mut response.left[i], l);
        accumulate(&mut response.right[i], r);
        peak_l = peak_l.max((l * 100.0).abs());
        peak_r = peak_r.max((r * 100.0).abs());

        ended = end - (note.sample_position + 1.0) <= 0.0;
        note.sample_position += step;
        if ended {
            break;
        }
    }

    instrument.raise_meters(peak_l, peak_r);
    if ended {
        note.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audio::{BufferRequest, LEFT_PORT_NAME, RIGHT_PORT_NAME};
    use crate::kit::{Sample, Submix};

    const PARAMS: MixParams = MixParams {
        kit_gain: 1.0,
        sample_end_gap: 0,
        solo_active: false,
    };

    fn instrument(data: Vec<f32>) -> Arc<Instrument> {
        Arc::new(Instrument::new("snare", 38).with_layer(
            InstrumentLayer::new(0, 127, Sample::from_mono("snare.wav", 44100, data)).unwrap(),
        ))
    }

    fn bound_note(instrument: &Arc<Instrument>) -> Note {
        let mut note = Note::new();
        note.bind(instrument, 0, 100);
        note
    }

    fn main_request() -> BufferRequest {
        BufferRequest::main([Arc::from(LEFT_PORT_NAME), Arc::from(RIGHT_PORT_NAME)])
    }

    fn mix(
        note: &mut Note,
        request: &BufferRequest,
        frames: usize,
        params: MixParams,
    ) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        mix_note(
            note,
            &mut BufferResponse::new(request, &mut left, &mut right),
            params,
        );
        (left, right)
    }

    #[test]
    fn test_unity_sample_plays_through() {
        let snare = instrument(vec![1.0; 4]);
        let mut note = bound_note(&snare);
        let (left, right) = mix(&mut note, &main_request(), 4, PARAMS);

        assert_eq!(left, vec![1.0; 4]);
        assert_eq!(right, vec![1.0; 4]);
        assert!(note.is_finished());
        assert!(!note.is_cancelled());
        // Finishing resets the meters.
        assert_eq!(snare.meters(), (0.0, 0.0));
    }

    #[test]
    fn test_continues_across_buffers() {
        let snare = instrument(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        let mut note = bound_note(&snare);

        let (left, _) = mix(&mut note, &main_request(), 4, PARAMS);
        assert_eq!(left, vec![0.1, 0.2, 0.3, 0.4]);
        assert!(!note.is_finished());
        assert_eq!(note.sample_position(), 4.0);
        assert_eq!(snare.meters().0, 40.0);

        let (left, _) = mix(&mut note, &main_request(), 4, PARAMS);
        assert_eq!(left, vec![0.5, 0.6, 0.0, 0.0]);
        assert!(note.is_finished());
    }

    #[test]
    fn test_pan_and_kit_gain() {
        let snare = instrument(vec![0.5; 2]);
        snare.set_pan(-50);
        let mut note = bound_note(&snare);

        let params = MixParams {
            kit_gain: 0.5,
            ..PARAMS
        };
        let (left, right) = mix(&mut note, &main_request(), 2, params);
        // (100 + 50) / 100 * 0.5 on the left, (100 - 50) / 100 * 0.5 on the right.
        assert_eq!(left, vec![0.375; 2]);
        assert_eq!(right, vec![0.125; 2]);
    }

    #[test]
    fn test_pitch_steps_through_sample() {
        let snare = instrument(vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
        snare.set_pitch(100);
        let mut note = bound_note(&snare);

        let (left, _) = mix(&mut note, &main_request(), 6, PARAMS);
        assert_eq!(left, vec![0.0, 0.2, 0.4, 0.6, 0.0, 0.0]);
        assert!(note.is_finished());
    }

    #[test]
    fn test_end_gap_stops_early() {
        let snare = instrument(vec![0.5; 8]);
        let mut note = bound_note(&snare);
        let params = MixParams {
            sample_end_gap: 3,
            ..PARAMS
        };

        let (left, _) = mix(&mut note, &main_request(), 8, params);
        assert_eq!(left, vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0]);
        assert!(note.is_finished());
    }

    #[test]
    fn test_soft_limit_drops_contribution() {
        let snare = instrument(vec![0.75; 2]);
        let request = main_request();
        let mut left = vec![0.5, -0.5];
        let mut right = vec![0.0, 0.0];
        let mut first = bound_note(&snare);
        mix_note(
            &mut first,
            &mut BufferResponse::new(&request, &mut left, &mut right),
            PARAMS,
        );

        // 0.5 + 0.75 is over unity and dropped, -0.5 + 0.75 is kept.
        assert_eq!(left, vec![0.5, 0.25]);
        assert_eq!(right, vec![0.75, 0.75]);
        assert!(left.iter().chain(right.iter()).all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_muted_is_cancelled() {
        let snare = instrument(vec![1.0; 4]);
        snare.set_muted(true);
        let mut note = bound_note(&snare);

        let (left, _) = mix(&mut note, &main_request(), 4, PARAMS);
        assert_eq!(left, vec![0.0; 4]);
        assert!(note.is_cancelled());

        snare.set_muted(false);
        snare.set_auto_muted(true);
        let mut note = bound_note(&snare);
        mix(&mut note, &main_request(), 4, PARAMS);
        assert!(note.is_cancelled());
    }

    #[test]
    fn test_solo_skips_without_cancelling() {
        let snare = instrument(vec![1.0; 4]);
        let mut note = bound_note(&snare);
        let params = MixParams {
            solo_active: true,
            ..PARAMS
        };

        let (left, _) = mix(&mut note, &main_request(), 4, params);
        assert_eq!(left, vec![0.0; 4]);
        assert!(!note.is_finished());
        assert_eq!(note.sample_position(), 0.0);

        snare.set_soloed(true);
        let (left, _) = mix(&mut note, &main_request(), 4, params);
        assert_eq!(left, vec![1.0; 4]);
    }

    #[test]
    fn test_routing() {
        let toms = Arc::new(Submix::new("toms"));
        let tom = Arc::new(
            Instrument::new("tom", 45)
                .with_submix(&toms)
                .with_layer(
                    InstrumentLayer::new(0, 127, Sample::from_mono("tom.wav", 44100, vec![0.5; 2]))
                        .unwrap(),
                ),
        );
        let mut note = bound_note(&tom);

        let (left, _) = mix(&mut note, &main_request(), 2, PARAMS);
        assert_eq!(left, vec![0.0; 2]);
        assert!(!note.is_finished());

        let (left, _) = mix(&mut note, &BufferRequest::submix(&toms), 2, PARAMS);
        assert_eq!(left, vec![0.5; 2]);
    }

    #[test]
    fn test_missing_instrument_or_sample_cancels() {
        let snare = instrument(vec![1.0; 4]);
        let mut orphaned = bound_note(&snare);
        drop(snare);
        mix(&mut orphaned, &main_request(), 4, PARAMS);
        assert!(orphaned.is_cancelled());

        let silent = Arc::new(
            Instrument::new("silent", 40)
                .with_layer(InstrumentLayer::unloaded(0, 127, "gone.wav").unwrap()),
        );
        let mut note = bound_note(&silent);
        mix(&mut note, &main_request(), 4, PARAMS);
        assert!(note.is_cancelled());
    }

    #[test]
    fn test_meters_track_peak() {
        let snare = instrument(vec![0.2, -0.6, 0.4, 0.1, 0.1]);
        let mut note = bound_note(&snare);
        mix(&mut note, &main_request(), 4, PARAMS);
        let peak = (-0.6f32 * 100.0).abs();
        assert_eq!(snare.meters(), (peak, peak));
    }
}
