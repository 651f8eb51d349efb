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
use super::*;
use crate::source::{BufferFillPool, BufferedSampleSource, MemorySampleSource};
use crate::testutil::{self, audio_test_utils};

const RATE: u32 = 8000;

fn mixer(
    voice_count: usize,
    buffer_size: usize,
    channel_count: u16,
    bits_per_sample: u16,
    samples_signed: bool,
) -> Mixer {
    Mixer::new(&MixerConfig::new(
        voice_count,
        buffer_size,
        channel_count,
        bits_per_sample,
        samples_signed,
        RATE,
    ))
    .unwrap()
}

fn constant(value: i16, frames: usize, channel_count: u16) -> Box<dyn SampleSource> {
    let samples = vec![value; frames * usize::from(channel_count)];
    Box::new(MemorySampleSource::from_i16(&samples, channel_count, RATE))
}

fn ramp(frames: usize) -> Vec<i16> {
    (0..frames).map(|i| i as i16).collect()
}

fn fill_i16(mixer: &Mixer) -> Vec<i16> {
    let drain = mixer.fill_next_buffer().unwrap().unwrap();
    testutil::decode_i16(&drain)
}

#[test]
fn test_voices_start_idle() {
    for voice_count in [1, 2, MAX_VOICES] {
        let mixer = mixer(voice_count, 1024, 2, 16, true);
        assert_eq!(mixer.voice_count(), voice_count);
        assert_eq!(mixer.voices().count(), voice_count);
        assert!(mixer
            .voices()
            .all(|voice| voice.state() == VoiceState::Idle));
        assert!(!mixer.is_playing().unwrap());
        assert_eq!(mixer.state(), MixerState::Silent);

        assert!(matches!(
            mixer.voice(voice_count),
            Err(MixerError::IndexError { index, voice_count: count })
                if index == voice_count && count == voice_count
        ));
    }
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let cases = [
        MixerConfig::new(0, 1024, 2, 16, true, RATE),
        MixerConfig::new(256, 1024, 2, 16, true, RATE),
        MixerConfig::new(2, 1024, 0, 16, true, RATE),
        MixerConfig::new(2, 1024, 3, 16, true, RATE),
        MixerConfig::new(2, 1024, 2, 16, true, 0),
        MixerConfig::new(2, 1024, 2, 0, true, RATE),
        MixerConfig::new(2, 1024, 2, 12, true, RATE),
        MixerConfig::new(2, 1024, 2, 24, true, RATE),
        MixerConfig::new(2, 0, 2, 16, true, RATE),
        MixerConfig::new(2, 1022, 2, 16, true, RATE),
    ];
    for config in cases {
        assert!(
            matches!(
                Mixer::new(&config),
                Err(MixerError::InvalidConfiguration(_))
            ),
            "{:?} should be rejected",
            config
        );
    }
}

#[test]
fn test_accessors() {
    let mixer = mixer(3, 1024, 2, 16, true);
    assert_eq!(mixer.format(), PcmFormat::s16(RATE, 2));
    assert_eq!(mixer.buffer_size(), 1024);
    assert_eq!(mixer.frames_per_buffer(), 256);
    assert_eq!(mixer.sample_rate(), RATE);
    assert_eq!(mixer.buffer_period(), Duration::from_millis(32));
}

#[test]
fn test_rate_mismatch_leaves_voice_untouched() {
    let mixer = mixer(2, 64, 1, 16, true);
    let voice = mixer.voice(0).unwrap();
    voice.play(constant(100, 64, 1), false).unwrap();
    fill_i16(&mixer);
    let position = voice.position();

    let wrong_rate = MemorySampleSource::from_i16(&[1, 2, 3], 1, 44100);
    assert!(matches!(
        voice.play(Box::new(wrong_rate.clone()), true),
        Err(MixerError::FormatMismatch { found, expected })
            if found.sample_rate == 44100 && expected.sample_rate == RATE
    ));
    assert!(voice.is_playing());
    assert_eq!(voice.position(), position);
    assert!(fill_i16(&mixer).iter().all(|&s| s == 100));

    let idle = mixer.voice(1).unwrap();
    assert!(idle.play(Box::new(wrong_rate), false).is_err());
    assert_eq!(idle.state(), VoiceState::Idle);
}

#[test]
fn test_opposite_phase_sines_cancel() {
    let mixer = mixer(2, 1024, 2, 16, true);
    let frames = mixer.frames_per_buffer();

    let sine = audio_test_utils::sine_i16(440.0, RATE, frames, i16::MAX);
    let inverted: Vec<i16> = sine.iter().map(|&s| -s).collect();
    let stereo = |mono: &[i16]| -> Vec<i16> { mono.iter().flat_map(|&s| [s, s]).collect() };

    let first = MemorySampleSource::from_i16(&stereo(&sine), 2, RATE);
    let second = MemorySampleSource::from_i16(&stereo(&inverted), 2, RATE);
    mixer.voice(0).unwrap().play(Box::new(first), false).unwrap();
    mixer.voice(1).unwrap().play(Box::new(second), false).unwrap();

    let output = fill_i16(&mixer);
    assert_eq!(output.len(), frames * 2);
    assert!(output.iter().all(|s| s.unsigned_abs() <= 1));
}

#[test]
fn test_full_scale_voices_clip() {
    let voice_count = 4;
    let mixer = mixer(voice_count, 256, 2, 16, true);
    for index in 0..voice_count {
        let voice = mixer.voice(index).unwrap();
        voice.play(constant(i16::MAX, 64, 2), false).unwrap();
    }
    assert!(fill_i16(&mixer).iter().all(|&s| s == i16::MAX));

    for index in 0..voice_count {
        let voice = mixer.voice(index).unwrap();
        voice.play(constant(i16::MIN, 64, 2), false).unwrap();
    }
    assert!(fill_i16(&mixer).iter().all(|&s| s == i16::MIN));
}

#[test]
fn test_full_scale_voices_clip_unsigned_8_bit() {
    let mixer = mixer(3, 32, 1, 8, false);
    for index in 0..3 {
        let source = MemorySampleSource::from_u8(&[0xff; 32], 1, RATE);
        mixer.voice(index).unwrap().play(Box::new(source), false).unwrap();
    }

    let drain = mixer.fill_next_buffer().unwrap().unwrap();
    assert!(drain.iter().all(|&b| b == 0xff));
}

#[test]
fn test_non_looping_source_yields_exact_frames() {
    let frame_count = 1000;
    let mixer = mixer(1, 512, 1, 16, true);
    let voice = mixer.voice(0).unwrap();
    voice
        .play(Box::new(MemorySampleSource::from_i16(&ramp(frame_count), 1, RATE)), false)
        .unwrap();

    let mut output = vec![0u8; 256 * 2];
    let mut total = 0;
    let mut finished = 0;
    let mut decoded = Vec::new();
    while let Some(chunk) = voice.next_chunk(&mut output, 256).unwrap() {
        total += chunk.frames;
        decoded.extend(testutil::decode_i16(&output[..chunk.frames * 2]));
        if chunk.finished {
            finished += 1;
            assert_eq!(total, frame_count);
        }
    }

    assert_eq!(total, frame_count);
    assert_eq!(finished, 1);
    assert_eq!(decoded, ramp(frame_count));
    assert_eq!(voice.state(), VoiceState::Done);
    assert_eq!(voice.position(), frame_count as u64);
    assert!(!mixer.is_playing().unwrap());
}

#[test]
fn test_mixer_goes_silent_when_voices_finish() {
    let mixer = mixer(2, 64, 1, 16, true);
    mixer.voice(0).unwrap().play(constant(10, 40, 1), false).unwrap();
    mixer.voice(1).unwrap().play(constant(20, 70, 1), false).unwrap();
    assert_eq!(mixer.state(), MixerState::Mixing);

    // 32 frames per buffer: voice 0 ends in tick 2, voice 1 in tick 3.
    let first = fill_i16(&mixer);
    assert!(first.iter().all(|&s| s == 30));
    assert!(mixer.is_playing().unwrap());

    let second = fill_i16(&mixer);
    assert_eq!(&second[..8], &[30; 8]);
    assert_eq!(&second[8..], &[20; 24]);
    assert_eq!(mixer.voice(0).unwrap().state(), VoiceState::Done);
    assert_eq!(mixer.state(), MixerState::Mixing);

    let third = fill_i16(&mixer);
    assert_eq!(&third[..6], &[20; 6]);
    assert_eq!(&third[6..], &[0; 26]);
    assert!(!mixer.is_playing().unwrap());
    assert_eq!(mixer.state(), MixerState::Silent);

    assert_eq!(mixer.reclaim(), 2);
    assert_eq!(mixer.stats().ticks, 3);
}

#[test]
fn test_looping_source_fills_whole_chunk() {
    let mixer = mixer(1, 512, 1, 16, true);
    let voice = mixer.voice(0).unwrap();
    voice
        .play(Box::new(MemorySampleSource::from_i16(&ramp(100), 1, RATE)), true)
        .unwrap();

    let mut output = vec![0u8; 256 * 2];
    let chunk = voice.next_chunk(&mut output, 256).unwrap().unwrap();
    assert_eq!(chunk.frames, 256);
    assert!(!chunk.finished);
    assert_eq!(voice.loops(), 2);
    assert!(voice.is_playing());

    let expected: Vec<i16> = (0..256).map(|i| (i % 100) as i16).collect();
    assert_eq!(testutil::decode_i16(&output), expected);
}

#[test]
fn test_empty_looping_source_finishes() {
    let mixer = mixer(1, 64, 1, 16, true);
    let voice = mixer.voice(0).unwrap();
    voice
        .play(Box::new(MemorySampleSource::from_i16(&[], 1, RATE)), true)
        .unwrap();

    let mut output = vec![0u8; 64];
    let chunk = voice.next_chunk(&mut output, 32).unwrap().unwrap();
    assert_eq!(chunk.frames, 0);
    assert!(chunk.finished);
    assert_eq!(voice.state(), VoiceState::Done);
}

#[test]
fn test_streamed_looping_source_never_short_at_wrap() {
    let mixer = mixer(1, 64, 1, 16, true);
    let pool = Arc::new(BufferFillPool::new(1).unwrap());
    let inner = MemorySampleSource::from_i16(&[1000; 40], 1, RATE);
    let mut source = BufferedSampleSource::new(Box::new(inner), pool, 32).unwrap();
    source.set_looping(true);
    testutil::eventually(
        || source.buffered_frames() == 128,
        "streamed source never buffered past its loop point",
    );

    let voice = mixer.voice(0).unwrap();
    voice.play(Box::new(source), true).unwrap();

    // Four ticks drain exactly what was buffered and wrap three times.
    for _ in 0..4 {
        let samples = fill_i16(&mixer);
        assert_eq!(samples.len(), mixer.frames_per_buffer());
        assert!(samples.iter().all(|&s| s == 1000));
    }
    assert_eq!(voice.loops(), 3);
    assert_eq!(voice.position(), 128);
    assert!(voice.is_playing());
}

#[test]
fn test_stop() {
    let mixer = mixer(1, 64, 1, 16, true);
    let voice = mixer.voice(0).unwrap();

    voice.stop().unwrap();
    assert_eq!(voice.state(), VoiceState::Idle);

    voice.play(constant(500, 1000, 1), true).unwrap();
    assert!(fill_i16(&mixer).iter().all(|&s| s == 500));

    voice.stop().unwrap();
    assert_eq!(voice.state(), VoiceState::Idle);
    assert!(fill_i16(&mixer).iter().all(|&s| s == 0));
    assert_eq!(mixer.state(), MixerState::Silent);

    // Stopping a finished voice changes nothing.
    voice.play(constant(1, 4, 1), false).unwrap();
    fill_i16(&mixer);
    assert_eq!(voice.state(), VoiceState::Done);
    voice.stop().unwrap();
    assert_eq!(voice.state(), VoiceState::Done);
}

#[test]
fn test_play_restarts_from_the_beginning() {
    let mixer = mixer(1, 8, 1, 16, true);
    let voice = mixer.voice(0).unwrap();
    let source = MemorySampleSource::from_i16(&ramp(10), 1, RATE);

    voice.play(Box::new(source.clone()), false).unwrap();
    assert_eq!(fill_i16(&mixer), vec![0, 1, 2, 3]);
    assert_eq!(fill_i16(&mixer), vec![4, 5, 6, 7]);

    voice.play(Box::new(source), false).unwrap();
    assert_eq!(voice.position(), 0);
    assert_eq!(fill_i16(&mixer), vec![0, 1, 2, 3]);
}

#[test]
fn test_held_buffer_holds_off_the_producer() {
    let mixer = mixer(1, 8, 1, 16, true);
    let voice = mixer.voice(0).unwrap();
    voice
        .play(Box::new(MemorySampleSource::from_i16(&ramp(100), 1, RATE)), false)
        .unwrap();

    let first = mixer.fill_next_buffer().unwrap().unwrap();
    let second = mixer.fill_next_buffer().unwrap().unwrap();
    assert_eq!(first.index(), 0);
    assert_eq!(second.index(), 1);
    assert_eq!(mixer.buffer_state(0), BufferState::Draining);

    // Buffer 0 is still draining, so the next tick is held off.
    assert!(mixer.fill_next_buffer().unwrap().is_none());
    assert_eq!(voice.position(), 8);
    assert_eq!(mixer.stats(), MixerStats { ticks: 2, held_off: 1 });
    assert_eq!(testutil::decode_i16(&first), vec![0, 1, 2, 3]);

    first.release();
    let third = mixer.fill_next_buffer().unwrap().unwrap();
    assert_eq!(third.index(), 0);
    assert_eq!(testutil::decode_i16(&third), vec![8, 9, 10, 11]);
    assert_eq!(testutil::decode_i16(&second), vec![4, 5, 6, 7]);
}

#[test]
fn test_deinit() {
    let mixer = mixer(2, 64, 2, 16, true);
    let voice = mixer.voice(0).unwrap();
    voice.play(constant(7, 100, 2), true).unwrap();
    let held = mixer.fill_next_buffer().unwrap().unwrap();

    mixer.deinit();
    assert!(mixer.is_deinitialized());
    assert_eq!(voice.state(), VoiceState::Idle);
    assert_eq!(mixer.state(), MixerState::Silent);
    assert!(matches!(mixer.voice(0), Err(MixerError::UseAfterDeinit)));
    assert!(matches!(mixer.is_playing(), Err(MixerError::UseAfterDeinit)));
    assert!(matches!(
        mixer.fill_next_buffer(),
        Err(MixerError::UseAfterDeinit)
    ));
    assert!(matches!(
        voice.play(constant(1, 1, 2), false),
        Err(MixerError::UseAfterDeinit)
    ));
    assert!(matches!(voice.stop(), Err(MixerError::UseAfterDeinit)));

    // The pool can still be inspected, but not driven.
    assert_eq!(mixer.voices().count(), 2);
    for voice in mixer.voices() {
        assert_eq!(voice.state(), VoiceState::Idle);
        assert!(matches!(
            voice.play(constant(1, 1, 2), false),
            Err(MixerError::UseAfterDeinit)
        ));
    }

    // The consumer's buffer survives until it lets go.
    assert_eq!(mixer.buffer_state(0), BufferState::Draining);
    assert_eq!(mixer.buffer_state(1), BufferState::Released);
    assert_eq!(held.len(), 64);
    drop(held);
    assert_eq!(mixer.buffer_state(0), BufferState::Released);

    mixer.deinit();
}

#[test]
fn test_unsigned_silence_is_half_scale() {
    let mixer8 = mixer(1, 16, 2, 8, false);
    let drain = mixer8.fill_next_buffer().unwrap().unwrap();
    assert!(drain.iter().all(|&b| b == 0x80));

    let mixer16 = mixer(1, 16, 2, 16, false);
    let drain = mixer16.fill_next_buffer().unwrap().unwrap();
    assert!(drain.chunks_exact(2).all(|b| b == [0x00, 0x80]));
}

#[test]
fn test_8_bit_source_on_16_bit_mixer() {
    let mixer = mixer(2, 8, 1, 16, true);
    let unsigned = MemorySampleSource::from_u8(&[0x80, 0xc0, 0x40, 0xff], 1, RATE);
    mixer.voice(0).unwrap().play(Box::new(unsigned), false).unwrap();
    assert_eq!(fill_i16(&mixer), vec![0, 64 << 8, -64 << 8, 127 << 8]);

    let signed = MemorySampleSource::from_i8(&[0, 64, -64, -128], 1, RATE);
    mixer.voice(1).unwrap().play(Box::new(signed), false).unwrap();
    assert_eq!(fill_i16(&mixer), vec![0, 64 << 8, -64 << 8, i16::MIN]);
}

#[test]
fn test_16_bit_source_on_8_bit_mixer() {
    let mixer = mixer(1, 4, 1, 8, true);
    let source = MemorySampleSource::from_i16(&[0, 0x4000, -0x4000, 0x7fff], 1, RATE);
    mixer.voice(0).unwrap().play(Box::new(source), false).unwrap();

    let drain = mixer.fill_next_buffer().unwrap().unwrap();
    let samples: Vec<i8> = drain.iter().map(|&b| b as i8).collect();
    assert_eq!(samples, vec![0, 0x40, -0x40, 0x7f]);
}

#[test]
fn test_mono_source_on_stereo_mixer_duplicates() {
    let mixer = mixer(1, 16, 2, 16, true);
    let source = MemorySampleSource::from_i16(&[1, 2, 3, 4], 1, RATE);
    mixer.voice(0).unwrap().play(Box::new(source), false).unwrap();
    assert_eq!(fill_i16(&mixer), vec![1, 1, 2, 2, 3, 3, 4, 4]);
}

#[test]
fn test_stereo_source_on_mono_mixer_is_rejected() {
    let mixer = mixer(1, 16, 1, 16, true);
    let voice = mixer.voice(0).unwrap();
    assert!(matches!(
        voice.play(constant(1, 8, 2), false),
        Err(MixerError::FormatMismatch { found, .. }) if found.channel_count == 2
    ));
    assert_eq!(voice.state(), VoiceState::Idle);
}

#[test]
fn test_unsupported_depth_is_rejected() {
    let mixer = mixer(1, 16, 1, 16, true);
    let source = MemorySampleSource::new(vec![0u8; 12], PcmFormat::new(RATE, 1, 24, true));
    assert!(matches!(
        mixer.voice(0).unwrap().play(Box::new(source), false),
        Err(MixerError::FormatMismatch { .. })
    ));
}

#[test]
fn test_voices_share_source_data() {
    let mixer = mixer(2, 8, 1, 16, true);
    let source = MemorySampleSource::from_i16(&[100, 200, 300, 400], 1, RATE);
    mixer.voice(0).unwrap().play(Box::new(source.clone()), false).unwrap();
    mixer.voice(1).unwrap().play(Box::new(source.rewound()), false).unwrap();
    assert_eq!(fill_i16(&mixer), vec![200, 400, 600, 800]);
}

#[test]
fn test_fill_from_another_thread() {
    let mixer = Arc::new(mixer(2, 64, 2, 16, true));
    mixer.voice(0).unwrap().play(constant(3, 320, 2), false).unwrap();

    let producer = {
        let mixer = mixer.clone();
        std::thread::spawn(move || {
            let mut ticks = 0;
            while mixer.state() == MixerState::Mixing {
                if mixer.fill_next_buffer().unwrap().is_some() {
                    ticks += 1;
                }
            }
            ticks
        })
    };

    let ticks = producer.join().unwrap();
    assert_eq!(ticks, 20);
    assert_eq!(mixer.voice(0).unwrap().state(), VoiceState::Done);
}
