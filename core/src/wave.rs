//! WAVE file loading and saving
//!
//! Tape recordings arrive as integer PCM WAVE files; the decoder works on
//! one channel of signed samples. StudyBox tapes carry the data track on
//! the right channel, so multi-channel files keep the second channel.

use std::io;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{MfmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveMeta {
    pub sample_rate: u32,
    pub bit_depth: u16,
    /// Channel count of the source file; the returned samples are always
    /// a single channel.
    pub channels: u16,
}

/// Load the data channel from the given file.
///
/// Accepts integer PCM at 8, 16, 24 or 32 bits. For files with more than
/// one channel, the second channel (right, for stereo) is returned.
pub fn load_data_channel<P: AsRef<Path>>(path: P) -> Result<(Vec<i32>, WaveMeta)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_format != SampleFormat::Int {
        return Err(MfmError::UnsupportedFormat("float PCM".into()));
    }
    if !matches!(spec.bits_per_sample, 8 | 16 | 24 | 32) {
        return Err(MfmError::InvalidBitDepth(spec.bits_per_sample));
    }
    if spec.channels == 0 {
        return Err(MfmError::UnsupportedFormat("no channels".into()));
    }

    log::debug!(
        "loading {} Hz, {}-bit, {} channel(s)",
        spec.sample_rate,
        spec.bits_per_sample,
        spec.channels
    );

    let samples = reader
        .samples::<i32>()
        .collect::<std::result::Result<Vec<i32>, _>>()?;

    let samples = if spec.channels > 1 {
        samples
            .iter()
            .skip(1)
            .step_by(spec.channels as usize)
            .copied()
            .collect()
    } else {
        samples
    };

    Ok((
        samples,
        WaveMeta {
            sample_rate: spec.sample_rate,
            bit_depth: spec.bits_per_sample,
            channels: spec.channels,
        },
    ))
}

/// Save a single channel of integer PCM at the given bit depth.
pub fn save_mono<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    bit_depth: u16,
    samples: &[i32],
) -> Result<()> {
    if !matches!(bit_depth, 8 | 16 | 24 | 32) {
        return Err(MfmError::InvalidBitDepth(bit_depth));
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: bit_depth,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in samples {
        put_sample(&mut writer, bit_depth, s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Save several channels interleaved. Shorter channels are padded with
/// zeros to the length of the longest.
pub fn save_channels<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    bit_depth: u16,
    channels: &[&[i32]],
) -> Result<()> {
    if channels.is_empty() {
        return Err(MfmError::UnsupportedFormat(
            "need at least one channel of samples".into(),
        ));
    }
    if !matches!(bit_depth, 8 | 16 | 24 | 32) {
        return Err(MfmError::InvalidBitDepth(bit_depth));
    }
    let frames = channels.iter().map(|c| c.len()).max().unwrap_or(0);
    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: bit_depth,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for frame in 0..frames {
        for ch in channels {
            let s = ch.get(frame).copied().unwrap_or(0);
            put_sample(&mut writer, bit_depth, s)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn put_sample<W: io::Write + io::Seek>(
    writer: &mut WavWriter<W>,
    bit_depth: u16,
    s: i32,
) -> std::result::Result<(), hound::Error> {
    match bit_depth {
        8 => writer.write_sample(s as i8),
        16 => writer.write_sample(s as i16),
        _ => writer.write_sample(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mfmtape-{}-{}.wav", std::process::id(), name))
    }

    #[test]
    fn test_mono_round_trip() {
        let path = temp_path("mono");
        let samples = vec![0, 100, -100, 16000, -16000, 32767, -32768];
        save_mono(&path, 44100, 16, &samples).unwrap();

        let (loaded, meta) = load_data_channel(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, samples);
        assert_eq!(
            meta,
            WaveMeta {
                sample_rate: 44100,
                bit_depth: 16,
                channels: 1
            }
        );
    }

    #[test]
    fn test_stereo_keeps_second_channel() {
        let path = temp_path("stereo");
        let left = vec![1, 2, 3, 4];
        let right = vec![-10, -20, -30, -40];
        save_channels(&path, 48000, 16, &[&left, &right]).unwrap();

        let (loaded, meta) = load_data_channel(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, right);
        assert_eq!(meta.channels, 2);
    }

    #[test]
    fn test_channels_padded_to_longest() {
        let path = temp_path("padded");
        let a = vec![5; 10];
        let b = vec![7; 6];
        save_channels(&path, 48000, 16, &[&a, &b]).unwrap();

        let (loaded, _) = load_data_channel(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.len(), 10);
        assert_eq!(&loaded[..6], &[7; 6]);
        assert_eq!(&loaded[6..], &[0; 4]);
    }

    #[test]
    fn test_save_rejects_bad_bit_depth() {
        let path = temp_path("baddepth");
        assert!(matches!(
            save_mono(&path, 44100, 12, &[0]),
            Err(MfmError::InvalidBitDepth(12))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_data_channel("/nonexistent/input.wav").is_err());
    }
}
