//! Decoding of MFM data recorded on audio tape
//!
//! Recovers the serial bit stream of a StudyBox data track from a PCM
//! recording of the tape. The pipeline is strictly linear:
//!
//! ```text
//! PCM samples -> [DcOffset] -> [EdgeDetect] -> [PulseClassifier] -> [BlockDecoder]
//! ```
//!
//! The DC-offset filter rewrites a whole buffer at once; the later stages
//! are pull-model iterators driven by the caller, reading samples on
//! demand and allocating nothing per pulse.

pub mod classifier;
pub mod dc_offset;
pub mod decoder;
pub mod edge_detect;
pub mod error;
pub mod wave;

pub use classifier::{PulseClass, PulseClassifier};
pub use dc_offset::DcOffset;
pub use decoder::{skip_lead_in, BlockDecoder};
pub use edge_detect::{intersect_x_axis, Edge, EdgeDetect, EdgeType};
pub use error::{MfmError, Result};

/// The default MFM bit rate, as used for StudyBox tapes.
pub const DEFAULT_BIT_RATE: u32 = 4800;

/// Default noise floor for the given sample bit depth: 2% of full scale.
pub fn default_noise_floor(bit_depth: u16) -> Result<i32> {
    if !matches!(bit_depth, 8 | 16 | 24 | 32) {
        return Err(MfmError::InvalidBitDepth(bit_depth));
    }
    let max_value = 1i64 << (bit_depth - 1);
    Ok((max_value * 2 / 100) as i32)
}

/// Expected width in samples of one half-period of the MFM carrier.
///
/// A bit rate of 0 means the StudyBox default.
pub fn mfm_peak_width(bit_rate: u32, sample_rate: u32) -> usize {
    let bit_rate = if bit_rate == 0 { DEFAULT_BIT_RATE } else { bit_rate };
    sample_rate.div_ceil(bit_rate) as usize
}

/// Expected width in samples of one MFM data bit (two half-bits) for the
/// given bit rate and sampling rate.
///
/// A bit rate of 0 means the StudyBox default. The sample rate must be at
/// least twice the bit rate, since pulse widths of 1, 1.5 and 2 bits have
/// to be distinguishable.
pub fn expected_bit_width(bit_rate: u32, sample_rate: u32) -> Result<f64> {
    let bit_rate = if bit_rate == 0 { DEFAULT_BIT_RATE } else { bit_rate };
    if sample_rate < 2 * bit_rate {
        return Err(MfmError::SampleRateTooLow {
            sample_rate,
            bit_rate,
        });
    }
    Ok(sample_rate as f64 / bit_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_noise_floor() {
        assert_eq!(default_noise_floor(16).unwrap(), 655);
        assert_eq!(default_noise_floor(8).unwrap(), 2);
        assert!(default_noise_floor(12).is_err());
    }

    #[test]
    fn test_peak_width_rounds_up() {
        assert_eq!(mfm_peak_width(4800, 48000), 10);
        assert_eq!(mfm_peak_width(4800, 44100), 10);
        assert_eq!(mfm_peak_width(0, 48000), 10);
    }

    #[test]
    fn test_expected_bit_width() {
        assert_eq!(expected_bit_width(4800, 48000).unwrap(), 10.0);
        assert!((expected_bit_width(4800, 44100).unwrap() - 9.1875).abs() < 1e-9);
        assert!(expected_bit_width(4800, 8000).is_err());
    }
}
