use thiserror::Error;

#[derive(Debug, Error)]
pub enum MfmError {
    #[error("invalid bit depth: {0} (expected 8, 16, 24 or 32)")]
    InvalidBitDepth(u16),

    #[error("sample rate {sample_rate} Hz is too low for bit rate {bit_rate} (need at least 2x)")]
    SampleRateTooLow { sample_rate: u32, bit_rate: u32 },

    #[error("invalid noise floor: {0}")]
    InvalidNoiseFloor(i32),

    #[error("invalid bit width: {0}")]
    InvalidBitWidth(f64),

    #[error("output buffer is shorter than the input ({output} < {input})")]
    OutputTooShort { output: usize, input: usize },

    #[error("peak too long at sample {0}")]
    PeakTooLong(usize),

    #[error("next peak too long at sample {0}")]
    NextPeakTooLong(usize),

    #[error("long pulse after a zero bit at sample {index}")]
    LongAfterZero { index: usize },

    #[error("malformed lead-in at bit {0}")]
    BadLeadIn(usize),

    #[error("unsupported wave format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Wave(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, MfmError>;
