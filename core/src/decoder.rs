//! MFM bit recovery
//!
//! Expands the classified pulse stream into the recorded bit stream, one
//! block at a time. A block is a run of consecutive data pulses; pulses
//! that are too short, too long, or touch a signal-absent region delimit
//! blocks rather than carrying data.
//!
//! The bits produced are the raw MFM cells, clock and data interleaved;
//! [`skip_lead_in`] strips a block's lead-in, after which every second
//! bit is a data bit.

use crate::classifier::{PulseClass, PulseClassifier};
use crate::error::{MfmError, Result};

/// Decodes the pulse stream into blocks of MFM cell bits.
#[derive(Debug)]
pub struct BlockDecoder<'a> {
    classifier: PulseClassifier<'a>,

    /// Clock and data bits of the current block.
    pub bits: Vec<u8>,

    /// Sample index of the edge opening the current block.
    pub start_index: usize,

    /// Sample index of the edge closing the current block's last data
    /// pulse.
    pub end_index: usize,
}

impl<'a> BlockDecoder<'a> {
    pub fn new(classifier: PulseClassifier<'a>) -> Self {
        Self {
            classifier,
            bits: Vec::new(),
            start_index: 0,
            end_index: 0,
        }
    }

    pub fn classifier(&self) -> &PulseClassifier<'a> {
        &self.classifier
    }

    /// Decode the next block into `bits`. Returns false once the input
    /// is exhausted.
    ///
    /// Each data pulse extends the bit stream based on the previous data
    /// bit; the first pulse of a block is decoded as if that bit were 0,
    /// since blocks begin with a lead-in of zero bits.
    pub fn next_block(&mut self) -> Result<bool> {
        self.bits.clear();

        // Skip to the first data pulse.
        loop {
            if !self.classifier.advance() {
                return Ok(false);
            }
            if self.classifier.class.is_valid() && !self.classifier.touches_none() {
                break;
            }
        }

        self.start_index = self.classifier.edges.prev.index;
        self.end_index = self.classifier.edges.cur.index;

        let mut prev_bit = 0u8;
        loop {
            match self.classifier.class {
                PulseClass::Short => {
                    // Same data bit as the previous one.
                    self.bits.push(1 - prev_bit);
                    self.bits.push(prev_bit);
                }
                PulseClass::Medium => {
                    if prev_bit == 0 {
                        self.bits.extend_from_slice(&[1, 0, 0, 1]);
                        prev_bit = 1;
                    } else {
                        self.bits.extend_from_slice(&[0, 0]);
                        prev_bit = 0;
                    }
                }
                PulseClass::Long => {
                    // Only happens when the previous bit was 1 and the
                    // next data is a 0 followed by a 1.
                    if prev_bit != 1 {
                        return Err(MfmError::LongAfterZero {
                            index: self.classifier.edges.prev.index,
                        });
                    }
                    self.bits.extend_from_slice(&[0, 0, 0, 1]);
                }
                // A boundary pulse ends the block.
                _ => break,
            }
            self.end_index = self.classifier.edges.cur.index;

            if !self.classifier.advance() {
                break;
            }
            if self.classifier.touches_none() {
                break;
            }
        }

        Ok(true)
    }
}

/// Strip the lead-in from a block's cell bits: `(1,0)` cells for the run
/// of zero bits, terminated by the `(0,1)` cell of the first one bit.
/// Returns the bits after the lead-in.
pub fn skip_lead_in(bits: &[u8]) -> Result<&[u8]> {
    let mut i = 0;
    while i + 1 < bits.len() && bits[i] == 1 && bits[i + 1] == 0 {
        i += 2;
    }
    if i + 1 >= bits.len() || bits[i] != 0 || bits[i + 1] != 1 {
        return Err(MfmError::BadLeadIn(i));
    }
    Ok(&bits[i + 2..])
}
