//! Pulse classification
//!
//! Consumes edges pairwise and labels each interval with the number of
//! half-bit widths it spans. In MFM encoding the distance between edges
//! is always 2, 3 or 4 half-bit widths, but tape speed variability and
//! the mismatch between sampling rate and bit rate mean each distance has
//! to be matched to whichever of those it is closest to. The classifier
//! therefore compares against the points halfway between the expected
//! widths: measuring in data-bit widths w (two half-bits), the targets
//! are w, 3w/2 and 2w, and the split points are at 3w/4, 5w/4, 7w/4 and
//! 9w/4. Comparisons use `4p < kw` to avoid the division.
//!
//! The bit width itself is tracked continuously from the pulses seen so
//! far, so the classifier follows tape speed drift.

use std::fmt;

use crate::edge_detect::{EdgeDetect, EdgeType};
use crate::error::{MfmError, Result};
use crate::{expected_bit_width, DEFAULT_BIT_RATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PulseClass {
    /// The pulse could not be classified (no usable lead-in).
    Unknown,
    /// Too short to be a short pulse.
    Tiny,
    /// 2 half-bit widths.
    Short,
    /// 3 half-bit widths.
    Medium,
    /// 4 half-bit widths.
    Long,
    /// Too long to be a long pulse.
    Huge,
}

impl PulseClass {
    /// Whether this class carries MFM data.
    pub fn is_valid(self) -> bool {
        matches!(self, PulseClass::Short | PulseClass::Medium | PulseClass::Long)
    }
}

impl fmt::Display for PulseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PulseClass::Unknown => "U",
            PulseClass::Tiny => "T",
            PulseClass::Short => "S",
            PulseClass::Medium => "M",
            PulseClass::Long => "L",
            PulseClass::Huge => "H",
        })
    }
}

const HISTORY_LEN: usize = 16;

/// Ring of recent bit-width estimates with a running sum; the tracked
/// bit width is the mean of its contents.
#[derive(Debug, Clone, Copy)]
struct BitWidthHistory {
    values: [f64; HISTORY_LEN],
    head: usize,
    len: usize,
    sum: f64,
}

impl BitWidthHistory {
    fn new() -> Self {
        Self {
            values: [0.0; HISTORY_LEN],
            head: 0,
            len: 0,
            sum: 0.0,
        }
    }

    fn push(&mut self, width: f64) {
        if self.len < HISTORY_LEN {
            self.values[(self.head + self.len) % HISTORY_LEN] = width;
            self.len += 1;
        } else {
            self.sum -= self.values[self.head];
            self.values[self.head] = width;
            self.head = (self.head + 1) % HISTORY_LEN;
        }
        self.sum += width;
    }

    fn mean(&self) -> f64 {
        if self.len == 0 {
            0.0
        } else {
            self.sum / self.len as f64
        }
    }

    fn reset_to(&mut self, width: f64) {
        *self = Self::new();
        self.push(width);
    }
}

/// Labels the intervals between successive edges.
///
/// The classifier owns and drives the edge detector; the current pulse is
/// exposed through `class`, `width` and [`bit_width`].
///
/// [`bit_width`]: PulseClassifier::bit_width
#[derive(Debug)]
pub struct PulseClassifier<'a> {
    pub edges: EdgeDetect<'a>,

    /// Class of the current pulse.
    pub class: PulseClass,

    /// Width of the current pulse, measured between interpolated zero
    /// crossings.
    pub width: f64,

    history: BitWidthHistory,

    // Bit width presumed by the lead-in peek when the detector has no
    // crossing time yet; set from the caller's bit and sample rates.
    fallback_bit_width: f64,
}

impl<'a> PulseClassifier<'a> {
    pub fn new(edges: EdgeDetect<'a>) -> Self {
        Self {
            edges,
            class: PulseClass::Unknown,
            width: 0.0,
            history: BitWidthHistory::new(),
            fallback_bit_width: 0.0,
        }
    }

    /// Like [`new`], but records the input rates so the lead-in peek can
    /// presume a sensible initial crossing time.
    ///
    /// [`new`]: PulseClassifier::new
    pub fn with_sample_rate(
        edges: EdgeDetect<'a>,
        bit_rate: u32,
        sample_rate: u32,
    ) -> Result<Self> {
        let fallback = expected_bit_width(bit_rate, sample_rate)?;
        let mut c = Self::new(edges);
        c.fallback_bit_width = fallback;
        Ok(c)
    }

    /// The tracked width in samples of one MFM data bit (two half-bits),
    /// or 0 before the first estimate.
    pub fn bit_width(&self) -> f64 {
        self.history.mean()
    }

    /// Set the bit width directly, discarding the tracked history.
    ///
    /// Calling this before classifying is optional, but makes it possible
    /// to classify data that does not start with a lead-in.
    pub fn set_bit_width(&mut self, bit_width: f64) -> Result<()> {
        if bit_width < 2.0 {
            return Err(MfmError::InvalidBitWidth(bit_width));
        }
        self.history.reset_to(bit_width);
        self.update_crossing_time();
        Ok(())
    }

    fn push_estimate(&mut self, width: f64) {
        self.history.push(width);
        self.update_crossing_time();
    }

    fn update_crossing_time(&mut self) {
        self.edges.max_crossing_time = self.history.mean().round() as usize;
    }

    /// True if either edge of the current pulse is an edge to none; such
    /// pulses do not carry data.
    pub fn touches_none(&self) -> bool {
        self.edges.prev.kind == EdgeType::None || self.edges.cur.kind == EdgeType::None
    }

    /// Advance to the next pulse. Returns whether a pulse was produced.
    pub fn advance(&mut self) -> bool {
        if !self.edges.advance() {
            return false;
        }

        self.width = self.edges.cur.zero - self.edges.prev.zero;

        if self.bit_width() == 0.0 {
            // Without a bit width the data must start with a lead-in,
            // which then provides the estimate.
            if !self.peek_at_lead_in() {
                self.class = PulseClass::Unknown;
                return true;
            }
        }

        let p4 = self.width * 4.0;
        let w = self.bit_width();

        self.class = if p4 < w * 3.0 {
            PulseClass::Tiny
        } else if p4 < w * 5.0 {
            // 2 half-bit widths.
            self.push_estimate(self.width);
            PulseClass::Short
        } else if p4 < w * 7.0 {
            // 3 half-bit widths.
            self.push_estimate(self.width * 2.0 / 3.0);
            PulseClass::Medium
        } else if p4 < w * 9.0 {
            // 4 half-bit widths.
            self.push_estimate(self.width / 2.0);
            PulseClass::Long
        } else {
            PulseClass::Huge
        };

        true
    }

    /// Peek ahead at the lead-in to establish the bit width, leaving the
    /// live edge stream where it was.
    ///
    /// The lead-in is a run of zero bits, i.e. equidistant short pulses.
    /// Up to eight consecutive pulses are averaged; a pulse touching an
    /// edge to none aborts, since the lead-in is then not reliable.
    /// Returns false if no bit width could be established.
    fn peek_at_lead_in(&mut self) -> bool {
        let backup = self.edges;

        if self.edges.prev.kind == EdgeType::None {
            // This is (probably) the empty area before the first pulse.
            if self.edges.max_crossing_time == 0 {
                let width = if self.fallback_bit_width > 0.0 {
                    self.fallback_bit_width
                } else {
                    // Last resort: presume 44.1 kHz material.
                    44_100.0 / DEFAULT_BIT_RATE as f64
                };
                self.edges.max_crossing_time = width.round() as usize;
            }

            if !self.edges.advance() {
                self.edges = backup;
                return false;
            }

            // The presumed crossing time may have distorted this first
            // pulse, so redo the edge with one taken from its own width.
            let width = self.edges.cur.zero - self.edges.prev.zero;
            self.edges = backup;
            self.edges.max_crossing_time = (width.round() as usize).max(1);

            if !self.edges.advance() {
                self.edges = backup;
                return false;
            }
        }

        // Average over several pulses: the early ones are often distorted
        // and the timing is usually a fractional number of samples.
        let mut total = 0.0;
        let mut count = 0usize;
        loop {
            if self.touches_none() {
                self.edges = backup;
                return false;
            }

            total += self.edges.cur.zero - self.edges.prev.zero;
            count += 1;
            if count >= 8 {
                break;
            }

            self.edges.max_crossing_time = (total / count as f64).round() as usize;
            if !self.edges.advance() {
                self.edges = backup;
                return false;
            }
        }

        let bit_width = total / count as f64;
        self.edges = backup;
        if self.set_bit_width(bit_width).is_err() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_detect::EdgeDetect;

    fn square_wave(half_width: usize, amplitude: i32, half_cycles: usize) -> Vec<i32> {
        let mut out = Vec::with_capacity(half_width * half_cycles);
        for h in 0..half_cycles {
            let v = if h % 2 == 0 { amplitude } else { -amplitude };
            out.extend(std::iter::repeat(v).take(half_width));
        }
        out
    }

    /// One pulse of each width, built as alternating half-waves.
    fn pulses(widths: &[usize], amplitude: i32) -> Vec<i32> {
        let mut out = vec![0; 50];
        for (i, &w) in widths.iter().enumerate() {
            let v = if i % 2 == 0 { amplitude } else { -amplitude };
            out.extend(std::iter::repeat(v).take(w));
        }
        out.extend(std::iter::repeat(0).take(50));
        out
    }

    #[test]
    fn test_classes_at_bit_width_ten() {
        let samples = pulses(&[10, 15, 20, 5, 30, 10], 16000);
        let ed = EdgeDetect::new(&samples, 655);
        let mut pc = PulseClassifier::new(ed);
        pc.set_bit_width(10.0).unwrap();

        let mut got = Vec::new();
        while pc.advance() {
            if !pc.touches_none() {
                got.push(pc.class);
            }
        }
        assert_eq!(
            got,
            vec![
                PulseClass::Short,
                PulseClass::Medium,
                PulseClass::Long,
                PulseClass::Tiny,
                PulseClass::Huge,
            ]
        );
    }

    #[test]
    fn test_preset_bit_width_skips_peek() {
        // With the bit width preset, the first pulse classifies directly
        // even when it is not a short one.
        let samples = pulses(&[15, 10, 10], 16000);
        let ed = EdgeDetect::new(&samples, 655);
        let mut pc = PulseClassifier::new(ed);
        pc.set_bit_width(10.0).unwrap();

        assert!(pc.advance());
        // Leading silence pulse, touches none.
        assert!(pc.touches_none());
        assert!(pc.advance());
        assert_eq!(pc.class, PulseClass::Medium);
        assert!(!pc.touches_none());
    }

    #[test]
    fn test_set_bit_width_validates() {
        let samples = vec![0; 10];
        let ed = EdgeDetect::new(&samples, 655);
        let mut pc = PulseClassifier::new(ed);
        assert!(pc.set_bit_width(1.5).is_err());
        assert!(pc.set_bit_width(2.0).is_ok());
    }

    #[test]
    fn test_lead_in_establishes_bit_width() {
        let mut samples = vec![0; 50];
        samples.extend(square_wave(9, 16000, 40));
        samples.extend(std::iter::repeat(0).take(50));

        let ed = EdgeDetect::new(&samples, 655);
        let mut pc = PulseClassifier::with_sample_rate(ed, 4800, 44100).unwrap();

        assert!(pc.advance());
        let bw = pc.bit_width();
        assert!((8.9..=9.3).contains(&bw), "bit width {bw}");

        // The live stream is unchanged: the first real pulses all come
        // out short.
        let mut shorts = 0;
        while shorts < 8 && pc.advance() {
            if !pc.touches_none() {
                assert_eq!(pc.class, PulseClass::Short);
                shorts += 1;
            }
        }
        assert_eq!(shorts, 8);
    }

    #[test]
    fn test_lead_in_aborts_on_early_none() {
        // Only three pulses before silence: not enough lead-in.
        let mut samples = vec![0; 50];
        samples.extend(square_wave(9, 16000, 3));
        samples.extend(std::iter::repeat(0).take(200));

        let ed = EdgeDetect::new(&samples, 655);
        let mut pc = PulseClassifier::with_sample_rate(ed, 4800, 44100).unwrap();

        assert!(pc.advance());
        assert_eq!(pc.class, PulseClass::Unknown);
        assert_eq!(pc.bit_width(), 0.0);
    }

    #[test]
    fn test_bit_width_converges_and_holds() {
        // Feeding a constant short-pulse stream converges the estimate to
        // the pulse width within the history length, then holds it.
        let samples = square_wave(10, 16000, 60);
        let ed = EdgeDetect::new(&samples, 655);
        let mut pc = PulseClassifier::new(ed);
        pc.set_bit_width(11.0).unwrap();

        let mut widths = Vec::new();
        while pc.advance() {
            if pc.class == PulseClass::Short {
                widths.push(pc.bit_width());
            }
        }
        assert!(widths.len() > 20);
        for w in &widths[16..] {
            assert!((w - 10.0).abs() < 1e-9, "bit width drifted: {w}");
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let samples = vec![0; 10];
        let ed = EdgeDetect::new(&samples, 655);
        let mut pc = PulseClassifier::new(ed);
        pc.set_bit_width(100.0).unwrap();
        for _ in 0..HISTORY_LEN {
            pc.push_estimate(10.0);
        }
        assert!((pc.bit_width() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossing_time_follows_bit_width() {
        let samples = vec![0; 10];
        let ed = EdgeDetect::new(&samples, 655);
        let mut pc = PulseClassifier::new(ed);
        pc.set_bit_width(9.4).unwrap();
        assert_eq!(pc.edges.max_crossing_time, 9);
        pc.set_bit_width(9.6).unwrap();
        assert_eq!(pc.edges.max_crossing_time, 10);
    }
}
