//! DC-offset removal for tape recordings
//!
//! Tape playback drifts: the baseline wanders, the amplitude varies, and
//! the pauses between data blocks are pure noise. This filter subtracts a
//! running baseline estimate, forces noise regions to zero, and trims the
//! slopes of isolated peaks so that no artificial inverse peak is created
//! where the baseline changes.

use crate::error::{MfmError, Result};

/// Baseline filter over a buffer of signed PCM samples.
///
/// `noise_floor` is the hard lower bound on what counts as noise;
/// the filter additionally tracks a dynamic noise level derived from
/// nearby peak amplitudes, which is used for peak detection but never
/// for clamping.
#[derive(Debug)]
pub struct DcOffset {
    pub noise_floor: i32,
    pub peak_width: usize,

    offset: i32,
    pos: usize,

    // Level at which samples go from noise to data. Either noise_floor
    // or a value calculated from nearby peaks, whichever is higher.
    noise_level: i32,
}

/// One contiguous region where the signal leaves the noise band on a
/// single side of the current baseline.
#[derive(Debug, Clone, Copy)]
struct Peak {
    /// Sample value at the peak's tip.
    value: i32,
    /// Index of the peak's tip.
    index: usize,
    /// First sample of the peak that was outside the noise.
    start: usize,
    /// Last sample of the peak that was outside the noise.
    end: usize,
    /// Index at which the next peak (or noise area) starts.
    next: usize,
    /// The scan window ran out before the peak ended.
    truncated: bool,
}

/// Sample value relative to a baseline, widened so that 32-bit depths
/// cannot overflow the subtraction.
fn rel(v: i32, offset: i32) -> i64 {
    v as i64 - offset as i64
}

/// Midpoint of two sample values, truncated toward zero.
fn mid(a: i32, b: i32) -> i32 {
    ((a as i64 + b as i64) / 2) as i32
}

fn low_high(v: &[i32]) -> (i32, i32) {
    let mut lo = v[0];
    let mut hi = v[0];
    for &s in &v[1..] {
        if s < lo {
            lo = s;
        } else if s > hi {
            hi = s;
        }
    }
    (lo, hi)
}

impl DcOffset {
    pub fn new(noise_floor: i32, peak_width: usize) -> Self {
        Self {
            noise_floor,
            peak_width,
            offset: 0,
            pos: 0,
            noise_level: noise_floor,
        }
    }

    /// Run the filter from `input` into `output`.
    ///
    /// `output` must be at least as long as `input`; any excess is left
    /// untouched. For aliased operation use [`run_in_place`].
    ///
    /// [`run_in_place`]: DcOffset::run_in_place
    pub fn run(&mut self, input: &[i32], output: &mut [i32]) -> Result<()> {
        if output.len() < input.len() {
            return Err(MfmError::OutputTooShort {
                output: output.len(),
                input: input.len(),
            });
        }
        output[..input.len()].copy_from_slice(input);
        self.run_in_place(&mut output[..input.len()])
    }

    /// Run the filter with the input and output aliased.
    ///
    /// This is safe because the walker never reads a position it has
    /// already rewritten: every read is at or ahead of the write frontier.
    pub fn run_in_place(&mut self, data: &mut [i32]) -> Result<()> {
        if self.noise_floor < 0 {
            return Err(MfmError::InvalidNoiseFloor(self.noise_floor));
        }
        if self.peak_width == 0 {
            self.peak_width = crate::mfm_peak_width(crate::DEFAULT_BIT_RATE, 48000);
        }
        self.offset = 0;
        self.pos = 0;
        self.noise_level = self.noise_floor;

        log::debug!(
            "dc-offset: {} samples, noise floor {}, peak width {}",
            data.len(),
            self.noise_floor,
            self.peak_width
        );

        while self.pos < data.len() {
            // Initial state: at the start of the leading noise.
            self.leading_noise(data);
            if self.pos >= data.len() {
                break;
            }

            // Found the first peak after the noise; handle it along with
            // the remaining noise leading up to it.
            self.first_peak(data)?;
            if !self.outside_noise(data, self.pos) {
                // No next peak, so that was a lone peak and we are back
                // in the noise (or at the end of the data).
                continue;
            }

            // Handled the first peak of a sequence; walk the rest.
            while self.outside_noise(data, self.pos) {
                self.next_peak(data)?;
            }
        }

        Ok(())
    }

    fn outside_noise(&self, data: &[i32], pos: usize) -> bool {
        pos < data.len() && rel(data[pos], self.offset).abs() > self.noise_level as i64
    }

    fn within_noise(&self, data: &[i32], pos: usize) -> bool {
        pos < data.len() && rel(data[pos], self.offset).abs() <= self.noise_level as i64
    }

    /// Move past the leading noise while adjusting the offset.
    fn leading_noise(&mut self, data: &mut [i32]) {
        let pw = self.peak_width;
        let nf = self.noise_floor;
        let mut nl = self.noise_level;
        let mut pos = self.pos;
        let mut offset = self.offset;

        while pos < data.len() {
            let to = (pos + pw).min(data.len());
            let (lo, hi) = low_high(&data[pos..to]);
            let dlo = rel(lo, offset).abs();
            let dhi = rel(hi, offset).abs();
            if dlo > nl as i64 || dhi > nl as i64 {
                // Found a peak.
                break;
            }

            if nl > nf {
                // Fade the noise level back towards the noise floor, but
                // only with some headroom left, so the fade itself cannot
                // conjure up a peak.
                let max_v = dlo.max(dhi);
                if max_v * 2 < nl as i64 || max_v * 4 < nf as i64 * 3 {
                    nl = nf.max(nl - nl / 8);
                }
            }

            // No peak here, just noise; adjust the offset by averaging
            // the old value with the new window midpoint.
            offset = mid(offset, mid(lo, hi));
            data[pos] = rel(data[pos], offset) as i32;
            pos += 1;
        }

        self.offset = offset;
        self.pos = pos;
        self.noise_level = nl;
    }

    /// Handle the first peak after the leading noise.
    ///
    /// If this is a lone peak, the position is left in the noise after it
    /// (or at the end of the data if the peak goes that far). Otherwise
    /// the position is left at the tip of the peak.
    fn first_peak(&mut self, data: &mut [i32]) -> Result<()> {
        // Called with at most one peak-width of noise before the peak
        // starts. The peak likely marks a boundary where the DC offset
        // changes significantly, so find it before handling the rest of
        // the leading noise.
        let pw = self.peak_width;

        let mut start = self.pos;
        while self.within_noise(data, start) {
            start += 1;
        }

        let peak = self.find_peak_at(data, start);
        log::debug!("first peak: {:?}", peak);

        if peak.truncated {
            return Err(MfmError::PeakTooLong(start));
        }
        if peak.next >= data.len() {
            // A single peak that runs to the end of the data. Nothing
            // better to do than apply the current offset.
            log::warn!("single peak to end of data at {start}");
            self.apply_offset_until(data, data.len());
            return Ok(());
        }
        if self.within_noise(data, peak.next) {
            // A single peak followed by noise. A lone peak must not skew
            // the offset too much, so take the offset of the noise after
            // the peak and apply the average of that and the current one.
            log::warn!("single peak detected at {start}");
            let to = (peak.next + pw).min(data.len());
            let (lo, hi) = low_high(&data[peak.next..to]);
            let next_offset = mid(lo, hi);
            let peak_offset = mid(self.offset, next_offset);
            self.handle_leading_edge(data, peak, peak_offset);
            self.handle_trailing_edge(data, peak, next_offset);
            return Ok(());
        }

        // Found the first peak and the start of the second. Find the rest
        // of the second peak to get the overall DC offset.
        let mut next_offset = self.offset;

        let next_peak = self.find_peak_at(data, peak.next);
        log::debug!("second peak: {:?}", next_peak);

        if next_peak.truncated {
            return Err(MfmError::NextPeakTooLong(next_peak.start));
        }
        if next_peak.next >= data.len() {
            // The second peak went off the end, so its tip may be wrong
            // and the new offset with it. Keep the old offset instead.
            log::warn!("peak runs off end of data at {start}");
        } else {
            next_offset = mid(peak.value, next_peak.value);
            self.update_noise_level(next_offset, peak.value, next_peak.value);
        }

        self.handle_leading_edge(data, peak, next_offset);

        Ok(())
    }

    /// Apply the offset to the leading slope of the given peak without
    /// creating an artificial inverse peak. Only used for the first peak
    /// in a group.
    fn handle_leading_edge(&mut self, data: &mut [i32], peak: Peak, peak_offset: i32) {
        // Work backwards, to properly detect the first zero crossing.
        // Apply the offset until the start, or until the data crosses zero.
        let peak_sign = data[peak.index] < 0;
        let mut pos = peak.index;
        while pos > peak.start {
            let v = rel(data[pos - 1], peak_offset) as i32;
            if (v < 0) != peak_sign {
                break;
            }
            data[pos - 1] = v;
            pos -= 1;
        }

        // Past the zero crossing, keep the rest within the noise. Clamp
        // each sample so the crossing point stays as close to correct as
        // possible, while blending the working offset back towards the
        // earlier one.
        let mut off = peak_offset;
        while pos > self.pos {
            pos -= 1;
            off = self.clamp_to_noise(off, data[pos]);
            data[pos] = rel(data[pos], off) as i32;
            off = mid(off, self.offset);
        }

        self.offset = peak_offset;
        self.pos = peak.index;
    }

    /// Apply the offset to the trailing slope of the given peak without
    /// creating an artificial inverse peak. Only used for the last peak
    /// in a group; expects the current position at the tip of that peak.
    fn handle_trailing_edge(&mut self, data: &mut [i32], peak: Peak, next_offset: i32) {
        let peak_sign = data[peak.index] < 0;
        let mut pos = self.pos;
        let mut off = self.offset;

        // Apply the offset until the end, or until the data crosses zero.
        while pos <= peak.end {
            let v = rel(data[pos], off) as i32;
            if (v < 0) != peak_sign {
                break;
            }
            data[pos] = v;
            pos += 1;
        }

        // Past the zero crossing, keep the rest within the noise while
        // blending the working offset towards the target offset.
        while pos < peak.next {
            off = self.clamp_to_noise(off, data[pos]);
            data[pos] = rel(data[pos], off) as i32;
            pos += 1;
            off = mid(off, next_offset);
        }

        self.offset = next_offset;
        self.pos = pos;
    }

    /// Clamp the offset such that the given sample would land within the
    /// noise. Uses the fixed noise floor, not the dynamic noise level.
    fn clamp_to_noise(&self, offset: i32, val: i32) -> i32 {
        let nf = self.noise_floor;
        if rel(val, offset) > nf as i64 {
            // want v - off = nf  =>  off = v - nf
            val - nf
        } else if rel(val, offset) < -(nf as i64) {
            // want v - off = -nf  =>  off = v + nf
            val + nf
        } else {
            offset
        }
    }

    /// Handle the next peak in a sequence. Expects the position at the tip
    /// of the previous peak; leaves it at the tip of the next peak, or in
    /// the noise after the previous one if it was the last.
    fn next_peak(&mut self, data: &mut [i32]) -> Result<()> {
        let pw = self.peak_width;

        // Find the end of the previous peak and the start of the current.
        let prev = self.find_peak_at(data, self.pos);
        log::debug!("previous peak: {:?}", prev);
        if prev.truncated {
            return Err(MfmError::PeakTooLong(prev.start));
        }
        if prev.next >= data.len() {
            log::warn!("peak runs off end of data at {}", prev.start);
            self.apply_offset_until(data, data.len());
            return Ok(());
        }
        if self.within_noise(data, prev.next) {
            // That was the last peak of this sequence, so end it here.
            let to = (prev.next + pw).min(data.len());
            let (lo, hi) = low_high(&data[prev.next..to]);
            let next_offset = mid(lo, hi);
            self.handle_trailing_edge(data, prev, next_offset);
            return Ok(());
        }

        // There is a current peak; find its details.
        let cur = self.find_peak_at(data, prev.next);
        log::debug!("current peak: {:?}", cur);
        if cur.truncated {
            return Err(MfmError::PeakTooLong(cur.start));
        }
        if cur.next >= data.len() {
            log::warn!("peak runs off end of data at {}", prev.start);
            self.apply_offset_until(data, data.len());
            return Ok(());
        }

        let peak_offset = mid(prev.value, cur.value);

        // Update the noise level before looking for the next peak.
        self.update_noise_level(peak_offset, prev.value, cur.value);

        self.offset = peak_offset;
        self.apply_offset_until(data, cur.index);

        Ok(())
    }

    fn update_noise_level(&mut self, offset: i32, tip1: i32, tip2: i32) {
        // The tips should be equally far from the offset, but integer
        // math can leave them uneven, so use the smaller of the two.
        let tip_level = rel(tip1, offset).abs().min(rel(tip2, offset).abs());
        self.noise_level = (self.noise_floor as i64).max(tip_level / 10) as i32;
    }

    fn apply_offset_until(&mut self, data: &mut [i32], end: usize) {
        while self.pos < end {
            data[self.pos] = rel(data[self.pos], self.offset) as i32;
            self.pos += 1;
        }
    }

    fn find_peak_at(&self, data: &[i32], start: usize) -> Peak {
        if rel(data[start], self.offset) < 0 {
            self.find_low_peak(data, start)
        } else {
            self.find_high_peak(data, start)
        }
    }

    fn find_low_peak(&self, data: &[i32], start: usize) -> Peak {
        let pw = self.peak_width;
        let nl = self.noise_level as i64;
        let offset = self.offset;
        let mut p = start;
        let mut peak = Peak {
            value: data[p],
            index: p,
            start,
            end: p,
            next: 0,
            truncated: false,
        };
        let mut budget = pw * 6;
        while budget > 0 && p < data.len() && rel(data[p], offset) <= nl {
            if data[p] < peak.value {
                peak.value = data[p];
                peak.index = p;
            }
            if rel(data[p], offset) < -nl {
                peak.end = p;
            } else if p - peak.end > pw {
                // A full peak width of noise, so this was the last peak.
                peak.next = peak.end + 1;
                return peak;
            }
            p += 1;
            budget -= 1;
        }
        if budget == 0 {
            peak.truncated = true;
        }
        peak.next = p;
        peak
    }

    fn find_high_peak(&self, data: &[i32], start: usize) -> Peak {
        let pw = self.peak_width;
        let nl = self.noise_level as i64;
        let offset = self.offset;
        let mut p = start;
        let mut peak = Peak {
            value: data[p],
            index: p,
            start,
            end: p,
            next: 0,
            truncated: false,
        };
        let mut budget = pw * 6;
        while budget > 0 && p < data.len() && rel(data[p], offset) >= -nl {
            if data[p] > peak.value {
                peak.value = data[p];
                peak.index = p;
            }
            if rel(data[p], offset) > nl {
                peak.end = p;
            } else if p - peak.end > pw {
                // A full peak width of noise, so this was the last peak.
                peak.next = peak.end + 1;
                return peak;
            }
            p += 1;
            budget -= 1;
        }
        if budget == 0 {
            peak.truncated = true;
        }
        peak.next = p;
        peak
    }
}
