//! Edge detection over a cleaned sample buffer
//!
//! Walks the samples looking for transitions between the high side, the
//! low side, and signal-absent regions. Each transition carries both the
//! integer sample index it was declared at and a sub-sample interpolated
//! zero crossing, which is what the pulse classifier measures widths
//! from.
//!
//! The detector is a pull-model iterator exposing a two-edge window
//! (`prev`, `cur`). All state lives in plain fields so the whole detector
//! can be snapshotted with a copy and restored, which the classifier's
//! lead-in peek relies on.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    /// Transition into a signal-absent region (or the terminal edge).
    None,
    ToHigh,
    ToLow,
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EdgeType::None => "N",
            EdgeType::ToHigh => "H",
            EdgeType::ToLow => "L",
        })
    }
}

/// A single detected edge.
///
/// For `ToHigh`/`ToLow` the index is the first sample on the new side of
/// zero; for `None` it is the point at which the signal was deemed lost.
/// `zero` is the interpolated crossing position, never past the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub kind: EdgeType,
    pub index: usize,
    pub zero: f64,
}

impl Default for Edge {
    fn default() -> Self {
        Self {
            kind: EdgeType::None,
            index: 0,
            zero: 0.0,
        }
    }
}

/// Fractional position in (0, 1] at which the straight line through
/// `(0, y1)` and `(1, y2)` crosses the X axis.
pub fn intersect_x_axis(y1: f64, y2: f64) -> f64 {
    y1 / (y1 - y2)
}

#[derive(Debug, Clone, Copy)]
pub struct EdgeDetect<'a> {
    /// The samples this detector is finding edges in.
    pub samples: &'a [i32],

    /// Maximum absolute sample value that is still considered noise.
    pub noise_floor: i32,

    /// Maximum time in samples allowed for crossing the zero point when
    /// switching from high to low or vice versa; a slower crossing is
    /// detected as an edge to none instead. Zero means unset.
    pub max_crossing_time: usize,

    pub prev: Edge,
    pub cur: Edge,
}

impl<'a> EdgeDetect<'a> {
    pub fn new(samples: &'a [i32], noise_floor: i32) -> Self {
        Self {
            samples,
            noise_floor,
            max_crossing_time: 0,
            prev: Edge::default(),
            cur: Edge::default(),
        }
    }

    /// Advance to the next edge. Returns whether an edge was produced.
    ///
    /// Once the input is exhausted a terminal `None` edge is recorded in
    /// `cur` and `false` is returned; every earlier high/low tail has
    /// already been closed by a regular `None` edge at that point.
    pub fn advance(&mut self) -> bool {
        self.prev = self.cur;
        match self.prev.kind {
            EdgeType::None => self.advance_from_none(),
            EdgeType::ToLow => self.advance_from_signal(true),
            EdgeType::ToHigh => self.advance_from_signal(false),
        }
    }

    fn advance_from_none(&mut self) -> bool {
        let s = self.samples;
        let noise = self.noise_floor;
        let mut i = self.cur.index;
        while i < s.len() && s[i] <= noise && s[i] >= -noise {
            i += 1;
        }
        if i >= s.len() {
            self.cur = Edge {
                kind: EdgeType::None,
                index: i,
                zero: (i as f64).max(self.prev.zero),
            };
            return false;
        }
        let kind = if s[i] > noise {
            EdgeType::ToHigh
        } else {
            EdgeType::ToLow
        };
        self.cur = Edge {
            kind,
            index: i,
            zero: self.zero_behind(i),
        };
        true
    }

    /// Interpolated crossing for an edge that ends a signal-absent
    /// region, with `i` the first sample beyond the noise.
    ///
    /// Extrapolates the last two samples down to the axis, then prefers
    /// an actual sign change if one exists within the crossing window.
    fn zero_behind(&self, i: usize) -> f64 {
        let s = self.samples;
        if i == 0 {
            return 0.0;
        }
        let y1 = s[i - 1] as f64;
        let y2 = s[i] as f64;
        let mut zero = if y1 == y2 {
            i as f64
        } else {
            (i - 1) as f64 + intersect_x_axis(y1, y2)
        };

        let mut lo = self.prev.index + 1;
        if self.max_crossing_time > 0 {
            lo = lo.max(i.saturating_sub(self.max_crossing_time));
        }
        let mut j = i;
        while j > lo {
            if (s[j] < 0) != (s[j - 1] < 0) {
                zero = (j - 1) as f64 + intersect_x_axis(s[j - 1] as f64, s[j] as f64);
                break;
            }
            j -= 1;
        }

        let floor = if self.max_crossing_time > 0 {
            self.prev.zero.max(i.saturating_sub(self.max_crossing_time) as f64)
        } else {
            self.prev.zero
        };
        zero.clamp(floor, i as f64)
    }

    fn advance_from_signal(&mut self, low: bool) -> bool {
        let s = self.samples;
        let noise = self.noise_floor;
        let mct = self.max_crossing_time;
        let mut i = self.cur.index;
        if i >= s.len() {
            return false;
        }

        // Look for the first non-noise sample on the other side of zero.
        // Dips into the noise that come back out on the same side are
        // ignored, unless one lasts long enough to be an edge to none.
        let mut ld = i;
        i += 1;
        if low {
            while i < s.len() && s[i] <= noise {
                if s[i] < -noise {
                    ld = i;
                } else if i - ld > mct {
                    // Too long within the noise: edge to none.
                    return self.emit_to_none(ld, i);
                }
                i += 1;
            }
            if i >= s.len() {
                return self.emit_to_none(ld, i);
            }
            // Found the high side; step back to the straddling pair.
            let mut j = i;
            while j > ld + 1 && s[j - 1] >= 0 {
                j -= 1;
            }
            self.cur = Edge {
                kind: EdgeType::ToHigh,
                index: j,
                zero: (j - 1) as f64 + intersect_x_axis(s[j - 1] as f64, s[j] as f64),
            };
        } else {
            while i < s.len() && s[i] >= -noise {
                if s[i] > noise {
                    ld = i;
                } else if i - ld > mct {
                    // Too long within the noise: edge to none.
                    return self.emit_to_none(ld, i);
                }
                i += 1;
            }
            if i >= s.len() {
                return self.emit_to_none(ld, i);
            }
            // Found the low side; step back to the straddling pair.
            let mut j = i;
            while j > ld + 1 && s[j - 1] < 0 {
                j -= 1;
            }
            self.cur = Edge {
                kind: EdgeType::ToLow,
                index: j,
                zero: (j - 1) as f64 + intersect_x_axis(s[j - 1] as f64, s[j] as f64),
            };
        }
        true
    }

    /// Emit an edge to none at scan position `i`, with `ld` the last
    /// sample that was beyond the noise on the current side.
    ///
    /// The crossing is extrapolated from the two samples at `ld`; if an
    /// actual sign change sits within the mirrored window after it, that
    /// is used instead.
    fn emit_to_none(&mut self, ld: usize, i: usize) -> bool {
        let s = self.samples;
        let zero = if ld + 1 < s.len() {
            let y1 = s[ld] as f64;
            let y2 = s[ld + 1] as f64;
            let mut zc = if y1 == y2 {
                ld as f64
            } else {
                ld as f64 + intersect_x_axis(y1, y2)
            };
            zc = zc.clamp(ld as f64, i as f64);

            let limit = i.min((zc + (zc - ld as f64)).floor() as usize);
            for k in ld..limit {
                if k + 1 >= s.len() {
                    break;
                }
                if (s[k] < 0) != (s[k + 1] < 0) {
                    zc = k as f64 + intersect_x_axis(s[k] as f64, s[k + 1] as f64);
                    break;
                }
            }
            zc
        } else {
            i as f64
        };
        self.cur = Edge {
            kind: EdgeType::None,
            index: i,
            zero: zero.max(self.prev.zero).min(i as f64),
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Alternating half-waves of the given width, starting high.
    fn square_wave(half_width: usize, amplitude: i32, half_cycles: usize) -> Vec<i32> {
        let mut out = Vec::with_capacity(half_width * half_cycles);
        for h in 0..half_cycles {
            let v = if h % 2 == 0 { amplitude } else { -amplitude };
            out.extend(std::iter::repeat(v).take(half_width));
        }
        out
    }

    #[test]
    fn test_intersect_x_axis_contract() {
        for &(y1, y2) in &[(1.0, -1.0), (100.0, -50.0), (3.0, -900.0)] {
            let x = intersect_x_axis(y1, y2);
            assert!(x > 0.0 && x < 1.0, "intersect({y1}, {y2}) = {x}");
        }
        assert_eq!(intersect_x_axis(5.0, -5.0), 0.5);
    }

    #[test]
    fn test_empty_buffer_terminates_immediately() {
        let samples: Vec<i32> = Vec::new();
        let mut ed = EdgeDetect::new(&samples, 655);
        assert!(!ed.advance());
        assert_eq!(ed.cur.kind, EdgeType::None);
    }

    #[test]
    fn test_silence_terminates_without_edges() {
        let samples = vec![0; 500];
        let mut ed = EdgeDetect::new(&samples, 655);
        assert!(!ed.advance());
        assert_eq!(ed.cur.kind, EdgeType::None);
        assert_eq!(ed.cur.index, 500);
    }

    #[test]
    fn test_clean_square_wave_alternates() {
        let samples = square_wave(10, 16000, 40);
        let mut ed = EdgeDetect::new(&samples, 655);
        ed.max_crossing_time = 10;

        let mut edges = Vec::new();
        while ed.advance() {
            edges.push(ed.cur);
        }

        // One edge out of the leading none, then a transition per
        // half-wave, then the closing edge at the end of the data.
        let transitions: Vec<_> = edges
            .iter()
            .filter(|e| e.kind != EdgeType::None)
            .collect();
        assert_eq!(transitions.len(), 40);
        for pair in transitions.windows(2) {
            assert_ne!(pair[0].kind, pair[1].kind, "polarity did not alternate");
            let dist = pair[1].index - pair[0].index;
            assert!((9..=11).contains(&dist), "edge distance {dist}");
        }
    }

    #[test]
    fn test_interpolated_zero_halfway_on_full_swing() {
        // +A to -A between adjacent samples crosses exactly halfway.
        let samples = square_wave(10, 16000, 6);
        let mut ed = EdgeDetect::new(&samples, 655);
        ed.max_crossing_time = 10;

        assert!(ed.advance());
        assert!(ed.advance());
        assert_eq!(ed.cur.kind, EdgeType::ToLow);
        assert_eq!(ed.cur.index, 10);
        assert!((ed.cur.zero - 9.5).abs() < 1e-9, "zero = {}", ed.cur.zero);
    }

    #[test]
    fn test_to_none_after_trailing_silence() {
        let mut samples = square_wave(9, 10000, 10);
        samples.extend(std::iter::repeat(0).take(1000));
        let mut ed = EdgeDetect::new(&samples, 655);
        ed.max_crossing_time = 9;

        let mut transitions = 0;
        let mut nones = 0;
        while ed.advance() {
            match ed.cur.kind {
                EdgeType::None => nones += 1,
                _ => transitions += 1,
            }
        }
        assert_eq!(transitions, 10);
        assert_eq!(nones, 1, "expected exactly one closing edge to none");
        assert_eq!(ed.cur.kind, EdgeType::None);
    }

    #[test]
    fn test_signal_to_end_of_data_is_closed() {
        // A buffer ending mid-signal still gets a closing none edge, so
        // every high/low tail is bounded.
        let samples = square_wave(10, 16000, 5);
        let mut ed = EdgeDetect::new(&samples, 655);
        ed.max_crossing_time = 10;

        let mut last_true = None;
        while ed.advance() {
            last_true = Some(ed.cur);
        }
        assert_eq!(last_true.unwrap().kind, EdgeType::None);
    }

    #[test]
    fn test_monotonic_indices_and_zeros() {
        let mut samples = square_wave(10, 12000, 20);
        samples.extend(std::iter::repeat(0).take(50));
        samples.extend(square_wave(9, 9000, 11));
        let mut ed = EdgeDetect::new(&samples, 655);
        ed.max_crossing_time = 10;

        let mut prev: Option<Edge> = None;
        while ed.advance() {
            assert!(ed.prev.index <= ed.cur.index);
            assert!(ed.prev.zero <= ed.cur.zero + 0.5);
            if let Some(p) = prev {
                assert_eq!(p, ed.prev, "window did not shift by one edge");
            }
            prev = Some(ed.cur);
        }
    }

    #[test]
    fn test_noise_dips_on_same_side_are_ignored() {
        // A brief dip into the noise band that comes back out on the
        // same side must not produce an edge.
        let mut samples = vec![16000; 30];
        samples[10] = 100;
        samples[11] = 200;
        samples.extend(square_wave(10, 16000, 3).iter().map(|v| -v));
        let mut ed = EdgeDetect::new(&samples, 655);
        ed.max_crossing_time = 10;

        assert!(ed.advance());
        assert_eq!(ed.cur.kind, EdgeType::ToHigh);
        assert!(ed.advance());
        assert_eq!(ed.cur.kind, EdgeType::ToLow);
        assert_eq!(ed.cur.index, 30);
    }

    #[test]
    fn test_snapshot_restore_resumes_identically() {
        let samples = square_wave(10, 16000, 12);
        let mut ed = EdgeDetect::new(&samples, 655);
        ed.max_crossing_time = 10;
        assert!(ed.advance());

        let snapshot = ed;
        let mut peeked = Vec::new();
        for _ in 0..4 {
            assert!(ed.advance());
            peeked.push(ed.cur);
        }
        ed = snapshot;
        for e in peeked {
            assert!(ed.advance());
            assert_eq!(ed.cur, e);
        }
    }
}
