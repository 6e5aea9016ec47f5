//! # Runtime Curves
//!
//! An [`InternalCurve`] anchored at a point `(x, y)` of (time, bytes served)
//! space. Each class keeps one per configured curve kind: the deadline and
//! eligible curves for real-time service, the virtual curve for link-sharing
//! and the upper-limit curve for rate caps.
//!
//! When a class becomes backlogged again the new curve starting at
//! `(now, served)` is merged with the old one by pointwise minimum
//! ([`RuntimeCurve::compose_min`]). A class that was idle therefore cannot
//! claim more than its curve would have given it had it stayed backlogged.

use crate::curve::{seg_x2y, seg_y2x, slope_to_inverse, InternalCurve, SM_SHIFT};

/// Anchored, evaluable two-segment curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeCurve {
    /// Anchor time.
    pub x: u64,
    /// Anchor bytes.
    pub y: u64,
    pub sm1: u64,
    pub ism1: u64,
    /// First-segment length from the anchor.
    pub dx: u64,
    /// First-segment height from the anchor.
    pub dy: u64,
    pub sm2: u64,
    pub ism2: u64,
}

impl RuntimeCurve {
    /// Start `ic` at `(x, y)`.
    pub fn anchor(ic: &InternalCurve, x: u64, y: u64) -> Self {
        RuntimeCurve {
            x,
            y,
            sm1: ic.sm1,
            ism1: ic.ism1,
            dx: ic.dx,
            dy: ic.dy,
            sm2: ic.sm2,
            ism2: ic.ism2,
        }
    }

    /// Bytes guaranteed by time `x`.
    pub fn x2y(&self, x: u64) -> u64 {
        if x <= self.x {
            self.y
        } else if x <= self.x.saturating_add(self.dx) {
            self.y.saturating_add(seg_x2y(x - self.x, self.sm1))
        } else {
            self.y
                .saturating_add(self.dy)
                .saturating_add(seg_x2y(x - self.x - self.dx, self.sm2))
        }
    }

    /// Time by which `y` bytes are guaranteed.
    pub fn y2x(&self, y: u64) -> u64 {
        let burst_end = self.x.saturating_add(self.dx);
        if y < self.y {
            self.x
        } else if y <= self.y.saturating_add(self.dy) {
            if self.dy == 0 {
                burst_end
            } else {
                // the inverse slope is rounded up; never past the segment end
                self.x
                    .saturating_add(seg_y2x(y - self.y, self.ism1))
                    .min(burst_end)
            }
        } else {
            burst_end.saturating_add(seg_y2x(y - self.y - self.dy, self.ism2))
        }
    }

    /// Whether the running curve is convex, judged by its own slopes.
    pub fn is_convex(&self) -> bool {
        self.sm1 <= self.sm2
    }

    /// Drop the first segment so the curve runs at the sustained slope
    /// straight from the anchor.
    pub fn flatten_first_segment(&mut self) {
        self.dx = 0;
        self.dy = 0;
    }

    /// Replace `self` by the pointwise minimum of `self` and `ic` anchored at
    /// `(x, y)`, for every time at or after `x`.
    ///
    /// When the running curve is `ic` itself, as it is every time a class
    /// becomes backlogged again, the comparison at `x` (convex) or at `x` and
    /// `x + dx` (concave) decides between keeping, replacing and
    /// intersecting. Otherwise, after a curve change or a shortened burst,
    /// the lower envelope of both curves is built instead.
    pub fn compose_min(&mut self, ic: &InternalCurve, x: u64, y: u64) {
        let same_shape = self.sm1 == ic.sm1 && self.sm2 == ic.sm2 && self.dx == ic.dx;
        if same_shape {
            self.compose_min_same_shape(ic, x, y);
        } else {
            self.compose_min_envelope(ic, x, y);
        }
    }

    fn compose_min_same_shape(&mut self, ic: &InternalCurve, x: u64, y: u64) {
        if ic.is_convex() {
            // a convex curve started later never overtakes one started earlier
            if self.x2y(x) < y {
                return;
            }
            *self = RuntimeCurve::anchor(ic, x, y);
            return;
        }

        // concave: compare at the start and at the end of the new burst
        let y1 = self.x2y(x);
        if y1 <= y {
            return;
        }
        let y2 = self.x2y(x.saturating_add(ic.dx));
        if y2 >= y.saturating_add(ic.dy) {
            *self = RuntimeCurve::anchor(ic, x, y);
            return;
        }

        // the curves cross inside the new burst segment:
        //   seg_x2y(dx, sm1) == seg_x2y(dx, sm2) + (y1 - y)
        let dsm = u128::from(ic.sm1 - ic.sm2);
        let mut dx = u64::try_from((u128::from(y1 - y) << SM_SHIFT) / dsm).unwrap_or(u64::MAX);
        // (x, y1) still on our own first segment: the crossing is pushed out
        // by what remains of it
        let own_burst_end = self.x.saturating_add(self.dx);
        if own_burst_end > x {
            dx = dx.saturating_add(own_burst_end - x);
        }

        *self = RuntimeCurve {
            x,
            y,
            dx,
            dy: seg_x2y(dx, ic.sm1),
            ..RuntimeCurve::anchor(ic, x, y)
        };
    }

    /// Lower envelope of `self` and `ic` anchored at `(x, y)`.
    ///
    /// The envelope is traced exactly as a polyline. When it has more than
    /// two segments the result is a two-segment curve below it: the first
    /// envelope segment followed by the smallest later slope when that is
    /// also the sustained slope, else the best line pair that ends on the
    /// sustained slope.
    fn compose_min_envelope(&mut self, ic: &InternalCurve, x: u64, y: u64) {
        if x < self.x {
            // callers only merge at or after the anchor
            return;
        }
        let old = Tail::of_runtime(self, x);
        let new = Tail::of_internal(ic, y);
        let envelope = Envelope::trace(&old, &new);
        if !envelope.uses_new {
            return;
        }
        *self = envelope.to_runtime(x);
    }
}

// ─── Lower envelope ─────────────────────────────────────────────────────────

/// Scaled bytes: `bytes << SM_SHIFT`, exact under slope arithmetic.
fn scaled(bytes: u64) -> i128 {
    i128::from(bytes) << SM_SHIFT
}

/// A curve seen from some point on: value there, slope `sm1` for `dx` more
/// ticks, then `sm2`.
#[derive(Debug, Clone, Copy)]
struct Tail {
    y: i128,
    sm1: u64,
    ism1: u64,
    dx: u64,
    sm2: u64,
    ism2: u64,
}

impl Tail {
    /// The running curve from `x` on, starting at its evaluated (floored)
    /// value so the tail never lies above it.
    fn of_runtime(rc: &RuntimeCurve, x: u64) -> Self {
        let elapsed = x - rc.x;
        let (sm1, ism1, dx) = if elapsed < rc.dx {
            (rc.sm1, rc.ism1, rc.dx - elapsed)
        } else {
            (rc.sm2, rc.ism2, 0)
        };
        Tail {
            y: scaled(rc.x2y(x)),
            sm1,
            ism1,
            dx,
            sm2: rc.sm2,
            ism2: rc.ism2,
        }
    }

    fn of_internal(ic: &InternalCurve, y: u64) -> Self {
        Tail {
            y: scaled(y),
            sm1: ic.sm1,
            ism1: ic.ism1,
            dx: ic.dx,
            sm2: ic.sm2,
            ism2: ic.ism2,
        }
    }

    fn at(&self, u: u64) -> i128 {
        let first = u.min(self.dx);
        self.y
            + i128::from(self.sm1) * i128::from(first)
            + i128::from(self.sm2) * i128::from(u - first)
    }

    fn slope_at(&self, u: u64) -> (u64, u64) {
        if u < self.dx {
            (self.sm1, self.ism1)
        } else {
            (self.sm2, self.ism2)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Piece {
    /// Offset from the anchor.
    start: u64,
    sm: u64,
    ism: u64,
}

/// Polyline no higher than either curve, following whichever is lower.
#[derive(Debug)]
struct Envelope {
    y: i128,
    pieces: Vec<Piece>,
    /// Some piece follows the new curve.
    uses_new: bool,
}

impl Envelope {
    fn trace(old: &Tail, new: &Tail) -> Self {
        let mut env = Envelope {
            y: old.y.min(new.y),
            pieces: Vec::with_capacity(4),
            uses_new: false,
        };

        let mut bounds = [0, old.dx, new.dx, u64::MAX];
        bounds.sort_unstable();
        for w in bounds.windows(2) {
            let (u0, u1) = (w[0], w[1]);
            if u0 == u1 {
                continue;
            }
            let (vo, vn) = (old.at(u0), new.at(u0));
            let (so, io) = old.slope_at(u0);
            let (sn, isn) = new.slope_at(u0);
            // ties go to the smaller slope, then to the running curve
            let new_lower = vn < vo || (vn == vo && sn < so);
            let (low, up) = if new_lower {
                ((sn, isn, vn), (so, io, vo))
            } else {
                ((so, io, vo), (sn, isn, vn))
            };
            env.push(u0, low.0, low.1, new_lower);

            if up.0 < low.0 {
                // the lower curve catches up with the upper one; switch at
                // the last whole tick before they meet
                let gap = up.2 - low.2;
                let cross = i128::from(u0) + gap / (i128::from(low.0) - i128::from(up.0));
                if cross < i128::from(u1) {
                    env.push(cross as u64, up.0, up.1, !new_lower);
                }
            }
        }
        env
    }

    fn push(&mut self, start: u64, sm: u64, ism: u64, from_new: bool) {
        self.uses_new |= from_new;
        if let Some(last) = self.pieces.last_mut() {
            if last.start == start {
                *last = Piece { start, sm, ism };
                let n = self.pieces.len();
                if n >= 2 && self.pieces[n - 2].sm == sm {
                    self.pieces.pop();
                }
                return;
            }
            if last.sm == sm {
                return;
            }
        }
        self.pieces.push(Piece { start, sm, ism });
    }

    /// Polyline value at the start of piece `i`.
    fn value_at(&self, i: usize) -> i128 {
        let mut v = self.y;
        for w in self.pieces[..=i].windows(2) {
            v += i128::from(w[0].sm) * i128::from(w[1].start - w[0].start);
        }
        v
    }

    fn to_runtime(&self, x: u64) -> RuntimeCurve {
        let y = (self.y >> SM_SHIFT) as u64;
        let first = self.pieces[0];
        let last = self.pieces[self.pieces.len() - 1];
        let two = |sm1: u64, ism1: u64, dx: u64, sm2: u64, ism2: u64| RuntimeCurve {
            x,
            y,
            sm1,
            ism1,
            dx,
            dy: seg_x2y(dx, sm1),
            sm2,
            ism2,
        };

        match self.pieces.len() {
            1 => two(first.sm, first.ism, 0, first.sm, first.ism),
            2 => two(first.sm, first.ism, last.start, last.sm, last.ism),
            _ => {
                let rest = self.pieces[1..]
                    .iter()
                    .min_by_key(|p| p.sm)
                    .copied()
                    .unwrap_or(last);
                if rest.sm == last.sm {
                    return two(first.sm, first.ism, self.pieces[1].start, last.sm, last.ism);
                }

                // line of the sustained slope under every vertex, and the
                // steepest line from the anchor under every vertex
                let t = i128::from(last.sm);
                let mut floor = self.y;
                let mut lift = t;
                for i in 1..self.pieces.len() {
                    let u = i128::from(self.pieces[i].start);
                    let v = self.value_at(i);
                    floor = floor.min(v - t * u);
                    lift = lift.min((v - self.y) / u);
                }
                if floor >= self.y {
                    return two(last.sm, last.ism, 0, last.sm, last.ism);
                }
                let dx = ((self.y - floor) as u128).div_ceil((t - lift) as u128);
                let dx = u64::try_from(dx).unwrap_or(u64::MAX);
                let lift = lift as u64;
                two(lift, slope_to_inverse(lift), dx, last.sm, last.ism)
            }
        }
    }
}
