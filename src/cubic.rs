//! Cubic Hermite pieces and piecewise cubic splines.

use log::info;
use std::fmt;
use std::fmt::Formatter;

use crate::{DColVectorf64, DMatrixf64, BOUNDARY_VEL_TOL, MIN_APPEND_DURATION};

/// A cubic polynomial `a t^3 + b t^2 + c t + d` in local time `t` with vector coefficients
#[derive(Debug, Clone, PartialEq)]
pub struct CubicPiece {
    a: DColVectorf64,
    b: DColVectorf64,
    c: DColVectorf64,
    d: DColVectorf64,
}

impl CubicPiece {
    /// Returns the cubic running from `x0` with velocity `v0` to `x1` with velocity `v1` in time `tau`
    ///
    /// # Examples
    ///
    /// ```
    /// use ctrlspline::{CubicPiece, DColVectorf64};
    /// let x0 = DColVectorf64::from_vec(vec![0.]);
    /// let x1 = DColVectorf64::from_vec(vec![1.]);
    /// let v = DColVectorf64::zeros(1);
    /// let piece = CubicPiece::new(&x0, &v, &x1, &v, 2.);
    /// assert!((piece.eval(1., 0)[0] - 0.5).abs() < 1e-12);
    /// ```
    pub fn new(x0: &DColVectorf64, v0: &DColVectorf64, x1: &DColVectorf64, v1: &DColVectorf64, tau: f64) -> CubicPiece {
        let mut piece = CubicPiece {
            a: DColVectorf64::zeros(0),
            b: DColVectorf64::zeros(0),
            c: DColVectorf64::zeros(0),
            d: DColVectorf64::zeros(0),
        };
        piece.set(x0, v0, x1, v1, tau);
        piece
    }

    /// Recomputes the coefficients from the boundary state, see [`CubicPiece::new`]
    ///
    /// # Panics
    ///
    /// If `tau` is not positive or the boundary vectors differ in length.
    pub fn set(&mut self, x0: &DColVectorf64, v0: &DColVectorf64, x1: &DColVectorf64, v1: &DColVectorf64, tau: f64) {
        if tau <= 0. {
            panic!("Cubic piece duration must be positive, got {}", tau);
        }
        let n = x0.len();
        if v0.len() != n || x1.len() != n || v1.len() != n {
            panic!("Cubic piece boundary state has mismatched dimensions {}, {}, {}, {}",
                   n, v0.len(), x1.len(), v1.len());
        }

        let tau2 = tau * tau;
        let tau3 = tau * tau2;
        let delta = x1 - x0;
        self.d = x0.clone();
        self.c = v0.clone();
        self.b = (&delta * 3. - (v1 + v0 * 2.) * tau) / tau2;
        self.a = (&delta * -2. + (v1 + v0) * tau) / tau3;
    }

    pub fn dim(&self) -> usize {
        self.d.len()
    }

    /// Returns the coefficients ordered by power, `[d, c, b, a]`
    pub fn coeffs(&self) -> [&DColVectorf64; 4] {
        [&self.d, &self.c, &self.b, &self.a]
    }

    /// Returns position, velocity and acceleration at local time `t`
    pub fn eval3(&self, t: f64) -> (DColVectorf64, DColVectorf64, DColVectorf64) {
        let t2 = t * t;
        let t3 = t * t2;
        let pos = &self.d + &self.c * t + &self.b * t2 + &self.a * t3;
        let vel = &self.c + &self.b * (2. * t) + &self.a * (3. * t2);
        let acc = &self.b * 2. + &self.a * (6. * t);
        (pos, vel, acc)
    }

    /// Returns the `diff`-th time derivative at local time `t`
    ///
    /// The jerk (`diff == 3`) of a cubic is the constant `6 a`.
    ///
    /// # Panics
    ///
    /// If `diff > 3`.
    pub fn eval(&self, t: f64, diff: usize) -> DColVectorf64 {
        let t2 = t * t;
        let t3 = t * t2;
        match diff {
            0 => &self.d + &self.c * t + &self.b * t2 + &self.a * t3,
            1 => &self.c + &self.b * (2. * t) + &self.a * (3. * t2),
            2 => &self.b * 2. + &self.a * (6. * t),
            3 => &self.a * 6.,
            _ => panic!("Cubic piece derivative of order {} is not implemented", diff),
        }
    }
}

impl fmt::Display for CubicPiece {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CubicPiece(dim: {}, jerk: {:?})", self.dim(), (&self.a * 6.).as_slice())
    }
}

/// A sequence of cubic pieces over strictly increasing breakpoint times
///
/// Piece `k` is valid on `[times[k], times[k+1]]` in local time `t - times[k]`.
#[derive(Debug, Clone, Default)]
pub struct CubicSpline {
    pieces: Vec<CubicPiece>,
    times: Vec<f64>,
}

impl CubicSpline {
    pub fn new() -> CubicSpline {
        CubicSpline { pieces: Vec::new(), times: Vec::new() }
    }

    pub fn pieces(&self) -> &[CubicPiece] {
        &self.pieces
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn begin_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn end_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    /// Builds one cubic piece between every pair of consecutive waypoints
    ///
    /// # Arguments
    ///
    /// `pts` - waypoint positions, one per row
    /// `vels` - waypoint velocities, one per row
    /// `times` - waypoint times, strictly ascending
    ///
    /// # Examples
    ///
    /// ```
    /// use ctrlspline::{CubicSpline, DMatrixf64};
    /// let pts = DMatrixf64::from_row_slice(3, 1, &[0., 1., 0.]);
    /// let vels = DMatrixf64::zeros(3, 1);
    /// let mut spline = CubicSpline::new();
    /// spline.set(&pts, &vels, &[0., 1., 2.]);
    /// assert_eq!(2, spline.pieces().len());
    /// ```
    pub fn set(&mut self, pts: &DMatrixf64, vels: &DMatrixf64, times: &[f64]) {
        if times.len() < 2 {
            panic!("At least 2 times are required to set a cubic spline");
        }
        if pts.nrows() != times.len() || vels.shape() != pts.shape() {
            panic!("Got {} times for {} positions and {} velocities", times.len(), pts.nrows(), vels.nrows());
        }
        check_ascending(times);

        info!("Setting cubic spline through {} waypoints", times.len());

        self.times = times.to_vec();
        self.pieces = (0..times.len() - 1)
            .map(|k| {
                CubicPiece::new(&pts.row(k).transpose(), &vels.row(k).transpose(),
                                &pts.row(k + 1).transpose(), &vels.row(k + 1).transpose(),
                                times[k + 1] - times[k])
            })
            .collect();
    }

    /// Extends the spline with waypoints at times relative to the current end
    ///
    /// The first new piece starts from the position and velocity at the current end.
    ///
    /// # Panics
    ///
    /// If the spline is empty, the inputs mismatch, or `times_rel[0]` is not positive.
    pub fn append(&mut self, pts: &DMatrixf64, vels: &DMatrixf64, times_rel: &[f64]) {
        if self.pieces.is_empty() {
            panic!("A cubic spline must be set before appending");
        }
        if times_rel.is_empty() || pts.nrows() != times_rel.len() || vels.shape() != pts.shape() {
            panic!("Got {} times for {} positions and {} velocities", times_rel.len(), pts.nrows(), vels.nrows());
        }
        if times_rel[0] < MIN_APPEND_DURATION {
            panic!("For appending, the first relative time needs to be greater zero, got {}", times_rel[0]);
        }
        check_ascending(times_rel);

        info!("Appending {} waypoints to cubic spline", times_rel.len());

        // current end state
        let last = &self.pieces[self.pieces.len() - 1];
        let n = self.times.len();
        let (x, x_dot, _) = last.eval3(self.times[n - 1] - self.times[n - 2]);

        let end = self.times[n - 1];
        self.times.extend(times_rel.iter().map(|t| t + end));

        self.pieces.push(CubicPiece::new(&x, &x_dot, &pts.row(0).transpose(), &vels.row(0).transpose(), times_rel[0]));
        for k in 1..times_rel.len() {
            self.pieces.push(CubicPiece::new(&pts.row(k - 1).transpose(), &vels.row(k - 1).transpose(),
                                             &pts.row(k).transpose(), &vels.row(k).transpose(),
                                             times_rel[k] - times_rel[k - 1]));
        }
    }

    /// Returns the index of the piece to evaluate at time `t`, `None` if the spline is empty
    ///
    /// Times on a breakpoint belong to the piece ending there; times outside of the spline map to
    /// the first or last piece.
    pub fn get_piece(&self, t: f64) -> Option<usize> {
        if self.times.len() < 2 {
            return None;
        }
        let last = self.pieces.len() - 1;
        if t < self.times[0] {
            return Some(0);
        }
        if t > self.times[self.times.len() - 1] {
            return Some(last);
        }
        let k = self.times.partition_point(|&b| b < t);
        Some(k.saturating_sub(1).min(last))
    }

    /// Returns the `diff`-th time derivative at time `t`, up to jerk (`diff == 3`)
    ///
    /// Outside of the spline the boundary piece is evaluated at its own end. Acceleration is only
    /// defined there (as zero) if the boundary velocity is zero as well.
    ///
    /// # Panics
    ///
    /// If the spline is empty, `diff > 3`, or acceleration is requested outside of the spline while
    /// the boundary velocity is not zero.
    pub fn eval(&self, t: f64, diff: usize) -> DColVectorf64 {
        let k = self.get_piece(t)
            .expect("A cubic spline must be set first");

        if diff > 2 {
            return self.pieces[k].eval(t - self.times[k], diff);
        }

        let n = self.times.len();
        let outside = t < self.times[0] || t > self.times[n - 1];
        let local = if t < self.times[0] {
            0.
        } else if t > self.times[n - 1] {
            self.times[n - 1] - self.times[n - 2]
        } else {
            t - self.times[k]
        };

        let (pos, vel, acc) = self.pieces[k].eval3(local);
        match diff {
            0 => pos,
            1 => vel,
            _ if outside => {
                if vel.amax() > BOUNDARY_VEL_TOL {
                    panic!("Don't query the acceleration of a cubic spline at t={} outside of [{}, {}] with non-zero boundary velocity",
                           t, self.times[0], self.times[n - 1]);
                }
                DColVectorf64::zeros(acc.len())
            }
            _ => acc,
        }
    }

    /// Evaluates each of `times` independently, one result per row
    pub fn eval_batch(&self, times: &[f64], diff: usize) -> DMatrixf64 {
        let dim = self.pieces.first().map_or(0, |p| p.dim());
        let mut values = DMatrixf64::zeros(times.len(), dim);
        for (r, &t) in times.iter().enumerate() {
            values.set_row(r, &self.eval(t, diff).transpose());
        }
        values
    }
}

fn check_ascending(times: &[f64]) {
    for idx in 0..times.len().saturating_sub(1) {
        if times[idx + 1] <= times[idx] {
            panic!("Time at index {} is less than or equal to time at index {}", idx + 1, idx);
        }
    }
}
