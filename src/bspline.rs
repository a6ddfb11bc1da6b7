//! Clamped B-splines: knot and control-point store, local evaluation and in-place mutation.

use log::{debug, info};
use std::fmt;
use std::fmt::Formatter;

use crate::basis::{clamped_knots, BasisTable, KnotWindow};
use crate::sparse::SparseJacobian;
use crate::{max_diff, DColVectorf64, DMatrixf64, DRowVectorf64, DOUBLE_KNOT_TOL, ZERO_WEIGHT_TOL};

/// How `append` treats the clamped tail of the current spline
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AppendMode {
    /// drop the trailing clamp duplicates before splicing the new waypoints in
    Inside,
    /// keep the trailing clamp duplicates and splice behind them
    Tail,
}

/// What a single B-spline evaluation should compute
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EvalRequest {
    /// highest time derivative, 0 (position), 1 (velocity) or 2 (acceleration)
    pub derivative: usize,
    /// Jacobian of the position with respect to the control points
    pub jac_points: bool,
    /// Jacobian of the position with respect to the knot times
    pub jac_times: bool,
}

impl EvalRequest {
    pub fn new(derivative: usize) -> EvalRequest {
        EvalRequest { derivative, jac_points: false, jac_times: false }
    }

    /// Requests both Jacobians on top of the time derivatives
    pub fn with_jacobians(self) -> EvalRequest {
        EvalRequest { jac_points: true, jac_times: true, ..self }
    }
}

/// Result of a B-spline evaluation at a single time
///
/// The control-point Jacobian has one row per output dimension and one column per control point
/// coordinate, column `j * dim + i` belonging to coordinate `i` of control point `j`. The knot-time
/// Jacobian has one column per knot.
#[derive(Debug, Clone)]
pub struct BSplineState {
    pub pos: DColVectorf64,
    pub vel: Option<DColVectorf64>,
    pub acc: Option<DColVectorf64>,
    pub jac_points: Option<SparseJacobian>,
    pub jac_times: Option<SparseJacobian>,
}

impl BSplineState {
    fn zeros(dim: usize, num_ctrl: usize, num_knots: usize, request: &EvalRequest) -> BSplineState {
        BSplineState {
            pos: DColVectorf64::zeros(dim),
            vel: (request.derivative >= 1).then(|| DColVectorf64::zeros(dim)),
            acc: (request.derivative >= 2).then(|| DColVectorf64::zeros(dim)),
            jac_points: request.jac_points.then(|| SparseJacobian::new(dim, num_ctrl * dim)),
            jac_times: request.jac_times.then(|| SparseJacobian::new(dim, num_knots)),
        }
    }
}

/// A clamped B-spline of fixed degree
///
/// The spline owns its knot vector and its control points, one control point per matrix row. The
/// invariant `control points == knots - degree - 1` holds after every structural change.
#[derive(Debug, Clone)]
pub struct BSpline {
    degree: usize,
    knots: Vec<f64>,
    ctrl_points: DMatrixf64,
}

impl BSpline {
    /// Returns an empty spline; it has to be `set` before it can be evaluated
    pub fn new() -> BSpline {
        BSpline {
            degree: 0,
            knots: Vec::new(),
            ctrl_points: DMatrixf64::zeros(0, 0),
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn ctrl_points(&self) -> &DMatrixf64 {
        &self.ctrl_points
    }

    pub fn num_ctrl_points(&self) -> usize {
        self.ctrl_points.nrows()
    }

    /// Dimension of the curve output
    pub fn dim(&self) -> usize {
        self.ctrl_points.ncols()
    }

    pub fn begin_time(&self) -> Option<f64> {
        self.knots.first().copied()
    }

    pub fn end_time(&self) -> Option<f64> {
        self.knots.last().copied()
    }

    /// Empties knots and control points
    pub fn clear(&mut self) {
        self.knots.clear();
        self.ctrl_points = DMatrixf64::zeros(0, 0);
    }

    /// Builds the clamped knot vector for waypoints at `times`, see [`clamped_knots`]
    pub fn set_knots(&mut self, degree: usize, times: &[f64]) {
        self.degree = degree;
        self.knots = clamped_knots(degree, times);
    }

    /// Sets the control points, optionally padding both ends with `degree / 2` duplicates of the
    /// first/last point and imposing start/end velocities on the duplicated pairs
    ///
    /// # Arguments
    ///
    /// `points` - control points, one per row
    /// `add_start_duplicates` - prepend copies of the first point
    /// `add_end_duplicates` - append copies of the last point
    /// `start_vel` - velocity at the first knot, see [`BSpline::set_double_knot_vel`]
    /// `end_vel` - velocity at the last knot
    ///
    /// # Panics
    ///
    /// If no knots are set or the resulting number of control points does not match the knots.
    pub fn set_ctrl_points(
        &mut self,
        points: &DMatrixf64,
        add_start_duplicates: bool,
        add_end_duplicates: bool,
        start_vel: Option<&DColVectorf64>,
        end_vel: Option<&DColVectorf64>,
    ) {
        if self.knots.is_empty() {
            panic!("Need to set knots first");
        }
        if points.nrows() == 0 {
            panic!("At least 1 control point is required");
        }

        let pad = self.degree / 2;
        let mut rows = Vec::with_capacity(points.nrows() + 2 * pad);
        if add_start_duplicates {
            rows.extend((0..pad).map(|_| points.row(0).into_owned()));
        }
        rows.extend(to_rows(points));
        if add_end_duplicates {
            rows.extend((0..pad).map(|_| points.row(points.nrows() - 1).into_owned()));
        }
        self.ctrl_points = DMatrixf64::from_rows(&rows);
        self.check_invariant();

        if let Some(vel) = start_vel {
            self.set_double_knot_vel(-1, vel);
        }
        if let Some(vel) = end_vel {
            self.set_double_knot_vel(points.nrows() as isize - 1, vel);
        }
    }

    /// Overwrites the values of all control points, keeping the structure
    ///
    /// # Panics
    ///
    /// If the shape of `points` differs from the stored control points.
    pub fn update_ctrl_points(&mut self, points: &DMatrixf64) {
        if points.shape() != self.ctrl_points.shape() {
            panic!("Control points of shape {:?} cannot replace control points of shape {:?}",
                   points.shape(), self.ctrl_points.shape());
        }
        self.ctrl_points.copy_from(points);
    }

    /// Builds the spline through the given waypoints
    ///
    /// # Arguments
    ///
    /// `degree` - spline degree
    /// `points` - waypoints, one per row
    /// `times` - waypoint times, strictly ascending
    /// `start_vel` - optional velocity at the first waypoint (degree 2 and 3 only)
    /// `end_vel` - optional velocity at the last waypoint (degree 2 and 3 only)
    ///
    /// # Examples
    ///
    /// ```
    /// use ctrlspline::{BSpline, DMatrixf64};
    /// let points = DMatrixf64::from_row_slice(3, 1, &[0., 1., 4.]);
    /// let mut spline = BSpline::new();
    /// spline.set(2, &points, &[0., 1., 2.], None, None);
    /// assert_eq!(5, spline.num_ctrl_points());
    /// ```
    pub fn set(
        &mut self,
        degree: usize,
        points: &DMatrixf64,
        times: &[f64],
        start_vel: Option<&DColVectorf64>,
        end_vel: Option<&DColVectorf64>,
    ) -> &mut BSpline {
        if points.nrows() != times.len() {
            panic!("Got {} waypoints but {} times", points.nrows(), times.len());
        }

        info!("Setting degree {} B-spline through {} waypoints", degree, times.len());

        self.set_knots(degree, times);
        self.set_ctrl_points(points, true, true, start_vel, end_vel);

        debug!("B-spline has {} knots and {} control points", self.knots.len(), self.ctrl_points.nrows());
        self
    }

    /// Replaces the spline after `time_cut` with one that departs from the state at `time_cut`
    /// with matching position and velocity and then runs through `points`
    ///
    /// # Arguments
    ///
    /// `points` - new waypoints, one per row
    /// `times_rel` - waypoint times relative to `time_cut`, strictly positive and ascending
    /// `time_cut` - absolute time at which the new trajectory starts
    pub fn overwrite_smooth(&mut self, points: &DMatrixf64, times_rel: &[f64], time_cut: f64) {
        let cut = self.eval3(time_cut, EvalRequest::new(1));
        let vel = cut.vel.unwrap_or_else(|| DColVectorf64::zeros(self.dim()));

        info!("Overwriting B-spline from t={} with {} waypoints", time_cut, points.nrows());

        let mut rows = vec![cut.pos.transpose()];
        rows.extend(to_rows(points));
        let new_points = DMatrixf64::from_rows(&rows);

        let mut times = vec![time_cut];
        times.extend(times_rel.iter().map(|t| t + time_cut));

        self.set(self.degree, &new_points, &times, Some(&vel), None);
    }

    /// Evaluates the spline at time `t`
    ///
    /// Before the first knot the first control point is returned with zero velocity and
    /// acceleration; at or after the last knot the same holds for the last control point. Inside the
    /// domain only the `2 * degree + 1` knots around `t` take part in the basis recursion.
    ///
    /// # Panics
    ///
    /// If knots or control points are missing, a derivative beyond acceleration is requested, or a basis weight for
    /// a control point outside of the stored ones is not (near) zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use ctrlspline::{BSpline, DMatrixf64, EvalRequest};
    /// let points = DMatrixf64::from_row_slice(4, 1, &[0., 1., 4., 9.]);
    /// let mut spline = BSpline::new();
    /// spline.set(3, &points, &[0., 1., 2., 3.], None, None);
    /// let state = spline.eval3(1.5, EvalRequest::new(1).with_jacobians());
    /// assert!((state.pos[0] - 2.625).abs() < 1e-12);
    /// assert_eq!((1, 6), state.jac_points.unwrap().to_dense().shape());
    /// ```
    pub fn eval3(&self, t: f64, request: EvalRequest) -> BSplineState {
        if self.knots.is_empty() {
            panic!("Need to set knots first");
        }
        if self.ctrl_points.nrows() == 0 {
            panic!("Need to set control points first");
        }
        if request.derivative > 2 {
            panic!("B-spline derivative of order {} is not implemented", request.derivative);
        }

        let dim = self.dim();
        let num_ctrl = self.ctrl_points.nrows();
        let mut state = BSplineState::zeros(dim, num_ctrl, self.knots.len(), &request);

        // clamped extrapolation
        let last_knot = self.knots[self.knots.len() - 1];
        if t < self.knots[0] || t >= last_knot {
            let row = if t < self.knots[0] { 0 } else { num_ctrl - 1 };
            state.pos.copy_from(&self.ctrl_points.row(row).transpose());
            if let Some(jac) = state.jac_points.as_mut() {
                for i in 0..dim {
                    jac.add(i, row * dim + i, 1.);
                }
            }
            return state;
        }

        let center = self.knots.partition_point(|&k| k <= t) - 1;
        let window = KnotWindow::around(center, self.degree, self.knots.len());
        let table = BasisTable::compute(window.slice(&self.knots), self.degree, t, request.derivative, request.jac_times);

        for j in 0..table.rows() {
            let b = table.value(j);
            let row = window.start + j;
            if row >= num_ctrl {
                if b.abs() > ZERO_WEIGHT_TOL {
                    panic!("Basis weight {} for control point {} but only {} control points are stored", b, row, num_ctrl);
                }
                continue;
            }

            let point = self.ctrl_points.row(row);
            for i in 0..dim {
                state.pos[i] += b * point[i];
            }
            if let Some(vel) = state.vel.as_mut() {
                let bd = table.first_derivative(j);
                for i in 0..dim {
                    vel[i] += bd * point[i];
                }
            }
            if let Some(acc) = state.acc.as_mut() {
                let bdd = table.second_derivative(j);
                for i in 0..dim {
                    acc[i] += bdd * point[i];
                }
            }
            if let Some(jac) = state.jac_points.as_mut() {
                for i in 0..dim {
                    jac.add(i, row * dim + i, b);
                }
            }
            if let Some(jac) = state.jac_times.as_mut() {
                for (k, &db) in table.knot_jacobian(j).iter().enumerate() {
                    if db == 0. {
                        continue;
                    }
                    for i in 0..dim {
                        jac.add(i, window.start + k, point[i] * db);
                    }
                }
            }
        }

        state
    }

    /// Returns position (0), velocity (1) or acceleration (2) at time `t`
    pub fn eval(&self, t: f64, derivative: usize) -> DColVectorf64 {
        let state = self.eval3(t, EvalRequest::new(derivative));
        match derivative {
            0 => state.pos,
            1 => state.vel.unwrap_or_else(|| DColVectorf64::zeros(self.dim())),
            _ => state.acc.unwrap_or_else(|| DColVectorf64::zeros(self.dim())),
        }
    }

    /// Evaluates each of `times` independently, one result per row
    pub fn eval_batch(&self, times: &[f64], derivative: usize) -> DMatrixf64 {
        let mut values = DMatrixf64::zeros(times.len(), self.dim());
        for (r, &t) in times.iter().enumerate() {
            values.set_row(r, &self.eval(t, derivative).transpose());
        }
        values
    }

    /// Returns the collocation matrix: one row per sample time, one column per control point
    ///
    /// With `start_duplicates` the first column is folded into the second and removed, with
    /// `end_duplicates` the last column is folded into the one before it. This removes the degree
    /// of freedom that duplicated boundary control points share.
    ///
    /// # Panics
    ///
    /// If no knots are set.
    pub fn b_matrix(&self, sample_times: &[f64], start_duplicates: bool, end_duplicates: bool) -> DMatrixf64 {
        if self.knots.is_empty() {
            panic!("Need to set knots first");
        }

        let num_ctrl = self.knots.len() - self.degree - 1;
        let mut bmatrix = DMatrixf64::zeros(sample_times.len(), num_ctrl);
        for (r, &t) in sample_times.iter().enumerate() {
            let table = BasisTable::compute(&self.knots, self.degree, t, 0, false);
            for i in 0..num_ctrl {
                bmatrix[(r, i)] = table.value(i);
            }
        }

        if start_duplicates && bmatrix.ncols() > 1 {
            for r in 0..bmatrix.nrows() {
                bmatrix[(r, 1)] += bmatrix[(r, 0)];
            }
            bmatrix = bmatrix.remove_column(0);
        }
        if end_duplicates && bmatrix.ncols() > 1 {
            let last = bmatrix.ncols() - 1;
            for r in 0..bmatrix.nrows() {
                bmatrix[(r, last - 1)] += bmatrix[(r, last)];
            }
            bmatrix = bmatrix.remove_column(last);
        }
        bmatrix
    }

    /// Appends waypoints at times relative to the current end
    ///
    /// A first relative time of 0 splices the new waypoints in with a double knot at the current
    /// end; in that case the first new waypoint has to equal the current last control point.
    ///
    /// Position and velocity at the old end time are kept in `Tail` mode for degree 2 and up, and
    /// in `Inside` mode for odd degrees above 1. In `Inside` mode even degrees move the spliced
    /// knot onto the midpoint with its predecessor, so the curve shifts near the old end. Degree 1
    /// keeps the position but takes the velocity of the first new segment.
    ///
    /// # Arguments
    ///
    /// `points` - new waypoints, one per row
    /// `times_rel` - times relative to the current end, ascending with `times_rel[0] >= 0`
    /// `mode` - whether the current clamped tail is dropped or kept
    ///
    /// # Panics
    ///
    /// On mismatched inputs, negative relative times, or a non-matching splice point.
    pub fn append(&mut self, points: &DMatrixf64, times_rel: &[f64], mode: AppendMode) {
        if self.knots.is_empty() {
            panic!("Need to set knots first");
        }
        if points.nrows() != times_rel.len() || times_rel.is_empty() {
            panic!("Got {} waypoints but {} times", points.nrows(), times_rel.len());
        }
        if points.ncols() != self.dim() {
            panic!("Cannot append {}-dimensional waypoints to a {}-dimensional spline", points.ncols(), self.dim());
        }
        if times_rel[0] < 0. {
            panic!("Append needs relative times with times_rel[0] >= 0, got {}", times_rel[0]);
        }
        let last_row = self.ctrl_points.nrows() - 1;
        if times_rel[0] == 0. && max_diff(self.ctrl_points.row(last_row).iter(), points.row(0).iter()) > DOUBLE_KNOT_TOL {
            panic!("When appending with times_rel[0] = 0 the first waypoint needs to equal the last control point");
        }

        info!("Appending {} waypoints to B-spline ({:?})", points.nrows(), mode);

        let degree = self.degree;
        let pad = degree / 2;
        let end = self.knots[self.knots.len() - 1];

        // remove tails
        let mut rows = to_rows(&self.ctrl_points);
        match mode {
            AppendMode::Inside => {
                rows.truncate(rows.len() - pad);
                self.knots.truncate(self.knots.len() - 1 - 2 * pad);
            }
            AppendMode::Tail => {
                self.knots.truncate(self.knots.len() - 1 - pad);
            }
        }

        // splice in the new waypoints
        rows.extend(to_rows(points));
        self.knots.extend(times_rel.iter().map(|t| t + end));
        if degree % 2 == 0 {
            let tmp = self.knots.clone();
            let n = self.knots.len();
            for i in (n - times_rel.len()..n).rev() {
                self.knots[i] = 0.5 * (tmp[i - 1] + tmp[i]);
            }
        }

        // new clamped tail
        let new_end = times_rel[times_rel.len() - 1] + end;
        rows.extend((0..pad).map(|_| points.row(points.nrows() - 1).into_owned()));
        self.knots.extend(std::iter::repeat(new_end).take(1 + 2 * pad));

        self.ctrl_points = DMatrixf64::from_rows(&rows);
        self.check_invariant();

        debug!("B-spline has {} knots and {} control points", self.knots.len(), self.ctrl_points.nrows());
    }

    /// Returns the control points without the duplicated boundary points
    pub fn points(&self) -> DMatrixf64 {
        let pad = self.degree / 2;
        let rows = self.ctrl_points.nrows();
        if rows < 2 * pad {
            return DMatrixf64::zeros(0, self.dim());
        }
        self.ctrl_points.rows(pad, rows - 2 * pad).into_owned()
    }

    /// Doubles the knot of waypoint `t`, splitting its control point into an identical pair
    ///
    /// The pair sits at control point rows `t + degree / 2` and `t + degree / 2 + 1`, which is the
    /// pair [`BSpline::set_double_knot_vel`] works on for the same `t`.
    ///
    /// # Panics
    ///
    /// If `t` does not address an existing control point and knot.
    pub fn double_knot(&mut self, t: usize) {
        let row = t + self.degree / 2;
        let knot = t + self.degree;
        if row >= self.ctrl_points.nrows() || knot >= self.knots.len() {
            panic!("Cannot double the knot of waypoint {} in a spline with {} control points", t, self.ctrl_points.nrows());
        }

        let mut rows = to_rows(&self.ctrl_points);
        rows.insert(row + 1, rows[row].clone());
        self.ctrl_points = DMatrixf64::from_rows(&rows);
        self.knots.insert(knot + 1, self.knots[knot]);
        self.check_invariant();
    }

    /// Moves the identical control point pair at rows `t + degree / 2` and `t + degree / 2 + 1`
    /// apart so that the velocity at their double knot equals `vel`
    ///
    /// `t = -1` addresses the duplicated start point, `t = waypoints - 1` the duplicated end point.
    ///
    /// # Panics
    ///
    /// If the pair is not identical, or the degree is neither 2 nor 3 (not implemented).
    pub fn set_double_knot_vel(&mut self, t: isize, vel: &DColVectorf64) {
        let degree = self.degree;
        if degree != 2 && degree != 3 {
            panic!("Double knot velocity is only implemented for degree 2 and 3, not {}", degree);
        }
        if vel.len() != self.dim() {
            panic!("Got a {}-dimensional velocity for a {}-dimensional spline", vel.len(), self.dim());
        }

        let a = t + (degree / 2) as isize;
        if a < 0 || a as usize + 1 >= self.ctrl_points.nrows() {
            panic!("No control point pair for waypoint {}", t);
        }
        let a = a as usize;
        if max_diff(self.ctrl_points.row(a).iter(), self.ctrl_points.row(a + 1).iter()) >= DOUBLE_KNOT_TOL {
            panic!("Control points {} and {} are not a double knot", a, a + 1);
        }

        let knot = |k: isize| self.knots[k as usize];
        let (before, after) = if degree == 2 {
            (knot(t + 3) - knot(t + 2), knot(t + 4) - knot(t + 3))
        } else {
            (knot(t + 3) - knot(t + 2), knot(t + 5) - knot(t + 4))
        };

        let scale = 1. / degree as f64;
        for i in 0..self.dim() {
            self.ctrl_points[(a, i)] -= vel[i] * scale * before;
            self.ctrl_points[(a + 1, i)] += vel[i] * scale * after;
        }
    }

    fn check_invariant(&self) {
        if self.ctrl_points.nrows() + self.degree + 1 != self.knots.len() {
            panic!("{} control points do not match {} knots of a degree {} spline",
                   self.ctrl_points.nrows(), self.knots.len(), self.degree);
        }
    }
}

impl Default for BSpline {
    fn default() -> BSpline {
        BSpline::new()
    }
}

impl fmt::Display for BSpline {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BSpline(degree: {}, knots: {}, ctrl points: {}x{})",
               self.degree, self.knots.len(), self.ctrl_points.nrows(), self.ctrl_points.ncols())
    }
}

fn to_rows(m: &DMatrixf64) -> Vec<DRowVectorf64> {
    m.row_iter().map(|r| r.into_owned()).collect()
}
