/*!
# ctrlspline

**ctrlspline** turns discrete waypoints into differentiable trajectories for gradient based trajectory
optimization. It provides two spline engines:

* clamped B-splines of arbitrary integer degree, evaluated locally around the query time, with analytic
  Jacobians of the output with respect to the control points and the knot times
* piecewise cubic Hermite splines built from positions, velocities and times

plus closed-form kinematic bound features (leap cost, jerk, acceleration and velocity limits) over a single
cubic segment, with Jacobians with respect to the segment duration.

## Features
* clamped knot construction with the midpoint rule for even degrees
* Cox-de Boor recursion with first/second time derivatives and knot-position Jacobians
* collocation matrices and least-squares fitting of control points to a dense path
* appending waypoints, double knots with velocity constraints and smooth overwriting from a cut time
* cubic pieces and splines with position, velocity, acceleration and jerk queries

## Using **ctrlspline**

```
use ctrlspline::{BSpline, CubicSpline, DMatrixf64};

// waypoints are rows, one column per dimension
let points = DMatrixf64::from_row_slice(4, 2, &[0., 0.,
                                                1., 2.,
                                                4., 1.,
                                                9., 0.]);
let times = [0., 1., 2., 3.];

let mut spline = BSpline::new();
spline.set(3, &points, &times, None, None);
let pos = spline.eval(1.5, 0);
let vel = spline.eval(1.5, 1);
print!("Position at t=1.5 is {} with velocity {}", pos, vel);

// the same waypoints as a cubic Hermite spline at rest at every waypoint
let vels = DMatrixf64::zeros(4, 2);
let mut cubic = CubicSpline::new();
cubic.set(&points, &vels, &times);
let jerk = cubic.eval(0.5, 3);
```

Contract violations (evaluating an empty spline, mismatched dimensions, unimplemented degrees or derivative
orders) panic with a descriptive message. Degenerate but valid knot configurations, such as clamped ends and
doubled knots, are handled silently by the basis recursion.
 */

use nalgebra::{Dyn, Matrix, RowVector, U1, VecStorage, Vector};

pub mod basis;
pub mod bounds;
pub mod bspline;
pub mod cubic;
pub mod fit;
pub mod sparse;

pub use basis::{clamped_knots, BasisTable, KnotWindow};
pub use bounds::{Feature, Segment, SegmentSample};
pub use bspline::{AppendMode, BSpline, BSplineState, EvalRequest};
pub use cubic::{CubicPiece, CubicSpline};
pub use fit::path_to_ctrl_points;
pub use sparse::SparseJacobian;

// Define the dynamic matrices the splines work with
pub type DMatrixf64 = Matrix<f64, Dyn, Dyn, VecStorage<f64, Dyn, Dyn>>;
pub type DColVectorf64 = Vector<f64, Dyn, VecStorage<f64, Dyn, U1>>;
pub type DRowVectorf64 = RowVector<f64, Dyn, VecStorage<f64, U1, Dyn>>;

/// Largest difference between two control points that still counts as a double knot
pub const DOUBLE_KNOT_TOL: f64 = 1e-10;

/// Largest basis weight tolerated for a control point index outside of the stored points
pub const ZERO_WEIGHT_TOL: f64 = 1e-4;

/// Largest velocity for which a cubic spline may be asked for acceleration outside of its time range
pub const BOUNDARY_VEL_TOL: f64 = 1e-6;

/// Smallest first relative time accepted when appending to a cubic spline
pub const MIN_APPEND_DURATION: f64 = 1e-6;

/// Singular values below this are dropped by the pseudo-inverse of a collocation matrix
pub const PINV_EPS: f64 = 1e-10;

/// Returns the largest absolute element-wise difference of two equally sized vectors
pub(crate) fn max_diff<'a, I, J>(a: I, b: J) -> f64
where
    I: IntoIterator<Item = &'a f64>,
    J: IntoIterator<Item = &'a f64>,
{
    a.into_iter().zip(b).fold(0., |m, (x, y)| f64::max(m, (x - y).abs()))
}

/// Returns `n` evenly spaced values from `lo` to `hi`, both included
pub(crate) fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => (0..n).map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64).collect(),
    }
}
