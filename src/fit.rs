//! Least-squares fitting of B-spline control points to a dense path.

use log::info;

use crate::{linspace, BSpline, DMatrixf64, PINV_EPS};

/// Returns the control points of a degree `degree` B-spline whose curve best fits `path`
///
/// The path rows are taken as samples at evenly spaced times over `[0, 1]`, and the spline
/// knots are built from `num_ctrl_points` evenly spaced waypoint times over the same interval.
/// With `start_duplicates` (`end_duplicates`) the first (last) two control points of the spline
/// are tied together, so the result can be handed to [`BSpline::set_ctrl_points`] with duplicates.
///
/// # Arguments
///
/// `path` - path samples, one per row
/// `num_ctrl_points` - number of waypoint times the knots are built from
/// `degree` - spline degree
/// `start_duplicates` - tie the first two control points
/// `end_duplicates` - tie the last two control points
///
/// # Examples
///
/// ```
/// use ctrlspline::{path_to_ctrl_points, DMatrixf64};
/// let path = DMatrixf64::from_fn(20, 1, |r, _| (r as f64 / 19.).powi(2));
/// let ctrl = path_to_ctrl_points(&path, 6, 3, true, true);
/// assert_eq!((6, 1), ctrl.shape());
/// ```
///
/// # Panics
///
/// If `path` or `num_ctrl_points` is empty, or the collocation matrix cannot be pseudo-inverted.
pub fn path_to_ctrl_points(
    path: &DMatrixf64,
    num_ctrl_points: usize,
    degree: usize,
    start_duplicates: bool,
    end_duplicates: bool,
) -> DMatrixf64 {
    if path.nrows() == 0 || num_ctrl_points == 0 {
        panic!("Cannot fit {} control points to a path of {} samples", num_ctrl_points, path.nrows());
    }

    info!("Fitting {} control points of a degree {} B-spline to {} path samples",
          num_ctrl_points, degree, path.nrows());

    let mut spline = BSpline::new();
    spline.set_knots(degree, &linspace(0., 1., num_ctrl_points));
    let bmatrix = spline.b_matrix(&linspace(0., 1., path.nrows()), start_duplicates, end_duplicates);

    let pinv = bmatrix.pseudo_inverse(PINV_EPS)
        .expect("Collocation matrix has no pseudo-inverse");
    pinv * path
}
