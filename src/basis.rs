//! Knot vector construction and the Cox-de Boor basis recursion.

/// Builds the clamped knot vector for waypoints at `times`
///
/// The spline gets `times.len() + 2 * (degree / 2)` control points and `degree + 1` repeated knots
/// at both ends. For odd degrees the interior knots sit on the waypoint times, for even degrees on
/// the midpoints between consecutive waypoint times, which keeps the even-degree basis functions
/// centered on the waypoints.
///
/// # Arguments
///
/// `degree` - spline degree
/// `times` - waypoint times, strictly ascending
///
/// # Examples
///
/// ```
/// use ctrlspline::clamped_knots;
/// let knots = clamped_knots(3, &[0., 1., 2., 3.]);
/// assert_eq!(vec![0., 0., 0., 0., 1., 2., 3., 3., 3., 3.], knots);
/// ```
pub fn clamped_knots(degree: usize, times: &[f64]) -> Vec<f64> {
    if times.is_empty() {
        panic!("At least 1 waypoint time is required to build a knot vector");
    }
    for idx in 0..times.len() - 1 {
        if times[idx + 1] <= times[idx] {
            panic!("Time at index {} is less than or equal to time at index {}", idx + 1, idx);
        }
    }

    let num_ctrl = times.len() + 2 * (degree / 2);
    let num_knots = num_ctrl + degree + 1;
    let first = times[0];
    let last = times[times.len() - 1];

    (0..num_knots)
        .map(|i| {
            if i <= degree {
                first
            } else if i >= num_ctrl {
                last
            } else if degree % 2 == 1 {
                times[i - degree]
            } else {
                0.5 * (times[i - degree - 1] + times[i - degree])
            }
        })
        .collect()
}

/// A contiguous range of a knot vector, given as start index and length
///
/// The window never borrows the knot vector; it is turned into a slice only for the duration of a
/// single basis computation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KnotWindow {
    pub start: usize,
    pub len: usize,
}

impl KnotWindow {
    /// The window covering all `num_knots` knots
    pub fn full(num_knots: usize) -> KnotWindow {
        KnotWindow { start: 0, len: num_knots }
    }

    /// Returns the window of at most `2 * degree + 1` knots that holds every knot the non-zero
    /// basis functions of the span starting at knot `center` depend on
    ///
    /// Degree 0 needs the span's end knot as well, so its window is two knots wide.
    ///
    /// # Examples
    ///
    /// ```
    /// use ctrlspline::KnotWindow;
    /// let window = KnotWindow::around(5, 3, 10);
    /// assert_eq!(KnotWindow { start: 2, len: 7 }, window);
    /// ```
    pub fn around(center: usize, degree: usize, num_knots: usize) -> KnotWindow {
        if num_knots == 0 {
            panic!("Cannot place a knot window on an empty knot vector");
        }

        let width = (2 * degree).max(1);
        let lo = center.saturating_sub(degree);
        let up = (lo + width).min(num_knots - 1);
        let lo = up.saturating_sub(width);
        KnotWindow { start: lo, len: up - lo + 1 }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Returns the knots inside the window
    pub fn slice<'a>(&self, knots: &'a [f64]) -> &'a [f64] {
        &knots[self.start..self.end()]
    }
}

/// Triangular table of basis values for one query time
///
/// Row `i` and order `p` hold `B[i,p](t)`. The table optionally carries the first and second time
/// derivatives and, per entry, the sensitivity of the basis value to every knot of the vector the
/// table was computed on. All tables are flat buffers whose sizes are fixed at construction.
#[derive(Debug, Clone)]
pub struct BasisTable {
    degree: usize,
    rows: usize,
    num_knots: usize,
    derivatives: usize,
    values: Vec<f64>,
    first: Vec<f64>,
    second: Vec<f64>,
    knot_jac: Vec<f64>,
}

impl BasisTable {
    /// Runs the Cox-de Boor recursion on `knots` at time `t`
    ///
    /// Terms whose knot-span denominator is zero (clamped ends, doubled knots) contribute exactly
    /// zero to the value, its derivatives and its knot Jacobian. For `t` at or beyond the last knot
    /// the last basis function is forced to 1.
    ///
    /// # Arguments
    ///
    /// `knots` - non-decreasing knot sequence, usually a window of a spline's knot vector
    /// `degree` - spline degree
    /// `t` - query time
    /// `derivatives` - highest time derivative to compute, 0, 1 or 2
    /// `knot_jacobian` - whether to compute the sensitivities to the knot positions
    ///
    /// # Examples
    ///
    /// ```
    /// use ctrlspline::{clamped_knots, BasisTable};
    /// let knots = clamped_knots(2, &[0., 1., 2.]);
    /// let table = BasisTable::compute(&knots, 2, 0.7, 1, false);
    /// let sum: f64 = (0..table.rows()).map(|i| table.value(i)).sum();
    /// assert!((sum - 1.).abs() < 1e-12);
    /// ```
    pub fn compute(knots: &[f64], degree: usize, t: f64, derivatives: usize, knot_jacobian: bool) -> BasisTable {
        let num_knots = knots.len();
        if num_knots <= degree {
            panic!("Need more than {} knots for a degree {} basis, got {}", degree, degree, num_knots);
        }
        if derivatives > 2 {
            panic!("Basis derivatives of order {} are not implemented", derivatives);
        }

        let rows = num_knots - degree;
        let size = rows * (degree + 1);
        let mut table = BasisTable {
            degree,
            rows,
            num_knots,
            derivatives,
            values: vec![0.; size],
            first: if derivatives > 0 { vec![0.; size] } else { Vec::new() },
            second: if derivatives > 1 { vec![0.; size] } else { Vec::new() },
            knot_jac: if knot_jacobian { vec![0.; size * num_knots] } else { Vec::new() },
        };
        table.recurse(knots, t);
        table
    }

    #[inline]
    fn idx(&self, i: usize, p: usize) -> usize {
        i * (self.degree + 1) + p
    }

    fn recurse(&mut self, knots: &[f64], t: f64) {
        let n = self.num_knots;
        let with_jac = !self.knot_jac.is_empty();

        // rank 0: indicator of the half-open span
        for k in 0..self.rows {
            if knots[k] <= t && k + 1 < n && t < knots[k + 1] {
                let at = self.idx(k, 0);
                self.values[at] = 1.;
            }
        }

        for p in 1..=self.degree {
            for i in 0..self.rows {
                let at = self.idx(i, p);

                if i + p < n {
                    let xden = knots[i + p] - knots[i];
                    if xden != 0. {
                        let x = (t - knots[i]) / xden;
                        let src = self.idx(i, p - 1);
                        let prev = self.values[src];
                        self.values[at] = x * prev;
                        if self.derivatives > 0 {
                            self.first[at] = prev / xden + x * self.first[src];
                        }
                        if self.derivatives > 1 {
                            self.second[at] = 2. * self.first[src] / xden + x * self.second[src];
                        }
                        if with_jac {
                            let dst = at * n;
                            self.knot_jac[dst + i] += (x - 1.) / xden * prev;
                            self.knot_jac[dst + i + p] -= x / xden * prev;
                            add_scaled(&mut self.knot_jac, dst, src * n, n, x);
                        }
                    }
                }

                if i + p + 1 < n && i + 1 < self.rows {
                    let yden = knots[i + p + 1] - knots[i + 1];
                    if yden != 0. {
                        let y = (knots[i + p + 1] - t) / yden;
                        let src = self.idx(i + 1, p - 1);
                        let prev = self.values[src];
                        self.values[at] += y * prev;
                        if self.derivatives > 0 {
                            self.first[at] += -prev / yden + y * self.first[src];
                        }
                        if self.derivatives > 1 {
                            self.second[at] += -2. * self.first[src] / yden + y * self.second[src];
                        }
                        if with_jac {
                            let dst = at * n;
                            self.knot_jac[dst + i + 1] += y / yden * prev;
                            self.knot_jac[dst + i + p + 1] += (1. - y) / yden * prev;
                            add_scaled(&mut self.knot_jac, dst, src * n, n, y);
                        }
                    }
                }
            }
        }

        // at or beyond the last knot the half-open spans are all empty
        if t >= knots[n - 1] && self.rows >= 2 {
            for i in 0..self.rows {
                let at = self.idx(i, self.degree);
                self.values[at] = 0.;
            }
            let at = self.idx(self.rows - 2, self.degree);
            self.values[at] = 1.;
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of basis rows, one more than the number of control points the knots support
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns `B[i,p](t)`
    pub fn value_at(&self, i: usize, p: usize) -> f64 {
        self.values[self.idx(i, p)]
    }

    /// Returns the full-degree basis value of row `i`
    pub fn value(&self, i: usize) -> f64 {
        self.value_at(i, self.degree)
    }

    /// Returns the first time derivative of the full-degree basis value of row `i`
    ///
    /// # Panics
    ///
    /// If the table was computed without derivatives.
    pub fn first_derivative(&self, i: usize) -> f64 {
        if self.derivatives < 1 {
            panic!("Basis table was computed without first derivatives");
        }
        self.first[self.idx(i, self.degree)]
    }

    /// Returns the second time derivative of the full-degree basis value of row `i`
    ///
    /// # Panics
    ///
    /// If the table was computed without second derivatives.
    pub fn second_derivative(&self, i: usize) -> f64 {
        if self.derivatives < 2 {
            panic!("Basis table was computed without second derivatives");
        }
        self.second[self.idx(i, self.degree)]
    }

    /// Returns the sensitivity of the full-degree basis value of row `i` to every knot
    ///
    /// # Panics
    ///
    /// If the table was computed without the knot Jacobian.
    pub fn knot_jacobian(&self, i: usize) -> &[f64] {
        if self.knot_jac.is_empty() {
            panic!("Basis table was computed without the knot Jacobian");
        }
        let start = self.idx(i, self.degree) * self.num_knots;
        &self.knot_jac[start..start + self.num_knots]
    }
}

/// buf[dst..dst+len] += a * buf[src..src+len], for non-overlapping ranges
fn add_scaled(buf: &mut [f64], dst: usize, src: usize, len: usize, a: f64) {
    if src < dst {
        let (lo, hi) = buf.split_at_mut(dst);
        for (d, s) in hi[..len].iter_mut().zip(&lo[src..src + len]) {
            *d += a * s;
        }
    } else {
        let (lo, hi) = buf.split_at_mut(src);
        for (d, s) in lo[dst..dst + len].iter_mut().zip(&hi[..len]) {
            *d += a * s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert::close;

    fn sample_times() -> Vec<f64> {
        vec![0., 0.4, 1.1, 1.5, 2.6, 3.]
    }

    #[test]
    fn knots_odd_degree() {
        let knots = clamped_knots(3, &[0., 1., 2., 3.]);
        assert_eq!(vec![0., 0., 0., 0., 1., 2., 3., 3., 3., 3.], knots);

        let knots = clamped_knots(1, &[0., 1., 2.]);
        assert_eq!(vec![0., 0., 1., 2., 2.], knots);
    }

    #[test]
    fn knots_even_degree() {
        let knots = clamped_knots(2, &[0., 1., 2., 3.]);
        assert_eq!(vec![0., 0., 0., 0.5, 1.5, 2.5, 3., 3., 3.], knots);

        let knots = clamped_knots(4, &[0., 1., 2., 3.]);
        assert_eq!(vec![0., 0., 0., 0., 0., 0.5, 1.5, 2.5, 3., 3., 3., 3., 3.], knots);

        let knots = clamped_knots(0, &[0., 1., 2.]);
        assert_eq!(vec![0., 0.5, 1.5, 2.], knots);
    }

    #[test]
    fn knots_single_waypoint() {
        let knots = clamped_knots(3, &[2.]);
        assert_eq!(vec![2.; 7], knots);
    }

    #[test]
    #[should_panic]
    fn knots_empty_times() {
        clamped_knots(3, &[]);
    }

    #[test]
    #[should_panic]
    fn knots_unsorted_times() {
        clamped_knots(3, &[0., 2., 1.]);
    }

    #[test]
    fn window_around() {
        // interior span of a cubic
        assert_eq!(KnotWindow { start: 2, len: 7 }, KnotWindow::around(5, 3, 12));

        // spans near the front are shifted right
        assert_eq!(KnotWindow { start: 0, len: 7 }, KnotWindow::around(1, 3, 12));

        // spans near the end are shifted left
        assert_eq!(KnotWindow { start: 5, len: 7 }, KnotWindow::around(10, 3, 12));

        // short knot vectors collapse to the full window
        assert_eq!(KnotWindow::full(5), KnotWindow::around(2, 3, 5));

        // degree 0 still sees the end of its span
        assert_eq!(KnotWindow { start: 4, len: 2 }, KnotWindow::around(4, 0, 8));
    }

    #[test]
    fn window_slice() {
        let knots = vec![0., 1., 2., 3., 4.];
        let window = KnotWindow { start: 1, len: 3 };
        assert_eq!(&[1., 2., 3.], window.slice(&knots));
        assert_eq!(4, window.end());
    }

    #[test]
    fn basis_partition_of_unity() {
        for degree in 0..5 {
            let knots = clamped_knots(degree, &sample_times());
            let mut t = 0.01;
            while t < 3. {
                let table = BasisTable::compute(&knots, degree, t, 0, false);
                let sum: f64 = (0..table.rows()).map(|i| table.value(i)).sum();
                close(1., sum, 1e-12);
                t += 0.07;
            }
        }
    }

    #[test]
    fn basis_local_support() {
        let degree = 3;
        let knots = clamped_knots(degree, &sample_times());
        let mut t = 0.;
        while t < 3. {
            let table = BasisTable::compute(&knots, degree, t, 0, false);
            for p in 0..=degree {
                for i in 0..table.rows() {
                    if i + p + 1 < knots.len() && (t < knots[i] || t >= knots[i + p + 1]) {
                        assert_eq!(0., table.value_at(i, p), "B[{},{}]({}) should vanish", i, p, t);
                    }
                }
            }
            t += 0.05;
        }
    }

    #[test]
    fn basis_hand_computed() {
        // degree 3 on [0,1,2,3] at t=1.5
        let knots = clamped_knots(3, &[0., 1., 2., 3.]);
        let table = BasisTable::compute(&knots, 3, 1.5, 0, false);
        let expected = [0., 0.03125, 0.46875, 0.46875, 0.03125, 0.];
        for (i, e) in expected.iter().enumerate() {
            close(*e, table.value(i), 1e-12);
        }
    }

    #[test]
    fn basis_derivatives_match_finite_differences() {
        let h = 1e-6;
        for degree in 1..5 {
            let knots = clamped_knots(degree, &sample_times());
            for &t in &[0.1, 0.9, 1.37, 2.2, 2.93] {
                let table = BasisTable::compute(&knots, degree, t, 2, false);
                let plus = BasisTable::compute(&knots, degree, t + h, 2, false);
                let minus = BasisTable::compute(&knots, degree, t - h, 2, false);
                for i in 0..table.rows() {
                    let fd = (plus.value(i) - minus.value(i)) / (2. * h);
                    close(fd, table.first_derivative(i), 1e-4);
                    if degree >= 2 {
                        let fdd = (plus.first_derivative(i) - minus.first_derivative(i)) / (2. * h);
                        close(fdd, table.second_derivative(i), 1e-3);
                    }
                }
            }
        }
    }

    #[test]
    fn basis_knot_jacobian_matches_finite_differences() {
        let h = 1e-6;
        let degree = 3;
        let knots = vec![0., 0., 0., 0., 0.6, 1.2, 2.1, 3., 3., 3., 3.];
        let t = 1.4;
        let table = BasisTable::compute(&knots, degree, t, 0, true);

        // only the interior knots can be moved without changing multiplicities
        for k in 4..7 {
            let mut up = knots.clone();
            let mut down = knots.clone();
            up[k] += h;
            down[k] -= h;
            let plus = BasisTable::compute(&up, degree, t, 0, false);
            let minus = BasisTable::compute(&down, degree, t, 0, false);
            for i in 0..table.rows() {
                let fd = (plus.value(i) - minus.value(i)) / (2. * h);
                close(fd, table.knot_jacobian(i)[k], 1e-5);
            }
        }
    }

    #[test]
    fn basis_doubled_knot_is_finite() {
        let knots = vec![0., 0., 0., 0., 1., 1., 2., 2., 2., 2.];
        for &t in &[0., 0.5, 1., 1.5, 1.999] {
            let table = BasisTable::compute(&knots, 3, t, 2, true);
            let mut sum = 0.;
            for i in 0..table.rows() {
                assert!(table.value(i).is_finite());
                assert!(table.first_derivative(i).is_finite());
                assert!(table.second_derivative(i).is_finite());
                assert!(table.knot_jacobian(i).iter().all(|v| v.is_finite()));
                sum += table.value(i);
            }
            close(1., sum, 1e-12);
        }
    }

    #[test]
    fn basis_at_last_knot() {
        let knots = clamped_knots(2, &[0., 1., 2.]);
        let table = BasisTable::compute(&knots, 2, 2., 0, false);
        // rows() includes one row past the last control point
        let last = table.rows() - 2;
        assert_eq!(1., table.value(last));
        for i in 0..table.rows() {
            if i != last {
                assert_eq!(0., table.value(i));
            }
        }
    }

    #[test]
    #[should_panic]
    fn basis_missing_derivatives() {
        let knots = clamped_knots(2, &[0., 1., 2.]);
        let table = BasisTable::compute(&knots, 2, 0.5, 0, false);
        table.first_derivative(0);
    }

    #[test]
    #[should_panic]
    fn basis_unsupported_derivative() {
        let knots = clamped_knots(2, &[0., 1., 2.]);
        BasisTable::compute(&knots, 2, 0.5, 3, false);
    }
}
