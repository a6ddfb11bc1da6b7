//! Closed form kinematic features of a single cubic segment
//!
//! A [`Segment`] is the boundary state `(x0, v0, x1, v1, tau)` of one cubic Hermite piece. Each
//! feature is returned as a value vector plus, when a row Jacobian of `tau` with respect to some
//! outer decision variables is given, the Jacobian of the value with respect to those variables.
//! Bounds are stacked as `[f, -f]` so that a single upper limit constrains both signs.

use crate::{DColVectorf64, DMatrixf64, DRowVectorf64};

/// A feature value with an optional Jacobian with respect to the variables behind `tau`
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub value: DColVectorf64,
    pub jacobian: Option<DMatrixf64>,
}

impl Feature {
    /// Chains the derivative of `value` with respect to `tau` with the Jacobian of `tau`
    fn new(value: DColVectorf64, dvalue_dtau: DColVectorf64, tau_jac: Option<&DRowVectorf64>) -> Feature {
        let jacobian = tau_jac.map(|jac| &dvalue_dtau * jac);
        Feature { value, jacobian }
    }

    /// Stacks `(value, dvalue_dtau)` blocks on top of each other
    fn stacked(blocks: &[(DColVectorf64, DColVectorf64)], tau_jac: Option<&DRowVectorf64>) -> Feature {
        let len = blocks.iter().map(|(v, _)| v.len()).sum();
        let value = DColVectorf64::from_iterator(len, blocks.iter().flat_map(|(v, _)| v.iter().copied()));
        let dvalue = DColVectorf64::from_iterator(len, blocks.iter().flat_map(|(_, d)| d.iter().copied()));
        Feature::new(value, dvalue, tau_jac)
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Position, velocity and acceleration features at one point of a segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSample {
    pub pos: Feature,
    pub vel: Feature,
    pub acc: Feature,
}

/// Boundary state of one cubic segment
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub x0: &'a DColVectorf64,
    pub v0: &'a DColVectorf64,
    pub x1: &'a DColVectorf64,
    pub v1: &'a DColVectorf64,
    pub tau: f64,
}

// The cubic through a segment is `x0 + v0 t + B (t/tau)^2 + A (t/tau)^3` with
// `A = -2 delta + tau (v0 + v1)` and `B = 3 delta - tau (v1 + 2 v0)`.
struct Terms {
    sum: DColVectorf64,
    weighted: DColVectorf64,
    a: DColVectorf64,
    b: DColVectorf64,
}

impl<'a> Segment<'a> {
    /// # Panics
    ///
    /// If `tau` is not positive or the boundary vectors differ in length.
    pub fn new(x0: &'a DColVectorf64, v0: &'a DColVectorf64, x1: &'a DColVectorf64, v1: &'a DColVectorf64,
               tau: f64) -> Segment<'a> {
        if tau <= 0. {
            panic!("Segment duration must be positive, got {}", tau);
        }
        let n = x0.len();
        if v0.len() != n || x1.len() != n || v1.len() != n {
            panic!("Segment boundary state has mismatched dimensions {}, {}, {}, {}",
                   n, v0.len(), x1.len(), v1.len());
        }
        Segment { x0, v0, x1, v1, tau }
    }

    pub fn dim(&self) -> usize {
        self.x0.len()
    }

    fn terms(&self) -> Terms {
        let delta = self.x1 - self.x0;
        let sum = self.v0 + self.v1;
        let weighted = self.v1 + self.v0 * 2.;
        let a = &delta * -2. + &sum * self.tau;
        let b = &delta * 3. - &weighted * self.tau;
        Terms { sum, weighted, a, b }
    }

    /// Acceleration at the start, `2 B / tau^2`, and its derivative by `tau`
    fn acc_start_parts(&self, t: &Terms) -> (DColVectorf64, DColVectorf64) {
        let tau2 = self.tau * self.tau;
        let value = &t.b * (2. / tau2);
        let dvalue = &t.weighted * (-2. / tau2) - &t.b * (4. / (tau2 * self.tau));
        (value, dvalue)
    }

    /// Acceleration at the end, `(6 A + 2 B) / tau^2`, and its derivative by `tau`
    fn acc_end_parts(&self, t: &Terms) -> (DColVectorf64, DColVectorf64) {
        let tau2 = self.tau * self.tau;
        let numer = &t.a * 6. + &t.b * 2.;
        let dnumer = &t.sum * 6. - &t.weighted * 2.;
        let dvalue = dnumer / tau2 - &numer * (2. / (tau2 * self.tau));
        (numer / tau2, dvalue)
    }

    /// Constant jerk, `6 A / tau^3`, and its derivative by `tau`
    fn jerk_parts(&self, t: &Terms) -> (DColVectorf64, DColVectorf64) {
        let tau3 = self.tau * self.tau * self.tau;
        let value = &t.a * (6. / tau3);
        let dvalue = &t.sum * (6. / tau3) - &t.a * (18. / (tau3 * self.tau));
        (value, dvalue)
    }

    /// Squared-norm cost of leaping across the segment, `[D, V]`
    ///
    /// `D = sqrt(12) tau^-1.5 (x1 - x0 - tau/2 (v0 + v1))` and `V = tau^-0.5 (v1 - v0)`. Their summed
    /// squares are the integrated squared acceleration of the cubic.
    pub fn leap_cost(&self, tau_jac: Option<&DRowVectorf64>) -> Feature {
        let tau = self.tau;
        let s12 = 12f64.sqrt();
        let dist = (self.x1 - self.x0) - (self.v0 + self.v1) * (0.5 * tau);
        let ddist = (self.v0 + self.v1) * -0.5;
        let vel = self.v1 - self.v0;

        let til_d = &dist * (s12 * tau.powf(-1.5));
        let dtil_d = &dist * (-1.5 * s12 * tau.powf(-2.5)) + ddist * (s12 * tau.powf(-1.5));
        let til_v = &vel * tau.powf(-0.5);
        let dtil_v = &vel * (-0.5 * tau.powf(-1.5));

        Feature::stacked(&[(til_d, dtil_d), (til_v, dtil_v)], tau_jac)
    }

    /// The constant jerk, stacked as `[j, -j]`
    pub fn max_jerk(&self, tau_jac: Option<&DRowVectorf64>) -> Feature {
        let (j, dj) = self.jerk_parts(&self.terms());
        Feature::stacked(&[(j.clone(), dj.clone()), (-j, -dj)], tau_jac)
    }

    /// Acceleration at the start of the segment
    pub fn acc_start(&self, tau_jac: Option<&DRowVectorf64>) -> Feature {
        let (acc, dacc) = self.acc_start_parts(&self.terms());
        Feature::new(acc, dacc, tau_jac)
    }

    /// Acceleration at the end of the segment
    pub fn acc_end(&self, tau_jac: Option<&DRowVectorf64>) -> Feature {
        let (acc, dacc) = self.acc_end_parts(&self.terms());
        Feature::new(acc, dacc, tau_jac)
    }

    /// Start and end acceleration, stacked as `[a0, -a0, a1, -a1]`
    ///
    /// The acceleration of a cubic is affine in time, so these bound it over the whole segment.
    pub fn max_acc(&self, tau_jac: Option<&DRowVectorf64>) -> Feature {
        let terms = self.terms();
        let (a0, da0) = self.acc_start_parts(&terms);
        let (a1, da1) = self.acc_end_parts(&terms);
        Feature::stacked(&[(a0.clone(), da0.clone()), (-a0, -da0),
                           (a1.clone(), da1.clone()), (-a1, -da1)], tau_jac)
    }

    /// Start, end and extremal velocity, stacked as `[v0, -v0, v1, -v1, vm, -vm]`
    ///
    /// `vm` is the velocity at the stationary point of the velocity profile. Where that point lies
    /// before the start (or the profile has none) `vm` is `v0`; where it lies after the end, `v1`.
    pub fn max_vel(&self, tau_jac: Option<&DRowVectorf64>) -> Feature {
        let terms = self.terms();
        let tau = self.tau;
        let n = self.dim();
        let mut vm = DColVectorf64::zeros(n);
        let mut dvm = DColVectorf64::zeros(n);

        for i in 0..n {
            let (a, b) = (terms.a[i], terms.b[i]);
            let (da, db) = (terms.sum[i], -terms.weighted[i]);
            let t_star = if a == 0. { -1. } else { -b * tau / (3. * a) };
            if t_star < 0. {
                vm[i] = self.v0[i];
            } else if t_star > tau {
                vm[i] = self.v1[i];
            } else {
                vm[i] = self.v0[i] - b * b / (3. * a * tau);
                dvm[i] = -2. * b * db / (3. * a * tau) + b * b * (da * tau + a) / (3. * a * a * tau * tau);
            }
        }

        let zeros = DColVectorf64::zeros(n);
        Feature::stacked(&[(self.v0.clone(), zeros.clone()), (-self.v0, zeros.clone()),
                           (self.v1.clone(), zeros.clone()), (-self.v1, zeros),
                           (vm.clone(), dvm.clone()), (-vm, -dvm)], tau_jac)
    }

    /// Position, velocity and acceleration at relative time `trel` in `[0, 1]` of the segment
    ///
    /// # Panics
    ///
    /// If `trel` is outside of `[0, 1]`.
    pub fn pos_vel_acc(&self, trel: f64, tau_jac: Option<&DRowVectorf64>) -> SegmentSample {
        if !(0. ..=1.).contains(&trel) {
            panic!("Relative segment time must be within [0, 1], got {}", trel);
        }
        let terms = self.terms();
        let tau = self.tau;
        let tau2 = tau * tau;
        let (r2, r3) = (trel * trel, trel * trel * trel);
        let (a, b) = (&terms.a, &terms.b);
        let (da, db) = (&terms.sum, -&terms.weighted);

        let pos = self.x0 + self.v0 * (trel * tau) + b * r2 + a * r3;
        let dpos = self.v0 * trel + &db * r2 + da * r3;

        let vel = self.v0 + b * (2. * trel / tau) + a * (3. * r2 / tau);
        let dvel = &db * (2. * trel / tau) - b * (2. * trel / tau2)
            + da * (3. * r2 / tau) - a * (3. * r2 / tau2);

        let acc = b * (2. / tau2) + a * (6. * trel / tau2);
        let dacc = &db * (2. / tau2) - b * (4. / (tau2 * tau))
            + da * (6. * trel / tau2) - a * (12. * trel / (tau2 * tau));

        SegmentSample {
            pos: Feature::new(pos, dpos, tau_jac),
            vel: Feature::new(vel, dvel, tau_jac),
            acc: Feature::new(acc, dacc, tau_jac),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CubicPiece;
    use assert::close;

    struct Boundary {
        x0: DColVectorf64,
        v0: DColVectorf64,
        x1: DColVectorf64,
        v1: DColVectorf64,
    }

    impl Boundary {
        fn new(x0: &[f64], v0: &[f64], x1: &[f64], v1: &[f64]) -> Boundary {
            Boundary {
                x0: DColVectorf64::from_column_slice(x0),
                v0: DColVectorf64::from_column_slice(v0),
                x1: DColVectorf64::from_column_slice(x1),
                v1: DColVectorf64::from_column_slice(v1),
            }
        }

        fn segment(&self, tau: f64) -> Segment<'_> {
            Segment::new(&self.x0, &self.v0, &self.x1, &self.v1, tau)
        }

        fn piece(&self, tau: f64) -> CubicPiece {
            CubicPiece::new(&self.x0, &self.v0, &self.x1, &self.v1, tau)
        }
    }

    // both velocity extrema strictly inside the segment
    fn planar() -> Boundary {
        Boundary::new(&[0., 1.], &[1., 0.], &[2., -1.], &[-1., 0.5])
    }

    fn unit_tau() -> DRowVectorf64 {
        DRowVectorf64::from_row_slice(&[1.])
    }

    /// Compares the Jacobian of `feature` by `tau` with central differences
    fn check_tau_jacobian<F>(boundary: &Boundary, tau: f64, feature: F)
    where
        F: Fn(&Segment, Option<&DRowVectorf64>) -> Feature,
    {
        let h = 1e-6;
        let jac = unit_tau();
        let analytic = feature(&boundary.segment(tau), Some(&jac)).jacobian.unwrap();
        let plus = feature(&boundary.segment(tau + h), None).value;
        let minus = feature(&boundary.segment(tau - h), None).value;
        assert_eq!(1, analytic.ncols());
        for i in 0..plus.len() {
            close(analytic[(i, 0)], (plus[i] - minus[i]) / (2. * h), 1e-5);
        }
    }

    #[test]
    fn feature_without_tau_jacobian() {
        let boundary = planar();
        let seg = boundary.segment(1.5);
        assert_eq!(None, seg.leap_cost(None).jacobian);
        assert_eq!(None, seg.max_vel(None).jacobian);
        assert_eq!(None, seg.pos_vel_acc(0.5, None).acc.jacobian);
    }

    #[test]
    fn feature_chains_tau_jacobian() {
        let boundary = planar();
        let seg = boundary.segment(1.5);
        let unit = seg.acc_end(Some(&unit_tau())).jacobian.unwrap();
        let outer = DRowVectorf64::from_row_slice(&[2., 0., -1.]);
        let chained = seg.acc_end(Some(&outer)).jacobian.unwrap();
        assert_eq!((2, 3), chained.shape());
        for i in 0..2 {
            close(2. * unit[(i, 0)], chained[(i, 0)], 1e-12);
            assert_eq!(0., chained[(i, 1)]);
            close(-unit[(i, 0)], chained[(i, 2)], 1e-12);
        }
    }

    #[test]
    fn feature_sizes() {
        let boundary = planar();
        let seg = boundary.segment(1.5);
        assert_eq!(4, seg.leap_cost(None).len());
        assert_eq!(4, seg.max_jerk(None).len());
        assert_eq!(2, seg.acc_start(None).len());
        assert_eq!(2, seg.acc_end(None).len());
        assert_eq!(8, seg.max_acc(None).len());
        assert_eq!(12, seg.max_vel(None).len());
    }

    #[test]
    fn leap_cost_tau_jacobian() {
        check_tau_jacobian(&planar(), 1.5, |s, j| s.leap_cost(j));
        check_tau_jacobian(&planar(), 0.4, |s, j| s.leap_cost(j));
    }

    #[test]
    fn leap_cost_vanishes_for_constant_velocity() {
        let boundary = Boundary::new(&[1., -1.], &[2., 0.5], &[4., 0.], &[2., 0.5]);
        let cost = boundary.segment(1.5).leap_cost(None);
        for &c in cost.value.iter() {
            close(0., c, 1e-12);
        }
    }

    #[test]
    fn leap_cost_is_integrated_squared_acceleration() {
        let boundary = planar();
        let tau = 1.5;
        let piece = boundary.piece(tau);
        let cost = boundary.segment(tau).leap_cost(None).value.norm_squared();

        // simpson over the quadratic squared acceleration is exact
        let n = 20;
        let h = tau / n as f64;
        let mut integral = 0.;
        for k in 0..=n {
            let w = if k == 0 || k == n { 1. } else if k % 2 == 1 { 4. } else { 2. };
            integral += w * piece.eval(k as f64 * h, 2).norm_squared();
        }
        integral *= h / 3.;
        close(integral, cost, 1e-9);
    }

    #[test]
    fn jerk_matches_piece() {
        let boundary = planar();
        let jerk = boundary.segment(1.5).max_jerk(None).value;
        let expected = boundary.piece(1.5).eval(0., 3);
        for i in 0..2 {
            close(expected[i], jerk[i], 1e-9);
            close(-expected[i], jerk[2 + i], 1e-9);
        }
    }

    #[test]
    fn jerk_tau_jacobian() {
        check_tau_jacobian(&planar(), 1.5, |s, j| s.max_jerk(j));
    }

    #[test]
    fn acceleration_matches_piece() {
        let boundary = planar();
        let seg = boundary.segment(1.5);
        let piece = boundary.piece(1.5);
        let start = seg.acc_start(None).value;
        let end = seg.acc_end(None).value;
        let stacked = seg.max_acc(None).value;
        for i in 0..2 {
            close(piece.eval(0., 2)[i], start[i], 1e-9);
            close(piece.eval(1.5, 2)[i], end[i], 1e-9);
            assert_eq!(start[i], stacked[i]);
            assert_eq!(-start[i], stacked[2 + i]);
            assert_eq!(end[i], stacked[4 + i]);
            assert_eq!(-end[i], stacked[6 + i]);
        }
    }

    #[test]
    fn acceleration_tau_jacobian() {
        check_tau_jacobian(&planar(), 1.5, |s, j| s.acc_start(j));
        check_tau_jacobian(&planar(), 1.5, |s, j| s.acc_end(j));
        check_tau_jacobian(&planar(), 0.7, |s, j| s.max_acc(j));
    }

    #[test]
    fn velocity_interior_extremum() {
        // x = t - 3t^2 + 2t^3 turns around with velocity -0.5 at t = 0.5
        let boundary = Boundary::new(&[0.], &[1.], &[0.], &[1.]);
        let vel = boundary.segment(1.).max_vel(None).value;
        assert_eq!(vec![1., -1., 1., -1.], vel.as_slice()[..4].to_vec());
        close(-0.5, vel[4], 1e-12);
        close(0.5, vel[5], 1e-12);
    }

    #[test]
    fn velocity_extremum_before_start() {
        // v = 2 + 2t + t^2 has its stationary point at t = -1
        let boundary = Boundary::new(&[0.], &[2.], &[10. / 3.], &[5.]);
        let feature = boundary.segment(1.).max_vel(Some(&unit_tau()));
        close(2., feature.value[4], 1e-12);
        close(-2., feature.value[5], 1e-12);
        let jac = feature.jacobian.unwrap();
        assert_eq!(0., jac[(4, 0)]);
        assert_eq!(0., jac[(5, 0)]);
    }

    #[test]
    fn velocity_tau_jacobian() {
        check_tau_jacobian(&Boundary::new(&[0.], &[1.], &[0.], &[1.]), 1., |s, j| s.max_vel(j));
        check_tau_jacobian(&planar(), 1.5, |s, j| s.max_vel(j));
    }

    #[test]
    fn velocity_bounds_dominate_profile() {
        let mut rng = fastrand::Rng::with_seed(5);
        let mut random = |n: usize| DColVectorf64::from_fn(n, |_, _| 4. * rng.f64() - 2.);
        for _ in 0..50 {
            let boundary = Boundary { x0: random(3), v0: random(3), x1: random(3), v1: random(3) };
            let tau = 0.2 + random(1)[0].abs();
            let bound = boundary.segment(tau).max_vel(None).value;
            let piece = boundary.piece(tau);
            for i in 0..3 {
                let max = (0..6).map(|blk| bound[blk * 3 + i]).fold(f64::MIN, f64::max);
                for k in 0..=40 {
                    let vel = piece.eval(tau * k as f64 / 40., 1);
                    assert!(max >= vel[i].abs() - 1e-9, "{} < |{}|", max, vel[i]);
                }
            }
        }
    }

    #[test]
    fn samples_match_piece() {
        let boundary = planar();
        let tau = 1.5;
        let piece = boundary.piece(tau);
        let seg = boundary.segment(tau);
        for &trel in &[0., 0.3, 0.5, 0.8, 1.] {
            let sample = seg.pos_vel_acc(trel, None);
            let (pos, vel, acc) = piece.eval3(trel * tau);
            for i in 0..2 {
                close(pos[i], sample.pos.value[i], 1e-9);
                close(vel[i], sample.vel.value[i], 1e-9);
                close(acc[i], sample.acc.value[i], 1e-9);
            }
        }
    }

    #[test]
    fn samples_tau_jacobian() {
        for &trel in &[0., 0.3, 0.8, 1.] {
            check_tau_jacobian(&planar(), 1.5, |s, j| s.pos_vel_acc(trel, j).pos);
            check_tau_jacobian(&planar(), 1.5, |s, j| s.pos_vel_acc(trel, j).vel);
            check_tau_jacobian(&planar(), 1.5, |s, j| s.pos_vel_acc(trel, j).acc);
        }
    }

    #[test]
    #[should_panic]
    fn samples_outside_segment() {
        let boundary = planar();
        boundary.segment(1.5).pos_vel_acc(1.2, None);
    }

    #[test]
    #[should_panic]
    fn segment_zero_duration() {
        let boundary = planar();
        boundary.segment(0.);
    }
}
