use nalgebra::Vector3;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Where along the edge `a -> b` a linear field would take the value
    /// `target`, or `None` if `target` does not lie between the endpoint
    /// values. Only the location is interpolated; field values never are.
    #[inline]
    pub(crate) fn edge_crossing(
        a: &Vector3<f64>,
        value_a: f64,
        b: &Vector3<f64>,
        value_b: f64,
        target: f64,
    ) -> Option<Vector3<f64>> {
        let span = value_b - value_a;
        if span == 0.0 || !span.is_finite() {
            return None;
        }
        let t = (target - value_a) / span;
        if !(0.0..=1.0).contains(&t) {
            return None;
        }
        Some(a + (b - a) * t)
    }

    /// Distance from `point` to the crossing on edge `a -> b`.
    #[inline]
    pub(crate) fn crossing_distance(
        point: &Vector3<f64>,
        a: &Vector3<f64>,
        value_a: f64,
        b: &Vector3<f64>,
        value_b: f64,
        target: f64,
    ) -> Option<f64> {
        Self::edge_crossing(a, value_a, b, value_b, target)
            .map(|crossing| (crossing - point).norm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn crossing_is_proportional() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(2.0, 0.0, 0.0);
        let p = Interpolator::edge_crossing(&a, 40.0, &b, 60.0, 45.0).unwrap();
        assert_relative_eq!(p.x, 0.5);

        let reversed = Interpolator::edge_crossing(&b, 60.0, &a, 40.0, 45.0).unwrap();
        assert_relative_eq!(reversed.x, 0.5);
    }

    #[test]
    fn no_crossing_outside_span() {
        let a = Vector3::zeros();
        let b = Vector3::x();
        assert!(Interpolator::edge_crossing(&a, 1.0, &b, 2.0, 3.0).is_none());
        assert!(Interpolator::edge_crossing(&a, 1.0, &b, 1.0, 1.0).is_none());
    }

    #[test]
    fn distance_is_measured_from_point() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let point = Vector3::new(-2.0, 0.0, 0.0);
        let d = Interpolator::crossing_distance(&point, &a, 40.0, &b, 60.0, 50.0).unwrap();
        assert_relative_eq!(d, 2.5);
    }
}
