#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn check_logaddexp(x in -10f64..10f64, y in -10f64..10f64) {
            let a = (x.exp() + y.exp()).ln();
            let b = logaddexp(x, y);
            let neginf = f64::NEG_INFINITY;
            let nan = f64::NAN;
            prop_assert!((a - b).abs() < 1e-10);
            prop_assert_eq!(b, logaddexp(y, x));
            prop_assert_eq!(x, logaddexp(x, neginf));
            prop_assert_eq!(logaddexp(neginf, neginf), neginf);
            prop_assert!(logaddexp(nan, x).is_nan());
        }
    }

    #[test]
    fn check_neginf() {
        assert_eq!(logaddexp(f64::NEG_INFINITY, 2.), 2.);
        assert_eq!(logaddexp(2., f64::NEG_INFINITY), 2.);
    }

    #[test]
    fn check_large_magnitude() {
        // must not overflow when both inputs are far from zero
        assert_eq!(logaddexp(1000., 1000.), 1000. + 2f64.ln());
        assert!((logaddexp(1000., 999.) - (1000. + (-1f64).exp().ln_1p())).abs() < 1e-12);
        assert_eq!(logaddexp(-1000., -1000.), -1000. + 2f64.ln());
    }
}
