// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.


use crate::c64;

/// Complex exponential. The argument is assumed to be purely imaginary.
///
/// This function doesn't actually use complex numbers; it just returns the real
/// and imag components from Euler's formula (i.e. e^{ix} = cos{x} + i sin{x}).
///
/// # Examples
///
/// `assert_abs_diff_eq!(cexp(PI), c64::new(-1.0, 0.0));`
#[inline]
pub(crate) fn cexp(x: f64) -> c64 {
    let (im, re) = x.sin_cos();
    c64::new(re, im)
}

/// n choose k. Only small numbers are expected here (numbers of antenna
/// groups), so this isn't protected against overflow.
pub(crate) fn choose(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
}

/// The number of distinct, unordered baseline groups that can be formed from
/// `num_groups` antenna groups (self pairs included), i.e. nG + C(nG, 2).
pub fn num_unordered_baseline_groups(num_groups: usize) -> usize {
    if num_groups < 2 {
        num_groups
    } else {
        num_groups + choose(num_groups, 2)
    }
}

/// The arithmetic mean of some 2D points. Returns `None` if there are no
/// points.
pub(crate) fn mean_point<'a, I>(points: I) -> Option<[f64; 2]>
where
    I: IntoIterator<Item = &'a [f64; 2]>,
{
    let mut sum = [0.0, 0.0];
    let mut n = 0;
    for p in points {
        sum[0] += p[0];
        sum[1] += p[1];
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some([sum[0] / n as f64, sum[1] / n as f64])
    }
}

/// Euclidean length of a 2D vector.
#[inline]
pub(crate) fn hypot(v: [f64; 2]) -> f64 {
    v[0].hypot(v[1])
}

/// Find the index of the value in `values` closest to `target`. Ties go to the
/// earlier value. Returns `None` if `values` is empty.
pub(crate) fn nearest_index(values: &[f64], target: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| {
            let diff = (v - target).abs();
            match best {
                Some((_, best_diff)) if best_diff <= diff => best,
                _ => Some((i, diff)),
            }
        })
        .map(|(i, _)| i)
}
