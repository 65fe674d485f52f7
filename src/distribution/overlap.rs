//! Overlap calculator
//!
//! Intersects two distribution descriptors axis by axis. For each axis the
//! two progressions `firstA + k*strideA` and `firstB + k*strideB` share the
//! points congruent to a joint residue `r` modulo `lcm(strideA, strideB)`, if
//! such a residue exists. The residue comes from the Chinese Remainder
//! Theorem; the result is then clipped to the common bounds.
//!
//! Arithmetic is widened to 128 bits so that `lcm` of two large strides
//! cannot overflow.

use crate::distribution::{DistributionDescriptor, Index};
use crate::error::{RedistError, Result};

/// Greatest common divisor, with `gcd(m, 0) == m`
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple, widened to 128 bits
pub fn lcm(a: u64, b: u64) -> u128 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b)) as u128 * b as u128
}

/// Extended Euclid: returns `(g, x, y)` with `a*x + b*y == g`
fn extended_gcd(a: i128, b: i128) -> (i128, i128, i128) {
    if b == 0 {
        return (a, 1, 0);
    }
    let (g, x, y) = extended_gcd(b, a % b);
    (g, y, x - (a / b) * y)
}

/// Joint residue of `x ≡ a (mod m)` and `x ≡ b (mod n)`
///
/// Returns `(r, lcm(m, n))` with `0 <= r < lcm`, or `None` when the
/// congruences are incompatible (`a mod g != b mod g`).
pub fn crt(a: u64, m: u64, b: u64, n: u64) -> Option<(u128, u128)> {
    let g = gcd(m, n);
    let l = lcm(m, n);
    let a = a % m;
    let b = b % n;

    if a % g != b % g {
        return None;
    }

    let m_g = (m / g) as u128;
    let n_g = (n / g) as u128;
    if n_g == 1 {
        // n divides m: a already satisfies both
        return Some((a as u128, l));
    }

    // Solve a + k*m ≡ b (mod n)  <=>  k*(m/g) ≡ (b-a)/g (mod n/g)
    let (_, inv, _) = extended_gcd((m_g % n_g) as i128, n_g as i128);
    let inv = inv.rem_euclid(n_g as i128) as u128;
    let diff = (b as i128 - a as i128).rem_euclid(n as i128) as u128 / g as u128;
    let k = (diff % n_g) * inv % n_g;

    Some(((a as u128 + k * m as u128) % l, l))
}

/// Intersect two strided ranges
pub fn intersect_index(a: &Index, b: &Index) -> Index {
    if a.is_empty() || b.is_empty() {
        return Index::empty();
    }

    let lo = a.first.max(b.first) as u128;
    let hi = a.last.min(b.last) as u128;
    if lo > hi {
        return Index::empty();
    }

    let Some((r, l)) = crt(a.first, a.stride, b.first, b.stride) else {
        return Index::empty();
    };

    // Smallest value >= lo and largest value <= hi congruent to r (mod l)
    let first = lo + (r + l - lo % l) % l;
    let Some(last) = hi.checked_sub((hi % l + l - r) % l) else {
        return Index::empty();
    };
    if first > hi || last < first {
        return Index::empty();
    }

    // l beyond u64 leaves at most one common point
    let stride = u64::try_from(l).unwrap_or(1);
    Index {
        first: first as u64,
        last: last as u64,
        stride,
    }
}

/// Intersect two descriptors
///
/// The result carries `b`'s address and rank, so a provider intersecting its
/// own block with a consumer's gets a region addressed to that consumer.
/// Swapping the arguments yields the same axes under the other identity. An
/// empty axis makes the whole result non-intersecting (see
/// [`DistributionDescriptor::is_empty`]).
pub fn intersect(a: &DistributionDescriptor, b: &DistributionDescriptor) -> Result<DistributionDescriptor> {
    if a.dimensions() != b.dimensions() {
        return Err(RedistError::MismatchedDimensionality {
            left: a.dimensions(),
            right: b.dimensions(),
        });
    }

    let mut axes = Vec::with_capacity(a.dimensions());
    for (x, y) in a.axes.iter().zip(&b.axes) {
        let axis = intersect_index(x, y);
        let empty = axis.is_empty();
        axes.push(axis);
        if empty {
            // One empty axis empties the box; normalize the rest too
            axes.resize(a.dimensions(), Index::empty());
            break;
        }
    }

    Ok(DistributionDescriptor::new(b.rank, b.address.clone(), axes))
}

/// Whether two descriptors share at least one point
///
/// Descriptors of different dimensionality never intersect.
pub fn is_intersecting(a: &DistributionDescriptor, b: &DistributionDescriptor) -> bool {
    intersect(a, b).map(|d| !d.is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::address::EndpointAddress;
    use rand::Rng;

    fn desc(rank: u32, axes: Vec<Index>) -> DistributionDescriptor {
        DistributionDescriptor::new(rank, EndpointAddress::new("localhost", 7000 + rank as u16), axes)
    }

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(gcd(0, 7), 7);
        assert_eq!(gcd(1, 1), 1);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(2, 3), 6);
        assert_eq!(lcm(u64::MAX, u64::MAX - 1), u64::MAX as u128 * (u64::MAX - 1) as u128);
    }

    #[test]
    fn test_crt_coprime() {
        // x ≡ 0 (mod 2), x ≡ 1 (mod 3)  =>  x ≡ 4 (mod 6)
        assert_eq!(crt(0, 2, 1, 3), Some((4, 6)));
        assert_eq!(crt(3, 5, 2, 7), Some((23, 35)));
    }

    #[test]
    fn test_crt_non_coprime() {
        // x ≡ 1 (mod 4), x ≡ 3 (mod 6)  =>  x ≡ 9 (mod 12)
        assert_eq!(crt(1, 4, 3, 6), Some((9, 12)));
        // residues differ mod gcd = 2
        assert_eq!(crt(0, 4, 1, 6), None);
        // one modulus divides the other
        assert_eq!(crt(5, 6, 1, 2), Some((5, 6)));
        assert_eq!(crt(1, 2, 5, 6), Some((5, 6)));
    }

    #[test]
    fn test_unit_stride_clipping() {
        let axis = intersect_index(&Index::new(0, 9, 1), &Index::new(5, 14, 1));
        assert_eq!(axis, Index::new(5, 9, 1));

        let axis = intersect_index(&Index::new(0, 4, 1), &Index::new(5, 14, 1));
        assert!(axis.is_empty());
    }

    #[test]
    fn test_adjacent_providers_against_consumer() {
        let p0 = desc(0, vec![Index::new(0, 9, 1)]);
        let p1 = desc(1, vec![Index::new(10, 19, 1)]);
        let c = desc(0, vec![Index::new(5, 14, 1)]);

        let r0 = intersect(&p0, &c).unwrap();
        let r1 = intersect(&p1, &c).unwrap();
        assert_eq!(r0.axes, vec![Index::new(5, 9, 1)]);
        assert_eq!(r1.axes, vec![Index::new(10, 14, 1)]);
        assert!(is_intersecting(&p0, &c));
        assert!(is_intersecting(&p1, &c));
    }

    #[test]
    fn test_stride_two_against_stride_three() {
        let p = desc(0, vec![Index::new(0, 30, 2)]);
        let c = desc(1, vec![Index::new(1, 25, 3)]);

        let region = intersect(&p, &c).unwrap();
        // 4, 10, 16, 22 are the common points within [1, 25]
        assert_eq!(region.axes, vec![Index { first: 4, last: 22, stride: 6 }]);
        assert_eq!(region.rank, 1);
        assert_eq!(region.address, c.address);
    }

    #[test]
    fn test_incompatible_residues_do_not_intersect() {
        let a = desc(0, vec![Index::new(0, 100, 4)]);
        let b = desc(1, vec![Index::new(1, 100, 6)]);
        assert!(!is_intersecting(&a, &b));
        assert!(intersect(&a, &b).unwrap().is_empty());
    }

    #[test]
    fn test_single_element_axes() {
        let a = desc(0, vec![Index::single(6)]);
        let b = desc(1, vec![Index::new(0, 12, 3)]);
        assert_eq!(intersect(&a, &b).unwrap().axes, vec![Index::single(6)]);

        let c = desc(2, vec![Index::single(7)]);
        assert!(!is_intersecting(&c, &b));
    }

    #[test]
    fn test_one_empty_axis_empties_all() {
        let a = desc(0, vec![Index::new(0, 9, 1), Index::new(0, 9, 2)]);
        let b = desc(1, vec![Index::new(0, 9, 1), Index::new(1, 9, 2)]);
        let region = intersect(&a, &b).unwrap();
        assert!(region.is_empty());
        assert_eq!(region.dimensions(), 2);
    }

    #[test]
    fn test_mismatched_dimensionality() {
        let a = desc(0, vec![Index::new(0, 9, 1)]);
        let b = desc(1, vec![Index::new(0, 9, 1), Index::new(0, 9, 1)]);
        match intersect(&a, &b) {
            Err(RedistError::MismatchedDimensionality { left: 1, right: 2 }) => {}
            other => panic!("expected MismatchedDimensionality, got {:?}", other),
        }
        assert!(!is_intersecting(&a, &b));
    }

    #[test]
    fn test_huge_strides_do_not_overflow() {
        let a = Index::new(0, u64::MAX, u64::MAX - 1);
        let b = Index::new(0, u64::MAX, u64::MAX);
        // Only 0 is common below u64::MAX
        assert_eq!(intersect_index(&a, &b), Index { first: 0, last: 0, stride: 1 });
    }

    #[test]
    fn test_self_intersection_is_identity() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let axes: Vec<Index> = (0..rng.gen_range(1..4))
                .map(|_| {
                    let first = rng.gen_range(0..50);
                    Index::new(first, first + rng.gen_range(0..60), rng.gen_range(1..8))
                })
                .collect();
            let a = desc(3, axes);
            assert_eq!(intersect(&a, &a).unwrap(), a);
        }
    }

    #[test]
    fn test_descriptor_symmetry_on_axes() {
        let provider = DistributionDescriptor::new(
            0,
            EndpointAddress::new("10.0.1.10", 7000),
            vec![Index::new(0, 9, 1), Index::new(0, 18, 2)],
        );
        let consumer = DistributionDescriptor::new(
            4,
            EndpointAddress::new("10.0.1.20", 7000),
            vec![Index::new(5, 14, 1), Index::new(0, 18, 3)],
        );

        let pc = intersect(&provider, &consumer).unwrap();
        let cp = intersect(&consumer, &provider).unwrap();
        assert_eq!(pc.axes, cp.axes);
        assert_eq!(pc.axes, vec![Index::new(5, 9, 1), Index::new(0, 18, 6)]);
        assert_eq!((pc.rank, pc.address.port, pc.address.host.as_str()), (4, 7000, "10.0.1.20"));
        assert_eq!((cp.rank, cp.address.host.as_str()), (0, "10.0.1.10"));
    }

    #[test]
    fn test_symmetry_and_membership() {
        let mut rng = rand::thread_rng();
        for _ in 0..2000 {
            let a = Index::new(rng.gen_range(0..40), rng.gen_range(0..80), rng.gen_range(1..10));
            let b = Index::new(rng.gen_range(0..40), rng.gen_range(0..80), rng.gen_range(1..10));

            let ab = intersect_index(&a, &b);
            let ba = intersect_index(&b, &a);
            assert_eq!(ab.is_empty(), ba.is_empty());
            if !ab.is_empty() {
                assert_eq!(ab, ba);
            }

            // Brute force: the intersection holds exactly the common members
            let expected: Vec<u64> = a.iter().filter(|&v| b.contains(v)).collect();
            let actual: Vec<u64> = ab.iter().collect();
            assert_eq!(actual, expected, "a={} b={}", a, b);

            let g = gcd(a.stride, b.stride);
            if g > 1 && a.first % g != b.first % g {
                assert!(ab.is_empty());
            }
        }
    }
}
