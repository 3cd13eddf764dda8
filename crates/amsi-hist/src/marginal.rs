use amsi_core::errors::{AmsiError, ErrorInfo};

use crate::histogram::Histogram;

/// Sums the mass over the axes in `dims`.
///
/// With `keep == false` the summed axes disappear from the result; with
/// `keep == true` they stay as singleton axes so the result broadcasts against
/// the input. Summing over no axis is the identity, summing over every axis
/// (without `keep`) yields a rank-0 histogram holding the total mass. The
/// result keeps the layout of the input.
pub fn marginalize(hist: &Histogram, dims: &[usize], keep: bool) -> Result<Histogram, AmsiError> {
    check_dims(hist, dims)?;
    if dims.is_empty() {
        return Ok(hist.canonical().into_owned());
    }
    if keep {
        let shape: Vec<usize> = hist
            .shape()
            .iter()
            .enumerate()
            .map(|(axis, &n)| if dims.contains(&axis) { 1 } else { n })
            .collect();
        project(hist, shape, |coord, out| {
            out.copy_from_slice(coord);
            for &axis in dims {
                out[axis] = 0;
            }
        })
    } else {
        let kept: Vec<usize> = (0..hist.rank()).filter(|axis| !dims.contains(axis)).collect();
        restrict(hist, &kept)
    }
}

/// Keeps only the axes in `dims`, in that order, summing over all others.
pub fn restrict(hist: &Histogram, dims: &[usize]) -> Result<Histogram, AmsiError> {
    check_dims(hist, dims)?;
    let shape: Vec<usize> = dims.iter().map(|&axis| hist.shape()[axis]).collect();
    project(hist, shape, |coord, out| {
        for (slot, &axis) in out.iter_mut().zip(dims.iter()) {
            *slot = coord[axis];
        }
    })
}

/// Divides every bin by the total mass and returns the total alongside.
pub fn normalize(hist: &Histogram) -> Result<(Histogram, f64), AmsiError> {
    let total = hist.total();
    if !(total.is_finite() && total > 0.0) {
        return Err(AmsiError::Degenerate(
            ErrorInfo::new("zero-mass", "total mass must be positive and finite")
                .with_context("total", total)
                .with_context("shape", format!("{:?}", hist.shape())),
        ));
    }
    let mut out = hist.canonical().into_owned();
    out.scale(1.0 / total);
    Ok((out, total))
}

/// Lower-triangular table of dense marginals: `pairs[i][i]` is the 1-D
/// marginal of axis `i`, `pairs[i][j]` (with `j < i`) the 2-D marginal over
/// axes `(j, i)`.
pub fn pairs(hist: &Histogram) -> Result<Vec<Vec<Histogram>>, AmsiError> {
    let mut table = Vec::with_capacity(hist.rank());
    for i in 0..hist.rank() {
        let mut row = Vec::with_capacity(i + 1);
        for j in 0..=i {
            let dims = if i == j { vec![i] } else { vec![j, i] };
            row.push(restrict(hist, &dims)?.to_dense()?);
        }
        table.push(row);
    }
    Ok(table)
}

fn project(
    hist: &Histogram,
    shape: Vec<usize>,
    map: impl Fn(&[u32], &mut [u32]),
) -> Result<Histogram, AmsiError> {
    let mut out = if hist.is_sparse() {
        Histogram::sparse(shape)?
    } else {
        Histogram::zeros(shape, u128::MAX)?
    };
    let mut target = vec![0u32; out.rank()];
    hist.for_each_nonzero(|coord, value| {
        map(coord, &mut target);
        out.push_unchecked(&target, value);
    });
    out.coalesce();
    Ok(out)
}

fn check_dims(hist: &Histogram, dims: &[usize]) -> Result<(), AmsiError> {
    for (i, &axis) in dims.iter().enumerate() {
        if axis >= hist.rank() || dims[..i].contains(&axis) {
            return Err(AmsiError::Shape(
                ErrorInfo::new("marginal-dims", "axes must be distinct and below the rank")
                    .with_context("dims", format!("{dims:?}"))
                    .with_context("rank", hist.rank()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Histogram {
        Histogram::dense(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()
    }

    #[test]
    fn keep_retains_singleton_axes() {
        let hist = fixture();
        let kept = marginalize(&hist, &[0], true).unwrap();
        assert_eq!(kept.shape(), &[1, 3]);
        assert_eq!(kept.get(&[0, 2]).unwrap(), 9.0);

        let dropped = marginalize(&hist, &[0], false).unwrap();
        assert_eq!(dropped.shape(), &[3]);
        assert_eq!(dropped.get(&[1]).unwrap(), 7.0);
    }

    #[test]
    fn restrict_reorders_axes() {
        let hist = fixture();
        let swapped = restrict(&hist, &[1, 0]).unwrap();
        assert_eq!(swapped.shape(), &[3, 2]);
        assert_eq!(swapped.get(&[2, 1]).unwrap(), 6.0);
    }

    #[test]
    fn duplicate_axes_are_rejected() {
        assert!(marginalize(&fixture(), &[1, 1], false).is_err());
        assert!(restrict(&fixture(), &[2]).is_err());
    }

    #[test]
    fn zero_mass_cannot_be_normalized() {
        let empty = Histogram::sparse(vec![4]).unwrap();
        let err = normalize(&empty).unwrap_err();
        assert_eq!(err.family(), "Degenerate");
    }

    #[test]
    fn pairs_are_lower_triangular() {
        let table = pairs(&fixture()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].len(), 1);
        assert_eq!(table[1].len(), 2);
        assert_eq!(table[1][0].shape(), &[2, 3]);
        assert_eq!(table[1][1].shape(), &[3]);
    }
}
