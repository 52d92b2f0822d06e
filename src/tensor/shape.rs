//! Shape validation, dynamic axis resolution and row-major strides

use crate::error::{EdgeError, EdgeResult};

/// Marker for an axis whose size is inferred from the element count
pub const DYNAMIC_AXIS: isize = -1;

/// Index of the single dynamic axis, if any.
///
/// Rejects zero or negative sizes other than `-1` and more than one dynamic axis.
pub fn dynamic_axis(shape: &[isize]) -> EdgeResult<Option<usize>> {
    let mut dynamic = None;
    for (axis, &dim) in shape.iter().enumerate() {
        match dim {
            DYNAMIC_AXIS => {
                if dynamic.is_some() {
                    return Err(EdgeError::shape_error(shape, "more than one dynamic axis"));
                }
                dynamic = Some(axis);
            }
            d if d >= 1 => {}
            _ => return Err(EdgeError::shape_error(shape, "axis sizes must be >= 1 or -1")),
        }
    }
    Ok(dynamic)
}

/// Check whether a shape has no dynamic axis
pub fn is_fully_specified(shape: &[isize]) -> bool {
    shape.iter().all(|&d| d >= 1)
}

/// Resolve a shape against a total element count.
///
/// A dynamic axis takes `element_count / product(other axes)`, which must divide exactly.
/// A fully specified shape is returned as-is; callers compare its element count.
pub fn resolve(shape: &[isize], element_count: usize) -> EdgeResult<Vec<usize>> {
    let dynamic = dynamic_axis(shape)?;
    let mut dims: Vec<usize> = shape.iter().map(|&d| d.max(1) as usize).collect();
    if let Some(axis) = dynamic {
        let static_count = checked_element_count(
            dims.iter().enumerate().filter(|(i, _)| *i != axis).map(|(_, d)| d),
        )?;
        if element_count == 0 || element_count % static_count != 0 {
            return Err(EdgeError::shape_error(
                shape,
                &format!("{} elements cannot fill the dynamic axis", element_count),
            ));
        }
        dims[axis] = element_count / static_count;
    }
    Ok(dims)
}

/// Product of dims, failing on overflow
pub fn checked_element_count<'a>(dims: impl IntoIterator<Item = &'a usize>) -> EdgeResult<usize> {
    dims.into_iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| EdgeError::InvalidShape("element count overflows usize".to_string()))
    })
}

/// Product of dims. An empty shape is a scalar with one element.
pub fn element_count(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Row-major strides: `strides[last] = 1`, `strides[i] = dims[i + 1] * strides[i + 1]`
pub fn row_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = dims[i + 1] * strides[i + 1];
    }
    strides
}

/// Check whether strides address `dims` contiguously in row-major order.
/// Axes of size 1 never move the cursor, so their stride is ignored.
pub fn is_row_major(dims: &[usize], strides: &[usize]) -> bool {
    let expected = row_major_strides(dims);
    dims.iter()
        .zip(strides.iter().zip(expected.iter()))
        .all(|(&d, (&s, &e))| d == 1 || s == e)
}

/// Convert resolved dims into the signed form used by feature types
pub fn to_signed(dims: &[usize]) -> Vec<isize> {
    dims.iter().map(|&d| d as isize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_strides() {
        assert_eq!(row_major_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(row_major_strides(&[5]), vec![1]);
        assert!(row_major_strides(&[]).is_empty());
    }

    #[test]
    fn test_strides_are_suffix_products() {
        let shapes: [&[usize]; 4] = [&[1, 3, 1, 4], &[7, 2], &[2, 2, 2, 2, 2], &[9]];
        for dims in shapes {
            let strides = row_major_strides(dims);
            for i in 0..dims.len() {
                assert_eq!(strides[i], dims[i + 1..].iter().product::<usize>());
            }
        }
    }

    #[test]
    fn test_resolve_dynamic_axis() {
        assert_eq!(resolve(&[-1, 4], 24).unwrap(), vec![6, 4]);
        assert_eq!(resolve(&[2, -1, 3], 24).unwrap(), vec![2, 4, 3]);
        assert_eq!(resolve(&[2, 3], 24).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_resolve_rejects_bad_shapes() {
        assert!(resolve(&[-1, 5], 24).unwrap_err().is_shape_error());
        assert!(resolve(&[-1, -1], 24).unwrap_err().is_shape_error());
        assert!(resolve(&[0, 4], 24).unwrap_err().is_shape_error());
        assert!(resolve(&[-2, 4], 24).unwrap_err().is_shape_error());
        assert!(resolve(&[-1], 0).unwrap_err().is_shape_error());
    }

    #[test]
    fn test_is_row_major() {
        assert!(is_row_major(&[2, 3], &[3, 1]));
        assert!(!is_row_major(&[3, 2], &[1, 3]));
        assert!(is_row_major(&[1, 4], &[1, 1]));
    }

    #[test]
    fn test_checked_element_count_overflow() {
        let dims = [usize::MAX, 2];
        assert!(checked_element_count(dims.iter()).is_err());
        assert_eq!(checked_element_count([2usize, 3, 4].iter()).unwrap(), 24);
    }
}
