//! Small numeric helpers shared by validation and wallet-facing code.

/// Median of `values`. Even-length inputs average the two middle elements
/// (rounding down). Empty input yields 0.
pub fn median(mut values: Vec<u64>) -> u64 {
    match values.len() {
        0 => 0,
        1 => values[0],
        len => {
            values.sort_unstable();
            let mid = len / 2;
            if len % 2 == 1 {
                values[mid]
            } else {
                ((u128::from(values[mid - 1]) + u128::from(values[mid])) / 2) as u64
            }
        }
    }
}

/// Convert relative ring offsets (first absolute, then deltas) to absolute
/// global indexes. Returns `None` on overflow.
pub fn relative_offsets_to_absolute(offsets: &[u64]) -> Option<Vec<u64>> {
    let mut absolute = Vec::with_capacity(offsets.len());
    let mut current = 0u64;
    for (i, offset) in offsets.iter().enumerate() {
        current = if i == 0 {
            *offset
        } else {
            current.checked_add(*offset)?
        };
        absolute.push(current);
    }
    Some(absolute)
}

/// Convert sorted absolute global indexes to the relative encoding.
pub fn absolute_offsets_to_relative(offsets: &[u64]) -> Vec<u64> {
    let mut relative = Vec::with_capacity(offsets.len());
    let mut previous = 0u64;
    for offset in offsets {
        relative.push(offset.saturating_sub(previous));
        previous = *offset;
    }
    relative
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn median_empty_and_single() {
        assert_eq!(median(vec![]), 0);
        assert_eq!(median(vec![42]), 42);
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(vec![5, 1, 3]), 3);
        assert_eq!(median(vec![4, 1, 3, 2]), 2);
    }

    #[test]
    fn median_even_does_not_overflow() {
        assert_eq!(median(vec![u64::MAX, u64::MAX]), u64::MAX);
    }

    #[test]
    fn relative_to_absolute() {
        assert_eq!(relative_offsets_to_absolute(&[5, 2, 0, 10]), Some(vec![5, 7, 7, 17]));
        assert_eq!(relative_offsets_to_absolute(&[]), Some(vec![]));
    }

    #[test]
    fn relative_overflow_is_none() {
        assert_eq!(relative_offsets_to_absolute(&[u64::MAX, 1]), None);
    }

    proptest! {
        #[test]
        fn offsets_convert_back(mut offsets in proptest::collection::vec(0u64..1_000_000, 0..16)) {
            offsets.sort_unstable();
            let relative = absolute_offsets_to_relative(&offsets);
            prop_assert_eq!(relative_offsets_to_absolute(&relative), Some(offsets));
        }
    }
}
