use std::ops::Range;

use anyhow::Result;

use crate::error::PipelineError;

/// Contiguous half-open range of frame indices owned by exactly one worker
/// and one device. Computed per dispatch, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSlice {
    pub start:  usize,
    /// Exclusive.
    pub end:    usize,
    pub device: usize,
}

impl WorkSlice {
    #[must_use]
    #[inline]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[must_use]
    #[inline]
    pub const fn indices(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Same slice shifted up by `offset`, for dispatching a sub-range of
    /// the full index space.
    #[must_use]
    #[inline]
    pub const fn offset(&self, offset: usize) -> WorkSlice {
        WorkSlice {
            start:  self.start + offset,
            end:    self.end + offset,
            device: self.device,
        }
    }
}

/// Splits `[0, total)` into `num_workers` contiguous slices.
///
/// Partitioning policy: every worker except the last receives exactly
/// `total / num_workers` items; the last also absorbs the entire remainder.
/// Devices are assigned positionally (slice `i` -> device `i`); callers
/// with an explicit device list remap afterwards.
///
/// `total == 0` yields no slices. `num_workers > total` yields empty slices
/// (`start == end`), which dispatch treats as no-ops.
#[inline]
pub fn partition(total: usize, num_workers: usize) -> Result<Vec<WorkSlice>> {
    if num_workers == 0 {
        return Err(PipelineError::InvalidConfiguration(
            "cannot partition work across zero workers".into(),
        )
        .into());
    }
    if total == 0 {
        return Ok(Vec::new());
    }

    let base = total / num_workers;
    let mut slices = Vec::with_capacity(num_workers);
    for worker in 0..num_workers {
        let start = worker * base;
        let end = if worker == num_workers - 1 {
            total
        } else {
            start + base
        };
        slices.push(WorkSlice {
            start,
            end,
            device: worker,
        });
    }

    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_cover_the_range_exactly_once() {
        for total in [1, 2, 5, 23, 100, 101] {
            for num_workers in [1, 2, 3, 4, 7, 16] {
                let slices = partition(total, num_workers).unwrap();
                assert_eq!(slices.len(), num_workers);

                let mut expected_start = 0;
                for slice in &slices {
                    assert_eq!(
                        slice.start, expected_start,
                        "gap or overlap at {slice:?} for total={total} workers={num_workers}"
                    );
                    expected_start = slice.end;
                }
                assert_eq!(expected_start, total);

                // All but the remainder-absorbing last slice are equal-sized
                let base = total / num_workers;
                for slice in &slices[..num_workers - 1] {
                    assert_eq!(slice.len(), base);
                }
                assert_eq!(slices[num_workers - 1].len(), base + total % num_workers);
            }
        }
    }

    #[test]
    fn remainder_goes_entirely_to_the_last_slice() {
        let slices = partition(23, 4).unwrap();
        let ranges: Vec<_> = slices.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 5), (5, 10), (10, 15), (15, 23)]);
        assert_eq!(slices.iter().map(WorkSlice::len).collect::<Vec<_>>(), vec![
            5, 5, 5, 8
        ]);
    }

    #[test]
    fn devices_are_assigned_positionally() {
        let slices = partition(8, 2).unwrap();
        assert_eq!(slices[0].device, 0);
        assert_eq!(slices[1].device, 1);
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let err = partition(10, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn zero_total_yields_no_slices() {
        assert!(partition(0, 4).unwrap().is_empty());
    }

    #[test]
    fn more_workers_than_items_yields_empty_slices() {
        let slices = partition(2, 4).unwrap();
        assert!(slices[..3].iter().all(WorkSlice::is_empty));
        assert_eq!((slices[3].start, slices[3].end), (0, 2));
    }

    #[test]
    fn offset_shifts_both_bounds() {
        let slice = WorkSlice {
            start:  0,
            end:    5,
            device: 1,
        };
        let shifted = slice.offset(10);
        assert_eq!((shifted.start, shifted.end, shifted.device), (10, 15, 1));
    }
}
