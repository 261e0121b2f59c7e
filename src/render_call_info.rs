use std::ops::Range;

/// Describes one call of [`crate::Renderer::render`] within a planned sequence of calls.
///
/// `number` counts from 1 to `total_number`. The planned samples are spread evenly over the
/// calls, so the sample range of each call can be derived from these three fields alone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RenderCallInfo {
    pub number: u32,
    pub total_number: u32,
    pub total_samples: u32,
}

impl RenderCallInfo {
    pub fn new(number: u32, total_number: u32, total_samples: u32) -> Self {
        Self {
            number,
            total_number,
            total_samples,
        }
    }

    /// Samples accumulated once this call has finished.
    pub fn samples_so_far(&self) -> u32 {
        Self::samples_after(self.number, self.total_number, self.total_samples)
    }

    /// Samples that earlier calls already accumulated.
    pub fn samples_before(&self) -> u32 {
        Self::samples_after(
            self.number.saturating_sub(1),
            self.total_number,
            self.total_samples,
        )
    }

    /// Sample indices traced by this call. Consecutive calls produce adjacent ranges.
    pub fn sample_range(&self) -> Range<u32> {
        self.samples_before()..self.samples_so_far()
    }

    pub fn is_last(&self) -> bool {
        self.number == self.total_number
    }

    /// Iterates over every call of a plan, in order.
    pub fn plan(total_number: u32, total_samples: u32) -> impl Iterator<Item = RenderCallInfo> {
        (1..=total_number).map(move |number| RenderCallInfo::new(number, total_number, total_samples))
    }

    fn samples_after(number: u32, total_number: u32, total_samples: u32) -> u32 {
        debug_assert!(total_number > 0, "a plan needs at least one call");
        debug_assert!(number <= total_number, "call number exceeds the plan");
        if total_number == 0 {
            return 0;
        }
        (u64::from(number) * u64::from(total_samples) / u64::from(total_number)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_call_reaches_all_samples() {
        let last = RenderCallInfo::new(4, 4, 400);
        assert_eq!(last.samples_so_far(), 400);
        assert_eq!(last.samples_before(), 300);
        assert!(last.is_last());
    }

    #[test]
    fn sample_count_never_regresses() {
        for (total_number, total_samples) in [(4, 400), (7, 3), (3, 7), (1000, 1), (13, 1 << 30)] {
            let counts: Vec<u32> = RenderCallInfo::plan(total_number, total_samples)
                .map(|info| info.samples_so_far())
                .collect();

            assert!(counts.windows(2).all(|pair| pair[0] <= pair[1]));
            assert_eq!(*counts.last().unwrap(), total_samples);
        }
    }

    #[test]
    fn ranges_partition_all_samples() {
        let mut next = 0;
        for info in RenderCallInfo::plan(7, 100) {
            let range = info.sample_range();
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, 100);
    }

    #[test]
    fn more_calls_than_samples_gives_empty_ranges() {
        let empty = RenderCallInfo::plan(10, 3)
            .filter(|info| info.sample_range().is_empty())
            .count();
        assert_eq!(empty, 7);
    }

    #[test]
    fn large_plans_do_not_overflow() {
        let info = RenderCallInfo::new(u32::MAX, u32::MAX, u32::MAX);
        assert_eq!(info.samples_so_far(), u32::MAX);
    }

    /// Mirrors what the ray generation shader does for a single pixel: add the radiance of
    /// every sample in the call's range to the running sum and divide by the samples so far.
    fn accumulate(plan: impl Iterator<Item = RenderCallInfo>, radiance: impl Fn(u32) -> f32) -> (f32, f32) {
        let mut sum = 0.0f32;
        let mut average = 0.0f32;
        for info in plan {
            for sample in info.sample_range() {
                sum += radiance(sample);
            }
            if info.samples_so_far() > 0 {
                average = sum / info.samples_so_far() as f32;
            }
        }
        (sum, average)
    }

    #[test]
    fn one_call_and_many_calls_converge_to_the_same_image() {
        // Deterministic per-sample radiance, like the shader seeding its random state from the sample index
        let radiance = |sample: u32| ((sample.wrapping_mul(2654435761) >> 8) % 1000) as f32 / 1000.0;

        let (single_sum, single_average) = accumulate(RenderCallInfo::plan(1, 400), radiance);
        let (many_sum, many_average) = accumulate(RenderCallInfo::plan(37, 400), radiance);

        assert!((single_sum - many_sum).abs() <= single_sum * 1e-5);
        assert!((single_average - many_average).abs() <= 1e-5);
    }
}
