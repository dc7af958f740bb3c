//! Variant bucketing.
//!
//! Percentages live in a fixed-point space: `percent * PERCENT_MULTIPLIER`, so the whole sampling
//! space is `[0, TOTAL_BUCKETS)` with a resolution of 0.001%.
use std::collections::HashMap;

use crate::{models::Segment, segment::CompiledVariant, Error, Result};

/// Scale applied to percentages. Gives three decimal digits of resolution.
pub const PERCENT_MULTIPLIER: u32 = 1000;

/// Size of the sampling space.
pub const TOTAL_BUCKETS: u32 = 100 * PERCENT_MULTIPLIER;

/// Convert a percentage in `[0, 100]` to the fixed-point sampling space.
pub(crate) fn to_fixed_point(segment_id: u64, percent: f64) -> Result<u32> {
    if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return Err(Error::InvalidPercent {
            segment_id,
            percent,
        });
    }
    Ok((percent * f64::from(PERCENT_MULTIPLIER)).round() as u32)
}

/// Cumulative table mapping sample points to variants.
///
/// Entry `i` covers `[boundary[i - 1], boundary[i])`. A sample point selects the first entry whose
/// boundary is strictly greater than it.
#[derive(Debug, Clone, Default)]
pub struct DistributionTable {
    boundaries: Box<[u32]>,
    variants: Box<[CompiledVariant]>,
}

impl DistributionTable {
    /// Build a table from `(variant, percent)` pairs in persisted order.
    pub fn new(
        segment_id: u64,
        distributions: impl IntoIterator<Item = (CompiledVariant, f64)>,
    ) -> Result<DistributionTable> {
        let mut accumulated = 0u32;
        let mut boundaries = Vec::new();
        let mut variants = Vec::new();
        for (variant, percent) in distributions {
            accumulated = accumulated.saturating_add(to_fixed_point(segment_id, percent)?);
            boundaries.push(accumulated);
            variants.push(variant);
        }

        Ok(DistributionTable {
            boundaries: boundaries.into(),
            variants: variants.into(),
        })
    }

    pub(crate) fn compile(
        segment: &Segment,
        variants: &HashMap<u64, CompiledVariant>,
    ) -> Result<DistributionTable> {
        let distributions = segment
            .distributions
            .iter()
            .map(|distribution| {
                variants
                    .get(&distribution.variant_id)
                    .cloned()
                    .map(|variant| (variant, distribution.percent))
                    .ok_or(Error::UnknownVariant {
                        segment_id: segment.id,
                        variant_id: distribution.variant_id,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        DistributionTable::new(segment.id, distributions)
    }

    /// Cumulative boundaries in the fixed-point space.
    pub fn boundaries(&self) -> &[u32] {
        &self.boundaries
    }

    /// Variants in persisted order.
    pub fn variants(&self) -> &[CompiledVariant] {
        &self.variants
    }

    /// Return the variant covering `sample`, or `None` if the percentages don't reach it.
    pub fn lookup(&self, sample: u64) -> Option<&CompiledVariant> {
        let i = self
            .boundaries
            .partition_point(|&boundary| u64::from(boundary) <= sample);
        self.variants.get(i)
    }
}
