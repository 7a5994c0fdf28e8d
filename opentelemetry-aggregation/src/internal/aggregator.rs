use crate::data::PointValue;
use crate::error::MetricResult;
use crate::Temporality;

use super::Number;

/// The running state of one metric point for one kind of aggregation.
///
/// Implementations are updated concurrently through `&self` and hold one
/// interval tracker per delta reader where delta reporting needs more than
/// the difference of two cumulative snapshots.
pub(crate) trait Aggregator<T>: Send + Sync + Sized + 'static
where
    T: Number,
{
    /// A static configuration that is needed by configurators.
    /// E.g. bucket_size at creation time and buckets list at aggregator update.
    type Config: Send + Sync + 'static;

    /// What a reader remembers about the point to compute its next delta.
    type Baseline: Default + Send + 'static;

    /// Called once for every point of a store, with the temporality of every
    /// reader in reader order.
    fn create(config: &Self::Config, readers: &[Temporality]) -> MetricResult<Self>;

    /// Called for each measurement.
    fn update(&self, config: &Self::Config, measurement: T);

    /// Reads the current value for `reader`.
    ///
    /// With [Temporality::Delta] the result is relative to `baseline`, which
    /// is then advanced.
    fn collect(
        &self,
        config: &Self::Config,
        reader: usize,
        temporality: Temporality,
        baseline: &mut Self::Baseline,
    ) -> MetricResult<PointValue<T>>;

    /// Returns to the freshly created state.
    fn reset(&self, config: &Self::Config);
}
