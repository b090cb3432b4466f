use models::nettests::StunReachability;

use crate::{MeasurementTransformer, ObservationBatch};

/// STUN endpoints only resolve and speak HTTP to the collector; there are
/// no TCP or TLS sub-events to correlate.
pub(crate) fn transform(
    msmt: &StunReachability,
    ctx: &MeasurementTransformer<'_>,
) -> ObservationBatch {
    let keys = &msmt.test_keys;
    ObservationBatch {
        web: ctx.consume_web_observations(&keys.queries, &[], &[], &keys.requests, &[]),
        ..Default::default()
    }
}
