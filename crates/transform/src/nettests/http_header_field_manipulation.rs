use models::nettests::HttpHeaderFieldManipulation;

use crate::nettests::base_middlebox_observation;
use crate::{MeasurementTransformer, ObservationBatch};

pub(crate) fn transform(
    msmt: &HttpHeaderFieldManipulation,
    ctx: &MeasurementTransformer<'_>,
) -> ObservationBatch {
    let keys = &msmt.test_keys;
    let mut obs = base_middlebox_observation(ctx);
    obs.hfm_success = Some(keys.failure.is_none());
    obs.hfm_failure = keys.failure.clone();
    // The structured tampering report serializes whole; analysis queries
    // unpack it on their side.
    obs.hfm_diff = keys
        .tampering
        .as_ref()
        .and_then(|report| serde_json::to_string(report).ok());

    ObservationBatch {
        http_middlebox: vec![obs],
        ..Default::default()
    }
}
