use models::nettests::HttpInvalidRequestLine;

use crate::nettests::base_middlebox_observation;
use crate::{MeasurementTransformer, ObservationBatch};

/// One middlebox row per measurement, pairing up to five sent request lines
/// with what came back.
pub(crate) fn transform(
    msmt: &HttpInvalidRequestLine,
    ctx: &MeasurementTransformer<'_>,
) -> ObservationBatch {
    let keys = &msmt.test_keys;
    let mut obs = base_middlebox_observation(ctx);
    obs.hirl_success = Some(keys.failure.is_none());
    obs.hirl_failure = keys.failure.clone();
    obs.hirl_tampering = keys.tampering;

    let sent = |n: usize| keys.sent.get(n).cloned();
    obs.hirl_sent_0 = sent(0);
    obs.hirl_sent_1 = sent(1);
    obs.hirl_sent_2 = sent(2);
    obs.hirl_sent_3 = sent(3);
    obs.hirl_sent_4 = sent(4);

    let received = |n: usize| {
        keys.received
            .get(n)
            .map(|data| String::from_utf8_lossy(&data.bytes()).into_owned())
    };
    obs.hirl_received_0 = received(0);
    obs.hirl_received_1 = received(1);
    obs.hirl_received_2 = received(2);
    obs.hirl_received_3 = received(3);
    obs.hirl_received_4 = received(4);

    ObservationBatch {
        http_middlebox: vec![obs],
        ..Default::default()
    }
}
