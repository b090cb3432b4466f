use models::nettests::Signal;

use crate::{MeasurementTransformer, ObservationBatch};

pub(crate) fn transform(msmt: &Signal, ctx: &MeasurementTransformer<'_>) -> ObservationBatch {
    let keys = &msmt.test_keys;
    ObservationBatch {
        web: ctx.consume_web_observations(
            &keys.queries,
            &keys.tcp_connect,
            &keys.tls_handshakes,
            &keys.requests,
            &keys.network_events,
        ),
        ..Default::default()
    }
}
