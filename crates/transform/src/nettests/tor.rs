use models::nettests::Tor;

use crate::{MeasurementTransformer, ObservationBatch};

/// Every target decomposes independently; targets fold in key order so the
/// output is stable.
pub(crate) fn transform(msmt: &Tor, ctx: &MeasurementTransformer<'_>) -> ObservationBatch {
    let mut web = Vec::new();
    for target in msmt.test_keys.targets.values() {
        web.extend(ctx.consume_web_observations(
            &target.queries,
            &target.tcp_connect,
            &target.tls_handshakes,
            &target.requests,
            &target.network_events,
        ));
    }
    ObservationBatch {
        web,
        ..Default::default()
    }
}
