use models::nettests::DnsCheck;

use crate::{MeasurementTransformer, ObservationBatch};

/// The bootstrap resolution plus every named lookup, folded in lookup-label
/// order so the output is stable.
pub(crate) fn transform(msmt: &DnsCheck, ctx: &MeasurementTransformer<'_>) -> ObservationBatch {
    let keys = &msmt.test_keys;
    let mut web = Vec::new();

    if let Some(bootstrap) = keys.bootstrap.as_ref() {
        web.extend(ctx.make_dns_observations(&bootstrap.queries));
    }
    for lookup in keys.lookups.values() {
        web.extend(ctx.consume_web_observations(
            &lookup.queries,
            &lookup.tcp_connect,
            &lookup.tls_handshakes,
            &lookup.requests,
            &lookup.network_events,
        ));
    }

    ObservationBatch {
        web,
        ..Default::default()
    }
}
