//! Measurement-to-observation transformation.
//!
//! A typed measurement decomposes into flat observation rows, one per
//! correlated sub-event, with cross-observation enrichment resolved before
//! any row is surfaced. Transformation is pure: the same measurement always
//! yields the same rows in the same order.

mod lookups;
mod transformer;

mod nettests;

pub use self::lookups::{FingerprintDb, IpInfo, NetinfoDb, NoFingerprints, NoNetinfo};
pub use self::transformer::MeasurementTransformer;

use models::{HttpMiddleboxObservation, Measurement, WebControlObservation, WebObservation};

/// Observation rows grouped by destination table.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ObservationBatch {
    pub web: Vec<WebObservation>,
    pub web_ctrl: Vec<WebControlObservation>,
    pub http_middlebox: Vec<HttpMiddleboxObservation>,
}

impl ObservationBatch {
    pub fn len(&self) -> usize {
        self.web.len() + self.web_ctrl.len() + self.http_middlebox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transforms one measurement into its observation rows. The `Base` variant
/// (no dedicated decoder) yields an empty batch; the caller is expected to
/// count it as a dispatch miss.
pub fn measurement_to_observations(
    measurement: &Measurement,
    netinfo: &dyn NetinfoDb,
    fingerprints: &dyn FingerprintDb,
    bucket_date: &str,
) -> ObservationBatch {
    let ctx = MeasurementTransformer::new(measurement.header(), netinfo, fingerprints, bucket_date);
    match measurement {
        Measurement::WebConnectivity(m) => nettests::web_connectivity::transform(m, &ctx),
        Measurement::DnsCheck(m) => nettests::dnscheck::transform(m, &ctx),
        Measurement::Signal(m) => nettests::signal::transform(m, &ctx),
        Measurement::Telegram(m) => nettests::telegram::transform(m, &ctx),
        Measurement::Tor(m) => nettests::tor::transform(m, &ctx),
        Measurement::StunReachability(m) => nettests::stun_reachability::transform(m, &ctx),
        Measurement::Whatsapp(m) => nettests::whatsapp::transform(m, &ctx),
        Measurement::HttpInvalidRequestLine(m) => {
            nettests::http_invalid_request_line::transform(m, &ctx)
        }
        Measurement::HttpHeaderFieldManipulation(m) => {
            nettests::http_header_field_manipulation::transform(m, &ctx)
        }
        Measurement::Base(m) => {
            tracing::debug!(
                test_name = %m.header.test_name,
                "no transformer for test, skipping"
            );
            ObservationBatch::default()
        }
    }
}
