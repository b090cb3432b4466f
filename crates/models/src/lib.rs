mod dataformats;
mod observations;
mod timestamp;

pub mod nettests;

pub use self::dataformats::{
    DnsAnswer, DnsQuery, Failure, HttpRequest, HttpResponse, HttpTransaction, MaybeBinaryData,
    NetworkEvent, TcpConnect, TcpConnectStatus, TlsHandshake,
};
pub use self::nettests::{canonical_test_name, load_measurement, Header, LoadError, Measurement};
pub use self::observations::{
    HttpMiddleboxObservation, Scalar, ToScalar, WebControlObservation, WebObservation,
};
