pub mod backend;
pub mod error;
pub mod ftp;
pub mod http;
pub mod local;
pub mod object;
pub mod s3;

pub use backend::{Connector, DefaultConnector, RemoteBlob, RemoteMeta, Transport, TransportKind};
pub use error::{TransportError, TransportErrorKind};
pub use ftp::FtpTransport;
pub use http::HttpTransport;
pub use local::{LocalSnapshot, LocalStateFile};
pub use object::ObjectTransport;
pub use s3::S3Transport;
