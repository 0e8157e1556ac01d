use std::fmt::{Debug, Display};
use std::net::AddrParseError;
use std::{fmt, io, result};

#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

#[derive(Debug)]
pub enum ErrorKind {
    /// A record frame failed its digest check.
    Hashfail,
    /// A record frame header was malformed.
    InvalidHeader,
    /// The very first decoded frame was malformed; the peer is probably
    /// not speaking this protocol, so nothing is sent back.
    FirstPacketIncorrect,
    /// The peer sent a reset frame.
    RemoteReset,
    /// The transport reached EOF without a prior close frame.
    InsecureClosing,
    /// The transport reached EOF after an orderly close frame.
    ConnectionClosed,
    /// A tunnel header carried an unknown protocol version.
    UnsupportedVersion(u8),
    /// The server could not reach the configured frontend.
    FrontendUnavailable(String),
    /// All 65535 connection ids are in use.
    NoIdAvailable,
    ClosedError,
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(s.to_string())),
        }
    }

    pub fn hashfail() -> Self {
        Error {
            err: Box::new(ErrorKind::Hashfail),
        }
    }

    pub fn invalid_header() -> Self {
        Error {
            err: Box::new(ErrorKind::InvalidHeader),
        }
    }

    pub fn first_packet_incorrect() -> Self {
        Error {
            err: Box::new(ErrorKind::FirstPacketIncorrect),
        }
    }

    pub fn remote_reset() -> Self {
        Error {
            err: Box::new(ErrorKind::RemoteReset),
        }
    }

    pub fn insecure_closing() -> Self {
        Error {
            err: Box::new(ErrorKind::InsecureClosing),
        }
    }

    pub fn connection_closed() -> Self {
        Error {
            err: Box::new(ErrorKind::ConnectionClosed),
        }
    }

    pub fn unsupported_version(ver: u8) -> Self {
        Error {
            err: Box::new(ErrorKind::UnsupportedVersion(ver)),
        }
    }

    pub fn frontend_unavailable<S: ToString>(msg: S) -> Self {
        Error {
            err: Box::new(ErrorKind::FrontendUnavailable(msg.to_string())),
        }
    }

    pub fn no_id_available() -> Self {
        Error {
            err: Box::new(ErrorKind::NoIdAvailable),
        }
    }

    pub fn closed() -> Self {
        Error {
            err: Box::new(ErrorKind::ClosedError),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    /// True for the record-layer errors that are answered with a reset
    /// frame when at least one good frame was already decoded.
    pub fn wants_reset_reply(&self) -> bool {
        matches!(*self.err, ErrorKind::Hashfail | ErrorKind::InvalidHeader)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(String::from(err))),
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(err)),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::IOError(err)),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::YAMLError(err)),
        }
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::new(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::fmt::Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Hashfail => f.write_str("record frame digest mismatch"),
            ErrorKind::InvalidHeader => f.write_str("malformed record frame header"),
            ErrorKind::FirstPacketIncorrect => {
                f.write_str("first record frame is malformed, peer speaks another protocol?")
            }
            ErrorKind::RemoteReset => f.write_str("peer reset the tunnel"),
            ErrorKind::InsecureClosing => f.write_str("transport closed without a close frame"),
            ErrorKind::ConnectionClosed => f.write_str("tunnel closed by peer"),
            ErrorKind::UnsupportedVersion(v) => write!(f, "unsupported tunnel version {}", v),
            ErrorKind::FrontendUnavailable(s) => write!(f, "frontend unavailable: {}", s),
            ErrorKind::NoIdAvailable => f.write_str("no connection id available"),
            ErrorKind::ClosedError => f.write_str("socket/file is closed"),
            ErrorKind::StringError(s) => f.write_str(s),
            ErrorKind::IOError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::YAMLError(e) => std::fmt::Display::fmt(&e, f),
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}
