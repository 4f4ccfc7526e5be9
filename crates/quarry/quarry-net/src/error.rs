use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open raw IPv6 socket for protocol {protocol}")]
    Open {
        protocol: i32,
        #[source]
        source: io::Error,
    },
    #[error("setting socket option {option} failed")]
    Option {
        option: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{op} failed with errno {code}")]
    Os { op: &'static str, code: i32 },
    #[error("closing socket failed")]
    Close(#[source] io::Error),
}

impl TransportError {
    /// Captures `errno` from the failed call that just returned.
    pub(crate) fn last_os(op: &'static str) -> Self {
        TransportError::Os {
            op,
            code: io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }

    /// Platform error code, when there is one.
    pub fn code(&self) -> Option<i32> {
        match self {
            TransportError::Os { code, .. } => Some(*code),
            TransportError::Open { source, .. }
            | TransportError::Option { source, .. }
            | TransportError::Close(source) => source.raw_os_error(),
        }
    }
}
