use std::io;

use thiserror::Error;

use super::Coid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open connection to endpoint '{name}'")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to close connection {coid}")]
    Close {
        coid: Coid,
        #[source]
        source: io::Error,
    },
    #[error("send on connection {coid} failed")]
    Send {
        coid: Coid,
        #[source]
        source: io::Error,
    },
    #[error("pulse on connection {coid} failed")]
    Pulse {
        coid: Coid,
        #[source]
        source: io::Error,
    },
    #[error("failed to attach name '{name}'")]
    Attach {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("receive on channel {chid} failed")]
    Receive {
        chid: i32,
        #[source]
        source: io::Error,
    },
    #[error("reply to rcvid {rcvid} failed")]
    Reply {
        rcvid: i32,
        #[source]
        source: io::Error,
    },
}
