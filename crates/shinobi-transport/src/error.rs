/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was already closed when the operation started.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Opening an outbound connection failed (refused, unreachable, ...).
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The outbound connection attempt did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimedOut(std::time::Duration),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The peer sent more bytes than one frame may hold without a delimiter.
    #[error("frame too large: {len} bytes buffered (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// The outgoing payload contains the frame delimiter, which would split
    /// it into two frames on the other side.
    #[error("payload contains the frame delimiter {0:?}")]
    InvalidFrame(char),
}
