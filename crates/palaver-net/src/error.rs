use thiserror::Error;

/// Why a connection attempt or session ended abnormally. Protocol
/// validation errors stay in `palaver-shared`; these cover the transport.
#[derive(Error, Debug)]
pub enum NetError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame encoding failure on the outbound path.
    #[error("Frame encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The server sent a close frame with a non-normal code.
    #[error("Abnormal close from server: {0}")]
    AbnormalClose(String),

    /// The stream ended without a close frame.
    #[error("Socket stream ended")]
    StreamEnded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_errors_convert() {
        let bad = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: NetError = bad.into();
        assert!(matches!(err, NetError::Encoding(_)));
        assert!(err.to_string().starts_with("Frame encoding error"));
    }
}
