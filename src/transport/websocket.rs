//! tokio-tungstenite implementation of the socket seam
//!
//! Offers every configured sub-protocol in one `Sec-WebSocket-Protocol`
//! header, dials through an environment proxy when one applies, and wraps
//! wss endpoints in rustls.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::proxy::{self, Route};
use super::{tls, Dialer, Frame, FrameReader, FrameWriter, ReadError, Socket};
use crate::config::Parameters;
use crate::types::{Result, TransportError};

type WsStream<S> = WebSocketStream<MaybeTlsStream<S>>;

/// Status reported when the remote closes without a code
const NO_STATUS_RECEIVED: u16 = 1005;

/// Production dialer
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketDialer;

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, params: &Parameters) -> Result<Socket> {
        let url = params.endpoint()?;

        let mut request = url.as_str().into_client_request().map_err(handshake_error)?;
        let offered = HeaderValue::from_str(&params.subprotocols.join(", ")).map_err(|e| {
            TransportError::Config(format!("invalid sub-protocol header: {}", e))
        })?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, offered);

        let connector = tls::connector(&url, params.tls_skip_verify)?;

        let mut config = WebSocketConfig::default();
        config.write_buffer_size = params.write_buffer_size;

        match proxy::connect(&url, params).await? {
            Route::Direct(stream) => upgrade(request, stream, config, connector).await,
            Route::Tunnel(stream) => upgrade(request, stream, config, connector).await,
        }
    }
}

/// Run the WebSocket handshake over `stream` and split the result
async fn upgrade<S>(
    request: Request,
    stream: S,
    config: WebSocketConfig,
    connector: Option<Connector>,
) -> Result<Socket>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ws, response) = client_async_tls_with_config(request, stream, Some(config), connector)
        .await
        .map_err(handshake_error)?;
    if let Some(protocol) = response.headers().get(SEC_WEBSOCKET_PROTOCOL) {
        debug!("Negotiated sub-protocol {:?}", protocol);
    }

    let (sink, stream) = ws.split();
    Ok(Socket {
        writer: Box::new(WsWriter { sink }),
        reader: Box::new(WsReader { stream }),
    })
}

/// Map a failed upgrade, keeping the remote status when there is one
fn handshake_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => TransportError::Handshake {
            status: Some(response.status().as_u16()),
            reason: format!("bad handshake: HTTP {}", response.status()),
        },
        WsError::Io(e) => TransportError::Dial(e.to_string()),
        other => TransportError::Handshake {
            status: None,
            reason: other.to_string(),
        },
    }
}

struct WsReader<S> {
    stream: SplitStream<WsStream<S>>,
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Option<std::result::Result<Frame, ReadError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    return Some(Err(ReadError::LocallyClosed));
                }
                Err(e) => return Some(Err(ReadError::Failed(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Payload(text.into_bytes()))),
                Message::Binary(data) => return Some(Ok(Frame::Payload(data))),
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    return Some(Ok(Frame::Close { code, reason }));
                }
                // Pongs are queued by tungstenite and flushed on the next I/O
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

struct WsWriter<S> {
    sink: SplitSink<WsStream<S>, Message>,
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Write(e.to_string())),
        }
    }
}
