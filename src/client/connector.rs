//! RTMP client connector
//!
//! Low-level client for talking to RTMP servers over any byte stream.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::amf::AmfObject;
use crate::error::{Error, Result};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder};
use crate::protocol::cipher::CipherPair;
use crate::protocol::constants::*;
use crate::protocol::handshake::{Handshake, HandshakeRole};
use crate::protocol::message::{Command, ControlEvent, MessageBody, RtmpMessage};
use crate::registry::PublishMode;

use super::config::ClientOptions;

/// RTMP client connector
pub struct RtmpConnector<S> {
    options: ClientOptions,
    reader: ReadHalf<S>,
    writer: BufWriter<WriteHalf<S>>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    ciphers: Option<CipherPair>,
    /// Answer to a SWF verification request, if configured
    swf_response: Option<Bytes>,
    stream_id: u32,
    next_transaction: f64,
    /// Server's acknowledgement window; 0 until announced
    ack_window: u32,
    bytes_read: u64,
    last_ack: u64,
}

impl RtmpConnector<TcpStream> {
    /// Open a TCP connection, handshake and send connect
    pub async fn open(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let addr = format!("{}:{}", options.host, options.port);
        let socket = timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout)??;
        if options.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        tracing::debug!(addr = %addr, "Connected");

        let mut connector = Self::handshake(socket, options).await?;
        connector.connect().await?;
        Ok(connector)
    }
}

impl<S> RtmpConnector<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run the client side of the handshake over `stream`
    pub async fn handshake(stream: S, options: ClientOptions) -> Result<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut connector = Self {
            options,
            reader: read_half,
            writer: BufWriter::with_capacity(64 * 1024, write_half),
            read_buf: BytesMut::with_capacity(64 * 1024),
            write_buf: BytesMut::with_capacity(64 * 1024),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            ciphers: None,
            swf_response: None,
            stream_id: 0,
            next_transaction: 1.0,
            ack_window: 0,
            bytes_read: 0,
            last_ack: 0,
        };
        connector.do_handshake().await?;
        Ok(connector)
    }

    async fn do_handshake(&mut self) -> Result<()> {
        let mut handshake = Handshake::new(HandshakeRole::Client, self.options.handshake_config());
        let c0c1 = handshake
            .generate_initial()?
            .ok_or(Error::Handshake(crate::error::HandshakeError::InvalidState))?;
        self.writer.write_all(&c0c1).await?;
        self.writer.flush().await?;

        let connect_timeout = self.options.connect_timeout;
        timeout(connect_timeout, async {
            while !handshake.is_done() {
                if let Some(response) = handshake.process(&mut self.read_buf)? {
                    self.writer.write_all(&response).await?;
                    self.writer.flush().await?;
                    continue;
                }
                let n = self.reader.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
            }
            Ok::<_, Error>(())
        })
        .await
        .map_err(|_| Error::Timeout)??;

        if let Some(mut ciphers) = handshake.take_ciphers() {
            ciphers.inbound.apply(&mut self.read_buf[..]);
            self.ciphers = Some(ciphers);
        }
        self.swf_response = handshake.swf_response();
        tracing::debug!(
            encrypted = handshake.is_encrypted(),
            digest = handshake.peer_digest_verified(),
            "Handshake complete"
        );
        Ok(())
    }

    /// Send connect and wait for the result
    pub async fn connect(&mut self) -> Result<()> {
        let object = AmfObject::new()
            .with("app", self.options.app.as_str())
            .with("flashVer", self.options.flash_ver.as_str())
            .with("tcUrl", self.options.tc_url())
            .with("fpad", false)
            .with("capabilities", 15.0)
            .with("audioCodecs", 3191.0)
            .with("videoCodecs", 252.0)
            .with("videoFunction", 1.0);
        let transaction_id = self.take_transaction();
        self.send(RtmpMessage::command(Command::connect(transaction_id, object)))
            .await?;

        let reply = self.await_reply(transaction_id).await?;
        if reply.name == CMD_ERROR {
            let code = reply.status_code().unwrap_or(NC_CONNECT_REJECTED).to_string();
            tracing::warn!(code = %code, "Connect rejected");
            return Err(Error::Rejected(code));
        }
        tracing::info!(tc_url = %self.options.tc_url(), "Connected");

        self.send(RtmpMessage::chunk_size(RECOMMENDED_CHUNK_SIZE)).await
    }

    /// Allocate a message stream for play or publish
    pub async fn create_stream(&mut self) -> Result<u32> {
        let transaction_id = self.take_transaction();
        self.send(RtmpMessage::command(Command::create_stream(transaction_id)))
            .await?;

        let reply = self.await_reply(transaction_id).await?;
        match (reply.name.as_str(), reply.arg_number(0)) {
            (CMD_RESULT, Some(id)) => {
                self.stream_id = id as u32;
                tracing::debug!(stream_id = self.stream_id, "Stream created");
                Ok(self.stream_id)
            }
            _ => Err(Error::Rejected(
                reply.status_code().unwrap_or(NC_CALL_FAILED).to_string(),
            )),
        }
    }

    /// Ask for playback; media follows through [`read_message`](Self::read_message)
    pub async fn play(&mut self, name: &str, start: i32, length: i32) -> Result<()> {
        let buffer = ControlEvent::SetBuffer {
            stream_id: self.stream_id,
            buffer_ms: self.options.buffer,
        };
        self.send(RtmpMessage::control(buffer)).await?;
        let play = RtmpMessage::command(Command::play(name, start, length)).with_stream_id(self.stream_id);
        self.send(play).await?;
        tracing::debug!(name = name, start = start, length = length, "Play sent");
        Ok(())
    }

    /// Publish and wait for the server's verdict
    pub async fn publish(&mut self, name: &str, mode: PublishMode) -> Result<()> {
        let publish = RtmpMessage::command(Command::publish(name, mode.as_str())).with_stream_id(self.stream_id);
        self.send(publish).await?;
        loop {
            let message = self.read_message().await?;
            let code = match message.as_command().and_then(|c| c.status_code()) {
                Some(code) => code.to_string(),
                None => continue,
            };
            if code == NS_PUBLISH_START {
                tracing::info!(name = name, mode = mode.as_str(), "Publishing");
                return Ok(());
            }
            if code == NS_PUBLISH_BAD_NAME || code.contains("Failed") {
                return Err(Error::Rejected(code));
            }
        }
    }

    pub async fn unpublish(&mut self) -> Result<()> {
        let message = RtmpMessage::command(Command::unpublish()).with_stream_id(self.stream_id);
        self.send(message).await
    }

    pub async fn pause(&mut self, paused: bool, position: u32) -> Result<()> {
        let message = RtmpMessage::command(Command::pause(paused, position)).with_stream_id(self.stream_id);
        self.send(message).await
    }

    pub async fn seek(&mut self, position: u32) -> Result<()> {
        let message = RtmpMessage::command(Command::seek(position)).with_stream_id(self.stream_id);
        self.send(message).await
    }

    /// Send audio, video or data on our stream
    pub async fn send_media(&mut self, message: RtmpMessage) -> Result<()> {
        let message = message.with_stream_id(self.stream_id);
        self.send(message).await
    }

    /// Chunk and write one message
    pub async fn send(&mut self, message: RtmpMessage) -> Result<()> {
        self.write_buf.clear();
        self.encoder.encode(&message.to_raw(), &mut self.write_buf);
        if let Some(ciphers) = self.ciphers.as_mut() {
            ciphers.outbound.apply(&mut self.write_buf[..]);
        }
        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next message
    ///
    /// Acknowledgements, pings and SWF verification requests are answered
    /// here; only the verification request is withheld from the caller.
    pub async fn read_message(&mut self) -> Result<RtmpMessage> {
        loop {
            if let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
                let message = RtmpMessage::from_raw(&raw)?;
                if self.on_received(&message).await? {
                    return Ok(message);
                }
                continue;
            }

            let n = timeout(self.options.read_timeout, self.reader.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| Error::Timeout)??;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            if let Some(ciphers) = self.ciphers.as_mut() {
                let start = self.read_buf.len() - n;
                ciphers.inbound.apply(&mut self.read_buf[start..]);
            }
        }
    }

    /// Returns whether the message goes up to the caller
    async fn on_received(&mut self, message: &RtmpMessage) -> Result<bool> {
        self.bytes_read += message.header.size as u64;
        if self.ack_window > 0 && self.bytes_read - self.last_ack > self.ack_window as u64 {
            self.last_ack = self.bytes_read;
            self.send(RtmpMessage::bytes_read(self.bytes_read as u32)).await?;
        }

        match &message.body {
            MessageBody::WindowAckSize(size) => {
                self.ack_window = *size;
            }
            MessageBody::Control(ControlEvent::PingRequest(ts)) => {
                self.send(RtmpMessage::control(ControlEvent::PingResponse(*ts))).await?;
            }
            MessageBody::Control(ControlEvent::SwfVerifyRequest) => {
                match self.swf_response.clone() {
                    Some(response) => {
                        tracing::debug!("Answering SWF verification request");
                        self.send(RtmpMessage::control(ControlEvent::SwfVerifyResponse(response)))
                            .await?;
                    }
                    None => tracing::warn!("SWF verification requested but not configured"),
                }
                return Ok(false);
            }
            _ => {}
        }
        Ok(true)
    }

    /// Wait for `_result` / `_error` carrying `transaction_id`
    async fn await_reply(&mut self, transaction_id: f64) -> Result<Command> {
        loop {
            let message = self.read_message().await?;
            if let MessageBody::Command(cmd) = message.body {
                if (cmd.name == CMD_RESULT || cmd.name == CMD_ERROR) && cmd.transaction_id == transaction_id {
                    return Ok(cmd);
                }
            }
        }
    }

    fn take_transaction(&mut self) -> f64 {
        let id = self.next_transaction;
        self.next_transaction += 1.0;
        id
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
