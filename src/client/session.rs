//! High-level client runs: play into a sink, publish a reader, load test

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::message::{ControlEvent, MessageBody};
use crate::registry::PublishMode;
use crate::storage::{FlvFileReader, FlvFileWriter, RecordedReader, RecordingSink};

use super::config::ClientOptions;
use super::connector::RtmpConnector;

/// Outcome of one playback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayReport {
    /// Media and data messages received (aggregates counted per part)
    pub messages: u64,
    pub bytes: u64,
    /// Timestamp of the last media message
    pub last_timestamp: u32,
}

/// Outcome of a load run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub completed: usize,
    pub failed: usize,
    pub messages: u64,
}

/// Play `name` until the server ends the stream, writing media into `sink`
///
/// Ends on stream EOF or play stop; a play-failed status is an error.
pub async fn play_to_sink<S>(
    connector: &mut RtmpConnector<S>,
    name: &str,
    start: i32,
    length: i32,
    mut sink: Option<Box<dyn RecordingSink>>,
) -> Result<PlayReport>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    connector.play(name, start, length).await?;
    let mut report = PlayReport::default();

    let result = loop {
        let message = match connector.read_message().await {
            Ok(message) => message,
            Err(Error::ConnectionClosed) => break Ok(()),
            Err(e) => break Err(e),
        };
        match &message.body {
            MessageBody::Control(ControlEvent::StreamEof(_)) => break Ok(()),
            MessageBody::Command(cmd) => match cmd.status_code() {
                Some(NS_PLAY_FAILED) => break Err(Error::Rejected(NS_PLAY_FAILED.to_string())),
                Some(NS_PLAY_STOP) => tracing::debug!(name = name, "Play stopped"),
                Some(code) => tracing::debug!(name = name, code = code, "Status"),
                None => {}
            },
            MessageBody::Audio(_) | MessageBody::Video(_) | MessageBody::Metadata(_) | MessageBody::Aggregate(_) => {
                for part in message.split_aggregate()? {
                    // placeholders and player notices are not media
                    let keep = match &part.body {
                        MessageBody::Metadata(meta) => meta.is_on_meta_data(),
                        _ => !part.payload().is_empty(),
                    };
                    if !keep {
                        continue;
                    }
                    report.messages += 1;
                    report.bytes += part.header.size as u64;
                    if !matches!(part.body, MessageBody::Metadata(_)) {
                        report.last_timestamp = part.timestamp();
                    }
                    if let Some(sink) = sink.as_mut() {
                        sink.write(&part).await?;
                    }
                }
            }
            _ => {}
        }
    };

    if let Some(mut sink) = sink {
        sink.close().await?;
    }
    tracing::info!(name = name, messages = report.messages, bytes = report.bytes, "Playback finished");
    result.map(|_| report)
}

/// Publish a recording `loops` times, paced by message timestamps
///
/// Each pass is shifted to follow the previous one so timestamps keep
/// increasing. Returns the number of messages sent.
pub async fn publish_from_reader<S>(
    connector: &mut RtmpConnector<S>,
    name: &str,
    mode: PublishMode,
    reader: &mut dyn RecordedReader,
    loops: usize,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    connector.publish(name, mode).await?;
    for message in reader.start_messages() {
        connector.send_media(message).await?;
    }

    let started = Instant::now();
    let mut offset = 0u32;
    let mut sent = 0u64;
    for pass in 0..loops.max(1) {
        reader.seek(0);
        let mut last = 0u32;
        // gap between the last two messages; the next pass starts one gap later
        let mut interval = 1u32;
        while let Some(message) = reader.next_message() {
            let source = message.timestamp();
            if source > last {
                interval = source - last;
                last = source;
            }
            let timestamp = offset.saturating_add(source);
            sleep_until(started + Duration::from_millis(timestamp as u64)).await;
            connector.send_media(message.with_timestamp(timestamp)).await?;
            sent += 1;
        }
        tracing::debug!(name = name, pass = pass + 1, messages = sent, "Publish pass complete");
        offset = offset.saturating_add(last).saturating_add(interval);
    }

    connector.unpublish().await?;
    reader.close();
    tracing::info!(name = name, messages = sent, "Publish finished");
    Ok(sent)
}

/// Run `load` concurrent players, at most `threads` at a time
pub async fn run_load(options: ClientOptions) -> Result<LoadReport> {
    options.validate()?;
    let name = options
        .stream_name
        .clone()
        .ok_or_else(|| Error::Config("stream name required".into()))?;
    let permits = Arc::new(Semaphore::new(options.threads));
    let mut tasks = JoinSet::new();

    for index in 0..options.load {
        let options = options.clone();
        let name = name.clone();
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| Error::Config("load semaphore closed".into()))?;
            tracing::debug!(player = index, "Starting player");
            let (start, length) = (options.start, options.length);
            let mut connector = RtmpConnector::open(options).await?;
            connector.create_stream().await?;
            play_to_sink(&mut connector, &name, start, length, None).await
        });
    }

    let mut report = LoadReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(play)) => {
                report.completed += 1;
                report.messages += play.messages;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Player failed");
                report.failed += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Player task panicked");
                report.failed += 1;
            }
        }
    }
    tracing::info!(completed = report.completed, failed = report.failed, "Load run finished");
    Ok(report)
}

/// Run the client as the options describe: publish, load test or play
pub async fn run(options: ClientOptions) -> Result<()> {
    options.validate()?;
    if options.load > 1 {
        run_load(options).await?;
        return Ok(());
    }

    let name = options
        .stream_name
        .clone()
        .ok_or_else(|| Error::Config("stream name required".into()))?;

    match (options.publish, options.file_to_publish.clone()) {
        (Some(mode), Some(path)) => {
            let mut reader = FlvFileReader::open(&path).await?;
            let loops = options.loop_count;
            let mut connector = RtmpConnector::open(options).await?;
            connector.create_stream().await?;
            publish_from_reader(&mut connector, &name, mode, &mut reader, loops).await?;
            connector.close().await
        }
        (Some(_), None) => Err(Error::Config("publish requires a file to publish".into())),
        (None, _) => {
            let sink: Option<Box<dyn RecordingSink>> = match &options.save_as {
                Some(path) => Some(Box::new(FlvFileWriter::create(path).await?)),
                None => None,
            };
            let (start, length) = (options.start, options.length);
            let mut connector = RtmpConnector::open(options).await?;
            connector.create_stream().await?;
            play_to_sink(&mut connector, &name, start, length, sink).await?;
            connector.close().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::DuplexStream;

    use crate::protocol::message::RtmpMessage;
    use crate::registry::{StreamIdAllocator, StreamRegistry};
    use crate::server::{Connection, ServerConfig};
    use crate::session::SharedServices;
    use crate::storage::memory::{Clip, MemoryReader};
    use crate::storage::MemoryStore;

    fn frames(count: u32, step: u32) -> Vec<RtmpMessage> {
        (0..count)
            .map(|i| RtmpMessage::video(i * step, Bytes::from(vec![0x27, 0x01, i as u8])))
            .collect()
    }

    async fn connected(shared: &SharedServices) -> RtmpConnector<DuplexStream> {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let config = ServerConfig::default();
        tokio::spawn(Connection::new(1, server_io, None, config, shared.clone()).run());
        let mut client = RtmpConnector::handshake(client_io, ClientOptions::default())
            .await
            .unwrap();
        client.connect().await.unwrap();
        client.create_stream().await.unwrap();
        client
    }

    fn services(store: &MemoryStore) -> SharedServices {
        SharedServices::new(
            Arc::new(StreamRegistry::new()),
            Arc::new(StreamIdAllocator::new(16)),
            Arc::new(store.clone()),
        )
    }

    #[tokio::test]
    async fn test_play_into_sink_splits_aggregates() {
        let store = MemoryStore::new("vod");
        store.add_clip("clip", frames(5, 20)).await;
        let shared = services(&store);
        let mut client = connected(&shared).await;

        let capture = MemoryStore::new("capture");
        let sink = crate::storage::Application::open_writer(&capture, "copy").await.unwrap();
        let report = play_to_sink(&mut client, "clip", -2, -1, Some(sink)).await.unwrap();

        // synthesized onMetaData plus five frames
        assert_eq!(report.messages, 6);
        assert_eq!(report.last_timestamp, 80);
        let saved = capture.recording("copy").await.unwrap();
        assert_eq!(saved.len(), 6);
    }

    #[tokio::test]
    async fn test_play_missing_is_error() {
        let store = MemoryStore::new("vod");
        let shared = services(&store);
        let mut client = connected(&shared).await;
        let result = play_to_sink(&mut client, "nothing", -2, -1, None).await;
        assert!(matches!(result, Err(Error::Rejected(_))));
    }

    #[tokio::test]
    async fn test_publish_record_loops() {
        let store = MemoryStore::new("vod");
        let shared = services(&store);
        let mut client = connected(&shared).await;

        let mut reader = MemoryReader::new(Arc::new(Clip::new(frames(3, 10))));
        let sent = publish_from_reader(&mut client, "take", PublishMode::Record, &mut reader, 2)
            .await
            .unwrap();
        assert_eq!(sent, 6);

        // the recording lands once the server sees the unpublish
        let recorded = loop {
            if let Some(recorded) = store.recording("take").await {
                break recorded;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        let timestamps: Vec<u32> = recorded
            .iter()
            .filter(|m| m.header.is_video())
            .map(|m| m.timestamp())
            .collect();
        // the second pass follows the first by one frame interval
        assert_eq!(timestamps, vec![0, 10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn test_run_load_requires_name() {
        let options = ClientOptions::default().load(3, 2);
        assert!(matches!(run_load(options).await, Err(Error::Config(_))));
    }
}
