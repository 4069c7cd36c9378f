use crate::error::ChannelError;
use bytes::Bytes;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error};

pub const DEFAULT_STREAM_CAPACITY: usize = 4096;

const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Anything that can put a raw Ethernet frame on the wire.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<(), ChannelError>;
}

struct DatalinkSink {
    tx: Mutex<Box<dyn DataLinkSender>>,
}

impl FrameSink for DatalinkSink {
    fn send_frame(&self, frame: &[u8]) -> Result<(), ChannelError> {
        let mut tx = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tx.send_to(frame, None)
            .ok_or(ChannelError::SenderUnavailable)??;
        Ok(())
    }
}

/// One interface, shared by every negotiation.
///
/// Injection is serialized behind the sink. Every captured frame is fanned out
/// to all current subscribers, so each listener sees the whole wire and has to
/// pick out what concerns it.
pub struct FrameChannel {
    sink: Arc<dyn FrameSink>,
    frames: broadcast::Sender<Bytes>,
    running: Arc<AtomicBool>,
}

impl FrameChannel {
    pub fn new(sink: Arc<dyn FrameSink>, capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Self {
            sink,
            frames,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Opens a promiscuous datalink channel on `iface` and starts the capture thread.
    pub fn open(iface: &str, capacity: usize) -> Result<Self, ChannelError> {
        let interface = find_interface(iface)?;
        let config = Config {
            read_timeout: Some(READ_TIMEOUT),
            promiscuous: true,
            ..Default::default()
        };

        let (tx, rx) = match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(ChannelError::Unsupported(iface.to_string())),
            Err(source) => {
                return Err(ChannelError::Open {
                    iface: iface.to_string(),
                    source,
                });
            }
        };

        let channel = Self::new(Arc::new(DatalinkSink { tx: Mutex::new(tx) }), capacity);

        let frames = channel.frames.clone();
        let running = Arc::clone(&channel.running);
        let name = interface.name.clone();
        thread::Builder::new()
            .name(format!("capture-{name}"))
            .spawn(move || capture(rx, frames, running, name))
            .map_err(|source| ChannelError::Open {
                iface: iface.to_string(),
                source,
            })?;

        debug!("Capture started on {}", iface);
        Ok(channel)
    }

    pub fn inject(&self, frame: &[u8]) -> Result<(), ChannelError> {
        self.sink.send_frame(frame)
    }

    /// Frames captured from now on. Subscribe before sending anything whose
    /// reply must not be missed.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }
}

impl Drop for FrameChannel {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn capture(
    mut rx: Box<dyn DataLinkReceiver>,
    frames: broadcast::Sender<Bytes>,
    running: Arc<AtomicBool>,
    iface: String,
) {
    while running.load(Ordering::Relaxed) {
        match rx.next() {
            Ok(frame) => {
                let _ = frames.send(Bytes::copy_from_slice(frame));
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                error!("Capture on {} stopped: {}", iface, e);
                break;
            }
        }
    }
    debug!("Capture thread for {} exiting", iface);
}

pub fn interfaces() -> Vec<NetworkInterface> {
    datalink::interfaces()
}

pub fn find_interface(name: &str) -> Result<NetworkInterface, ChannelError> {
    interfaces()
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| ChannelError::InterfaceNotFound(name.to_string()))
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[tokio::test]
    async fn test_inject_reaches_sink() {
        let (sink, mut sent) = RecordingSink::new();
        let channel = FrameChannel::new(sink, 8);

        channel.inject(&[1, 2, 3]).unwrap();
        assert_eq!(sent.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_inject_failure_surfaces() {
        let (sink, _sent) = RecordingSink::new();
        sink.fail_sends();
        let channel = FrameChannel::new(sink, 8);

        assert!(matches!(channel.inject(&[0]), Err(ChannelError::Send(_))));
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_frame() {
        let (sink, _sent) = RecordingSink::new();
        let channel = FrameChannel::new(sink, 8);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        assert_eq!(channel.deliver(Bytes::from_static(b"one")), 2);
        assert_eq!(channel.deliver(Bytes::from_static(b"two")), 2);

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
            assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_frames() {
        let (sink, _sent) = RecordingSink::new();
        let channel = FrameChannel::new(sink, 8);

        assert_eq!(channel.deliver(Bytes::from_static(b"early")), 0);
        let mut rx = channel.subscribe();
        channel.deliver(Bytes::from_static(b"late"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"late"));
    }

    #[test]
    fn test_unknown_interface() {
        assert!(matches!(
            find_interface("no-such-iface0"),
            Err(ChannelError::InterfaceNotFound(name)) if name == "no-such-iface0"
        ));
    }
}
