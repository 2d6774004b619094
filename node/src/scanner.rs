//! Polling driver for the serial RFID reader.
//!
//! The reader is spoken to over any byte stream: a serial device node, or a
//! TCP bridge in front of one. Each poll writes [`POLL_COMMAND`] and reads a
//! single response frame. A scan that times out mid-poll leaves its response
//! owed; the next scan reads and discards it before polling again.

use std::path::Path;
use std::time::Duration;

use pharmachain_common::rfid::{
    body_len, decode_frame, ReaderFrame, RfidTag, FRAME_HEADER, POLL_COMMAND,
};
use pharmachain_common::TrackerError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub trait AsyncDevice: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncDevice for T {}

pub struct DeviceScanner {
    link: Mutex<ReaderLink>,
    poll_interval: Duration,
}

/// The device plus the number of polls whose response was never read.
struct ReaderLink {
    device: Box<dyn AsyncDevice>,
    unanswered: usize,
}

fn io_failure(err: std::io::Error) -> TrackerError {
    TrackerError::ScannerFailed(err.to_string())
}

impl DeviceScanner {
    pub fn new(device: impl AsyncDevice + 'static, poll_interval: Duration) -> Self {
        Self {
            link: Mutex::new(ReaderLink {
                device: Box::new(device),
                unanswered: 0,
            }),
            poll_interval,
        }
    }

    /// Open a serial device node that is already configured for the reader.
    pub async fn open_path(path: &Path, poll_interval: Duration) -> Result<Self, TrackerError> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| TrackerError::ScannerFailed(format!("{}: {e}", path.display())))?;
        info!(device = %path.display(), "rfid reader opened");
        Ok(Self::new(file, poll_interval))
    }

    pub async fn connect(addr: &str, poll_interval: Duration) -> Result<Self, TrackerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TrackerError::ScannerFailed(format!("{addr}: {e}")))?;
        info!(%addr, "rfid reader connected");
        Ok(Self::new(stream, poll_interval))
    }

    /// Poll until a tag is presented or `timeout` elapses.
    ///
    /// Only one scan runs at a time; a second caller waits for the device.
    pub async fn scan(&self, timeout: Duration) -> Result<RfidTag, TrackerError> {
        let mut link = self.link.lock().await;
        let poll = async {
            link.settle().await?;
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match link.poll_once().await {
                    Ok(ReaderFrame::Tag(tag)) => return Ok(tag),
                    Ok(ReaderFrame::NoCard) => debug!("no card in field"),
                    Err(TrackerError::InvalidRfidTag(reason)) => {
                        warn!("discarding reader frame: {reason}")
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(TrackerError::ScanTimeout(timeout.as_millis() as u64)),
        }
    }
}

impl ReaderLink {
    /// Read and drop responses owed to polls of an abandoned scan.
    async fn settle(&mut self) -> Result<(), TrackerError> {
        while self.unanswered > 0 {
            match self.read_frame().await {
                Ok(frame) => debug!(len = frame.len(), "dropping late reader response"),
                Err(TrackerError::InvalidRfidTag(reason)) => {
                    debug!("dropping late reader response: {reason}")
                }
                Err(e) => return Err(e),
            }
            self.unanswered -= 1;
        }
        Ok(())
    }

    async fn poll_once(&mut self) -> Result<ReaderFrame, TrackerError> {
        self.drain().await?;
        self.device.write_all(&POLL_COMMAND).await.map_err(io_failure)?;
        self.device.flush().await.map_err(io_failure)?;
        self.unanswered += 1;
        let frame = self.read_frame().await;
        self.unanswered -= 1;
        decode_frame(&frame?)
    }

    /// Discard bytes that are already buffered and not owed to any poll.
    async fn drain(&mut self) -> Result<(), TrackerError> {
        let mut sink = [0u8; 64];
        loop {
            match tokio::time::timeout(Duration::ZERO, self.device.read(&mut sink)).await {
                Ok(Ok(0)) => {
                    return Err(TrackerError::ScannerFailed("reader closed the stream".into()))
                }
                Ok(Ok(n)) => debug!(n, "discarding stray reader bytes"),
                Ok(Err(e)) => return Err(io_failure(e)),
                Err(_) => return Ok(()),
            }
        }
    }

    /// Read one frame, skipping anything before the next frame header.
    async fn read_frame(&mut self) -> Result<Vec<u8>, TrackerError> {
        let mut header = [0u8; 4];
        self.device
            .read_exact(&mut header[..2])
            .await
            .map_err(io_failure)?;
        let mut skipped = 0usize;
        while header[..2] != FRAME_HEADER {
            header[0] = header[1];
            self.device
                .read_exact(&mut header[1..2])
                .await
                .map_err(io_failure)?;
            skipped += 1;
        }
        if skipped > 0 {
            debug!(skipped, "resynchronised on frame header");
        }
        self.device
            .read_exact(&mut header[2..])
            .await
            .map_err(io_failure)?;

        let len = body_len(&header)?;
        let mut frame = Vec::with_capacity(4 + len);
        frame.extend_from_slice(&header);
        frame.resize(4 + len, 0);
        self.device
            .read_exact(&mut frame[4..])
            .await
            .map_err(io_failure)?;
        Ok(frame)
    }
}
