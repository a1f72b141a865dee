//! Transfer engine
//!
//! Executes copies between device-visible addresses over a leased
//! channel, synchronously or asynchronously, with exactly one completion
//! signal per submitted operation. Validation happens before any channel
//! is leased so a rejected request consumes nothing, and a timed-out
//! synchronous transfer is forcibly terminated before its channel goes
//! back to the pool.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::dma::bus::{
    CompletionHandler, DmaBus, TransferCookie, TransferDescriptor, TransferStatus,
};
use crate::dma::channel::ChannelPool;
use crate::error::{AccelError, AccelResult};

/// Transfer scheduling over the channel pool and bus backend
pub struct TransferEngine {
    bus: Arc<dyn DmaBus>,
    channels: Arc<ChannelPool>,
    /// Upper bound for a single transfer, from the device capabilities
    max_transfer: u64,
}

impl TransferEngine {
    pub fn new(bus: Arc<dyn DmaBus>, channels: Arc<ChannelPool>, max_transfer: u64) -> Self {
        TransferEngine {
            bus,
            channels,
            max_transfer,
        }
    }

    pub fn bus(&self) -> &Arc<dyn DmaBus> {
        &self.bus
    }

    pub fn channels(&self) -> &Arc<ChannelPool> {
        &self.channels
    }

    /// Reject bad requests before any resource is consumed
    fn validate(&self, bytes: u64) -> AccelResult<()> {
        if bytes == 0 {
            return Err(AccelError::InvalidArgument(
                "zero-length transfer".to_string(),
            ));
        }
        if bytes > self.max_transfer {
            return Err(AccelError::InvalidSize {
                size: bytes,
                max: self.max_transfer,
            });
        }
        Ok(())
    }

    /// Synchronous copy: lease a channel, submit one operation, block
    /// until the completion signal fires or `timeout` elapses.
    ///
    /// On timeout the in-flight operation is terminated before this
    /// returns, and the lease guard returns the channel in every path:
    /// the caller never observes a leased-but-abandoned channel.
    pub fn transfer_sync(
        &self,
        dst: u64,
        src: u64,
        bytes: u64,
        timeout: Duration,
    ) -> AccelResult<u64> {
        self.validate(bytes)?;

        let lease = self.channels.lease()?;
        let (tx, rx) = mpsc::sync_channel::<crate::dma::bus::CompletionNotice>(1);

        let cookie = self.bus.submit(
            TransferDescriptor {
                channel: lease.id(),
                dst,
                src,
                bytes,
            },
            Box::new(move |notice| {
                let _ = tx.send(notice);
            }),
        )?;

        match rx.recv_timeout(timeout) {
            Ok(notice) => match notice.status {
                TransferStatus::Ok => Ok(notice.bytes),
                TransferStatus::Failed(code) => Err(AccelError::TransferFailed(code)),
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.bus.terminate(cookie);
                tracing::warn!(
                    channel = lease.id().index(),
                    ?timeout,
                    "synchronous transfer timed out, terminated"
                );
                Err(AccelError::Timeout(timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // The bus dropped the handler: torn down under us
                Err(AccelError::DeviceError(
                    "transfer terminated by device teardown".to_string(),
                ))
            }
        }
        // lease drops here, returning the channel
    }

    /// Asynchronous copy: returns immediately after submission.
    ///
    /// `on_complete` runs exactly once from the bus completion context,
    /// with no caller locks held. The channel lease is released before
    /// the callback is invoked, so the callback may submit further
    /// transfers. There is no implicit timeout; callers bound their own
    /// wait if they care.
    pub fn transfer_async(
        &self,
        dst: u64,
        src: u64,
        bytes: u64,
        on_complete: CompletionHandler,
    ) -> AccelResult<TransferCookie> {
        self.validate(bytes)?;

        let lease = self.channels.lease()?;
        let desc = TransferDescriptor {
            channel: lease.id(),
            dst,
            src,
            bytes,
        };

        self.bus.submit(
            desc,
            Box::new(move |notice| {
                drop(lease);
                on_complete(notice);
            }),
        )
    }

    /// Forcibly terminate one in-flight operation
    pub fn terminate(&self, cookie: TransferCookie) {
        self.bus.terminate(cookie);
    }

    /// Forcibly terminate everything outstanding
    pub fn terminate_all(&self) {
        self.bus.terminate_all();
    }
}
