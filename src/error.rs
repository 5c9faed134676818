// SPDX-License-Identifier: MIT

use thiserror::Error;

use netlink_packet_core::DecodeError;

/// Adapter mirroring `anyhow::Context`, but landing on
/// [`DecodeError`] instead of `anyhow::Error`, since newer
/// `netlink-packet-core` releases dropped the `From<anyhow::Error>`
/// conversion that `DecodeError` used to provide.
pub(crate) trait DecodeContext<T> {
    fn context<C: std::fmt::Display>(
        self,
        context: C,
    ) -> Result<T, DecodeError>;
}

impl<T, E> DecodeContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C: std::fmt::Display>(
        self,
        context: C,
    ) -> Result<T, DecodeError> {
        self.map_err(|e| DecodeError::from(format!("{context} caused by {e}")))
    }
}

const EBUSY: i32 = 16;
const EAGAIN: i32 = 11;
const ECANCELED: i32 = 125;
const ENOENT: i32 = 2;

#[derive(Debug, Error)]
pub enum ScanError {
    /// The driver is already scanning on this radio.
    #[error("Driver busy, another scan is in progress")]
    Busy,

    /// An externally initiated scan flushed the kernel result cache while
    /// one of our scan fragments was mid-flight.
    #[error("Scan results were flushed externally, try again")]
    TryAgain,

    /// The scan was aborted, either by the driver or by the caller.
    #[error("Scan canceled")]
    Canceled,

    /// A firmware scan dump returned no BSS entries.
    #[error("No scan results available")]
    NotFound,

    /// Any other kernel rejection; the transport folds the netlink
    /// error message into its errno before it reaches the engine.
    #[error("A netlink request failed")]
    RequestFailed(String),

    #[error("Failed to decode netlink package: {0}")]
    DecodeFailed(DecodeError),
}

impl ScanError {
    /// Map a negative errno reported by the kernel to the scan error
    /// taxonomy.
    pub(crate) fn from_errno(errno: i32) -> Self {
        match -errno {
            EBUSY => Self::Busy,
            EAGAIN => Self::TryAgain,
            ECANCELED => Self::Canceled,
            ENOENT => Self::NotFound,
            _ => Self::RequestFailed(format!(
                "Kernel replied with errno {errno}"
            )),
        }
    }

    pub(crate) fn is_busy(errno: i32) -> bool {
        -errno == EBUSY
    }
}
