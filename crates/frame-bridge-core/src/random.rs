//! Secure random fill service.
//!
//! The guest has no entropy of its own. It asks the host to fill a byte range
//! of its memory through `fill_rand(ptr, len) -> status`. Two failure kinds
//! are recoverable and reported to the guest as status codes; every other
//! backend failure is fatal for the guest call.

use tracing::{debug, warn};

use frame_bridge_common::HostFunctionError;

/// Status code returned to the guest by `fill_rand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FillStatus {
    /// The range was filled.
    Ok = 0,
    /// The request exceeded the per-call limit or did not fit in memory.
    RangeError = 1,
    /// The generation quota is exhausted.
    QuotaError = 2,
}

impl FillStatus {
    /// Wire value of the status.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Failure reported by an [`EntropySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntropyError {
    /// The backend refused the request size.
    Range,
    /// The backend's generation quota is exhausted.
    Quota,
    /// Any other failure. Not recoverable by the guest.
    Backend(String),
}

/// A source of cryptographically secure bytes.
pub trait EntropySource: Send {
    /// Fill `buf` completely with random bytes.
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), EntropyError>;
}

/// Operating system entropy via `getrandom`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::getrandom(buf).map_err(|e| EntropyError::Backend(e.to_string()))
    }
}

/// Per-session random fill service.
///
/// Enforces the per-call limit and the optional session quota in front of the
/// entropy backend, and converts backend results into [`FillStatus`].
pub struct RandomFill {
    source: Box<dyn EntropySource>,
    max_request: usize,
    quota_remaining: Option<u64>,
    bytes_served: u64,
}

impl RandomFill {
    /// Create a service backed by the operating system.
    pub fn new(max_request: usize, quota: Option<u64>) -> Self {
        Self::with_source(Box::new(OsEntropy), max_request, quota)
    }

    /// Create a service backed by a custom entropy source.
    pub fn with_source(
        source: Box<dyn EntropySource>,
        max_request: usize,
        quota: Option<u64>,
    ) -> Self {
        Self {
            source,
            max_request,
            quota_remaining: quota,
            bytes_served: 0,
        }
    }

    /// Fill `buf` with random bytes.
    ///
    /// On `RangeError` or `QuotaError` the buffer content is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::EntropyUnavailable`] for backend failures
    /// other than range and quota.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<FillStatus, HostFunctionError> {
        let requested = buf.len();

        if requested > self.max_request {
            debug!(requested, limit = self.max_request, "Random fill over per-call limit");
            return Ok(FillStatus::RangeError);
        }

        let requested_u64 = requested as u64;
        if self
            .quota_remaining
            .is_some_and(|remaining| requested_u64 > remaining)
        {
            warn!(requested, remaining = ?self.quota_remaining, "Random quota exhausted");
            return Ok(FillStatus::QuotaError);
        }

        match self.source.fill(buf) {
            Ok(()) => {
                if let Some(remaining) = self.quota_remaining.as_mut() {
                    *remaining -= requested_u64;
                }
                self.bytes_served += requested_u64;
                Ok(FillStatus::Ok)
            }
            Err(EntropyError::Range) => Ok(FillStatus::RangeError),
            Err(EntropyError::Quota) => Ok(FillStatus::QuotaError),
            Err(EntropyError::Backend(reason)) => {
                Err(HostFunctionError::entropy_unavailable(reason))
            }
        }
    }

    /// Largest request a single call may make.
    pub fn max_request(&self) -> usize {
        self.max_request
    }

    /// Bytes left in the session quota, if one is configured.
    pub fn quota_remaining(&self) -> Option<u64> {
        self.quota_remaining
    }

    /// Total bytes handed out so far.
    pub fn bytes_served(&self) -> u64 {
        self.bytes_served
    }
}

impl std::fmt::Debug for RandomFill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomFill")
            .field("max_request", &self.max_request)
            .field("quota_remaining", &self.quota_remaining)
            .field("bytes_served", &self.bytes_served)
            .finish_non_exhaustive()
    }
}
