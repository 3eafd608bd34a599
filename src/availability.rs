// src/availability.rs
// Availability reporting for the underlying model, independent of sessions

use crate::error::{Error, Result};
use crate::model::{self, BackendError, LanguageModel};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Upper bound on how long an availability check may take
pub const DEFAULT_AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether the model can be used now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AvailabilityState {
    Unavailable = 0,
    Ready = 1,
    /// Present but blocked, e.g. by a management policy
    Restricted = 2,
}

/// Why the model is not ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AvailabilityReason {
    None = 0,
    DeviceNotEligible = 1,
    AppleIntelligenceNotEnabled = 2,
    ModelNotReady = 3,
    ResourceExhausted = 4,
    UnsupportedPlatform = 5,
    DisabledByPolicy = 6,
    Unknown = -1,
}

impl AvailabilityState {
    /// Maps a raw state code; unknown codes read as `Unavailable`
    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => Self::Ready,
            2 => Self::Restricted,
            _ => Self::Unavailable,
        }
    }
}

impl AvailabilityReason {
    /// Maps a raw reason code; unknown codes read as `Unknown`
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::DeviceNotEligible,
            2 => Self::AppleIntelligenceNotEnabled,
            3 => Self::ModelNotReady,
            4 => Self::ResourceExhausted,
            5 => Self::UnsupportedPlatform,
            6 => Self::DisabledByPolicy,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for AvailabilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::DeviceNotEligible => "device not eligible",
            Self::AppleIntelligenceNotEnabled => "Apple Intelligence not enabled",
            Self::ModelNotReady => "model not ready",
            Self::ResourceExhausted => "resources exhausted",
            Self::UnsupportedPlatform => "unsupported platform",
            Self::DisabledByPolicy => "disabled by policy",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Readiness of the model: a state plus the reason it is not ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Availability {
    pub state: AvailabilityState,
    pub reason: AvailabilityReason,
}

impl Availability {
    pub const READY: Availability = Availability {
        state: AvailabilityState::Ready,
        reason: AvailabilityReason::None,
    };

    pub fn unavailable(reason: AvailabilityReason) -> Self {
        Self {
            state: AvailabilityState::Unavailable,
            reason,
        }
    }

    pub fn restricted(reason: AvailabilityReason) -> Self {
        Self {
            state: AvailabilityState::Restricted,
            reason,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == AvailabilityState::Ready
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            AvailabilityState::Ready => f.write_str("available"),
            AvailabilityState::Unavailable => write!(f, "unavailable({})", self.reason),
            AvailabilityState::Restricted => write!(f, "restricted({})", self.reason),
        }
    }
}

/// Checks whether the platform's default model is available
///
/// No session is needed and it is safe to call at any time, from any thread.
///
/// # Examples
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let availability = fm_session::check_availability()?;
/// if !availability.is_ready() {
///     eprintln!("model is {}", availability);
/// }
/// # Ok(())
/// # }
/// ```
pub fn check_availability() -> Result<Availability> {
    check_availability_with(&model::default_model(), DEFAULT_AVAILABILITY_TIMEOUT)
}

/// Checks whether `model` is available, waiting at most `timeout`
///
/// A model that does not answer in time reports
/// `Unavailable / ResourceExhausted` instead of blocking. Callers checking
/// the same model at the same time share one call into it, so a model that
/// never answers costs one helper thread, not one per check.
///
/// # Errors
///
/// `Error::Generation` if the model fails to report its availability.
pub fn check_availability_with(
    model: &Arc<dyn LanguageModel>,
    timeout: Duration,
) -> Result<Availability> {
    let pending = pending_for(model)?;
    let answer = pending.answer.lock()?;
    let (answer, _) = pending
        .answered
        .wait_timeout_while(answer, timeout, |answer| answer.is_none())?;

    match answer.as_ref() {
        Some(Ok(availability)) => {
            tracing::debug!(%availability, "availability check finished");
            Ok(*availability)
        }
        Some(Err(err)) => Err(err.clone().into()),
        None => {
            tracing::warn!(?timeout, "availability check timed out");
            Ok(Availability::unavailable(AvailabilityReason::ResourceExhausted))
        }
    }
}

/// One outstanding `availability()` call and its eventual answer
struct Pending {
    key: usize,
    answer: Mutex<Option<std::result::Result<Availability, BackendError>>>,
    answered: Condvar,
}

/// Calls in flight, at most one per model
static IN_FLIGHT: Mutex<Vec<Arc<Pending>>> = Mutex::new(Vec::new());

// The helper thread keeps the model alive while its entry exists, so an
// address cannot be reused by another model in the meantime.
fn model_key(model: &Arc<dyn LanguageModel>) -> usize {
    Arc::as_ptr(model).cast::<()>() as usize
}

/// Joins the call in flight for `model`, or starts one
fn pending_for(model: &Arc<dyn LanguageModel>) -> Result<Arc<Pending>> {
    let key = model_key(model);
    let mut in_flight = IN_FLIGHT.lock()?;
    if let Some(pending) = in_flight.iter().find(|pending| pending.key == key) {
        return Ok(Arc::clone(pending));
    }

    let pending = Arc::new(Pending {
        key,
        answer: Mutex::new(None),
        answered: Condvar::new(),
    });
    let worker = Arc::clone(&pending);
    let model = Arc::clone(model);
    thread::Builder::new()
        .name("fm-availability-check".into())
        .spawn(move || {
            let answer = panic::catch_unwind(AssertUnwindSafe(|| model.availability()))
                .unwrap_or_else(|_| {
                    Err(BackendError::Other("availability check panicked".into()))
                });
            if let Ok(mut in_flight) = IN_FLIGHT.lock() {
                in_flight.retain(|pending| !Arc::ptr_eq(pending, &worker));
            }
            if let Ok(mut slot) = worker.answer.lock() {
                *slot = Some(answer);
            }
            worker.answered.notify_all();
        })
        .map_err(|e| Error::InvalidState(format!("cannot spawn availability check: {e}")))?;

    in_flight.push(Arc::clone(&pending));
    Ok(pending)
}
