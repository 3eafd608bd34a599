// src/apple.rs
// Apple's on-device system language model, reached through the Swift shim

use crate::availability::{Availability, AvailabilityReason, AvailabilityState};
use crate::ffi;
use crate::model::{BackendError, LanguageModel, ModelSession};
use crate::options::GenerationOptions;
use crate::schema::Schema;
use std::any::Any;
use std::ffi::{CStr, CString};
use std::ops::ControlFlow;
use std::os::raw::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};

/// The default FoundationModels `SystemLanguageModel`
///
/// Requires macOS 26+ or iOS 26+ with Apple Intelligence enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLanguageModel;

impl LanguageModel for SystemLanguageModel {
    fn availability(&self) -> Result<Availability, BackendError> {
        let mut availability = ffi::ShimAvailability::default();
        let mut error = ErrorSlot::new();

        let ok = unsafe { ffi::fmshim_check_availability(&mut availability, error.as_mut_ptr()) };
        error.check(ok)?;

        Ok(Availability {
            state: AvailabilityState::from_i32(availability.state),
            reason: AvailabilityReason::from_i32(availability.reason),
        })
    }

    fn open(&self, instructions: &str) -> Result<Box<dyn ModelSession>, BackendError> {
        let c_instructions = c_string("instructions", instructions)?;
        let mut error = ErrorSlot::new();

        let handle =
            unsafe { ffi::fmshim_session_create(c_instructions.as_ptr(), error.as_mut_ptr()) };
        error.check(!handle.is_null())?;

        Ok(Box::new(AppleSession { handle }))
    }
}

/// A FoundationModels `LanguageModelSession` owned through the shim
struct AppleSession {
    handle: *mut c_void,
}

// The shim's session box is safe to use from any thread as long as calls
// are not concurrent, which `LanguageModelSession` guarantees.
unsafe impl Send for AppleSession {}

impl Drop for AppleSession {
    fn drop(&mut self) {
        unsafe { ffi::fmshim_session_destroy(self.handle) };
    }
}

impl ModelSession for AppleSession {
    fn respond(
        &mut self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let c_prompt = c_string("prompt", prompt)?;
        let c_options = c_string("options", &options.to_json())?;
        let mut buffer = BufferSlot::new();
        let mut error = ErrorSlot::new();

        let ok = unsafe {
            ffi::fmshim_session_respond(
                self.handle,
                c_prompt.as_ptr(),
                c_options.as_ptr(),
                buffer.as_mut_ptr(),
                error.as_mut_ptr(),
            )
        };
        error.check(ok)?;
        buffer.text()
    }

    fn respond_structured(
        &mut self,
        prompt: &str,
        schema: &Schema,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let c_prompt = c_string("prompt", prompt)?;
        let c_schema = c_string("schema", schema.as_str())?;
        let c_options = c_string("options", &options.to_json())?;
        let mut buffer = BufferSlot::new();
        let mut error = ErrorSlot::new();

        let ok = unsafe {
            ffi::fmshim_session_respond_structured(
                self.handle,
                c_prompt.as_ptr(),
                c_schema.as_ptr(),
                c_options.as_ptr(),
                buffer.as_mut_ptr(),
                error.as_mut_ptr(),
            )
        };
        error.check(ok)?;
        buffer.text()
    }

    fn stream(
        &mut self,
        prompt: &str,
        options: &GenerationOptions,
        on_fragment: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<(), BackendError> {
        let c_prompt = c_string("prompt", prompt)?;
        let c_options = c_string("options", &options.to_json())?;
        let mut error = ErrorSlot::new();
        let mut context = StreamContext {
            sink: on_fragment,
            panic: None,
        };

        let ok = unsafe {
            ffi::fmshim_session_stream(
                self.handle,
                c_prompt.as_ptr(),
                c_options.as_ptr(),
                fragment_callback,
                &mut context as *mut StreamContext<'_> as *mut c_void,
                error.as_mut_ptr(),
            )
        };

        if let Some(payload) = context.panic.take() {
            panic::resume_unwind(payload);
        }
        error.check(ok)
    }
}

// Scoped slots for shim-allocated data
// Each slot releases its allocation through the shim exactly once, on every exit path

struct ErrorSlot(ffi::ShimError);

impl ErrorSlot {
    fn new() -> Self {
        Self(ffi::ShimError::default())
    }

    fn as_mut_ptr(&mut self) -> *mut ffi::ShimError {
        &mut self.0
    }

    /// Turns the call's outcome into a `Result`, preferring the shim's error
    fn check(&self, ok: bool) -> Result<(), BackendError> {
        if self.0.code == ffi::SHIM_OK && self.0.message.is_null() {
            return if ok {
                Ok(())
            } else {
                Err(BackendError::Other("shim failed without details".into()))
            };
        }

        let message = if self.0.message.is_null() {
            String::from("unknown error")
        } else {
            unsafe { CStr::from_ptr(self.0.message) }
                .to_string_lossy()
                .into_owned()
        };

        Err(match self.0.code {
            ffi::SHIM_UNAVAILABLE => BackendError::Unavailable(message),
            ffi::SHIM_RESOURCE_EXHAUSTED => BackendError::ResourceExhausted(message),
            ffi::SHIM_CONTENT_POLICY => BackendError::ContentPolicy(message),
            ffi::SHIM_SCHEMA_MISMATCH => BackendError::SchemaMismatch(message),
            ffi::SHIM_UNSUPPORTED_SCHEMA => BackendError::UnsupportedSchema(message),
            ffi::SHIM_TIMEOUT => BackendError::Timeout(message),
            ffi::SHIM_INVALID_ARGUMENT => BackendError::InvalidRequest(message),
            _ => BackendError::Other(message),
        })
    }
}

impl Drop for ErrorSlot {
    fn drop(&mut self) {
        unsafe { ffi::fmshim_error_free(&mut self.0) };
    }
}

struct BufferSlot(ffi::ShimBuffer);

impl BufferSlot {
    fn new() -> Self {
        Self(ffi::ShimBuffer::default())
    }

    fn as_mut_ptr(&mut self) -> *mut ffi::ShimBuffer {
        &mut self.0
    }

    /// Copies the buffer out as an owned string
    fn text(&self) -> Result<String, BackendError> {
        if self.0.data.is_null() || self.0.length <= 0 {
            return Ok(String::new());
        }
        let length = usize::try_from(self.0.length)
            .map_err(|_| BackendError::Other("response length out of range".into()))?;
        let bytes = unsafe { std::slice::from_raw_parts(self.0.data as *const u8, length) };
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BackendError::Other(format!("response is not valid UTF-8: {e}")))
    }
}

impl Drop for BufferSlot {
    fn drop(&mut self) {
        unsafe { ffi::fmshim_buffer_free(&mut self.0) };
    }
}

// C Callbacks for stream()

struct StreamContext<'a> {
    sink: &'a mut dyn FnMut(&str) -> ControlFlow<()>,
    panic: Option<Box<dyn Any + Send>>,
}

extern "C" fn fragment_callback(fragment: *const c_char, user_data: *mut c_void) -> bool {
    if user_data.is_null() {
        return false;
    }
    let context = unsafe { &mut *(user_data as *mut StreamContext<'_>) };
    if context.panic.is_some() {
        return false;
    }
    if fragment.is_null() {
        return true;
    }

    let text = unsafe { CStr::from_ptr(fragment) }.to_string_lossy();
    match panic::catch_unwind(AssertUnwindSafe(|| (context.sink)(&text))) {
        Ok(flow) => flow.is_continue(),
        Err(payload) => {
            // Unwinding must not cross into Swift; rethrown after the shim returns.
            context.panic = Some(payload);
            false
        }
    }
}

fn c_string(what: &str, value: &str) -> Result<CString, BackendError> {
    CString::new(value)
        .map_err(|_| BackendError::InvalidRequest(format!("{what} contains a null byte")))
}
