// src/capi.rs
// C ABI exported by the cdylib
// Declarations for C callers live in include/fm_session.h

use crate::availability::{self, DEFAULT_AVAILABILITY_TIMEOUT};
use crate::error::{Error, Result};
use crate::model::{self, LanguageModel};
use crate::options::OptionsError;
use crate::schema::SchemaError;
use crate::session::LanguageModelSession;
use std::ffi::{CStr, CString};
use std::ops::ControlFlow;
use std::os::raw::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, RwLock};

/// Error slot filled by a failing call
///
/// `message` is owned by the caller until passed to [`fm_error_free`].
#[repr(C)]
#[derive(Debug)]
pub struct FmError {
    pub code: i32,
    pub message: *mut c_char,
}

/// Response slot filled by a succeeding call
///
/// `data` is NUL-terminated; `length` excludes the terminator and is
/// authoritative. Owned by the caller until passed to [`fm_buffer_free`].
#[repr(C)]
#[derive(Debug)]
pub struct FmBuffer {
    pub data: *mut c_char,
    pub length: i64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FmAvailability {
    pub state: i32,
    pub reason: i32,
}

/// Opaque session handle
pub struct FmSession {
    inner: LanguageModelSession,
}

/// Called once per chunk; `text` is valid only for the duration of the call
pub type FmStreamCallback =
    Option<unsafe extern "C" fn(text: *const c_char, is_final: bool, user_data: *mut c_void)>;

impl Default for FmError {
    fn default() -> Self {
        Self {
            code: 0,
            message: ptr::null_mut(),
        }
    }
}

impl Default for FmBuffer {
    fn default() -> Self {
        Self {
            data: ptr::null_mut(),
            length: 0,
        }
    }
}

static MODEL: RwLock<Option<Arc<dyn LanguageModel>>> = RwLock::new(None);

/// Selects the model that sessions created through the C ABI bind to
///
/// Until this is called the platform's default model is used. Sessions
/// that already exist keep the model they were created with.
pub fn install_model(model: Arc<dyn LanguageModel>) {
    match MODEL.write() {
        Ok(mut slot) => *slot = Some(model),
        Err(poisoned) => *poisoned.into_inner() = Some(model),
    }
}

fn current_model() -> Arc<dyn LanguageModel> {
    let installed = match MODEL.read() {
        Ok(slot) => slot.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    installed.unwrap_or_else(model::default_model)
}

// Slot helpers

unsafe fn clear_error(out_error: *mut FmError) {
    if let Some(slot) = unsafe { out_error.as_mut() } {
        *slot = FmError::default();
    }
}

unsafe fn write_error(out_error: *mut FmError, err: &Error) {
    let Some(slot) = (unsafe { out_error.as_mut() }) else {
        tracing::debug!(error = %err, "error dropped, no error slot supplied");
        return;
    };
    slot.code = err.code().as_i32();
    slot.message = c_text(&err.to_string()).into_raw();
}

/// NUL-terminated copy of `text` with interior NUL bytes removed
fn c_text(text: &str) -> CString {
    CString::new(text).unwrap_or_else(|_| {
        let stripped: Vec<u8> = text.bytes().filter(|&b| b != 0).collect();
        // No NUL bytes remain.
        CString::new(stripped).unwrap_or_default()
    })
}

unsafe fn clear_buffer(out_buffer: *mut FmBuffer) {
    if let Some(slot) = unsafe { out_buffer.as_mut() } {
        *slot = FmBuffer::default();
    }
}

unsafe fn write_buffer(out_buffer: *mut FmBuffer, text: String) {
    let Some(slot) = (unsafe { out_buffer.as_mut() }) else {
        return;
    };
    let length = text.len();
    let mut bytes = text.into_bytes();
    bytes.push(0);
    let data = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
    slot.data = data as *mut c_char;
    slot.length = length as i64;
}

/// Borrows a C string argument; `None` for NULL
unsafe fn text_arg<'a>(
    ptr: *const c_char,
) -> Option<std::result::Result<&'a str, std::str::Utf8Error>> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_str())
    }
}

unsafe fn prompt_arg<'a>(prompt: *const c_char) -> Result<&'a str> {
    match unsafe { text_arg(prompt) } {
        None => Err(Error::InvalidInput("prompt is null".into())),
        Some(Err(e)) => Err(Error::InvalidInput(format!(
            "prompt is not valid UTF-8: {e}"
        ))),
        Some(Ok(text)) => Ok(text),
    }
}

unsafe fn options_arg<'a>(options_json: *const c_char) -> Result<Option<&'a str>> {
    match unsafe { text_arg(options_json) } {
        None => Ok(None),
        Some(Err(e)) => Err(OptionsError::Shape(format!(
            "options document is not valid UTF-8: {e}"
        ))
        .into()),
        Some(Ok(text)) => Ok(Some(text)),
    }
}

unsafe fn session_arg<'a>(session: *mut FmSession) -> Result<&'a LanguageModelSession> {
    unsafe { session.as_ref() }
        .map(|handle| &handle.inner)
        .ok_or_else(|| Error::InvalidInput("session handle is null".into()))
}

/// Runs an exported function body, filling the error slot on failure
///
/// Panics are caught here and reported as `InvalidState`.
fn guarded<T>(out_error: *mut FmError, failed: T, body: impl FnOnce() -> Result<T>) -> T {
    unsafe { clear_error(out_error) };
    let outcome = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        tracing::error!(%detail, "panic caught at the C boundary");
        Err(Error::InvalidState(format!("internal panic: {detail}")))
    });
    match outcome {
        Ok(value) => value,
        Err(err) => {
            unsafe { write_error(out_error, &err) };
            failed
        }
    }
}

// Exported functions

/// Creates a session; returns NULL and fills `out_error` on failure
///
/// # Safety
///
/// `instructions` must be NULL or a valid NUL-terminated string.
/// `out_error` must be NULL or point to a writable `FmError`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fm_session_create(
    instructions: *const c_char,
    out_error: *mut FmError,
) -> *mut FmSession {
    guarded(out_error, ptr::null_mut(), || {
        let instructions = match unsafe { text_arg(instructions) } {
            None => "",
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                return Err(Error::Initialization(format!(
                    "instructions are not valid UTF-8: {e}"
                )));
            }
        };
        let inner = LanguageModelSession::with_model(current_model(), instructions)?;
        Ok(Box::into_raw(Box::new(FmSession { inner })))
    })
}

/// Destroys a session; NULL is a no-op
///
/// # Safety
///
/// `session` must come from [`fm_session_create`], be destroyed at most
/// once, and have no call in progress.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fm_session_destroy(session: *mut FmSession) {
    if session.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(session) };
    if panic::catch_unwind(AssertUnwindSafe(move || drop(handle))).is_err() {
        tracing::error!("panic while destroying a session");
    }
}

/// Reports whether the model can be used; needs no session
///
/// # Safety
///
/// `out_availability` must point to a writable `FmAvailability`.
/// `out_error` must be NULL or point to a writable `FmError`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fm_check_availability(
    out_availability: *mut FmAvailability,
    out_error: *mut FmError,
) -> bool {
    guarded(out_error, false, || {
        let slot = unsafe { out_availability.as_mut() }
            .ok_or_else(|| Error::InvalidInput("availability slot is null".into()))?;
        let availability =
            availability::check_availability_with(&current_model(), DEFAULT_AVAILABILITY_TIMEOUT)?;
        *slot = FmAvailability {
            state: availability.state as i32,
            reason: availability.reason as i32,
        };
        Ok(true)
    })
}

/// Generates a complete response into `out_buffer`
///
/// # Safety
///
/// `session` must be a live handle. String arguments must be NULL or valid
/// NUL-terminated strings. Slots must be NULL or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fm_session_respond(
    session: *mut FmSession,
    prompt: *const c_char,
    options_json: *const c_char,
    out_buffer: *mut FmBuffer,
    out_error: *mut FmError,
) -> bool {
    unsafe { clear_buffer(out_buffer) };
    guarded(out_error, false, || {
        let session = unsafe { session_arg(session) }?;
        let prompt = unsafe { prompt_arg(prompt) }?;
        let options = unsafe { options_arg(options_json) }?;
        if out_buffer.is_null() {
            return Err(Error::InvalidInput("buffer slot is null".into()));
        }
        let text = session.respond(prompt, options)?;
        unsafe { write_buffer(out_buffer, text) };
        Ok(true)
    })
}

/// Generates schema-conforming JSON into `out_buffer`
///
/// # Safety
///
/// Same contract as [`fm_session_respond`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fm_session_respond_structured(
    session: *mut FmSession,
    prompt: *const c_char,
    schema_json: *const c_char,
    options_json: *const c_char,
    out_buffer: *mut FmBuffer,
    out_error: *mut FmError,
) -> bool {
    unsafe { clear_buffer(out_buffer) };
    guarded(out_error, false, || {
        let session = unsafe { session_arg(session) }?;
        let prompt = unsafe { prompt_arg(prompt) }?;
        let schema = match unsafe { text_arg(schema_json) } {
            None => return Err(SchemaError::Empty.into()),
            Some(Err(e)) => {
                return Err(SchemaError::Malformed(format!("not valid UTF-8: {e}")).into());
            }
            Some(Ok(text)) => text,
        };
        let options = unsafe { options_arg(options_json) }?;
        if out_buffer.is_null() {
            return Err(Error::InvalidInput("buffer slot is null".into()));
        }
        let text = session.respond_structured(prompt, schema, options)?;
        unsafe { write_buffer(out_buffer, text) };
        Ok(true)
    })
}

/// Streams a response, calling `callback` for each chunk on this thread
///
/// Returns after the final chunk (`is_final == true`) or an error. Chunk
/// text is NUL-terminated, so any NUL byte the model generates is removed
/// before the callback sees it; use `fm_session_respond` when the exact
/// bytes matter, since buffers carry an explicit length.
///
/// # Safety
///
/// Same contract as [`fm_session_respond`]. `callback` must not call back
/// into the same session.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fm_session_stream(
    session: *mut FmSession,
    prompt: *const c_char,
    options_json: *const c_char,
    callback: FmStreamCallback,
    user_data: *mut c_void,
    out_error: *mut FmError,
) -> bool {
    guarded(out_error, false, || {
        let session = unsafe { session_arg(session) }?;
        let prompt = unsafe { prompt_arg(prompt) }?;
        let options = unsafe { options_arg(options_json) }?;
        let callback =
            callback.ok_or_else(|| Error::InvalidInput("stream callback is null".into()))?;

        session.stream_response_until(prompt, options, |chunk| {
            let text = c_text(chunk.text);
            unsafe { callback(text.as_ptr(), chunk.is_final, user_data) };
            ControlFlow::Continue(())
        })?;
        Ok(true)
    })
}

/// Releases a buffer's data and zeroes the slot; an empty slot is a no-op
///
/// # Safety
///
/// `buffer` must be NULL or point to a slot filled by this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fm_buffer_free(buffer: *mut FmBuffer) {
    let Some(slot) = (unsafe { buffer.as_mut() }) else {
        return;
    };
    if !slot.data.is_null() {
        let length = usize::try_from(slot.length).unwrap_or(0) + 1;
        let raw = ptr::slice_from_raw_parts_mut(slot.data as *mut u8, length);
        drop(unsafe { Box::from_raw(raw) });
    }
    *slot = FmBuffer::default();
}

/// Releases an error's message and zeroes the slot; an empty slot is a no-op
///
/// # Safety
///
/// `error` must be NULL or point to a slot filled by this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fm_error_free(error: *mut FmError) {
    let Some(slot) = (unsafe { error.as_mut() }) else {
        return;
    };
    if !slot.message.is_null() {
        drop(unsafe { CString::from_raw(slot.message) });
    }
    *slot = FmError::default();
}
