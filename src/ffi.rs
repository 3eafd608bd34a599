// src/ffi.rs
// FFI layer for the Swift FoundationModels shim
// C-ABI declarations for session lifecycle, availability and the three response modes

use std::os::raw::{c_char, c_void};

// Error codes written by the shim into `ShimError::code`
// Must match the constants in swift/FoundationModelsShim.swift

pub const SHIM_OK: i32 = 0;
pub const SHIM_UNAVAILABLE: i32 = 1;
pub const SHIM_RESOURCE_EXHAUSTED: i32 = 2;
pub const SHIM_CONTENT_POLICY: i32 = 3;
pub const SHIM_SCHEMA_MISMATCH: i32 = 4;
pub const SHIM_UNSUPPORTED_SCHEMA: i32 = 5;
pub const SHIM_TIMEOUT: i32 = 6;
pub const SHIM_INVALID_ARGUMENT: i32 = 7;

/// Error slot filled by the shim
/// - message: UTF-8, owned by us until passed to `fmshim_error_free`
#[repr(C)]
#[derive(Debug)]
pub struct ShimError {
    pub code: i32,
    pub message: *mut c_char,
}

/// Response slot filled by the shim
/// - data: UTF-8, owned by us until passed to `fmshim_buffer_free`
#[repr(C)]
#[derive(Debug)]
pub struct ShimBuffer {
    pub data: *mut c_char,
    pub length: i64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ShimAvailability {
    pub state: i32,
    pub reason: i32,
}

impl Default for ShimError {
    fn default() -> Self {
        Self {
            code: SHIM_OK,
            message: std::ptr::null_mut(),
        }
    }
}

impl Default for ShimBuffer {
    fn default() -> Self {
        Self {
            data: std::ptr::null_mut(),
            length: 0,
        }
    }
}

/// Called for each new fragment during streaming
/// - fragment: null-terminated C string, valid only during the call
/// - user_data: opaque pointer to user state
/// - returns: false to ask the shim to stop generating
pub type FragmentCallback = extern "C" fn(*const c_char, *mut c_void) -> bool;

// External Swift Functions
// These functions are implemented in Swift and exported via @_cdecl
// Linking is configured by build.rs

unsafe extern "C" {
    /// Open a LanguageModelSession with the given instructions
    /// Returns null and fills `out_error` on failure
    pub fn fmshim_session_create(instructions: *const c_char, out_error: *mut ShimError)
    -> *mut c_void;

    /// Release a session returned by `fmshim_session_create`
    pub fn fmshim_session_destroy(session: *mut c_void);

    /// Query SystemLanguageModel.default.availability
    pub fn fmshim_check_availability(
        out_availability: *mut ShimAvailability,
        out_error: *mut ShimError,
    ) -> bool;

    /// Generate a complete response (blocking)
    pub fn fmshim_session_respond(
        session: *mut c_void,
        prompt: *const c_char,
        options_json: *const c_char,
        out_buffer: *mut ShimBuffer,
        out_error: *mut ShimError,
    ) -> bool;

    /// Generate JSON guided by a dynamic generation schema (blocking)
    pub fn fmshim_session_respond_structured(
        session: *mut c_void,
        prompt: *const c_char,
        schema_json: *const c_char,
        options_json: *const c_char,
        out_buffer: *mut ShimBuffer,
        out_error: *mut ShimError,
    ) -> bool;

    /// Stream a response, calling `on_fragment` with each new delta
    /// Blocks until the stream completes, fails, or the callback returns false
    pub fn fmshim_session_stream(
        session: *mut c_void,
        prompt: *const c_char,
        options_json: *const c_char,
        on_fragment: FragmentCallback,
        user_data: *mut c_void,
        out_error: *mut ShimError,
    ) -> bool;

    pub fn fmshim_buffer_free(buffer: *mut ShimBuffer);

    pub fn fmshim_error_free(error: *mut ShimError);
}
