use anyhow::{Result, anyhow};
use std::ffi::CStr;

// pthread names are limited to 16 bytes including the null terminator.
const MAX_PTHREAD_NAME_LEN: usize = 16;

/// Names the calling thread at the OS level, so the worker shows up under its
/// runtime name in `top`, `gdb` and friends.
///
/// Names longer than 15 bytes are truncated per pthread limitations.
#[cfg(target_os = "linux")]
pub(crate) fn set_current_thread_name(name: &str) {
    let bytes = name.as_bytes();
    let len_to_copy = std::cmp::min(bytes.len(), MAX_PTHREAD_NAME_LEN - 1);

    // Zero-initialized, so the buffer stays null-terminated after writing at
    // most MAX_PTHREAD_NAME_LEN - 1 bytes.
    let mut c_name_buf: [libc::c_char; MAX_PTHREAD_NAME_LEN] = [0; MAX_PTHREAD_NAME_LEN];
    for ii in 0..len_to_copy {
        c_name_buf[ii] = bytes[ii] as libc::c_char;
    }

    unsafe {
        let thread = libc::pthread_self();
        libc::pthread_setname_np(thread, c_name_buf.as_ptr());
    }
}

/// Gets the OS-level name of the calling thread.
#[cfg(target_os = "linux")]
pub(crate) fn get_current_thread_name() -> Result<String> {
    let mut c_name_buf: [libc::c_char; MAX_PTHREAD_NAME_LEN] = [0; MAX_PTHREAD_NAME_LEN];

    let ret = unsafe {
        let thread = libc::pthread_self();
        libc::pthread_getname_np(thread, c_name_buf.as_mut_ptr(), MAX_PTHREAD_NAME_LEN)
    };

    if ret != 0 {
        return Err(anyhow!("pthread_getname_np failed with error code: {}", ret));
    }

    let c_str = unsafe { CStr::from_ptr(c_name_buf.as_ptr()) };
    c_str
        .to_str()
        .map(|s| s.to_string())
        .map_err(|e| anyhow!("thread name is not valid UTF-8: {}", e))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_current_thread_name(_name: &str) {}

#[cfg(not(target_os = "linux"))]
pub(crate) fn get_current_thread_name() -> Result<String> {
    Err(anyhow!("thread names are only supported on linux"))
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip_with_truncation() {
        set_current_thread_name("a-very-long-thread-name");
        let name = get_current_thread_name().unwrap();
        assert_eq!(name, "a-very-long-thr");
    }
}
