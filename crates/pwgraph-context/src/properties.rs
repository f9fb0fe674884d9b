//! Process property auto-population (SPEC_FULL.md "Supplemented features":
//! grounded on `context.c`'s `fill_properties()`). Fills in
//! `application.*` keys from the OS when the caller's properties don't
//! already carry them, so every context has an identifiable owner even
//! when `context.properties` in config says nothing about it.

use std::collections::HashMap;

/// The application's display name.
pub const APPLICATION_NAME: &str = "application.name";
/// The executable's on-disk file name.
pub const APPLICATION_PROCESS_BINARY: &str = "application.process.binary";
/// The process id, as a decimal string.
pub const APPLICATION_PROCESS_ID: &str = "application.process.id";
/// The Unix user name the process runs as.
pub const APPLICATION_PROCESS_USER: &str = "application.process.user";
/// The host's name.
pub const APPLICATION_PROCESS_HOST: &str = "application.process.host";

/// Fill in any of the `application.*` keys above that `props` doesn't
/// already carry, querying the OS for each. Never overwrites a key the
/// caller (or config file) already set.
pub fn fill_properties(props: &mut HashMap<String, String>) {
    props
        .entry(APPLICATION_PROCESS_BINARY.to_string())
        .or_insert_with(process_binary);
    props
        .entry(APPLICATION_NAME.to_string())
        .or_insert_with(|| props_or_binary_name());
    props
        .entry(APPLICATION_PROCESS_ID.to_string())
        .or_insert_with(|| std::process::id().to_string());
    props
        .entry(APPLICATION_PROCESS_USER.to_string())
        .or_insert_with(process_user);
    props
        .entry(APPLICATION_PROCESS_HOST.to_string())
        .or_insert_with(process_host);
}

fn props_or_binary_name() -> String {
    process_binary()
}

fn process_binary() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "pwgraph".to_string())
}

fn process_user() -> String {
    if let Ok(name) = std::env::var("USER") {
        return name;
    }
    // SAFETY: `getpwuid` returns either a valid pointer into its
    // thread-local static buffer or NULL; we only read through it before
    // any other libc call that could invalidate it.
    unsafe {
        let passwd = libc::getpwuid(libc::getuid());
        if passwd.is_null() {
            return "unknown".to_string();
        }
        std::ffi::CStr::from_ptr((*passwd).pw_name)
            .to_string_lossy()
            .into_owned()
    }
}

fn process_host() -> String {
    let mut buf = vec![0u8; 256];
    // SAFETY: `buf` is a valid, writable buffer of the given length; on
    // success the kernel writes a NUL-terminated string no longer than it.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_properties_populates_missing_keys() {
        let mut props = HashMap::new();
        fill_properties(&mut props);
        assert!(props.contains_key(APPLICATION_NAME));
        assert!(props.contains_key(APPLICATION_PROCESS_BINARY));
        assert!(props.contains_key(APPLICATION_PROCESS_ID));
        assert!(props.contains_key(APPLICATION_PROCESS_USER));
        assert!(props.contains_key(APPLICATION_PROCESS_HOST));
    }

    #[test]
    fn fill_properties_does_not_overwrite_caller_values() {
        let mut props = HashMap::new();
        props.insert(APPLICATION_NAME.to_string(), "my-app".to_string());
        fill_properties(&mut props);
        assert_eq!(props.get(APPLICATION_NAME).unwrap(), "my-app");
    }
}
