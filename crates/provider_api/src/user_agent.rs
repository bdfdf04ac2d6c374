use std::sync::OnceLock;

/// Product token at the front of every outgoing `User-Agent`.
pub const USER_AGENT_PRODUCT: &str = concat!("agent_engine/", env!("CARGO_PKG_VERSION"));

/// `configured` when it is non-blank, else the platform user agent, e.g.
/// `agent_engine/0.1.0 (linux 6.8.0; x64)`.
pub fn resolve_user_agent(configured: Option<&str>) -> String {
    match configured.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_owned(),
        _ => platform_user_agent().to_owned(),
    }
}

fn platform_user_agent() -> &'static str {
    static CACHED: OnceLock<String> = OnceLock::new();
    CACHED.get_or_init(|| match uname() {
        Some(Uname { system, release, machine }) => {
            format!("{USER_AGENT_PRODUCT} ({system} {release}; {})", arch_label(&machine))
        }
        None => USER_AGENT_PRODUCT.to_owned(),
    })
}

fn arch_label(machine: &str) -> String {
    let machine = machine.to_ascii_lowercase();
    let label = match machine.as_str() {
        "x86_64" | "amd64" => "x64",
        "x86" | "i386" | "i686" => "ia32",
        "aarch64" => "arm64",
        other => other,
    };
    label.to_owned()
}

struct Uname {
    system: String,
    release: String,
    machine: String,
}

#[cfg(unix)]
fn uname() -> Option<Uname> {
    use std::ffi::{c_char, CStr};

    fn field(raw: &[c_char]) -> Option<String> {
        // SAFETY: `uname` fills each field with a NUL-terminated string.
        let value = unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned();
        (!value.is_empty()).then_some(value)
    }

    // SAFETY: `utsname` is plain data; zeroed is a valid value to pass in.
    let mut raw: libc::utsname = unsafe { std::mem::zeroed() };
    // SAFETY: `raw` is a valid, writable `utsname`.
    if unsafe { libc::uname(&mut raw) } != 0 {
        return None;
    }
    Some(Uname {
        system: field(&raw.sysname)?.to_lowercase(),
        release: field(&raw.release)?,
        machine: field(&raw.machine)?,
    })
}

#[cfg(not(unix))]
fn uname() -> Option<Uname> {
    None
}
