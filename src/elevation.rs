//! Elevation probe - is the current process running with admin rights?

/// True when the process runs with elevated privileges.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // Effective uid 0 is the closest Unix equivalent of an elevated token.
    unsafe { libc::geteuid() == 0 }
}

/// True when the process runs with elevated privileges.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    #[link(name = "shell32")]
    extern "system" {
        fn IsUserAnAdmin() -> i32;
    }
    unsafe { IsUserAnAdmin() != 0 }
}
