use crate::error::Error;

/// Maps the host to the OS/architecture labels used in release artifact
/// names. Only the three platforms with published binaries are recognized.
pub(crate) fn platform_target() -> Result<(&'static str, &'static str), Error> {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "darwin",
        "windows" => "windows",
        other => {
            return Err(Error::UnsupportedPlatform {
                os: other.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            });
        }
    };

    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => {
            return Err(Error::UnsupportedPlatform {
                os: os.to_string(),
                arch: other.to_string(),
            });
        }
    };

    Ok((os, arch))
}

pub(crate) fn download_url(base: &str, version: &str, os: &str, arch: &str) -> String {
    let ext = if os == "windows" { ".exe" } else { "" };
    format!(
        "{}/v{version}/inmap-v{version}-{os}-{arch}{ext}",
        base.trim_end_matches('/')
    )
}

pub(crate) fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().and_then(|s| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    })
}
