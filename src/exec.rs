use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client as HttpClient;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::TempDir;

use crate::error::Error;
use crate::util::{download_url, filename_from_url, platform_target};

/// Holds the path of the InMAP executable once it has been provisioned.
///
/// The cache owns a process-temp directory that also receives per-job
/// emissions files; it is dropped (and the directory removed) when the last
/// client sharing it goes away. The mutex both guards the cached path and
/// serializes concurrent first calls, so the binary is fetched at most once.
#[derive(Debug)]
pub(crate) struct ExecutableCache {
    dir: TempDir,
    exe: Mutex<Option<PathBuf>>,
}

impl ExecutableCache {
    pub(crate) fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("inmap-sr").tempdir()?,
            exe: Mutex::new(None),
        })
    }

    /// Scratch directory for job inputs.
    pub(crate) fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Pre-seeds the cache with a local executable, skipping any download.
    pub(crate) fn set(&self, path: PathBuf) {
        *self.exe.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
    }

    /// Returns the executable path, downloading the platform binary first
    /// if it is not cached yet.
    pub(crate) fn ensure(
        &self,
        http: &HttpClient,
        base: &str,
        version: &str,
        progress: bool,
    ) -> Result<PathBuf, Error> {
        let mut exe = self.exe.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(path) = exe.as_ref() {
            return Ok(path.clone());
        }

        let (os, arch) = platform_target()?;
        let url = download_url(base, version, os, arch);
        let target = self
            .dir
            .path()
            .join(filename_from_url(&url).unwrap_or_else(|| "inmap".to_string()));

        eprintln!("Downloading InMAP {version} for {os}-{arch}");
        download(http, &url, &target, progress).map_err(|e| Error::Download {
            url: url.clone(),
            source: e.into(),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o700)).map_err(
                |e| Error::Download {
                    url,
                    source: Box::new(e),
                },
            )?;
        }

        *exe = Some(target.clone());
        Ok(target)
    }
}

fn download(http: &HttpClient, url: &str, target: &Path, progress: bool) -> Result<()> {
    let resp = http.get(url).send().context("could not connect")?;
    let status = resp.status();
    if !status.is_success() {
        bail!("HTTP {status}");
    }

    let pb = if progress {
        let pb = match resp.content_length() {
            Some(total) => {
                let pb = ProgressBar::new(total);
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
                    )
                    .unwrap()
                    .progress_chars("=>-"),
                );
                pb
            }
            None => ProgressBar::new_spinner(),
        };
        Some(pb)
    } else {
        None
    };

    let mut resp = resp;
    let mut out =
        File::create(target).with_context(|| format!("failed to create {}", target.display()))?;

    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = resp.read(&mut buf).context("download interrupted")?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        if let Some(pb) = &pb {
            pb.inc(n as u64);
        }
    }
    out.flush()?;

    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_path_skips_download() {
        let cache = ExecutableCache::new().unwrap();
        cache.set(PathBuf::from("/opt/inmap/inmap"));

        // The base URL is unroutable; reaching the network would error out.
        let http = HttpClient::new();
        let path = cache
            .ensure(&http, "http://127.0.0.1:1/nope", "1.8.0", false)
            .unwrap();
        assert_eq!(path, PathBuf::from("/opt/inmap/inmap"));

        let again = cache
            .ensure(&http, "http://127.0.0.1:1/nope", "1.8.0", false)
            .unwrap();
        assert_eq!(again, path);
    }
}
