use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempDir};

const USER_AGENT: &str = concat!("loam/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_ATTEMPTS: usize = 3;

/// The network seam. Production traffic goes through [`HttpTransport`];
/// tests substitute an in-memory implementation.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// Download and unpack an archive, reporting the sha256 of the bytes as
    /// they came off the wire.
    fn get_archive(&self, url: &str) -> Result<Archive, ArchiveProblem>;
}

/// An unpacked archive held in a temporary directory until the caller moves
/// its contents into the package cache.
#[derive(Debug)]
pub struct Archive {
    sha256: String,
    dir: TempDir,
}

impl Archive {
    pub fn new(sha256: String, dir: TempDir) -> Archive {
        Archive { sha256, dir }
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// The directory the archive's entries were unpacked into. When the
    /// archive wraps everything in a single top-level directory (the usual
    /// hosting layout), that directory is the content root.
    pub fn content_root(&self) -> Result<std::path::PathBuf> {
        let mut dirs = Vec::new();
        let mut files = 0usize;
        for entry in std::fs::read_dir(self.dir.path())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            } else {
                files += 1;
            }
        }
        if files == 0 && dirs.len() == 1 {
            Ok(dirs.remove(0))
        } else {
            Ok(self.dir.path().to_path_buf())
        }
    }
}

/// Archive failures split by phase so callers can report them separately.
#[derive(Debug)]
pub enum ArchiveProblem {
    Request(String),
    Content(String),
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<HttpTransport> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(HttpTransport { client })
    }

    fn download(&self, url: &str) -> Result<(NamedTempFile, String)> {
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("unexpected response for {url}"))?;

        let mut tmp = NamedTempFile::new()?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = response
                .read(&mut buffer)
                .with_context(|| format!("stream error for {url}"))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            tmp.write_all(&buffer[..read])?;
        }
        Ok((tmp, hex::encode(hasher.finalize())))
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("unexpected response for {url}"))?;
        let mut bytes = Vec::new();
        response
            .read_to_end(&mut bytes)
            .with_context(|| format!("stream error for {url}"))?;
        Ok(bytes)
    }

    fn get_archive(&self, url: &str) -> Result<Archive, ArchiveProblem> {
        let mut last_err = None;
        for _ in 0..DOWNLOAD_ATTEMPTS {
            match self.download(url) {
                Ok((tmp, sha256)) => return unpack(tmp.path(), sha256),
                Err(err) => last_err = Some(err),
            }
        }
        let err = last_err.unwrap_or_else(|| anyhow!("failed to download {url}"));
        Err(ArchiveProblem::Request(err.to_string()))
    }
}

fn unpack(archive_path: &Path, sha256: String) -> Result<Archive, ArchiveProblem> {
    let content = |err: &dyn std::fmt::Display| ArchiveProblem::Content(err.to_string());
    let dir = TempDir::new().map_err(|err| content(&err))?;
    let file = std::fs::File::open(archive_path).map_err(|err| content(&err))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.unpack(dir.path()).map_err(|err| content(&err))?;
    Ok(Archive::new(sha256, dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn tarballs_unpack_and_expose_their_content_root() {
        let staging = tempfile::tempdir().unwrap();
        let inner = staging.path().join("widgets-2.1.0");
        fs::create_dir_all(inner.join("src")).unwrap();
        fs::write(inner.join("src/Widget.elm"), b"module Widget").unwrap();
        fs::write(inner.join("elm.json"), b"{}").unwrap();

        let tarball = staging.path().join("archive.tar.gz");
        let encoder = flate2::write::GzEncoder::new(
            fs::File::create(&tarball).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all("widgets-2.1.0", &inner)
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let archive = unpack(&tarball, "deadbeef".to_string()).unwrap();
        assert_eq!(archive.sha256(), "deadbeef");
        let root = archive.content_root().unwrap();
        assert!(root.ends_with("widgets-2.1.0"));
        assert!(root.join("src/Widget.elm").exists());
    }

    #[test]
    fn corrupt_archives_are_content_problems() {
        let staging = tempfile::tempdir().unwrap();
        let bogus = staging.path().join("bogus.tar.gz");
        fs::write(&bogus, b"this is not a tarball").unwrap();
        match unpack(&bogus, "deadbeef".to_string()) {
            Err(ArchiveProblem::Content(_)) => {}
            other => panic!("expected a content problem, got {other:?}"),
        }
    }
}
