// 📂 Map Listings - Where the yearly change maps come from
//
// The NHSBSA maps live in the OpenPrescribing repository as one file per
// year. A MapSource lists candidate files and fetches their text; the loader
// in `mapping` decides which entries are maps and what to do on failure.

use crate::error::{CheckerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// GitHub contents API listing of the presentation replacement maps
pub const DEFAULT_LISTING_URL: &str = "https://api.github.com/repos/ebmdatalab/openprescribing/contents/openprescribing/frontend/management/commands/presentation_replacements";

/// One entry of a listing: a name plus where to download it from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFile {
    pub name: String,
    pub download_url: String,
}

impl MapFile {
    pub fn new(name: &str, download_url: &str) -> Self {
        MapFile {
            name: name.to_string(),
            download_url: download_url.to_string(),
        }
    }

    /// Only `.txt` entries are maps; the directory also holds scripts and notes
    pub fn is_map_file(&self) -> bool {
        self.name.ends_with(".txt")
    }
}

/// MapSource - the external file-retrieval collaborator
///
/// Implementations block until each call completes.
pub trait MapSource {
    /// List every entry available from this source
    fn list(&self) -> Result<Vec<MapFile>>;

    /// Fetch the raw text of one entry
    fn fetch(&self, file: &MapFile) -> Result<String>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

// ============================================================================
// GITHUB LISTING
// ============================================================================

#[derive(Debug, Deserialize)]
struct GithubEntry {
    name: String,
    download_url: Option<String>,
}

pub struct GithubListing {
    url: String,
    client: reqwest::blocking::Client,
}

impl GithubListing {
    /// GitHub rejects API requests without a User-Agent
    pub fn new(url: &str, user_agent: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(GithubListing {
            url: url.to_string(),
            client,
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CheckerError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

impl MapSource for GithubListing {
    fn list(&self) -> Result<Vec<MapFile>> {
        let entries: Vec<GithubEntry> = self.get(&self.url)?.json()?;

        // Sub-directories come back with a null download_url
        let files = entries
            .into_iter()
            .filter_map(|entry| {
                entry
                    .download_url
                    .map(|url| MapFile::new(&entry.name, &url))
            })
            .collect::<Vec<_>>();

        debug!(count = files.len(), url = %self.url, "listed map directory");
        Ok(files)
    }

    fn fetch(&self, file: &MapFile) -> Result<String> {
        Ok(self.get(&file.download_url)?.text()?)
    }

    fn describe(&self) -> String {
        format!("GitHub listing {}", self.url)
    }
}

// ============================================================================
// LOCAL DIRECTORY
// ============================================================================

/// A checked-out copy of the maps (offline runs, tests)
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    pub fn new(root: &Path) -> Self {
        LocalDirectory {
            root: root.to_path_buf(),
        }
    }
}

impl MapSource for LocalDirectory {
    fn list(&self) -> Result<Vec<MapFile>> {
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path().display().to_string();
            files.push(MapFile::new(&name, &path));
        }

        Ok(files)
    }

    fn fetch(&self, file: &MapFile) -> Result<String> {
        Ok(fs::read_to_string(&file.download_url)?)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}
