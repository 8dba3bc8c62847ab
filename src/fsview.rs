//! Root-anchored view of the served directory tree.
//!
//! Every path handed to the filesystem goes through [`FsView::resolve`],
//! which rejects `..` before any FS call is made.

use chrono::{DateTime, Local};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use crate::error::{FtpError, Result};

#[derive(Debug, Clone)]
pub struct FsView {
  root: PathBuf,
  cwd: PathBuf,
}

impl FsView {
  pub fn new(root: impl AsRef<Path>) -> Result<Self> {
    let root = root.as_ref().canonicalize()?;
    Ok(Self {
      cwd: root.clone(),
      root,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn cwd(&self) -> &Path {
    &self.cwd
  }

  /// Join an argument onto the current directory. Arguments containing `..`
  /// are refused before touching the filesystem; a leading `/` is taken as
  /// root-relative.
  pub fn resolve(&self, arg: &str) -> Result<PathBuf> {
    if arg.split(['/', '\\']).any(|part| part == "..") {
      return Err(FtpError::PathDenied(arg.to_string()));
    }
    let joined = if let Some(rooted) = arg.strip_prefix('/') {
      self.root.join(rooted)
    } else {
      self.cwd.join(arg)
    };
    Ok(joined)
  }

  /// Locate a file by scanning the directory for a matching name.
  pub fn find_file(&self, dir: &Path, name: &str) -> Option<PathBuf> {
    for entry in fs::read_dir(dir).ok()? {
      let entry = entry.ok()?;
      if entry.file_name().to_string_lossy() == name && entry.path().is_file() {
        return Some(entry.path());
      }
    }
    None
  }

  /// Enumerate a directory as CRLF-terminated POSIX-style listing lines.
  /// `.` and `..` are never emitted.
  pub fn list_dir(&self, dir: &Path) -> Result<String> {
    let mut listing = String::new();
    for entry in fs::read_dir(dir)? {
      let entry = entry?;
      let name = entry.file_name().to_string_lossy().to_string();
      let metadata = entry.metadata()?;
      listing.push_str(&format_entry(&name, &metadata));
    }
    Ok(listing)
  }
}

fn format_entry(name: &str, metadata: &Metadata) -> String {
  // https://files.stairways.com/other/ftp-list-specs-info.txt
  let file_type = if metadata.is_dir() { "d" } else { "-" };
  let size = metadata.len() as u32;
  let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
  let stamp = DateTime::<Local>::from(modified)
    .format("%Y-%m-%d %H:%M:%S%.3f")
    .to_string();
  format!(
    "{}rw-r--r-- 1 owner group {} {} {}\r\n",
    file_type, size, stamp, name
  )
}
