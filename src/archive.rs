use crate::error::{PtmError, Result};
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub const MARKER_EXTENSION: &str = "plymouth";

/// Streams the archive at `url` into `dest_dir` and returns its path.
pub fn download_archive(client: &Client, url: &str, dest_dir: &Path) -> Result<PathBuf> {
    let path = dest_dir.join("theme.tar");
    let mut response = client.get(url).send()?.error_for_status()?;

    let mut file = File::create(&path)?;
    let written = response.copy_to(&mut file)?;

    info!(url, bytes = written, "Downloaded theme archive");
    Ok(path)
}

fn is_gzip(file: &mut File) -> Result<bool> {
    let mut magic = [0u8; 2];
    let gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(0))?;
    Ok(gzip)
}

/// Unpacks a plain or gzip-compressed tarball into `dest`. Entries that would
/// land outside `dest` are refused by `tar`.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let mut file = File::open(archive)?;
    fs::create_dir_all(dest)?;

    let reader: Box<dyn Read> = if is_gzip(&mut file)? {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(false);
    tar.unpack(dest)?;

    debug!(archive = %archive.display(), dest = %dest.display(), "Extracted archive");
    Ok(())
}

fn collect_markers(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            collect_markers(&path, found)?;
        } else if file_type.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(MARKER_EXTENSION)
        {
            found.push(path);
        }
    }
    Ok(())
}

/// Locates the single `.plymouth` file below `root`.
pub fn find_marker(root: &Path) -> Result<PathBuf> {
    let mut found = Vec::new();
    collect_markers(root, &mut found)?;

    match found.len() {
        0 => Err(PtmError::MarkerNotFound(root.to_path_buf())),
        1 => Ok(found.remove(0)),
        n => Err(PtmError::AmbiguousMarker(n)),
    }
}

/// The extracted theme: the directory holding the marker, the directory name
/// it is installed under, and the marker's file name inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTheme {
    pub dir: PathBuf,
    pub name: String,
    pub marker_file: String,
}

/// Finds the marker below `root`. The theme keeps its directory name, since
/// `.plymouth` files refer to their assets by absolute path. A marker at the
/// top of the archive has no directory, so its stem names the theme.
pub fn locate_theme(root: &Path) -> Result<ExtractedTheme> {
    let marker = find_marker(root)?;
    let invalid = || PtmError::InvalidThemeName(marker.display().to_string());

    let marker_file = marker
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(invalid)?;
    let dir = marker
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| PtmError::MarkerNotFound(root.to_path_buf()))?;

    let name = if dir == root {
        marker.file_stem().and_then(|s| s.to_str())
    } else {
        dir.file_name().and_then(|s| s.to_str())
    }
    .map(str::to_string)
    .ok_or_else(invalid)?;

    Ok(ExtractedTheme { dir, name, marker_file })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Builds a tarball from `(path, contents)` pairs.
    pub(crate) fn build_archive(path: &Path, files: &[(&str, &str)], gzip: bool) {
        let file = File::create(path).unwrap();
        let writer: Box<dyn std::io::Write> = if gzip {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };

        let mut builder = tar::Builder::new(writer);
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().flush().unwrap();
    }

    #[test]
    fn extracts_gzip_and_finds_marker() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("theme.tar.gz");
        build_archive(
            &archive,
            &[
                ("pack/spinner/spinner.plymouth", "[Plymouth Theme]\nName=Spinner\n"),
                ("pack/spinner/spinner.script", "# script\n"),
                ("pack/README", "hello"),
            ],
            true,
        );

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();

        let theme = locate_theme(&out).unwrap();
        assert_eq!(theme.name, "spinner");
        assert_eq!(theme.marker_file, "spinner.plymouth");
        assert_eq!(theme.dir, out.join("pack/spinner"));
        assert!(theme.dir.join("spinner.script").is_file());
    }

    #[test]
    fn extracts_plain_tar() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("theme.tar");
        build_archive(&archive, &[("retro/retro.plymouth", "x")], false);

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        assert_eq!(find_marker(&out).unwrap(), out.join("retro/retro.plymouth"));
    }

    #[test]
    fn theme_keeps_its_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("theme.tar.gz");
        build_archive(
            &archive,
            &[("spinner-blue/spinner_blue.plymouth", "ImageDir=/usr/share/plymouth/themes/spinner-blue\n")],
            true,
        );

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();

        let theme = locate_theme(&out).unwrap();
        assert_eq!(theme.name, "spinner-blue");
        assert_eq!(theme.marker_file, "spinner_blue.plymouth");
        assert_eq!(theme.dir, out.join("spinner-blue"));
    }

    #[test]
    fn marker_at_root_is_named_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("theme.tar");
        build_archive(&archive, &[("flat.plymouth", "x"), ("flat.script", "y")], false);

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();

        let theme = locate_theme(&out).unwrap();
        assert_eq!(theme.name, "flat");
        assert_eq!(theme.marker_file, "flat.plymouth");
        assert_eq!(theme.dir, out);
    }

    #[test]
    fn entries_escaping_dest_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.tar");

        // `append_data` refuses `..`, so the name is written into the raw header.
        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        let payload = b"owned";
        let mut header = tar::Header::new_old();
        let raw_name = b"../evil";
        header.as_old_mut().name[..raw_name.len()].copy_from_slice(raw_name);
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &payload[..]).unwrap();

        let mut legit = tar::Header::new_gnu();
        legit.set_size(1);
        legit.set_mode(0o644);
        legit.set_cksum();
        builder.append_data(&mut legit, "theme/theme.plymouth", &b"x"[..]).unwrap();
        builder.into_inner().unwrap().flush().unwrap();

        let out = dir.path().join("nested/out");
        // `tar` skips the escaping entry rather than failing the whole unpack.
        let _ = extract(&archive, &out);

        assert!(!dir.path().join("nested/evil").exists());
        assert!(!dir.path().join("evil").exists());
    }

    #[test]
    fn archive_without_marker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("theme.tar.gz");
        build_archive(&archive, &[("assets/logo.png", "png")], true);

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        assert!(matches!(locate_theme(&out), Err(PtmError::MarkerNotFound(_))));
    }

    #[test]
    fn two_markers_are_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("theme.tar.gz");
        build_archive(
            &archive,
            &[("a/a.plymouth", "a"), ("b/b.plymouth", "b")],
            true,
        );

        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        assert!(matches!(find_marker(&out), Err(PtmError::AmbiguousMarker(2))));
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("theme.tar.gz");
        fs::write(&archive, [0x1f, 0x8b, 0x00, 0x01, 0x02]).unwrap();

        assert!(extract(&archive, &dir.path().join("out")).is_err());
    }
}
