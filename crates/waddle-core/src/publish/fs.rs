use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{ArtifactPublisher, MirrorWarning, PublishError, PublishedFile, PublishedRun, Result};
use crate::domain::RunId;

const LATEST_PREFIX: &str = "latest_";

/// Filesystem-backed publisher rooted at one publish directory.
///
/// Runs are staged in a hidden sibling directory and renamed into place once
/// every copy has been verified, so a failed publish never leaves a partial
/// run directory. The latest alias is swapped with a rename and is never
/// absent while it is being updated.
#[derive(Debug, Clone)]
pub struct FsArtifactPublisher {
    root: PathBuf,
}

impl FsArtifactPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pair_dir(&self, entity_type: &str, variant: &str) -> PathBuf {
        self.root.join(entity_type).join(variant)
    }

    pub fn alias_path(&self, entity_type: &str, variant: &str) -> PathBuf {
        self.pair_dir(entity_type, variant)
            .join(format!("{LATEST_PREFIX}{variant}"))
    }

    fn read_alias(&self, entity_type: &str, variant: &str) -> Result<Option<RunId>> {
        let alias = self.alias_path(entity_type, variant);
        let meta = match fs::symlink_metadata(&alias) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let target = if meta.file_type().is_symlink() {
            let link = fs::read_link(&alias)?;
            link.file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_default()
        } else {
            fs::read_to_string(&alias)?.trim().to_string()
        };

        Ok((!target.is_empty()).then(|| RunId::new(target)))
    }

    fn swap_alias(&self, pair_dir: &Path, variant: &str, run_id: &RunId) -> Result<()> {
        let alias = pair_dir.join(format!("{LATEST_PREFIX}{variant}"));
        replace_alias(pair_dir, &alias, run_id)?;
        debug!(alias = %alias.display(), run_id = %run_id, "latest alias updated");
        Ok(())
    }
}

#[cfg(unix)]
fn replace_alias(pair_dir: &Path, alias: &Path, run_id: &RunId) -> Result<()> {
    let tmp = pair_dir.join(format!(".{LATEST_PREFIX}{run_id}.tmp"));
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::os::unix::fs::symlink(run_id.as_str(), &tmp)?;
    if let Err(e) = fs::rename(&tmp, alias) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn replace_alias(pair_dir: &Path, alias: &Path, run_id: &RunId) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(pair_dir)?;
    tmp.write_all(run_id.as_str().as_bytes())?;
    tmp.persist(alias).map_err(|e| e.error)?;
    Ok(())
}

impl ArtifactPublisher for FsArtifactPublisher {
    fn publish(
        &self,
        run_id: &RunId,
        entity_type: &str,
        variant: &str,
        files: &[PathBuf],
    ) -> Result<PublishedRun> {
        check_component("entity type", entity_type)?;
        check_component("variant", variant)?;
        check_component("run id", run_id.as_str())?;

        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(files.len());
        for path in files {
            if !path.is_file() {
                return Err(PublishError::MissingSource(path.clone()));
            }
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| PublishError::MissingSource(path.clone()))?
                .to_string();
            if !seen.insert(name.clone()) {
                return Err(PublishError::DuplicateFile(name));
            }
            sources.push((path, name));
        }

        let pair_dir = self.pair_dir(entity_type, variant);
        fs::create_dir_all(&pair_dir)?;
        let run_dir = pair_dir.join(run_id.as_str());
        if fs::symlink_metadata(&run_dir).is_ok() {
            return Err(PublishError::RunExists(run_dir));
        }

        // Removed on drop unless renamed into place below.
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging_{run_id}_"))
            .tempdir_in(&pair_dir)?;

        for (source, name) in &sources {
            let copy = staging.path().join(name);
            fs::copy(source, &copy)?;
            let (_, source_digest) = hash_file(source)?;
            let (_, copy_digest) = hash_file(&copy)?;
            if source_digest != copy_digest {
                return Err(PublishError::VerificationFailed(name.clone()));
            }
        }

        fs::rename(staging.path(), &run_dir)?;
        self.swap_alias(&pair_dir, variant, run_id)?;

        self.load_run(entity_type, variant, run_id)
    }

    fn get_latest(&self, entity_type: &str, variant: &str) -> Result<PublishedRun> {
        check_component("entity type", entity_type)?;
        check_component("variant", variant)?;
        let run_id = self
            .read_alias(entity_type, variant)?
            .ok_or_else(|| PublishError::NotFound {
                entity_type: entity_type.to_string(),
                variant: variant.to_string(),
            })?;
        self.load_run(entity_type, variant, &run_id)
    }

    fn list_runs(&self, entity_type: &str, variant: &str) -> Result<Vec<RunId>> {
        check_component("entity type", entity_type)?;
        check_component("variant", variant)?;
        let pair_dir = self.pair_dir(entity_type, variant);
        let entries = match fs::read_dir(&pair_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') && !name.starts_with(LATEST_PREFIX) {
                    runs.push(RunId::new(name));
                }
            }
        }
        runs.sort();
        Ok(runs)
    }

    fn load_run(&self, entity_type: &str, variant: &str, run_id: &RunId) -> Result<PublishedRun> {
        check_component("entity type", entity_type)?;
        check_component("variant", variant)?;
        check_component("run id", run_id.as_str())?;

        let directory = self.pair_dir(entity_type, variant).join(run_id.as_str());
        if !directory.is_dir() {
            return Err(PublishError::RunNotFound {
                entity_type: entity_type.to_string(),
                variant: variant.to_string(),
                run_id: run_id.to_string(),
            });
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let (size_bytes, sha256) = hash_file(&entry.path())?;
            files.push(PublishedFile {
                name,
                size_bytes,
                sha256,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(PublishedRun {
            run_id: run_id.clone(),
            entity_type: entity_type.to_string(),
            variant: variant.to_string(),
            created_at: run_id.timestamp(),
            directory,
            files,
        })
    }

    fn mirror(&self, source: &Path, destination: &Path) -> std::result::Result<(), MirrorWarning> {
        copy_replacing(source, destination).map_err(|e| MirrorWarning {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            message: e.to_string(),
        })
    }
}

fn copy_replacing(source: &Path, destination: &Path) -> io::Result<()> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    let mut input = fs::File::open(source)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.flush()?;
    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

fn hash_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((size, hex::encode(hasher.finalize())))
}

fn check_component(kind: &'static str, value: &str) -> Result<()> {
    let mut components = Path::new(value).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if value.is_empty() || !single_normal || value.contains(['/', '\\']) {
        return Err(PublishError::InvalidComponent {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        sources: PathBuf,
        publisher: FsArtifactPublisher,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("scratch");
        fs::create_dir_all(&sources).unwrap();
        let publisher = FsArtifactPublisher::new(dir.path().join("published"));
        Fixture {
            _dir: dir,
            sources,
            publisher,
        }
    }

    fn source(fx: &Fixture, name: &str, content: &[u8]) -> PathBuf {
        let path = fx.sources.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn rid(s: &str) -> RunId {
        RunId::new(s)
    }

    #[test]
    fn test_publish_copies_byte_identical_files() {
        let fx = fixture();
        let files = vec![
            source(&fx, "motion_a.json", b"{\"frames\": [1, 2]}"),
            source(&fx, "polynomial_coefficients.pkl", &[0u8, 159, 146, 150, 255]),
        ];

        let run = fx
            .publisher
            .publish(&rid("20250101_120000_000001"), "open_duck_mini", "v2", &files)
            .unwrap();

        assert_eq!(run.directory.file_name().unwrap(), "20250101_120000_000001");
        assert_eq!(run.file_names(), vec!["motion_a.json", "polynomial_coefficients.pkl"]);
        for src in &files {
            let name = src.file_name().unwrap();
            assert_eq!(fs::read(src).unwrap(), fs::read(run.directory.join(name)).unwrap());
        }
        assert_eq!(run.files[1].size_bytes, 5);
        assert!(run.created_at.is_some());
    }

    #[test]
    fn test_latest_follows_most_recent_publish() {
        let fx = fixture();
        let a = vec![source(&fx, "a.json", b"a")];
        fx.publisher
            .publish(&rid("20250101_120000_000001"), "bdx", "v1", &a)
            .unwrap();
        assert_eq!(
            fx.publisher.get_latest("bdx", "v1").unwrap().run_id,
            rid("20250101_120000_000001")
        );

        let b = vec![source(&fx, "b.json", b"b")];
        fx.publisher
            .publish(&rid("20250101_120500_000000"), "bdx", "v1", &b)
            .unwrap();
        let latest = fx.publisher.get_latest("bdx", "v1").unwrap();
        assert_eq!(latest.run_id, rid("20250101_120500_000000"));
        assert_eq!(latest.file_names(), vec!["b.json"]);

        let alias = fx.publisher.alias_path("bdx", "v1");
        assert!(alias.ends_with("bdx/v1/latest_v1"));
    }

    #[test]
    fn test_list_runs_is_ascending_and_skips_alias() {
        let fx = fixture();
        let f = vec![source(&fx, "a.json", b"a")];
        for id in ["20250102_000000_000000", "20250101_000000_000000"] {
            fx.publisher.publish(&rid(id), "bdx", "v1", &f).unwrap();
        }
        assert_eq!(
            fx.publisher.list_runs("bdx", "v1").unwrap(),
            vec![rid("20250101_000000_000000"), rid("20250102_000000_000000")]
        );
        assert!(fx.publisher.list_runs("bdx", "v9").unwrap().is_empty());
    }

    #[test]
    fn test_missing_source_leaves_no_run_and_keeps_latest() {
        let fx = fixture();
        let good = vec![source(&fx, "a.json", b"a")];
        fx.publisher
            .publish(&rid("20250101_000000_000000"), "bdx", "v1", &good)
            .unwrap();

        let bad = vec![source(&fx, "b.json", b"b"), fx.sources.join("missing.pkl")];
        let err = fx
            .publisher
            .publish(&rid("20250101_000001_000000"), "bdx", "v1", &bad)
            .unwrap_err();

        assert!(matches!(err, PublishError::MissingSource(_)));
        assert!(!fx.publisher.pair_dir("bdx", "v1").join("20250101_000001_000000").exists());
        assert_eq!(
            fx.publisher.get_latest("bdx", "v1").unwrap().run_id,
            rid("20250101_000000_000000")
        );
    }

    #[test]
    fn test_no_staging_directories_left_behind() {
        let fx = fixture();
        let f = vec![source(&fx, "a.json", b"a")];
        fx.publisher
            .publish(&rid("20250101_000000_000000"), "bdx", "v1", &f)
            .unwrap();
        let hidden: Vec<_> = fs::read_dir(fx.publisher.pair_dir("bdx", "v1"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(hidden.is_empty());
    }

    #[test]
    fn test_existing_run_is_rejected() {
        let fx = fixture();
        let f = vec![source(&fx, "a.json", b"a")];
        let id = rid("20250101_000000_000000");
        fx.publisher.publish(&id, "bdx", "v1", &f).unwrap();
        let err = fx.publisher.publish(&id, "bdx", "v1", &f).unwrap_err();
        assert!(matches!(err, PublishError::RunExists(_)));
    }

    #[test]
    fn test_duplicate_file_names_rejected() {
        let fx = fixture();
        let first = source(&fx, "a.json", b"a");
        let other_dir = fx.sources.join("nested");
        fs::create_dir_all(&other_dir).unwrap();
        let second = other_dir.join("a.json");
        fs::write(&second, b"other").unwrap();

        let err = fx
            .publisher
            .publish(&rid("20250101_000000_000000"), "bdx", "v1", &[first, second])
            .unwrap_err();
        assert!(matches!(err, PublishError::DuplicateFile(name) if name == "a.json"));
    }

    #[test]
    fn test_path_components_are_validated() {
        let fx = fixture();
        let f = vec![source(&fx, "a.json", b"a")];
        for (et, v, id) in [
            ("..", "v1", "r1"),
            ("bdx", "", "r1"),
            ("bdx", "a/b", "r1"),
            ("bdx", "v1", "."),
        ] {
            let err = fx.publisher.publish(&rid(id), et, v, &f).unwrap_err();
            assert!(matches!(err, PublishError::InvalidComponent { .. }), "{et}/{v}/{id}");
        }
    }

    #[test]
    fn test_get_latest_before_any_publish() {
        let fx = fixture();
        let err = fx.publisher.get_latest("bdx", "v1").unwrap_err();
        assert!(matches!(err, PublishError::NotFound { .. }));
    }

    #[test]
    fn test_mirror_creates_parents_and_overwrites() {
        let fx = fixture();
        let src = source(&fx, "polynomial_coefficients.pkl", b"new");
        let dest = fx.sources.join("play/open_duck_mini_v2/data/polynomial_coefficients.pkl");

        fx.publisher.mirror(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new");

        fs::write(&src, b"newer").unwrap();
        fx.publisher.mirror(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"newer");
    }

    #[test]
    fn test_mirror_failure_is_a_warning() {
        let fx = fixture();
        let src = source(&fx, "coeffs.pkl", b"x");
        let blocker = source(&fx, "blocker", b"i am a file");
        let dest = blocker.join("data/coeffs.pkl");

        let warning = fx.publisher.mirror(&src, &dest).unwrap_err();
        assert_eq!(warning.destination, dest);
        assert!(warning.to_string().starts_with("Error copying"));
    }
}
