use crate::{
    addon::{AddonRecord, PathForm, WorkshopItem, UNPACKED_DIR_NAME},
    error::ExtractError,
    tasks::CancelFlag,
};
use serde::Serialize;
use std::{collections::HashSet, fs, path::Path};
use walkdir::WalkDir;

pub trait MapClassifier: Send + Sync {
    fn is_map(&self, addon_id: &str) -> bool;
}

// Returning false from progress cancels. A failed extraction leaves no output.
pub trait ArchiveExtractor: Send + Sync {
    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        progress: &mut dyn FnMut(usize, usize, &str) -> bool,
    ) -> Result<ExtractSummary, ExtractError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files: usize,
    pub already_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapSource {
    Extract { archive: String, folder: String },
    Folder { folder: String },
    Missing { archive: String },
}

pub fn folder_has_entries(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

pub fn inspect(record: &AddonRecord) -> MapSource {
    let archive = record.archive_path();
    let folder = record.folder_path();
    let folder_path = Path::new(&folder);

    let mut folder_ready = false;
    if folder_path.is_dir() {
        folder_ready = folder_has_entries(folder_path);
        if !folder_ready {
            if let Err(err) = fs::remove_dir_all(folder_path) {
                tracing::warn!(folder = %folder, "could not remove empty map folder: {err}");
            }
        }
    }

    if folder_ready {
        return MapSource::Folder { folder };
    }
    if Path::new(&archive).is_file() {
        return MapSource::Extract { archive, folder };
    }
    MapSource::Missing { archive }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOutcome {
    Extracted(AddonRecord),
    AlreadyExtracted(AddonRecord),
    Failed { record: AddonRecord, reason: String },
    Cancelled,
}

pub fn resolve_map(
    record: &AddonRecord,
    extractor: &dyn ArchiveExtractor,
    progress: &mut dyn FnMut(usize, usize, &str) -> bool,
) -> MapOutcome {
    match inspect(record) {
        MapSource::Folder { folder } => {
            let mut updated = record.clone();
            updated.path = folder;
            updated.mark_as_map();
            MapOutcome::AlreadyExtracted(updated)
        }
        MapSource::Extract { archive, folder } => {
            match extractor.extract(Path::new(&archive), Path::new(&folder), progress) {
                Ok(summary) => {
                    tracing::info!(id = %record.id, files = summary.files, "map extracted");
                    let mut updated = record.clone();
                    updated.path = folder;
                    updated.mark_as_map();
                    MapOutcome::Extracted(updated)
                }
                Err(ExtractError::Cancelled) => MapOutcome::Cancelled,
                Err(err) => MapOutcome::Failed {
                    record: record.clone(),
                    reason: err.to_string(),
                },
            }
        }
        MapSource::Missing { archive } => MapOutcome::Failed {
            record: record.clone(),
            reason: format!("archive and non-empty extraction folder not found (archive: {archive})"),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapFailure {
    pub id: String,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MapCheckReport {
    pub maps: Vec<WorkshopItem>,
    pub extracted: Vec<WorkshopItem>,
    pub already_extracted: Vec<WorkshopItem>,
    pub failed: Vec<MapFailure>,
    pub total_maps: usize,
    pub cancelled: bool,
    #[serde(skip)]
    pub updated: Vec<AddonRecord>,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapProgress {
    pub current_map: usize,
    pub total_maps: usize,
    pub current_file: usize,
    pub total_files: usize,
    pub status: String,
}

pub fn check_maps(
    records: &[AddonRecord],
    only: Option<&HashSet<String>>,
    classifier: &dyn MapClassifier,
    extractor: &dyn ArchiveExtractor,
    cancel: &CancelFlag,
    on_progress: &mut dyn FnMut(&MapProgress),
) -> MapCheckReport {
    let mut report = MapCheckReport {
        updated: records.to_vec(),
        ..MapCheckReport::default()
    };

    let targets: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.has_known_id())
        .filter(|(_, record)| only.map_or(true, |ids| ids.contains(&record.id)))
        .map(|(idx, _)| idx)
        .collect();
    tracing::info!(count = targets.len(), "checking addons for maps");

    let mut map_indices = Vec::new();
    for &idx in &targets {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return finish(report, records);
        }
        let record = &records[idx];
        on_progress(&MapProgress {
            current_map: 0,
            total_maps: 0,
            current_file: 0,
            total_files: 0,
            status: format!("Checking addon: {}", record.title),
        });
        if classifier.is_map(&record.id) {
            map_indices.push(idx);
            report.maps.push(WorkshopItem::from(record));
        }
    }
    report.total_maps = map_indices.len();
    tracing::info!(maps = report.total_maps, "map classification finished");

    for (position, &idx) in map_indices.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return finish(report, records);
        }
        let current_map = position + 1;
        let total_maps = report.total_maps;
        let title = records[idx].title.clone();
        on_progress(&MapProgress {
            current_map,
            total_maps,
            current_file: 0,
            total_files: 0,
            status: format!("Processing map: {title}"),
        });

        let outcome = resolve_map(&report.updated[idx], extractor, &mut |file, files, name| {
            on_progress(&MapProgress {
                current_map,
                total_maps,
                current_file: file,
                total_files: files,
                status: format!("{title}: {name}"),
            });
            !cancel.is_cancelled()
        });

        match outcome {
            MapOutcome::Extracted(record) => {
                report.extracted.push(WorkshopItem::from(&record));
                report.updated[idx] = record;
            }
            MapOutcome::AlreadyExtracted(record) => {
                report.already_extracted.push(WorkshopItem::from(&record));
                report.updated[idx] = record;
            }
            MapOutcome::Failed { record, reason } => {
                tracing::warn!(id = %record.id, "map failed: {reason}");
                report.failed.push(MapFailure {
                    id: record.id,
                    title: record.title,
                    reason,
                });
            }
            MapOutcome::Cancelled => {
                report.cancelled = true;
                return finish(report, records);
            }
        }
    }

    tracing::info!(
        extracted = report.extracted.len(),
        failed = report.failed.len(),
        "map check completed"
    );
    finish(report, records)
}

fn finish(mut report: MapCheckReport, original: &[AddonRecord]) -> MapCheckReport {
    report.changed = report.updated.as_slice() != original;
    report
}

pub fn prefer_extracted_folder(path: &str) -> String {
    if PathForm::of(path) == PathForm::Folder {
        return path.to_string();
    }
    let folder = crate::addon::folder_path_for(path);
    if folder_has_entries(Path::new(&folder)) {
        folder
    } else {
        path.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub deleted_folders: usize,
    pub switched_paths: usize,
    #[serde(skip)]
    pub updated: Vec<AddonRecord>,
}

pub fn clear_extracted_maps(workshop_root: &Path, records: &[AddonRecord]) -> ClearReport {
    let mut report = ClearReport {
        updated: records.to_vec(),
        ..ClearReport::default()
    };

    if workshop_root.is_dir() {
        for entry in WalkDir::new(workshop_root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
        {
            let unpacked = entry.path().join(UNPACKED_DIR_NAME);
            if !unpacked.is_dir() {
                continue;
            }
            match fs::remove_dir_all(&unpacked) {
                Ok(()) => report.deleted_folders += 1,
                Err(err) => tracing::warn!(path = %unpacked.display(), "could not delete: {err}"),
            }
        }
    }

    for record in &mut report.updated {
        if record.path_form() == PathForm::Folder && record.path.ends_with(UNPACKED_DIR_NAME) {
            record.path = record.archive_path();
            report.switched_paths += 1;
        }
    }

    tracing::info!(
        deleted = report.deleted_folders,
        switched = report.switched_paths,
        "cleared extracted maps"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::MAP_PREFIX;
    use pretty_assertions::assert_eq;
    use std::{path::PathBuf, sync::atomic::{AtomicUsize, Ordering}};
    use tempfile::TempDir;

    struct AllMaps;

    impl MapClassifier for AllMaps {
        fn is_map(&self, addon_id: &str) -> bool {
            addon_id != "999"
        }
    }

    #[derive(Default)]
    struct FakeExtractor {
        calls: AtomicUsize,
        cancel_after_first_file: bool,
    }

    impl ArchiveExtractor for FakeExtractor {
        fn extract(
            &self,
            _archive: &Path,
            dest: &Path,
            progress: &mut dyn FnMut(usize, usize, &str) -> bool,
        ) -> Result<ExtractSummary, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::create_dir_all(dest.join("maps")).map_err(|err| ExtractError::Failed(err.to_string()))?;
            fs::write(dest.join("maps").join("a.bsp"), b"bsp")
                .map_err(|err| ExtractError::Failed(err.to_string()))?;
            if !progress(1, 2, "maps/a.bsp") || self.cancel_after_first_file {
                let _ = fs::remove_dir_all(dest);
                return Err(ExtractError::Cancelled);
            }
            Ok(ExtractSummary {
                files: 1,
                already_present: false,
            })
        }
    }

    fn workshop_with_archive(id: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let addon_dir = dir.path().join(id);
        fs::create_dir_all(&addon_dir).unwrap();
        let archive = addon_dir.join("workshop_dir.vpk");
        fs::write(&archive, b"vpk").unwrap();
        (dir, archive)
    }

    fn run(records: &[AddonRecord], extractor: &FakeExtractor) -> MapCheckReport {
        check_maps(records, None, &AllMaps, extractor, &CancelFlag::new(), &mut |_| {})
    }

    #[test]
    fn extracts_once_and_prefixes_once() {
        let (_dir, archive) = workshop_with_archive("5");
        let record = AddonRecord::new("Station", archive.to_string_lossy());
        let extractor = FakeExtractor::default();

        let first = run(&[record.clone()], &extractor);
        assert_eq!(first.total_maps, 1);
        assert_eq!(first.extracted.len(), 1);
        assert!(first.changed);
        let updated = first.updated[0].clone();
        assert_eq!(updated.path, record.folder_path());
        assert_eq!(updated.title, format!("{MAP_PREFIX}Station"));

        let second = run(&first.updated, &extractor);
        assert_eq!(second.already_extracted.len(), 1);
        assert!(!second.changed);
        assert_eq!(second.updated[0].title, format!("{MAP_PREFIX}Station"));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn folder_without_archive_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("8").join("workshop_dir");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("addoninfo.txt"), b"x").unwrap();
        let record = AddonRecord::new("Map", format!("{}.vpk", folder.display()));

        let extractor = FakeExtractor::default();
        let report = run(&[record], &extractor);
        assert_eq!(report.already_extracted.len(), 1);
        assert_eq!(report.updated[0].path, folder.to_string_lossy());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_folder_is_deleted_and_reextracted() {
        let (dir, archive) = workshop_with_archive("6");
        let folder = dir.path().join("6").join("workshop_dir");
        fs::create_dir_all(&folder).unwrap();
        let record = AddonRecord::new("Map", archive.to_string_lossy());

        let extractor = FakeExtractor::default();
        let report = run(&[record], &extractor);
        assert_eq!(report.extracted.len(), 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert!(folder_has_entries(&folder));
    }

    #[test]
    fn missing_sources_fail_without_touching_record() {
        let record = AddonRecord::new("Gone", "/nowhere/workshop/content/220/7/workshop_dir.vpk");
        let report = run(&[record.clone()], &FakeExtractor::default());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "7");
        assert_eq!(report.updated, vec![record]);
        assert!(!report.changed);
    }

    #[test]
    fn non_maps_and_unselected_are_skipped() {
        let (_dir, archive) = workshop_with_archive("5");
        let records = vec![
            AddonRecord::new("Not a map", "/w/999/workshop_dir.vpk"),
            AddonRecord::new("Map", archive.to_string_lossy()),
        ];
        let only: HashSet<String> = ["999".to_string()].into_iter().collect();
        let extractor = FakeExtractor::default();
        let report = check_maps(
            &records,
            Some(&only),
            &AllMaps,
            &extractor,
            &CancelFlag::new(),
            &mut |_| {},
        );
        assert_eq!(report.total_maps, 0);
        assert_eq!(report.updated, records);
    }

    #[test]
    fn cancellation_is_reported_and_cleans_up() {
        let (dir, archive) = workshop_with_archive("5");
        let record = AddonRecord::new("Map", archive.to_string_lossy());
        let extractor = FakeExtractor {
            cancel_after_first_file: true,
            ..FakeExtractor::default()
        };
        let report = run(&[record.clone()], &extractor);
        assert!(report.cancelled);
        assert!(report.failed.is_empty());
        assert_eq!(report.updated, vec![record]);
        assert!(!dir.path().join("5").join("workshop_dir").exists());
    }

    #[test]
    fn cancel_flag_stops_before_classification() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let record = AddonRecord::new("Map", "/w/1/workshop_dir.vpk");
        let report = check_maps(&[record], None, &AllMaps, &FakeExtractor::default(), &cancel, &mut |_| {});
        assert!(report.cancelled);
        assert_eq!(report.total_maps, 0);
    }

    #[test]
    fn clear_removes_folders_and_restores_archive_paths() {
        let dir = tempfile::tempdir().unwrap();
        let unpacked = dir.path().join("3").join("workshop_dir");
        fs::create_dir_all(&unpacked).unwrap();
        fs::write(unpacked.join("f"), b"x").unwrap();
        let records = vec![
            AddonRecord::new("MAP   |   M", unpacked.to_string_lossy()),
            AddonRecord::new("A", "/w/4/workshop_dir.vpk"),
        ];
        let report = clear_extracted_maps(dir.path(), &records);
        assert_eq!(report.deleted_folders, 1);
        assert_eq!(report.switched_paths, 1);
        assert!(!unpacked.exists());
        assert_eq!(report.updated[0].path, format!("{}.vpk", unpacked.display()));
        assert_eq!(report.updated[1], records[1]);
    }

    #[test]
    fn prefers_existing_unpacked_folder() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("workshop_dir");
        let archive = format!("{}.vpk", folder.display());
        assert_eq!(prefer_extracted_folder(&archive), archive);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("f"), b"x").unwrap();
        assert_eq!(prefer_extracted_folder(&archive), folder.to_string_lossy());
    }
}
