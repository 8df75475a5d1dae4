use crate::{
    addon::{AddonRecord, PathForm, WorkshopItem, UNKNOWN_ID},
    config::AppConfig,
    error::GameInfoError,
    gameinfo::{self, GameInfoDocument},
    install::{GameDir, Installation},
    maps::{self, ArchiveExtractor, ClearReport, MapCheckReport, MapClassifier, MapProgress},
    markers::{MarkerInstall, MarkerStatus},
    parser::{self, BlockSource},
    reconcile::{self, MergeOutcome},
    report::Reporter,
    resources::{self, ResourceCopy},
    tasks::{self, CancelFlag, ResolveFailure, RESOLVE_WORKERS},
    workshop::{self, PageKind, WorkshopResolver},
    writer,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

pub const LIST_HEADER: &str = "HL2VR_addons_list_save";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    pub check_files: bool,
    pub sync_episodes: bool,
    pub auto_check_maps: bool,
    pub bundled_content: Option<PathBuf>,
}

impl MountOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            check_files: config.check_addon_files,
            sync_episodes: config.embed_into_episodes,
            auto_check_maps: config.auto_check_maps,
            bundled_content: config.bundled_content_dir.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Services {
    pub resolver: Arc<dyn WorkshopResolver>,
    pub classifier: Arc<dyn MapClassifier>,
    pub extractor: Arc<dyn ArchiveExtractor>,
    pub reporter: Arc<dyn Reporter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountSource {
    Collection,
    Single,
    Installed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingAddon {
    pub id: String,
    pub title: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPlan {
    pub source: MountSource,
    pub records: Vec<AddonRecord>,
    pub duplicates: Vec<WorkshopItem>,
    pub missing: Vec<MissingAddon>,
    pub not_found: Vec<String>,
    pub failed: Vec<ResolveFailure>,
}

impl MountPlan {
    pub fn ids(&self) -> HashSet<String> {
        self.records.iter().map(|record| record.id.clone()).collect()
    }

    fn has_gaps(&self) -> bool {
        !self.missing.is_empty() || !self.not_found.is_empty() || !self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("no addons could be resolved")]
    NothingResolved,
    #[error("all addons are already mounted")]
    AllAlreadyMounted,
    #[error("addon '{title}' is already mounted")]
    AlreadyMounted { title: String },
    #[error("addon files are missing")]
    FilesMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Preparation {
    Ready(MountPlan),
    Partial(MountPlan),
    Rejected(RejectReason),
}

impl Preparation {
    pub fn into_plan(self) -> Result<MountPlan, RejectReason> {
        match self {
            Preparation::Ready(plan) | Preparation::Partial(plan) => Ok(plan),
            Preparation::Rejected(reason) => Err(reason),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpisodeSync {
    pub synced: Vec<GameDir>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountReport {
    pub added: usize,
    pub markers_installed: bool,
    pub resources: Vec<ResourceCopy>,
    pub episodes: Option<EpisodeSync>,
    pub maps: Option<MapCheckOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveReport {
    pub removed: usize,
    pub episodes: Option<EpisodeSync>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Up,
    Down,
    Top,
    Bottom,
}

impl Move {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" => Some(Move::Up),
            "down" => Some(Move::Down),
            "top" => Some(Move::Top),
            "bottom" => Some(Move::Bottom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReorderReport {
    pub changed: bool,
    pub unmatched: Vec<String>,
    pub episodes: Option<EpisodeSync>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCheckReport {
    pub present: Vec<WorkshopItem>,
    pub missing: Vec<MissingAddon>,
    pub pruned: usize,
    pub episodes: Option<EpisodeSync>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapCheckOutcome {
    pub report: MapCheckReport,
    pub episodes: Option<EpisodeSync>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub report: ClearReport,
    pub episodes: Option<EpisodeSync>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicates: usize,
    pub markers_installed: bool,
    pub resources: Vec<ResourceCopy>,
    pub episodes: Option<EpisodeSync>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameStatus {
    pub game: GameDir,
    pub path: PathBuf,
    pub exists: bool,
    pub markers: MarkerStatus,
    pub writable: bool,
    pub source: Option<BlockSource>,
    pub addons: usize,
}

pub struct Mounter {
    install: Installation,
    options: MountOptions,
    services: Services,
}

impl Mounter {
    pub fn new(install: Installation, options: MountOptions, services: Services) -> Self {
        Self {
            install,
            options,
            services,
        }
    }

    fn reporter(&self) -> &dyn Reporter {
        self.services.reporter.as_ref()
    }

    fn main_gameinfo(&self) -> PathBuf {
        self.install.gameinfo_path(GameDir::Hlvr)
    }

    fn load_main(&self) -> Result<GameInfoDocument> {
        Ok(GameInfoDocument::load(&self.main_gameinfo())?)
    }

    fn load_managed(&self) -> Result<(GameInfoDocument, Vec<AddonRecord>)> {
        let doc = self.load_main()?;
        let status = doc.marker_status();
        status.ensure_writable()?;
        if status == MarkerStatus::NoMarkers {
            bail!("{} has no managed addons block", doc.path().display());
        }
        let records = doc.addons();
        Ok((doc, records))
    }

    pub fn list(&self) -> Vec<AddonRecord> {
        gameinfo::read_addons(&self.main_gameinfo(), self.reporter())
    }

    pub fn status(&self) -> Vec<GameStatus> {
        GameDir::ALL
            .into_iter()
            .map(|game| {
                let path = self.install.gameinfo_path(game);
                match GameInfoDocument::load(&path) {
                    Ok(doc) => {
                        let block = doc.block();
                        GameStatus {
                            game,
                            exists: true,
                            markers: doc.marker_status(),
                            writable: doc.marker_status().allows_write(),
                            source: block.as_ref().map(|block| block.source),
                            addons: block.map(|block| block.addons.len()).unwrap_or(0),
                            path,
                        }
                    }
                    Err(_) => GameStatus {
                        game,
                        exists: false,
                        markers: MarkerStatus::NoMarkers,
                        writable: false,
                        source: None,
                        addons: 0,
                        path,
                    },
                }
            })
            .collect()
    }

    pub fn prepare_collection(&self, url: &str) -> Result<Preparation> {
        self.reporter().info("Preparing addons from collection");
        workshop::validate_url(self.services.resolver.as_ref(), url, PageKind::Collection)?;
        let items = match self.services.resolver.resolve_collection(url.trim()) {
            Ok(items) => items,
            Err(err) => {
                self.reporter().warn(&format!("Could not read collection: {err:#}"));
                Vec::new()
            }
        };
        Ok(self.plan_from_items(MountSource::Collection, items, Vec::new(), Vec::new()))
    }

    pub fn prepare_single(&self, url: &str) -> Result<Preparation> {
        self.reporter().info("Preparing single addon");
        workshop::validate_url(self.services.resolver.as_ref(), url, PageKind::Addon)?;
        let item = match self.services.resolver.resolve_single(url.trim()) {
            Ok(item) => item,
            Err(err) => {
                self.reporter().warn(&format!("Could not read addon page: {err:#}"));
                None
            }
        };
        let Some(item) = item else {
            return Ok(Preparation::Rejected(RejectReason::NothingResolved));
        };

        let existing = gameinfo::read_addons(&self.main_gameinfo(), self.reporter());
        if reconcile::mounted_ids(&existing).contains(item.id.as_str()) {
            return Ok(Preparation::Rejected(RejectReason::AlreadyMounted { title: item.title }));
        }
        Ok(self.plan_from_items(MountSource::Single, vec![item], Vec::new(), Vec::new()))
    }

    pub fn prepare_installed(
        &self,
        cancel: &CancelFlag,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Preparation> {
        self.reporter().info("Preparing addons from workshop.txt");
        let ids = workshop::read_installed_ids(self.install.hl2_root())?;
        let batch = tasks::resolve_batch(
            &ids,
            RESOLVE_WORKERS,
            self.services.resolver.as_ref(),
            cancel,
            on_progress,
        );
        if batch.cancelled {
            bail!("resolving installed addons was cancelled");
        }
        for id in &batch.not_found {
            self.reporter().warn(&format!("Addon {id} not found on the workshop"));
        }
        for failure in &batch.failed {
            self.reporter()
                .error(&format!("Addon {} failed to load: {}", failure.id, failure.error));
        }
        self.reporter().info(&format!(
            "Processed {} of {} installed addons, {} resolved",
            batch.processed(),
            ids.len(),
            batch.resolved.len()
        ));
        Ok(self.plan_from_items(
            MountSource::Installed,
            batch.resolved,
            batch.not_found,
            batch.failed,
        ))
    }

    fn plan_from_items(
        &self,
        source: MountSource,
        items: Vec<WorkshopItem>,
        not_found: Vec<String>,
        failed: Vec<ResolveFailure>,
    ) -> Preparation {
        if items.is_empty() {
            return Preparation::Rejected(RejectReason::NothingResolved);
        }
        let existing = gameinfo::read_addons(&self.main_gameinfo(), self.reporter());
        let MergeOutcome { unique, duplicates } = reconcile::merge(&existing, &items);
        if unique.is_empty() {
            return Preparation::Rejected(RejectReason::AllAlreadyMounted);
        }

        let mut records = Vec::with_capacity(unique.len());
        let mut missing = Vec::new();
        for item in unique {
            let path = maps::prefer_extracted_folder(&self.install.archive_path(&item.id));
            let absent = PathForm::of(&path) == PathForm::Archive && !Path::new(&path).is_file();
            if self.options.check_files && absent {
                missing.push(MissingAddon {
                    id: item.id,
                    title: item.title,
                    path,
                });
                continue;
            }
            let mut record = AddonRecord::new(item.title, path);
            record.id = item.id;
            records.push(record);
        }
        if !missing.is_empty() {
            self.reporter()
                .warn(&format!("Found {} missing addon files", missing.len()));
        }
        if records.is_empty() {
            return Preparation::Rejected(RejectReason::FilesMissing);
        }
        reconcile::renumber(&mut records);

        let plan = MountPlan {
            source,
            records,
            duplicates,
            missing,
            not_found,
            failed,
        };
        self.reporter()
            .info(&format!("Prepared {} addons for mounting", plan.records.len()));
        if plan.has_gaps() {
            Preparation::Partial(plan)
        } else {
            Preparation::Ready(plan)
        }
    }

    pub fn execute(&mut self, plan: &MountPlan) -> Result<MountReport> {
        self.reporter().info("Mounting addons");
        let mut doc = self.load_main()?;
        let existing = managed_addons(&doc);
        let combined = reconcile::apply_full_order(&existing, &plan.records);
        let install = doc.write_block(&combined)?;
        doc.save()?;

        let added = combined.len().saturating_sub(existing.len());
        self.reporter().info(&format!("Added addons: {added}"));
        let resources = self.after_install(install);
        let episodes = self.sync_after_write(&doc);

        let maps = if self.options.auto_check_maps && added > 0 {
            let ids = plan.ids();
            match self.map_check(Some(&ids), &CancelFlag::new(), &mut |_| {}) {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    self.reporter()
                        .warn(&format!("Automatic map check failed: {err:#}"));
                    None
                }
            }
        } else {
            None
        };

        Ok(MountReport {
            added,
            markers_installed: matches!(install, MarkerInstall::Inserted { .. }),
            resources,
            episodes,
            maps,
        })
    }

    pub fn remove(&mut self, ids: &HashSet<String>) -> Result<RemoveReport> {
        let mut doc = self.load_main()?;
        let expected = reconcile::remove(&doc.addons(), ids);
        let removed = doc.remove_ids(ids)?;
        if !same_entries(&doc.addons(), &expected) {
            bail!(
                "removing addons from {} would disturb other entries",
                doc.path().display()
            );
        }
        if removed == 0 {
            self.reporter().info("No matching addons to remove");
            return Ok(RemoveReport {
                removed,
                episodes: None,
            });
        }
        doc.save()?;
        self.reporter().info(&format!("Removed addons: {removed}"));
        let episodes = self.sync_after_write(&doc);
        Ok(RemoveReport { removed, episodes })
    }

    pub fn remove_all(&mut self) -> Result<RemoveReport> {
        let doc = self.load_main()?;
        let ids: HashSet<String> = doc.addons().into_iter().map(|record| record.id).collect();
        self.remove(&ids)
    }

    pub fn move_addon(&mut self, target: &str, direction: Move) -> Result<ReorderReport> {
        let (mut doc, mut records) = self.load_managed()?;
        let index = find_addon(&records, target)
            .with_context(|| format!("addon {target} is not mounted"))?;
        let changed = match direction {
            Move::Up => reconcile::move_up(&mut records, index),
            Move::Down => reconcile::move_down(&mut records, index),
            Move::Top => reconcile::move_to_top(&mut records, index),
            Move::Bottom => reconcile::move_to_bottom(&mut records, index),
        };
        let episodes = if changed {
            self.rewrite(&mut doc, &records)?
        } else {
            None
        };
        Ok(ReorderReport {
            changed,
            unmatched: Vec::new(),
            episodes,
        })
    }

    pub fn reorder(&mut self, ids: &[String]) -> Result<ReorderReport> {
        let (mut doc, records) = self.load_managed()?;
        let (ordered, unmatched) = reconcile::reorder_by_ids(&records, ids);
        for id in &unmatched {
            self.reporter().warn(&format!("Addon {id} is not mounted"));
        }
        let changed = ordered != records;
        let episodes = if changed {
            self.rewrite(&mut doc, &ordered)?
        } else {
            None
        };
        Ok(ReorderReport {
            changed,
            unmatched,
            episodes,
        })
    }

    pub fn check_files(&mut self, prune: bool) -> Result<FileCheckReport> {
        let doc = self.load_main()?;
        let (present, missing): (Vec<AddonRecord>, Vec<AddonRecord>) = doc
            .addons()
            .into_iter()
            .partition(|record| Path::new(&record.path).exists());
        let missing: Vec<MissingAddon> = missing
            .into_iter()
            .map(|record| MissingAddon {
                id: record.id,
                title: record.title,
                path: record.path,
            })
            .collect();
        for addon in &missing {
            self.reporter()
                .warn(&format!("Missing addon file: {} ({})", addon.title, addon.path));
        }

        let mut pruned = 0;
        let mut episodes = None;
        if prune && !missing.is_empty() {
            let ids: HashSet<String> = missing
                .iter()
                .filter(|addon| addon.id != UNKNOWN_ID)
                .map(|addon| addon.id.clone())
                .collect();
            if ids.len() < missing.len() {
                self.reporter()
                    .warn("Missing addons without a workshop ID were left in place");
            }
            if !ids.is_empty() {
                let report = self.remove(&ids)?;
                pruned = report.removed;
                episodes = report.episodes;
            }
        }

        Ok(FileCheckReport {
            present: present.iter().map(WorkshopItem::from).collect(),
            missing,
            pruned,
            episodes,
        })
    }

    pub fn map_check(
        &mut self,
        only: Option<&HashSet<String>>,
        cancel: &CancelFlag,
        on_progress: &mut dyn FnMut(&MapProgress),
    ) -> Result<MapCheckOutcome> {
        let (mut doc, records) = self.load_managed()?;
        let report = maps::check_maps(
            &records,
            only,
            self.services.classifier.as_ref(),
            self.services.extractor.as_ref(),
            cancel,
            on_progress,
        );
        if report.cancelled {
            self.reporter().warn("Map check cancelled");
        }
        for failure in &report.failed {
            self.reporter()
                .error(&format!("Map {} failed: {}", failure.title, failure.reason));
        }
        let episodes = if report.changed {
            self.rewrite(&mut doc, &report.updated)?
        } else {
            None
        };
        Ok(MapCheckOutcome { report, episodes })
    }

    pub fn clear_maps(&mut self) -> Result<ClearOutcome> {
        let (mut doc, records) = self.load_managed()?;
        self.reporter().info("Clearing extracted maps");
        let report = maps::clear_extracted_maps(self.install.workshop_root(), &records);
        let episodes = if report.switched_paths > 0 {
            self.rewrite(&mut doc, &report.updated)?
        } else {
            None
        };
        self.reporter().info(&format!(
            "Deleted {} folders, restored {} archive paths",
            report.deleted_folders, report.switched_paths
        ));
        Ok(ClearOutcome { report, episodes })
    }

    pub fn export_list(&self, dest: &Path) -> Result<usize> {
        let records = self.list();
        if records.is_empty() {
            bail!("no addons to save");
        }
        let mut text = format!("{LIST_HEADER}\n");
        text.push_str(&writer::render_block(&records, "\n")?.concat());
        fs::write(dest, text).with_context(|| format!("write {}", dest.display()))?;
        self.reporter().info(&format!(
            "Saved {} addons to {}",
            records.len(),
            dest.display()
        ));
        Ok(records.len())
    }

    pub fn import_list(&mut self, src: &Path) -> Result<ImportReport> {
        let content =
            fs::read_to_string(src).with_context(|| format!("read {}", src.display()))?;
        let (header, body) = content.split_once('\n').unwrap_or((content.as_str(), ""));
        if header.trim_end_matches('\r') != LIST_HEADER {
            bail!("{} is not a saved addons list", src.display());
        }
        let parsed = parser::parse_pairs(body);
        let records = reconcile::apply_full_order(&[], &parsed);
        let duplicates = parsed.len() - records.len();
        if duplicates > 0 {
            self.reporter()
                .warn(&format!("Skipped {duplicates} duplicate addons in {}", src.display()));
        }

        let mut doc = self.load_main()?;
        let install = doc.write_block(&records)?;
        doc.save()?;
        self.reporter()
            .info(&format!("Loaded {} addons from {}", records.len(), src.display()));
        let resources = self.after_install(install);
        let episodes = self.sync_after_write(&doc);
        Ok(ImportReport {
            imported: records.len(),
            duplicates,
            markers_installed: matches!(install, MarkerInstall::Inserted { .. }),
            resources,
            episodes,
        })
    }

    pub fn sync_episodes(&mut self) -> Result<EpisodeSync> {
        if self.install.episode_gameinfos().is_empty() {
            bail!("episodes not installed");
        }
        let doc = self.load_main()?;
        let sync = self.sync_records(&managed_addons(&doc));
        if let Some(error) = &sync.error {
            bail!("{error}");
        }
        Ok(sync)
    }

    fn rewrite(
        &self,
        doc: &mut GameInfoDocument,
        records: &[AddonRecord],
    ) -> Result<Option<EpisodeSync>> {
        let install = doc.write_block(records)?;
        doc.save()?;
        self.after_install(install);
        Ok(self.sync_after_write(doc))
    }

    fn after_install(&self, install: MarkerInstall) -> Vec<ResourceCopy> {
        match install {
            MarkerInstall::Inserted { anchor, .. } => {
                tracing::debug!(?anchor, "addon markers inserted");
                self.copy_resources()
            }
            MarkerInstall::AlreadyPresent => Vec::new(),
        }
    }

    fn copy_resources(&self) -> Vec<ResourceCopy> {
        match resources::copy_essential_resources(
            &self.install,
            self.options.bundled_content.as_deref(),
        ) {
            Ok(copies) => copies,
            Err(err) => {
                self.reporter()
                    .warn(&format!("Could not copy VR essential files: {err:#}"));
                Vec::new()
            }
        }
    }

    fn sync_after_write(&self, doc: &GameInfoDocument) -> Option<EpisodeSync> {
        if !self.options.sync_episodes || doc.marker_status() != MarkerStatus::Ok {
            return None;
        }
        if self.install.episode_gameinfos().is_empty() {
            return None;
        }
        Some(self.sync_records(&doc.addons()))
    }

    fn sync_records(&self, records: &[AddonRecord]) -> EpisodeSync {
        self.reporter().info("Syncing with episodes");
        let mut sync = EpisodeSync::default();
        for (game, path) in self.install.episode_gameinfos() {
            if let Err(err) = self.sync_one(game, &path, records) {
                let message = format!("{err:#}");
                self.reporter().error(&message);
                sync.error = Some(message);
                break;
            }
            sync.synced.push(game);
        }
        sync
    }

    fn sync_one(&self, game: GameDir, path: &Path, records: &[AddonRecord]) -> Result<()> {
        let tag = |err: GameInfoError| anyhow!("{}: {err}", game.label());
        let mut doc = GameInfoDocument::load(path).map_err(tag)?;
        let install = doc.write_block(records).map_err(tag)?;
        doc.save().map_err(tag)?;
        self.after_install(install);
        Ok(())
    }
}

fn managed_addons(doc: &GameInfoDocument) -> Vec<AddonRecord> {
    if doc.marker_status() == MarkerStatus::Ok {
        doc.addons()
    } else {
        Vec::new()
    }
}

fn same_entries(left: &[AddonRecord], right: &[AddonRecord]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(a, b)| a.id == b.id && a.title == b.title && a.path == b.path)
}

fn find_addon(records: &[AddonRecord], target: &str) -> Option<usize> {
    if let Some(sequence) = target.strip_prefix('#') {
        let sequence: usize = sequence.parse().ok()?;
        return records.iter().position(|record| record.sequence == sequence);
    }
    reconcile::position_of(records, target)
}
