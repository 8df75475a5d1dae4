use crate::{
    addon::AddonRecord,
    config::AppConfig,
    install::Installation,
    maps::MapProgress,
    mount::{
        EpisodeSync, MapCheckOutcome, Move, MountOptions, MountPlan, MountReport, Mounter,
        Preparation, Services,
    },
    parser::BlockSource,
    report::{LogEntry, MemoryReporter},
    tasks::{CancelFlag, Task, TaskOutcome},
    vpk::VpkExtractor,
    workshop::SteamWorkshop,
};
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::{
    collections::HashSet,
    io::IsTerminal,
    path::PathBuf,
    sync::Arc,
    thread,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Default)]
struct GlobalOptions {
    format: Option<OutputFormat>,
    hl2vr: Option<PathBuf>,
    hl2: Option<PathBuf>,
    check_files: Option<bool>,
    episodes: Option<bool>,
    auto_maps: Option<bool>,
    dry_run: bool,
}

impl GlobalOptions {
    fn format(&self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Text)
    }
}

enum CliAction {
    Help,
    Version,
    Command {
        command: CliCommand,
        global: GlobalOptions,
    },
}

enum CliCommand {
    List,
    Status,
    Validate,
    AddCollection(Option<String>),
    AddUrl(Option<String>),
    AddInstalled,
    Remove(Vec<String>),
    RemoveAll,
    Move { target: String, direction: Move },
    Reorder(Vec<String>),
    CheckFiles { prune: bool },
    CheckMaps(Vec<String>),
    ClearMaps,
    Export(PathBuf),
    Import(PathBuf),
    SyncEpisodes,
    ConfigShow,
    ConfigSet { key: String, value: String },
}

pub fn run(mut config: AppConfig) -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args)? {
        CliAction::Help => {
            print_help();
            Ok(())
        }
        CliAction::Version => {
            println!("MountSmith v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Command { command, global } => run_command(&mut config, command, &global),
    }
}

fn parse_args(args: &[String]) -> Result<CliAction> {
    if args.is_empty() {
        return Ok(CliAction::Help);
    }
    if matches!(args.first().map(|s| s.as_str()), Some("--help" | "-h" | "help")) {
        return Ok(CliAction::Help);
    }
    if matches!(args.first().map(|s| s.as_str()), Some("--version" | "-V" | "version")) {
        return Ok(CliAction::Version);
    }

    let (global, tokens) = parse_global_options(args)?;
    match parse_subcommand(&tokens)? {
        Some(command) => Ok(CliAction::Command { command, global }),
        None => Ok(CliAction::Help),
    }
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut global = GlobalOptions::default();
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            inline
                .clone()
                .or_else(|| iter.next().cloned())
                .ok_or_else(|| anyhow!("{name} requires a value"))
        };
        match flag {
            "--format" => {
                let raw = value("--format")?;
                global.format = Some(
                    OutputFormat::parse(&raw)
                        .ok_or_else(|| anyhow!("unknown format: {raw} (use 'text' or 'json')"))?,
                );
            }
            "--hl2vr" => global.hl2vr = Some(PathBuf::from(value("--hl2vr")?)),
            "--hl2" => global.hl2 = Some(PathBuf::from(value("--hl2")?)),
            "--no-file-check" => global.check_files = Some(false),
            "--no-episodes" => global.episodes = Some(false),
            "--no-map-check" => global.auto_maps = Some(false),
            "--dry-run" | "-n" => global.dry_run = true,
            _ => tokens.push(arg.to_string()),
        }
    }
    Ok((global, tokens))
}

fn parse_subcommand(tokens: &[String]) -> Result<Option<CliCommand>> {
    let Some(head) = tokens.first() else {
        return Ok(None);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let first = || rest.first().cloned();
    let required = |what: &str| -> Result<String> {
        rest.first()
            .cloned()
            .ok_or_else(|| anyhow!("{head} requires {what}"))
    };

    let command = match head.as_str() {
        "list" | "ls" => CliCommand::List,
        "status" => CliCommand::Status,
        "validate" => CliCommand::Validate,
        "add-collection" => CliCommand::AddCollection(first()),
        "add-url" | "add" => CliCommand::AddUrl(first()),
        "add-installed" => CliCommand::AddInstalled,
        "remove" | "rm" => {
            if rest.is_empty() {
                bail!("remove requires one or more addon ids");
            }
            CliCommand::Remove(rest.to_vec())
        }
        "remove-all" => CliCommand::RemoveAll,
        "move" => {
            let target = required("an addon id or #position")?;
            let raw = rest
                .get(1)
                .ok_or_else(|| anyhow!("move requires a direction (up, down, top, bottom)"))?;
            let direction =
                Move::parse(raw).ok_or_else(|| anyhow!("unknown direction: {raw}"))?;
            CliCommand::Move { target, direction }
        }
        "reorder" => {
            if rest.is_empty() {
                bail!("reorder requires the addon ids in their new order");
            }
            CliCommand::Reorder(rest.to_vec())
        }
        "check-files" => CliCommand::CheckFiles {
            prune: rest.iter().any(|arg| arg == "--prune"),
        },
        "check-maps" => CliCommand::CheckMaps(rest.to_vec()),
        "clear-maps" => CliCommand::ClearMaps,
        "export" => CliCommand::Export(PathBuf::from(required("a file path")?)),
        "import" => CliCommand::Import(PathBuf::from(required("a file path")?)),
        "sync-episodes" => CliCommand::SyncEpisodes,
        "config" => match rest.first().map(|value| value.as_str()).unwrap_or("show") {
            "show" => CliCommand::ConfigShow,
            "set" => {
                let key = rest
                    .get(1)
                    .ok_or_else(|| anyhow!("config set requires a key and a value"))?;
                let value = rest.get(2).cloned().unwrap_or_default();
                CliCommand::ConfigSet {
                    key: key.to_string(),
                    value,
                }
            }
            other => bail!("Unknown config command: {other} (use 'show' or 'set')"),
        },
        other => bail!("Unknown command: {other} (see --help)"),
    };
    Ok(Some(command))
}

#[derive(Serialize)]
struct JsonOutput<'a, T: Serialize> {
    result: &'a T,
    log: Vec<LogEntry>,
}

fn emit<T: Serialize>(
    format: OutputFormat,
    reporter: Option<&MemoryReporter>,
    value: &T,
    text: impl FnOnce(&T),
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = JsonOutput {
                result: value,
                log: reporter.map(|reporter| reporter.take()).unwrap_or_default(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => text(value),
    }
    Ok(())
}

fn run_command(config: &mut AppConfig, command: CliCommand, global: &GlobalOptions) -> Result<()> {
    let format = global.format();
    match command {
        CliCommand::ConfigShow => emit(format, None, config, |config| {
            println!("hl2vr:           {}", config.hl2vr_path.display());
            println!("hl2:             {}", config.hl2_path.display());
            println!("collection-url:  {}", config.collection_url);
            println!("addon-url:       {}", config.single_addon_url);
            println!("check-files:     {}", config.check_addon_files);
            println!("auto-maps:       {}", config.auto_check_maps);
            println!("episodes:        {}", config.embed_into_episodes);
            println!(
                "bundled-content: {}",
                config
                    .bundled_content_dir
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default()
            );
            println!("log-level:       {}", config.log_level);
        }),
        CliCommand::ConfigSet { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            emit(format, None, config, |_| println!("Saved {key}"))
        }
        CliCommand::Validate => {
            let install = installation(config, global)?;
            emit(format, None, &install, |install| {
                println!("Half-Life 2 VR: {}", install.hl2vr_root().display());
                println!("Half-Life 2:    {}", install.hl2_root().display());
                println!("Workshop:       {}", install.workshop_root().display());
            })
        }
        command => {
            let reporter = Arc::new(MemoryReporter::new());
            let mounter = build_mounter(config, global, reporter.clone())?;
            run_mount_command(config, mounter, command, global, &reporter)
        }
    }
}

fn installation(config: &AppConfig, global: &GlobalOptions) -> Result<Installation> {
    let hl2vr = global.hl2vr.clone().unwrap_or_else(|| config.hl2vr_path.clone());
    let hl2 = global.hl2.clone().unwrap_or_else(|| config.hl2_path.clone());
    Ok(Installation::discover(&hl2vr, &hl2)?)
}

fn build_mounter(
    config: &AppConfig,
    global: &GlobalOptions,
    reporter: Arc<MemoryReporter>,
) -> Result<Mounter> {
    let install = installation(config, global)?;
    let mut options = MountOptions::from_config(config);
    if let Some(check_files) = global.check_files {
        options.check_files = check_files;
    }
    if let Some(episodes) = global.episodes {
        options.sync_episodes = episodes;
    }
    if let Some(auto_maps) = global.auto_maps {
        options.auto_check_maps = auto_maps;
    }
    let steam = Arc::new(SteamWorkshop::new());
    let services = Services {
        resolver: steam.clone(),
        classifier: steam,
        extractor: Arc::new(VpkExtractor),
        reporter,
    };
    Ok(Mounter::new(install, options, services))
}

fn run_mount_command(
    config: &mut AppConfig,
    mut mounter: Mounter,
    command: CliCommand,
    global: &GlobalOptions,
    reporter: &MemoryReporter,
) -> Result<()> {
    let format = global.format();
    match command {
        CliCommand::List => emit(format, Some(reporter), &mounter.list(), |records| {
            print_records(records)
        }),
        CliCommand::Status => emit(format, Some(reporter), &mounter.status(), |games| {
            for game in games {
                if !game.exists {
                    println!("{:<12} not installed", game.game.label());
                    continue;
                }
                let source = match game.source {
                    Some(BlockSource::Markers) => "managed block",
                    Some(BlockSource::SearchPaths) => "SearchPaths",
                    None => "no block",
                };
                println!(
                    "{:<12} markers: {:<14} {} addons ({source})",
                    game.game.label(),
                    game.markers.label(),
                    game.addons
                );
                if !game.writable {
                    println!("             writes refused until the markers are fixed");
                }
            }
        }),
        CliCommand::AddCollection(url) => {
            let url = pick_url(url, &config.collection_url, "add-collection")?;
            let prepared = mounter.prepare_collection(&url)?;
            remember_url(config, |config| config.collection_url = url.clone());
            mount_prepared(mounter, prepared, global, reporter)
        }
        CliCommand::AddUrl(url) => {
            let url = pick_url(url, &config.single_addon_url, "add-url")?;
            let prepared = mounter.prepare_single(&url)?;
            remember_url(config, |config| config.single_addon_url = url.clone());
            mount_prepared(mounter, prepared, global, reporter)
        }
        CliCommand::AddInstalled => {
            let task = Task::spawn(
                move |progress: &dyn Fn((usize, usize)), cancel: &CancelFlag| {
                    let prepared =
                        mounter.prepare_installed(cancel, &mut |done, total| progress((done, total)))?;
                    Ok((mounter, prepared))
                },
            );
            cancel_on_enter(task.cancel_flag());
            let outcome = task.wait(|(done, total)| eprint!("\rResolving addons {done}/{total}"));
            eprintln!();
            match outcome {
                TaskOutcome::Finished((mounter, prepared)) => {
                    mount_prepared(mounter, prepared, global, reporter)
                }
                TaskOutcome::Cancelled => bail!("cancelled"),
                TaskOutcome::Failed(error) => bail!(error),
            }
        }
        CliCommand::Remove(ids) => {
            let ids: HashSet<String> = ids.into_iter().collect();
            let report = mounter.remove(&ids)?;
            emit(format, Some(reporter), &report, |report| {
                println!("Removed {} addon(s)", report.removed);
                print_episodes(report.episodes.as_ref());
            })
        }
        CliCommand::RemoveAll => {
            let report = mounter.remove_all()?;
            emit(format, Some(reporter), &report, |report| {
                println!("Removed {} addon(s)", report.removed);
                print_episodes(report.episodes.as_ref());
            })
        }
        CliCommand::Move { target, direction } => {
            let report = mounter.move_addon(&target, direction)?;
            emit(format, Some(reporter), &report, |report| {
                if report.changed {
                    println!("Moved {target}");
                } else {
                    println!("{target} is already there");
                }
                print_episodes(report.episodes.as_ref());
            })
        }
        CliCommand::Reorder(ids) => {
            let report = mounter.reorder(&ids)?;
            emit(format, Some(reporter), &report, |report| {
                println!("{}", if report.changed { "Order updated" } else { "Order unchanged" });
                for id in &report.unmatched {
                    println!("  not mounted: {id}");
                }
                print_episodes(report.episodes.as_ref());
            })
        }
        CliCommand::CheckFiles { prune } => {
            let report = mounter.check_files(prune)?;
            emit(format, Some(reporter), &report, |report| {
                println!("{} present, {} missing", report.present.len(), report.missing.len());
                for addon in &report.missing {
                    println!("  ! {} ({}) {}", addon.title, addon.id, addon.path);
                }
                if report.pruned > 0 {
                    println!("Unmounted {} missing addon(s)", report.pruned);
                }
                print_episodes(report.episodes.as_ref());
            })
        }
        CliCommand::CheckMaps(ids) => {
            let only: Option<HashSet<String>> =
                (!ids.is_empty()).then(|| ids.into_iter().collect());
            let outcome = run_map_check(mounter, only)?;
            emit(format, Some(reporter), &outcome, print_map_check)
        }
        CliCommand::ClearMaps => {
            let outcome = mounter.clear_maps()?;
            emit(format, Some(reporter), &outcome, |outcome| {
                println!(
                    "Deleted {} extracted folder(s), restored {} archive path(s)",
                    outcome.report.deleted_folders, outcome.report.switched_paths
                );
                print_episodes(outcome.episodes.as_ref());
            })
        }
        CliCommand::Export(path) => {
            let count = mounter.export_list(&path)?;
            emit(format, Some(reporter), &count, |count| {
                println!("Saved {count} addon(s) to {}", path.display())
            })
        }
        CliCommand::Import(path) => {
            let report = mounter.import_list(&path)?;
            emit(format, Some(reporter), &report, |report| {
                println!("Loaded {} addon(s)", report.imported);
                if report.duplicates > 0 {
                    println!("Skipped {} duplicate(s)", report.duplicates);
                }
                if report.markers_installed {
                    println!("Added addon markers to gameinfo.txt");
                }
                print_episodes(report.episodes.as_ref());
            })
        }
        CliCommand::SyncEpisodes => {
            let sync = mounter.sync_episodes()?;
            emit(format, Some(reporter), &sync, |sync| print_episodes(Some(sync)))
        }
        CliCommand::ConfigShow | CliCommand::ConfigSet { .. } | CliCommand::Validate => Ok(()),
    }
}

fn pick_url(arg: Option<String>, saved: &str, command: &str) -> Result<String> {
    match arg {
        Some(url) => Ok(url),
        None if !saved.trim().is_empty() => Ok(saved.to_string()),
        None => bail!("{command} requires a workshop URL"),
    }
}

fn remember_url(config: &mut AppConfig, update: impl FnOnce(&mut AppConfig)) {
    update(config);
    if let Err(err) = config.save() {
        tracing::warn!("could not save config: {err:#}");
    }
}

#[derive(Serialize)]
struct MountOutput<'a> {
    plan: &'a MountPlan,
    partial: bool,
    report: Option<MountReport>,
}

fn mount_prepared(
    mut mounter: Mounter,
    prepared: Preparation,
    global: &GlobalOptions,
    reporter: &MemoryReporter,
) -> Result<()> {
    let partial = matches!(prepared, Preparation::Partial(_));
    let plan = prepared.into_plan()?;
    let report = if global.dry_run {
        None
    } else {
        Some(mounter.execute(&plan)?)
    };
    let output = MountOutput {
        plan: &plan,
        partial,
        report,
    };
    emit(global.format(), Some(reporter), &output, |output| {
        print_plan(output.plan);
        match &output.report {
            None => println!("Dry run: gameinfo.txt left unchanged"),
            Some(report) => {
                println!("Mounted {} addon(s)", report.added);
                if report.markers_installed {
                    println!("Added addon markers to gameinfo.txt");
                }
                print_episodes(report.episodes.as_ref());
                if let Some(maps) = &report.maps {
                    print_map_check(maps);
                }
            }
        }
    })
}

fn run_map_check(mounter: Mounter, only: Option<HashSet<String>>) -> Result<MapCheckOutcome> {
    let task = Task::spawn(move |progress: &dyn Fn(MapProgress), cancel: &CancelFlag| {
        let mut mounter = mounter;
        mounter.map_check(only.as_ref(), cancel, &mut |update| progress(update.clone()))
    });
    cancel_on_enter(task.cancel_flag());
    let outcome = task.wait(|update| {
        if update.current_file == 0 || update.current_file == update.total_files {
            eprintln!("{}", update.status);
        }
    });
    match outcome {
        TaskOutcome::Finished(outcome) => Ok(outcome),
        TaskOutcome::Cancelled => bail!("cancelled"),
        TaskOutcome::Failed(error) => bail!(error),
    }
}

fn cancel_on_enter(flag: CancelFlag) {
    if !std::io::stdin().is_terminal() {
        return;
    }
    eprintln!("Press Enter to cancel.");
    thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(read) if read > 0) {
            flag.cancel();
        }
    });
}

fn print_records(records: &[AddonRecord]) {
    if records.is_empty() {
        println!("No addons mounted");
        return;
    }
    for record in records {
        println!("{:>3}  {:<12} {}", record.sequence, record.id, record.title);
        println!("     {}", record.path);
    }
}

fn print_plan(plan: &MountPlan) {
    for record in &plan.records {
        println!("  + {} ({})", record.title, record.id);
    }
    for item in &plan.duplicates {
        println!("  = already mounted: {} ({})", item.title, item.id);
    }
    for addon in &plan.missing {
        println!("  ! file missing: {} ({})", addon.title, addon.id);
    }
    for id in &plan.not_found {
        println!("  ? not found: {id}");
    }
    for failure in &plan.failed {
        println!("  x failed: {}: {}", failure.id, failure.error);
    }
}

fn print_map_check(outcome: &MapCheckOutcome) {
    let report = &outcome.report;
    if report.cancelled {
        println!("Map check cancelled");
    }
    println!(
        "Maps: {} found, {} extracted, {} already extracted, {} failed",
        report.total_maps,
        report.extracted.len(),
        report.already_extracted.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        println!("  x {} ({}): {}", failure.title, failure.id, failure.reason);
    }
    print_episodes(outcome.episodes.as_ref());
}

fn print_episodes(sync: Option<&EpisodeSync>) {
    let Some(sync) = sync else {
        return;
    };
    for game in &sync.synced {
        println!("Synced {}", game.label());
    }
    if let Some(error) = &sync.error {
        println!("Episode sync failed: {error}");
    }
}

fn print_help() {
    println!("MountSmith v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  mountsmith list                       List mounted addons");
    println!("  mountsmith status                     Show marker status of every gameinfo.txt");
    println!("  mountsmith validate                   Check the configured game folders");
    println!("  mountsmith add-collection [url]       Mount every addon of a collection");
    println!("  mountsmith add-url [url]              Mount a single addon");
    println!("  mountsmith add-installed              Mount addons listed in workshop.txt");
    println!("  mountsmith remove <id...>             Unmount addons");
    println!("  mountsmith remove-all                 Unmount every addon");
    println!("  mountsmith move <id|#n> <direction>   Move an addon up, down, top or bottom");
    println!("  mountsmith reorder <id...>            Put the given addons first, in order");
    println!("  mountsmith check-files [--prune]      Report (and unmount) missing addon files");
    println!("  mountsmith check-maps [id...]         Extract map addons and mount their folders");
    println!("  mountsmith clear-maps                 Delete extracted maps, mount archives again");
    println!("  mountsmith export <file>              Save the addon list");
    println!("  mountsmith import <file>              Replace the addon list with a saved one");
    println!("  mountsmith sync-episodes              Copy the addon list into the episodes");
    println!("  mountsmith config [show]              Show settings");
    println!("  mountsmith config set <key> <value>   Change a setting");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                  Output format");
    println!("  --hl2vr <path>                        Half-Life 2 VR folder for this run");
    println!("  --hl2 <path>                          Half-Life 2 folder for this run");
    println!("  --no-file-check                       Mount addons even when the archive is missing");
    println!("  --no-episodes                         Do not sync the episodes");
    println!("  --no-map-check                        Skip the map check after mounting");
    println!("  -n, --dry-run                         Show what would be mounted");
    println!("  -h, --help                            Show help");
    println!("  -V, --version                         Show version");
}
