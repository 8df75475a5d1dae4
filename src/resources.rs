use crate::install::{GameDir, Installation};
use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

pub const RESOURCES_DIR_NAME: &str = "vr_essential_resources";

const HLVR_SCRIPTS: &[&str] = &[
    "colorcorrection",
    "screens",
    "bhaptics_effects.txt",
    "game_sounds_weapons.txt",
    "HudAnimations.txt",
    "HudLayout.res",
    "rumble_effects.txt",
    "vgui_screens.txt",
    "weapon_357.txt",
    "weapon_ar2.txt",
    "weapon_bugbait.txt",
    "weapon_crossbow.txt",
    "weapon_crowbar.txt",
    "weapon_cubemap.txt",
    "weapon_frag.txt",
    "weapon_physcannon.txt",
    "weapon_physgun.txt",
    "weapon_pistol.txt",
    "weapon_rpg.txt",
    "weapon_shotgun.txt",
    "weapon_smg1.txt",
];
const EP2VR_SCRIPTS: &[&str] = &["hudlayout.res", "vgui_screens.txt"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceCopy {
    pub game: GameDir,
    pub files: usize,
    pub skipped: bool,
}

fn scripts_for(game: GameDir) -> &'static [&'static str] {
    match game {
        GameDir::Hlvr => HLVR_SCRIPTS,
        GameDir::EpisodicVr => &[],
        GameDir::Ep2Vr => EP2VR_SCRIPTS,
    }
}

pub fn resources_dir(game_dir: &Path) -> PathBuf {
    game_dir.join("custom").join(RESOURCES_DIR_NAME)
}

pub fn copy_essential_resources(
    install: &Installation,
    bundled_content: Option<&Path>,
) -> Result<Vec<ResourceCopy>> {
    let mut results = Vec::new();
    for game in GameDir::ALL {
        let game_dir = install.game_dir(game);
        let dest = resources_dir(&game_dir);
        if dest.exists() || (game != GameDir::Hlvr && !game_dir.is_dir()) {
            results.push(ResourceCopy {
                game,
                files: 0,
                skipped: true,
            });
            continue;
        }

        tracing::info!(game = game.dir_name(), "copying essential VR files to custom");
        fs::create_dir_all(&dest).with_context(|| format!("create {}", dest.display()))?;
        let mut files = 0;

        let scripts_src = game_dir.join("scripts");
        let scripts = scripts_for(game);
        if !scripts.is_empty() && scripts_src.is_dir() {
            let scripts_dst = dest.join("scripts");
            fs::create_dir_all(&scripts_dst).context("create scripts copy dir")?;
            for item in scripts {
                let src = scripts_src.join(item);
                if src.exists() {
                    files += copy_item(&src, &scripts_dst.join(item))?;
                }
            }
        }

        let resource_src = game_dir.join("resource");
        if resource_src.is_dir() {
            files += copy_item(&resource_src, &dest.join("resource"))?;
        }

        if game == GameDir::Hlvr {
            if let Some(bundled) = bundled_content {
                let shaders = bundled.join(game.dir_name()).join("shaders");
                if shaders.is_dir() {
                    files += copy_item(&shaders, &dest.join("shaders"))?;
                }
            }
        }

        results.push(ResourceCopy {
            game,
            files,
            skipped: false,
        });
    }
    Ok(results)
}

fn copy_item(src: &Path, dst: &Path) -> Result<usize> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).context("create copy parent")?;
        }
        fs::copy(src, dst).with_context(|| format!("copy {}", src.display()))?;
        return Ok(1);
    }

    let mut files = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("strip copy prefix")?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
            files += 1;
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn copies_listed_files_once() {
        let root = tempfile::tempdir().unwrap();
        let vr = root.path().join("Half-Life 2 VR");
        write(&vr.join("hlvr/scripts/weapon_pistol.txt"), "pistol");
        write(&vr.join("hlvr/scripts/unrelated.txt"), "nope");
        write(&vr.join("hlvr/scripts/screens/a.res"), "a");
        write(&vr.join("hlvr/resource/ui/hud.res"), "hud");
        write(&vr.join("ep2vr/scripts/hudlayout.res"), "ep2");
        let bundled = root.path().join("bundle");
        write(&bundled.join("hlvr/shaders/fxc/x.vcs"), "shader");

        let install = Installation::from_parts(vr.clone(), root.path().join("hl2"), root.path().join("ws"));
        let results = copy_essential_resources(&install, Some(&bundled)).unwrap();

        let hlvr = resources_dir(&vr.join("hlvr"));
        assert!(hlvr.join("scripts/weapon_pistol.txt").is_file());
        assert!(hlvr.join("scripts/screens/a.res").is_file());
        assert!(!hlvr.join("scripts/unrelated.txt").exists());
        assert!(hlvr.join("resource/ui/hud.res").is_file());
        assert!(hlvr.join("shaders/fxc/x.vcs").is_file());
        assert!(resources_dir(&vr.join("ep2vr")).join("scripts/hudlayout.res").is_file());

        assert_eq!(results[0].files, 4);
        assert!(results[1].skipped);
        assert_eq!(results[2].files, 1);

        fs::write(vr.join("hlvr/scripts/weapon_pistol.txt"), "changed").unwrap();
        let again = copy_essential_resources(&install, Some(&bundled)).unwrap();
        assert!(again.iter().all(|copy| copy.skipped));
        assert_eq!(
            fs::read_to_string(hlvr.join("scripts/weapon_pistol.txt")).unwrap(),
            "pistol"
        );
    }
}
