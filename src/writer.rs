use crate::{
    addon::AddonRecord,
    error::GameInfoError,
    markers::{MarkerSpan, BLOCK_INDENT},
    parser::{classify, LineKind, ParsedBlock},
};
use std::collections::{BTreeSet, HashSet};

pub fn render_record(record: &AddonRecord, newline: &str) -> Result<[String; 3], GameInfoError> {
    validate(record)?;
    Ok([
        format!("{BLOCK_INDENT}// {}{newline}", record.title),
        format!("{BLOCK_INDENT}game+mod\t\t\"{}\"{newline}", record.path),
        newline.to_string(),
    ])
}

pub fn render_block(records: &[AddonRecord], newline: &str) -> Result<Vec<String>, GameInfoError> {
    let mut out = Vec::with_capacity(records.len() * 3);
    for record in records {
        out.extend(render_record(record, newline)?);
    }
    Ok(out)
}

fn validate(record: &AddonRecord) -> Result<(), GameInfoError> {
    let invalid = |reason| GameInfoError::InvalidRecord {
        title: record.title.clone(),
        reason,
    };
    if record.title.trim().is_empty() {
        return Err(invalid("empty title"));
    }
    if record.title.contains(['\r', '\n']) {
        return Err(invalid("title spans more than one line"));
    }
    if record.path.is_empty() {
        return Err(invalid("empty path"));
    }
    if record.path.contains(['"', '\r', '\n']) {
        return Err(invalid("path contains a quote or line break"));
    }
    Ok(())
}

pub fn replace_region(
    lines: &[String],
    span: MarkerSpan,
    records: &[AddonRecord],
    newline: &str,
) -> Result<Vec<String>, GameInfoError> {
    if span.start >= span.end || span.end >= lines.len() {
        return Err(GameInfoError::Corrupted);
    }
    let block = render_block(records, newline)?;
    let mut out = Vec::with_capacity(lines.len() - span.inner().len() + block.len());
    out.extend_from_slice(&lines[..=span.start]);
    out.extend(block);
    out.extend_from_slice(&lines[span.end..]);
    Ok(out)
}

// Only lines inside the parsed region are touched.
pub fn remove_parsed(
    lines: &[String],
    block: &ParsedBlock,
    ids: &HashSet<String>,
) -> (Vec<String>, usize) {
    let mut doomed = BTreeSet::new();
    let mut removed = 0;

    for addon in &block.addons {
        if !ids.contains(&addon.record.id) {
            continue;
        }
        if !block.region.contains(&addon.title_line) || !block.region.contains(&addon.mount_line) {
            continue;
        }
        doomed.extend(addon.title_line..=addon.mount_line);
        let after = addon.mount_line + 1;
        if block.region.contains(&after)
            && matches!(lines.get(after).map(|line| classify(line)), Some(LineKind::Blank))
        {
            doomed.insert(after);
        }
        removed += 1;
    }

    let kept = lines
        .iter()
        .enumerate()
        .filter(|(idx, _)| !doomed.contains(idx))
        .map(|(_, line)| line.clone())
        .collect();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{markers, parser};
    use pretty_assertions::assert_eq;

    const FILE: &str = "\"GameInfo\"\n{\n\tSearchPaths\n\t{\n\t\tgame+mod\t\thlvr/custom/*\n//mounted_addons_start\n\t\t// Old\n\t\tgame+mod\t\t\"/w/workshop/content/220/1/workshop_dir.vpk\"\n\n//mounted_addons_end\n\t\t// mount VR files\n\t\tgame\t\thlvr\n\t}\n}\n";

    fn lines(text: &str) -> Vec<String> {
        text.split_inclusive('\n').map(str::to_string).collect()
    }

    fn record(id: &str, title: &str) -> AddonRecord {
        AddonRecord::new(title, format!("/w/workshop/content/220/{id}/workshop_dir.vpk"))
    }

    #[test]
    fn renders_block_format() {
        let rendered = render_record(&record("5", "Five"), "\n").unwrap();
        assert_eq!(rendered[0], "\t\t// Five\n");
        assert_eq!(
            rendered[1],
            "\t\tgame+mod\t\t\"/w/workshop/content/220/5/workshop_dir.vpk\"\n"
        );
        assert_eq!(rendered[2], "\n");
    }

    #[test]
    fn rejects_paths_that_would_break_the_block() {
        let mut bad = record("5", "Five");
        bad.path = "C:\\a\"b".to_string();
        let err = render_record(&bad, "\n").unwrap_err();
        assert!(matches!(err, GameInfoError::InvalidRecord { .. }));
    }

    #[test]
    fn round_trips_through_parser() {
        let file = lines(FILE);
        let (_, span) = markers::locate(&file);
        let wanted = vec![record("30", "C"), record("10", "A"), record("20", "MAP   |   B")];
        let written = replace_region(&file, span.unwrap(), &wanted, "\n").unwrap();
        let parsed = parser::parse_block(&written).unwrap().records();
        let got: Vec<(&str, &str, &str)> = parsed
            .iter()
            .map(|r| (r.id.as_str(), r.title.as_str(), r.path.as_str()))
            .collect();
        let expected: Vec<(&str, &str, &str)> = wanted
            .iter()
            .map(|r| (r.id.as_str(), r.title.as_str(), r.path.as_str()))
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn leaves_lines_outside_markers_untouched() {
        let file = lines(FILE);
        let (_, span) = markers::locate(&file);
        let span = span.unwrap();
        let written = replace_region(&file, span, &[record("2", "Two")], "\n").unwrap();
        assert_eq!(written[..=span.start], file[..=span.start]);
        let tail = file.len() - span.end;
        assert_eq!(written[written.len() - tail..], file[span.end..]);
    }

    #[test]
    fn empty_list_leaves_adjacent_markers() {
        let file = lines(FILE);
        let (_, span) = markers::locate(&file);
        let written = replace_region(&file, span.unwrap(), &[], "\n").unwrap();
        assert_eq!(markers::locate(&written).1, Some(MarkerSpan { start: 5, end: 6 }));
    }

    #[test]
    fn removes_only_parsed_lines() {
        let text = "//mounted_addons_start\n\t\t// Keep\n\t\tgame+mod\t\t\"/w/1/workshop_dir.vpk\"\n\n\t\t// Keep extra\n\t\tgame+mod\t\t\"/w/2/workshop_dir.vpk\"\n\n//mounted_addons_end\n// Keep extra\n";
        let file = lines(text);
        let block = parser::parse_block(&file).unwrap();
        let ids: HashSet<String> = ["2".to_string()].into_iter().collect();
        let (kept, removed) = remove_parsed(&file, &block, &ids);
        assert_eq!(removed, 1);
        assert_eq!(
            kept.concat(),
            "//mounted_addons_start\n\t\t// Keep\n\t\tgame+mod\t\t\"/w/1/workshop_dir.vpk\"\n\n//mounted_addons_end\n// Keep extra\n"
        );
    }
}
