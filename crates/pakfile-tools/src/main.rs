use anyhow::{bail, Context, Result};
use clap::{arg, ArgMatches, Command};
use colorize::AnsiColor;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pakfile::{Archive, Entry, Extraction, FolderPath, Index, OpenMode, PackError, PathFilter};
use serde::Serialize;
use std::{
    fs::{File, Metadata},
    io::{stdout, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

fn cli() -> Command {
    Command::new("pakfile-tools")
        .about("Tools for creating, reading and editing pack archives")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("pack")
                .about("Pack a directory into an archive")
                .arg(arg!(source: <SOURCE>))
                .arg(arg!(-o - -out[OUT]))
                .arg(arg!(-w - -overwrite)),
        )
        .subcommand(
            Command::new("list")
                .about("List the entries of an archive")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(-j - -json))
                .arg(arg!(-p - -pretty))
                .arg(arg!(-l - -long))
                .arg(arg!(-i - -include[PATTERN]))
                .arg(arg!(-x - -exclude[PATTERN])),
        )
        .subcommand(
            Command::new("folders")
                .about("List the folders of an archive, empty ones included")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(-j - -json))
                .arg(arg!(-p - -pretty))
                .arg(arg!(-i - -include[PATTERN]))
                .arg(arg!(-x - -exclude[PATTERN])),
        )
        .subcommand(
            Command::new("tree")
                .about("Display the folder tree of an archive")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(-j - -json))
                .arg(arg!(-p - -pretty))
                .arg(arg!(-n - -nosizes)),
        )
        .subcommand(
            Command::new("info")
                .about("Get info about an entry")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(file: <FILE>))
                .arg(arg!(-j - -json))
                .arg(arg!(-p - -pretty)),
        )
        .subcommand(
            Command::new("read")
                .about("Write the bytes of an entry to stdout")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(file: <FILE>))
                .arg(arg!(-s - -start[START]))
                .arg(arg!(-e - -end[END])),
        )
        .subcommand(
            Command::new("unpack")
                .about("Extract an archive into a directory")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(-o - -out[OUT]))
                .arg(arg!(-i - -include[PATTERN]))
                .arg(arg!(-x - -exclude[PATTERN])),
        )
        .subcommand(
            Command::new("rename")
                .about("Rename an entry within its folder")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(file: <FILE>))
                .arg(arg!(new_name: <NEW_NAME>)),
        )
        .subcommand(
            Command::new("move")
                .about("Move an entry to another folder")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(file: <FILE>))
                .arg(arg!(folder: <FOLDER>)),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an entry from an archive")
                .arg(arg!(archive_path: <ARCHIVE>))
                .arg(arg!(file: <FILE>)),
        )
        .subcommand(
            Command::new("prune")
                .about("Delete folders that hold no entries")
                .arg(arg!(archive_path: <ARCHIVE>)),
        )
}

pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("pack", sub_matches)) => pack(sub_matches),
        Some(("list", sub_matches)) => {
            let (archive, _) = open_archive(sub_matches, OpenMode::ReadOnly)?;
            let entries = archive.list_entries(&filter_from(sub_matches)?)?;
            if sub_matches.get_flag("json") {
                print_json(&entries, sub_matches.get_flag("pretty"))
            } else {
                let mut out = stdout().lock();
                for entry in &entries {
                    if sub_matches.get_flag("long") {
                        writeln!(
                            out,
                            "{:>10} {:>10} {:>11} {}",
                            entry.offset(),
                            entry.size(),
                            entry.timestamp(),
                            entry.path()
                        )?;
                    } else {
                        writeln!(out, "{}", entry.path())?;
                    }
                }
                Ok(())
            }
        }
        Some(("folders", sub_matches)) => {
            let (archive, _) = open_archive(sub_matches, OpenMode::ReadOnly)?;
            let folders = archive.list_folders(&filter_from(sub_matches)?)?;
            if sub_matches.get_flag("json") {
                print_json(&folders, sub_matches.get_flag("pretty"))
            } else {
                let mut out = stdout().lock();
                for folder in &folders {
                    if folder.is_root() {
                        writeln!(out, "\\")?;
                    } else {
                        writeln!(out, "{folder}")?;
                    }
                }
                Ok(())
            }
        }
        Some(("tree", sub_matches)) => {
            let (archive, arc_path) = open_archive(sub_matches, OpenMode::ReadOnly)?;
            let index = archive.index()?;
            let root = FolderPath::root();
            if sub_matches.get_flag("json") {
                print_json(
                    &build_tree(index, &root, &archive_name(&arc_path)),
                    sub_matches.get_flag("pretty"),
                )
            } else {
                println!(
                    "{} {}",
                    archive_name(&arc_path).blue().bold(),
                    format!("[{}]", index.entry_count()).bold().red()
                );
                print_tree(index, &root, &mut Vec::new(), !sub_matches.get_flag("nosizes"));
                Ok(())
            }
        }
        Some(("info", sub_matches)) => {
            let (archive, _) = open_archive(sub_matches, OpenMode::ReadOnly)?;
            let entry = find(&archive, sub_matches)?;
            let info = EntryInfo {
                path: entry.path(),
                folder: entry.folder().path().to_string(),
                name: entry.name().to_string(),
                offset: entry.offset(),
                size: entry.size(),
                end: entry.end(),
                timestamp: entry.timestamp(),
            };
            if sub_matches.get_flag("json") {
                print_json(&info, sub_matches.get_flag("pretty"))
            } else {
                serde_yaml::to_writer(stdout().lock(), &info).context("Couldn't encode info")
            }
        }
        Some(("read", sub_matches)) => {
            let (archive, _) = open_archive(sub_matches, OpenMode::ReadOnly)?;
            let entry = find(&archive, sub_matches)?;
            let len = u64::from(entry.size());
            let start = parse_offset(sub_matches, "start")?.unwrap_or(0);
            let end = parse_offset(sub_matches, "end")?.unwrap_or(len);
            if start > end || end > len {
                bail!("Range {start}..{end} is outside of {} ({len} bytes)", entry.path());
            }
            let mut reader = archive.open_read_stream(&entry)?;
            reader
                .seek(SeekFrom::Start(start))
                .context("Couldn't seek to start of entry")?;
            std::io::copy(&mut reader.take(end - start), &mut stdout().lock())
                .context("Couldn't copy into stdout")?;
            Ok(())
        }
        Some(("unpack", sub_matches)) => unpack(sub_matches),
        Some(("rename", sub_matches)) => {
            let (mut archive, _) = open_archive(sub_matches, OpenMode::ReadWrite)?;
            let entry = find(&archive, sub_matches)?;
            let new_name = required(sub_matches, "new_name")?;
            let renamed = archive
                .rename(&entry, new_name)
                .with_context(|| format!("Couldn't rename {}", entry.path()))?;
            archive.close().context("Couldn't write entry list")?;
            println!("{} -> {}", entry.path(), renamed.path());
            Ok(())
        }
        Some(("move", sub_matches)) => {
            let (mut archive, _) = open_archive(sub_matches, OpenMode::ReadWrite)?;
            let entry = find(&archive, sub_matches)?;
            let destination = FolderPath::new(required(sub_matches, "folder")?);
            let moved = archive
                .move_entry(&entry, &destination)
                .with_context(|| format!("Couldn't move {}", entry.path()))?;
            archive.close().context("Couldn't write entry list")?;
            println!("{} -> {}", entry.path(), moved.path());
            Ok(())
        }
        Some(("remove", sub_matches)) => {
            let (mut archive, _) = open_archive(sub_matches, OpenMode::ReadWrite)?;
            let entry = find(&archive, sub_matches)?;
            archive.remove(&entry)?;
            archive.close().context("Couldn't write entry list")?;
            Ok(())
        }
        Some(("prune", sub_matches)) => {
            let (mut archive, _) = open_archive(sub_matches, OpenMode::ReadWrite)?;
            let removed = archive.delete_empty_folders()?;
            archive.close().context("Couldn't write entry list")?;
            println!("Removed {removed} empty folders");
            Ok(())
        }
        _ => unreachable!(),
    }
}

#[derive(Debug, Clone, Serialize)]
struct EntryInfo {
    path: String,
    folder: String,
    name: String,
    offset: u32,
    size: u32,
    end: u64,
    timestamp: i32,
}

#[derive(Debug, Clone, Serialize)]
struct TreeNode {
    name: String,
    entries: Vec<Entry>,
    folders: Vec<TreeNode>,
}

fn children<'a>(index: &'a Index, folder: &'a FolderPath) -> impl Iterator<Item = &'a FolderPath> {
    index
        .folders()
        .filter(move |f| !f.is_root() && f.parent() == *folder)
}

fn build_tree(index: &Index, folder: &FolderPath, name: &str) -> TreeNode {
    TreeNode {
        name: name.to_string(),
        entries: index.entries_in(folder).cloned().collect(),
        folders: children(index, folder)
            .map(|child| build_tree(index, child, child.name()))
            .collect(),
    }
}

enum Node<'a> {
    File(&'a Entry),
    Folder(&'a FolderPath),
}

fn print_tree(index: &Index, folder: &FolderPath, rails: &mut Vec<bool>, sizes: bool) {
    let nodes: Vec<_> = index
        .entries_in(folder)
        .map(Node::File)
        .chain(children(index, folder).map(Node::Folder))
        .collect();
    let count = nodes.len();

    for (i, node) in nodes.into_iter().enumerate() {
        let last = i + 1 == count;
        let prefix = branch_prefix(rails, last);
        match node {
            Node::File(entry) if sizes => println!(
                "{prefix} {} {}",
                entry.name(),
                format!("[{}]", entry.size()).red().bold()
            ),
            Node::File(entry) => println!("{prefix} {}", entry.name()),
            Node::Folder(child) => {
                println!("{prefix} {}", child.name().to_string().bold().blue());
                rails.push(!last);
                print_tree(index, child, rails, sizes);
                rails.pop();
            }
        }
    }
}

/// `rails[depth]` is true while the folder at that depth still has siblings
/// to draw below it.
fn branch_prefix(rails: &[bool], last: bool) -> String {
    rails
        .iter()
        .map(|&open| if open { "│   " } else { "    " })
        .chain([if last { "└──" } else { "├──" }])
        .collect()
}

fn pack(sub_matches: &ArgMatches) -> Result<()> {
    let source = PathBuf::from(required(sub_matches, "source")?);
    let arc_path = match sub_matches.get_one::<String>("out") {
        Some(path) => PathBuf::from(path),
        None => {
            let source_path = std::fs::canonicalize(&source)
                .with_context(|| format!("Couldn't canonicalize {}", source.display()))?;
            let name = source_path
                .file_name()
                .context("Couldn't get source dir name")?;
            PathBuf::from(format!("{}.pak", name.to_string_lossy()))
        }
    };
    if arc_path.exists() && !sub_matches.get_flag("overwrite") {
        bail!(
            "{} already exists, pass --overwrite to replace it",
            arc_path.display()
        );
    }

    let walk = || WalkDir::new(&source).min_depth(1).sort_by_file_name();
    let multi_progress = MultiProgress::new();
    let len_spinner = multi_progress.add(ProgressBar::new_spinner());
    let (mut len, mut entry_count) = (0, 0);
    for metadata in walk()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
    {
        len_spinner.inc(1);
        len += metadata.len();
        entry_count += 1;
    }
    len_spinner.finish_and_clear();
    let entry_progress_bar = multi_progress.add(ProgressBar::new(entry_count));
    let data_progress_bar = multi_progress.add(ProgressBar::new(len).with_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{eta}] {wide_bar} {bytes}/{total_bytes} ({percent_precise}%)",
        )?,
    ));

    let mut archive = Archive::create(&arc_path)
        .with_context(|| format!("Couldn't create {}", arc_path.display()))?;
    let own_path = std::fs::canonicalize(&arc_path).ok();
    for file in walk() {
        let file = file?;
        let relative = file.path().strip_prefix(&source)?;
        if file.file_type().is_dir() {
            match archive.add_folder(&FolderPath::new(&relative.to_string_lossy())) {
                Err(PackError::InvalidEntry { reason, .. }) => {
                    warn!(path = %relative.display(), %reason, "skipping folder");
                }
                result => {
                    result?;
                }
            }
            continue;
        }
        if !file.file_type().is_file() || std::fs::canonicalize(file.path()).ok() == own_path {
            continue;
        }
        entry_progress_bar.inc(1);
        let metadata = file.metadata()?;
        if metadata.len() == 0 {
            warn!(path = %relative.display(), "skipping empty file");
            continue;
        }
        entry_progress_bar.println(relative.to_string_lossy());
        let folder = relative
            .parent()
            .map(|p| FolderPath::new(&p.to_string_lossy()))
            .unwrap_or_default();
        let f = File::open(file.path())
            .with_context(|| format!("Couldn't read {}", file.path().display()))?;
        match archive.append(
            &folder,
            &file.file_name().to_string_lossy(),
            unix_timestamp(&metadata),
            data_progress_bar.wrap_read(f),
        ) {
            Err(PackError::InvalidEntry { reason, .. }) => {
                warn!(path = %relative.display(), %reason, "skipping file");
                data_progress_bar.inc(metadata.len());
            }
            result => {
                result.with_context(|| {
                    format!("Couldn't append archive entry: [{}]", file.path().display())
                })?;
            }
        }
    }
    entry_progress_bar.finish();
    data_progress_bar.finish();
    archive.close().context("Couldn't write entry list")?;
    debug!(path = %arc_path.display(), "packed archive");
    Ok(())
}

fn unpack(sub_matches: &ArgMatches) -> Result<()> {
    let (archive, arc_path) = open_archive(sub_matches, OpenMode::ReadOnly)?;
    let path = match sub_matches.get_one::<String>("out") {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(archive_name(&arc_path)),
    };
    let filter = filter_from(sub_matches)?;
    let total: u64 = archive
        .list_entries(&filter)?
        .iter()
        .map(|e| u64::from(e.size()))
        .sum();

    let progress_bar = ProgressBar::new(total).with_style(ProgressStyle::with_template(
        "[{elapsed_precise}] [{eta}] {wide_bar} {bytes}/{total_bytes} ({percent_precise}%)",
    )?);
    let on_entry = |entry: &Entry| progress_bar.inc(u64::from(entry.size()));
    let summary = archive
        .extract_with(&path, &Extraction::new().filter(filter).on_entry(&on_entry))
        .with_context(|| format!("Couldn't unpack into {}", path.display()))?;
    progress_bar.finish();
    println!(
        "Unpacked {} files ({} bytes) and {} folders into {}",
        summary.files,
        summary.bytes,
        summary.folders,
        path.display()
    );
    Ok(())
}

fn open_archive(sub_matches: &ArgMatches, mode: OpenMode) -> Result<(Archive, PathBuf)> {
    let arc_path = PathBuf::from(required(sub_matches, "archive_path")?);
    let archive = Archive::open(&arc_path, mode)
        .with_context(|| format!("Couldn't open archive {}", arc_path.display()))?;
    Ok((archive, arc_path))
}

fn find(archive: &Archive, sub_matches: &ArgMatches) -> Result<Entry> {
    let path = required(sub_matches, "file")?;
    archive
        .find_entry(path)
        .with_context(|| format!("Couldn't find {path} in the archive"))
}

fn required<'a>(sub_matches: &'a ArgMatches, id: &str) -> Result<&'a str> {
    sub_matches
        .get_one::<String>(id)
        .map(String::as_str)
        .with_context(|| format!("Couldn't get {id} from args"))
}

fn filter_from(sub_matches: &ArgMatches) -> Result<PathFilter> {
    PathFilter::new(
        sub_matches.get_one::<String>("include").map(String::as_str),
        sub_matches.get_one::<String>("exclude").map(String::as_str),
    )
    .context("Invalid pattern")
}

fn parse_offset(sub_matches: &ArgMatches, id: &str) -> Result<Option<u64>> {
    sub_matches
        .get_one::<String>(id)
        .map(|v| v.parse::<u64>().with_context(|| format!("{id} is not a byte offset: {v}")))
        .transpose()
}

fn print_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<()> {
    let mut out = stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut out, value)?;
    } else {
        serde_json::to_writer(&mut out, value)?;
    }
    writeln!(out)?;
    Ok(())
}

/// File name of the archive without its extension.
fn archive_name(arc_path: &Path) -> String {
    arc_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string())
}

/// Modification time in Unix seconds, clamped to what a record can hold.
fn unix_timestamp(metadata: &Metadata) -> i32 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i32::try_from(d.as_secs()).unwrap_or(i32::MAX))
        .unwrap_or(0)
}
