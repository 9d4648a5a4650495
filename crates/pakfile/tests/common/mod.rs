#![allow(dead_code)]

use std::{fs, path::Path};

use pakfile::{
    record::{Header, Record},
    Archive, FolderPath, HEADER_LEN,
};

/// Writes a raw archive image: header, `payload`, then `records`.
pub fn write_image(path: &Path, payload: &[u8], records: &[Record]) {
    let mut buf = Vec::new();
    Header {
        entry_list_offset: (HEADER_LEN as usize + payload.len()) as u32,
        entry_count: records.len() as i32,
    }
    .write_to(&mut buf)
    .expect("header");
    buf.extend_from_slice(payload);
    for record in records {
        record.write_to(&mut buf).expect("record");
    }
    fs::write(path, buf).expect("write image");
}

pub fn file_record(name: &str, offset: u32, size: u32, timestamp: i32) -> Record {
    Record {
        offset,
        size,
        name: name.to_string(),
        timestamp,
    }
}

/// A small mod-style layout with an empty folder in it.
pub fn build_sample(path: &Path) {
    let mut archive = Archive::create(path).expect("create archive");
    let files: &[(&str, &str, &[u8])] = &[
        ("", "readme.txt", b"read me first"),
        ("Data", "plugin.esp", b"TES4 plugin bytes"),
        ("Data\\Meshes", "rock.nif", b"nif nif nif"),
        ("Data\\Meshes\\Clutter", "cup.nif", b"cup"),
        ("Data\\Textures", "rock.dds", b"DDS texture payload"),
        ("Docs", "changes.txt", b"v1.0\nv1.1\n"),
    ];
    for (i, (folder, name, bytes)) in files.iter().enumerate() {
        archive
            .append(&FolderPath::new(folder), name, 1_600_000_000 + i as i32, *bytes)
            .expect("append");
    }
    archive
        .add_folder(&FolderPath::new("Data\\Sounds"))
        .expect("add folder");
    archive.close().expect("close");
}

/// Relative paths of every file below `root`, sorted, with `/` separators.
pub fn files_under(root: &Path) -> Vec<String> {
    fn visit(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                visit(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).expect("prefix");
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    let mut out = Vec::new();
    visit(root, root, &mut out);
    out.sort();
    out
}
